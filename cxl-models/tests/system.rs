// Copyright (c) 2023 Graphcore Ltd. All rights reserved.

use std::collections::VecDeque;

use cxl_components::bus::BusRole;
use cxl_engine::test_helpers::start_test;
use cxl_models::memory::memory_map::DeviceId;
use cxl_models::node::device::DeviceConfig;
use cxl_models::node::host::HostConfig;
use cxl_models::system::{System, SystemConfig};
use cxl_models::trace::TraceEntry;
use cxl_models::test_helpers::{
    DEVICE0_BASE, create_system, cxl_only_config, device0_stream, read_at, write_at,
};
use cxl_protocols::credits::Credits;
use cxl_protocols::message::Opcode;
use cxl_protocols::timing::Stage;
use serial_test::serial;

const TICK_LIMIT: i64 = 10_000_000;
const VC_SIZE: i64 = 1024;

fn data_slots_on(system: &System, role: BusRole) -> usize {
    system
        .buses()
        .filter(|bus| bus.role() == role)
        .flat_map(|bus| bus.records().values())
        .map(|record| record.num_data)
        .sum()
}

fn assert_credits_conserved(system: &System, vc_size: i64) {
    let host = system.host().unwrap();
    for device in system.devices() {
        let ext = host.ext_credits(device.id()).unwrap();
        let int = device.int_credits();
        assert_eq!(ext.req + int.req, vc_size, "req credits of {}", device.id());
        assert_eq!(ext.data + int.data, vc_size, "data credits of {}", device.id());
        assert_eq!(int.rsp, 0);
    }
}

#[test]
#[serial]
fn single_read_without_switch() {
    let mut ctx = start_test(file!());
    let trace = VecDeque::from(vec![read_at(DEVICE0_BASE + 0x40, 0)]);
    let mut system = create_system(&ctx, &cxl_only_config(), trace);
    let host_int_before = system.host().unwrap().int_credits();
    assert_credits_conserved(&system, VC_SIZE);

    system
        .run_until_complete(&mut ctx, 1, Some(TICK_LIMIT))
        .unwrap();

    let host = system.host().unwrap();
    assert_eq!(host.num_completed(), 1);
    assert_eq!(host.num_outstanding(), 0);
    assert_eq!(host.int_credits(), host_int_before);
    assert_credits_conserved(&system, VC_SIZE);

    let response = host.last_retired().unwrap();
    assert_eq!(response.opcode, Opcode::Drs);
    let path = [
        Stage::Created,
        Stage::Packed,
        Stage::Transmitted,
        Stage::Received,
        Stage::Unpacked,
        Stage::AtMemory,
        Stage::MemoryComplete,
        Stage::Repacked,
        Stage::Retransmitted,
        Stage::RespReceived,
        Stage::RespUnpacked,
        Stage::Complete,
    ];
    for pair in path.windows(2) {
        let (a, b) = (response.timing.get(pair[0]), response.timing.get(pair[1]));
        assert!(a < b, "{:?} at {} is not before {:?} at {}", pair[0], a, pair[1], b);
    }
    // No switch on the path
    assert_eq!(response.timing.switch_ds_rx, 0);

    let latency = &host.cxl_latency()[&response.table_id()];
    assert_eq!(latency.count(), 1);
}

#[test]
#[serial]
fn single_write_rolls_over_four_data_slots() {
    let mut ctx = start_test(file!());
    let trace = VecDeque::from(vec![write_at(DEVICE0_BASE, 0)]);
    let mut system = create_system(&ctx, &cxl_only_config(), trace);

    system
        .run_until_complete(&mut ctx, 1, Some(TICK_LIMIT))
        .unwrap();

    assert_eq!(system.host().unwrap().last_retired().unwrap().opcode, Opcode::Ndr);
    // Header and three data slots, then the last data slot in the next flit
    let to_device = system
        .buses()
        .find(|bus| bus.role() == BusRole::HostDevice)
        .unwrap();
    let data: Vec<usize> = to_device.records().values().map(|r| r.num_data).collect();
    assert_eq!(data, vec![3, 1]);
    assert_eq!(data_slots_on(&system, BusRole::DeviceHost), 0);
    assert_credits_conserved(&system, VC_SIZE);
}

#[test]
#[serial]
fn data_slots_match_headers() {
    let mut ctx = start_test(file!());
    const NUM_ACCESSES: usize = 300;
    let trace = device0_stream(NUM_ACCESSES, |i| i % 3 == 0);
    let num_writes = trace.iter().filter(|e| e.opcode == Opcode::RwD).count();
    let num_reads = NUM_ACCESSES - num_writes;
    let mut system = create_system(&ctx, &cxl_only_config(), trace);

    system
        .run_until_complete(&mut ctx, NUM_ACCESSES as u64, Some(TICK_LIMIT))
        .unwrap();

    assert_eq!(data_slots_on(&system, BusRole::HostDevice), 4 * num_writes);
    assert_eq!(data_slots_on(&system, BusRole::DeviceHost), 4 * num_reads);
    assert_eq!(system.device(DeviceId(0)).unwrap().num_reqs(), NUM_ACCESSES as u64);
    assert_credits_conserved(&system, VC_SIZE);
    let host = system.host().unwrap();
    assert_eq!(host.int_credits(), Credits::new(0, VC_SIZE, VC_SIZE));
}

#[test]
#[serial]
fn credits_in_range_every_tick() {
    let mut ctx = start_test(file!());
    const NUM_ACCESSES: usize = 200;
    let trace = device0_stream(NUM_ACCESSES, |i| i % 2 == 1);
    let mut system = create_system(&ctx, &cxl_only_config(), trace);

    while !system.host().unwrap().is_complete(NUM_ACCESSES as u64) {
        system.update(&mut ctx).unwrap();
        ctx.advance();
        assert!(ctx.now() < TICK_LIMIT);

        let host = system.host().unwrap().int_credits();
        assert_eq!(host.req, 0);
        assert!((0..=VC_SIZE).contains(&host.rsp));
        assert!((0..=VC_SIZE).contains(&host.data));
        for device in system.devices() {
            let int = device.int_credits();
            assert_eq!(int.rsp, 0);
            assert!((0..=VC_SIZE).contains(&int.req));
            assert!((0..=VC_SIZE).contains(&int.data));
        }
    }
    assert_credits_conserved(&system, VC_SIZE);
}

/// Run a trace with and without cycle skipping and return the tick at which
/// each completed.
fn run_both_ways(config: &SystemConfig, trace: VecDeque<TraceEntry>) -> (i64, i64) {
    let expected = trace.len() as u64;
    let mut end = Vec::new();
    for skip_cycle in [true, false] {
        let mut ctx = start_test(file!());
        ctx.skip_cycle = skip_cycle;
        let mut system = create_system(&ctx, config, trace.clone());
        system
            .run_until_complete(&mut ctx, expected, Some(TICK_LIMIT))
            .unwrap();
        if !skip_cycle {
            assert_eq!(system.ticks_skipped(), 0);
        }
        end.push(ctx.now());
    }
    (end[0], end[1])
}

#[test]
#[serial]
fn skipping_cycles_changes_nothing() {
    let mut trace = device0_stream(120, |i| i % 4 == 0);
    // Idle periods for the host to jump over
    trace.push_back(read_at(DEVICE0_BASE + 0x10000, 5_000));
    trace.push_back(write_at(DEVICE0_BASE + 0x10040, 20_000));
    trace.push_back(read_at(DEVICE0_BASE + 0x10080, 3));

    let (with_skip, without_skip) = run_both_ways(&cxl_only_config(), trace);
    assert_eq!(with_skip, without_skip);
}

#[test]
#[serial]
fn idle_host_jumps_ahead() {
    let mut ctx = start_test(file!());
    let trace = VecDeque::from(vec![
        read_at(DEVICE0_BASE, 0),
        read_at(DEVICE0_BASE + 0x40, 100_000),
    ]);
    let mut system = create_system(&ctx, &cxl_only_config(), trace);
    system
        .run_until_complete(&mut ctx, 2, Some(TICK_LIMIT))
        .unwrap();
    assert!(system.ticks_skipped() > 0);
    assert!(ctx.now() > 100_000 * ctx.timing().ticks_per_ins);
}

#[test]
#[serial]
fn small_channels_apply_backpressure() {
    let mut ctx = start_test(file!());
    let vc_size = 8;
    let config = SystemConfig {
        host: HostConfig {
            vc_size: vc_size as usize,
            rx_vc_size: vc_size as usize,
            ..HostConfig::default()
        },
        device: DeviceConfig {
            vc_size: vc_size as usize,
            ..DeviceConfig::default()
        },
        ..cxl_only_config()
    };
    const NUM_ACCESSES: usize = 200;
    let trace = device0_stream(NUM_ACCESSES, |i| i % 5 < 2);
    let mut system = create_system(&ctx, &config, trace);

    system
        .run_until_complete(&mut ctx, NUM_ACCESSES as u64, Some(TICK_LIMIT))
        .unwrap();

    assert_credits_conserved(&system, vc_size);
    let host = system.host().unwrap();
    assert_eq!(host.int_credits(), Credits::new(0, vc_size, vc_size));
    assert!(host.credit_checks().ext_rejects + host.credit_checks().int_rejects > 0);
}

#[test]
#[serial]
fn dam_serves_its_range() {
    let mut ctx = start_test(file!());
    let trace = VecDeque::from(vec![
        read_at(0x1000, 0),
        read_at(DEVICE0_BASE, 0),
        write_at(0x2000, 0),
    ]);
    let mut system = create_system(&ctx, &SystemConfig::default(), trace);
    system
        .run_until_complete(&mut ctx, 3, Some(TICK_LIMIT))
        .unwrap();
    let host = system.host().unwrap();
    assert_eq!(host.num_dam_completed(), 2);
    assert_eq!(host.dam_latency()[&0].count, 2);
    assert_eq!(system.device(DeviceId(0)).unwrap().num_reqs(), 1);
    // Bus history is off by default
    assert!(system.buses().all(|bus| bus.records().is_empty()));
}

#[test]
#[serial]
fn unmapped_address_reports_tick() {
    let mut ctx = start_test(file!());
    let trace = VecDeque::from(vec![read_at(0x40, 0)]);
    let mut system = create_system(&ctx, &cxl_only_config(), trace);
    let err = system
        .run_until_complete(&mut ctx, 1, Some(TICK_LIMIT))
        .unwrap_err();
    assert!(err.0.starts_with("Invalid address 0x40"), "{}", err.0);
    assert!(err.0.ends_with("@1"), "{}", err.0);
}

#[test]
#[serial]
#[should_panic(expected = "Deadlock")]
fn missing_requests_deadlock() {
    let mut ctx = start_test(file!());
    let trace = VecDeque::from(vec![read_at(DEVICE0_BASE, 0)]);
    let mut system = create_system(&ctx, &cxl_only_config(), trace);
    system.run_until_complete(&mut ctx, 2, Some(50_000)).unwrap();
}

#[test]
#[serial]
fn two_devices_need_a_switch() {
    let ctx = start_test(file!());
    let config = SystemConfig {
        num_devices: 2,
        device_intervals: vec![(DEVICE0_BASE, DEVICE0_BASE + 0x1000), (0x1000, 0x2000)],
        ..cxl_only_config()
    };
    let err = System::new(&ctx, &config, Box::new(VecDeque::<TraceEntry>::new()))
        .err()
        .unwrap();
    assert_eq!(err.0, "2 devices need a switch");
}
