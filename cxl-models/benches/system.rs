// Copyright (c) 2023 Graphcore Ltd. All rights reserved.

use std::collections::VecDeque;
use std::hint::black_box;

use criterion::{BatchSize, Criterion, criterion_group, criterion_main};
use cxl_engine::context::SimContext;
use cxl_engine::params::CxlParams;
use cxl_models::system::{System, SystemConfig};
use cxl_models::test_helpers::{DEVICE0_BASE, cxl_only_config, switched_config};
use cxl_models::trace::TraceEntry;
use cxl_protocols::message::Opcode;
use cxl_track::tracker::dev_null_tracker;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

const NUM_ACCESSES: usize = 2000;

fn create_context(skip_cycle: bool) -> SimContext {
    // Create a context without the tracker system opening files for logging
    let tracker = dev_null_tracker();
    let mut ctx = SimContext::new(&tracker, &CxlParams::default()).unwrap();
    ctx.skip_cycle = skip_cycle;
    ctx
}

/// Random cache-line accesses spread over `num_devices` 1TB ranges, a third
/// of them writes, with short random gaps.
fn random_trace(num_devices: u64) -> VecDeque<TraceEntry> {
    let mut rng = StdRng::seed_from_u64(0x5eed);
    (0..NUM_ACCESSES)
        .map(|_| {
            let device = rng.gen_range(0..num_devices);
            let line: u64 = rng.gen_range(0..1 << 20);
            TraceEntry {
                address: DEVICE0_BASE + (device << 40) + line * 64,
                opcode: if rng.gen_ratio(1, 3) {
                    Opcode::RwD
                } else {
                    Opcode::Req
                },
                gap: rng.gen_range(0..20),
            }
        })
        .collect()
}

fn setup(config: &SystemConfig, skip_cycle: bool) -> (SimContext, System) {
    let ctx = create_context(skip_cycle);
    let trace = random_trace(config.num_devices as u64);
    let system = System::new(&ctx, config, Box::new(trace)).unwrap();
    (ctx, system)
}

fn run_system(args: (SimContext, System)) {
    let (mut ctx, mut system) = args;
    system
        .run_until_complete(&mut ctx, NUM_ACCESSES as u64, None)
        .unwrap();
    black_box(ctx.now());
}

fn bench_single_device(c: &mut Criterion) {
    let config = cxl_only_config();
    let mut group = c.benchmark_group("single_device");
    group.sample_size(10);
    for skip_cycle in [true, false] {
        group.bench_function(format!("skip_cycle={skip_cycle}"), |b| {
            b.iter_batched(|| setup(&config, skip_cycle), run_system, BatchSize::SmallInput);
        });
    }
    group.finish();
}

fn bench_switched(c: &mut Criterion) {
    let config = switched_config(4);
    let mut group = c.benchmark_group("switched");
    group.sample_size(10);
    group.bench_function("four_devices", |b| {
        b.iter_batched(|| setup(&config, true), run_system, BatchSize::SmallInput);
    });
    group.finish();
}

criterion_group!(benches, bench_single_device, bench_switched);
criterion_main!(benches);
