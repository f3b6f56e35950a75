// Copyright (c) 2023 Graphcore Ltd. All rights reserved.

//! A CXL switch joining one host to several devices.
//!
//! Flits travel through a chain of buffers. Each hop waits for the flit to
//! have been resident for the port or NoC delay, measured from its
//! `received` tick, which every hop re-stamps:
//!
//! ```text
//!  host bus -> upstream_rx -> arb_h2d -> downstream_tx[d] -> device bus d
//!  device bus d -> downstream_rx[d] -> arb_d2h -> upstream_tx -> host bus
//! ```
//!
//! The downstream receive ports are polled round-robin. Once a DRS header
//! has been forwarded the switch stays on that port until all of its data has
//! followed, so that data is never interleaved between devices.

use std::rc::Rc;

use cxl_components::buffer::Buffer;
use cxl_components::bus::Bus;
use cxl_engine::context::SimContext;
use cxl_engine::params::LinkTiming;
use cxl_engine::sim_error;
use cxl_engine::types::{SimError, SimResult, Tick};
use cxl_protocols::flit::{Flit, SlotKind};
use cxl_protocols::timing::Stage;
use cxl_track::entity::{Entity, GetEntity};
use cxl_track::{debug, trace};
use serde::{Deserialize, Serialize};

use crate::memory::memory_map::{DeviceId, MemoryMap};
use crate::system::BusLink;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SwitchConfig {
    /// Flits in each switch buffer.
    pub buffer_size: usize,
}

impl Default for SwitchConfig {
    fn default() -> Self {
        Self { buffer_size: 4096 }
    }
}

/// The buffers and bus of one downstream port.
struct DownstreamPort {
    tx: Buffer<Flit>,
    rx: Buffer<Flit>,
    to_device: usize,
    last_tx: Tick,
}

pub struct Switch {
    pub entity: Rc<Entity>,
    timing: LinkTiming,
    buffer_size: usize,
    map: MemoryMap,

    upstream_rx: Buffer<Flit>,
    upstream_tx: Buffer<Flit>,
    to_host: Option<usize>,
    last_tx: Tick,

    arb_h2d: Buffer<Flit>,
    arb_d2h: Buffer<Flit>,
    ports: Vec<DownstreamPort>,

    previous_destination: usize,
    curr_port: usize,
    expected_rollover: i64,
    skip_flag: bool,
    num_forwarded: u64,
}

/// Take the head of `from` once it has been resident for `delay`.
///
/// Clears `all_empty` if `from` holds anything.
fn take_due(
    from: &mut Buffer<Flit>,
    now: Tick,
    delay: Tick,
    all_empty: &mut bool,
) -> Result<Option<Flit>, SimError> {
    *all_empty &= from.is_empty();
    if !from.head_resident_for(now, delay, |f| f.timing.received) {
        return Ok(None);
    }
    let mut flit = from.dequeue()?;
    flit.timing.received = now;
    Ok(Some(flit))
}

impl Switch {
    #[must_use]
    pub fn new(parent: &Rc<Entity>, config: &SwitchConfig, timing: &LinkTiming) -> Self {
        Self {
            entity: Rc::new(Entity::new(parent, "switch")),
            timing: timing.clone(),
            buffer_size: config.buffer_size,
            map: MemoryMap::new(),
            upstream_rx: Buffer::new(config.buffer_size),
            upstream_tx: Buffer::new(config.buffer_size),
            to_host: None,
            last_tx: 0,
            arb_h2d: Buffer::new(config.buffer_size),
            arb_d2h: Buffer::new(config.buffer_size),
            ports: Vec::new(),
            previous_destination: 0,
            curr_port: 0,
            expected_rollover: 0,
            skip_flag: false,
            num_forwarded: 0,
        }
    }

    /// Send flits for the host on bus `to_host`.
    pub fn connect_upstream(&mut self, to_host: usize) {
        self.to_host = Some(to_host);
    }

    /// Add the next downstream port. Flits for addresses in the half-open
    /// `interval` are sent on bus `to_device`.
    pub fn connect_downstream(
        &mut self,
        device: DeviceId,
        to_device: usize,
        interval: (u64, u64),
    ) -> SimResult {
        if device.0 != self.ports.len() {
            return sim_error!(
                "{}: {} connected out of order (expected device{})",
                self.entity,
                device,
                self.ports.len()
            );
        }
        self.map.insert_interval(interval.0, interval.1, device)?;
        self.ports.push(DownstreamPort {
            tx: Buffer::new(self.buffer_size),
            rx: Buffer::new(self.buffer_size),
            to_device,
            last_tx: 0,
        });
        Ok(())
    }

    #[must_use]
    pub fn num_devices(&self) -> usize {
        self.ports.len()
    }

    #[must_use]
    pub fn curr_port(&self) -> usize {
        self.curr_port
    }

    #[must_use]
    pub fn expected_rollover(&self) -> i64 {
        self.expected_rollover
    }

    /// Flits forwarded towards the host.
    #[must_use]
    pub fn num_forwarded(&self) -> u64 {
        self.num_forwarded
    }

    pub fn upstream_rx_mut(&mut self) -> &mut Buffer<Flit> {
        &mut self.upstream_rx
    }

    pub fn downstream_rx_mut(&mut self, device: usize) -> Result<&mut Buffer<Flit>, SimError> {
        match self.ports.get_mut(device) {
            Some(port) => Ok(&mut port.rx),
            None => sim_error!("{}: no downstream port {}", self.entity, device),
        }
    }

    fn all_rx_empty(&self) -> bool {
        self.upstream_rx.is_empty() && self.ports.iter().all(|p| p.rx.is_empty())
    }

    fn can_transmit(&self, last_tx: Tick, bus: &Bus, now: Tick) -> bool {
        !bus.is_full() && now - last_tx >= self.timing.ticks_per_dequeue
    }

    fn update_rollover(&mut self, flit: &Flit) {
        for slot in flit.slots() {
            match slot.kind() {
                SlotKind::S2mDrsHdr => self.expected_rollover += 4,
                SlotKind::Data => self.expected_rollover -= 1,
                _ => {}
            }
        }
    }

    /// Move to the next port unless data is still owed on the current one.
    fn update_port(&mut self) {
        if self.expected_rollover == 0 {
            self.curr_port = if self.curr_port + 1 < self.ports.len() {
                self.curr_port + 1
            } else {
                0
            };
        }
    }

    fn bus<'a>(&self, buses: &'a mut [BusLink], index: usize) -> Result<&'a mut Bus, SimError> {
        match buses.get_mut(index) {
            Some(link) => Ok(&mut link.bus),
            None => sim_error!("{}: no bus {}", self.entity, index),
        }
    }

    /// Advance the switch by one tick.
    pub fn update(&mut self, ctx: &SimContext, buses: &mut [BusLink]) -> SimResult {
        if ctx.skip_cycle && self.skip_flag && self.all_rx_empty() {
            return Ok(());
        }
        let now = ctx.now();
        let port_delay = self.timing.delay_port_switch;
        let noc_delay = self.timing.delay_noc_switch;
        let mut all_empty = true;

        // Host to device
        if let Some(flit) = take_due(&mut self.upstream_rx, now, port_delay, &mut all_empty)? {
            self.arb_h2d.enqueue(flit)?;
        }

        if let Some(flit) = take_due(&mut self.arb_h2d, now, noc_delay, &mut all_empty)? {
            let dest = if flit.slot(0).kind() == SlotKind::Data {
                self.previous_destination
            } else {
                let Some(address) = flit.first_address() else {
                    return sim_error!("{}: empty flit #{} from host", self.entity, flit.flit_id);
                };
                self.map.device_for(address)?.0
            };
            self.previous_destination = dest;
            let Some(port) = self.ports.get_mut(dest) else {
                return sim_error!("{}: no downstream port {}", self.entity, dest);
            };
            trace!(self.entity ; "route {} to port {}", flit, dest);
            port.tx.enqueue(flit)?;
        }

        for d in 0..self.ports.len() {
            let port = &self.ports[d];
            all_empty &= port.tx.is_empty();
            let ready = port
                .tx
                .head_resident_for(now, port_delay, |f| f.timing.received);
            let bus_index = port.to_device;
            let last_tx = port.last_tx;
            if !ready || !self.can_transmit(last_tx, self.bus(buses, bus_index)?, now) {
                continue;
            }
            let port = &mut self.ports[d];
            let mut flit = port.tx.dequeue()?;
            port.last_tx = now;
            flit.timing.transmitted = now;
            flit.set_time(Stage::SwitchDsTx, now);
            self.bus(buses, bus_index)?.add(flit, now)?;
        }

        // Device to host
        for _ in 0..self.ports.len() {
            let curr = self.curr_port;
            let moved = take_due(&mut self.ports[curr].rx, now, port_delay, &mut all_empty)?;
            if let Some(flit) = moved {
                self.update_rollover(&flit);
                debug!(self.entity ; "port {} forwards {} (rollover {})", curr, flit, self.expected_rollover);
                self.arb_d2h.enqueue(flit)?;
                self.num_forwarded += 1;
                self.update_port();
                break;
            }
            self.update_port();
        }

        if let Some(flit) = take_due(&mut self.arb_d2h, now, noc_delay, &mut all_empty)? {
            self.upstream_tx.enqueue(flit)?;
        }

        all_empty &= self.upstream_tx.is_empty();
        let ready = self
            .upstream_tx
            .head_resident_for(now, port_delay, |f| f.timing.received);
        if ready {
            let Some(to_host) = self.to_host else {
                return sim_error!("{}: not connected to a host", self.entity);
            };
            if self.can_transmit(self.last_tx, self.bus(buses, to_host)?, now) {
                let mut flit = self.upstream_tx.dequeue()?;
                self.last_tx = now;
                flit.timing.transmitted = now;
                flit.set_time(Stage::SwitchUsTx, now);
                self.bus(buses, to_host)?.add(flit, now)?;
            }
        }

        self.skip_flag = all_empty;
        Ok(())
    }
}

impl GetEntity for Switch {
    fn entity(&self) -> &Rc<Entity> {
        &self.entity
    }
}

#[cfg(test)]
mod tests {
    use cxl_components::bus::BusRole;
    use cxl_engine::test_helpers::start_test;
    use cxl_protocols::flit::Slot;
    use cxl_protocols::message::{Message, Opcode};

    use super::*;
    use crate::system::BufferRef;

    fn switch_with_two_ports(ctx: &SimContext) -> (Switch, Vec<BusLink>) {
        let timing = ctx.timing();
        let mut switch = Switch::new(ctx.top(), &SwitchConfig::default(), timing);
        let mut buses = Vec::new();
        for (i, role) in [BusRole::SwitchHost, BusRole::SwitchDevice, BusRole::SwitchDevice]
            .into_iter()
            .enumerate()
        {
            buses.push(BusLink::new(
                Bus::new(ctx.top(), &format!("bus{i}"), role, timing),
                BufferRef::NodeRx(i),
            ));
        }
        switch.connect_upstream(0);
        switch.connect_downstream(DeviceId(0), 1, (0, 0x1000)).unwrap();
        switch.connect_downstream(DeviceId(1), 2, (0x1000, 0x2000)).unwrap();
        (switch, buses)
    }

    fn flit(slots: Vec<Slot>, received: Tick) -> Flit {
        let mut flit = Flit::new();
        for (i, slot) in slots.into_iter().enumerate() {
            flit.set_slot(i, slot);
        }
        flit.timing.received = received;
        flit
    }

    #[test]
    fn routes_by_address() {
        let mut ctx = start_test(file!());
        let (mut switch, mut buses) = switch_with_two_ports(&ctx);
        let req = Message::new(1, Opcode::Req, 0x1040);
        switch
            .upstream_rx_mut()
            .enqueue(flit(vec![Slot::header(req)], 0))
            .unwrap();

        let port = ctx.timing().delay_port_switch;
        let noc = ctx.timing().delay_noc_switch;
        let expected = 2 * port + noc;
        while ctx.now() <= expected {
            switch.update(&ctx, &mut buses).unwrap();
            ctx.advance();
        }
        assert!(buses[1].bus.is_empty());
        assert_eq!(buses[2].bus.len(), 1);
    }

    #[test]
    #[should_panic(expected = "Invalid address")]
    fn unmapped_address_is_fatal() {
        let mut ctx = start_test(file!());
        let (mut switch, mut buses) = switch_with_two_ports(&ctx);
        let req = Message::new(1, Opcode::Req, 0x9000);
        switch
            .upstream_rx_mut()
            .enqueue(flit(vec![Slot::header(req)], 0))
            .unwrap();
        for _ in 0..1000 {
            switch.update(&ctx, &mut buses).unwrap();
            ctx.advance();
        }
    }

    #[test]
    fn port_held_while_data_is_owed() {
        let mut ctx = start_test(file!());
        let (mut switch, mut buses) = switch_with_two_ports(&ctx);
        let drs = Message::new(1, Opcode::Drs, 0x40);
        let ndr = Message::new(2, Opcode::Ndr, 0x1040);
        switch
            .downstream_rx_mut(0)
            .unwrap()
            .enqueue(flit(
                vec![
                    Slot::header(drs.clone()),
                    Slot::data(&drs),
                    Slot::data(&drs),
                    Slot::data(&drs),
                ],
                0,
            ))
            .unwrap();
        switch
            .downstream_rx_mut(1)
            .unwrap()
            .enqueue(flit(vec![Slot::header(ndr)], 0))
            .unwrap();

        let port = ctx.timing().delay_port_switch;
        ctx.advance_to(port).unwrap();
        switch.update(&ctx, &mut buses).unwrap();
        assert_eq!(switch.expected_rollover(), 1);
        assert_eq!(switch.curr_port(), 0);

        // Port 0 owes one data slot so port 1 is not served
        ctx.advance();
        switch.update(&ctx, &mut buses).unwrap();
        assert_eq!(switch.num_forwarded(), 1);

        switch
            .downstream_rx_mut(0)
            .unwrap()
            .enqueue(flit(vec![Slot::data(&drs)], ctx.now()))
            .unwrap();
        ctx.advance_to(ctx.now() + port).unwrap();
        switch.update(&ctx, &mut buses).unwrap();
        assert_eq!(switch.expected_rollover(), 0);
        assert_eq!(switch.curr_port(), 1);
        assert_eq!(switch.num_forwarded(), 2);

        ctx.advance();
        switch.update(&ctx, &mut buses).unwrap();
        assert_eq!(switch.num_forwarded(), 3);
    }

    #[test]
    fn continuation_flit_goes_up_before_next_port() {
        let mut ctx = start_test(file!());
        let (mut switch, mut buses) = switch_with_two_ports(&ctx);
        buses[0].bus.set_record_history(true);
        let drs = Message::new(1, Opcode::Drs, 0x80);
        let ndr = Message::new(2, Opcode::Ndr, 0x1080);

        let mut header = flit(vec![Slot::header(drs.clone())], 0);
        header.flit_id = 10;
        let mut competing = flit(vec![Slot::header(ndr)], 0);
        competing.flit_id = 20;
        switch.downstream_rx_mut(0).unwrap().enqueue(header).unwrap();
        switch.downstream_rx_mut(1).unwrap().enqueue(competing).unwrap();

        let port = ctx.timing().delay_port_switch;
        ctx.advance_to(port).unwrap();
        switch.update(&ctx, &mut buses).unwrap();
        assert_eq!(switch.expected_rollover(), 4);

        // Port 1 is ready all along but port 0 owes four data slots
        for _ in 0..(3 * port).max(10) {
            ctx.advance();
            switch.update(&ctx, &mut buses).unwrap();
            assert_eq!(switch.curr_port(), 0);
            assert_eq!(switch.expected_rollover(), 4);
        }
        assert_eq!(switch.num_forwarded(), 1);

        let mut data = flit(
            vec![
                Slot::data(&drs),
                Slot::data(&drs),
                Slot::data(&drs),
                Slot::data(&drs),
            ],
            ctx.now(),
        );
        data.flit_id = 11;
        switch.downstream_rx_mut(0).unwrap().enqueue(data).unwrap();
        ctx.advance_to(ctx.now() + port).unwrap();
        switch.update(&ctx, &mut buses).unwrap();
        assert_eq!(switch.expected_rollover(), 0);
        assert_eq!(switch.curr_port(), 1);
        assert_eq!(switch.num_forwarded(), 2);

        let limit = ctx.now() + 10_000;
        while buses[0].bus.len() < 3 {
            ctx.advance();
            switch.update(&ctx, &mut buses).unwrap();
            assert!(ctx.now() < limit, "flits did not reach the host bus");
        }
        let added = |id: u64| buses[0].bus.records()[&id].added;
        assert!(added(10) < added(11));
        assert!(added(11) < added(20));
    }
}
