// Copyright (c) 2023 Graphcore Ltd. All rights reserved.

use cxl_protocols::flit::{Flit, Slot, SlotKind};
use cxl_protocols::message::{Message, Opcode};
use itertools::Itertools;

fn slot_for(kind: SlotKind, id: u64) -> Slot {
    let msg = |op| Message::new(id, op, 0x1000 + id * 0x40);
    match kind {
        SlotKind::M2sReq => Slot::header(msg(Opcode::Req)),
        SlotKind::M2sRwdHdr => Slot::header(msg(Opcode::RwD)),
        SlotKind::S2mNdr => Slot::header(msg(Opcode::Ndr)),
        SlotKind::S2mDrsHdr => Slot::header(msg(Opcode::Drs)),
        SlotKind::Data => Slot::data(&msg(Opcode::RwD)),
        SlotKind::Empty => Slot::empty(),
    }
}

/// Every assignment of kinds to the four slots is accepted exactly when it
/// respects the per-kind limits.
#[test]
fn slot_count_limits() {
    let kinds = [
        SlotKind::M2sReq,
        SlotKind::M2sRwdHdr,
        SlotKind::S2mNdr,
        SlotKind::S2mDrsHdr,
        SlotKind::Data,
        SlotKind::Empty,
    ];

    for assignment in std::iter::repeat_n(kinds.iter(), 4).multi_cartesian_product() {
        let mut flit = Flit::new();
        for (i, kind) in assignment.iter().enumerate() {
            flit.set_slot(i, slot_for(**kind, i as u64));
        }

        let count = |k| assignment.iter().filter(|kind| ***kind == k).count();
        let expect_ok = count(SlotKind::M2sReq) <= 2
            && count(SlotKind::S2mNdr) <= 2
            && count(SlotKind::M2sRwdHdr) + count(SlotKind::S2mDrsHdr) <= 1;

        assert_eq!(
            flit.check_slot_counts().is_ok(),
            expect_ok,
            "unexpected result for {assignment:?}"
        );
        assert_eq!(flit.is_full(), count(SlotKind::Empty) == 0);
        assert_eq!(flit.is_empty(), count(SlotKind::Empty) == 4);
    }
}

#[test]
fn response_keeps_identity_through_flit() {
    let mut req = Message::new(12, Opcode::Req, 0xb00_0000_0000_0040);
    req.timing.created = 100;
    let mut flit = Flit::new();
    flit.set_slot(0, Slot::header(req.to_response().unwrap()));

    let carried = flit.slot(0).message().unwrap();
    assert_eq!(flit.slot(0).kind(), SlotKind::S2mDrsHdr);
    assert_eq!(carried.msg_id, 12);
    assert_eq!(carried.timing.created, 100);
}
