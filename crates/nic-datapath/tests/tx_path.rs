//! End-to-end TX behavior for the non-TSO paths: descriptor encoding,
//! doorbells, completion reclaim, and the timestamping queue.

mod common;

use common::{RecordingEvents, TxHarness};
use nic_datapath::dev::{MemDmaDevice, NullDoorbell, QueueKind, RecordingDoorbell};
use nic_datapath::pkt::{CsumRequest, NetBuffer};
use nic_datapath::tx::{TxQueue, TxQueueConfig};
use nic_wire::txq::{SgElem, TxDesc, TxDescMeta, TxFlags, TxOpcode};
use nic_wire::{doorbell_val, SG_ELEM_SIZE};

fn pkt(head: usize, frags: &[usize]) -> NetBuffer {
    let mut pkt = NetBuffer::new(vec![0u8; head]);
    for &len in frags {
        pkt.push_frag(vec![0u8; len]);
    }
    pkt
}

/// A plain send encodes one descriptor, rings the doorbell with the new
/// head, and reports the bytes to the event sink.
#[test]
fn xmit_encodes_descriptor_and_rings() {
    let mut txq = common::tx_queue(16);
    let mut dev = MemDmaDevice::new();
    let mut dbell = RecordingDoorbell::default();
    let mut events = RecordingEvents::default();

    let outcome = txq.submit(pkt(60, &[]), &mut dev, &mut dbell, &mut events, 0);
    assert!(!outcome.is_busy());

    let desc = TxDesc::from_bytes(txq.ring().desc(0)).unwrap();
    assert_eq!(desc.opcode, TxOpcode::CsumNone);
    assert_eq!(desc.len, 60);
    assert_eq!(desc.nsge, 0);
    assert_eq!(desc.meta, TxDescMeta::None);

    assert_eq!(dbell.rings, vec![(QueueKind::Tx, doorbell_val(0, 1))]);
    assert_eq!(events.sent, vec![60]);
    assert_eq!(txq.stats().pkts, 1);
    assert_eq!(txq.stats().bytes, 60);
    assert_eq!(txq.stats().csum_none, 1);
}

/// Partial-checksum requests and VLAN tags land in the descriptor fields.
#[test]
fn csum_partial_and_vlan_encoded() {
    let mut txq = common::tx_queue(16);
    let mut dev = MemDmaDevice::new();
    let mut dbell = NullDoorbell;
    let mut events = RecordingEvents::default();

    let mut p = pkt(100, &[]);
    p.csum = CsumRequest::Partial {
        start: 34,
        offset: 16,
    };
    p.vlan_tci = Some(100);
    txq.submit(p, &mut dev, &mut dbell, &mut events, 0);

    let desc = TxDesc::from_bytes(txq.ring().desc(0)).unwrap();
    assert_eq!(desc.opcode, TxOpcode::CsumPartial);
    assert_eq!(
        desc.meta,
        TxDescMeta::Csum {
            start: 34,
            offset: 16
        }
    );
    assert!(desc.flags.contains(TxFlags::VLAN));
    assert_eq!(desc.vlan_tci, 100);
    assert_eq!(txq.stats().csum, 1);
    assert_eq!(txq.stats().vlan_inserted, 1);
}

/// Fragments map individually and become scatter-gather elements after the
/// main descriptor.
#[test]
fn frags_become_sg_elems() {
    let mut txq = common::tx_queue(16);
    let mut dev = MemDmaDevice::new();
    let mut dbell = NullDoorbell;
    let mut events = RecordingEvents::default();

    txq.submit(pkt(64, &[100, 200]), &mut dev, &mut dbell, &mut events, 0);

    let desc = TxDesc::from_bytes(txq.ring().desc(0)).unwrap();
    assert_eq!(desc.nsge, 2);
    assert_eq!(desc.len, 64);

    let sg = txq.ring().sg_desc(0);
    assert_eq!(SgElem::from_bytes(&sg[..SG_ELEM_SIZE]).len, 100);
    assert_eq!(SgElem::from_bytes(&sg[SG_ELEM_SIZE..2 * SG_ELEM_SIZE]).len, 200);

    assert_eq!(txq.stats().frags, 2);
    assert_eq!(dev.outstanding_host_maps(), 3);
}

/// One completion reclaims every descriptor through its completion index;
/// the sink hears one aggregate report.
#[test]
fn completion_reclaims_through_its_index() {
    let mut txq = common::tx_queue(16);
    let mut dev = MemDmaDevice::new();
    let mut dbell = NullDoorbell;
    let mut events = RecordingEvents::default();
    let mut hw = TxHarness::new();

    for len in [100u64, 200, 300] {
        txq.submit(pkt(len as usize, &[]), &mut dev, &mut dbell, &mut events, 0);
    }
    assert_eq!(dev.outstanding_host_maps(), 3);

    hw.complete(&mut txq, 3);
    assert_eq!(txq.service(64, &mut dev, &mut events), 1);

    assert_eq!(events.completed, vec![(3, 600)]);
    assert_eq!(txq.stats().clean, 3);
    assert_eq!(dev.outstanding_host_maps(), 0);
    assert!(txq.ring().is_empty());
}

/// Teardown reclaims descriptors the hardware never completed.
#[test]
fn empty_reclaims_unfinished_sends() {
    let mut txq = common::tx_queue(16);
    let mut dev = MemDmaDevice::new();
    let mut dbell = NullDoorbell;
    let mut events = RecordingEvents::default();

    txq.submit(pkt(100, &[50]), &mut dev, &mut dbell, &mut events, 0);
    txq.submit(pkt(200, &[]), &mut dev, &mut dbell, &mut events, 0);

    txq.empty(&mut dev, &mut events);
    assert_eq!(events.completed, vec![(2, 350)]);
    assert_eq!(dev.outstanding_host_maps(), 0);
    assert!(txq.ring().is_empty());
    // Teardown leaves no partial state: cursors back at zero.
    assert_eq!(txq.ring().head_idx(), 0);
    assert_eq!(txq.ring().tail_idx(), 0);

    // A reopened queue runs a full cycle from generation zero.
    let mut hw = TxHarness::new();
    txq.submit(pkt(100, &[]), &mut dev, &mut dbell, &mut events, 0);
    hw.complete(&mut txq, 1);
    assert_eq!(txq.service(64, &mut dev, &mut events), 1);
    assert!(txq.ring().is_empty());
    assert_eq!(dev.outstanding_host_maps(), 0);
}

/// The dedicated timestamping queue never stops: overflow drops, and
/// completions surface the hardware stamp instead of occupancy events.
#[test]
fn hwstamp_queue_drops_on_overflow_and_stamps() {
    let mut txq = TxQueue::new(TxQueueConfig {
        queue_index: 0,
        num_descs: 4,
        max_sg_elems: 8,
        hwstamp: true,
    });
    let mut dev = MemDmaDevice::new();
    let mut dbell = NullDoorbell;
    let mut events = RecordingEvents::default();
    let mut hw = TxHarness::new();

    for _ in 0..3 {
        txq.submit_or_drop(pkt(100, &[]), &mut dev, &mut dbell, &mut events, 0);
    }
    // 3 usable slots; the fourth has nowhere to go.
    txq.submit_or_drop(pkt(100, &[]), &mut dev, &mut dbell, &mut events, 0);
    assert_eq!(txq.stats().dropped, 1);
    assert_eq!(txq.stats().stop, 0);
    // No occupancy accounting on the timestamping queue.
    assert!(events.sent.is_empty());
    assert_eq!(events.stopped, 0);

    hw.complete_stamped(&mut txq, 1, Some(77));
    assert_eq!(txq.service(64, &mut dev, &mut events), 1);
    assert_eq!(events.stamps, vec![77]);
    assert_eq!(txq.stats().hwstamp_valid, 1);
}
