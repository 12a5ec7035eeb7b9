//! Property checks on the ring cursor arithmetic and completion-ring color
//! protocol, across arbitrary operation interleavings.

use proptest::prelude::*;

use nic_datapath::cq::CompQueue;
use nic_datapath::dev::{NullDoorbell, QueueKind, RecordingDoorbell};
use nic_datapath::queue::Ring;
use nic_wire::comp::TxCompletion;
use nic_wire::{doorbell_val, COMP_SIZE};

proptest! {
    /// `space_avail`/`is_empty` always agree with a simple occupancy
    /// counter, and occupancy never exceeds `num_descs - 1`.
    #[test]
    fn space_accounting_matches_a_model(ops in prop::collection::vec(any::<bool>(), 1..200)) {
        let mut ring: Ring<()> = Ring::new(0, QueueKind::Tx, 16, 1);
        let mut dbell = NullDoorbell;
        let mut used = 0u16;

        for post in ops {
            if post {
                if ring.space_avail() > 0 {
                    ring.post(false, &mut dbell, 0);
                    used += 1;
                }
            } else if !ring.is_empty() {
                ring.advance_tail();
                used -= 1;
            }
            prop_assert!(used <= 15);
            prop_assert_eq!(ring.space_avail(), 15 - used);
            prop_assert_eq!(ring.is_empty(), used == 0);
        }
    }

    /// Every doorbell ring carries the producer cursor at the time of the
    /// ring, encoded with the queue id.
    #[test]
    fn doorbell_always_carries_the_head(posts in prop::collection::vec(any::<bool>(), 1..100)) {
        let mut ring: Ring<()> = Ring::new(9, QueueKind::Tx, 32, 1);
        let mut dbell = RecordingDoorbell::default();

        for ring_it in posts {
            if ring.space_avail() == 0 {
                ring.advance_tail();
            }
            ring.post(ring_it, &mut dbell, 0);
            if ring_it {
                let &(kind, val) = dbell.rings.last().unwrap();
                prop_assert_eq!(kind, QueueKind::Tx);
                prop_assert_eq!(val, doorbell_val(9, ring.head_idx()));
            }
        }
    }

    /// The color protocol loses nothing and duplicates nothing: posting in
    /// batches and draining with arbitrary budgets yields every completion
    /// index exactly once, in order, across several ring generations.
    #[test]
    fn completion_color_protocol_is_lossless(
        batches in prop::collection::vec(1u16..8, 1..40),
        budget in 1usize..12,
    ) {
        let mut cq = CompQueue::new(8, COMP_SIZE);
        let mut hw_index = 0u16;
        let mut expect = 0u16;

        for batch in batches {
            // Never outrun the consumer: the ring holds 8 entries.
            let batch = batch.min(8);
            for _ in 0..batch {
                let comp = TxCompletion {
                    status: 0,
                    comp_index: hw_index,
                    color: false,
                };
                cq.hw_post(&comp.to_bytes());
                hw_index = hw_index.wrapping_add(1);
            }

            let mut drained = 0u16;
            while drained < batch {
                let n = cq.service(budget, |entry| {
                    let comp = TxCompletion::from_bytes(entry);
                    assert_eq!(comp.comp_index, expect);
                    expect = expect.wrapping_add(1);
                    true
                });
                prop_assert!(n > 0, "drain stalled with entries outstanding");
                drained += n as u16;
            }
            prop_assert_eq!(drained, batch);
            // Nothing stale left behind.
            prop_assert_eq!(cq.service(budget, |_| true), 0);
        }
    }
}
