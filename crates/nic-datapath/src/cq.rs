//! Completion ring consumption.
//!
//! Hardware writes completion entries in ring order, toggling the color bit
//! every pass so the consumer can tell fresh entries from stale ones without
//! a produced-count register. The consumer expects `done_color` and flips
//! its expectation when its cursor wraps.

use nic_wire::comp::{color_match, set_color};
use nic_wire::COMP_SIZE_HWSTAMP;

#[derive(Debug)]
pub struct CompQueue {
    num_descs: u16,
    entry_size: usize,
    entries: Vec<Vec<u8>>,
    tail_idx: u16,
    done_color: bool,
    // Device-side cursor, used by harnesses playing hardware.
    hw_head: u16,
    hw_color: bool,
}

impl CompQueue {
    /// `num_descs` must be a power of two and match the paired descriptor
    /// ring; `entry_size` is [`nic_wire::COMP_SIZE`] or
    /// [`nic_wire::COMP_SIZE_HWSTAMP`] for timestamping queues.
    pub fn new(num_descs: u16, entry_size: usize) -> Self {
        assert!(num_descs.is_power_of_two(), "cq size must be a power of two");
        assert!(entry_size <= COMP_SIZE_HWSTAMP);
        CompQueue {
            num_descs,
            entry_size,
            entries: vec![vec![0u8; entry_size]; num_descs as usize],
            tail_idx: 0,
            done_color: true,
            hw_head: 0,
            hw_color: true,
        }
    }

    pub fn entry_size(&self) -> usize {
        self.entry_size
    }

    pub fn tail_idx(&self) -> u16 {
        self.tail_idx
    }

    /// Drains ready entries in order, up to `budget`. The handler sees a
    /// copy of each entry and returns whether it consumed it; a `false`
    /// (out-of-order completion index, empty descriptor ring) stops the
    /// drain without advancing past the entry.
    pub fn service<F>(&mut self, budget: usize, mut handler: F) -> usize
    where
        F: FnMut(&[u8]) -> bool,
    {
        let mut work_done = 0;
        let mut scratch = [0u8; COMP_SIZE_HWSTAMP];
        while work_done < budget {
            let entry = &self.entries[self.tail_idx as usize];
            if !color_match(entry, self.done_color) {
                break;
            }
            let copy = &mut scratch[..self.entry_size];
            copy.copy_from_slice(entry);
            if !handler(copy) {
                break;
            }
            if self.tail_idx == self.num_descs - 1 {
                self.done_color = !self.done_color;
            }
            self.tail_idx = (self.tail_idx + 1) & (self.num_descs - 1);
            work_done += 1;
        }
        work_done
    }

    /// Teardown companion: clears every entry and returns both cursors to
    /// generation zero, so a reopened queue starts fresh.
    pub fn reset(&mut self) {
        for entry in &mut self.entries {
            entry.fill(0);
        }
        self.tail_idx = 0;
        self.done_color = true;
        self.hw_head = 0;
        self.hw_color = true;
    }

    /// Device-side deposit of one completion: writes the entry at the
    /// hardware cursor with the current generation's color.
    pub fn hw_post(&mut self, entry: &[u8]) {
        assert_eq!(entry.len(), self.entry_size);
        let slot = &mut self.entries[self.hw_head as usize];
        slot.copy_from_slice(entry);
        set_color(slot, self.hw_color);
        if self.hw_head == self.num_descs - 1 {
            self.hw_color = !self.hw_color;
        }
        self.hw_head = (self.hw_head + 1) & (self.num_descs - 1);
    }
}
