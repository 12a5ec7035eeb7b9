//! Descriptor ring bookkeeping shared by the TX and RX paths.
//!
//! A ring is a power-of-two array of fixed-size descriptor slots with
//! producer (`head_idx`) and consumer (`tail_idx`) cursors. One slot is
//! always kept unused so that `head == tail` means empty, never full.
//! Each slot owns a companion scatter-gather descriptor and a [`DescInfo`]
//! holding the host-side state (mapped buffers, byte counts, and the
//! direction-specific `pending` payload) needed to clean the slot later.

use nic_wire::{doorbell_val, DESC_SIZE, SG_DESC_SIZE};

use crate::dev::{DoorbellPage, QueueKind};
use crate::page::BufInfo;
use crate::{RX_MAX_DOORBELL_DEADLINE, RX_MIN_DOORBELL_DEADLINE, TX_DOORBELL_DEADLINE};

/// Host-side state for one descriptor slot.
#[derive(Debug)]
pub struct DescInfo<P> {
    pub bufs: Vec<BufInfo>,
    pub nbufs: usize,
    pub bytes: u64,
    pub pending: P,
}

#[derive(Debug)]
pub struct Ring<P> {
    num_descs: u16,
    pub(crate) head_idx: u16,
    pub(crate) tail_idx: u16,
    descs: Vec<[u8; DESC_SIZE]>,
    sg_descs: Vec<[u8; SG_DESC_SIZE]>,
    pub(crate) info: Vec<DescInfo<P>>,
    qid: u32,
    kind: QueueKind,
    dbell_deadline: u64,
    dbell_last: u64,
}

impl<P: Default> Ring<P> {
    /// `num_descs` must be a power of two; `bufs_per_desc` sizes the
    /// per-slot buffer array (main buffer plus scatter-gather elements).
    pub fn new(qid: u32, kind: QueueKind, num_descs: u16, bufs_per_desc: usize) -> Self {
        assert!(num_descs.is_power_of_two(), "ring size must be a power of two");
        let info = (0..num_descs)
            .map(|_| DescInfo {
                bufs: vec![BufInfo::default(); bufs_per_desc],
                nbufs: 0,
                bytes: 0,
                pending: P::default(),
            })
            .collect();
        Ring {
            num_descs,
            head_idx: 0,
            tail_idx: 0,
            descs: vec![[0u8; DESC_SIZE]; num_descs as usize],
            sg_descs: vec![[0u8; SG_DESC_SIZE]; num_descs as usize],
            info,
            qid,
            kind,
            dbell_deadline: match kind {
                QueueKind::Tx => TX_DOORBELL_DEADLINE,
                QueueKind::Rx => RX_MIN_DOORBELL_DEADLINE,
            },
            dbell_last: 0,
        }
    }
}

impl<P> Ring<P> {
    pub fn num_descs(&self) -> u16 {
        self.num_descs
    }

    fn mask(&self) -> u16 {
        self.num_descs - 1
    }

    pub fn head_idx(&self) -> u16 {
        self.head_idx
    }

    pub fn tail_idx(&self) -> u16 {
        self.tail_idx
    }

    pub fn is_empty(&self) -> bool {
        self.head_idx == self.tail_idx
    }

    /// Free slots. One slot stays reserved to disambiguate full from empty.
    pub fn space_avail(&self) -> u16 {
        let used = self.head_idx.wrapping_sub(self.tail_idx) & self.mask();
        self.num_descs - 1 - used
    }

    pub fn has_space(&self, want: u16) -> bool {
        self.space_avail() >= want
    }

    pub fn desc_mut(&mut self, idx: u16) -> &mut [u8; DESC_SIZE] {
        &mut self.descs[idx as usize]
    }

    pub fn sg_desc_mut(&mut self, idx: u16) -> &mut [u8; SG_DESC_SIZE] {
        &mut self.sg_descs[idx as usize]
    }

    pub fn desc(&self, idx: u16) -> &[u8; DESC_SIZE] {
        &self.descs[idx as usize]
    }

    pub fn sg_desc(&self, idx: u16) -> &[u8; SG_DESC_SIZE] {
        &self.sg_descs[idx as usize]
    }

    pub fn info_mut(&mut self, idx: u16) -> &mut DescInfo<P> {
        &mut self.info[idx as usize]
    }

    /// Publishes the descriptor at the head: advances the producer cursor
    /// and optionally rings the doorbell with the new head. Callers must
    /// have checked for space.
    pub fn post(&mut self, ring_dbell: bool, dbell: &mut dyn DoorbellPage, now: u64) {
        debug_assert!(self.space_avail() > 0, "post on a full ring");
        self.head_idx = (self.head_idx + 1) & self.mask();
        if ring_dbell {
            self.ring_doorbell(dbell, now);
        }
    }

    /// Rings the doorbell with the current head unconditionally.
    pub fn ring_doorbell(&mut self, dbell: &mut dyn DoorbellPage, now: u64) {
        dbell.ring(self.kind, doorbell_val(self.qid, self.head_idx));
        self.dbell_last = now;
    }

    pub fn advance_tail(&mut self) {
        self.tail_idx = (self.tail_idx + 1) & self.mask();
    }

    /// Missed-doorbell recovery for TX: re-rings with the current head if
    /// the debounce window has passed. Returns whether descriptors are
    /// still outstanding (so the caller knows to keep polling).
    pub fn tx_poke_doorbell(&mut self, dbell: &mut dyn DoorbellPage, now: u64) -> bool {
        if self.is_empty() {
            return false;
        }
        if now.wrapping_sub(self.dbell_last) > self.dbell_deadline {
            self.ring_doorbell(dbell, now);
        }
        true
    }

    /// RX flavor of [`Self::tx_poke_doorbell`]: each poked ring doubles the
    /// debounce window (capped) so an idle queue stops re-ringing; a
    /// backlog-driven refill resets it via [`Self::reset_rx_deadline`].
    pub fn rx_poke_doorbell(&mut self, dbell: &mut dyn DoorbellPage, now: u64) -> bool {
        if self.is_empty() {
            return false;
        }
        if now.wrapping_sub(self.dbell_last) > self.dbell_deadline {
            self.ring_doorbell(dbell, now);
            self.dbell_deadline = (2 * self.dbell_deadline).min(RX_MAX_DOORBELL_DEADLINE);
        }
        true
    }

    pub fn reset_rx_deadline(&mut self, now: u64) {
        self.dbell_deadline = RX_MIN_DOORBELL_DEADLINE;
        self.dbell_last = now;
    }
}
