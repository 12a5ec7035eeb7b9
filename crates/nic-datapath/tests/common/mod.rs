//! Shared harness for the datapath integration tests: frame builders, a
//! software hardware-side that consumes posted descriptors and deposits
//! completions, and recording sinks.
#![allow(dead_code)]

use nic_datapath::dev::{CoalesceObserver, DmaDevice, IntrControl, MemDmaDevice};
use nic_datapath::lif::Features;
use nic_datapath::pkt::TxEventSink;
use nic_datapath::rx::{RxQueue, RxQueueConfig};
use nic_datapath::tx::{TxQueue, TxQueueConfig};
use nic_datapath::RX_COPYBREAK_DEFAULT;
use nic_wire::comp::{PktType, RxCompletion, RxCsumFlags, TxCompletion};
use nic_wire::rxq::{RxDesc, RxOpcode};
use nic_wire::txq::SgElem;
use nic_wire::{COMP_SIZE, COMP_SIZE_HWSTAMP, HWSTAMP_INVALID, SG_ELEM_SIZE};

pub const ETH_IPV4_TCP_HDRS: usize = 14 + 20 + 20;

/// Builds an Ethernet/IPv4/TCP frame of exactly `len` bytes with a
/// recognizable payload pattern.
pub fn tcp_frame(len: usize) -> Vec<u8> {
    assert!(len >= ETH_IPV4_TCP_HDRS);
    let payload_len = len - ETH_IPV4_TCP_HDRS;

    let mut frame = Vec::with_capacity(len);
    frame.extend_from_slice(&[0x00, 0x11, 0x22, 0x33, 0x44, 0x55]);
    frame.extend_from_slice(&[0x66, 0x77, 0x88, 0x99, 0xaa, 0xbb]);
    frame.extend_from_slice(&0x0800u16.to_be_bytes());

    let mut ipv4 = [0u8; 20];
    ipv4[0] = (4 << 4) | 5;
    ipv4[2..4].copy_from_slice(&((20 + 20 + payload_len) as u16).to_be_bytes());
    ipv4[8] = 64;
    ipv4[9] = 6;
    ipv4[12..16].copy_from_slice(&[10, 0, 0, 1]);
    ipv4[16..20].copy_from_slice(&[10, 0, 0, 2]);
    frame.extend_from_slice(&ipv4);

    let mut tcp = [0u8; 20];
    tcp[0..2].copy_from_slice(&1000u16.to_be_bytes());
    tcp[2..4].copy_from_slice(&2000u16.to_be_bytes());
    tcp[12] = 5u8 << 4;
    frame.extend_from_slice(&tcp);

    frame.extend((0..payload_len).map(|i| i as u8));
    frame
}

pub fn rx_queue(num_descs: u16, mtu: usize) -> RxQueue {
    RxQueue::new(
        RxQueueConfig {
            queue_index: 0,
            num_descs,
            mtu,
            copybreak: RX_COPYBREAK_DEFAULT,
            max_sg_elems: 8,
            hwstamp: false,
        },
        Features::default(),
    )
}

pub fn tx_queue(num_descs: u16) -> TxQueue {
    TxQueue::new(TxQueueConfig {
        queue_index: 0,
        num_descs,
        max_sg_elems: 8,
        hwstamp: false,
    })
}

/// Hardware side of an RX queue: consumes posted descriptors in ring order
/// and writes completion entries.
#[derive(Debug, Default)]
pub struct RxHarness {
    next: u16,
}

impl RxHarness {
    pub fn new() -> Self {
        Self::default()
    }

    /// Deposits `frame` into the buffers of the next posted descriptor and
    /// completes it. `tweak` can adjust the completion before it is posted.
    pub fn deposit<F>(&mut self, rxq: &mut RxQueue, dev: &mut MemDmaDevice, frame: &[u8], tweak: F)
    where
        F: FnOnce(&mut RxCompletion),
    {
        self.deposit_stamped(rxq, dev, frame, None, tweak)
    }

    pub fn deposit_stamped<F>(
        &mut self,
        rxq: &mut RxQueue,
        dev: &mut MemDmaDevice,
        frame: &[u8],
        stamp: Option<u64>,
        tweak: F,
    ) where
        F: FnOnce(&mut RxCompletion),
    {
        let slot = self.next;
        self.next = (self.next + 1) % rxq.ring().num_descs();

        let desc = RxDesc::from_bytes(rxq.ring().desc(slot)).expect("posted rx descriptor");
        let mut bufs = vec![(desc.addr, desc.len as usize)];
        if desc.opcode == RxOpcode::Sg {
            let sg = rxq.ring().sg_desc(slot);
            for j in 0..sg.len() / SG_ELEM_SIZE {
                let elem = SgElem::from_bytes(&sg[j * SG_ELEM_SIZE..]);
                if elem.addr == 0 && elem.len == 0 {
                    break;
                }
                bufs.push((elem.addr, elem.len as usize));
            }
        }

        let mut off = 0usize;
        let mut used_sg = 0usize;
        for (i, &(addr, cap)) in bufs.iter().enumerate() {
            if off >= frame.len() {
                break;
            }
            let n = cap.min(frame.len() - off);
            let (page, page_off) = dev.page_by_dma(addr).expect("mapped rx buffer");
            dev.page_write(page, page_off, &frame[off..off + n]);
            off += n;
            used_sg = i;
        }
        assert_eq!(off, frame.len(), "frame exceeds posted buffer space");

        let mut comp = RxCompletion {
            status: 0,
            num_sg_elems: used_sg as u8,
            comp_index: slot,
            rss_hash: 0,
            csum: 0,
            vlan_tci: 0,
            len: frame.len() as u16,
            csum_flags: RxCsumFlags::empty(),
            pkt_type: PktType::Ipv4Tcp,
            color: false, // hw_post applies the generation color
        };
        tweak(&mut comp);
        post_rx_comp(rxq, &comp, stamp);
    }
}

pub fn post_rx_comp(rxq: &mut RxQueue, comp: &RxCompletion, stamp: Option<u64>) {
    let cq = rxq.cq_mut();
    if cq.entry_size() == COMP_SIZE_HWSTAMP {
        let mut entry = [0u8; COMP_SIZE_HWSTAMP];
        entry[..COMP_SIZE].copy_from_slice(&comp.to_bytes());
        entry[COMP_SIZE..].copy_from_slice(&stamp.unwrap_or(HWSTAMP_INVALID).to_le_bytes());
        cq.hw_post(&entry);
    } else {
        cq.hw_post(&comp.to_bytes());
    }
}

/// Hardware side of a TX queue: acknowledges descriptors in ring order.
#[derive(Debug, Default)]
pub struct TxHarness {
    next: u16,
}

impl TxHarness {
    pub fn new() -> Self {
        Self::default()
    }

    /// Completes the next `ndescs` descriptors with a single completion.
    pub fn complete(&mut self, txq: &mut TxQueue, ndescs: u16) {
        self.complete_stamped(txq, ndescs, None)
    }

    pub fn complete_stamped(&mut self, txq: &mut TxQueue, ndescs: u16, stamp: Option<u64>) {
        let num = txq.ring().num_descs();
        let last = (self.next + ndescs - 1) % num;
        self.next = (last + 1) % num;

        let comp = TxCompletion {
            status: 0,
            comp_index: last,
            color: false,
        };
        let cq = txq.cq_mut();
        if cq.entry_size() == COMP_SIZE_HWSTAMP {
            let mut entry = [0u8; COMP_SIZE_HWSTAMP];
            entry[..COMP_SIZE].copy_from_slice(&comp.to_bytes());
            entry[COMP_SIZE..].copy_from_slice(&stamp.unwrap_or(HWSTAMP_INVALID).to_le_bytes());
            cq.hw_post(&entry);
        } else {
            cq.hw_post(&comp.to_bytes());
        }
    }
}

/// [`TxEventSink`] that records everything for assertions.
#[derive(Debug, Default)]
pub struct RecordingEvents {
    pub sent: Vec<u64>,
    pub completed: Vec<(u64, u64)>,
    pub stopped: u32,
    pub woken: u32,
    pub stamps: Vec<u64>,
}

impl TxEventSink for RecordingEvents {
    fn sent(&mut self, bytes: u64) {
        self.sent.push(bytes);
    }

    fn completed(&mut self, pkts: u64, bytes: u64) {
        self.completed.push((pkts, bytes));
    }

    fn stopped(&mut self) {
        self.stopped += 1;
    }

    fn woken(&mut self) {
        self.woken += 1;
    }

    fn tx_hwstamp(&mut self, stamp: u64) {
        self.stamps.push(stamp);
    }
}

/// [`IntrControl`] that records every credit return.
#[derive(Debug, Default)]
pub struct RecordingIntr {
    /// `(intr_index, credits, unmask, reset_coalesce)` per call.
    pub credits: Vec<(u32, u32, bool, bool)>,
}

impl IntrControl for RecordingIntr {
    fn credits(&mut self, intr_index: u32, credits: u32, unmask: bool, reset_coalesce: bool) {
        self.credits.push((intr_index, credits, unmask, reset_coalesce));
    }
}

/// [`CoalesceObserver`] that records every traffic sample.
#[derive(Debug, Default)]
pub struct RecordingCoalesce {
    pub samples: Vec<(u64, u64, u64)>,
}

impl CoalesceObserver for RecordingCoalesce {
    fn sample(&mut self, pkts: u64, bytes: u64, rearm_count: u64) {
        self.samples.push((pkts, bytes, rearm_count));
    }
}
