//! RX pipeline: buffer posting, completion draining, packet delivery.
//!
//! Buffers are whole DMA pages posted across the main descriptor and its
//! scatter-gather elements. On completion the packet takes one of two paths:
//! frames at or under the copy-break threshold are copied out and leave the
//! buffer untouched for immediate reposting; larger frames consume their
//! page segments, with each segment either recycled (split page, offset
//! advanced) or released.

use tracing::warn;

use nic_wire::comp::RxCompletion;
use nic_wire::rxq::{RxDesc, RxOpcode};
use nic_wire::txq::SgElem;
use nic_wire::{comp_hwstamp, COMP_SIZE, COMP_SIZE_HWSTAMP, MAX_RX_SG_ELEMS, SG_ELEM_SIZE};

use crate::cq::CompQueue;
use crate::dev::{DmaDevice, DoorbellPage, QueueKind};
use crate::lif::Features;
use crate::page::{page_splits, rx_buf_recycle, rx_page_alloc, rx_page_free};
use crate::pkt::{RxDelivery, RxHash, RxHashKind, RxMetadata, RxPath, RxSink};
use crate::queue::{DescInfo, Ring};
use crate::stats::RxStats;
use crate::{ETH_HLEN, PAGE_SIZE, VLAN_HLEN};

#[derive(Debug, Clone)]
pub struct RxQueueConfig {
    pub queue_index: u32,
    /// Ring size; must be a power of two.
    pub num_descs: u16,
    pub mtu: usize,
    /// Frames at or under this length take the copy path.
    pub copybreak: usize,
    pub max_sg_elems: usize,
    /// Completions carry a trailing hardware timestamp.
    pub hwstamp: bool,
}

#[derive(Debug)]
pub struct RxQueue {
    ring: Ring<()>,
    cq: CompQueue,
    cfg: RxQueueConfig,
    features: Features,
    stats: RxStats,
}

impl RxQueue {
    pub fn new(cfg: RxQueueConfig, features: Features) -> Self {
        assert!(cfg.max_sg_elems <= MAX_RX_SG_ELEMS);
        let entry_size = if cfg.hwstamp {
            COMP_SIZE_HWSTAMP
        } else {
            COMP_SIZE
        };
        RxQueue {
            ring: Ring::new(
                cfg.queue_index,
                QueueKind::Rx,
                cfg.num_descs,
                cfg.max_sg_elems + 1,
            ),
            cq: CompQueue::new(cfg.num_descs, entry_size),
            cfg,
            features,
            stats: RxStats::default(),
        }
    }

    /// Target buffer length: the largest frame the queue accepts.
    pub fn buf_len(&self) -> usize {
        self.cfg.mtu + ETH_HLEN + VLAN_HLEN
    }

    pub fn stats(&self) -> &RxStats {
        &self.stats
    }

    pub fn features_mut(&mut self) -> &mut Features {
        &mut self.features
    }

    pub fn ring(&self) -> &Ring<()> {
        &self.ring
    }

    pub fn cq_mut(&mut self) -> &mut CompQueue {
        &mut self.cq
    }

    pub fn space_avail(&self) -> u16 {
        self.ring.space_avail()
    }

    pub fn set_copybreak(&mut self, copybreak: usize) {
        self.cfg.copybreak = copybreak;
    }

    /// Posts buffers into every free slot, reusing pages still held by the
    /// slots (copy-break survivors, recycled splits) and allocating the
    /// rest. On an allocation failure the pass stops early without ringing
    /// the doorbell; the next fill retries. A completed pass rings once and
    /// resets the doorbell debounce window.
    pub fn fill(&mut self, dev: &mut impl DmaDevice, dbell: &mut dyn DoorbellPage, now: u64) {
        let Self {
            ring,
            cfg,
            stats,
            ..
        } = self;
        let len = cfg.mtu + ETH_HLEN + VLAN_HLEN;
        // Jumbo buffers span whole pages; treat them as a single split.
        let nsplits = page_splits(len).max(1);

        for _ in 0..ring.space_avail() {
            let head = ring.head_idx();
            // Phase one: make sure every needed buffer has a page, and
            // collect the (addr, len) list for the descriptor.
            let mut elems: Vec<(u64, u16)> = Vec::with_capacity(cfg.max_sg_elems + 1);
            {
                let info = ring.info_mut(head);
                let mut remain = len;
                for j in 0..=cfg.max_sg_elems {
                    if remain == 0 {
                        break;
                    }
                    let buf = &mut info.bufs[j];
                    if buf.page.is_none() {
                        if rx_page_alloc(dev, buf, stats).is_err() {
                            return;
                        }
                        buf.pagecnt_bias = (nsplits - 1) as u32;
                        if buf.pagecnt_bias > 0 {
                            if let Some(page) = buf.page {
                                dev.page_ref_add(page, buf.pagecnt_bias);
                            }
                        }
                    }
                    let frag_len = remain.min(PAGE_SIZE - buf.page_offset);
                    buf.len = frag_len;
                    elems.push((buf.dma_addr + buf.page_offset as u64, frag_len as u16));
                    remain -= frag_len;
                }
                info.nbufs = elems.len();
            }

            // Phase two: publish the descriptor image.
            let opcode = if elems.len() > 1 {
                RxOpcode::Sg
            } else {
                RxOpcode::Simple
            };
            let desc = RxDesc {
                addr: elems[0].0,
                len: elems[0].1,
                opcode,
            };
            *ring.desc_mut(head) = desc.to_bytes();

            let sg = ring.sg_desc_mut(head);
            sg.fill(0);
            for (j, &(addr, frag_len)) in elems[1..].iter().enumerate() {
                let elem = SgElem {
                    addr,
                    len: frag_len,
                };
                sg[j * SG_ELEM_SIZE..(j + 1) * SG_ELEM_SIZE].copy_from_slice(&elem.to_bytes());
            }

            ring.post(false, dbell, now);
            stats.buffers_posted += 1;
        }

        ring.ring_doorbell(dbell, now);
        ring.reset_rx_deadline(now);
    }

    /// Drains up to `budget` completions, delivering packets to `sink`.
    pub fn service(
        &mut self,
        budget: usize,
        dev: &mut impl DmaDevice,
        sink: &mut impl RxSink,
    ) -> usize {
        let Self {
            ring,
            cq,
            cfg,
            features,
            stats,
        } = self;
        cq.service(budget, |entry| {
            let comp = RxCompletion::from_bytes(entry);
            if ring.is_empty() {
                return false;
            }
            if comp.comp_index != ring.tail_idx() {
                return false;
            }
            let tail = ring.tail_idx();
            ring.advance_tail();
            rx_clean(ring.info_mut(tail), &comp, entry, cfg, features, stats, dev, sink);
            true
        })
    }

    /// Re-rings a missed doorbell; see [`Ring::rx_poke_doorbell`].
    pub fn poke_doorbell(&mut self, dbell: &mut dyn DoorbellPage, now: u64) -> bool {
        self.ring.rx_poke_doorbell(dbell, now)
    }

    /// Teardown: releases every buffered page and resets both rings for a
    /// later reopen.
    pub fn empty(&mut self, dev: &mut impl DmaDevice) {
        for idx in 0..self.ring.num_descs() {
            let info = self.ring.info_mut(idx);
            for buf in info.bufs.iter_mut() {
                rx_page_free(dev, buf);
            }
            info.nbufs = 0;
        }
        self.ring.head_idx = 0;
        self.ring.tail_idx = 0;
        self.cq.reset();
    }
}

#[allow(clippy::too_many_arguments)]
fn rx_clean(
    info: &mut DescInfo<()>,
    comp: &RxCompletion,
    entry: &[u8],
    cfg: &RxQueueConfig,
    features: &Features,
    stats: &mut RxStats,
    dev: &mut impl DmaDevice,
    sink: &mut impl RxSink,
) {
    if comp.status != 0 {
        stats.dropped += 1;
        return;
    }

    let len = comp.len as usize;
    if len > cfg.mtu + ETH_HLEN + VLAN_HLEN {
        warn!(len, mtu = cfg.mtu, "oversized rx completion");
        stats.dropped += 1;
        return;
    }

    // Hardware-written; never trust it as a slice bound.
    if comp.num_sg_elems as usize >= info.bufs.len() {
        warn!(num_sg_elems = comp.num_sg_elems, "bad sg count in rx completion");
        stats.dropped += 1;
        return;
    }

    stats.pkts += 1;
    stats.bytes += len as u64;

    let (data, path) = if len <= cfg.copybreak {
        match rx_copybreak(dev, info, len) {
            Some(data) => (data, RxPath::CopyBreak),
            None => {
                stats.dropped += 1;
                return;
            }
        }
    } else {
        match rx_frags(dev, info, comp.num_sg_elems as usize, len, cfg.mtu) {
            Some(data) => (data, RxPath::PageAttach),
            None => {
                stats.dropped += 1;
                return;
            }
        }
    };

    let mut meta = RxMetadata {
        queue_index: cfg.queue_index,
        ..Default::default()
    };

    if features.rx_hash {
        if comp.pkt_type.is_l3() {
            meta.hash = Some(RxHash {
                value: comp.rss_hash,
                kind: RxHashKind::L3,
            });
        } else if comp.pkt_type.is_l4() {
            meta.hash = Some(RxHash {
                value: comp.rss_hash,
                kind: RxHashKind::L4,
            });
        }
    }

    if features.rx_csum && comp.csum_flags.contains(nic_wire::comp::RxCsumFlags::CALC) {
        meta.csum_complete = Some(comp.csum);
        stats.csum_complete += 1;
    } else {
        stats.csum_none += 1;
    }

    // Advisory only: the packet is still delivered.
    if comp.csum_flags.any_bad() {
        stats.csum_error += 1;
    }

    if features.vlan_strip && comp.csum_flags.contains(nic_wire::comp::RxCsumFlags::VLAN) {
        meta.vlan_tci = Some(comp.vlan_tci);
        stats.vlan_stripped += 1;
    }

    if cfg.hwstamp {
        match comp_hwstamp(entry) {
            Some(stamp) => {
                meta.hwstamp = Some(stamp);
                stats.hwstamp_valid += 1;
            }
            None => stats.hwstamp_invalid += 1,
        }
    }

    sink.deliver(RxDelivery { data, path, meta });
}

/// Copy path: reads the frame out of the first buffer and leaves the buffer
/// posted state untouched, so the slot reuses it as-is on the next fill.
fn rx_copybreak(dev: &mut impl DmaDevice, info: &mut DescInfo<()>, len: usize) -> Option<Vec<u8>> {
    let buf = &info.bufs[0];
    let page = buf.page?;

    dev.sync_for_cpu(buf.dma_addr, buf.page_offset, len);
    let mut data = vec![0u8; len];
    dev.page_read(page, buf.page_offset, &mut data);
    dev.sync_for_device(buf.dma_addr, buf.page_offset, len);
    Some(data)
}

/// Page path: consumes each used segment. Recycled segments advance their
/// split offset and stay in the slot; exhausted ones are released.
fn rx_frags(
    dev: &mut impl DmaDevice,
    info: &mut DescInfo<()>,
    num_sg_elems: usize,
    total_len: usize,
    mtu: usize,
) -> Option<Vec<u8>> {
    let mut data = Vec::with_capacity(total_len);
    let mut remain = total_len;

    for buf in info.bufs[..=num_sg_elems].iter_mut() {
        let page = buf.page?;

        let frag_len = remain.min(PAGE_SIZE - buf.page_offset);
        remain -= frag_len;

        dev.sync_for_cpu(buf.dma_addr, buf.page_offset, frag_len);
        let start = data.len();
        data.resize(start + frag_len, 0);
        dev.page_read(page, buf.page_offset, &mut data[start..]);

        if rx_buf_recycle(dev, buf, frag_len, mtu) {
            // The segment's reference was prepaid; release it now that the
            // bytes are out.
            dev.page_ref_sub(page, 1);
        } else {
            rx_page_free(dev, buf);
        }
    }

    Some(data)
}
