//! TX pipeline: admission, mapping, descriptor encode, completion reclaim.
//!
//! A packet takes one descriptor (plus scatter-gather elements for its
//! fragments), or for TSO one descriptor per produced segment. The packet
//! itself is parked in the slot of its first descriptor and returned to the
//! stack when that slot is cleaned. Backpressure is a stop/wake protocol:
//! when a packet doesn't fit, the queue stops and the submission bounces
//! back to the caller; completion processing wakes the queue again.

use std::sync::atomic::{fence, AtomicBool, Ordering};

use tracing::warn;

use nic_wire::comp::TxCompletion;
use nic_wire::txq::{SgElem, TxDesc, TxDescMeta, TxFlags, TxOpcode};
use nic_wire::{comp_hwstamp, COMP_SIZE, COMP_SIZE_HWSTAMP, MAX_TX_SG_ELEMS, SG_ELEM_SIZE};

use crate::cq::CompQueue;
use crate::csum::preload_tso_pseudo_csum;
use crate::dev::{DmaDevice, DoorbellPage, QueueKind};
use crate::page::BufInfo;
use crate::pkt::{CsumRequest, NetBuffer, SubmitOutcome, TxEventSink};
use crate::queue::{DescInfo, Ring};
use crate::stats::TxStats;

/// Descriptor slots kept in reserve after a send, so the next packet rarely
/// has to bounce.
const TX_RESERVE_DESCS: u16 = 4;

#[derive(Debug, Clone)]
pub struct TxQueueConfig {
    pub queue_index: u32,
    /// Ring size; must be a power of two.
    pub num_descs: u16,
    pub max_sg_elems: usize,
    /// Dedicated timestamping queue: completions carry a hardware
    /// timestamp, and overflow drops instead of stopping.
    pub hwstamp: bool,
}

#[derive(Debug)]
pub struct TxQueue {
    ring: Ring<Option<NetBuffer>>,
    cq: CompQueue,
    cfg: TxQueueConfig,
    stats: TxStats,
    stopped: AtomicBool,
}

impl TxQueue {
    pub fn new(cfg: TxQueueConfig) -> Self {
        assert!(cfg.max_sg_elems <= MAX_TX_SG_ELEMS);
        let entry_size = if cfg.hwstamp {
            COMP_SIZE_HWSTAMP
        } else {
            COMP_SIZE
        };
        TxQueue {
            ring: Ring::new(
                cfg.queue_index,
                QueueKind::Tx,
                cfg.num_descs,
                cfg.max_sg_elems + 1,
            ),
            cq: CompQueue::new(cfg.num_descs, entry_size),
            cfg,
            stats: TxStats::default(),
            stopped: AtomicBool::new(false),
        }
    }

    pub fn stats(&self) -> &TxStats {
        &self.stats
    }

    pub fn ring(&self) -> &Ring<Option<NetBuffer>> {
        &self.ring
    }

    pub fn cq_mut(&mut self) -> &mut CompQueue {
        &mut self.cq
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    /// Submits one packet. `Busy` returns the packet for a later retry,
    /// with the queue stopped; everything else consumes it.
    pub fn submit(
        &mut self,
        mut pkt: NetBuffer,
        dev: &mut impl DmaDevice,
        dbell: &mut dyn DoorbellPage,
        sink: &mut impl TxEventSink,
        now: u64,
    ) -> SubmitOutcome {
        let ndescs = self.descs_needed(&mut pkt);

        if self.maybe_stop(ndescs, sink) {
            return SubmitOutcome::Busy(pkt);
        }

        let sent = if pkt.gso.is_some() {
            self.tx_tso(pkt, dev, dbell, sink, now)
        } else {
            self.tx(pkt, dev, dbell, sink, now)
        };

        match sent {
            Ok(()) => {
                self.maybe_stop(TX_RESERVE_DESCS, sink);
            }
            Err(()) => {
                self.stats.stop += 1;
                self.stats.dropped += 1;
            }
        }
        SubmitOutcome::Accepted
    }

    /// Timestamping-queue variant: never stops or wakes, drops on overflow.
    pub fn submit_or_drop(
        &mut self,
        mut pkt: NetBuffer,
        dev: &mut impl DmaDevice,
        dbell: &mut dyn DoorbellPage,
        sink: &mut impl TxEventSink,
        now: u64,
    ) {
        let ndescs = self.descs_needed(&mut pkt);
        if !self.ring.has_space(ndescs) {
            self.stats.dropped += 1;
            return;
        }

        pkt.hwstamp_requested = true;
        let sent = if pkt.gso.is_some() {
            self.tx_tso(pkt, dev, dbell, sink, now)
        } else {
            self.tx(pkt, dev, dbell, sink, now)
        };
        if sent.is_err() {
            self.stats.dropped += 1;
        }
    }

    /// Drains up to `budget` completions. One completion may reclaim
    /// several descriptors: everything through its completion index.
    pub fn service(
        &mut self,
        budget: usize,
        dev: &mut impl DmaDevice,
        sink: &mut impl TxEventSink,
    ) -> usize {
        let Self {
            ring,
            cq,
            cfg,
            stats,
            stopped,
        } = self;
        cq.service(budget, |entry| {
            let comp = TxCompletion::from_bytes(entry);
            if ring.is_empty() {
                return false;
            }
            let mut pkts = 0u64;
            let mut bytes = 0u64;
            loop {
                let tail = ring.tail_idx();
                ring.advance_tail();
                if let Some(b) =
                    tx_clean(ring.info_mut(tail), Some(entry), cfg, stats, stopped, dev, sink)
                {
                    pkts += 1;
                    bytes += b;
                }
                if tail == comp.comp_index || ring.is_empty() {
                    break;
                }
            }
            if pkts > 0 {
                sink.completed(pkts, bytes);
            }
            true
        })
    }

    /// Drains whatever completions are pending, bounded by the ring size.
    pub fn flush(&mut self, dev: &mut impl DmaDevice, sink: &mut impl TxEventSink) -> usize {
        let budget = self.ring.num_descs() as usize;
        self.service(budget, dev, sink)
    }

    /// Teardown: reclaims descriptors the hardware never completed and
    /// resets the rings for a later reopen.
    pub fn empty(&mut self, dev: &mut impl DmaDevice, sink: &mut impl TxEventSink) {
        let Self {
            ring,
            cq,
            cfg,
            stats,
            stopped,
        } = self;
        let mut pkts = 0u64;
        let mut bytes = 0u64;
        while !ring.is_empty() {
            let tail = ring.tail_idx();
            ring.advance_tail();
            if let Some(b) = tx_clean(ring.info_mut(tail), None, cfg, stats, stopped, dev, sink) {
                pkts += 1;
                bytes += b;
            }
        }
        if pkts > 0 {
            sink.completed(pkts, bytes);
        }
        ring.head_idx = 0;
        ring.tail_idx = 0;
        cq.reset();
    }

    /// Re-rings a missed doorbell; see [`Ring::tx_poke_doorbell`].
    pub fn poke_doorbell(&mut self, dbell: &mut dyn DoorbellPage, now: u64) -> bool {
        self.ring.tx_poke_doorbell(dbell, now)
    }

    /// Descriptor demand for the packet, linearizing it first when its
    /// fragment list exceeds the scatter-gather capacity.
    fn descs_needed(&mut self, pkt: &mut NetBuffer) -> u16 {
        let ndescs = match pkt.gso {
            Some(gso) => gso.segs.max(1),
            None => 1,
        };

        if pkt.nfrags() <= self.cfg.max_sg_elems {
            return ndescs;
        }

        pkt.linearize();
        self.stats.linearize += 1;
        ndescs
    }

    /// Stops the queue if `ndescs` slots aren't free. Returns whether it is
    /// stopped on exit; a concurrent clean may wake it between the check
    /// and the stop, so the space is checked once more behind a fence.
    fn maybe_stop(&mut self, ndescs: u16, sink: &mut impl TxEventSink) -> bool {
        let mut stopped = false;

        if !self.ring.has_space(ndescs) {
            self.stopped.store(true, Ordering::SeqCst);
            sink.stopped();
            self.stats.stop += 1;
            stopped = true;

            // Might race with a clean on the completion side; check again.
            fence(Ordering::Acquire);
            if self.ring.has_space(ndescs) {
                self.stopped.store(false, Ordering::SeqCst);
                sink.woken();
                stopped = false;
            }
        }

        stopped
    }

    fn tx(
        &mut self,
        pkt: NetBuffer,
        dev: &mut impl DmaDevice,
        dbell: &mut dyn DoorbellPage,
        sink: &mut impl TxEventSink,
        now: u64,
    ) -> Result<(), ()> {
        let Self {
            ring, cfg, stats, ..
        } = self;
        let head = ring.head_idx();

        tx_map_pkt(dev, ring.info_mut(head), &pkt, stats)?;

        let nfrags = pkt.nfrags();
        let mut flags = TxFlags::empty();
        if pkt.vlan_tci.is_some() {
            flags |= TxFlags::VLAN;
        }
        if pkt.encap {
            flags |= TxFlags::ENCAP;
        }

        let (opcode, meta) = match pkt.csum {
            CsumRequest::Partial { start, offset } => {
                stats.csum += 1;
                (TxOpcode::CsumPartial, TxDescMeta::Csum { start, offset })
            }
            CsumRequest::None => {
                stats.csum_none += 1;
                (TxOpcode::CsumNone, TxDescMeta::None)
            }
        };
        if pkt.vlan_tci.is_some() {
            stats.vlan_inserted += 1;
        }

        let (addr, head_len) = {
            let buf = &ring.info_mut(head).bufs[0];
            (buf.dma_addr, buf.len)
        };
        let desc = TxDesc {
            opcode,
            flags,
            nsge: nfrags as u8,
            addr,
            len: head_len as u16,
            vlan_tci: pkt.vlan_tci.unwrap_or(0),
            meta,
        };
        *ring.desc_mut(head) = desc.to_bytes();

        let elems: Vec<SgElem> = ring.info_mut(head).bufs[1..=nfrags]
            .iter()
            .map(|buf| SgElem {
                addr: buf.dma_addr,
                len: buf.len as u16,
            })
            .collect();
        let sg = ring.sg_desc_mut(head);
        sg.fill(0);
        for (j, elem) in elems.iter().enumerate() {
            sg[j * SG_ELEM_SIZE..(j + 1) * SG_ELEM_SIZE].copy_from_slice(&elem.to_bytes());
        }
        stats.frags += nfrags as u64;

        let len = pkt.len() as u64;
        stats.pkts += 1;
        stats.bytes += len;
        if !cfg.hwstamp {
            sink.sent(len);
        }

        ring.info_mut(head).pending = Some(pkt);
        ring.post(true, dbell, now);
        Ok(())
    }

    fn tx_tso(
        &mut self,
        mut pkt: NetBuffer,
        dev: &mut impl DmaDevice,
        dbell: &mut dyn DoorbellPage,
        sink: &mut impl TxEventSink,
        now: u64,
    ) -> Result<(), ()> {
        let Self {
            ring, cfg, stats, ..
        } = self;

        let Some(gso) = pkt.gso else {
            return Err(());
        };
        let mss = gso.mss as usize;
        if mss == 0 {
            warn!("tso packet with zero mss");
            return Err(());
        }

        let first = ring.head_idx();
        tx_map_pkt(dev, ring.info_mut(first), &pkt, stats)?;

        // Seed the innermost TCP checksum with the zero-length pseudo-header
        // sum; hardware adds each segment's length and payload words.
        let inner = if gso.encap { gso.inner } else { None };
        let hdrlen = match preload_tso_pseudo_csum(pkt.head_mut(), inner) {
            Ok(hdrlen) => hdrlen,
            Err(err) => {
                warn!(%err, "tso header parse failed");
                tx_unmap_bufs(dev, ring.info_mut(first));
                return Err(());
            }
        };

        let len = pkt.len();
        let has_vlan = pkt.vlan_tci.is_some();
        let vlan_tci = pkt.vlan_tci.unwrap_or(0);

        let bufs: Vec<(u64, usize)> = {
            let info = ring.info_mut(first);
            info.bufs[..info.nbufs]
                .iter()
                .map(|buf| (buf.dma_addr, buf.len))
                .collect()
        };

        // Walk the mapped fragments, carving one descriptor per segment:
        // the first segment carries the headers plus up to one MSS, the
        // rest one MSS each.
        let mut pending = Some(pkt);
        let mut tso_rem = len;
        let mut seg_rem = tso_rem.min(hdrlen + mss);
        let mut buf_idx = 0usize;
        let mut frag_addr = 0u64;
        let mut frag_rem = 0usize;
        let mut start = true;

        while tso_rem > 0 {
            let mut main: Option<(u64, usize)> = None;
            let mut sgs: Vec<SgElem> = Vec::new();

            while seg_rem > 0 {
                if frag_rem == 0 {
                    let (addr, frag_len) = bufs[buf_idx];
                    buf_idx += 1;
                    frag_addr = addr;
                    frag_rem = frag_len;
                }
                let chunk = frag_rem.min(seg_rem);
                match main {
                    None => main = Some((frag_addr, chunk)),
                    Some(_) => sgs.push(SgElem {
                        addr: frag_addr,
                        len: chunk as u16,
                    }),
                }
                frag_addr += chunk as u64;
                frag_rem -= chunk;
                tso_rem -= chunk;
                seg_rem -= chunk;
            }
            seg_rem = tso_rem.min(mss);
            let done = tso_rem == 0;

            let Some((addr, desc_len)) = main else {
                break;
            };
            let mut flags = TxFlags::empty();
            if has_vlan {
                flags |= TxFlags::VLAN;
            }
            if gso.outer_csum {
                flags |= TxFlags::ENCAP;
            }
            if start {
                flags |= TxFlags::TSO_SOT;
            }
            if done {
                flags |= TxFlags::TSO_EOT;
            }

            let head = ring.head_idx();
            let desc = TxDesc {
                opcode: TxOpcode::Tso,
                flags,
                nsge: sgs.len() as u8,
                addr,
                len: desc_len as u16,
                vlan_tci,
                meta: TxDescMeta::Tso {
                    hdr_len: hdrlen as u16,
                    mss: mss as u16,
                },
            };
            *ring.desc_mut(head) = desc.to_bytes();
            let sg = ring.sg_desc_mut(head);
            sg.fill(0);
            for (j, elem) in sgs.iter().enumerate() {
                sg[j * SG_ELEM_SIZE..(j + 1) * SG_ELEM_SIZE].copy_from_slice(&elem.to_bytes());
            }

            if start {
                if !cfg.hwstamp {
                    sink.sent(len as u64);
                }
                // The packet rides with its first descriptor; the doorbell
                // waits for the last.
                ring.info_mut(head).pending = pending.take();
                ring.post(false, dbell, now);
            } else {
                ring.post(done, dbell, now);
            }
            start = false;

            // Buffer bookkeeping lives with the first descriptor only.
            let next = ring.head_idx();
            ring.info_mut(next).nbufs = 0;
        }

        stats.pkts += (len - hdrlen).div_ceil(mss) as u64;
        stats.bytes += len as u64;
        stats.tso += 1;
        stats.tso_bytes = len as u64;
        Ok(())
    }
}

/// Maps the head and every fragment, unwinding all mappings on failure.
fn tx_map_pkt(
    dev: &mut impl DmaDevice,
    info: &mut DescInfo<Option<NetBuffer>>,
    pkt: &NetBuffer,
    stats: &mut TxStats,
) -> Result<(), ()> {
    let head_len = pkt.head().len();
    let head_addr = match dev.map_host(head_len) {
        Ok(addr) => addr,
        Err(err) => {
            warn!(%err, "tx dma map failed");
            stats.dma_map_err += 1;
            return Err(());
        }
    };
    info.bufs[0] = BufInfo {
        dma_addr: head_addr,
        len: head_len,
        ..Default::default()
    };

    let mut mapped = 1;
    for frag in pkt.frags() {
        match dev.map_host(frag.len()) {
            Ok(addr) => {
                info.bufs[mapped] = BufInfo {
                    dma_addr: addr,
                    len: frag.len(),
                    ..Default::default()
                };
                mapped += 1;
            }
            Err(err) => {
                warn!(%err, "tx dma map failed");
                stats.dma_map_err += 1;
                for buf in info.bufs[..mapped].iter() {
                    dev.unmap_host(buf.dma_addr, buf.len);
                }
                return Err(());
            }
        }
    }

    info.nbufs = mapped;
    Ok(())
}

fn tx_unmap_bufs(dev: &mut impl DmaDevice, info: &mut DescInfo<Option<NetBuffer>>) {
    for buf in info.bufs[..info.nbufs].iter() {
        dev.unmap_host(buf.dma_addr, buf.len);
    }
    info.nbufs = 0;
}

/// Reclaims one descriptor slot. Returns the packet's byte count when the
/// slot carried one (TSO continuation slots don't).
fn tx_clean(
    info: &mut DescInfo<Option<NetBuffer>>,
    entry: Option<&[u8]>,
    cfg: &TxQueueConfig,
    stats: &mut TxStats,
    stopped: &AtomicBool,
    dev: &mut impl DmaDevice,
    sink: &mut impl TxEventSink,
) -> Option<u64> {
    tx_unmap_bufs(dev, info);

    let pkt = info.pending.take()?;

    if cfg.hwstamp {
        if let Some(entry) = entry {
            match comp_hwstamp(entry) {
                Some(stamp) => {
                    sink.tx_hwstamp(stamp);
                    stats.hwstamp_valid += 1;
                }
                None => stats.hwstamp_invalid += 1,
            }
        }
    } else if stopped.swap(false, Ordering::SeqCst) {
        sink.woken();
        stats.wake += 1;
    }

    let bytes = pkt.len() as u64;
    stats.clean += 1;
    Some(bytes)
}
