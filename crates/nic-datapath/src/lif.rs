//! Interface-level glue: queue pairs, polling workers, link state.
//!
//! A [`QueuePair`] binds one TX and one RX queue to a shared interrupt. The
//! poll entry points mirror the worker model the engine is driven by: each
//! is one budget-bound pass that drains completions, refills RX when the
//! backlog warrants it, returns interrupt credits, and reports whether
//! doorbell housekeeping still needs a reschedule.

use crate::dev::{CoalesceObserver, DmaDevice, DoorbellPage, IntrControl};
use crate::pkt::{NetBuffer, RxSink, SubmitOutcome, TxEventSink};
use crate::rx::RxQueue;
use crate::tx::TxQueue;
use crate::{RX_FILL_DIV, RX_FILL_THRESHOLD, TX_BUDGET_DEFAULT};

/// Offload features negotiated with the host stack. These gate metadata
/// delivery only; the hardware bits are reported either way.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Features {
    pub rx_hash: bool,
    pub rx_csum: bool,
    pub vlan_strip: bool,
}

impl Default for Features {
    fn default() -> Self {
        Features {
            rx_hash: true,
            rx_csum: true,
            vlan_strip: true,
        }
    }
}

/// Outcome of one poll pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollResult {
    pub work_done: usize,
    /// Doorbell housekeeping is still pending; schedule another pass even
    /// without an interrupt.
    pub resched: bool,
}

#[derive(Debug)]
pub struct QueuePair {
    pub tx: TxQueue,
    pub rx: RxQueue,
    intr_index: u32,
    rearm_count: u64,
}

impl QueuePair {
    pub fn new(tx: TxQueue, rx: RxQueue, intr_index: u32) -> Self {
        QueuePair {
            tx,
            rx,
            intr_index,
            rearm_count: 0,
        }
    }

    /// TX-only poll: drains completions and returns interrupt credits.
    #[allow(clippy::too_many_arguments)]
    pub fn tx_poll(
        &mut self,
        budget: usize,
        dev: &mut impl DmaDevice,
        dbell: &mut dyn DoorbellPage,
        intr: &mut impl IntrControl,
        coalesce: &mut impl CoalesceObserver,
        sink: &mut impl TxEventSink,
        now: u64,
    ) -> PollResult {
        let work_done = self.tx.service(budget, dev, sink);

        let unmask = work_done < budget;
        if unmask {
            self.rearm_count += 1;
        }
        if work_done > 0 || unmask {
            if unmask {
                let stats = self.tx.stats();
                coalesce.sample(stats.pkts, stats.bytes, self.rearm_count);
            }
            intr.credits(self.intr_index, work_done as u32, unmask, true);
        }

        let resched = work_done == 0 && self.tx.poke_doorbell(dbell, now);
        PollResult { work_done, resched }
    }

    /// RX-only poll: drains completions, refills the ring when enough
    /// backlog has built up, and returns interrupt credits.
    #[allow(clippy::too_many_arguments)]
    pub fn rx_poll(
        &mut self,
        budget: usize,
        dev: &mut impl DmaDevice,
        dbell: &mut dyn DoorbellPage,
        intr: &mut impl IntrControl,
        coalesce: &mut impl CoalesceObserver,
        sink: &mut impl RxSink,
        now: u64,
    ) -> PollResult {
        let work_done = self.rx.service(budget, dev, sink);

        if work_done > 0 && self.rx.space_avail() >= self.rx_fill_threshold() {
            self.rx.fill(dev, dbell, now);
        }

        let unmask = work_done < budget;
        if unmask {
            self.rearm_count += 1;
        }
        if work_done > 0 || unmask {
            if unmask {
                let stats = self.rx.stats();
                coalesce.sample(stats.pkts, stats.bytes, self.rearm_count);
            }
            intr.credits(self.intr_index, work_done as u32, unmask, true);
        }

        let resched = work_done == 0 && self.rx.poke_doorbell(dbell, now);
        PollResult { work_done, resched }
    }

    /// Combined poll for pairs sharing one interrupt: TX first on its own
    /// budget, then RX on the caller's. The returned work count is the RX
    /// side's, matching how the budget is accounted.
    #[allow(clippy::too_many_arguments)]
    pub fn txrx_poll(
        &mut self,
        budget: usize,
        dev: &mut impl DmaDevice,
        dbell: &mut dyn DoorbellPage,
        intr: &mut impl IntrControl,
        coalesce: &mut impl CoalesceObserver,
        rx_sink: &mut impl RxSink,
        tx_sink: &mut impl TxEventSink,
        now: u64,
    ) -> PollResult {
        let tx_work = self.tx.service(TX_BUDGET_DEFAULT, dev, tx_sink);
        let rx_work = self.rx.service(budget, dev, rx_sink);

        if rx_work > 0 && self.rx.space_avail() >= self.rx_fill_threshold() {
            self.rx.fill(dev, dbell, now);
        }

        let unmask = rx_work < budget;
        if unmask {
            self.rearm_count += 1;
        }
        if rx_work > 0 || unmask {
            if unmask {
                let tx = self.tx.stats();
                let rx = self.rx.stats();
                coalesce.sample(tx.pkts + rx.pkts, tx.bytes + rx.bytes, self.rearm_count);
            }
            intr.credits(self.intr_index, (tx_work + rx_work) as u32, unmask, true);
        }

        let mut resched = false;
        if rx_work == 0 && self.rx.poke_doorbell(dbell, now) {
            resched = true;
        }
        if tx_work == 0 && self.tx.poke_doorbell(dbell, now) {
            resched = true;
        }
        PollResult {
            work_done: rx_work,
            resched,
        }
    }

    fn rx_fill_threshold(&self) -> u16 {
        RX_FILL_THRESHOLD.min(self.rx.ring().num_descs() / RX_FILL_DIV)
    }
}

/// One logical interface: its queue pairs, an optional dedicated
/// timestamping TX queue, and the administrative link state.
#[derive(Debug, Default)]
pub struct Lif {
    qps: Vec<QueuePair>,
    hwstamp_txq: Option<TxQueue>,
    up: bool,
}

impl Lif {
    pub fn new(qps: Vec<QueuePair>) -> Self {
        Lif {
            qps,
            hwstamp_txq: None,
            up: false,
        }
    }

    pub fn set_hwstamp_txq(&mut self, txq: TxQueue) {
        self.hwstamp_txq = Some(txq);
    }

    pub fn is_up(&self) -> bool {
        self.up
    }

    pub fn qps(&mut self) -> &mut [QueuePair] {
        &mut self.qps
    }

    /// Brings the interface up: primes every RX ring and starts accepting
    /// submissions.
    pub fn open(&mut self, dev: &mut impl DmaDevice, dbell: &mut dyn DoorbellPage, now: u64) {
        for qp in &mut self.qps {
            qp.rx.fill(dev, dbell, now);
        }
        self.up = true;
    }

    /// Takes the interface down: stops admissions, reaps whatever
    /// completions are pending, then releases every outstanding buffer and
    /// resets the rings.
    pub fn close(&mut self, dev: &mut impl DmaDevice, sink: &mut impl TxEventSink) {
        self.up = false;
        for qp in &mut self.qps {
            qp.tx.flush(dev, sink);
            qp.tx.empty(dev, sink);
            qp.rx.empty(dev);
        }
        if let Some(txq) = self.hwstamp_txq.as_mut() {
            txq.flush(dev, sink);
            txq.empty(dev, sink);
        }
    }

    /// Stack-facing transmit entry point. A down interface accepts and
    /// silently discards; packets wanting a hardware timestamp divert to
    /// the dedicated queue when one exists.
    pub fn submit(
        &mut self,
        queue_index: usize,
        pkt: NetBuffer,
        dev: &mut impl DmaDevice,
        dbell: &mut dyn DoorbellPage,
        sink: &mut impl TxEventSink,
        now: u64,
    ) -> SubmitOutcome {
        if !self.up {
            return SubmitOutcome::Accepted;
        }

        if pkt.hwstamp_requested {
            if let Some(txq) = self.hwstamp_txq.as_mut() {
                txq.submit_or_drop(pkt, dev, dbell, sink, now);
                return SubmitOutcome::Accepted;
            }
        }

        let qi = if queue_index < self.qps.len() {
            queue_index
        } else {
            0
        };
        self.qps[qi].tx.submit(pkt, dev, dbell, sink, now)
    }
}
