//! TX/RX packet-processing engine for a NIC queue pair.
//!
//! This crate owns the datapath between host memory and hardware queues:
//! descriptor ring management, DMA buffer lifecycle, completion-queue
//! draining, and the TSO/checksum-offload encode that has to match the
//! descriptor contract in [`nic_wire`]. Device bring-up, interrupt
//! moderation programming, statistics export and the host network-stack
//! glue are all external: they reach the engine through the traits in
//! [`dev`] and [`pkt`].
//!
//! The engine is single-owner per queue pair and never blocks: all entry
//! points are budget-bound polls driven by a worker (see [`lif`]), with
//! time passed in as caller-provided monotonic ticks.
#![forbid(unsafe_code)]

pub mod cq;
pub mod csum;
pub mod dev;
pub mod lif;
pub mod page;
pub mod pkt;
pub mod queue;
pub mod rx;
pub mod stats;
pub mod tx;

/// Size of one DMA page.
pub const PAGE_SIZE: usize = 4096;

/// Granularity for advancing a split page's offset on recycle.
pub const PAGE_SPLIT_SZ: usize = 2048;

/// MTUs above this never recycle their pages (the split no longer pays off).
pub const PAGE_SPLIT_MAX_MTU: usize = 1500;

/// Default copy-break threshold: completions at or below this length are
/// copied out instead of consuming the page.
pub const RX_COPYBREAK_DEFAULT: usize = 256;

/// Ethernet header length.
pub const ETH_HLEN: usize = 14;

/// VLAN tag length.
pub const VLAN_HLEN: usize = 4;

/// Default TX completion budget per poll.
pub const TX_BUDGET_DEFAULT: usize = 256;

/// Refill when at least this many RX slots are free (capped by ring size).
pub const RX_FILL_THRESHOLD: u16 = 16;

/// Divisor applied to the ring size for the refill threshold cap.
pub const RX_FILL_DIV: u16 = 8;

/// TX doorbell debounce window for missed-doorbell recovery, in ticks.
pub const TX_DOORBELL_DEADLINE: u64 = 8;

/// Doorbell debounce window right after a backlog-driven refill, in ticks.
pub const RX_MIN_DOORBELL_DEADLINE: u64 = 1;

/// Cap on the doorbell debounce window growth, in ticks.
pub const RX_MAX_DOORBELL_DEADLINE: u64 = 64;
