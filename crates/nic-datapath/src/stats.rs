//! Per-queue counters.
//!
//! Plain `u64` fields bumped inline by the hot paths; an exporter snapshots
//! them by cloning. Nothing here is atomic: each queue is single-owner.

/// TX queue counters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TxStats {
    /// Packets put on the wire (TSO counts every produced segment).
    pub pkts: u64,
    /// Bytes put on the wire.
    pub bytes: u64,
    /// Packets sent without checksum offload.
    pub csum_none: u64,
    /// Packets sent with partial checksum offload.
    pub csum: u64,
    /// TSO super-packets segmented.
    pub tso: u64,
    pub tso_bytes: u64,
    /// Scatter-gather fragments mapped.
    pub frags: u64,
    pub vlan_inserted: u64,
    /// Descriptors reclaimed by completion processing.
    pub clean: u64,
    /// Packets linearized to fit the SG limit.
    pub linearize: u64,
    pub dma_map_err: u64,
    /// Times the queue was stopped for lack of descriptors.
    pub stop: u64,
    /// Times a stopped queue was woken.
    pub wake: u64,
    /// Packets dropped (map failure, unusable offload parameters, or a full
    /// timestamping queue).
    pub dropped: u64,
    pub hwstamp_valid: u64,
    pub hwstamp_invalid: u64,
}

/// RX queue counters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RxStats {
    pub pkts: u64,
    pub bytes: u64,
    /// Completions delivered without a checksum-complete value.
    pub csum_none: u64,
    /// Completions carrying a checksum-complete value.
    pub csum_complete: u64,
    /// Buffers posted to the ring.
    pub buffers_posted: u64,
    /// Completions dropped (bad status, oversized frame).
    pub dropped: u64,
    pub vlan_stripped: u64,
    /// Advisory: hardware flagged the packet checksum as bad.
    pub csum_error: u64,
    pub dma_map_err: u64,
    pub alloc_err: u64,
    pub hwstamp_valid: u64,
    pub hwstamp_invalid: u64,
}
