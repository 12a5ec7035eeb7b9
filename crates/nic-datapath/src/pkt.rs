//! The generic "network buffer" boundary between the engine and the host
//! stack: outbound packets arrive as [`NetBuffer`]s, received packets leave
//! through [`RxSink::deliver`], and TX-side queue events (occupancy, wakes,
//! timestamps) are reported through [`TxEventSink`].

/// Outbound packet handed to [`crate::tx`], or a linearized inbound copy.
///
/// `head` is the contiguous region holding the protocol headers (and, for
/// small packets, the whole frame); `frags` are the paged payload
/// fragments.
#[derive(Debug, Clone, Default)]
pub struct NetBuffer {
    head: Vec<u8>,
    frags: Vec<Vec<u8>>,
    pub csum: CsumRequest,
    pub vlan_tci: Option<u16>,
    /// Packet is encapsulated; checksum offsets refer to inner headers.
    pub encap: bool,
    pub gso: Option<GsoParams>,
    pub hwstamp_requested: bool,
}

/// Checksum work requested by the stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CsumRequest {
    #[default]
    None,
    /// Hardware checksums from `start` and writes the result at
    /// `start + offset` (both relative to the head).
    Partial { start: u16, offset: u16 },
}

/// Segmentation-offload parameters reported by the stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GsoParams {
    pub mss: u16,
    /// Stack-reported segment count; drives descriptor demand.
    pub segs: u16,
    /// Packet is encapsulated: segment against the inner headers.
    pub encap: bool,
    /// Inner header offsets, present when `encap` is set.
    pub inner: Option<InnerOffsets>,
    /// Outer checksum also requested (tunnel checksum offload).
    pub outer_csum: bool,
}

/// Offsets of the inner L3/L4 headers within the head, for encapsulated
/// packets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InnerOffsets {
    pub l3_offset: u16,
    pub l4_offset: u16,
}

impl NetBuffer {
    pub fn new(head: Vec<u8>) -> Self {
        NetBuffer {
            head,
            ..Default::default()
        }
    }

    pub fn head(&self) -> &[u8] {
        &self.head
    }

    pub fn head_mut(&mut self) -> &mut [u8] {
        &mut self.head
    }

    pub fn frags(&self) -> &[Vec<u8>] {
        &self.frags
    }

    pub fn push_frag(&mut self, frag: Vec<u8>) {
        self.frags.push(frag);
    }

    pub fn nfrags(&self) -> usize {
        self.frags.len()
    }

    /// Total packet length: head plus all fragments.
    pub fn len(&self) -> usize {
        self.head.len() + self.frags.iter().map(Vec::len).sum::<usize>()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Copies every fragment into the head, leaving a single contiguous
    /// buffer. Used when the fragment count exceeds the descriptor's
    /// scatter-gather capacity.
    pub fn linearize(&mut self) {
        for frag in self.frags.drain(..) {
            self.head.extend_from_slice(&frag);
        }
    }
}

/// How a received packet was assembled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RxPath {
    /// Below the copy-break threshold: bytes copied out, buffer untouched.
    CopyBreak,
    /// Page segments attached and their ownership consumed.
    PageAttach,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RxHashKind {
    L3,
    L4,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RxHash {
    pub value: u32,
    pub kind: RxHashKind,
}

/// Metadata extracted from an RX completion, delivered with the packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RxMetadata {
    pub queue_index: u32,
    pub hash: Option<RxHash>,
    /// Checksum-complete value, when hardware computed one and the feature
    /// is enabled.
    pub csum_complete: Option<u16>,
    /// Stripped VLAN tag.
    pub vlan_tci: Option<u16>,
    /// Hardware receive timestamp (absent when hardware reported the
    /// invalid sentinel or the queue has no timestamping).
    pub hwstamp: Option<u64>,
}

/// One received packet on its way up the stack.
#[derive(Debug, Clone)]
pub struct RxDelivery {
    pub data: Vec<u8>,
    pub path: RxPath,
    pub meta: RxMetadata,
}

/// Per-packet delivery callback.
pub trait RxSink {
    fn deliver(&mut self, pkt: RxDelivery);
}

/// Collects deliveries into a vector; the RX analog of a loopback backend.
#[derive(Debug, Default)]
pub struct CollectSink {
    pub pkts: Vec<RxDelivery>,
}

impl RxSink for CollectSink {
    fn deliver(&mut self, pkt: RxDelivery) {
        self.pkts.push(pkt);
    }
}

/// TX-side notifications to the host stack. All methods default to no-ops
/// so callers implement only what they observe.
pub trait TxEventSink {
    /// Bytes handed to hardware (queue-occupancy accounting).
    fn sent(&mut self, _bytes: u64) {}
    /// Packets/bytes confirmed completed by hardware.
    fn completed(&mut self, _pkts: u64, _bytes: u64) {}
    /// The subqueue ran out of descriptors and was stopped.
    fn stopped(&mut self) {}
    /// A stopped subqueue was woken.
    fn woken(&mut self) {}
    /// Hardware transmit timestamp for a packet that requested one.
    fn tx_hwstamp(&mut self, _stamp: u64) {}
}

/// [`TxEventSink`] that ignores every event.
#[derive(Debug, Default)]
pub struct NullTxEvents;

impl TxEventSink for NullTxEvents {}

/// Outcome of a submit attempt.
#[derive(Debug)]
pub enum SubmitOutcome {
    /// Packet consumed (posted, or dropped and counted).
    Accepted,
    /// No descriptor space; the packet is returned for a later retry.
    Busy(NetBuffer),
}

impl SubmitOutcome {
    pub fn is_busy(&self) -> bool {
        matches!(self, SubmitOutcome::Busy(_))
    }
}
