//! Hardware wire formats for the NIC queue contract.
//!
//! Everything the device reads or writes through shared memory lives here:
//! TX/RX descriptors, scatter-gather element lists, and completion entries.
//! The layouts are fixed little-endian byte images; this crate only encodes
//! and decodes them. Ring management, buffer lifecycle and the packet
//! pipelines live in `nic-datapath`.
#![forbid(unsafe_code)]

pub mod comp;
pub mod rxq;
pub mod txq;

/// Size of one TX or RX descriptor slot, in bytes.
pub const DESC_SIZE: usize = 16;

/// Size of one scatter-gather element, in bytes.
pub const SG_ELEM_SIZE: usize = 16;

/// Maximum scatter-gather elements per TX descriptor.
pub const MAX_TX_SG_ELEMS: usize = 8;

/// Maximum scatter-gather elements per RX descriptor.
pub const MAX_RX_SG_ELEMS: usize = 8;

/// Size of the per-slot scatter-gather descriptor (element list).
pub const SG_DESC_SIZE: usize = SG_ELEM_SIZE * MAX_TX_SG_ELEMS;

/// Size of a completion entry without the trailing hardware timestamp.
pub const COMP_SIZE: usize = 16;

/// Size of a completion entry on queues with hardware timestamping enabled:
/// the base entry followed by a little-endian `u64` timestamp.
pub const COMP_SIZE_HWSTAMP: usize = 24;

/// Sentinel written by hardware when no timestamp is available.
pub const HWSTAMP_INVALID: u64 = u64::MAX;

/// DMA addresses carried in descriptors are truncated to this many bits.
pub const DESC_ADDR_BITS: u32 = 48;

/// Composes a doorbell register value: queue id in the high word, producer
/// index in the low word.
pub fn doorbell_val(qid: u32, index: u16) -> u64 {
    (u64::from(qid) << 24) | u64::from(index)
}

/// Reads the trailing hardware timestamp from a completion entry, if the
/// queue was opened with timestamping (entries are [`COMP_SIZE_HWSTAMP`]
/// bytes). Returns `None` when hardware reported the invalid sentinel.
pub fn comp_hwstamp(entry: &[u8]) -> Option<u64> {
    if entry.len() < COMP_SIZE_HWSTAMP {
        return None;
    }
    let raw = u64::from_le_bytes(entry[16..24].try_into().unwrap());
    (raw != HWSTAMP_INVALID).then_some(raw)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn doorbell_val_packs_qid_and_index() {
        assert_eq!(doorbell_val(0, 0), 0);
        assert_eq!(doorbell_val(3, 0x1f), (3 << 24) | 0x1f);
    }

    #[test]
    fn comp_hwstamp_honors_invalid_sentinel() {
        let mut entry = [0u8; COMP_SIZE_HWSTAMP];
        entry[16..24].copy_from_slice(&HWSTAMP_INVALID.to_le_bytes());
        assert_eq!(comp_hwstamp(&entry), None);

        entry[16..24].copy_from_slice(&0x1234_5678u64.to_le_bytes());
        assert_eq!(comp_hwstamp(&entry), Some(0x1234_5678));

        // Short entries (no timestamp appended) never yield one.
        assert_eq!(comp_hwstamp(&entry[..COMP_SIZE]), None);
    }
}
