//! TX descriptor encoding.
//!
//! A TX descriptor is a 16-byte image:
//!
//! ```text
//! [0..8]   cmd   (le64): opcode[3:0] | flags[7:4] | nsge[15:8] | addr[63:16]
//! [8..10]  len   (le16)
//! [10..12] vlan_tci (le16)
//! [12..14] opcode-specific half-word (TSO: hdr_len, CSUM_PARTIAL: csum_start)
//! [14..16] opcode-specific half-word (TSO: mss,     CSUM_PARTIAL: csum_offset)
//! ```
//!
//! The opcode-specific half-words are decoded into [`TxDescMeta`] rather than
//! exposed as a raw union.

use crate::{DESC_ADDR_BITS, DESC_SIZE, SG_ELEM_SIZE};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxOpcode {
    /// Single packet, no checksum assist.
    CsumNone,
    /// Single packet; hardware writes a checksum computed from `csum_start`
    /// into `csum_start + csum_offset`.
    CsumPartial,
    /// One segment of a TSO burst.
    Tso,
}

impl TxOpcode {
    fn to_bits(self) -> u8 {
        match self {
            TxOpcode::CsumNone => 0,
            TxOpcode::CsumPartial => 1,
            TxOpcode::Tso => 2,
        }
    }

    pub fn from_bits(bits: u8) -> Option<Self> {
        match bits {
            0 => Some(TxOpcode::CsumNone),
            1 => Some(TxOpcode::CsumPartial),
            2 => Some(TxOpcode::Tso),
            _ => None,
        }
    }
}

bitflags::bitflags! {
    /// Per-descriptor flag nibble in the command word.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct TxFlags: u8 {
        /// Insert the descriptor's VLAN tag on the wire.
        const VLAN = 1 << 0;
        /// Packet is encapsulated; checksum offsets refer to inner headers.
        const ENCAP = 1 << 1;
        /// Start of a TSO transfer.
        const TSO_SOT = 1 << 2;
        /// End of a TSO transfer.
        const TSO_EOT = 1 << 3;
    }
}

/// Opcode-specific trailing half-words of a TX descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxDescMeta {
    None,
    Csum { start: u16, offset: u16 },
    Tso { hdr_len: u16, mss: u16 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TxDesc {
    pub opcode: TxOpcode,
    pub flags: TxFlags,
    pub nsge: u8,
    pub addr: u64,
    pub len: u16,
    pub vlan_tci: u16,
    pub meta: TxDescMeta,
}

impl TxDesc {
    pub fn to_bytes(&self) -> [u8; DESC_SIZE] {
        let addr = self.addr & ((1u64 << DESC_ADDR_BITS) - 1);
        let cmd: u64 = u64::from(self.opcode.to_bits())
            | (u64::from(self.flags.bits()) << 4)
            | (u64::from(self.nsge) << 8)
            | (addr << 16);

        let (h0, h1) = match self.meta {
            TxDescMeta::None => (0, 0),
            TxDescMeta::Csum { start, offset } => (start, offset),
            TxDescMeta::Tso { hdr_len, mss } => (hdr_len, mss),
        };

        let mut out = [0u8; DESC_SIZE];
        out[0..8].copy_from_slice(&cmd.to_le_bytes());
        out[8..10].copy_from_slice(&self.len.to_le_bytes());
        out[10..12].copy_from_slice(&self.vlan_tci.to_le_bytes());
        out[12..14].copy_from_slice(&h0.to_le_bytes());
        out[14..16].copy_from_slice(&h1.to_le_bytes());
        out
    }

    /// Decodes a descriptor image. Returns `None` on an unknown opcode.
    pub fn from_bytes(bytes: &[u8; DESC_SIZE]) -> Option<Self> {
        let cmd = u64::from_le_bytes(bytes[0..8].try_into().unwrap());
        let opcode = TxOpcode::from_bits((cmd & 0xf) as u8)?;
        let flags = TxFlags::from_bits_truncate(((cmd >> 4) & 0xf) as u8);
        let nsge = ((cmd >> 8) & 0xff) as u8;
        let addr = cmd >> 16;
        let h0 = u16::from_le_bytes(bytes[12..14].try_into().unwrap());
        let h1 = u16::from_le_bytes(bytes[14..16].try_into().unwrap());

        let meta = match opcode {
            TxOpcode::CsumNone => TxDescMeta::None,
            TxOpcode::CsumPartial => TxDescMeta::Csum {
                start: h0,
                offset: h1,
            },
            TxOpcode::Tso => TxDescMeta::Tso {
                hdr_len: h0,
                mss: h1,
            },
        };

        Some(TxDesc {
            opcode,
            flags,
            nsge,
            addr,
            len: u16::from_le_bytes(bytes[8..10].try_into().unwrap()),
            vlan_tci: u16::from_le_bytes(bytes[10..12].try_into().unwrap()),
            meta,
        })
    }
}

/// One scatter-gather element: a secondary buffer referenced alongside the
/// descriptor's main address. An all-zero element terminates the list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SgElem {
    pub addr: u64,
    pub len: u16,
}

impl SgElem {
    pub fn to_bytes(&self) -> [u8; SG_ELEM_SIZE] {
        let mut out = [0u8; SG_ELEM_SIZE];
        out[0..8].copy_from_slice(&self.addr.to_le_bytes());
        out[8..10].copy_from_slice(&self.len.to_le_bytes());
        out
    }

    pub fn from_bytes(bytes: &[u8]) -> Self {
        SgElem {
            addr: u64::from_le_bytes(bytes[0..8].try_into().unwrap()),
            len: u16::from_le_bytes(bytes[8..10].try_into().unwrap()),
        }
    }
}
