//! RX descriptor encoding.
//!
//! A 16-byte image: `[0..8] addr (le64)`, `[8..10] len (le16)`,
//! `[10] opcode`, remainder reserved. Scatter-gather elements reuse
//! [`crate::txq::SgElem`].

use crate::DESC_SIZE;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RxOpcode {
    /// Single-buffer receive.
    Simple,
    /// Main buffer plus a scatter-gather element list.
    Sg,
}

impl RxOpcode {
    fn to_bits(self) -> u8 {
        match self {
            RxOpcode::Simple => 0,
            RxOpcode::Sg => 1,
        }
    }

    pub fn from_bits(bits: u8) -> Option<Self> {
        match bits {
            0 => Some(RxOpcode::Simple),
            1 => Some(RxOpcode::Sg),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RxDesc {
    pub addr: u64,
    pub len: u16,
    pub opcode: RxOpcode,
}

impl RxDesc {
    pub fn to_bytes(&self) -> [u8; DESC_SIZE] {
        let mut out = [0u8; DESC_SIZE];
        out[0..8].copy_from_slice(&self.addr.to_le_bytes());
        out[8..10].copy_from_slice(&self.len.to_le_bytes());
        out[10] = self.opcode.to_bits();
        out
    }

    pub fn from_bytes(bytes: &[u8; DESC_SIZE]) -> Option<Self> {
        Some(RxDesc {
            addr: u64::from_le_bytes(bytes[0..8].try_into().unwrap()),
            len: u16::from_le_bytes(bytes[8..10].try_into().unwrap()),
            opcode: RxOpcode::from_bits(bytes[10])?,
        })
    }
}
