//! Completion-entry decoding.
//!
//! Completions are written by hardware into the completion ring. Byte 15 of
//! every entry carries the color bit (bit 7): an entry is valid for
//! consumption only while its color matches the consumer's current
//! generation. The remaining layout differs per direction:
//!
//! ```text
//! TX:  [0] status  [2..4] comp_index (le16)                    [15] color
//! RX:  [0] status  [1] num_sg_elems  [2..4] comp_index (le16)
//!      [4..8] rss_hash (le32)  [8..10] csum (le16)
//!      [10..12] vlan_tci (le16)  [12..14] len (le16)
//!      [14] csum_flags  [15] pkt_type[6:0] | color[7]
//! ```

use crate::COMP_SIZE;

const COLOR_BIT: u8 = 0x80;

/// True when the entry's color bit matches the consumer's expected color.
pub fn color_match(entry: &[u8], done_color: bool) -> bool {
    (entry[15] & COLOR_BIT != 0) == done_color
}

/// Sets or clears the color bit in a completion image (device-side helper).
pub fn set_color(entry: &mut [u8], color: bool) {
    if color {
        entry[15] |= COLOR_BIT;
    } else {
        entry[15] &= !COLOR_BIT;
    }
}

bitflags::bitflags! {
    /// RX completion checksum/VLAN flag byte.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct RxCsumFlags: u8 {
        /// Hardware computed a checksum-complete value over the payload.
        const CALC = 1 << 0;
        /// A VLAN tag was stripped into `vlan_tci`.
        const VLAN = 1 << 1;
        const TCP_BAD = 1 << 2;
        const UDP_BAD = 1 << 3;
        const IP_BAD = 1 << 4;
    }
}

impl RxCsumFlags {
    /// Any of the advisory "checksum looked wrong" bits.
    pub fn any_bad(self) -> bool {
        self.intersects(Self::TCP_BAD | Self::UDP_BAD | Self::IP_BAD)
    }
}

/// Parsed packet type reported by hardware, used to key the RSS hash.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PktType {
    Unknown,
    Ipv4,
    Ipv4Tcp,
    Ipv4Udp,
    Ipv6,
    Ipv6Tcp,
    Ipv6Udp,
}

impl PktType {
    pub fn from_bits(bits: u8) -> Self {
        match bits {
            1 => PktType::Ipv4,
            2 => PktType::Ipv4Tcp,
            3 => PktType::Ipv4Udp,
            4 => PktType::Ipv6,
            5 => PktType::Ipv6Tcp,
            6 => PktType::Ipv6Udp,
            _ => PktType::Unknown,
        }
    }

    fn to_bits(self) -> u8 {
        match self {
            PktType::Unknown => 0,
            PktType::Ipv4 => 1,
            PktType::Ipv4Tcp => 2,
            PktType::Ipv4Udp => 3,
            PktType::Ipv6 => 4,
            PktType::Ipv6Tcp => 5,
            PktType::Ipv6Udp => 6,
        }
    }

    /// True for types where the hash covered L4 ports as well.
    pub fn is_l4(self) -> bool {
        matches!(
            self,
            PktType::Ipv4Tcp | PktType::Ipv4Udp | PktType::Ipv6Tcp | PktType::Ipv6Udp
        )
    }

    /// True for plain L3 types (hash over addresses only).
    pub fn is_l3(self) -> bool {
        matches!(self, PktType::Ipv4 | PktType::Ipv6)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TxCompletion {
    pub status: u8,
    pub comp_index: u16,
    pub color: bool,
}

impl TxCompletion {
    pub fn from_bytes(bytes: &[u8]) -> Self {
        TxCompletion {
            status: bytes[0],
            comp_index: u16::from_le_bytes(bytes[2..4].try_into().unwrap()),
            color: bytes[15] & COLOR_BIT != 0,
        }
    }

    pub fn to_bytes(&self) -> [u8; COMP_SIZE] {
        let mut out = [0u8; COMP_SIZE];
        out[0] = self.status;
        out[2..4].copy_from_slice(&self.comp_index.to_le_bytes());
        set_color(&mut out, self.color);
        out
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RxCompletion {
    pub status: u8,
    pub num_sg_elems: u8,
    pub comp_index: u16,
    pub rss_hash: u32,
    pub csum: u16,
    pub vlan_tci: u16,
    pub len: u16,
    pub csum_flags: RxCsumFlags,
    pub pkt_type: PktType,
    pub color: bool,
}

impl RxCompletion {
    pub fn from_bytes(bytes: &[u8]) -> Self {
        RxCompletion {
            status: bytes[0],
            num_sg_elems: bytes[1],
            comp_index: u16::from_le_bytes(bytes[2..4].try_into().unwrap()),
            rss_hash: u32::from_le_bytes(bytes[4..8].try_into().unwrap()),
            csum: u16::from_le_bytes(bytes[8..10].try_into().unwrap()),
            vlan_tci: u16::from_le_bytes(bytes[10..12].try_into().unwrap()),
            len: u16::from_le_bytes(bytes[12..14].try_into().unwrap()),
            csum_flags: RxCsumFlags::from_bits_truncate(bytes[14]),
            pkt_type: PktType::from_bits(bytes[15] & !COLOR_BIT),
            color: bytes[15] & COLOR_BIT != 0,
        }
    }

    pub fn to_bytes(&self) -> [u8; COMP_SIZE] {
        let mut out = [0u8; COMP_SIZE];
        out[0] = self.status;
        out[1] = self.num_sg_elems;
        out[2..4].copy_from_slice(&self.comp_index.to_le_bytes());
        out[4..8].copy_from_slice(&self.rss_hash.to_le_bytes());
        out[8..10].copy_from_slice(&self.csum.to_le_bytes());
        out[10..12].copy_from_slice(&self.vlan_tci.to_le_bytes());
        out[12..14].copy_from_slice(&self.len.to_le_bytes());
        out[14] = self.csum_flags.bits();
        out[15] = self.pkt_type.to_bits();
        set_color(&mut out, self.color);
        out
    }
}
