//! TSO header parsing and pseudo-checksum preload.
//!
//! Before a packet is handed to hardware for segmentation, the TCP checksum
//! field must be seeded with the pseudo-header sum computed over a zero
//! length, so the segmenter only has to add each segment's payload words and
//! its own length. The seed is the folded sum without the final inversion.

use thiserror::Error;

use crate::pkt::InnerOffsets;

const ETH_HEADER_LEN: usize = 14;
const ETHERTYPE_IPV4: u16 = 0x0800;
const ETHERTYPE_VLAN: u16 = 0x8100;
const ETHERTYPE_QINQ: u16 = 0x88A8;
const ETHERTYPE_IPV6: u16 = 0x86DD;

const IPPROTO_TCP: u8 = 6;

/// The headers could not be parsed well enough to segment the packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum TsoHeaderError {
    #[error("packet too short")]
    PacketTooShort,
    #[error("unsupported ethertype 0x{0:04x}")]
    UnsupportedEthertype(u16),
    #[error("unsupported IP version {0}")]
    UnsupportedIpVersion(u8),
    #[error("segmentation requires TCP, found protocol {0}")]
    NotTcp(u8),
}

/// Seeds the TCP checksum field in `head` with the zero-length pseudo-header
/// sum and returns the total header length (through the end of the TCP
/// header). For encapsulated packets the caller passes the inner header
/// offsets and the seed lands in the inner TCP header.
pub fn preload_tso_pseudo_csum(
    head: &mut [u8],
    inner: Option<InnerOffsets>,
) -> Result<usize, TsoHeaderError> {
    let (l3_offset, l4_offset) = match inner {
        Some(offsets) => {
            let l3 = offsets.l3_offset as usize;
            let l4 = offsets.l4_offset as usize;
            if l4 <= l3 || head.len() < l4 {
                return Err(TsoHeaderError::PacketTooShort);
            }
            (l3, l4)
        }
        None => {
            let eth = parse_ethernet(head)?;
            let l3 = eth.l2_len;
            let l4 = match eth.ethertype {
                ETHERTYPE_IPV4 => l3 + parse_ipv4(&head[l3..])?.header_len,
                ETHERTYPE_IPV6 => l3 + parse_ipv6(&head[l3..])?.header_len,
                other => return Err(TsoHeaderError::UnsupportedEthertype(other)),
            };
            (l3, l4)
        }
    };

    let tcp = parse_tcp(&head[l4_offset..])?;
    let hdr_len = l4_offset + tcp.header_len;

    let sum = match head[l3_offset] >> 4 {
        4 => {
            let ip = parse_ipv4(&head[l3_offset..])?;
            if ip.protocol != IPPROTO_TCP {
                return Err(TsoHeaderError::NotTcp(ip.protocol));
            }
            // Hardware rewrites per-segment IPv4 headers from a zeroed
            // checksum field.
            head[l3_offset + 10..l3_offset + 12].fill(0);
            let mut sum = 0u32;
            sum = checksum_sum_u16_words(&ip.src, sum);
            sum = checksum_sum_u16_words(&ip.dst, sum);
            sum + IPPROTO_TCP as u32
        }
        6 => {
            let ip = parse_ipv6(&head[l3_offset..])?;
            if ip.next_header != IPPROTO_TCP {
                return Err(TsoHeaderError::NotTcp(ip.next_header));
            }
            let mut sum = 0u32;
            sum = checksum_sum_u16_words(&ip.src, sum);
            sum = checksum_sum_u16_words(&ip.dst, sum);
            sum + IPPROTO_TCP as u32
        }
        version => return Err(TsoHeaderError::UnsupportedIpVersion(version)),
    };

    let seed = fold_sum(sum);
    head[l4_offset + 16..l4_offset + 18].copy_from_slice(&seed.to_be_bytes());
    Ok(hdr_len)
}

#[derive(Debug, Clone, Copy)]
struct EthernetFrame {
    l2_len: usize,
    ethertype: u16,
}

fn parse_ethernet(packet: &[u8]) -> Result<EthernetFrame, TsoHeaderError> {
    if packet.len() < ETH_HEADER_LEN {
        return Err(TsoHeaderError::PacketTooShort);
    }
    let mut l2_len = ETH_HEADER_LEN;
    let mut ethertype = u16::from_be_bytes([packet[12], packet[13]]);

    if ethertype == ETHERTYPE_VLAN || ethertype == ETHERTYPE_QINQ {
        if packet.len() < ETH_HEADER_LEN + 4 {
            return Err(TsoHeaderError::PacketTooShort);
        }
        ethertype = u16::from_be_bytes([packet[16], packet[17]]);
        l2_len += 4;
    }

    Ok(EthernetFrame { l2_len, ethertype })
}

#[derive(Debug, Clone, Copy)]
struct Ipv4Header {
    header_len: usize,
    protocol: u8,
    src: [u8; 4],
    dst: [u8; 4],
}

fn parse_ipv4(buf: &[u8]) -> Result<Ipv4Header, TsoHeaderError> {
    if buf.len() < 20 {
        return Err(TsoHeaderError::PacketTooShort);
    }
    let version = buf[0] >> 4;
    if version != 4 {
        return Err(TsoHeaderError::UnsupportedIpVersion(version));
    }
    let ihl = (buf[0] & 0x0F) as usize * 4;
    if ihl < 20 || buf.len() < ihl {
        return Err(TsoHeaderError::PacketTooShort);
    }
    Ok(Ipv4Header {
        header_len: ihl,
        protocol: buf[9],
        src: [buf[12], buf[13], buf[14], buf[15]],
        dst: [buf[16], buf[17], buf[18], buf[19]],
    })
}

#[derive(Debug, Clone, Copy)]
struct Ipv6Header {
    header_len: usize,
    next_header: u8,
    src: [u8; 16],
    dst: [u8; 16],
}

fn parse_ipv6(buf: &[u8]) -> Result<Ipv6Header, TsoHeaderError> {
    if buf.len() < 40 {
        return Err(TsoHeaderError::PacketTooShort);
    }
    let version = buf[0] >> 4;
    if version != 6 {
        return Err(TsoHeaderError::UnsupportedIpVersion(version));
    }
    let mut src = [0u8; 16];
    let mut dst = [0u8; 16];
    src.copy_from_slice(&buf[8..24]);
    dst.copy_from_slice(&buf[24..40]);
    Ok(Ipv6Header {
        header_len: 40,
        next_header: buf[6],
        src,
        dst,
    })
}

#[derive(Debug, Clone, Copy)]
struct TcpHeader {
    header_len: usize,
}

fn parse_tcp(buf: &[u8]) -> Result<TcpHeader, TsoHeaderError> {
    if buf.len() < 20 {
        return Err(TsoHeaderError::PacketTooShort);
    }
    let data_offset = (buf[12] >> 4) as usize * 4;
    if data_offset < 20 || buf.len() < data_offset {
        return Err(TsoHeaderError::PacketTooShort);
    }
    Ok(TcpHeader {
        header_len: data_offset,
    })
}

fn checksum_sum_u16_words(data: &[u8], mut sum: u32) -> u32 {
    let mut chunks = data.chunks_exact(2);
    for chunk in &mut chunks {
        sum += u16::from_be_bytes([chunk[0], chunk[1]]) as u32;
    }
    if let Some(&last) = chunks.remainder().first() {
        sum += (last as u32) << 8;
    }
    sum
}

fn fold_sum(mut sum: u32) -> u16 {
    while (sum >> 16) != 0 {
        sum = (sum & 0xFFFF) + (sum >> 16);
    }
    sum as u16
}

#[cfg(test)]
mod tests {
    use super::*;

    fn build_ipv4_tcp_head() -> Vec<u8> {
        let mut head = Vec::new();
        head.extend_from_slice(&[0x00, 0x11, 0x22, 0x33, 0x44, 0x55]);
        head.extend_from_slice(&[0x66, 0x77, 0x88, 0x99, 0xaa, 0xbb]);
        head.extend_from_slice(&ETHERTYPE_IPV4.to_be_bytes());

        let mut ipv4 = [0u8; 20];
        ipv4[0] = (4 << 4) | 5;
        ipv4[8] = 64;
        ipv4[9] = IPPROTO_TCP;
        ipv4[12..16].copy_from_slice(&[10, 0, 0, 1]);
        ipv4[16..20].copy_from_slice(&[10, 0, 0, 2]);
        head.extend_from_slice(&ipv4);

        let mut tcp = [0u8; 20];
        tcp[0..2].copy_from_slice(&1000u16.to_be_bytes());
        tcp[2..4].copy_from_slice(&2000u16.to_be_bytes());
        tcp[12] = 5u8 << 4;
        head.extend_from_slice(&tcp);
        head
    }

    #[test]
    fn preload_seeds_zero_length_pseudo_sum() {
        let mut head = build_ipv4_tcp_head();
        let hdr_len = preload_tso_pseudo_csum(&mut head, None).unwrap();
        assert_eq!(hdr_len, ETH_HEADER_LEN + 20 + 20);

        let mut sum = 0u32;
        sum = checksum_sum_u16_words(&[10, 0, 0, 1], sum);
        sum = checksum_sum_u16_words(&[10, 0, 0, 2], sum);
        sum += IPPROTO_TCP as u32;
        let expected = fold_sum(sum);

        let tcp_off = ETH_HEADER_LEN + 20;
        let seeded = u16::from_be_bytes([head[tcp_off + 16], head[tcp_off + 17]]);
        assert_eq!(seeded, expected);
    }

    #[test]
    fn preload_follows_vlan_tag() {
        let mut head = build_ipv4_tcp_head();
        // Insert an 802.1Q tag after the MAC addresses.
        head.splice(12..12, [0x81, 0x00, 0x00, 0x64]);
        let hdr_len = preload_tso_pseudo_csum(&mut head, None).unwrap();
        assert_eq!(hdr_len, ETH_HEADER_LEN + 4 + 20 + 20);
    }

    #[test]
    fn preload_rejects_non_tcp() {
        let mut head = build_ipv4_tcp_head();
        head[ETH_HEADER_LEN + 9] = 17; // UDP
        assert_eq!(
            preload_tso_pseudo_csum(&mut head, None),
            Err(TsoHeaderError::NotTcp(17))
        );
    }

    #[test]
    fn preload_uses_inner_offsets_when_encapsulated() {
        // Outer headers are opaque filler; inner frame starts at 50.
        let inner_l3 = 50usize;
        let mut head = vec![0u8; inner_l3];
        let inner = build_ipv4_tcp_head();
        head.extend_from_slice(&inner[ETH_HEADER_LEN..]);

        let offsets = InnerOffsets {
            l3_offset: inner_l3 as u16,
            l4_offset: (inner_l3 + 20) as u16,
        };
        let hdr_len = preload_tso_pseudo_csum(&mut head, Some(offsets)).unwrap();
        assert_eq!(hdr_len, inner_l3 + 20 + 20);

        let tcp_off = inner_l3 + 20;
        let seeded = u16::from_be_bytes([head[tcp_off + 16], head[tcp_off + 17]]);
        assert_ne!(seeded, 0);
    }
}
