//! IPv6 header parsing (RFC 8200) and the RX dispatch that forwards to
//! ICMPv6. IPv4 is represented only as a header accessor stub; actual
//! IPv4 handling is out of scope.

use crate::net::handler::ProtocolIdentifier;
use crate::net::hooks::{run_ipv6_rx_hooks, HookAction};
use crate::net::packet::{append_handled_by_current_offset, Packet, PacketPool};

pub const IPV6_MIN_HEADER_SIZE: usize = 40;

pub const IPPROTO_ICMP: u8 = 0x01;
pub const IPPROTO_ICMPV6: u8 = 0x3A;
pub const IPPROTO_TCP: u8 = 0x06;
pub const IPPROTO_UDP: u8 = 0x11;

const EXT_HOP_BY_HOP: u8 = 0;
const EXT_ROUTING: u8 = 43;
const EXT_FRAGMENT: u8 = 44;
const EXT_DEST_OPTION: u8 = 60;
const EXT_NO_NEXT_HEADER: u8 = 59;

/// A read/write view of an IPv6 header plus extension chain over a byte
/// buffer.
pub struct IPv6Header<'a> {
    buf: &'a mut [u8],
}

impl<'a> IPv6Header<'a> {
    pub fn new(buf: &'a mut [u8]) -> Self {
        Self { buf }
    }

    pub fn version(&self) -> u8 {
        self.buf[0] >> 4
    }

    pub fn set_version(&mut self) {
        self.buf[0] = (self.buf[0] & 0x0F) | 0x60;
    }

    pub fn traffic_class(&self) -> u8 {
        (u16::from_be_bytes([self.buf[0], self.buf[1]]) >> 4) as u8
    }

    pub fn set_traffic_class(&mut self, tc: u8) {
        self.buf[0] = (self.buf[0] & 0xF0) | (tc >> 4);
        self.buf[1] = (tc << 4) | (self.buf[1] & 0x0F);
    }

    pub fn flow_label(&self) -> u32 {
        u32::from_be_bytes(self.buf[0..4].try_into().unwrap()) & 0x000F_FFFF
    }

    pub fn payload_length(&self) -> u16 {
        u16::from_be_bytes(self.buf[4..6].try_into().unwrap())
    }

    pub fn set_payload_length(&mut self, len: u16) {
        self.buf[4..6].copy_from_slice(&len.to_be_bytes());
    }

    pub fn next_header(&self) -> u8 {
        self.buf[6]
    }

    pub fn set_next_header(&mut self, nh: u8) {
        self.buf[6] = nh;
    }

    pub fn hop_limit(&self) -> u8 {
        self.buf[7]
    }

    pub fn set_hop_limit(&mut self, hl: u8) {
        self.buf[7] = hl;
    }

    pub fn src_address(&self) -> [u8; 16] {
        self.buf[8..24].try_into().unwrap()
    }

    pub fn set_src_address(&mut self, ip: [u8; 16]) {
        self.buf[8..24].copy_from_slice(&ip);
    }

    pub fn dst_address(&self) -> [u8; 16] {
        self.buf[24..40].try_into().unwrap()
    }

    pub fn set_dst_address(&mut self, ip: [u8; 16]) {
        self.buf[24..40].copy_from_slice(&ip);
    }

    /// Walks the extension header chain to find where the upper-layer
    /// payload starts, per RFC 8200 §4: each extension header's second
    /// byte is its length in 8-octet units, not counting the first 8
    /// octets, so the header's total size is `(ext_len + 1) * 8`. The
    /// reference implementation instead advanced by
    /// `header[curoff + header[curoff+1]]`, a double-indirection bug
    /// that reads a length byte from the wrong position entirely.
    pub fn payload_offset(&self) -> usize {
        let mut cur_next_header = self.next_header();
        let mut cur_offset = IPV6_MIN_HEADER_SIZE;

        for _ in 0..12 {
            match cur_next_header {
                EXT_HOP_BY_HOP | EXT_ROUTING | EXT_DEST_OPTION => {
                    if cur_offset + 1 >= self.buf.len() {
                        return IPV6_MIN_HEADER_SIZE;
                    }
                    let ext_len = self.buf[cur_offset + 1] as usize;
                    cur_next_header = self.buf[cur_offset];
                    cur_offset += (ext_len + 1) * 8;
                }
                EXT_FRAGMENT => {
                    cur_next_header = self.buf[cur_offset];
                    cur_offset += 8;
                }
                EXT_NO_NEXT_HEADER => return self.buf.len(),
                _ => return cur_offset,
            }
        }

        IPV6_MIN_HEADER_SIZE
    }
}

pub fn multicast_mac_from_ip(ip: &[u8; 16]) -> [u8; 6] {
    [0x33, 0x33, ip[12], ip[13], ip[14], ip[15]]
}

/// Derives the solicited-node multicast address for `ip` (RFC 4291
/// §2.7.1): `ff02::1:ffXX:XXXX` formed from the prefix `ff02::1:ff00:0`
/// plus the address's low 24 bits.
pub fn solicited_node_multicast_from_ip(ip: std::net::Ipv6Addr) -> std::net::Ipv6Addr {
    let octets = ip.octets();
    let mut result = [0u8; 16];
    result[0] = 0xff;
    result[1] = 0x02;
    result[11] = 0x01;
    result[12] = 0xff;
    result[13] = octets[13];
    result[14] = octets[14];
    result[15] = octets[15];
    std::net::Ipv6Addr::from(result)
}

pub fn handle_ipv6_packet(mut packet: Packet, pool: &PacketPool) {
    append_handled_by_current_offset(&mut packet, ProtocolIdentifier::IPv6);

    let (next_header, payload_offset, dst) = {
        let header = IPv6Header::new(&mut packet.frame[packet.offset..packet.end]);
        (
            header.next_header(),
            header.payload_offset(),
            header.dst_address(),
        )
    };
    packet.advance(payload_offset);

    match run_ipv6_rx_hooks(&mut packet) {
        HookAction::Drop => {
            pool.drop_packet(packet);
            return;
        }
        HookAction::Forward(Some(iface)) => {
            iface.transmit(packet);
            return;
        }
        HookAction::Forward(None) | HookAction::Noop => {}
    }

    let dst_ip = std::net::IpAddr::V6(std::net::Ipv6Addr::from(dst));
    let is_for_us = packet
        .src_device
        .as_ref()
        .map(|d| d.owns_address(&dst_ip))
        .unwrap_or(true);

    if !is_for_us {
        if let Some(dev) = packet.src_device.as_ref() {
            dev.statistics.inc_dropped();
        }
        pool.drop_packet(packet);
        return;
    }

    match next_header {
        IPPROTO_ICMPV6 => crate::net::icmpv6::handle_icmpv6_packet(packet, pool),
        _ => {
            if let Some(dev) = packet.src_device.as_ref() {
                dev.statistics.inc_dropped();
            }
            pool.drop_packet(packet);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_header() -> Vec<u8> {
        let mut buf = vec![0u8; 128];
        let mut h = IPv6Header::new(&mut buf);
        h.set_version();
        h.set_next_header(IPPROTO_ICMPV6);
        h.set_hop_limit(64);
        h.set_src_address([0xfe, 0x80, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 1]);
        h.set_dst_address([0xff, 0x02, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 1]);
        buf
    }

    #[test]
    fn version_and_addresses_roundtrip() {
        let mut buf = base_header();
        let h = IPv6Header::new(&mut buf);
        assert_eq!(h.version(), 6);
        assert_eq!(h.hop_limit(), 64);
        assert_eq!(h.next_header(), IPPROTO_ICMPV6);
        assert_eq!(h.dst_address()[0], 0xff);
    }

    #[test]
    fn no_extension_headers_payload_at_min_size() {
        let mut buf = base_header();
        let h = IPv6Header::new(&mut buf);
        assert_eq!(h.payload_offset(), IPV6_MIN_HEADER_SIZE);
    }

    #[test]
    fn single_hop_by_hop_extension_advances_by_rfc8200_formula() {
        let mut buf = base_header();
        {
            let mut h = IPv6Header::new(&mut buf);
            h.set_next_header(EXT_HOP_BY_HOP);
        }
        // extension header at offset 40: next_header=ICMPv6, ext_len=1
        // (meaning total size (1+1)*8 = 16 bytes)
        buf[40] = IPPROTO_ICMPV6;
        buf[41] = 1;

        let h = IPv6Header::new(&mut buf);
        assert_eq!(h.payload_offset(), IPV6_MIN_HEADER_SIZE + 16);
    }

    #[test]
    fn fragment_extension_is_always_eight_bytes() {
        let mut buf = base_header();
        {
            let mut h = IPv6Header::new(&mut buf);
            h.set_next_header(EXT_FRAGMENT);
        }
        buf[40] = IPPROTO_ICMPV6;
        let h = IPv6Header::new(&mut buf);
        assert_eq!(h.payload_offset(), IPV6_MIN_HEADER_SIZE + 8);
    }

    #[test]
    fn multicast_mac_uses_last_four_octets() {
        let ip = [0xff, 0x02, 0, 0, 0, 0, 0, 0, 0, 0, 0, 1, 0xAA, 0xBB, 0xCC, 0xDD];
        assert_eq!(
            multicast_mac_from_ip(&ip),
            [0x33, 0x33, 0xAA, 0xBB, 0xCC, 0xDD]
        );
    }

    #[test]
    fn solicited_node_multicast_matches_rfc4291_example() {
        let ip: std::net::Ipv6Addr = "2001:db8::2aa:ff:fe28:9c5a".parse().unwrap();
        assert_eq!(
            solicited_node_multicast_from_ip(ip),
            "ff02::1:ff28:9c5a".parse::<std::net::Ipv6Addr>().unwrap()
        );
    }

    #[test]
    fn handle_ipv6_packet_without_src_device_returns_frame_to_pool() {
        let pool = crate::net::packet::PacketPool::new();
        let buf = base_header();
        let packet = pool.get_packet(&buf);
        handle_ipv6_packet(packet, &pool);
        let _ = pool.get_packet(&buf);
    }
}
