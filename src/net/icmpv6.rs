//! ICMPv6 (RFC 4443) header plus the Neighbor Discovery Protocol (RFC
//! 4861) message types this service's fast path cares about: Neighbor
//! Solicitation/Advertisement and Router Solicitation/Advertisement.

use std::sync::Arc;

use crate::net::checksum::{checksum16_ones_complement, ipv6_pseudo_header};
use crate::net::handler::ProtocolIdentifier;
use crate::net::interface::{Interface, InterfaceCapabilities};
use crate::net::ip::{
    multicast_mac_from_ip, solicited_node_multicast_from_ip, IPv6Header, IPPROTO_ICMPV6,
    IPV6_MIN_HEADER_SIZE,
};
use crate::net::packet::{append_handled_by_current_offset, Packet, PacketPool};

pub const TYPE_ROUTER_SOLICITATION: u8 = 133;
pub const TYPE_ROUTER_ADVERTISEMENT: u8 = 134;
pub const TYPE_NEIGHBOR_SOLICITATION: u8 = 135;
pub const TYPE_NEIGHBOR_ADVERTISEMENT: u8 = 136;
pub const TYPE_REDIRECT: u8 = 137;

pub const NDP_OPT_SOURCE_LINK_LAYER_ADDR: u8 = 1;
pub const NDP_OPT_TARGET_LINK_LAYER_ADDR: u8 = 2;

bitflags::bitflags! {
    pub struct NaFlags: u8 {
        const ROUTER = 0b1000_0000;
        const SOLICITED = 0b0100_0000;
        const OVERRIDE = 0b0010_0000;
    }
}

/// ICMPv6 fixed header: type(1) code(1) checksum(2).
pub struct Icmpv6Header<'a> {
    buf: &'a mut [u8],
}

impl<'a> Icmpv6Header<'a> {
    pub fn new(buf: &'a mut [u8]) -> Self {
        Self { buf }
    }

    pub fn icmp_type(&self) -> u8 {
        self.buf[0]
    }

    pub fn set_icmp_type(&mut self, t: u8) {
        self.buf[0] = t;
    }

    pub fn code(&self) -> u8 {
        self.buf[1]
    }

    pub fn set_code(&mut self, code: u8) {
        self.buf[1] = code;
    }

    pub fn checksum(&self) -> u16 {
        u16::from_be_bytes(self.buf[2..4].try_into().unwrap())
    }

    /// Writes the checksum in network byte order. The reference wrote
    /// this field little-endian, which every conformant peer reading
    /// the packet off the wire would checksum-validate incorrectly;
    /// fixed to big-endian here (RFC 4443 mandates the standard
    /// Internet checksum, always transmitted big-endian).
    pub fn set_checksum(&mut self, checksum: u16) {
        self.buf[2..4].copy_from_slice(&checksum.to_be_bytes());
    }

    /// Computes and stores the checksum over the pseudo-header + this
    /// message, unless the interface advertises IPv6 checksum offload
    /// (in which case the device computes it and this is skipped).
    pub fn finalize_checksum(
        &mut self,
        src: [u8; 16],
        dst: [u8; 16],
        offload: bool,
    ) {
        if offload {
            return;
        }
        self.set_checksum(0);
        let pseudo = ipv6_pseudo_header(&src, &dst, self.buf.len() as u32, IPPROTO_ICMPV6);
        let mut data = pseudo;
        data.extend_from_slice(self.buf);
        let sum = checksum16_ones_complement(&data);
        self.set_checksum(sum);
    }
}

/// Walks the options trailing a fixed NDP message body, yielding
/// `(option_type, option_data)` where `option_data` is the full
/// `(length * 8) - 2` bytes following the type/length pair.
pub fn ndp_options(body: &[u8]) -> Vec<(u8, &[u8])> {
    let mut options = Vec::new();
    let mut offset = 0;
    while offset + 2 <= body.len() {
        let opt_type = body[offset];
        let length_units = body[offset + 1] as usize;
        if length_units == 0 {
            break;
        }
        let total_len = length_units * 8;
        if offset + total_len > body.len() {
            break;
        }
        options.push((opt_type, &body[offset + 2..offset + total_len]));
        offset += total_len;
    }
    options
}

/// Reads a Source/Target Link-Layer Address option's address field.
/// The reference read this at byte offset 2 into the option but wrote
/// it at offset 3 (the write path was never symmetric with the read
/// path); both read and write use offset 2 here.
pub fn link_layer_address(option_data: &[u8]) -> Option<[u8; 6]> {
    option_data.get(0..6)?.try_into().ok()
}

pub fn write_link_layer_address_option(buf: &mut [u8], opt_type: u8, mac: [u8; 6]) {
    buf[0] = opt_type;
    buf[1] = 1; // length in 8-byte units: 1 (type+len) + 6 (addr) padded to 8
    buf[2..8].copy_from_slice(&mac);
}

/// Neighbor Solicitation body: reserved(4) + target_address(16).
pub struct NeighborSolicitation<'a> {
    buf: &'a [u8],
}

impl<'a> NeighborSolicitation<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf }
    }

    pub fn target_address(&self) -> [u8; 16] {
        self.buf[4..20].try_into().unwrap()
    }

    pub fn options(&self) -> Vec<(u8, &[u8])> {
        ndp_options(&self.buf[20..])
    }
}

/// Neighbor Advertisement body: flags(1) + reserved(3) +
/// target_address(16).
pub struct NeighborAdvertisement<'a> {
    buf: &'a [u8],
}

impl<'a> NeighborAdvertisement<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf }
    }

    pub fn flags(&self) -> NaFlags {
        NaFlags::from_bits_truncate(self.buf[0])
    }

    pub fn target_address(&self) -> [u8; 16] {
        self.buf[4..20].try_into().unwrap()
    }

    pub fn options(&self) -> Vec<(u8, &[u8])> {
        ndp_options(&self.buf[20..])
    }
}

pub fn handle_icmpv6_packet(mut packet: Packet, pool: &PacketPool) {
    append_handled_by_current_offset(&mut packet, ProtocolIdentifier::ICMPv6);

    if packet.payload().len() < 4 {
        if let Some(dev) = packet.src_device.as_ref() {
            dev.statistics.inc_dropped();
        }
        pool.drop_packet(packet);
        return;
    }

    let icmp_type = packet.payload()[0];
    let body = packet.payload()[4..].to_vec();

    match icmp_type {
        TYPE_NEIGHBOR_SOLICITATION => {
            let ns = NeighborSolicitation::new(&body);
            let target = ns.target_address();
            let sender_mac = ns
                .options()
                .into_iter()
                .find(|(t, _)| *t == NDP_OPT_SOURCE_LINK_LAYER_ADDR)
                .and_then(|(_, data)| link_layer_address(data));

            if let (Some(net_space), Some(mac)) = (
                packet.src_device.as_ref().map(|d| d.net_space.clone()),
                sender_mac,
            ) {
                net_space
                    .neighbours
                    .learn(std::net::Ipv6Addr::from(target), mac);
            }
        }
        TYPE_NEIGHBOR_ADVERTISEMENT => {
            let na = NeighborAdvertisement::new(&body);
            // Only a solicited advertisement answers an outstanding
            // probe; an unsolicited (gratuitous) one still updates the
            // cache but never completes a waiter. The reference's `|`
            // based check made this condition always true; using `&`
            // restores the intended distinction.
            let solicited = na.flags().contains(NaFlags::SOLICITED);
            let target = na.target_address();
            let mac = na
                .options()
                .into_iter()
                .find(|(t, _)| *t == NDP_OPT_TARGET_LINK_LAYER_ADDR)
                .and_then(|(_, data)| link_layer_address(data));

            if let (Some(net_space), Some(mac)) = (
                packet.src_device.as_ref().map(|d| d.net_space.clone()),
                mac,
            ) {
                let ip = std::net::Ipv6Addr::from(target);
                net_space.neighbours.learn(ip, mac);
                if solicited {
                    net_space.neighbours.complete_probe(ip, mac);
                }
            }
        }
        TYPE_ROUTER_SOLICITATION | TYPE_ROUTER_ADVERTISEMENT | TYPE_REDIRECT => {
            // Router discovery and redirects are outside this service's
            // scope beyond recording that ICMPv6 handled the packet.
        }
        _ => {
            if let Some(dev) = packet.src_device.as_ref() {
                dev.statistics.inc_dropped();
            }
        }
    }

    pool.drop_packet(packet);
}

/// Builds and transmits a Neighbor Solicitation for `target` out of
/// `iface`, addressed to `target`'s solicited-node multicast group
/// (RFC 4861 §4.3, §7.2.1) with `iface`'s link-layer address attached as
/// a Source Link-Layer Address option.
pub fn emit_neighbor_solicitation(iface: &Arc<Interface>, target: std::net::Ipv6Addr, pool: &PacketPool) {
    use crate::net::ethernet::{Ethernet, ETHERTYPE_IPV6, UNTAGGED_HEADER_LEN};

    const NS_BODY_LEN: usize = 4 + 16 + 8; // reserved+target, then one SLLA option
    let ip_start = UNTAGGED_HEADER_LEN;
    let icmp_start = ip_start + IPV6_MIN_HEADER_SIZE;
    let total_len = icmp_start + 4 + NS_BODY_LEN;

    let src = match iface.preferred_source_address() {
        Some(std::net::IpAddr::V6(v6)) => v6,
        _ => return,
    };

    let dst = solicited_node_multicast_from_ip(target);
    let mut packet = pool.get_packet(&vec![0u8; total_len]);
    packet.src_device = Some(iface.clone());

    {
        let mut ip_header =
            IPv6Header::new(&mut packet.frame[ip_start..ip_start + IPV6_MIN_HEADER_SIZE]);
        ip_header.set_version();
        ip_header.set_next_header(IPPROTO_ICMPV6);
        ip_header.set_hop_limit(255);
        ip_header.set_payload_length((4 + NS_BODY_LEN) as u16);
        ip_header.set_src_address(src.octets());
        ip_header.set_dst_address(dst.octets());
    }

    {
        // icmp_buf[0..4] is the fixed type/code/checksum header, then
        // the NS body: reserved(4) + target(16) + options.
        let icmp_buf = &mut packet.frame[icmp_start..icmp_start + 4 + NS_BODY_LEN];
        icmp_buf[8..24].copy_from_slice(&target.octets());
        write_link_layer_address_option(
            &mut icmp_buf[24..32],
            NDP_OPT_SOURCE_LINK_LAYER_ADDR,
            iface.mac,
        );
    }

    let offload = iface
        .capabilities
        .contains(InterfaceCapabilities::IPV6_CSUM_OFFLOAD);
    {
        let mut icmp_header =
            Icmpv6Header::new(&mut packet.frame[icmp_start..icmp_start + 4 + NS_BODY_LEN]);
        icmp_header.set_icmp_type(TYPE_NEIGHBOR_SOLICITATION);
        icmp_header.set_code(0);
        icmp_header.finalize_checksum(src.octets(), dst.octets(), offload);
    }

    {
        let mut eth = Ethernet::new(&mut packet.frame[..total_len]);
        eth.set_dst_mac(multicast_mac_from_ip(&dst.octets()));
        eth.set_src_mac(iface.mac);
        eth.set_ether_type(ETHERTYPE_IPV6);
    }

    packet.offset = 0;
    packet.end = total_len;
    iface.transmit(packet);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn checksum_is_written_big_endian() {
        let mut buf = vec![0u8; 8];
        let mut h = Icmpv6Header::new(&mut buf);
        h.set_checksum(0x1234);
        assert_eq!(&buf[2..4], &[0x12, 0x34]);
    }

    #[test]
    fn link_layer_address_option_roundtrips_at_offset_two() {
        let mut buf = vec![0u8; 8];
        write_link_layer_address_option(&mut buf, NDP_OPT_SOURCE_LINK_LAYER_ADDR, [1, 2, 3, 4, 5, 6]);
        assert_eq!(buf[0], NDP_OPT_SOURCE_LINK_LAYER_ADDR);
        assert_eq!(buf[1], 1);
        assert_eq!(link_layer_address(&buf[2..]).unwrap(), [1, 2, 3, 4, 5, 6]);
    }

    #[test]
    fn ndp_options_walks_multiple_entries() {
        let mut body = vec![0u8; 16];
        write_link_layer_address_option(&mut body[0..8], NDP_OPT_SOURCE_LINK_LAYER_ADDR, [1; 6]);
        write_link_layer_address_option(&mut body[8..16], NDP_OPT_TARGET_LINK_LAYER_ADDR, [2; 6]);

        let options = ndp_options(&body);
        assert_eq!(options.len(), 2);
        assert_eq!(options[0].0, NDP_OPT_SOURCE_LINK_LAYER_ADDR);
        assert_eq!(options[1].0, NDP_OPT_TARGET_LINK_LAYER_ADDR);
    }

    #[test]
    fn na_solicited_flag_is_tested_with_and() {
        let mut buf = vec![0u8; 20];
        buf[0] = NaFlags::SOLICITED.bits() | NaFlags::ROUTER.bits();
        let na = NeighborAdvertisement::new(&buf);
        assert!(na.flags().contains(NaFlags::SOLICITED));
        assert!(na.flags().contains(NaFlags::ROUTER));
        assert!(!na.flags().contains(NaFlags::OVERRIDE));
    }

    #[test]
    fn handle_icmpv6_packet_returns_frame_to_pool() {
        let pool = PacketPool::new();
        let packet = pool.get_packet(&[0u8; 8]);
        handle_icmpv6_packet(packet, &pool);
        let _ = pool.get_packet(&[0u8; 8]);
    }

    #[test]
    fn emit_neighbor_solicitation_builds_solicited_node_multicast_frame() {
        use crate::net::ethernet::{Ethernet, ETHERTYPE_IPV6, UNTAGGED_HEADER_LEN};
        use crate::net::interface::{InterfaceIp, IpFlags};
        use crate::net::netspace::NetSpace;
        use std::sync::{Arc, Mutex};

        let pool = PacketPool::new();
        let net_space = Arc::new(NetSpace::new());
        let iface = Arc::new(Interface::new("eth0", [2, 2, 2, 2, 2, 2], net_space.clone()));
        let src: std::net::Ipv6Addr = "fe80::1".parse().unwrap();
        iface.ip_addrs.write().unwrap().push(InterfaceIp {
            ip: std::net::IpAddr::V6(src),
            flags: IpFlags::STATIC,
        });

        let captured: Arc<Mutex<Option<Vec<u8>>>> = Arc::new(Mutex::new(None));
        iface.set_tx_handler(Arc::new(CapturingHandler {
            captured: captured.clone(),
        }));

        let target: std::net::Ipv6Addr = "2001:db8::2aa:ff:fe28:9c5a".parse().unwrap();
        emit_neighbor_solicitation(&iface, target, &pool);

        let frame = captured.lock().unwrap().take().expect("frame captured");
        let eth = Ethernet::new(&mut frame.clone());
        assert_eq!(eth.ether_type(), ETHERTYPE_IPV6);
        assert_eq!(
            eth.dst_mac(),
            multicast_mac_from_ip(&solicited_node_multicast_from_ip(target).octets())
        );

        let ip_start = UNTAGGED_HEADER_LEN;
        let mut ip_buf = frame[ip_start..ip_start + IPV6_MIN_HEADER_SIZE].to_vec();
        let ip_header = IPv6Header::new(&mut ip_buf);
        assert_eq!(ip_header.hop_limit(), 255);
        assert_eq!(
            std::net::Ipv6Addr::from(ip_header.dst_address()),
            solicited_node_multicast_from_ip(target)
        );

        let icmp_start = ip_start + IPV6_MIN_HEADER_SIZE;
        assert_eq!(frame[icmp_start], TYPE_NEIGHBOR_SOLICITATION);
        let ns = NeighborSolicitation::new(&frame[icmp_start + 4..]);
        assert_eq!(std::net::Ipv6Addr::from(ns.target_address()), target);
    }

    struct CapturingHandler {
        captured: std::sync::Arc<std::sync::Mutex<Option<Vec<u8>>>>,
    }

    impl crate::net::interface::InterfaceHandlers for CapturingHandler {
        fn enqueue(&self, packet: Packet) {
            *self.captured.lock().unwrap() = Some(packet.frame[packet.offset..packet.end].to_vec());
        }
    }
}
