//! Ethernet II framing, including 802.1Q tag handling, and the RX
//! dispatch that hands payloads off to ARP/IPv6.

use crate::net::dot1q::Dot1Q;
use crate::net::handler::ProtocolIdentifier;
use crate::net::hooks::{run_ethernet_rx_hooks, HookAction};
use crate::net::packet::{append_handled_by_current_offset, Packet, PacketPool};

pub type MacAddress = [u8; 6];

pub const ETHERTYPE_IPV4: u16 = 0x0800;
pub const ETHERTYPE_ARP: u16 = 0x0806;
pub const ETHERTYPE_DOT1Q: u16 = 0x8100;
pub const ETHERTYPE_IPV6: u16 = 0x86DD;

pub const UNTAGGED_HEADER_LEN: usize = 14;
pub const TAGGED_HEADER_LEN: usize = 18;

pub const BROADCAST_MAC: MacAddress = [0xff; 6];

/// A read/write view of an Ethernet II frame over a byte buffer.
pub struct Ethernet<'a> {
    frame: &'a mut [u8],
}

impl<'a> Ethernet<'a> {
    pub fn new(frame: &'a mut [u8]) -> Self {
        Self { frame }
    }

    pub fn dst_mac(&self) -> MacAddress {
        self.frame[0..6].try_into().unwrap()
    }

    pub fn set_dst_mac(&mut self, mac: MacAddress) {
        self.frame[0..6].copy_from_slice(&mac);
    }

    pub fn src_mac(&self) -> MacAddress {
        self.frame[6..12].try_into().unwrap()
    }

    pub fn set_src_mac(&mut self, mac: MacAddress) {
        self.frame[6..12].copy_from_slice(&mac);
    }

    fn tpid(&self) -> u16 {
        u16::from_be_bytes(self.frame[12..14].try_into().unwrap())
    }

    pub fn is_dot1q(&self) -> bool {
        self.tpid() == ETHERTYPE_DOT1Q
    }

    pub fn dot1q(&self) -> Option<Dot1Q> {
        if !self.is_dot1q() {
            return None;
        }
        Some(Dot1Q(u16::from_be_bytes(
            self.frame[14..16].try_into().unwrap(),
        )))
    }

    pub fn set_dot1q(&mut self, tag: Dot1Q, inner_ethertype: u16) {
        self.frame[12..14].copy_from_slice(&ETHERTYPE_DOT1Q.to_be_bytes());
        self.frame[14..16].copy_from_slice(&tag.0.to_be_bytes());
        self.frame[16..18].copy_from_slice(&inner_ethertype.to_be_bytes());
    }

    /// The effective EtherType: the inner type for a tagged frame, or
    /// the plain field for an untagged one.
    pub fn ether_type(&self) -> u16 {
        if self.is_dot1q() {
            u16::from_be_bytes(self.frame[16..18].try_into().unwrap())
        } else {
            self.tpid()
        }
    }

    pub fn set_ether_type(&mut self, ether_type: u16) {
        if self.is_dot1q() {
            self.frame[16..18].copy_from_slice(&ether_type.to_be_bytes());
        } else {
            self.frame[12..14].copy_from_slice(&ether_type.to_be_bytes());
        }
    }

    pub fn header_len(&self) -> usize {
        if self.is_dot1q() {
            TAGGED_HEADER_LEN
        } else {
            UNTAGGED_HEADER_LEN
        }
    }

    pub fn payload(&self) -> &[u8] {
        &self.frame[self.header_len()..]
    }

    /// Writes `data` as the frame's payload, after the header (tagged
    /// or not). The reference's version was missing the early return
    /// on the untagged branch, so a tagged frame's payload got written
    /// twice (once at the tagged offset, once again at the untagged
    /// one); this writes exactly once, at whichever offset
    /// `header_len()` reports.
    pub fn set_payload(&mut self, data: &[u8]) {
        let header_len = self.header_len();
        let end = (header_len + data.len()).min(self.frame.len());
        self.frame[header_len..end].copy_from_slice(&data[..end - header_len]);
    }
}

/// Dispatches a received Ethernet frame: records the handler, runs the
/// RX hook chain, then forwards to ARP or IPv6 by EtherType. Every path
/// through this function ends by either handing the packet to the next
/// protocol handler or returning it to `pool` exactly once.
pub fn handle_ethernet_frame(mut packet: Packet, pool: &PacketPool) {
    append_handled_by_current_offset(&mut packet, ProtocolIdentifier::Ethernet);

    let header_len;
    let ether_type;
    {
        let eth = Ethernet::new(&mut packet.frame[packet.offset..packet.end]);
        header_len = eth.header_len();
        ether_type = eth.ether_type();
    }

    match run_ethernet_rx_hooks(&mut packet) {
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

    packet.advance(header_len);

    match ether_type {
        ETHERTYPE_ARP => crate::net::arp::handle_arp_packet(packet, pool),
        ETHERTYPE_IPV6 => crate::net::ip::handle_ipv6_packet(packet, pool),
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

    #[test]
    fn untagged_roundtrip() {
        let mut buf = vec![0u8; 64];
        {
            let mut eth = Ethernet::new(&mut buf);
            eth.set_dst_mac([1, 2, 3, 4, 5, 6]);
            eth.set_src_mac([6, 5, 4, 3, 2, 1]);
            eth.set_ether_type(ETHERTYPE_IPV6);
            eth.set_payload(b"hello-world");
        }
        let eth = Ethernet::new(&mut buf);
        assert_eq!(eth.dst_mac(), [1, 2, 3, 4, 5, 6]);
        assert_eq!(eth.src_mac(), [6, 5, 4, 3, 2, 1]);
        assert_eq!(eth.ether_type(), ETHERTYPE_IPV6);
        assert!(!eth.is_dot1q());
        assert_eq!(&eth.payload()[..11], b"hello-world");
    }

    #[test]
    fn tagged_roundtrip_writes_payload_once() {
        let mut buf = vec![0xAAu8; 64];
        {
            let mut eth = Ethernet::new(&mut buf);
            eth.set_dot1q(Dot1Q::new(3, false, 100), ETHERTYPE_IPV6);
            eth.set_payload(b"tagged-body");
        }
        let eth = Ethernet::new(&mut buf);
        assert!(eth.is_dot1q());
        assert_eq!(eth.header_len(), TAGGED_HEADER_LEN);
        assert_eq!(eth.ether_type(), ETHERTYPE_IPV6);
        assert_eq!(eth.dot1q().unwrap().vlan_id(), 100);
        assert_eq!(&eth.payload()[..11], b"tagged-body");
    }

    #[test]
    fn unknown_ether_type_returns_frame_to_pool() {
        let pool = crate::net::packet::PacketPool::new();
        let mut buf = vec![0u8; 64];
        {
            let mut eth = Ethernet::new(&mut buf);
            eth.set_ether_type(0x1234);
        }
        let packet = pool.get_packet(&buf);
        handle_ethernet_frame(packet, &pool);
        let _ = pool.get_packet(&buf);
    }

}
