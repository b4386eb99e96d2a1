//! Protocol identifiers used both to dispatch a frame to its handler and
//! to stamp the packet's handled-by log (`Packet::append_handled_by`).

use crate::net::packet::Packet;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProtocolIdentifier {
    Ethernet,
    Dot1Q,
    Arp,
    IPv4,
    IPv6,
    ICMPv6,
    Other(u16),
}

pub type ProtocolHandler = fn(&mut Packet);
