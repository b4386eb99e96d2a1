//! Network fast path: Ethernet/802.1Q framing in, IPv6 extension-header
//! walking, ICMPv6/NDP handling, and the FIB + neighbor cache that
//! back forwarding decisions.

pub mod arp;
pub mod checksum;
pub mod dot1q;
pub mod ethernet;
pub mod fib;
pub mod handler;
pub mod hooks;
pub mod icmpv6;
pub mod interface;
pub mod ip;
pub mod neighbour;
pub mod netspace;
pub mod packet;
#[cfg(feature = "worker-pool")]
pub mod workers;
