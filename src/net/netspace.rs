//! A network namespace: one FIB, one neighbor cache, and the set of
//! interfaces attached to it. Most deployments only ever need a single
//! default namespace; this exists as a grouping so the namespace-scoped
//! state doesn't have to be threaded through as separate globals.

use std::net::Ipv6Addr;
use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::Receiver;

use crate::net::ethernet::MacAddress;
use crate::net::fib::{Fib, Route};
use crate::net::interface::Interface;
use crate::net::neighbour::{NeighbourCache, ProbeResponse};
use crate::net::packet::PacketPool;

const DEFAULT_NEIGHBOUR_TTL: Duration = Duration::from_secs(30);

/// What asking for a destination's link-layer address gets you: an
/// immediate answer from the cache, a receiver that fires once an
/// in-flight solicitation settles, or nothing at all when there's no
/// route to get there in the first place.
pub enum NextHopResolution {
    Resolved(MacAddress),
    Pending(Receiver<ProbeResponse>),
    Unreachable,
}

pub struct NetSpace {
    pub fib: Fib,
    pub neighbours: Arc<NeighbourCache>,
    pub interfaces: std::sync::RwLock<Vec<Arc<Interface>>>,
    /// The pool every interface attached to this namespace returns
    /// packets to once nothing further down the chain wants them.
    pub packet_pool: Arc<PacketPool>,
}

impl NetSpace {
    pub fn new() -> Self {
        Self::with_neighbour_ttl(DEFAULT_NEIGHBOUR_TTL)
    }

    pub fn with_neighbour_ttl(ttl: Duration) -> Self {
        Self {
            fib: Fib::new(),
            neighbours: Arc::new(NeighbourCache::new(ttl)),
            interfaces: std::sync::RwLock::new(Vec::new()),
            packet_pool: Arc::new(PacketPool::new()),
        }
    }

    /// Starts the neighbor cache's periodic staleness sweep on a
    /// background thread, swept every quarter of the configured TTL.
    pub fn spawn_neighbour_sweeper(&self, ttl: Duration) -> std::thread::JoinHandle<()> {
        self.neighbours.clone().spawn_sweeper(ttl / 4)
    }

    pub fn add_interface(&self, interface: Arc<Interface>) {
        self.interfaces.write().unwrap().push(interface);
    }

    pub fn remove_interface(&self, name: &str) {
        self.fib.remove_routes_via(name);
        self.interfaces.write().unwrap().retain(|i| i.name != name);
    }

    pub fn find_interface(&self, name: &str) -> Option<Arc<Interface>> {
        self.interfaces
            .read()
            .unwrap()
            .iter()
            .find(|i| i.name == name)
            .cloned()
    }

    /// Resolves the route that would carry a packet to `dst`: a plain
    /// FIB longest-prefix-match lookup, exposed on its own since some
    /// callers only need the outgoing interface/scope and not a
    /// link-layer address.
    pub fn get_next_hop(&self, dst: &Ipv6Addr) -> Option<Route> {
        self.fib.lookup(dst)
    }

    /// Resolves `dst`'s next-hop link-layer address: looks up the FIB
    /// route, picks the address that actually needs resolving (the
    /// route's gateway for a `Universe`-scoped route, `dst` itself when
    /// the destination is on-link), and either returns a cached MAC or
    /// kicks off a Neighbor Solicitation and hands back a receiver for
    /// the eventual [`ProbeResponse`].
    pub fn get_next_hop_mac_address(&self, dst: &Ipv6Addr) -> NextHopResolution {
        let route = match self.get_next_hop(dst) {
            Some(route) => route,
            None => return NextHopResolution::Unreachable,
        };
        let next_hop_ip = route.next_hop.unwrap_or(*dst);

        if let Some(entry) = self.neighbours.lookup(&next_hop_ip) {
            return NextHopResolution::Resolved(entry.mac);
        }

        let rx = self.neighbours.probe(next_hop_ip);
        crate::net::icmpv6::emit_neighbor_solicitation(
            &route.interface,
            next_hop_ip,
            &self.packet_pool,
        );
        NextHopResolution::Pending(rx)
    }

    /// Starts the background retry driver that re-solicits outstanding
    /// probes on a timer and fails the ones that have exhausted their
    /// retry budget (see [`NeighbourCache::spawn_retry_driver`]). The
    /// solicitation is re-emitted from whichever interface the FIB still
    /// routes the target through at retry time.
    pub fn spawn_neighbour_retry_driver(
        self: Arc<Self>,
        poll_interval: Duration,
    ) -> std::thread::JoinHandle<()> {
        let net_space = self;
        net_space
            .neighbours
            .clone()
            .spawn_retry_driver(poll_interval, move |ip| {
                if let Some(route) = net_space.fib.lookup(&ip) {
                    crate::net::icmpv6::emit_neighbor_solicitation(
                        &route.interface,
                        ip,
                        &net_space.packet_pool,
                    );
                }
            })
    }
}

impl Default for NetSpace {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_and_find_interface() {
        let space = NetSpace::new();
        space.add_interface(Arc::new(Interface::new(
            "eth0",
            [0u8; 6],
            Arc::new(NetSpace::new()),
        )));
        assert!(space.find_interface("eth0").is_some());
        assert!(space.find_interface("eth1").is_none());
    }

    #[test]
    fn remove_interface_drops_its_routes_too() {
        let space = NetSpace::new();
        let iface = Arc::new(Interface::new("eth0", [0u8; 6], Arc::new(NetSpace::new())));
        space.add_interface(iface.clone());
        space.fib.add_route(crate::net::fib::Route {
            prefix: "::".parse().unwrap(),
            prefix_len: 0,
            next_hop: None,
            interface: iface,
            weight: 0,
            scope: crate::net::fib::RouteScope::Universe,
        });
        space.remove_interface("eth0");
        assert!(space.find_interface("eth0").is_none());
        assert!(space.fib.lookup(&"::1".parse().unwrap()).is_none());
    }

    #[test]
    fn next_hop_mac_address_is_unreachable_with_no_matching_route() {
        let space = NetSpace::new();
        let resolution = space.get_next_hop_mac_address(&"2001:db8::1".parse().unwrap());
        assert!(matches!(resolution, NextHopResolution::Unreachable));
    }

    #[test]
    fn next_hop_mac_address_resolves_from_cache_when_already_known() {
        let space = NetSpace::new();
        let iface = Arc::new(Interface::new("eth0", [0u8; 6], Arc::new(NetSpace::new())));
        space.fib.add_route(crate::net::fib::Route {
            prefix: "fe80::".parse().unwrap(),
            prefix_len: 16,
            next_hop: None,
            interface: iface,
            weight: 0,
            scope: crate::net::fib::RouteScope::OnInterface,
        });
        let dst: Ipv6Addr = "fe80::42".parse().unwrap();
        space.neighbours.learn(dst, [7; 6]);

        let resolution = space.get_next_hop_mac_address(&dst);
        assert!(matches!(resolution, NextHopResolution::Resolved(mac) if mac == [7; 6]));
    }

    #[test]
    fn next_hop_mac_address_starts_a_probe_when_unknown() {
        let space = NetSpace::new();
        let iface = Arc::new(Interface::new("eth0", [0u8; 6], Arc::new(NetSpace::new())));
        space.fib.add_route(crate::net::fib::Route {
            prefix: "fe80::".parse().unwrap(),
            prefix_len: 16,
            next_hop: None,
            interface: iface,
            weight: 0,
            scope: crate::net::fib::RouteScope::OnInterface,
        });
        let dst: Ipv6Addr = "fe80::99".parse().unwrap();

        let resolution = space.get_next_hop_mac_address(&dst);
        assert!(matches!(resolution, NextHopResolution::Pending(_)));
    }
}
