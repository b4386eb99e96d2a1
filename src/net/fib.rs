//! Forwarding Information Base: a flat list of routes, longest-prefix
//! matched by comparing whole bytes of the masked prefix against the
//! destination, falling back to a root default route.

use std::net::Ipv6Addr;
use std::sync::RwLock;

use crate::net::interface::Interface;

/// How broadly a route's next hop applies, mirroring the three scopes
/// a forwarding rule can carry: confined to this host, reachable
/// directly off one interface with no further gateway, or requiring a
/// gateway to leave the local network entirely.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteScope {
    Local,
    OnInterface,
    Universe,
}

#[derive(Clone)]
pub struct Route {
    pub prefix: Ipv6Addr,
    pub prefix_len: u8,
    pub next_hop: Option<Ipv6Addr>,
    pub interface: std::sync::Arc<Interface>,
    /// Preference among routes that tie on prefix length; lower wins.
    /// Unused by [`Fib::lookup`]'s tie-break itself (which is
    /// first-installed-wins), but read by next-hop selection once
    /// multiple equally-specific routes would otherwise be ambiguous.
    pub weight: u32,
    pub scope: RouteScope,
}

/// Compares `addr` against `route`'s prefix over `route.prefix_len`
/// bits, byte at a time with a final partial-byte mask. Unmasked below
/// the prefix length (a route specifying a 20-bit prefix still compares
/// whole bytes for the first two octets and only masks the third), so a
/// misconfigured prefix that isn't byte-aligned quietly matches more
/// addresses than its length implies; routes are expected to be
/// installed with this in mind.
fn matches(route: &Route, addr: &Ipv6Addr) -> bool {
    let route_octets = route.prefix.octets();
    let addr_octets = addr.octets();
    let full_bytes = (route.prefix_len / 8) as usize;
    let rem_bits = route.prefix_len % 8;

    if route_octets[..full_bytes] != addr_octets[..full_bytes] {
        return false;
    }
    if rem_bits == 0 {
        return true;
    }
    let mask = 0xFFu8 << (8 - rem_bits);
    (route_octets[full_bytes] & mask) == (addr_octets[full_bytes] & mask)
}

pub struct Fib {
    routes: RwLock<Vec<Route>>,
}

impl Fib {
    pub fn new() -> Self {
        Self {
            routes: RwLock::new(Vec::new()),
        }
    }

    pub fn add_route(&self, route: Route) {
        self.routes.write().unwrap().push(route);
    }

    pub fn remove_routes_via(&self, interface_name: &str) {
        self.routes
            .write()
            .unwrap()
            .retain(|r| r.interface.name != interface_name);
    }

    /// Longest-prefix match over every installed route (a bounded
    /// linear scan: this service's route tables are small enough that a
    /// trie isn't worth the complexity). A `prefix_len == 0` route acts
    /// as the default and is only chosen when nothing more specific
    /// matches. Ties on `prefix_len` are broken in favor of whichever
    /// matching route was installed first, not whichever the scan
    /// happens to visit last.
    pub fn lookup(&self, dst: &Ipv6Addr) -> Option<Route> {
        let routes = self.routes.read().unwrap();
        let mut best: Option<&Route> = None;
        for route in routes.iter() {
            if !matches(route, dst) {
                continue;
            }
            match best {
                Some(b) if b.prefix_len >= route.prefix_len => {}
                _ => best = Some(route),
            }
        }
        best.cloned()
    }
}

impl Default for Fib {
    fn default() -> Self {
        Self::new()
    }
}
