//! Pluggable per-layer RX hooks: a hook observes (and may redirect or
//! drop) a packet before its layer's normal dispatch runs.

use std::sync::{Arc, RwLock};

use crate::net::interface::Interface;
use crate::net::packet::Packet;

#[derive(Clone)]
pub enum HookAction {
    Noop,
    Drop,
    Forward(Option<Arc<Interface>>),
}

pub type HookFn = Arc<dyn Fn(&mut Packet) -> HookAction + Send + Sync>;

#[derive(Default)]
struct HookChain {
    hooks: RwLock<Vec<HookFn>>,
}

impl HookChain {
    fn run(&self, packet: &mut Packet) -> HookAction {
        for hook in self.hooks.read().unwrap().iter() {
            match hook(packet) {
                HookAction::Noop => continue,
                other => return other,
            }
        }
        HookAction::Noop
    }

    fn register(&self, hook: HookFn) {
        self.hooks.write().unwrap().push(hook);
    }
}

static ETHERNET_RX_HOOKS: std::sync::OnceLock<HookChain> = std::sync::OnceLock::new();
static IPV6_RX_HOOKS: std::sync::OnceLock<HookChain> = std::sync::OnceLock::new();

fn ethernet_chain() -> &'static HookChain {
    ETHERNET_RX_HOOKS.get_or_init(HookChain::default)
}

fn ipv6_chain() -> &'static HookChain {
    IPV6_RX_HOOKS.get_or_init(HookChain::default)
}

pub fn register_ethernet_rx_hook(hook: HookFn) {
    ethernet_chain().register(hook);
}

pub fn register_ipv6_rx_hook(hook: HookFn) {
    ipv6_chain().register(hook);
}

pub fn run_ethernet_rx_hooks(packet: &mut Packet) -> HookAction {
    ethernet_chain().run(packet)
}

pub fn run_ipv6_rx_hooks(packet: &mut Packet) -> HookAction {
    ipv6_chain().run(packet)
}

/// Wraps `hook` so it runs before `next`, short-circuiting on the first
/// non-`Noop` result.
pub fn chain_before(hook: HookFn, next: HookFn) -> HookFn {
    Arc::new(move |packet: &mut Packet| match hook(packet) {
        HookAction::Noop => next(packet),
        other => other,
    })
}

/// Wraps `hook` so it runs after `prev`, short-circuiting on the first
/// non-`Noop` result.
pub fn chain_after(prev: HookFn, hook: HookFn) -> HookFn {
    chain_before(prev, hook)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn chain_before_short_circuits_on_drop() {
        let second_calls = Arc::new(AtomicUsize::new(0));
        let second_calls_clone = second_calls.clone();

        let first: HookFn = Arc::new(|_p| HookAction::Drop);
        let second: HookFn = Arc::new(move |_p| {
            second_calls_clone.fetch_add(1, Ordering::SeqCst);
            HookAction::Noop
        });

        let chained = chain_before(first, second);
        // build a minimal packet via the pool to exercise the real type
        let pool = crate::net::packet::PacketPool::new();
        let mut packet = pool.get_packet(b"x");
        let action = chained(&mut packet);
        assert!(matches!(action, HookAction::Drop));
        assert_eq!(second_calls.load(Ordering::SeqCst), 0);
    }
}
