//! Packet pool (C9): reusable fixed-size frame buffers plus the
//! append-only "handled by" protocol/offset log each receive path
//! builds up as it walks down through encapsulation layers.
//!
//! The reference implementation derives each layer's offset from
//! `cap(Frame) - cap(Payload)`, a trick that relies on Go slices never
//! shrinking capacity when resliced. Rust slices have no such
//! guarantee (and `&mut [u8]` reslicing drops the discarded prefix
//! entirely), so the offset is tracked explicitly here instead.

use std::sync::Arc;

use crossbeam_channel::{bounded, Receiver, Sender};

use crate::net::handler::ProtocolIdentifier;
use crate::net::interface::Interface;

pub const FRAME_SIZE: usize = 1500;
const POOL_SIZE: usize = 256;

/// A frame buffer in flight, plus the bookkeeping the receive path
/// needs to hand off between layers.
pub struct Packet {
    pub frame: Vec<u8>,
    /// Byte offset into `frame` where the current layer's payload view
    /// starts.
    pub offset: usize,
    /// Byte offset into `frame` where the current layer's payload view
    /// ends (exclusive). Starts at `frame.len()`.
    pub end: usize,
    pub handled_by: Vec<(ProtocolIdentifier, usize)>,
    pub src_device: Option<Arc<Interface>>,
}

impl Packet {
    fn new() -> Self {
        Self {
            frame: vec![0u8; FRAME_SIZE],
            offset: 0,
            end: 0,
            handled_by: Vec::new(),
            src_device: None,
        }
    }

    /// The current layer's view of the buffer.
    pub fn payload(&self) -> &[u8] {
        &self.frame[self.offset..self.end]
    }

    pub fn payload_mut(&mut self) -> &mut [u8] {
        &mut self.frame[self.offset..self.end]
    }

    /// Advances the current view's start by `delta` bytes, the
    /// equivalent of `p.Payload = p.Payload[delta:]`.
    pub fn advance(&mut self, delta: usize) {
        self.offset = (self.offset + delta).min(self.end);
    }

    fn reset(&mut self, len: usize) {
        self.offset = 0;
        self.end = len;
        self.handled_by.clear();
        self.src_device = None;
    }
}

/// Records that `proto` handled the packet starting at the buffer
/// offset the packet is currently positioned at.
pub fn append_handled_by_current_offset(packet: &mut Packet, proto: ProtocolIdentifier) {
    let offset = packet.offset;
    packet.handled_by.push((proto, offset));
}

/// Records that `proto` handled the packet at an explicit buffer
/// offset (used when a layer dispatches before advancing its own view,
/// e.g. Ethernet recording itself before slicing past the header).
pub fn append_handled_by_at_offset(packet: &mut Packet, proto: ProtocolIdentifier, offset: usize) {
    packet.handled_by.push((proto, offset));
}

/// Looks up the buffer offset at which `proto` took over, if it did.
pub fn offset_of_handler(packet: &Packet, proto: ProtocolIdentifier) -> Option<usize> {
    packet
        .handled_by
        .iter()
        .find(|(p, _)| *p == proto)
        .map(|(_, offset)| *offset)
}

/// Pool of reusable [`Packet`] buffers, avoiding an allocation per
/// received frame on the hot path.
pub struct PacketPool {
    free_tx: Sender<Packet>,
    free_rx: Receiver<Packet>,
}

impl PacketPool {
    pub fn new() -> Self {
        let (free_tx, free_rx) = bounded(POOL_SIZE);
        for _ in 0..POOL_SIZE {
            let _ = free_tx.send(Packet::new());
        }
        Self { free_tx, free_rx }
    }

    /// Gets a packet from the pool (allocating fresh if the pool is
    /// momentarily exhausted) and fills it with `data`.
    pub fn get_packet(&self, data: &[u8]) -> Packet {
        let mut packet = self.free_rx.try_recv().unwrap_or_else(|_| Packet::new());
        let len = data.len().min(packet.frame.len());
        packet.frame[..len].copy_from_slice(&data[..len]);
        packet.reset(len);
        packet
    }

    /// Returns a packet to the pool once every handler is done with it.
    pub fn drop_packet(&self, packet: Packet) {
        let _ = self.free_tx.send(packet);
    }
}

impl Default for PacketPool {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn get_packet_fills_frame_and_resets_state() {
        let pool = PacketPool::new();
        let mut p = pool.get_packet(b"hello");
        assert_eq!(p.payload(), b"hello");
        append_handled_by_current_offset(&mut p, ProtocolIdentifier::Ethernet);
        p.advance(2);
        assert_eq!(p.payload(), b"llo");
        pool.drop_packet(p);

        let p2 = pool.get_packet(b"world!");
        assert_eq!(p2.payload(), b"world!");
        assert!(p2.handled_by.is_empty());
    }

    #[test]
    fn handled_by_log_is_append_only_and_queryable() {
        let pool = PacketPool::new();
        let mut p = pool.get_packet(b"0123456789");
        append_handled_by_current_offset(&mut p, ProtocolIdentifier::Ethernet);
        p.advance(14);
        append_handled_by_current_offset(&mut p, ProtocolIdentifier::IPv6);
        assert_eq!(
            offset_of_handler(&p, ProtocolIdentifier::Ethernet),
            Some(0)
        );
        assert_eq!(offset_of_handler(&p, ProtocolIdentifier::IPv6), Some(10));
        assert_eq!(offset_of_handler(&p, ProtocolIdentifier::Arp), None);
    }

    #[test]
    fn pool_survives_exhaustion_by_allocating_fresh() {
        let pool = PacketPool::new();
        let mut taken = Vec::new();
        for _ in 0..(POOL_SIZE + 5) {
            taken.push(pool.get_packet(b"x"));
        }
        assert_eq!(taken.len(), POOL_SIZE + 5);
    }
}
