//! Virtio core infrastructure: transport negotiation, the split
//! virtqueue engine, and the block device binding built on top of them.

pub mod blk;
pub mod error;
pub mod spec;
pub mod transport;
pub mod virtqueue;

pub use blk::VirtioBlkDriver;
