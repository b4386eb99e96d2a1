//! driverd: a user-space block device and IPv6 neighbor-discovery fast path
//! service.
//!
//! The crate is organized the way a small driver stack is organized: a
//! syscall-facing adapter at the bottom, device/driver registries above
//! it, the virtio-blk driver and partition layer built on those, and an
//! independent network fast path (FIB, neighbor cache, protocol codecs)
//! that shares only the packet pool and hook chain with the block side.

pub mod config;
pub mod contiguous;
pub mod devices;
pub mod discover;
pub mod drivers;
pub mod error;
pub mod fs;
pub mod logging;
pub mod net;
pub mod partition;
pub mod ring;
pub mod syscalls;

pub use error::DriverdError;
