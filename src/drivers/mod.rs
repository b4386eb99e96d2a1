//! Block I/O data model (C4 shared types) and the driver registry (C5).

pub mod virtio;

use std::collections::HashMap;
use std::sync::Mutex;

use thiserror::Error;

use crate::error::DriverdError;
use crate::syscalls::{DeviceInfo, Syscalls};

/// Direction of a block I/O request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IORequestType {
    Read,
    Write,
    Flush,
    Trim,
}

/// Outcomes a block driver reports distinct from a transport-level
/// failure: the request itself was rejected, or the device answered
/// with something other than success.
#[derive(Debug, Error)]
pub enum BlockError {
    #[error("request sector {sector} is misaligned for block size {block_size}")]
    ReqMisaligned { sector: u64, block_size: u32 },

    #[error("request sector {sector} + count {count} exceeds device capacity of {capacity} sectors")]
    ReqOutOfBounds { sector: u64, count: u32, capacity: u64 },

    #[error("device reported an I/O error servicing the request")]
    IOError,

    #[error("device does not support the requested operation")]
    OperationNotSupported,

    #[error("device returned an unrecognized status byte {0:#04x}")]
    UnknownResponse(u8),
}

/// A single block I/O request, addressed by LBA sector and sector count.
#[derive(Debug, Clone)]
pub struct IORequest {
    pub request_type: IORequestType,
    pub sector: u64,
    pub sector_count: u32,
    pub data: Vec<u8>,
}

/// The outcome of an [`IORequest`] once a driver has serviced it.
#[derive(Debug, Clone)]
pub struct IOResponse {
    pub ok: bool,
    pub data: Vec<u8>,
}

/// Anything that can accept and service block I/O requests: a raw
/// device, or a [`crate::partition::Partition`] wrapping one.
pub trait BlockQueuer: Send + Sync {
    fn enqueue(&self, request: IORequest) -> Result<IOResponse, DriverdError>;
    fn block_size(&self) -> u32;
    fn sector_count(&self) -> u64;
}

/// A driver's entry point: given the host's [`DeviceInfo`] for a probed
/// device, attempt to bind and return a queuer for it.
pub type BlockInitFn =
    fn(&DeviceInfo, &dyn Syscalls) -> Result<Box<dyn BlockQueuer>, DriverdError>;

/// Maps a device's `compatible` string to the driver that can bind it.
#[derive(Default)]
pub struct DriverRegistry {
    drivers: Mutex<HashMap<String, BlockInitFn>>,
}

impl DriverRegistry {
    pub fn new() -> Self {
        Self {
            drivers: Mutex::new(HashMap::new()),
        }
    }

    pub fn register_driver(&self, compatible: &str, init: BlockInitFn) {
        self.drivers
            .lock()
            .unwrap()
            .insert(compatible.to_string(), init);
    }

    pub fn find_device_driver(&self, compatible: &str) -> Option<BlockInitFn> {
        self.drivers.lock().unwrap().get(compatible).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::syscalls::SyscallError;

    fn fake_init(_info: &DeviceInfo, _sys: &dyn Syscalls) -> Result<Box<dyn BlockQueuer>, DriverdError> {
        Err(DriverdError::Syscall(SyscallError::NoSuchDevice(0)))
    }

    #[test]
    fn register_and_find() {
        let reg = DriverRegistry::new();
        reg.register_driver("virtio,block", fake_init);
        assert!(reg.find_device_driver("virtio,block").is_some());
        assert!(reg.find_device_driver("virtio,net").is_none());
    }
}
