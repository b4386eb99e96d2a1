//! The syscall-facing boundary between this service and the host
//! microkernel.
//!
//! Real device enumeration, MMIO mapping, physical-address translation,
//! and futex wait/wake all cross this boundary. It is deliberately out
//! of scope to implement the real syscall transport; [`Syscalls`] models
//! the surface the rest of the crate needs and [`SimulatedSyscalls`]
//! backs it with an in-memory device table for testing.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SyscallError {
    #[error("no such device index {0}")]
    NoSuchDevice(u32),
    #[error("no such device property {0:?}")]
    NoSuchProperty(String),
    #[error("memory map failed for region at physical address {0:#x}")]
    MemMapFailed(u64),
}

/// Static information the host reports about an enumerated device.
#[derive(Debug, Clone)]
pub struct DeviceInfo {
    pub compatible: String,
    pub phys_addr: u64,
    pub irq: u32,
    pub properties: HashMap<String, String>,
}

/// The syscall surface this crate depends on from the host.
pub trait Syscalls: Send + Sync {
    fn device_count(&self) -> u32;
    fn device_info(&self, index: u32) -> Result<DeviceInfo, SyscallError>;
    fn device_property(&self, index: u32, key: &str) -> Result<String, SyscallError>;
    /// Maps `len` bytes at host physical address `phys_addr` into this
    /// process's address space, returning the owned mapping.
    fn mem_map(&self, phys_addr: u64, len: usize) -> Result<Vec<u8>, SyscallError>;
    fn dev_phys_addr(&self, index: u32) -> Result<u64, SyscallError>;
    fn page_size(&self) -> usize;
    fn dev_irq_ack(&self, irq: u32);
    fn futex_wait(&self, word: &std::sync::atomic::AtomicU64, expected: u64, timeout: Duration);
    fn futex_wake(&self, word: &std::sync::atomic::AtomicU64);
}

/// An in-memory stand-in used by tests and by [`crate::discover`] when no
/// real host adapter is wired in.
pub struct SimulatedSyscalls {
    devices: Mutex<Vec<DeviceInfo>>,
}

impl SimulatedSyscalls {
    pub fn new() -> Self {
        Self {
            devices: Mutex::new(Vec::new()),
        }
    }

    pub fn with_devices(devices: Vec<DeviceInfo>) -> Self {
        Self {
            devices: Mutex::new(devices),
        }
    }

    pub fn register_device(&self, info: DeviceInfo) {
        self.devices.lock().unwrap().push(info);
    }
}

impl Default for SimulatedSyscalls {
    fn default() -> Self {
        Self::new()
    }
}

impl Syscalls for SimulatedSyscalls {
    fn device_count(&self) -> u32 {
        self.devices.lock().unwrap().len() as u32
    }

    fn device_info(&self, index: u32) -> Result<DeviceInfo, SyscallError> {
        self.devices
            .lock()
            .unwrap()
            .get(index as usize)
            .cloned()
            .ok_or(SyscallError::NoSuchDevice(index))
    }

    fn device_property(&self, index: u32, key: &str) -> Result<String, SyscallError> {
        let devices = self.devices.lock().unwrap();
        let dev = devices
            .get(index as usize)
            .ok_or(SyscallError::NoSuchDevice(index))?;
        dev.properties
            .get(key)
            .cloned()
            .ok_or_else(|| SyscallError::NoSuchProperty(key.to_string()))
    }

    fn mem_map(&self, phys_addr: u64, len: usize) -> Result<Vec<u8>, SyscallError> {
        if phys_addr == 0 {
            return Err(SyscallError::MemMapFailed(phys_addr));
        }
        Ok(vec![0u8; len])
    }

    fn dev_phys_addr(&self, index: u32) -> Result<u64, SyscallError> {
        self.devices
            .lock()
            .unwrap()
            .get(index as usize)
            .map(|d| d.phys_addr)
            .ok_or(SyscallError::NoSuchDevice(index))
    }

    fn page_size(&self) -> usize {
        4096
    }

    fn dev_irq_ack(&self, _irq: u32) {}

    fn futex_wait(&self, _word: &std::sync::atomic::AtomicU64, _expected: u64, timeout: Duration) {
        std::thread::park_timeout(timeout);
    }

    fn futex_wake(&self, _word: &std::sync::atomic::AtomicU64) {}
}
