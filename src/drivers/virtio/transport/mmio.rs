//! Virtio-over-MMIO transport: register access and the device
//! negotiation state machine (Virtio 1.2 §3.1, §4.2.1).
//!
//! The host hands us an owned mapping of the device's register page
//! (via [`crate::syscalls::Syscalls::mem_map`]) rather than a live
//! pointer into physical memory, so register access here is a set of
//! little-endian read/write helpers over that buffer instead of the
//! `volatile`-backed accessor pattern used against real MMIO.

use crate::drivers::virtio::error::VirtioError;
use crate::drivers::virtio::spec::{mmio_offset as off, DeviceId, DeviceStatus, MAGIC_VALUE};

pub struct MmioTransport {
    regs: Vec<u8>,
}

impl MmioTransport {
    pub fn new(regs: Vec<u8>) -> Self {
        Self { regs }
    }

    fn read32(&self, offset: usize) -> u32 {
        u32::from_le_bytes(self.regs[offset..offset + 4].try_into().unwrap())
    }

    fn write32(&mut self, offset: usize, value: u32) {
        self.regs[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
    }

    pub fn magic_value(&self) -> u32 {
        self.read32(off::MAGIC_VALUE)
    }

    pub fn version(&self) -> u32 {
        self.read32(off::VERSION)
    }

    pub fn device_id(&self) -> u32 {
        self.read32(off::DEVICE_ID)
    }

    pub fn status(&self) -> DeviceStatus {
        DeviceStatus::from_bits_truncate(self.read32(off::STATUS) as u8)
    }

    pub fn set_status(&mut self, status: DeviceStatus) {
        self.write32(off::STATUS, status.bits() as u32);
    }

    fn add_status(&mut self, bit: DeviceStatus) {
        let current = self.status();
        self.set_status(current | bit);
    }

    pub fn reset(&mut self) {
        self.write32(off::STATUS, 0);
    }

    /// Reads the device's full 64-bit feature bitmap, one 32-bit window
    /// at a time via `DeviceFeaturesSel`.
    pub fn device_features(&mut self) -> u64 {
        self.write32(off::DEVICE_FEATURES_SEL, 0);
        let low = self.read32(off::DEVICE_FEATURES) as u64;
        self.write32(off::DEVICE_FEATURES_SEL, 1);
        let high = self.read32(off::DEVICE_FEATURES) as u64;
        (high << 32) | low
    }

    pub fn set_driver_features(&mut self, features: u64) {
        self.write32(off::DRIVER_FEATURES_SEL, 0);
        self.write32(off::DRIVER_FEATURES, features as u32);
        self.write32(off::DRIVER_FEATURES_SEL, 1);
        self.write32(off::DRIVER_FEATURES, (features >> 32) as u32);
    }

    pub fn select_queue(&mut self, queue: u16) {
        self.write32(off::QUEUE_SEL, queue as u32);
    }

    pub fn queue_num_max(&self) -> u16 {
        self.read32(off::QUEUE_NUM_MAX) as u16
    }

    pub fn set_queue_num(&mut self, size: u16) {
        self.write32(off::QUEUE_NUM, size as u32);
    }

    pub fn set_queue_addrs(&mut self, desc: u64, driver: u64, device: u64) {
        self.write32(off::QUEUE_DESC_LOW, desc as u32);
        self.write32(off::QUEUE_DESC_HIGH, (desc >> 32) as u32);
        self.write32(off::QUEUE_DRIVER_LOW, driver as u32);
        self.write32(off::QUEUE_DRIVER_HIGH, (driver >> 32) as u32);
        self.write32(off::QUEUE_DEVICE_LOW, device as u32);
        self.write32(off::QUEUE_DEVICE_HIGH, (device >> 32) as u32);
    }

    pub fn set_queue_ready(&mut self, ready: bool) {
        self.write32(off::QUEUE_READY, ready as u32);
    }

    pub fn queue_ready(&self) -> bool {
        self.read32(off::QUEUE_READY) != 0
    }

    pub fn notify_queue(&mut self, queue: u16) {
        self.write32(off::QUEUE_NOTIFY, queue as u32);
    }

    pub fn interrupt_status(&self) -> u32 {
        self.read32(off::INTERRUPT_STATUS)
    }

    pub fn ack_interrupt(&mut self, mask: u32) {
        self.write32(off::INTERRUPT_ACK, mask);
    }

    pub fn config_generation(&self) -> u32 {
        self.read32(off::CONFIG_GENERATION)
    }

    pub fn config_space(&self) -> &[u8] {
        &self.regs[off::CONFIG..]
    }

    /// Runs the full device initialization sequence (Virtio 1.2 §3.1.1),
    /// negotiating `wanted_features` down to whatever subset both sides
    /// support and accept, returning the negotiated feature set.
    pub fn negotiate(
        &mut self,
        expected_device_id: DeviceId,
        wanted_features: u64,
        required_features: u64,
    ) -> Result<u64, VirtioError> {
        if self.magic_value() != MAGIC_VALUE {
            return Err(VirtioError::BadMagic(self.magic_value()));
        }
        if self.version() != 2 {
            return Err(VirtioError::UnsupportedVersion(self.version()));
        }
        let id = self.device_id();
        if id != expected_device_id as u32 {
            return Err(VirtioError::DevNotSupported(expected_device_id));
        }

        self.reset();
        self.add_status(DeviceStatus::ACKNOWLEDGE);
        self.add_status(DeviceStatus::DRIVER);

        let device_features = self.device_features();
        let negotiated = device_features & wanted_features;
        if required_features & !negotiated != 0 {
            return Err(VirtioError::MissingRequiredFeature(
                required_features & !negotiated,
            ));
        }
        self.set_driver_features(negotiated);

        self.add_status(DeviceStatus::FEATURES_OK);
        if !self.status().contains(DeviceStatus::FEATURES_OK) {
            return Err(VirtioError::FeaturesNotAccepted);
        }

        Ok(negotiated)
    }

    /// Marks the device as fully initialized and ready to process
    /// requests. Call after all queues have been set up.
    pub fn driver_ok(&mut self) {
        self.add_status(DeviceStatus::DRIVER_OK);
    }

    pub fn set_failed(&mut self) {
        self.add_status(DeviceStatus::FAILED);
    }
}
