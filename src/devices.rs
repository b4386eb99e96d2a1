//! Device registry (C4): tracks enumerated devices and hands out
//! sequential names per type, e.g. `blk0`, `blk1`, ...

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeviceType {
    Block,
    BlockPartition,
}

impl DeviceType {
    fn prefix(self) -> &'static str {
        match self {
            DeviceType::Block => "blk",
            DeviceType::BlockPartition => "blkp",
        }
    }
}

#[derive(Debug, Clone)]
pub struct Device {
    pub name: String,
    pub device_type: DeviceType,
    pub index: u32,
}

#[derive(Default)]
pub struct DeviceRegistry {
    counters: Mutex<HashMap<DeviceType, AtomicU32>>,
    devices: Mutex<Vec<Device>>,
}

impl DeviceRegistry {
    pub fn new() -> Self {
        Self {
            counters: Mutex::new(HashMap::new()),
            devices: Mutex::new(Vec::new()),
        }
    }

    /// Allocates the next sequential name for `device_type` and
    /// registers the device under it.
    pub fn register(&self, device_type: DeviceType) -> Device {
        let index = {
            let mut counters = self.counters.lock().unwrap();
            let counter = counters
                .entry(device_type)
                .or_insert_with(|| AtomicU32::new(0));
            counter.fetch_add(1, Ordering::SeqCst)
        };
        let device = Device {
            name: format!("{}{index}", device_type.prefix()),
            device_type,
            index,
        };
        self.devices.lock().unwrap().push(device.clone());
        device
    }

    pub fn get(&self, name: &str) -> Option<Device> {
        self.devices
            .lock()
            .unwrap()
            .iter()
            .find(|d| d.name == name)
            .cloned()
    }

    pub fn all(&self) -> Vec<Device> {
        self.devices.lock().unwrap().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_increment_per_type() {
        let reg = DeviceRegistry::new();
        let a = reg.register(DeviceType::Block);
        let b = reg.register(DeviceType::Block);
        let c = reg.register(DeviceType::BlockPartition);
        assert_eq!(a.name, "blk0");
        assert_eq!(b.name, "blk1");
        assert_eq!(c.name, "blkp0");
        assert_eq!(reg.all().len(), 3);
        assert_eq!(reg.get("blk1").unwrap().index, 1);
    }
}
