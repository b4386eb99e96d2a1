//! Device discovery orchestrator (C8): enumerates devices through the
//! syscall adapter, binds each one via the driver registry, and
//! registers any partitions found on block devices as sub-devices.

use std::sync::Arc;

use crate::devices::{DeviceRegistry, DeviceType};
use crate::drivers::virtio::VirtioBlkDriver;
use crate::drivers::{BlockQueuer, DriverRegistry};
use crate::error::DriverdError;
use crate::partition::{identify_partition_table, Partition};
use crate::syscalls::Syscalls;

pub struct DiscoveredDevice {
    pub name: String,
    pub queuer: Arc<dyn BlockQueuer>,
}

fn default_driver_registry() -> DriverRegistry {
    let registry = DriverRegistry::new();
    registry.register_driver("virtio,mmio", VirtioBlkDriver::init);
    registry
}

/// Enumerates every device the host reports, binds a driver for each
/// recognized `compatible` string, and expands any partition tables
/// found into their own named sub-devices.
pub fn discover_devices(syscalls: &dyn Syscalls) -> Result<Vec<DiscoveredDevice>, DriverdError> {
    let driver_registry = default_driver_registry();
    let device_registry = DeviceRegistry::new();
    let mut discovered = Vec::new();

    for index in 0..syscalls.device_count() {
        let info = syscalls.device_info(index)?;
        let Some(init) = driver_registry.find_device_driver(&info.compatible) else {
            continue;
        };

        let queuer: Arc<dyn BlockQueuer> = Arc::from(init(&info, syscalls)?);
        let device = device_registry.register(DeviceType::Block);
        discovered.push(DiscoveredDevice {
            name: device.name.clone(),
            queuer: queuer.clone(),
        });

        let partitions = identify_partition_table(queuer.as_ref())?;
        for entry in partitions {
            let partition_device = device_registry.register(DeviceType::BlockPartition);
            let partition = Arc::new(Partition::new(
                queuer.clone(),
                entry.start_lba,
                entry.sector_count,
            ));
            discovered.push(DiscoveredDevice {
                name: partition_device.name,
                queuer: partition,
            });
        }
    }

    Ok(discovered)
}
