//! Virtio constants and on-the-wire layouts this driver hand-rolls
//! because they aren't covered by the `virtio-spec` crate (block device
//! config space) or because this driver talks to a plain mapped byte
//! buffer rather than a live MMIO pointer (the split virtqueue ring
//! structs).
//!
//! Device status, device id, and feature-bit representations are taken
//! directly from `virtio_spec` rather than redefined here.

pub use virtio_spec::{DeviceStatus, Id as DeviceId, F};
use zerocopy::{AsBytes, FromBytes, FromZeroes};

/// MMIO common-config register offsets (Virtio 1.2 §4.2.2).
pub mod mmio_offset {
    pub const MAGIC_VALUE: usize = 0x000;
    pub const VERSION: usize = 0x004;
    pub const DEVICE_ID: usize = 0x008;
    pub const VENDOR_ID: usize = 0x00c;
    pub const DEVICE_FEATURES: usize = 0x010;
    pub const DEVICE_FEATURES_SEL: usize = 0x014;
    pub const DRIVER_FEATURES: usize = 0x020;
    pub const DRIVER_FEATURES_SEL: usize = 0x024;
    pub const QUEUE_SEL: usize = 0x030;
    pub const QUEUE_NUM_MAX: usize = 0x034;
    pub const QUEUE_NUM: usize = 0x038;
    pub const QUEUE_READY: usize = 0x044;
    pub const QUEUE_NOTIFY: usize = 0x050;
    pub const INTERRUPT_STATUS: usize = 0x060;
    pub const INTERRUPT_ACK: usize = 0x064;
    pub const STATUS: usize = 0x070;
    pub const QUEUE_DESC_LOW: usize = 0x080;
    pub const QUEUE_DESC_HIGH: usize = 0x084;
    pub const QUEUE_DRIVER_LOW: usize = 0x090;
    pub const QUEUE_DRIVER_HIGH: usize = 0x094;
    pub const QUEUE_DEVICE_LOW: usize = 0x0a0;
    pub const QUEUE_DEVICE_HIGH: usize = 0x0a4;
    pub const CONFIG_GENERATION: usize = 0x0fc;
    pub const CONFIG: usize = 0x100;
}

pub const MAGIC_VALUE: u32 = 0x7472_6976;
pub const SUPPORTED_VERSION: u32 = 2;

/// Virtio block feature bits (Virtio 1.2 §5.2.3), not carried by
/// `virtio_spec::F` since those are transport-generic.
pub mod blk_feature {
    pub const SIZE_MAX: u64 = 1 << 1;
    pub const SEG_MAX: u64 = 1 << 2;
    pub const GEOMETRY: u64 = 1 << 4;
    pub const RO: u64 = 1 << 5;
    pub const BLK_SIZE: u64 = 1 << 6;
    pub const FLUSH: u64 = 1 << 9;
    pub const TOPOLOGY: u64 = 1 << 10;
    pub const CONFIG_WCE: u64 = 1 << 11;
    pub const DISCARD: u64 = 1 << 13;
}

/// Virtio block request type values (Virtio 1.2 §5.2.6.1).
pub mod blk_req_type {
    pub const IN: u32 = 0;
    pub const OUT: u32 = 1;
    pub const FLUSH: u32 = 4;
    pub const GET_ID: u32 = 8;
    pub const WRITE_ZEROES: u32 = 13;
}

pub const BLK_SECTOR_SIZE: u64 = 512;
pub const BLK_STATUS_OK: u8 = 0;
pub const BLK_STATUS_IOERR: u8 = 1;
pub const BLK_STATUS_UNSUPP: u8 = 2;

/// Virtio block device configuration space (Virtio 1.2 §5.2.4). Only the
/// fields this driver reads are laid out; trailing fields gated by
/// unnegotiated feature bits are left unread.
#[derive(Copy, Clone, Debug, Default, FromBytes, FromZeroes, AsBytes)]
#[repr(C)]
pub struct VirtioBlkConfig {
    pub capacity: u64,
    pub size_max: u32,
    pub seg_max: u32,
    pub cylinders: u16,
    pub heads: u8,
    pub sectors: u8,
    pub blk_size: u32,
    pub physical_block_exp: u8,
    pub alignment_offset: u8,
    pub min_io_size: u16,
    pub opt_io_size: u32,
}

/// Per-request header prefixed to the data buffer in a virtio block
/// request (Virtio 1.2 §5.2.6.2).
#[derive(Copy, Clone, Debug, Default, FromBytes, FromZeroes, AsBytes)]
#[repr(C)]
pub struct VirtioBlkReqHeader {
    pub req_type: u32,
    pub reserved: u32,
    pub sector: u64,
}

/// Split virtqueue descriptor (Virtio 1.2 §2.7.5).
#[derive(Copy, Clone, Debug, Default, FromBytes, FromZeroes, AsBytes)]
#[repr(C)]
pub struct VirtqDesc {
    pub addr: u64,
    pub len: u32,
    pub flags: u16,
    pub next: u16,
}

bitflags::bitflags! {
    #[derive(Default)]
    pub struct DescFlags: u16 {
        const NEXT = 1;
        const WRITE = 2;
        const INDIRECT = 4;
    }
}

/// Split virtqueue available-ring header (the `ring[]`/`used_event`
/// trailer is addressed separately since its length is queue-size
/// dependent).
#[derive(Copy, Clone, Debug, Default, FromBytes, FromZeroes, AsBytes)]
#[repr(C)]
pub struct VirtqAvailHeader {
    pub flags: u16,
    pub idx: u16,
}

/// Split virtqueue used-ring element (Virtio 1.2 §2.7.8).
#[derive(Copy, Clone, Debug, Default, FromBytes, FromZeroes, AsBytes)]
#[repr(C)]
pub struct VirtqUsedElem {
    pub id: u32,
    pub len: u32,
}

#[derive(Copy, Clone, Debug, Default, FromBytes, FromZeroes, AsBytes)]
#[repr(C)]
pub struct VirtqUsedHeader {
    pub flags: u16,
    pub idx: u16,
}
