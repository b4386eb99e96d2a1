use thiserror::Error;

#[derive(Debug, Error)]
pub enum VirtioError {
    #[error("bad magic value {0:#x} at MMIO device base")]
    BadMagic(u32),

    #[error("unsupported virtio MMIO version {0}")]
    UnsupportedVersion(u32),

    #[error("device id {0:?} not supported by this driver")]
    DevNotSupported(crate::drivers::virtio::spec::DeviceId),

    #[error("device rejected FEATURES_OK after feature negotiation")]
    FeaturesNotAccepted,

    #[error("device does not support required feature bit {0}")]
    MissingRequiredFeature(u64),

    #[error("queue {0} not available on device (max size 0)")]
    QueueUnavailable(u16),

    #[error("requested queue size {requested} exceeds device max {max}")]
    QueueSizeTooLarge { requested: u16, max: u16 },

    #[error("virtqueue is full, no free descriptors")]
    QueueFull,

    #[error("descriptor chain exceeds queue size")]
    ChainTooLong,

    #[error("device signalled DEVICE_NEEDS_RESET")]
    DeviceNeedsReset,
}
