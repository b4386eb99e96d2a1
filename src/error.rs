//! Crate-wide error type, composed from each subsystem's own error enum.

use thiserror::Error;

use crate::drivers::virtio::error::VirtioError;
use crate::drivers::BlockError;
use crate::partition::PartitionError;
use crate::syscalls::SyscallError;

#[derive(Debug, Error)]
pub enum DriverdError {
    #[error("syscall adapter error: {0}")]
    Syscall(#[from] SyscallError),

    #[error("virtio driver error: {0}")]
    Virtio(#[from] VirtioError),

    #[error("block I/O error: {0}")]
    Block(#[from] BlockError),

    #[error("partition layer error: {0}")]
    Partition(#[from] PartitionError),

    #[error("no driver registered for compatible string {0:?}")]
    NoDriverFor(String),

    #[error("device {0} not found")]
    DeviceNotFound(u32),
}
