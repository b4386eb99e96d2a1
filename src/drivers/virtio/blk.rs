//! The virtio-blk device binding: negotiates the device, sets up a
//! single request virtqueue, and implements [`BlockQueuer`] by
//! submitting request headers + data + status descriptor chains and
//! letting a dedicated completion worker drain the used ring.
//!
//! Descriptor `addr` fields are meant to carry host-physical addresses
//! the device DMAs through; this crate has no real physical-memory
//! story (see [`crate::syscalls::Syscalls::mem_map`]), so they carry the
//! address of this process's own request buffers instead, kept alive in
//! [`Inner::pending`] until the matching used-ring entry is reaped. A
//! real deployment resolves the true physical address through
//! `DEV_PHY_ADDR` before handing it to the device.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, Sender};

use crate::drivers::virtio::error::VirtioError;
use crate::drivers::virtio::spec::{
    blk_req_type, DeviceId, VirtioBlkConfig, VirtioBlkReqHeader, BLK_SECTOR_SIZE, BLK_STATUS_IOERR,
    BLK_STATUS_OK, BLK_STATUS_UNSUPP,
};
use crate::drivers::virtio::transport::MmioTransport;
use crate::drivers::virtio::virtqueue::SplitVirtqueue;
use crate::drivers::{BlockError, BlockQueuer, IORequest, IORequestType, IOResponse};
use crate::error::DriverdError;
use crate::syscalls::{DeviceInfo, Syscalls};
use zerocopy::FromBytes;

const QUEUE_INDEX: u16 = 0;
const COMPLETION_POLL_INTERVAL: Duration = Duration::from_micros(100);

struct PendingRequest {
    data: Vec<u8>,
    status: Vec<u8>,
    request_type: IORequestType,
    completion: Sender<Result<IOResponse, DriverdError>>,
}

struct Inner {
    transport: Mutex<MmioTransport>,
    queue: Mutex<SplitVirtqueue>,
    pending: Mutex<HashMap<u16, PendingRequest>>,
    block_size: u32,
    capacity_sectors: u64,
    running: AtomicBool,
}

/// Drains the used ring and routes each completion to the waiter that
/// submitted it, rather than discarding it whenever the popped head
/// doesn't belong to whichever caller happens to be polling.
fn run_completion_worker(inner: Arc<Inner>) {
    while inner.running.load(Ordering::Acquire) {
        let popped = { inner.queue.lock().unwrap().pop_used() };
        let Some((done_head, _len)) = popped else {
            std::thread::sleep(COMPLETION_POLL_INTERVAL);
            continue;
        };
        inner.queue.lock().unwrap().free_chain(done_head);
        let Some(req) = inner.pending.lock().unwrap().remove(&done_head) else {
            continue;
        };
        let status_byte = req.status.first().copied().unwrap_or(0xff);
        let result = match status_byte {
            BLK_STATUS_OK => Ok(IOResponse {
                ok: true,
                data: match req.request_type {
                    IORequestType::Read => req.data,
                    _ => Vec::new(),
                },
            }),
            BLK_STATUS_IOERR => Err(DriverdError::Block(BlockError::IOError)),
            BLK_STATUS_UNSUPP => Err(DriverdError::Block(BlockError::OperationNotSupported)),
            other => Err(DriverdError::Block(BlockError::UnknownResponse(other))),
        };
        let _ = req.completion.send(result);
    }
}

pub struct VirtioBlkDriver {
    inner: Arc<Inner>,
    worker: Option<JoinHandle<()>>,
}

impl VirtioBlkDriver {
    /// Negotiates a virtio-blk device over MMIO, sets up its single
    /// request queue, and spawns the background thread that drives
    /// completions off the used ring.
    pub fn bind(mut transport: MmioTransport, queue_size: u16) -> Result<Self, VirtioError> {
        let wanted = crate::drivers::virtio::spec::blk_feature::BLK_SIZE
            | crate::drivers::virtio::spec::blk_feature::FLUSH;
        transport.negotiate(DeviceId::Block, wanted, 0)?;

        transport.select_queue(QUEUE_INDEX);
        let max = transport.queue_num_max();
        if max == 0 {
            return Err(VirtioError::QueueUnavailable(QUEUE_INDEX));
        }
        let size = queue_size.min(max);
        if queue_size > max {
            return Err(VirtioError::QueueSizeTooLarge {
                requested: queue_size,
                max,
            });
        }

        let queue = SplitVirtqueue::new(size);
        transport.set_queue_num(size);
        transport.set_queue_addrs(
            queue.desc_table_bytes().as_ptr() as u64,
            queue.avail_ring_bytes().as_ptr() as u64,
            queue.used_ring_bytes().as_ptr() as u64,
        );
        transport.set_queue_ready(true);
        transport.driver_ok();

        let config = VirtioBlkConfig::read_from_prefix(transport.config_space())
            .unwrap_or_default();
        let block_size = if config.blk_size != 0 {
            config.blk_size
        } else {
            BLK_SECTOR_SIZE as u32
        };

        let inner = Arc::new(Inner {
            transport: Mutex::new(transport),
            queue: Mutex::new(queue),
            pending: Mutex::new(HashMap::new()),
            block_size,
            capacity_sectors: config.capacity,
            running: AtomicBool::new(true),
        });

        let worker_inner = inner.clone();
        let worker = std::thread::Builder::new()
            .name("virtio-blk-completion".to_string())
            .spawn(move || run_completion_worker(worker_inner))
            .expect("spawning the completion worker thread");

        Ok(Self {
            inner,
            worker: Some(worker),
        })
    }

    /// Device binding entry point for [`crate::drivers::DriverRegistry`].
    pub fn init(info: &DeviceInfo, syscalls: &dyn Syscalls) -> Result<Box<dyn BlockQueuer>, DriverdError> {
        let regs = syscalls.mem_map(info.phys_addr, 0x200)?;
        let transport = MmioTransport::new(regs);
        let driver = Self::bind(transport, 128)?;
        Ok(Box::new(driver))
    }

    /// Alignment and bounds validation a request must pass before it is
    /// allowed to touch the queue. Flush carries no sector range and
    /// skips the alignment check.
    fn validate_request(&self, req: &IORequest) -> Result<(), DriverdError> {
        if matches!(req.request_type, IORequestType::Read | IORequestType::Write) {
            let expected_len = req.sector_count as u64 * self.inner.block_size as u64;
            if req.data.len() as u64 != expected_len {
                return Err(DriverdError::Block(BlockError::ReqMisaligned {
                    sector: req.sector,
                    block_size: self.inner.block_size,
                }));
            }
        }

        let end = req
            .sector
            .checked_add(req.sector_count as u64)
            .unwrap_or(u64::MAX);
        if end > self.inner.capacity_sectors {
            return Err(DriverdError::Block(BlockError::ReqOutOfBounds {
                sector: req.sector,
                count: req.sector_count,
                capacity: self.inner.capacity_sectors,
            }));
        }

        Ok(())
    }

    /// Builds and publishes a three-descriptor request chain, registers
    /// its waiter, and returns its head plus the receiving half of its
    /// completion channel. The caller blocks on that receiver rather
    /// than on a private polling loop.
    fn submit(
        &self,
        req: &IORequest,
    ) -> Result<(u16, Receiver<Result<IOResponse, DriverdError>>), VirtioError> {
        let req_type = match req.request_type {
            IORequestType::Read => blk_req_type::IN,
            IORequestType::Write => blk_req_type::OUT,
            IORequestType::Flush => blk_req_type::FLUSH,
            IORequestType::Trim => blk_req_type::WRITE_ZEROES,
        };
        let header = VirtioBlkReqHeader {
            req_type,
            reserved: 0,
            sector: req.sector,
        };
        let header_bytes = zerocopy::AsBytes::as_bytes(&header).to_vec();
        let data = match req.request_type {
            IORequestType::Read => vec![0u8; req.data.len()],
            IORequestType::Write | IORequestType::Trim => req.data.clone(),
            IORequestType::Flush => Vec::new(),
        };
        let status = vec![0xffu8];

        let mut queue = self.inner.queue.lock().unwrap();
        let chain = queue.alloc_chain(3)?;
        let idx = chain.indices();

        queue.set_descriptor(idx[0], header_bytes.as_ptr() as u64, header_bytes.len() as u32, false, true, idx[1]);
        queue.set_descriptor(
            idx[1],
            data.as_ptr() as u64,
            data.len() as u32,
            matches!(req.request_type, IORequestType::Read),
            true,
            idx[2],
        );
        queue.set_descriptor(idx[2], status.as_ptr() as u64, 1, true, false, 0);

        let (tx, rx) = bounded(1);
        self.inner.pending.lock().unwrap().insert(
            chain.head,
            PendingRequest {
                data,
                status,
                request_type: req.request_type,
                completion: tx,
            },
        );

        queue.publish(chain.head);
        drop(queue);
        self.inner.transport.lock().unwrap().notify_queue(QUEUE_INDEX);

        Ok((chain.head, rx))
    }
}

impl Drop for VirtioBlkDriver {
    fn drop(&mut self) {
        self.inner.running.store(false, Ordering::Release);
        if let Some(handle) = self.worker.take() {
            let _ = handle.join();
        }
    }
}

impl BlockQueuer for VirtioBlkDriver {
    fn enqueue(&self, request: IORequest) -> Result<IOResponse, DriverdError> {
        self.validate_request(&request)?;
        let (_head, rx) = self.submit(&request)?;
        rx.recv()
            .map_err(|_| DriverdError::Block(BlockError::IOError))?
    }

    fn block_size(&self) -> u32 {
        self.inner.block_size
    }

    fn sector_count(&self) -> u64 {
        self.inner.capacity_sectors
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drivers::virtio::spec::{mmio_offset as off, MAGIC_VALUE};

    fn fake_regs() -> Vec<u8> {
        let mut regs = vec![0u8; 0x200];
        regs[off::MAGIC_VALUE..off::MAGIC_VALUE + 4].copy_from_slice(&MAGIC_VALUE.to_le_bytes());
        regs[off::VERSION..off::VERSION + 4].copy_from_slice(&2u32.to_le_bytes());
        regs[off::DEVICE_ID..off::DEVICE_ID + 4]
            .copy_from_slice(&(DeviceId::Block as u32).to_le_bytes());
        regs[off::QUEUE_NUM_MAX..off::QUEUE_NUM_MAX + 4].copy_from_slice(&128u32.to_le_bytes());
        // capacity = 1024 sectors, so bounds checks below have room to work with
        regs[off::CONFIG..off::CONFIG + 8].copy_from_slice(&1024u64.to_le_bytes());
        regs
    }

    #[test]
    fn bind_negotiates_and_sets_up_queue() {
        let transport = MmioTransport::new(fake_regs());
        let driver = VirtioBlkDriver::bind(transport, 64).unwrap();
        assert_eq!(driver.block_size(), BLK_SECTOR_SIZE as u32);
        assert_eq!(driver.sector_count(), 1024);
    }

    #[test]
    fn queue_size_capped_at_device_max() {
        let transport = MmioTransport::new(fake_regs());
        let err = VirtioBlkDriver::bind(transport, 256).unwrap_err();
        assert!(matches!(
            err,
            VirtioError::QueueSizeTooLarge {
                requested: 256,
                max: 128
            }
        ));
    }

    #[test]
    fn submit_builds_three_descriptor_chain() {
        let transport = MmioTransport::new(fake_regs());
        let driver = VirtioBlkDriver::bind(transport, 64).unwrap();
        let req = IORequest {
            request_type: IORequestType::Read,
            sector: 0,
            sector_count: 1,
            data: vec![0u8; 512],
        };
        let (head, _rx) = driver.submit(&req).unwrap();
        assert!(driver.inner.pending.lock().unwrap().contains_key(&head));
    }

    #[test]
    fn misaligned_request_is_rejected_before_it_touches_the_queue() {
        let transport = MmioTransport::new(fake_regs());
        let driver = VirtioBlkDriver::bind(transport, 64).unwrap();
        let req = IORequest {
            request_type: IORequestType::Read,
            sector: 0,
            sector_count: 1,
            data: vec![0u8; 100], // not a multiple of the 512-byte block size
        };
        let err = driver.validate_request(&req).unwrap_err();
        assert!(matches!(
            err,
            DriverdError::Block(BlockError::ReqMisaligned { .. })
        ));
        assert!(driver.inner.pending.lock().unwrap().is_empty());
    }

    #[test]
    fn out_of_bounds_request_is_rejected_before_it_touches_the_queue() {
        let transport = MmioTransport::new(fake_regs());
        let driver = VirtioBlkDriver::bind(transport, 64).unwrap();
        let req = IORequest {
            request_type: IORequestType::Read,
            sector: 1023,
            sector_count: 2, // runs past the 1024-sector capacity
            data: vec![0u8; 1024],
        };
        let err = driver.validate_request(&req).unwrap_err();
        assert!(matches!(
            err,
            DriverdError::Block(BlockError::ReqOutOfBounds { .. })
        ));
    }

    #[test]
    fn flush_request_skips_the_alignment_check() {
        let transport = MmioTransport::new(fake_regs());
        let driver = VirtioBlkDriver::bind(transport, 64).unwrap();
        let req = IORequest {
            request_type: IORequestType::Flush,
            sector: 0,
            sector_count: 0,
            data: Vec::new(),
        };
        assert!(driver.validate_request(&req).is_ok());
    }

    #[test]
    fn request_exactly_at_capacity_boundary_is_accepted() {
        let transport = MmioTransport::new(fake_regs());
        let driver = VirtioBlkDriver::bind(transport, 64).unwrap();
        let req = IORequest {
            request_type: IORequestType::Read,
            sector: 1023,
            sector_count: 1, // ends exactly at capacity, not past it
            data: vec![0u8; 512],
        };
        assert!(driver.validate_request(&req).is_ok());
    }
}
