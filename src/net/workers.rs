//! Optional fan-out of Ethernet frame processing across a fixed pool of
//! worker threads. Disabled by default: a single RX thread calling
//! [`crate::net::ethernet::handle_ethernet_frame`] directly is simpler
//! to reason about, and is what every deployment runs in practice; this
//! exists for the cases that need to spread checksum/NDP work across
//! cores.

#![cfg(feature = "worker-pool")]

use std::sync::Arc;
use std::thread::JoinHandle;

use crossbeam_channel::{bounded, Receiver, Sender};

use crate::net::ethernet::handle_ethernet_frame;
use crate::net::packet::{Packet, PacketPool};

const QUEUE_DEPTH: usize = 512;

pub struct WorkerPool {
    tx: Sender<Packet>,
    handles: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Spawns `worker_count` threads, each pulling frames off a shared
    /// bounded queue and running them through the normal Ethernet RX
    /// path. Packets are returned to `pool` once handled.
    pub fn start(worker_count: usize, pool: Arc<PacketPool>) -> Self {
        let (tx, rx): (Sender<Packet>, Receiver<Packet>) = bounded(QUEUE_DEPTH);
        let mut handles = Vec::with_capacity(worker_count);
        for id in 0..worker_count.max(1) {
            let rx = rx.clone();
            let pool = pool.clone();
            handles.push(
                std::thread::Builder::new()
                    .name(format!("net-worker-{id}"))
                    .spawn(move || {
                        while let Ok(packet) = rx.recv() {
                            handle_ethernet_frame(packet, &pool);
                        }
                    })
                    .expect("failed to spawn network worker thread"),
            );
        }
        Self { tx, handles }
    }

    /// Enqueues a received frame for processing by the pool. Returns
    /// the packet back to the caller if the queue is full, matching
    /// back-pressure at the receive side rather than blocking it.
    pub fn dispatch(&self, packet: Packet) -> Result<(), Packet> {
        self.tx.try_send(packet).map_err(|e| e.into_inner())
    }

    pub fn worker_count(&self) -> usize {
        self.handles.len()
    }
}
