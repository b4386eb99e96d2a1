use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use driverd::config::Config;
use driverd::discover;
use driverd::logging;
use driverd::net::netspace::NetSpace;
use driverd::syscalls::SimulatedSyscalls;

fn main() {
    let config = Config::parse();
    logging::init(&config);

    log::info!("driverd starting, worker_pool={}", config.worker_pool);

    let syscalls = SimulatedSyscalls::new();
    match discover::discover_devices(&syscalls) {
        Ok(devices) => log::info!("discovered {} block device(s)", devices.len()),
        Err(err) => log::error!("device discovery failed: {err}"),
    }

    let neighbour_ttl = Duration::from_secs(config.neighbor_ttl_secs);
    let net_space = Arc::new(NetSpace::with_neighbour_ttl(neighbour_ttl));
    let _sweeper = net_space.spawn_neighbour_sweeper(neighbour_ttl);
    let _retry_driver = net_space
        .clone()
        .spawn_neighbour_retry_driver(Duration::from_secs(1));

    #[cfg(feature = "worker-pool")]
    if config.worker_pool {
        use driverd::net::workers::WorkerPool;

        let worker_count = config.worker_count.unwrap_or_else(|| {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1)
        });
        let workers = WorkerPool::start(worker_count, net_space.packet_pool.clone());
        log::info!("started {} network workers", workers.worker_count());
        std::mem::forget(workers);
    }
}
