//! Runtime configuration, parsed once in `main` and threaded down.
//!
//! The library itself never reads the environment or argv directly;
//! everything that varies at runtime comes in through [`Config`].

use clap::Parser;

#[derive(Parser, Debug, Clone)]
#[command(name = "driverd", about = "block device + NDP fast path service")]
pub struct Config {
    /// Enable the multi-worker frame processing fan-out.
    ///
    /// Off by default: the reference implementation never enabled this
    /// path either, and a single RX loop is sufficient for the traffic
    /// volumes this service expects.
    #[arg(long, default_value_t = false)]
    pub worker_pool: bool,

    /// Override the neighbor cache entry TTL, in seconds.
    #[arg(long, default_value_t = 30)]
    pub neighbor_ttl_secs: u64,

    /// Number of worker threads when `worker_pool` is enabled. Defaults
    /// to the available parallelism.
    #[arg(long)]
    pub worker_count: Option<usize>,

    /// Log level passed through to `env_logger` if `RUST_LOG` is unset.
    #[arg(long, default_value = "info")]
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            worker_pool: false,
            neighbor_ttl_secs: 30,
            worker_count: None,
            log_level: "info".to_string(),
        }
    }
}
