//! Installs the process-wide `log` sink.
//!
//! Driver and network modules call into `log::{trace,debug,info,warn,error}!`
//! directly; this module only exists to wire up the sink once at startup,
//! mirroring how the teacher's kernel console logger is installed early
//! in boot.

use crate::config::Config;

pub fn init(config: &Config) {
    let mut builder = env_logger::Builder::new();
    builder.parse_filters(&config.log_level);
    let _ = builder.try_init();
}
