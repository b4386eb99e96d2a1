pub mod mmio;

pub use mmio::MmioTransport;
