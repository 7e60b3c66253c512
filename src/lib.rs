//! Background NVML telemetry sampler with bounded metric history.
//!
//! A dedicated thread polls every GPU through a [`monitor::GpuProvider`]
//! and publishes immutable snapshot collections into a
//! [`store::SnapshotStore`]; consumers read snapshots at their own pace
//! and feed per-device [`history::MetricHistory`] buffers for
//! time-windowed display.

pub mod data;
pub mod history;
pub mod monitor;
pub mod names;
pub mod poller;
pub mod store;

pub use data::{GpuProcess, GpuSnapshot, GpuTopology};
pub use history::{HistoryMap, Metric, MetricHistory, MetricSample};
pub use monitor::{create_provider, GpuDevice, GpuProvider, MonitorError, NvmlProvider};
pub use names::{NameLookup, ProcessNameCache, SystemNames};
pub use poller::{GpuPoller, PollerConfig};
pub use store::SnapshotStore;

/// Initialize logging from `RUST_LOG`, defaulting to info.
pub fn init_logging() {
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .init();
}
