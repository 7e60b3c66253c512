use serde::{Deserialize, Serialize};

// Process running on a GPU
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GpuProcess {
    pub pid: u32,
    pub name: String,
    /// Device memory attributed to this process, in bytes.
    pub memory_used: u64,
}

/// One device's complete telemetry at a sampling instant.
///
/// Built fresh by the poller every tick and published as part of an
/// immutable collection; fields a query failed for stay at their
/// zero/default value.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct GpuSnapshot {
    pub name: String,
    /// Stable unique identifier for this specific GPU.
    pub uuid: String,
    /// Physical slot location; default sort key for the collection.
    pub pci_bus_id: String,
    /// Zero-based enumeration index.
    pub index: u32,
    /// True when the driver runs the device in exclusive-compute mode
    /// rather than shared-display mode.
    pub compute_exclusive: bool,

    // Memory (bytes)
    pub memory_used: u64,
    pub memory_total: u64,

    // Utilization (0-100%)
    pub gpu_utilization: u32,
    pub memory_utilization: u32,

    // Thermals & power
    pub temperature: u32,  // Celsius
    pub fan_speed: u32,    // 0-100%
    pub power_draw: u32,   // Watts
    pub power_limit: u32,  // Watts

    // Clocks (MHz)
    pub core_clock: u32,
    pub core_clock_max: u32,
    pub memory_clock: u32,
    pub memory_clock_max: u32,

    // PCIe link
    pub pcie_gen: u32,
    pub pcie_width: u32,

    /// Processes using this device, deduplicated across query sources.
    pub processes: Vec<GpuProcess>,

    // ECC
    pub ecc_supported: bool,
    /// Cumulative corrected-error count; 0 when ECC is off or unsupported.
    pub ecc_errors: u64,
}

/// System-wide facts refreshed far less often than device snapshots.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct GpuTopology {
    pub driver_version: String,
    pub cuda_version: String,
    /// True if any NVLink connection is active anywhere in the system.
    pub nvlink_available: bool,
    /// Connected device-index pairs, smaller index first, deduplicated.
    pub nvlink_pairs: Vec<(u32, u32)>,
}
