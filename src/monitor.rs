//! Hardware query abstraction and its NVML backend.
//!
//! Every getter is independently fallible; the poller treats a failed
//! field as "leave it at the default", never as a fatal condition.

use nvml_wrapper::enum_wrappers::device::{
    Clock, ComputeMode, EccCounter, MemoryError, TemperatureSensor,
};
use nvml_wrapper::enums::device::UsedGpuMemory;
use nvml_wrapper::{Device, Nvml};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum MonitorError {
    #[error("NVML error: {0}")]
    Nvml(#[from] nvml_wrapper::error::NvmlError),
    #[error("device not found at index {0}")]
    DeviceNotFound(u32),
    #[error("query failed: {0}")]
    Query(String),
}

pub type MonitorResult<T> = Result<T, MonitorError>;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ClockDomain {
    Core,
    Memory,
}

/// A process reported by one of the device's process queries, before
/// name resolution.
#[derive(Clone, Copy, Debug)]
pub struct RawProcess {
    pub pid: u32,
    pub memory_used: u64,
}

/// Per-device telemetry getters. Each may fail independently.
pub trait GpuDevice {
    fn name(&self) -> MonitorResult<String>;
    fn uuid(&self) -> MonitorResult<String>;
    fn pci_bus_id(&self) -> MonitorResult<String>;
    fn compute_exclusive(&self) -> MonitorResult<bool>;
    /// (used, total) in bytes.
    fn memory(&self) -> MonitorResult<(u64, u64)>;
    /// (gpu engine %, memory engine %), each 0-100.
    fn utilization(&self) -> MonitorResult<(u32, u32)>;
    fn temperature(&self) -> MonitorResult<u32>;
    fn fan_speed(&self) -> MonitorResult<u32>;
    /// Watts.
    fn power_draw(&self) -> MonitorResult<u32>;
    fn power_limit(&self) -> MonitorResult<u32>;
    fn clock(&self, domain: ClockDomain) -> MonitorResult<u32>;
    fn max_clock(&self, domain: ClockDomain) -> MonitorResult<u32>;
    /// (generation, lane width).
    fn pcie_link(&self) -> MonitorResult<(u32, u32)>;
    fn compute_processes(&self) -> MonitorResult<Vec<RawProcess>>;
    fn graphics_processes(&self) -> MonitorResult<Vec<RawProcess>>;
    fn ecc_supported(&self) -> MonitorResult<bool>;
    fn ecc_errors(&self) -> MonitorResult<u64>;
    fn link_active(&self, slot: u32) -> MonitorResult<bool>;
    fn link_remote_bus_id(&self, slot: u32) -> MonitorResult<String>;
}

/// Device enumeration plus the system-wide queries.
pub trait GpuProvider: Send {
    fn device_count(&self) -> MonitorResult<u32>;
    fn device<'a>(&'a self, index: u32) -> MonitorResult<Box<dyn GpuDevice + 'a>>;
    fn driver_version(&self) -> MonitorResult<String>;
    fn cuda_version(&self) -> MonitorResult<String>;
}

pub struct NvmlProvider {
    nvml: Nvml,
}

impl NvmlProvider {
    /// Initializes the NVML library. Failure here means the sensor
    /// subsystem is unavailable (e.g. no driver); it is reported once
    /// and the caller decides whether to continue.
    pub fn new() -> MonitorResult<Self> {
        Ok(Self { nvml: Nvml::init()? })
    }
}

impl GpuProvider for NvmlProvider {
    fn device_count(&self) -> MonitorResult<u32> {
        Ok(self.nvml.device_count()?)
    }

    fn device<'a>(&'a self, index: u32) -> MonitorResult<Box<dyn GpuDevice + 'a>> {
        let inner = self
            .nvml
            .device_by_index(index)
            .map_err(|_| MonitorError::DeviceNotFound(index))?;
        Ok(Box::new(NvmlDevice { inner }))
    }

    fn driver_version(&self) -> MonitorResult<String> {
        Ok(self.nvml.sys_driver_version()?)
    }

    fn cuda_version(&self) -> MonitorResult<String> {
        // NVML reports e.g. 12090 for 12.9
        let raw = self.nvml.sys_cuda_driver_version()?;
        Ok(format!("{}.{}", raw / 1000, (raw % 1000) / 10))
    }
}

struct NvmlDevice<'a> {
    inner: Device<'a>,
}

impl GpuDevice for NvmlDevice<'_> {
    fn name(&self) -> MonitorResult<String> {
        Ok(self.inner.name()?)
    }

    fn uuid(&self) -> MonitorResult<String> {
        Ok(self.inner.uuid()?)
    }

    fn pci_bus_id(&self) -> MonitorResult<String> {
        Ok(self.inner.pci_info()?.bus_id)
    }

    fn compute_exclusive(&self) -> MonitorResult<bool> {
        let mode = self.inner.compute_mode()?;
        Ok(matches!(
            mode,
            ComputeMode::ExclusiveProcess | ComputeMode::ExclusiveThread
        ))
    }

    fn memory(&self) -> MonitorResult<(u64, u64)> {
        let mem = self.inner.memory_info()?;
        Ok((mem.used, mem.total))
    }

    fn utilization(&self) -> MonitorResult<(u32, u32)> {
        let util = self.inner.utilization_rates()?;
        Ok((util.gpu, util.memory))
    }

    fn temperature(&self) -> MonitorResult<u32> {
        Ok(self.inner.temperature(TemperatureSensor::Gpu)?)
    }

    fn fan_speed(&self) -> MonitorResult<u32> {
        Ok(self.inner.fan_speed(0)?)
    }

    fn power_draw(&self) -> MonitorResult<u32> {
        // mW -> W
        Ok(self.inner.power_usage()? / 1000)
    }

    fn power_limit(&self) -> MonitorResult<u32> {
        Ok(self.inner.power_management_limit()? / 1000)
    }

    fn clock(&self, domain: ClockDomain) -> MonitorResult<u32> {
        Ok(self.inner.clock_info(nvml_clock(domain))?)
    }

    fn max_clock(&self, domain: ClockDomain) -> MonitorResult<u32> {
        Ok(self.inner.max_clock_info(nvml_clock(domain))?)
    }

    fn pcie_link(&self) -> MonitorResult<(u32, u32)> {
        Ok((
            self.inner.current_pcie_link_gen()?,
            self.inner.current_pcie_link_width()?,
        ))
    }

    fn compute_processes(&self) -> MonitorResult<Vec<RawProcess>> {
        Ok(raw_processes(self.inner.running_compute_processes()?))
    }

    fn graphics_processes(&self) -> MonitorResult<Vec<RawProcess>> {
        Ok(raw_processes(self.inner.running_graphics_processes()?))
    }

    fn ecc_supported(&self) -> MonitorResult<bool> {
        // The mode query itself failing means the device has no ECC.
        Ok(self.inner.is_ecc_enabled().is_ok())
    }

    fn ecc_errors(&self) -> MonitorResult<u64> {
        if !self.inner.is_ecc_enabled()?.currently_enabled {
            return Ok(0);
        }
        Ok(self
            .inner
            .total_ecc_errors(MemoryError::Corrected, EccCounter::Volatile)?)
    }

    fn link_active(&self, slot: u32) -> MonitorResult<bool> {
        Ok(self.inner.link_wrapper_for(slot).is_active()?)
    }

    fn link_remote_bus_id(&self, slot: u32) -> MonitorResult<String> {
        Ok(self.inner.link_wrapper_for(slot).remote_pci_info()?.bus_id)
    }
}

fn raw_processes(infos: Vec<nvml_wrapper::struct_wrappers::device::ProcessInfo>) -> Vec<RawProcess> {
    infos
        .into_iter()
        .map(|info| RawProcess {
            pid: info.pid,
            memory_used: match info.used_gpu_memory {
                UsedGpuMemory::Used(bytes) => bytes,
                UsedGpuMemory::Unavailable => 0,
            },
        })
        .collect()
}

fn nvml_clock(domain: ClockDomain) -> Clock {
    match domain {
        ClockDomain::Core => Clock::Graphics,
        ClockDomain::Memory => Clock::Memory,
    }
}

/// Initializes the default NVML-backed provider, reporting failure once.
pub fn create_provider() -> Option<Box<dyn GpuProvider>> {
    match NvmlProvider::new() {
        Ok(provider) => {
            log::info!("NVML provider initialized");
            Some(Box::new(provider))
        }
        Err(err) => {
            log::error!("no compatible GPU provider found: {err}");
            None
        }
    }
}
