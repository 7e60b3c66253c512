//! Background sampling loop and NVLink topology probe.
//!
//! One dedicated thread queries every device each tick and publishes a
//! fresh, fully-built collection into the [`SnapshotStore`]. Nothing in
//! the loop is fatal: enumeration failure skips the tick, per-field
//! failure leaves the field at its default.

use std::collections::HashSet;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};

use crate::data::{GpuProcess, GpuSnapshot, GpuTopology};
use crate::monitor::{ClockDomain, GpuDevice, GpuProvider};
use crate::names::ProcessNameCache;
use crate::store::SnapshotStore;

/// Stop requests are observed at worst one slice after they are sent.
const STOP_CHECK_SLICE: Duration = Duration::from_millis(100);

#[derive(Clone, Copy, Debug)]
pub struct PollerConfig {
    /// Process names are re-looked-up (and stale cache entries evicted)
    /// every this many ticks.
    pub name_refresh_ticks: u32,
    /// NVLink slots probed per device during topology discovery.
    pub nvlink_slots: u32,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            name_refresh_ticks: 5,
            nvlink_slots: 6,
        }
    }
}

/// Owns the sampling thread. `start` is idempotent; `stop` is
/// cooperative and blocks until the thread has exited, after which no
/// further writes to the store occur.
pub struct GpuPoller {
    store: Arc<SnapshotStore>,
    worker: Option<Worker>,
    // Parked between runs so start/stop/start works.
    idle: Option<PollTask>,
}

struct Worker {
    stop_tx: Sender<()>,
    handle: JoinHandle<PollTask>,
}

impl GpuPoller {
    pub fn new(
        provider: Box<dyn GpuProvider>,
        names: ProcessNameCache,
        store: Arc<SnapshotStore>,
        config: PollerConfig,
    ) -> Self {
        Self {
            store: store.clone(),
            worker: None,
            idle: Some(PollTask {
                provider,
                names,
                store,
                config,
                ticks_since_refresh: 0,
            }),
        }
    }

    /// Spawns the sampling loop if it is not already running.
    pub fn start(&mut self, interval: Duration) {
        if self.worker.is_some() {
            return;
        }
        let Some(task) = self.idle.take() else {
            return;
        };
        let (stop_tx, stop_rx) = bounded(1);
        let handle = thread::spawn(move || task.run(stop_rx, interval));
        self.worker = Some(Worker { stop_tx, handle });
    }

    /// Requests cancellation and blocks until the loop has exited.
    pub fn stop(&mut self) {
        if let Some(worker) = self.worker.take() {
            let _ = worker.stop_tx.send(());
            if let Ok(task) = worker.handle.join() {
                self.idle = Some(task);
            }
        }
    }

    pub fn is_running(&self) -> bool {
        self.worker.is_some()
    }

    /// Copy of the most recently published device collection.
    pub fn snapshots(&self) -> Vec<GpuSnapshot> {
        self.store.snapshots()
    }

    pub fn topology(&self) -> GpuTopology {
        self.store.topology()
    }
}

impl Drop for GpuPoller {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Loop state owned by the sampling thread.
struct PollTask {
    provider: Box<dyn GpuProvider>,
    names: ProcessNameCache,
    store: Arc<SnapshotStore>,
    config: PollerConfig,
    ticks_since_refresh: u32,
}

impl PollTask {
    fn run(mut self, stop_rx: Receiver<()>, interval: Duration) -> Self {
        log::info!("poller started, interval {}ms", interval.as_millis());
        // Link state changes rarely and the probe is O(devices^2); once
        // at loop start is enough.
        self.store.publish_topology(self.probe_topology());
        loop {
            self.tick();
            let mut slept = Duration::ZERO;
            while slept < interval {
                let slice = STOP_CHECK_SLICE.min(interval - slept);
                match stop_rx.recv_timeout(slice) {
                    Err(RecvTimeoutError::Timeout) => slept += slice,
                    // Stop request, or the poller handle went away.
                    _ => {
                        log::info!("poller stopped");
                        return self;
                    }
                }
            }
        }
    }

    fn tick(&mut self) {
        // Enumeration failure: keep the previous snapshot authoritative.
        let device_count = match self.provider.device_count() {
            Ok(n) => n,
            Err(_) => return,
        };

        self.ticks_since_refresh += 1;
        let refresh_names = self.ticks_since_refresh >= self.config.name_refresh_ticks;
        if refresh_names {
            self.ticks_since_refresh = 0;
        }

        let mut live_pids = HashSet::new();
        let mut snapshots = Vec::with_capacity(device_count as usize);
        for index in 0..device_count {
            let device = match self.provider.device(index) {
                Ok(device) => device,
                Err(_) => continue,
            };
            snapshots.push(read_device(
                device.as_ref(),
                index,
                refresh_names,
                &mut self.names,
                &mut live_pids,
            ));
        }

        // Physical slot order, stable regardless of enumeration order.
        snapshots.sort_by(|a, b| a.pci_bus_id.cmp(&b.pci_bus_id));

        if refresh_names {
            self.names.evict_except(&live_pids);
        }

        self.store.publish(snapshots);
    }

    fn probe_topology(&self) -> GpuTopology {
        let mut topology = GpuTopology {
            driver_version: self.provider.driver_version().unwrap_or_default(),
            cuda_version: self.provider.cuda_version().unwrap_or_default(),
            ..Default::default()
        };

        let device_count = self.provider.device_count().unwrap_or(0);
        let mut bus_ids = Vec::with_capacity(device_count as usize);
        for index in 0..device_count {
            let bus_id = self
                .provider
                .device(index)
                .and_then(|device| device.pci_bus_id())
                .unwrap_or_default();
            bus_ids.push(bus_id);
        }

        for index in 0..device_count {
            let Ok(device) = self.provider.device(index) else {
                continue;
            };
            for slot in 0..self.config.nvlink_slots {
                if !device.link_active(slot).unwrap_or(false) {
                    continue;
                }
                topology.nvlink_available = true;
                let Ok(remote) = device.link_remote_bus_id(slot) else {
                    continue;
                };
                let peer = bus_ids
                    .iter()
                    .enumerate()
                    .find(|(j, bus_id)| {
                        *j as u32 != index && !bus_id.is_empty() && **bus_id == remote
                    })
                    .map(|(j, _)| j as u32);
                if let Some(peer) = peer {
                    let pair = (index.min(peer), index.max(peer));
                    if !topology.nvlink_pairs.contains(&pair) {
                        topology.nvlink_pairs.push(pair);
                    }
                }
            }
        }

        log::debug!(
            "topology probe: nvlink={}, pairs={:?}",
            topology.nvlink_available,
            topology.nvlink_pairs
        );
        topology
    }
}

/// Assembles one device snapshot, defaulting every field whose query
/// fails, merging the two process sources first-wins by pid.
fn read_device(
    device: &dyn GpuDevice,
    index: u32,
    refresh_names: bool,
    names: &mut ProcessNameCache,
    live_pids: &mut HashSet<u32>,
) -> GpuSnapshot {
    let (memory_used, memory_total) = device.memory().unwrap_or((0, 0));
    let (gpu_utilization, memory_utilization) = device.utilization().unwrap_or((0, 0));
    let (pcie_gen, pcie_width) = device.pcie_link().unwrap_or((0, 0));

    let mut snapshot = GpuSnapshot {
        name: device.name().unwrap_or_default(),
        uuid: device.uuid().unwrap_or_default(),
        pci_bus_id: device.pci_bus_id().unwrap_or_default(),
        index,
        compute_exclusive: device.compute_exclusive().unwrap_or(false),
        memory_used,
        memory_total,
        gpu_utilization,
        memory_utilization,
        temperature: device.temperature().unwrap_or(0),
        fan_speed: device.fan_speed().unwrap_or(0),
        power_draw: device.power_draw().unwrap_or(0),
        power_limit: device.power_limit().unwrap_or(0),
        core_clock: device.clock(ClockDomain::Core).unwrap_or(0),
        core_clock_max: device.max_clock(ClockDomain::Core).unwrap_or(0),
        memory_clock: device.clock(ClockDomain::Memory).unwrap_or(0),
        memory_clock_max: device.max_clock(ClockDomain::Memory).unwrap_or(0),
        pcie_gen,
        pcie_width,
        processes: Vec::new(),
        ecc_supported: device.ecc_supported().unwrap_or(false),
        ecc_errors: device.ecc_errors().unwrap_or(0),
    };

    let mut seen = HashSet::new();
    for source in [device.compute_processes(), device.graphics_processes()] {
        let Ok(list) = source else { continue };
        for raw in list {
            if !seen.insert(raw.pid) {
                continue;
            }
            live_pids.insert(raw.pid);
            snapshot.processes.push(GpuProcess {
                pid: raw.pid,
                name: names.resolve(raw.pid, refresh_names),
                memory_used: raw.memory_used,
            });
        }
    }

    snapshot
}
