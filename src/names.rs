//! Process-name resolution with interval-amortized refresh.
//!
//! Name lookups are comparatively expensive, so the cache answers most
//! ticks; the poller forces a refresh every Nth tick and then evicts
//! entries for pids that were not seen during that tick.

use std::collections::{HashMap, HashSet};

use sysinfo::{Pid, ProcessRefreshKind, ProcessesToUpdate, System};

/// Sentinel returned (and cached) when a pid cannot be resolved.
pub const UNKNOWN_PROCESS: &str = "Unknown";

/// Platform name lookup. Never errors; returns the sentinel on failure.
pub trait NameLookup: Send {
    fn lookup(&mut self, pid: u32) -> String;
}

/// sysinfo-backed lookup refreshing only the requested pid.
pub struct SystemNames {
    sys: System,
}

impl SystemNames {
    pub fn new() -> Self {
        Self { sys: System::new() }
    }
}

impl Default for SystemNames {
    fn default() -> Self {
        Self::new()
    }
}

impl NameLookup for SystemNames {
    fn lookup(&mut self, pid: u32) -> String {
        let pid = Pid::from_u32(pid);
        self.sys.refresh_processes_specifics(
            ProcessesToUpdate::Some(&[pid]),
            true,
            ProcessRefreshKind::nothing(),
        );
        self.sys
            .process(pid)
            .map(|p| p.name().to_string_lossy().into_owned())
            .filter(|name| !name.is_empty())
            .unwrap_or_else(|| UNKNOWN_PROCESS.to_string())
    }
}

/// pid -> display-name cache, bounded by the set of live pids.
pub struct ProcessNameCache {
    lookup: Box<dyn NameLookup>,
    cache: HashMap<u32, String>,
}

impl ProcessNameCache {
    pub fn new(lookup: Box<dyn NameLookup>) -> Self {
        Self {
            lookup,
            cache: HashMap::new(),
        }
    }

    /// Returns the cached name unless `force_refresh` is set; otherwise
    /// performs the platform lookup and caches the result, sentinel
    /// included.
    pub fn resolve(&mut self, pid: u32, force_refresh: bool) -> String {
        if !force_refresh {
            if let Some(name) = self.cache.get(&pid) {
                return name.clone();
            }
        }
        let name = self.lookup.lookup(pid);
        self.cache.insert(pid, name.clone());
        name
    }

    /// Drops every entry whose pid is not in `live`.
    pub fn evict_except(&mut self, live: &HashSet<u32>) {
        self.cache.retain(|pid, _| live.contains(pid));
    }

    pub fn len(&self) -> usize {
        self.cache.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }

    pub fn contains(&self, pid: u32) -> bool {
        self.cache.contains_key(&pid)
    }
}
