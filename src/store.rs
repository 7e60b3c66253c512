//! Latest published snapshot collection and topology, behind one lock.

use std::sync::Mutex;

use crate::data::{GpuSnapshot, GpuTopology};

#[derive(Default)]
struct Published {
    snapshots: Vec<GpuSnapshot>,
    topology: GpuTopology,
}

/// The only state shared between the poller thread and its readers.
///
/// The lock is held just long enough to swap or clone; readers always
/// get an independent copy of a complete collection.
#[derive(Default)]
pub struct SnapshotStore {
    inner: Mutex<Published>,
}

impl SnapshotStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Atomically replaces the device collection.
    pub fn publish(&self, snapshots: Vec<GpuSnapshot>) {
        self.inner.lock().unwrap().snapshots = snapshots;
    }

    pub fn publish_topology(&self, topology: GpuTopology) {
        self.inner.lock().unwrap().topology = topology;
    }

    pub fn snapshots(&self) -> Vec<GpuSnapshot> {
        self.inner.lock().unwrap().snapshots.clone()
    }

    pub fn topology(&self) -> GpuTopology {
        self.inner.lock().unwrap().topology.clone()
    }

    /// Consistent pair read under a single lock acquisition.
    pub fn read(&self) -> (Vec<GpuSnapshot>, GpuTopology) {
        let inner = self.inner.lock().unwrap();
        (inner.snapshots.clone(), inner.topology.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snap(uuid: &str) -> GpuSnapshot {
        GpuSnapshot {
            uuid: uuid.to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn publish_replaces_the_whole_collection() {
        let store = SnapshotStore::new();
        store.publish(vec![snap("a"), snap("b")]);
        store.publish(vec![snap("c")]);
        let snaps = store.snapshots();
        assert_eq!(snaps.len(), 1);
        assert_eq!(snaps[0].uuid, "c");
    }

    #[test]
    fn read_returns_a_consistent_pair() {
        let store = SnapshotStore::new();
        store.publish(vec![snap("a")]);
        store.publish_topology(GpuTopology {
            driver_version: "580.65".into(),
            nvlink_available: true,
            nvlink_pairs: vec![(0, 1)],
            ..Default::default()
        });
        let (snaps, topo) = store.read();
        assert_eq!(snaps.len(), 1);
        assert_eq!(topo.driver_version, "580.65");
        assert_eq!(topo.nvlink_pairs, vec![(0, 1)]);
    }

    #[test]
    fn readers_get_independent_copies() {
        let store = SnapshotStore::new();
        store.publish(vec![snap("a")]);
        let mut copy = store.snapshots();
        copy[0].uuid = "mutated".into();
        assert_eq!(store.snapshots()[0].uuid, "a");
    }
}
