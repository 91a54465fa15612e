// ── Device registry ──
//
// Explicitly owned lookup table for managed devices, injected into the
// service that needs it -- never a process-wide singleton. Mutations
// rebuild a snapshot broadcast through a `watch` channel so hosts can
// observe status reactively instead of polling the registry.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::watch;

use crate::device::{DeviceId, DeviceRecord};

/// Concurrent registry of device records with push-based change
/// notification.
pub struct DeviceRegistry {
    records: DashMap<DeviceId, DeviceRecord>,
    snapshot: watch::Sender<Arc<Vec<DeviceRecord>>>,
}

impl DeviceRegistry {
    pub fn new() -> Self {
        let (snapshot, _) = watch::channel(Arc::new(Vec::new()));
        Self {
            records: DashMap::new(),
            snapshot,
        }
    }

    /// Insert or replace a record.
    pub fn insert(&self, record: DeviceRecord) {
        self.records.insert(record.id.clone(), record);
        self.rebuild_snapshot();
    }

    /// Apply a mutation to an existing record. No-op for unknown devices.
    pub fn update(&self, id: &DeviceId, f: impl FnOnce(&mut DeviceRecord)) {
        if let Some(mut record) = self.records.get_mut(id) {
            f(record.value_mut());
        }
        self.rebuild_snapshot();
    }

    /// Remove a record. Returns it if it existed.
    pub fn remove(&self, id: &DeviceId) -> Option<DeviceRecord> {
        let removed = self.records.remove(id).map(|(_, r)| r);
        if removed.is_some() {
            self.rebuild_snapshot();
        }
        removed
    }

    pub fn get(&self, id: &DeviceId) -> Option<DeviceRecord> {
        self.records.get(id).map(|r| r.value().clone())
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn ids(&self) -> Vec<DeviceId> {
        self.records.iter().map(|r| r.key().clone()).collect()
    }

    /// Current snapshot (cheap `Arc` clone).
    pub fn snapshot(&self) -> Arc<Vec<DeviceRecord>> {
        self.snapshot.borrow().clone()
    }

    /// Subscribe to snapshot changes.
    pub fn subscribe(&self) -> watch::Receiver<Arc<Vec<DeviceRecord>>> {
        self.snapshot.subscribe()
    }

    fn rebuild_snapshot(&self) {
        let mut records: Vec<DeviceRecord> =
            self.records.iter().map(|r| r.value().clone()).collect();
        records.sort_by(|a, b| a.id.cmp(&b.id));
        // send_modify updates unconditionally, even with zero receivers.
        self.snapshot.send_modify(|snap| *snap = Arc::new(records));
    }
}

impl Default for DeviceRegistry {
    fn default() -> Self {
        Self::new()
    }
}
