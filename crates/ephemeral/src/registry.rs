use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::RwLock;
use privarion_core::PrivarionError;
use tokio::task::AbortHandle;
use uuid::Uuid;

use crate::snapshot::{SnapshotMetadata, SnapshotSchedule};
use crate::space::EphemeralSpace;

/// Concurrency-safe map of live [`EphemeralSpace`]s keyed by id, each paired
/// with the abort handle of its pending cleanup timer task (if any).
pub struct SpaceRegistry {
    spaces: DashMap<Uuid, (EphemeralSpace, Option<AbortHandle>)>,
    capacity: usize,
}

impl SpaceRegistry {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            spaces: DashMap::new(),
            capacity,
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.spaces.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.spaces.is_empty()
    }

    #[must_use]
    pub fn is_at_capacity(&self) -> bool {
        self.spaces.len() >= self.capacity
    }

    pub fn register(&self, space: EphemeralSpace, cleanup_handle: Option<AbortHandle>) -> Result<(), PrivarionError> {
        if self.is_at_capacity() {
            return Err(PrivarionError::MaxSpacesExceeded { max: self.capacity });
        }
        self.spaces.insert(space.id, (space, cleanup_handle));
        Ok(())
    }

    /// Cancels the pending cleanup timer (if any) and removes the entry.
    pub fn unregister(&self, id: Uuid) -> Option<EphemeralSpace> {
        self.spaces.remove(&id).map(|(_, (space, handle))| {
            if let Some(h) = handle {
                h.abort();
            }
            space
        })
    }

    #[must_use]
    pub fn get(&self, id: Uuid) -> Option<EphemeralSpace> {
        self.spaces.get(&id).map(|e| e.0.clone())
    }

    /// Applies `f` to the space in place, if present.
    pub fn update<F: FnOnce(&mut EphemeralSpace)>(&self, id: Uuid, f: F) {
        if let Some(mut entry) = self.spaces.get_mut(&id) {
            f(&mut entry.0);
        }
    }

    /// A point-in-time snapshot of every registered space.
    #[must_use]
    pub fn list(&self) -> Vec<EphemeralSpace> {
        self.spaces.iter().map(|e| e.0.clone()).collect()
    }
}

/// Concurrency-safe store of [`SnapshotMetadata`], plus the bookkeeping
/// `EphemeralFileSystemManager`'s snapshot strategies need: the most recent
/// incremental parent and the single active recurring schedule.
pub struct SnapshotRegistry {
    snapshots: DashMap<Uuid, SnapshotMetadata>,
    last_incremental: RwLock<Option<Uuid>>,
    active_schedule: RwLock<Option<(SnapshotSchedule, AbortHandle)>>,
}

impl SnapshotRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self {
            snapshots: DashMap::new(),
            last_incremental: RwLock::new(None),
            active_schedule: RwLock::new(None),
        }
    }

    pub fn insert(&self, metadata: SnapshotMetadata) {
        self.snapshots.insert(metadata.id, metadata);
    }

    #[must_use]
    pub fn get(&self, id: Uuid) -> Option<SnapshotMetadata> {
        self.snapshots.get(&id).map(|e| e.clone())
    }

    pub fn remove(&self, id: Uuid) -> Option<SnapshotMetadata> {
        self.snapshots.remove(&id).map(|(_, v)| v)
    }

    #[must_use]
    pub fn list(&self) -> Vec<SnapshotMetadata> {
        self.snapshots.iter().map(|e| e.clone()).collect()
    }

    pub fn set_last_incremental(&self, id: Uuid) {
        *self.last_incremental.write() = Some(id);
    }

    #[must_use]
    pub fn last_incremental(&self) -> Option<Uuid> {
        *self.last_incremental.read()
    }

    /// Replaces the active schedule, aborting any previously running one.
    pub fn set_active_schedule(&self, schedule: SnapshotSchedule, handle: AbortHandle) {
        if let Some((_, old)) = self.active_schedule.write().replace((schedule, handle)) {
            old.abort();
        }
    }

    #[must_use]
    pub fn active_schedule(&self) -> Option<SnapshotSchedule> {
        self.active_schedule.read().as_ref().map(|(s, _)| s.clone())
    }

    /// Cancels and clears the active schedule, if any.
    pub fn clear_active_schedule(&self) {
        if let Some((_, handle)) = self.active_schedule.write().take() {
            handle.abort();
        }
    }

    /// Removes metadata older than `retention_days`; callers are responsible
    /// for deleting the corresponding physical snapshot.
    pub fn cleanup_old_snapshots(&self, retention_days: i64) -> Vec<SnapshotMetadata> {
        let cutoff: DateTime<Utc> = Utc::now() - chrono::Duration::days(retention_days);
        let expired: Vec<Uuid> = self
            .snapshots
            .iter()
            .filter(|e| e.created_at < cutoff)
            .map(|e| e.id)
            .collect();
        expired.into_iter().filter_map(|id| self.remove(id)).collect()
    }

    /// Evicts the oldest [`SnapshotStrategy::Scheduled`] entries until at
    /// most `max_snapshots` remain.
    pub fn enforce_max_scheduled(&self, max_snapshots: usize) -> Vec<SnapshotMetadata> {
        let mut scheduled: Vec<SnapshotMetadata> = self
            .snapshots
            .iter()
            .filter(|e| e.strategy == crate::snapshot::SnapshotStrategy::Scheduled)
            .map(|e| e.clone())
            .collect();
        scheduled.sort_by_key(|m| m.created_at);
        let overflow = scheduled.len().saturating_sub(max_snapshots);
        scheduled
            .into_iter()
            .take(overflow)
            .filter_map(|m| self.remove(m.id))
            .collect()
    }
}

impl Default for SnapshotRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snapshot::SnapshotStrategy;
    use std::path::Path;

    #[test]
    fn register_fails_at_capacity() {
        let registry = SpaceRegistry::new(1);
        let space = EphemeralSpace::new(Uuid::new_v4(), Path::new("/tmp"), None, None);
        registry.register(space, None).unwrap();
        let second = EphemeralSpace::new(Uuid::new_v4(), Path::new("/tmp"), None, None);
        let err = registry.register(second, None).unwrap_err();
        assert!(matches!(err, PrivarionError::MaxSpacesExceeded { max: 1 }));
    }

    #[test]
    fn unregister_removes_entry() {
        let registry = SpaceRegistry::new(10);
        let id = Uuid::new_v4();
        let space = EphemeralSpace::new(id, Path::new("/tmp"), None, None);
        registry.register(space, None).unwrap();
        assert!(registry.unregister(id).is_some());
        assert!(registry.get(id).is_none());
    }

    #[test]
    fn cleanup_old_snapshots_removes_expired_metadata() {
        let registry = SnapshotRegistry::new();
        let mut old = SnapshotMetadata::new(SnapshotStrategy::Scheduled, None, None);
        old.created_at = Utc::now() - chrono::Duration::days(10);
        let old_id = old.id;
        registry.insert(old);
        let fresh = SnapshotMetadata::new(SnapshotStrategy::Scheduled, None, None);
        let fresh_id = fresh.id;
        registry.insert(fresh);

        let removed = registry.cleanup_old_snapshots(5);
        assert_eq!(removed.len(), 1);
        assert_eq!(removed[0].id, old_id);
        assert!(registry.get(old_id).is_none());
        assert!(registry.get(fresh_id).is_some());
    }

    #[test]
    fn enforce_max_scheduled_evicts_oldest_first() {
        let registry = SnapshotRegistry::new();
        let mut ids = Vec::new();
        for i in 0..3 {
            let mut meta = SnapshotMetadata::new(SnapshotStrategy::Scheduled, None, None);
            meta.created_at = Utc::now() - chrono::Duration::seconds(10 - i);
            ids.push(meta.id);
            registry.insert(meta);
        }
        let evicted = registry.enforce_max_scheduled(2);
        assert_eq!(evicted.len(), 1);
        assert_eq!(evicted[0].id, ids[0]);
        assert_eq!(registry.list().len(), 2);
    }
}
