//! Process-local aggregate snapshots.
//!
//! A snapshot is a rehydrated aggregate at some version. Loading through the cache replays
//! only the events appended since that version instead of the whole stream. The store stays
//! the source of truth: a snapshot that fell behind is caught up, never trusted as current.

use std::collections::HashMap;
use std::sync::RwLock;

use stockcart_core::{AggregateId, AggregateRoot};

/// Latest known state per aggregate id.
#[derive(Debug)]
pub struct SnapshotCache<A> {
    entries: RwLock<HashMap<AggregateId, A>>,
}

impl<A> Default for SnapshotCache<A> {
    fn default() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
        }
    }
}

impl<A> SnapshotCache<A>
where
    A: AggregateRoot + Clone,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of the snapshot for `id`, if any.
    ///
    /// A poisoned lock reads as a miss; callers fall back to a full replay.
    pub fn get(&self, id: AggregateId) -> Option<A> {
        self.entries.read().ok()?.get(&id).cloned()
    }

    /// Keep `aggregate` unless a newer version is already cached.
    pub fn store(&self, id: AggregateId, aggregate: A) {
        let Ok(mut entries) = self.entries.write() else {
            return;
        };
        match entries.get(&id) {
            Some(current) if current.version() >= aggregate.version() => {}
            _ => {
                entries.insert(id, aggregate);
            }
        }
    }

    pub fn evict(&self, id: AggregateId) {
        if let Ok(mut entries) = self.entries.write() {
            entries.remove(&id);
        }
    }

    pub fn len(&self) -> usize {
        self.entries.read().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, PartialEq)]
    struct Counter {
        id: AggregateId,
        version: u64,
    }

    impl AggregateRoot for Counter {
        type Id = AggregateId;

        fn id(&self) -> &AggregateId {
            &self.id
        }

        fn version(&self) -> u64 {
            self.version
        }
    }

    #[test]
    fn older_snapshot_never_replaces_a_newer_one() {
        let cache = SnapshotCache::new();
        let id = AggregateId::new();

        cache.store(id, Counter { id, version: 5 });
        cache.store(id, Counter { id, version: 3 });
        assert_eq!(cache.get(id).unwrap().version, 5);

        cache.store(id, Counter { id, version: 6 });
        assert_eq!(cache.get(id).unwrap().version, 6);
    }

    #[test]
    fn evicted_entry_is_a_miss() {
        let cache = SnapshotCache::new();
        let id = AggregateId::new();
        cache.store(id, Counter { id, version: 1 });

        cache.evict(id);
        assert!(cache.get(id).is_none());
        assert!(cache.is_empty());
    }
}
