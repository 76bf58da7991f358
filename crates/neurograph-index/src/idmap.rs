//! UUID ↔ u32 id map.
//!
//! Bitmaps hold 32-bit integers, so every UUID is assigned a small id on
//! first sight from a monotonic counter starting at 1. Removing an entity
//! clears the forward mapping only: the counter never reuses an id, so stale
//! bitmap entries resolve to nothing instead of to a new entity.

use dashmap::DashMap;
use neurograph_core::IdMapBlob;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use uuid::Uuid;

pub struct IdMap {
    forward: DashMap<Uuid, u32>,
    reverse: DashMap<u32, Uuid>,
    next: AtomicU32,
    dirty: AtomicBool,
}

impl Default for IdMap {
    fn default() -> Self {
        Self {
            forward: DashMap::new(),
            reverse: DashMap::new(),
            next: AtomicU32::new(1),
            dirty: AtomicBool::new(false),
        }
    }
}

impl IdMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_or_assign(&self, uuid: Uuid) -> u32 {
        if let Some(existing) = self.forward.get(&uuid) {
            return *existing;
        }
        let assigned = *self
            .forward
            .entry(uuid)
            .or_insert_with(|| self.next.fetch_add(1, Ordering::AcqRel));
        self.reverse.insert(assigned, uuid);
        self.dirty.store(true, Ordering::Release);
        assigned
    }

    pub fn get_int(&self, uuid: &Uuid) -> Option<u32> {
        self.forward.get(uuid).map(|v| *v)
    }

    pub fn get_uuid(&self, int_id: u32) -> Option<Uuid> {
        self.reverse.get(&int_id).map(|v| *v)
    }

    /// Clears the forward entry; the reverse entry and the counter are left
    /// alone so the integer id is never reassigned.
    pub fn remove(&self, uuid: &Uuid) -> Option<u32> {
        let removed = self.forward.remove(uuid).map(|(_, v)| v);
        if removed.is_some() {
            self.dirty.store(true, Ordering::Release);
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.forward.len()
    }

    pub fn is_empty(&self) -> bool {
        self.forward.is_empty()
    }

    pub fn take_dirty(&self) -> bool {
        self.dirty.swap(false, Ordering::AcqRel)
    }

    pub fn mark_dirty(&self) {
        self.dirty.store(true, Ordering::Release);
    }

    pub fn to_blob(&self) -> IdMapBlob {
        let mut entries: Vec<(Uuid, u32)> = self.forward.iter().map(|e| (*e.key(), *e.value())).collect();
        entries.sort_by_key(|(_, int_id)| *int_id);
        IdMapBlob {
            next: self.next.load(Ordering::Acquire),
            entries,
        }
    }

    pub fn load_blob(&self, blob: &IdMapBlob) {
        self.forward.clear();
        self.reverse.clear();
        for (uuid, int_id) in &blob.entries {
            self.forward.insert(*uuid, *int_id);
            self.reverse.insert(*int_id, *uuid);
        }
        self.next.store(blob.next.max(1), Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn assignment_is_monotonic_from_one() {
        let map = IdMap::new();
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        assert_eq!(map.get_or_assign(a), 1);
        assert_eq!(map.get_or_assign(b), 2);
        assert_eq!(map.get_or_assign(a), 1);
        assert_eq!(map.get_uuid(2), Some(b));
    }

    #[test]
    fn removal_never_reuses_ids() {
        let map = IdMap::new();
        let a = Uuid::new_v4();
        let int_a = map.get_or_assign(a);
        assert_eq!(map.remove(&a), Some(int_a));
        assert_eq!(map.get_int(&a), None);
        // The reverse mapping survives for old bitmap entries.
        assert_eq!(map.get_uuid(int_a), Some(a));
        // A fresh assignment advances the counter past the removed id.
        let b = Uuid::new_v4();
        assert!(map.get_or_assign(b) > int_a);
    }

    #[test]
    fn blob_round_trip_preserves_counter() {
        let map = IdMap::new();
        for _ in 0..5 {
            map.get_or_assign(Uuid::new_v4());
        }
        let survivor = Uuid::new_v4();
        let survivor_int = map.get_or_assign(survivor);
        let blob = map.to_blob();
        assert_eq!(blob.next, 7);

        let restored = IdMap::new();
        restored.load_blob(&blob);
        assert_eq!(restored.get_int(&survivor), Some(survivor_int));
        assert_eq!(restored.get_or_assign(Uuid::new_v4()), 7);
    }
}
