//! What has been published, and what is about to be.
//!
//! `known` maps a record id to the version last published for it. `scheduled`
//! holds the `id:version` keys currently claimed by a release. Every
//! check-then-act on both goes through the per-id entry lock of `known`
//! first, then `scheduled`.

use dashmap::mapref::entry::Entry;
use dashmap::{DashMap, DashSet};
use situfeed_core::{KnownRecord, SituationRecord};
use std::collections::HashSet;
use std::sync::Arc;

/// Result of comparing a fresh feed snapshot with tracked state.
#[derive(Debug, Default)]
pub struct Classification {
    pub new: Vec<SituationRecord>,
    pub updated: Vec<SituationRecord>,
    /// Already claimed at this exact version; release in flight.
    pub pending: Vec<SituationRecord>,
    pub unchanged: Vec<SituationRecord>,
    /// Tracked ids missing from the snapshot.
    pub deleted: Vec<KnownRecord>,
}

impl Classification {
    /// Records that need a release, new ones first.
    pub fn releasable(&mut self) -> Vec<SituationRecord> {
        let mut out = std::mem::take(&mut self.new);
        out.append(&mut self.updated);
        out
    }
}

#[derive(Debug, Default)]
pub struct ChangeTracker {
    known: DashMap<String, KnownRecord>,
    scheduled: DashSet<String>,
}

impl ChangeTracker {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn classify(&self, fresh: Vec<SituationRecord>) -> Classification {
        let ids: HashSet<&str> = fresh.iter().map(|r| r.id.as_str()).collect();
        let deleted = self
            .known
            .iter()
            .filter(|entry| !ids.contains(entry.key().as_str()))
            .map(|entry| entry.value().clone())
            .collect();

        let mut out = Classification {
            deleted,
            ..Classification::default()
        };
        for record in fresh {
            let tracked = self.known.get(&record.id).map(|k| k.version.clone());
            match tracked {
                Some(version) if version == record.version => out.unchanged.push(record),
                _ if self.scheduled.contains(&record.key()) => out.pending.push(record),
                Some(_) => out.updated.push(record),
                None => out.new.push(record),
            }
        }
        out
    }

    /// Claims the release of `record`. `None` when this version is already
    /// published or another release holds the claim.
    pub fn claim(self: &Arc<Self>, record: &SituationRecord) -> Option<ClaimGuard> {
        let key = record.key();
        let entry = self.known.entry(record.id.clone());
        if let Entry::Occupied(current) = &entry {
            if current.get().version == record.version {
                return None;
            }
        }
        if !self.scheduled.insert(key.clone()) {
            return None;
        }
        drop(entry);
        Some(ClaimGuard {
            tracker: Arc::clone(self),
            key,
            committed: false,
        })
    }

    fn commit(&self, known: KnownRecord, key: &str) {
        let entry = self.known.entry(known.id.clone());
        let _published = entry.insert(known);
        self.scheduled.remove(key);
    }

    /// Forgets `known` after its deletion notice went out. A newer version
    /// tracked in the meantime stays.
    pub fn retire(&self, known: &KnownRecord) -> bool {
        self.known
            .remove_if(&known.id, |_, current| current.version == known.version)
            .is_some()
    }

    pub fn get(&self, id: &str) -> Option<KnownRecord> {
        self.known.get(id).map(|entry| entry.value().clone())
    }

    pub fn is_scheduled(&self, key: &str) -> bool {
        self.scheduled.contains(key)
    }

    pub fn known_len(&self) -> usize {
        self.known.len()
    }

    pub fn scheduled_len(&self) -> usize {
        self.scheduled.len()
    }
}

/// Exclusive right to release one `id:version`. Dropping it without
/// [`commit`](ClaimGuard::commit) gives the key back, so a failed, aborted or
/// panicking release never leaves it claimed.
#[derive(Debug)]
pub struct ClaimGuard {
    tracker: Arc<ChangeTracker>,
    key: String,
    committed: bool,
}

impl ClaimGuard {
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Records `known` as published and releases the claim atomically.
    pub fn commit(mut self, known: KnownRecord) {
        self.tracker.commit(known, &self.key);
        self.committed = true;
    }
}

impl Drop for ClaimGuard {
    fn drop(&mut self) {
        if !self.committed {
            self.tracker.scheduled.remove(&self.key);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use situfeed_core::{Node, Object};

    fn record(id: &str, version: &str) -> SituationRecord {
        let body = Object::new("Accident")
            .with("id", Node::text(id))
            .with("version", Node::text(version));
        SituationRecord::from_object(body).unwrap()
    }

    fn publish(tracker: &Arc<ChangeTracker>, rec: &SituationRecord) {
        tracker.claim(rec).unwrap().commit(rec.known());
    }

    #[test]
    fn classifies_against_known_versions() {
        let tracker = ChangeTracker::new();
        publish(&tracker, &record("A", "1"));
        publish(&tracker, &record("B", "1"));

        let c = tracker.classify(vec![record("A", "1"), record("B", "2"), record("C", "1")]);
        assert_eq!(c.unchanged.len(), 1);
        assert_eq!(c.updated[0].id, "B");
        assert_eq!(c.new[0].id, "C");
        assert!(c.deleted.is_empty());
    }

    #[test]
    fn missing_ids_are_deleted() {
        let tracker = ChangeTracker::new();
        publish(&tracker, &record("A", "1"));
        let c = tracker.classify(Vec::new());
        assert_eq!(c.deleted.len(), 1);
        assert_eq!(c.deleted[0].id, "A");
    }

    #[test]
    fn claimed_key_is_pending_and_not_claimable_twice() {
        let tracker = ChangeTracker::new();
        let rec = record("A", "1");
        let guard = tracker.claim(&rec).unwrap();
        assert!(tracker.claim(&rec).is_none());

        let c = tracker.classify(vec![rec.clone()]);
        assert_eq!(c.pending.len(), 1);
        assert!(c.new.is_empty());

        drop(guard);
        assert!(!tracker.is_scheduled(&rec.key()));
        assert!(tracker.claim(&rec).is_some());
    }

    #[test]
    fn commit_replaces_known_and_frees_key() {
        let tracker = ChangeTracker::new();
        publish(&tracker, &record("A", "1"));
        let v2 = record("A", "2");
        publish(&tracker, &v2);
        assert_eq!(tracker.get("A").unwrap().version, "2");
        assert_eq!(tracker.scheduled_len(), 0);
        assert!(tracker.claim(&v2).is_none());
    }

    #[test]
    fn retire_keeps_newer_version() {
        let tracker = ChangeTracker::new();
        let v1 = record("A", "1").known();
        publish(&tracker, &record("A", "2"));
        assert!(!tracker.retire(&v1));
        assert_eq!(tracker.known_len(), 1);
        let v2 = tracker.get("A").unwrap();
        assert!(tracker.retire(&v2));
        assert_eq!(tracker.known_len(), 0);
    }
}
