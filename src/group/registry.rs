use std::time::{Duration, Instant};

use dashmap::DashMap;
use serde::Serialize;

use crate::group::GroupKey;

/// Metadata of a declared group.
///
/// `priority`, `created_at` and `min_members` come from the first member
/// observed and are never changed by later members.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupRecord {
    pub key: GroupKey,
    /// Group name, empty for ungrouped units
    pub name: String,
    pub priority: i32,
    pub created_at: Instant,
    /// 0 for ungrouped units
    pub min_members: usize,
    pub marked_for_deletion_at: Option<Instant>,
}

impl GroupRecord {
    pub fn is_grouped(&self) -> bool {
        !self.key.is_empty()
    }

    pub fn is_marked_for_deletion(&self) -> bool {
        self.marked_for_deletion_at.is_some()
    }

    /// True once the record has been marked for at least `expiration`.
    pub fn is_expired(&self, now: Instant, expiration: Duration) -> bool {
        self.marked_for_deletion_at
            .is_some_and(|marked| now.saturating_duration_since(marked) >= expiration)
    }
}

/// Serializable view of a record for status output.
#[derive(Debug, Clone, Serialize)]
pub struct GroupSummary {
    pub key: GroupKey,
    pub name: String,
    pub priority: i32,
    pub min_members: usize,
    pub age_ms: u64,
    pub marked_for_deletion: bool,
}

/// Concurrent map of group records. Callers never lock it themselves.
#[derive(Debug, Default)]
pub struct GroupRegistry {
    groups: DashMap<GroupKey, GroupRecord>,
}

impl GroupRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &GroupKey) -> Option<GroupRecord> {
        self.groups.get(key).map(|r| r.value().clone())
    }

    /// Return the record for `key`, clearing its deletion mark, or insert the
    /// record built by `create` if none exists. Atomic per key.
    pub fn get_or_insert_with(
        &self,
        key: GroupKey,
        create: impl FnOnce() -> GroupRecord,
    ) -> GroupRecord {
        self.groups
            .entry(key)
            .and_modify(|record| {
                if record.marked_for_deletion_at.take().is_some() {
                    tracing::debug!(group = %record.key, "Group reused before expiry, deletion mark cleared");
                }
            })
            .or_insert_with(create)
            .value()
            .clone()
    }

    /// Mark `key` for deletion at `now` unless it is already marked.
    /// Returns true if the mark was set by this call.
    pub fn mark_for_deletion(&self, key: &GroupKey, now: Instant) -> bool {
        match self.groups.get_mut(key) {
            Some(mut record) if record.marked_for_deletion_at.is_none() => {
                record.marked_for_deletion_at = Some(now);
                true
            }
            _ => false,
        }
    }

    /// Remove every record marked for at least `expiration` and return their keys.
    pub fn remove_expired(&self, now: Instant, expiration: Duration) -> Vec<GroupKey> {
        let mut removed = Vec::new();
        self.groups.retain(|key, record| {
            if record.is_expired(now, expiration) {
                removed.push(key.clone());
                false
            } else {
                true
            }
        });
        removed
    }

    pub fn snapshot(&self, now: Instant) -> Vec<GroupSummary> {
        let mut groups: Vec<GroupSummary> = self
            .groups
            .iter()
            .map(|entry| {
                let record = entry.value();
                GroupSummary {
                    key: record.key.clone(),
                    name: record.name.clone(),
                    priority: record.priority,
                    min_members: record.min_members,
                    age_ms: u64::try_from(now.saturating_duration_since(record.created_at).as_millis())
                        .unwrap_or(u64::MAX),
                    marked_for_deletion: record.is_marked_for_deletion(),
                }
            })
            .collect();
        groups.sort_by(|a, b| a.key.cmp(&b.key));
        groups
    }

    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(key: &GroupKey, created_at: Instant) -> GroupRecord {
        GroupRecord {
            key: key.clone(),
            name: "g".to_string(),
            priority: 5,
            created_at,
            min_members: 2,
            marked_for_deletion_at: None,
        }
    }

    #[test]
    fn insert_once_then_reuse() {
        let registry = GroupRegistry::new();
        let key = GroupKey::new("ns", "g");
        let t0 = Instant::now();

        let first = registry.get_or_insert_with(key.clone(), || record(&key, t0));
        let later = t0 + Duration::from_secs(1);
        let second = registry.get_or_insert_with(key.clone(), || record(&key, later));

        assert_eq!(first.created_at, t0);
        assert_eq!(second.created_at, t0);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn lookup_clears_deletion_mark() {
        let registry = GroupRegistry::new();
        let key = GroupKey::new("ns", "g");
        let t0 = Instant::now();
        registry.get_or_insert_with(key.clone(), || record(&key, t0));

        assert!(registry.mark_for_deletion(&key, t0));
        assert!(!registry.mark_for_deletion(&key, t0 + Duration::from_secs(1)));
        assert_eq!(registry.get(&key).unwrap().marked_for_deletion_at, Some(t0));

        let reused = registry.get_or_insert_with(key.clone(), || record(&key, t0));
        assert!(!reused.is_marked_for_deletion());
    }

    #[test]
    fn mark_unknown_key_is_noop() {
        let registry = GroupRegistry::new();
        assert!(!registry.mark_for_deletion(&GroupKey::new("ns", "missing"), Instant::now()));
        assert!(registry.is_empty());
    }

    #[test]
    fn remove_expired_respects_window() {
        let registry = GroupRegistry::new();
        let t0 = Instant::now();
        let marked = GroupKey::new("ns", "marked");
        let live = GroupKey::new("ns", "live");
        registry.get_or_insert_with(marked.clone(), || record(&marked, t0));
        registry.get_or_insert_with(live.clone(), || record(&live, t0));
        registry.mark_for_deletion(&marked, t0);

        let window = Duration::from_secs(10);
        assert!(registry
            .remove_expired(t0 + Duration::from_secs(9), window)
            .is_empty());
        assert_eq!(registry.remove_expired(t0 + window, window), vec![marked]);
        assert_eq!(registry.len(), 1);
        assert!(registry.get(&live).is_some());
    }

    #[test]
    fn snapshot_is_sorted_by_key() {
        let registry = GroupRegistry::new();
        let t0 = Instant::now();
        for name in ["b", "a", "c"] {
            let key = GroupKey::new("ns", name);
            registry.get_or_insert_with(key.clone(), || record(&key, t0));
        }
        let keys: Vec<String> = registry
            .snapshot(t0)
            .into_iter()
            .map(|s| s.key.to_string())
            .collect();
        assert_eq!(keys, vec!["ns/a", "ns/b", "ns/c"]);
    }
}
