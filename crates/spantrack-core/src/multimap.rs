//! Entity -> group-set multimap with idle-entry eviction

use chrono::{DateTime, Duration, Utc};
use std::collections::{HashMap, HashSet};
use std::hash::Hash;

/// Tracks which groups each entity currently belongs to, plus when each
/// entity was first seen.
///
/// Group sets are dropped as soon as they become empty. First-seen stamps
/// outlive them until [`TtlMultimap::sweep`] finds them older than the TTL,
/// which bounds memory for long-lived processes. Membership is never
/// changed by a sweep.
#[derive(Debug, Clone)]
pub struct TtlMultimap<E, G> {
    groups: HashMap<E, HashSet<G>>,
    first_seen: HashMap<E, DateTime<Utc>>,
    ttl: Duration,
}

impl<E, G> TtlMultimap<E, G>
where
    E: Eq + Hash + Clone,
    G: Eq + Hash + Clone,
{
    pub fn new(ttl: Duration) -> Self {
        Self {
            groups: HashMap::new(),
            first_seen: HashMap::new(),
            ttl,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Groups an entity currently belongs to
    pub fn groups_of(&self, entity: &E) -> Option<&HashSet<G>> {
        self.groups.get(entity)
    }

    pub fn contains(&self, entity: &E, group: &G) -> bool {
        self.groups
            .get(entity)
            .map(|set| set.contains(group))
            .unwrap_or(false)
    }

    /// Add `group` to the entity's set. Returns `false` if already present.
    pub fn insert(&mut self, entity: E, group: G, now: DateTime<Utc>) -> bool {
        self.first_seen.entry(entity.clone()).or_insert(now);
        self.groups.entry(entity).or_default().insert(group)
    }

    /// Remove `group` from the entity's set, dropping the set once empty
    pub fn remove(&mut self, entity: &E, group: &G) -> bool {
        let Some(set) = self.groups.get_mut(entity) else {
            return false;
        };
        let removed = set.remove(group);
        if set.is_empty() {
            self.groups.remove(entity);
        }
        removed
    }

    pub fn first_seen(&self, entity: &E) -> Option<DateTime<Utc>> {
        self.first_seen.get(entity).copied()
    }

    /// Evict first-seen stamps older than the TTL whose entity has no groups.
    /// Returns the evicted entities.
    pub fn sweep(&mut self, now: DateTime<Utc>) -> Vec<E> {
        let cutoff = now - self.ttl;
        let groups = &self.groups;
        let mut evicted = Vec::new();
        self.first_seen.retain(|entity, seen| {
            let keep = *seen >= cutoff || groups.contains_key(entity);
            if !keep {
                evicted.push(entity.clone());
            }
            keep
        });
        evicted
    }

    /// Entities with at least one group
    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    /// Entities with a first-seen stamp, grouped or idle
    pub fn tracked(&self) -> usize {
        self.first_seen.len()
    }

    pub fn entities(&self) -> impl Iterator<Item = &E> {
        self.groups.keys()
    }

    pub fn clear(&mut self) {
        self.groups.clear();
        self.first_seen.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn map() -> TtlMultimap<&'static str, &'static str> {
        TtlMultimap::new(Duration::hours(24))
    }

    #[test]
    fn test_insert_and_remove() {
        let now = Utc::now();
        let mut m = map();

        assert!(m.insert("s1", "a", now));
        assert!(!m.insert("s1", "a", now));
        assert!(m.insert("s1", "b", now));
        assert!(m.contains(&"s1", &"a"));
        assert_eq!(m.groups_of(&"s1").map(|g| g.len()), Some(2));

        assert!(m.remove(&"s1", &"a"));
        assert!(!m.remove(&"s1", &"a"));
        assert!(m.remove(&"s1", &"b"));
        assert!(m.groups_of(&"s1").is_none());
        assert!(m.is_empty());
        assert_eq!(m.tracked(), 1, "first-seen survives an empty set");
    }

    #[test]
    fn test_first_seen_is_not_overwritten() {
        let t0 = Utc::now();
        let mut m = map();
        m.insert("s1", "a", t0);
        m.insert("s1", "b", t0 + Duration::hours(1));
        assert_eq!(m.first_seen(&"s1"), Some(t0));
    }

    #[test]
    fn test_sweep_only_evicts_idle_and_expired() {
        let t0 = Utc::now();
        let mut m = map();
        m.insert("idle-old", "a", t0);
        m.remove(&"idle-old", &"a");
        m.insert("busy-old", "a", t0);
        m.insert("idle-new", "a", t0 + Duration::hours(20));
        m.remove(&"idle-new", &"a");

        let evicted = m.sweep(t0 + Duration::hours(25));

        assert_eq!(evicted, vec!["idle-old"]);
        assert!(m.first_seen(&"idle-old").is_none());
        assert!(m.first_seen(&"busy-old").is_some());
        assert!(m.first_seen(&"idle-new").is_some());
        assert!(m.contains(&"busy-old", &"a"));
    }
}
