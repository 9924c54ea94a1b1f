//! Known-object sets
//!
//! Per target, per object type: which ids have been observed and the last
//! mutable marker seen for each. Lives in memory only, so a restart seeds
//! again from scratch (silently).

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Lifecycle of one (space, object type) pair
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Phase {
    #[default]
    Unseeded,
    Seeding,
    SteadyState,
}

/// Mutable marker of an object
///
/// A marker supersedes another if its version is strictly greater, or, when
/// versions are equal or missing, if its mutation time is strictly later.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Marker {
    pub version: Option<u64>,
    pub mutated_at: Option<DateTime<Utc>>,
}

impl Marker {
    pub fn new(version: Option<u64>, mutated_at: Option<DateTime<Utc>>) -> Self {
        Self {
            version,
            mutated_at,
        }
    }

    pub fn supersedes(&self, previous: &Marker) -> bool {
        if let (Some(a), Some(b)) = (self.version, previous.version) {
            if a != b {
                return a > b;
            }
        }
        if self.version.is_some() && previous.version.is_none() {
            return true;
        }
        self.mutated_at > previous.mutated_at
    }
}

#[derive(Debug, Default)]
struct TypeState {
    phase: Phase,
    ids: HashMap<String, Option<Marker>>,
    /// Known ids whose seed-time cache write failed
    uncached: HashSet<String>,
}

/// Observed ids of one target, keyed by object type
#[derive(Debug, Default)]
pub struct KnownObjects {
    types: HashMap<String, TypeState>,
}

impl KnownObjects {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn phase(&self, object_type: &str) -> Phase {
        self.types
            .get(object_type)
            .map(|t| t.phase)
            .unwrap_or_default()
    }

    /// Enter seeding; no-op once past it
    pub fn begin_seeding(&mut self, object_type: &str) {
        let state = self.types.entry(object_type.to_string()).or_default();
        if state.phase == Phase::Unseeded {
            state.phase = Phase::Seeding;
        }
    }

    /// Record the baseline snapshot and move to steady state
    pub fn complete_seed<I>(&mut self, object_type: &str, observed: I)
    where
        I: IntoIterator<Item = (String, Option<Marker>)>,
    {
        let state = self.types.entry(object_type.to_string()).or_default();
        state.ids.extend(observed);
        state.phase = Phase::SteadyState;
    }

    pub fn contains(&self, object_type: &str, id: &str) -> bool {
        self.types
            .get(object_type)
            .is_some_and(|t| t.ids.contains_key(id))
    }

    /// Last marker recorded for a known id
    pub fn marker(&self, object_type: &str, id: &str) -> Option<Marker> {
        self.types
            .get(object_type)
            .and_then(|t| t.ids.get(id).copied().flatten())
    }

    /// Mark an id as known; returns true if it was not known before
    pub fn insert(&mut self, object_type: &str, id: &str, marker: Option<Marker>) -> bool {
        let state = self.types.entry(object_type.to_string()).or_default();
        match state.ids.get_mut(id) {
            Some(existing) => {
                if marker.is_some() {
                    *existing = marker;
                }
                false
            }
            None => {
                state.ids.insert(id.to_string(), marker);
                true
            }
        }
    }

    /// Known ids of one type
    pub fn len(&self, object_type: &str) -> usize {
        self.types.get(object_type).map_or(0, |t| t.ids.len())
    }

    /// Remember that a known id is missing from the cache
    pub fn mark_uncached(&mut self, object_type: &str, id: &str) {
        let state = self.types.entry(object_type.to_string()).or_default();
        state.uncached.insert(id.to_string());
    }

    pub fn is_uncached(&self, object_type: &str, id: &str) -> bool {
        self.types
            .get(object_type)
            .is_some_and(|t| t.uncached.contains(id))
    }

    /// Forget a pending cache write; returns true if one was pending
    pub fn clear_uncached(&mut self, object_type: &str, id: &str) -> bool {
        self.types
            .get_mut(object_type)
            .is_some_and(|t| t.uncached.remove(id))
    }

    /// Known ids of one type still waiting for a cache write
    pub fn uncached_len(&self, object_type: &str) -> usize {
        self.types.get(object_type).map_or(0, |t| t.uncached.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(minute: u32) -> Option<DateTime<Utc>> {
        Some(Utc.with_ymd_and_hms(2024, 5, 1, 10, minute, 0).unwrap())
    }

    #[test]
    fn test_phases() {
        let mut known = KnownObjects::new();
        assert_eq!(known.phase("ChatMessage"), Phase::Unseeded);

        known.begin_seeding("ChatMessage");
        assert_eq!(known.phase("ChatMessage"), Phase::Seeding);

        known.complete_seed("ChatMessage", vec![("m1".to_string(), None)]);
        assert_eq!(known.phase("ChatMessage"), Phase::SteadyState);

        // Seeding again never moves backwards
        known.begin_seeding("ChatMessage");
        assert_eq!(known.phase("ChatMessage"), Phase::SteadyState);
        assert!(known.contains("ChatMessage", "m1"));
    }

    #[test]
    fn test_insert_reports_new_once() {
        let mut known = KnownObjects::new();
        assert!(known.insert("ChatChannel", "general", None));
        assert!(!known.insert("ChatChannel", "general", None));
        assert_eq!(known.len("ChatChannel"), 1);
        assert!(!known.contains("ChatMessage", "general"));
    }

    #[test]
    fn test_marker_ordering() {
        let base = Marker::new(Some(1), None);
        assert!(Marker::new(Some(2), None).supersedes(&base));
        assert!(!Marker::new(Some(1), None).supersedes(&base));
        assert!(!Marker::new(Some(0), at(30)).supersedes(&base));

        let edited = Marker::new(None, at(5));
        assert!(edited.supersedes(&Marker::default()));
        assert!(Marker::new(None, at(6)).supersedes(&edited));
        assert!(!Marker::new(None, at(5)).supersedes(&edited));
    }

    #[test]
    fn test_uncached_ids() {
        let mut known = KnownObjects::new();
        known.complete_seed("ChatChannel", vec![("a".to_string(), None)]);
        known.mark_uncached("ChatChannel", "a");

        assert!(known.is_uncached("ChatChannel", "a"));
        assert!(!known.is_uncached("ChatMessage", "a"));
        assert_eq!(known.uncached_len("ChatChannel"), 1);

        assert!(known.clear_uncached("ChatChannel", "a"));
        assert!(!known.clear_uncached("ChatChannel", "a"));
        assert_eq!(known.uncached_len("ChatChannel"), 0);
        assert!(known.contains("ChatChannel", "a"));
    }

    #[test]
    fn test_marker_kept_when_insert_has_none() {
        let mut known = KnownObjects::new();
        known.insert("ChatMessage", "m1", Some(Marker::new(Some(3), None)));
        known.insert("ChatMessage", "m1", None);
        assert_eq!(known.marker("ChatMessage", "m1").unwrap().version, Some(3));
    }
}
