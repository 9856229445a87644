use indexmap::IndexMap;
use std::time::{Duration, Instant};

pub const DEFAULT_DEDUP_CAPACITY: usize = 1_000;
pub const DEFAULT_DEDUP_TTL: Duration = Duration::from_secs(60 * 60);

/// Bounded set of already-processed event ids.
///
/// Two limits apply independently: at most `capacity` ids are retained (the
/// oldest-inserted go first), and every id is forgotten `ttl` after it was
/// first seen. Because the TTL is the same for every entry, insertion order is
/// also expiry order, so expiry only ever has to look at the front of the map.
///
/// The cache takes the current time as an argument instead of reading a clock,
/// which keeps it deterministic under test and lets the runtime layer feed it
/// a pausable clock.
#[derive(Debug, Clone)]
pub struct DedupCache {
    entries: IndexMap<String, Instant>,
    capacity: usize,
    ttl: Duration,
}

impl Default for DedupCache {
    fn default() -> Self {
        Self::new(DEFAULT_DEDUP_CAPACITY, DEFAULT_DEDUP_TTL)
    }
}

impl DedupCache {
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: IndexMap::with_capacity(capacity),
            capacity,
            ttl,
        }
    }

    /// Returns `true` the first time `id` is seen (and records it), `false`
    /// for every later call until the entry expires or is evicted.
    pub fn observe_once(&mut self, id: &str, now: Instant) -> bool {
        self.evict_expired(now);

        if self.entries.contains_key(id) {
            return false;
        }

        self.entries.insert(id.to_string(), now);
        while self.entries.len() > self.capacity {
            self.entries.shift_remove_index(0);
        }
        true
    }

    /// Drops every entry whose TTL has elapsed at `now`. Returns how many
    /// were removed. Removing an already-removed id is a no-op.
    pub fn evict_expired(&mut self, now: Instant) -> usize {
        let mut removed = 0;
        while let Some((_, inserted_at)) = self.entries.first() {
            if now.saturating_duration_since(*inserted_at) < self.ttl {
                break;
            }
            self.entries.shift_remove_index(0);
            removed += 1;
        }
        removed
    }

    pub fn contains(&self, id: &str, now: Instant) -> bool {
        self.entries
            .get(id)
            .is_some_and(|inserted_at| now.saturating_duration_since(*inserted_at) < self.ttl)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }
}
