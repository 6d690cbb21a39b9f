//! Routing of timing responses back to the peer that asked

use std::collections::HashMap;
use std::time::Duration;
use tokio::time::Instant;

/// Maps the send time of an outstanding timing request to its origin
///
/// Entries are removed when resolved. Entries older than the TTL never
/// resolve and are purged whenever a new request is recorded.
#[derive(Debug)]
pub struct TimingKeyTable<T> {
    ttl: Duration,
    entries: HashMap<u64, (T, Instant)>,
}

impl<T> TimingKeyTable<T> {
    /// Create a table whose entries expire after `ttl`
    #[must_use]
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: HashMap::new(),
        }
    }

    /// Record that the request stamped `key` came from `origin`
    pub fn observe(&mut self, key: u64, origin: T) {
        let now = Instant::now();
        self.purge(now);
        self.entries.insert(key, (origin, now));
    }

    /// Take the origin of the request answered by a response referencing `key`
    pub fn resolve(&mut self, key: u64) -> Option<T> {
        let (origin, at) = self.entries.remove(&key)?;
        (at.elapsed() <= self.ttl).then_some(origin)
    }

    fn purge(&mut self, now: Instant) {
        let ttl = self.ttl;
        self.entries
            .retain(|_, (_, at)| now.saturating_duration_since(*at) <= ttl);
    }

    /// Outstanding entries, including expired ones not yet purged
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no entry is outstanding
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drop every entry
    pub fn clear(&mut self) {
        self.entries.clear();
    }
}
