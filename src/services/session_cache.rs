//! Session snapshot cache
//!
//! Caches the enrollment snapshot a session is currently working through so
//! repeated step evaluations within one session skip the database. Entries
//! are keyed by a typed (session id, topic id) pair, so a snapshot is never
//! served to another session, and a request for a different topic is a miss
//! no matter what characters the ids contain. Writers must invalidate (or
//! overwrite) the entry after every durable progression write.

use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, info};

use crate::db::EnrollmentSnapshot;

/// Default snapshot TTL
const DEFAULT_TTL: Duration = Duration::from_secs(1800);

/// Default entry cap before old entries are purged
const DEFAULT_MAX_ENTRIES: usize = 10_000;

/// Identifies one session's snapshot of one topic
///
/// Ids are opaque strings and may contain any character, including ':'.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct SessionKey {
    session_id: String,
    topic_id: String,
}

impl SessionKey {
    fn new(session_id: &str, topic_id: &str) -> Self {
        Self {
            session_id: session_id.to_string(),
            topic_id: topic_id.to_string(),
        }
    }
}

struct SessionEntry {
    snapshot: EnrollmentSnapshot,
    cached_at: Instant,
    expires_at: Instant,
}

/// Statistics for the session cache
#[derive(Debug, Clone, Default)]
pub struct SessionCacheStats {
    pub entry_count: usize,
    pub hits: u64,
    pub misses: u64,
    pub expirations: u64,
}

impl SessionCacheStats {
    /// Calculate hit rate as percentage
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            (self.hits as f64 / total as f64) * 100.0
        }
    }
}

/// Per-session enrollment snapshot cache
///
/// Thread-safe with O(1) operations using DashMap.
pub struct SessionCache {
    entries: DashMap<SessionKey, SessionEntry>,
    hits: AtomicU64,
    misses: AtomicU64,
    expirations: AtomicU64,
    ttl: Duration,
    max_entries: usize,
}

impl SessionCache {
    /// Create a new cache with the given TTL and entry cap
    pub fn new(ttl: Duration, max_entries: usize) -> Self {
        info!(
            ttl_secs = ttl.as_secs(),
            max_entries = max_entries,
            "SessionCache initialized"
        );

        Self {
            entries: DashMap::new(),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            expirations: AtomicU64::new(0),
            ttl,
            max_entries,
        }
    }

    /// Create with default configuration
    pub fn with_defaults() -> Self {
        Self::new(DEFAULT_TTL, DEFAULT_MAX_ENTRIES)
    }

    /// Get the cached snapshot for a session's topic. O(1).
    pub fn get(&self, session_id: &str, topic_id: &str) -> Option<EnrollmentSnapshot> {
        let key = SessionKey::new(session_id, topic_id);

        if let Some(entry) = self.entries.get(&key) {
            if Instant::now() < entry.expires_at {
                self.hits.fetch_add(1, Ordering::Relaxed);
                debug!(session = session_id, topic = topic_id, "Session cache hit");
                return Some(entry.snapshot.clone());
            }
            // Expired
            drop(entry);
            self.entries.remove(&key);
            self.expirations.fetch_add(1, Ordering::Relaxed);
        }

        self.misses.fetch_add(1, Ordering::Relaxed);
        debug!(session = session_id, topic = topic_id, "Session cache miss");
        None
    }

    /// Store a snapshot for a session. O(1) amortized.
    pub fn put(&self, session_id: &str, snapshot: EnrollmentSnapshot) {
        if self.entries.len() >= self.max_entries {
            self.purge_expired();
            self.evict_oldest_until_fits();
        }

        let key = SessionKey::new(session_id, &snapshot.enrollment.topic_id);
        let now = Instant::now();

        debug!(session = session_id, topic = %snapshot.enrollment.topic_id, "Session snapshot cached");
        self.entries.insert(key, SessionEntry {
            snapshot,
            cached_at: now,
            expires_at: now + self.ttl,
        });
    }

    /// Drop every cached snapshot for a session. O(n).
    pub fn invalidate(&self, session_id: &str) -> usize {
        let keys_to_remove: Vec<SessionKey> = self
            .entries
            .iter()
            .filter(|e| e.key().session_id == session_id)
            .map(|e| e.key().clone())
            .collect();

        for key in &keys_to_remove {
            self.entries.remove(key);
        }

        keys_to_remove.len()
    }

    /// Drop one session's snapshot of one topic. O(1).
    pub fn invalidate_topic(&self, session_id: &str, topic_id: &str) -> bool {
        let key = SessionKey::new(session_id, topic_id);
        self.entries.remove(&key).is_some()
    }

    /// Drop every session's snapshot of one topic. O(n).
    ///
    /// For administrative rewrites, where the acting session is not the
    /// one holding the snapshot.
    pub fn invalidate_topic_all_sessions(&self, topic_id: &str) -> usize {
        let keys_to_remove: Vec<SessionKey> = self
            .entries
            .iter()
            .filter(|e| e.key().topic_id == topic_id)
            .map(|e| e.key().clone())
            .collect();

        for key in &keys_to_remove {
            self.entries.remove(key);
        }

        keys_to_remove.len()
    }

    /// Remove all expired entries
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let expired: Vec<SessionKey> = self
            .entries
            .iter()
            .filter(|e| now >= e.expires_at)
            .map(|e| e.key().clone())
            .collect();

        for key in &expired {
            if self.entries.remove(key).is_some() {
                self.expirations.fetch_add(1, Ordering::Relaxed);
            }
        }

        if !expired.is_empty() {
            debug!(purged = expired.len(), "Purged expired session snapshots");
        }

        expired.len()
    }

    /// Evict oldest entries until under the cap
    fn evict_oldest_until_fits(&self) {
        if self.entries.len() < self.max_entries {
            return;
        }

        let mut by_age: Vec<(SessionKey, Instant)> = self
            .entries
            .iter()
            .map(|e| (e.key().clone(), e.cached_at))
            .collect();

        by_age.sort_by_key(|(_, cached_at)| *cached_at);

        for (key, _) in by_age {
            if self.entries.len() < self.max_entries {
                break;
            }
            self.entries.remove(&key);
        }
    }

    /// Clear all entries
    pub fn clear(&self) {
        self.entries.clear();
    }

    /// Get cache statistics
    pub fn stats(&self) -> SessionCacheStats {
        SessionCacheStats {
            entry_count: self.entries.len(),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            expirations: self.expirations.load(Ordering::Relaxed),
        }
    }
}

impl Default for SessionCache {
    fn default() -> Self {
        Self::with_defaults()
    }
}
