use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

use parking_lot::Mutex;
use serde::Deserialize;
use serde::Serialize;

use crate::TimeSource;

/// How often the in-memory backend sweeps expired entries, at most.
const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Failures raised by a storage backend.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StorageError {
    /// The backend cannot currently serve reads or writes.
    #[error("storage backend unavailable: {0}")]
    Unavailable(String),
}

/// Per-identifier strategy state, one active variant at a time.
///
/// Serializable so that non-memory backends can persist it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum StrategyState {
    TokenBucket { tokens: f64, last_refill: f64 },
    SlidingWindow { log: Vec<f64> },
    FixedWindow { count: u32, window_id: u64 },
}

/// The write half of an atomic read-modify-write cycle.
#[derive(Debug)]
pub enum Mutation {
    /// Replace the stored state and restart its TTL.
    Put {
        state: StrategyState,
        ttl: Option<Duration>,
    },
    /// Leave whatever is stored untouched.
    Keep,
}

/// Keyed state store with per-key TTL.
///
/// An entry whose TTL has passed must be invisible to `get` and `update`
/// even before any physical cleanup runs. `update` must be atomic with
/// respect to every other operation on the same key: the strategies rely on
/// it to rule out double admission under concurrent checks.
pub trait Storage: Send + Sync + fmt::Debug {
    /// Fetch the live state for `key`, or `None` if absent or expired.
    fn get(&self, key: &str) -> Result<Option<StrategyState>, StorageError>;

    /// Store `state` under `key`. A `ttl` of `None` never expires.
    fn set(
        &self,
        key: &str,
        state: StrategyState,
        ttl: Option<Duration>,
    ) -> Result<(), StorageError>;

    /// Remove `key`. Removing an absent key is not an error.
    fn delete(&self, key: &str) -> Result<(), StorageError>;

    /// Drop every stored entry.
    fn clear(&self) -> Result<(), StorageError>;

    /// Atomically read the live state for `key`, apply `apply` to it, and
    /// commit the returned [`Mutation`]. The closure is invoked exactly
    /// once; expired entries are presented to it as absent.
    fn update(
        &self,
        key: &str,
        apply: &mut dyn FnMut(Option<&StrategyState>) -> Mutation,
    ) -> Result<(), StorageError>;
}

/// Counts reported by [`InMemoryStorage::stats`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StorageStats {
    pub total_keys: usize,
    pub expired_keys: usize,
    pub active_keys: usize,
}

#[derive(Debug)]
struct Entry {
    state: StrategyState,
    expires_at: Option<f64>,
}

impl Entry {
    fn is_expired(&self, now: f64) -> bool {
        self.expires_at.is_some_and(|at| now > at)
    }
}

#[derive(Debug)]
struct Inner {
    map: HashMap<String, Entry>,
    last_sweep: f64,
}

/// The reference [`Storage`] backend.
///
/// One mutex guards the whole map, which satisfies the per-key atomicity
/// contract directly. Expired entries are dropped lazily on access, and an
/// opportunistic sweep, bounded to once per interval, bounds memory for
/// keys that are never touched again. Data lives in process memory only;
/// multi-process deployments need a shared backend.
#[derive(Debug)]
pub struct InMemoryStorage {
    inner: Mutex<Inner>,
    time: TimeSource,
    sweep_interval: f64,
}

impl InMemoryStorage {
    pub fn new() -> Self {
        Self::with_time_source(TimeSource::system())
    }

    /// Build over a caller-supplied clock, shared with the strategies so
    /// that TTL expiry and quota arithmetic see the same timeline.
    pub fn with_time_source(time: TimeSource) -> Self {
        let now = time.now();
        Self {
            inner: Mutex::new(Inner {
                map: HashMap::new(),
                last_sweep: now,
            }),
            time,
            sweep_interval: DEFAULT_SWEEP_INTERVAL.as_secs_f64(),
        }
    }

    /// Change how often the opportunistic sweep may run.
    pub fn with_sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval = interval.as_secs_f64();
        self
    }

    /// Physically remove every expired entry now.
    pub fn sweep(&self) {
        let now = self.time.now();
        let mut inner = self.inner.lock();
        Self::sweep_expired(&mut inner, now);
    }

    /// Key counts for monitoring hooks.
    pub fn stats(&self) -> StorageStats {
        let now = self.time.now();
        let inner = self.inner.lock();
        let total_keys = inner.map.len();
        let expired_keys = inner.map.values().filter(|e| e.is_expired(now)).count();
        StorageStats {
            total_keys,
            expired_keys,
            active_keys: total_keys - expired_keys,
        }
    }

    fn sweep_expired(inner: &mut Inner, now: f64) {
        inner.last_sweep = now;
        inner.map.retain(|_, entry| !entry.is_expired(now));
    }

    fn maybe_sweep(&self, inner: &mut Inner, now: f64) {
        if now - inner.last_sweep >= self.sweep_interval {
            Self::sweep_expired(inner, now);
        }
    }
}

impl Default for InMemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

impl Storage for InMemoryStorage {
    fn get(&self, key: &str) -> Result<Option<StrategyState>, StorageError> {
        let now = self.time.now();
        let mut inner = self.inner.lock();
        self.maybe_sweep(&mut inner, now);

        if inner.map.get(key).is_some_and(|e| e.is_expired(now)) {
            inner.map.remove(key);
            return Ok(None);
        }
        Ok(inner.map.get(key).map(|e| e.state.clone()))
    }

    fn set(
        &self,
        key: &str,
        state: StrategyState,
        ttl: Option<Duration>,
    ) -> Result<(), StorageError> {
        let now = self.time.now();
        let mut inner = self.inner.lock();
        let expires_at = ttl.map(|ttl| now + ttl.as_secs_f64());
        inner.map.insert(key.to_string(), Entry { state, expires_at });
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<(), StorageError> {
        let mut inner = self.inner.lock();
        inner.map.remove(key);
        Ok(())
    }

    fn clear(&self) -> Result<(), StorageError> {
        let mut inner = self.inner.lock();
        inner.map.clear();
        Ok(())
    }

    fn update(
        &self,
        key: &str,
        apply: &mut dyn FnMut(Option<&StrategyState>) -> Mutation,
    ) -> Result<(), StorageError> {
        let now = self.time.now();
        let mut inner = self.inner.lock();
        self.maybe_sweep(&mut inner, now);

        let live = inner
            .map
            .get(key)
            .filter(|e| !e.is_expired(now))
            .map(|e| &e.state);
        match apply(live) {
            Mutation::Put { state, ttl } => {
                let expires_at = ttl.map(|ttl| now + ttl.as_secs_f64());
                inner.map.insert(key.to_string(), Entry { state, expires_at });
            }
            Mutation::Keep => {
                // The closure saw an expired entry as absent; make that
                // observation physical instead of waiting for the sweep.
                if inner.map.get(key).is_some_and(|e| e.is_expired(now)) {
                    inner.map.remove(key);
                }
            }
        }
        Ok(())
    }
}
