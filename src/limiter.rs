//! Per-second request admission shared across replicas.
//!
//! A [`QpsLimiterSet`] holds one counter family per caller-assigned key.
//! Each key has a top limit: the total queries per second the fleet may
//! spend on it. Every replica runs the same code against the same limits,
//! so a replica's share is the top limit divided (integer division) by the
//! current replica count. Admission is a single atomic increment on the
//! current second's counter; stale seconds are pruned by [`gc`].
//!
//! [`gc`]: QpsLimiterSet::gc

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::num::NonZeroU32;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};
use thiserror::Error;

/// How long consumed-second counters are kept before [`QpsLimiterSet::gc`]
/// may drop them.
const RETENTION_SECONDS: i64 = 10;

/// Errors raised by admission checks.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LimiterError {
    #[error("Replica count has not been configured")]
    ReplicasUnset,

    #[error("No limiter configured for key '{0}'")]
    UnknownKey(String),

    #[error("Limiter state lock poisoned")]
    Poisoned,
}

/// One key's counters: a top limit and per-second consumption.
#[derive(Debug)]
struct QpsLimiter {
    top_limit: AtomicU32,
    consumed: RwLock<HashMap<i64, AtomicU32>>,
}

impl QpsLimiter {
    fn new(top_limit: u32) -> Self {
        Self {
            top_limit: AtomicU32::new(top_limit),
            consumed: RwLock::new(HashMap::new()),
        }
    }

    fn set_top_limit(&self, limit: u32) {
        self.top_limit.store(limit, Ordering::Relaxed);
    }

    /// Consumes one unit from the current second and reports whether it fit
    /// into this replica's share. A zero share admits nothing.
    fn consume_with_check(&self, replicas: NonZeroU32, at: DateTime<Utc>) -> Result<bool, LimiterError> {
        let second = at.timestamp();
        let share = self.top_limit.load(Ordering::Relaxed) / replicas.get();

        {
            let consumed = self.consumed.read().map_err(|_| LimiterError::Poisoned)?;
            if let Some(counter) = consumed.get(&second) {
                return Ok(counter.fetch_add(1, Ordering::Relaxed).saturating_add(1) <= share);
            }
        }

        let mut consumed = self.consumed.write().map_err(|_| LimiterError::Poisoned)?;
        let counter = consumed.entry(second).or_default();
        Ok(counter.fetch_add(1, Ordering::Relaxed).saturating_add(1) <= share)
    }

    fn gc(&self, cutoff: i64) -> Result<(), LimiterError> {
        let mut consumed = self.consumed.write().map_err(|_| LimiterError::Poisoned)?;
        consumed.retain(|second, _| *second >= cutoff);
        Ok(())
    }
}

/// Keyed admission limiters sharing one replica count.
///
/// The replica count starts unset; [`check`](Self::check) refuses to guess
/// and errors until [`set_replicas`](Self::set_replicas) has been called.
/// This is what lets a deployment watch drive the count: wire an update
/// handler to `set_replicas` and every limiter in the set rescales on the
/// next check.
#[derive(Debug, Default)]
pub struct QpsLimiterSet {
    replicas: AtomicU32,
    limiters: RwLock<HashMap<String, Arc<QpsLimiter>>>,
}

impl QpsLimiterSet {
    /// Creates an empty set with the replica count unset.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets how many replicas share each top limit.
    pub fn set_replicas(&self, replicas: NonZeroU32) {
        self.replicas.store(replicas.get(), Ordering::Relaxed);
    }

    /// The configured replica count, if any.
    #[must_use]
    pub fn replicas(&self) -> Option<NonZeroU32> {
        NonZeroU32::new(self.replicas.load(Ordering::Relaxed))
    }

    /// Sets (or installs) the fleet-wide per-second limit for a key.
    ///
    /// # Errors
    /// Fails only on a poisoned lock.
    pub fn set_top_limit(&self, key: impl Into<String>, limit: u32) -> Result<(), LimiterError> {
        let mut limiters = self.limiters.write().map_err(|_| LimiterError::Poisoned)?;
        match limiters.entry(key.into()) {
            Entry::Occupied(slot) => slot.get().set_top_limit(limit),
            Entry::Vacant(slot) => {
                slot.insert(Arc::new(QpsLimiter::new(limit)));
            }
        }
        Ok(())
    }

    /// Consumes one unit for `key` at the current instant.
    ///
    /// # Errors
    /// Returns [`LimiterError::ReplicasUnset`] before the replica count is
    /// configured and [`LimiterError::UnknownKey`] for a key without a
    /// limit.
    pub fn check(&self, key: &str) -> Result<bool, LimiterError> {
        self.check_at(key, Utc::now())
    }

    /// Consumes one unit for `key` against an explicit instant.
    ///
    /// # Errors
    /// Same conditions as [`check`](Self::check).
    pub fn check_at(&self, key: &str, at: DateTime<Utc>) -> Result<bool, LimiterError> {
        let Some(replicas) = self.replicas() else {
            return Err(LimiterError::ReplicasUnset);
        };

        let limiter = {
            let limiters = self.limiters.read().map_err(|_| LimiterError::Poisoned)?;
            limiters.get(key).cloned()
        };
        let Some(limiter) = limiter else {
            return Err(LimiterError::UnknownKey(key.to_string()));
        };

        limiter.consume_with_check(replicas, at)
    }

    /// Drops consumed-second counters older than the retention window.
    ///
    /// # Errors
    /// Fails only on a poisoned lock.
    pub fn gc(&self) -> Result<(), LimiterError> {
        self.gc_at(Utc::now())
    }

    fn gc_at(&self, now: DateTime<Utc>) -> Result<(), LimiterError> {
        let cutoff = now.timestamp() - RETENTION_SECONDS;
        let limiters: Vec<Arc<QpsLimiter>> = {
            let limiters = self.limiters.read().map_err(|_| LimiterError::Poisoned)?;
            limiters.values().cloned().collect()
        };
        for limiter in limiters {
            limiter.gc(cutoff)?;
        }
        Ok(())
    }
}
