//! Replay detection ledger.
//!
//! A nonce is remembered together with the context it was used in and the creation time of the
//! message carrying it. Entries only need to be kept for as long as a message with that creation
//! time could still pass the expiration check, so the memory store groups them in buckets by
//! timestamp and drops whole buckets once they are older than the maximum message age.
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;

use crate::deadline::Deadline;
use crate::error::Result;

/// Remembers consumed nonces.
pub trait NonceStore: Send + Sync {
    /// Atomically record the triple, returning `false` if it was already present.
    ///
    /// A triple whose timestamp is older than the remembered window can not be checked and is
    /// also refused. When the deadline has passed, nothing is recorded.
    fn try_consume(&self, context: &str, nonce: &str, timestamp: DateTime<Utc>, deadline: &Deadline)
        -> Result<bool>;

    /// Forget all entries too old to matter at `now`.
    fn purge_expired(&self, now: DateTime<Utc>);
}

impl<S: NonceStore + ?Sized> NonceStore for Arc<S> {
    fn try_consume(&self, context: &str, nonce: &str, timestamp: DateTime<Utc>, deadline: &Deadline)
        -> Result<bool>
    {
        (**self).try_consume(context, nonce, timestamp, deadline)
    }

    fn purge_expired(&self, now: DateTime<Utc>) {
        (**self).purge_expired(now)
    }
}

impl<S: NonceStore + ?Sized> NonceStore for Box<S> {
    fn try_consume(&self, context: &str, nonce: &str, timestamp: DateTime<Utc>, deadline: &Deadline)
        -> Result<bool>
    {
        (**self).try_consume(context, nonce, timestamp, deadline)
    }

    fn purge_expired(&self, now: DateTime<Utc>) {
        (**self).purge_expired(now)
    }
}

/// In-memory nonce ledger behind a single mutex.
pub struct MemoryNonceStore {
    maximum_age: Duration,
    ledger: Mutex<Ledger>,
}

#[derive(Default)]
struct Ledger {
    /// Seconds since the epoch to the (context, nonce) pairs seen with that timestamp.
    buckets: BTreeMap<i64, HashSet<(String, String)>>,
    last_purge: Option<DateTime<Utc>>,
}

impl MemoryNonceStore {
    /// A store remembering nonces for the given maximum message age.
    ///
    /// Use the same age as the expiration binding element, plus the allowed clock skew.
    pub fn new(maximum_age: Duration) -> Self {
        MemoryNonceStore {
            maximum_age,
            ledger: Mutex::new(Ledger::default()),
        }
    }

    /// Number of remembered nonces.
    pub fn len(&self) -> usize {
        self.ledger.lock().buckets.values().map(HashSet::len).sum()
    }

    /// Whether no nonce is remembered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Ledger {
    fn purge(&mut self, oldest: i64) {
        // Keep only buckets at or after the oldest acceptable second.
        let kept = self.buckets.split_off(&oldest);
        self.buckets = kept;
    }
}

impl NonceStore for MemoryNonceStore {
    fn try_consume(&self, context: &str, nonce: &str, timestamp: DateTime<Utc>, deadline: &Deadline)
        -> Result<bool>
    {
        deadline.check()?;

        let now = Utc::now();
        let oldest = now - self.maximum_age;
        if timestamp < oldest {
            tracing::debug!(context, "nonce older than the remembered window");
            return Ok(false);
        }

        let mut guard = self.ledger.lock();
        let ledger = &mut *guard;
        if ledger.last_purge.map_or(true, |last| now - last > self.maximum_age) {
            ledger.purge(oldest.timestamp());
            ledger.last_purge = Some(now);
        }

        let fresh = ledger
            .buckets
            .entry(timestamp.timestamp())
            .or_default()
            .insert((context.to_string(), nonce.to_string()));
        Ok(fresh)
    }

    fn purge_expired(&self, now: DateTime<Utc>) {
        let oldest = (now - self.maximum_age).timestamp();
        let mut guard = self.ledger.lock();
        guard.purge(oldest);
        guard.last_purge = Some(now);
        tracing::debug!(remaining = guard.buckets.len(), "purged nonce buckets");
    }
}
