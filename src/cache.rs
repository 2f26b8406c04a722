//! Read-through status cache.
//!
//! This module provides a TTL-bound, single-flight cache keyed by a logical
//! resource id (an instance name, a server address). It shields rate-limited,
//! latency-variable upstreams from repeated lookups: a fresh entry is served
//! without an upstream call, an expired entry triggers exactly one refresh no
//! matter how many callers demand it concurrently, and a failed refresh falls
//! back to the previous value when one exists.

use crate::error::{Error, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tokio::time::Instant;

/// Upstream source a cache refreshes from.
#[async_trait]
pub trait Fetch<T>: Send + Sync {
    /// Fetch the current value for a resource key.
    async fn fetch(&self, key: &str) -> Result<T>;
}

/// A value read through the cache.
///
/// `stale_error` is set when the value is older than its freshness bound
/// because the refresh that should have replaced it failed; callers decide
/// whether to surface the staleness.
#[derive(Debug, Clone)]
pub struct Cached<T> {
    pub value: T,
    pub stale_error: Option<Error>,
}

impl<T> Cached<T> {
    fn fresh(value: T) -> Self {
        Self {
            value,
            stale_error: None,
        }
    }

    /// Whether this value outlived its freshness bound.
    pub fn is_stale(&self) -> bool {
        self.stale_error.is_some()
    }
}

type Outcome<T> = Result<Cached<T>>;

struct Entry<T> {
    value: Option<T>,
    /// `None` means expired regardless of age: the initial state, and the
    /// mark left by an explicit invalidation.
    fetched_at: Option<Instant>,
    /// Bumped by `invalidate`. A refresh that observed an older generation
    /// may store its value but cannot mark the entry fresh.
    generation: u64,
    /// Present while a refresh is in flight; late callers subscribe to the
    /// same outcome instead of issuing their own upstream call.
    inflight: Option<watch::Receiver<Option<Outcome<T>>>>,
}

impl<T> Entry<T> {
    fn new() -> Self {
        Self {
            value: None,
            fetched_at: None,
            generation: 0,
            inflight: None,
        }
    }
}

/// Read-through, single-flight cache over one upstream source.
///
/// Entries are created lazily on first lookup and live for the process
/// lifetime; cardinality is fixed and tiny, so there is no eviction. Each
/// entry is locked independently, so contention is limited to callers of
/// the same resource key.
pub struct StatusCache<T> {
    fetcher: Arc<dyn Fetch<T>>,
    ttl: Duration,
    fetch_timeout: Duration,
    entries: Mutex<HashMap<String, Arc<Mutex<Entry<T>>>>>,
}

impl<T: Clone + Send + Sync + 'static> StatusCache<T> {
    /// Create a cache over `fetcher` with the given freshness bound and
    /// per-refresh deadline.
    pub fn new(fetcher: Arc<dyn Fetch<T>>, ttl: Duration, fetch_timeout: Duration) -> Self {
        Self {
            fetcher,
            ttl,
            fetch_timeout,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Read the value for `key`, refreshing it if it is older than the TTL.
    pub async fn get(&self, key: &str) -> Result<Cached<T>> {
        self.get_within(key, self.ttl).await
    }

    /// Read the value for `key`, refreshing it if it is older than `max_age`.
    ///
    /// A fresh entry is returned without an upstream call. Otherwise one
    /// refresh runs per key; concurrent callers attach to its outcome. A
    /// failed refresh yields the previous value annotated with the error
    /// when one exists, and the bare error otherwise.
    pub async fn get_within(&self, key: &str, max_age: Duration) -> Result<Cached<T>> {
        let entry = self.entry(key).await;

        loop {
            let mut slot = entry.lock().await;

            if let (Some(value), Some(at)) = (&slot.value, slot.fetched_at) {
                if at.elapsed() < max_age {
                    return Ok(Cached::fresh(value.clone()));
                }
            }

            if let Some(rx) = &slot.inflight {
                let mut rx = rx.clone();
                drop(slot);

                let outcome = Self::await_outcome(&mut rx).await;
                if let Some(outcome) = outcome {
                    return outcome;
                }

                // The refresh was abandoned without publishing an outcome.
                // Clear the dead marker if nobody has yet, then retry.
                let mut slot = entry.lock().await;
                if slot
                    .inflight
                    .as_ref()
                    .is_some_and(|current| current.same_channel(&rx))
                {
                    slot.inflight = None;
                }
                continue;
            }

            // No flight in progress: this caller refreshes for everyone.
            let (tx, rx) = watch::channel(None);
            slot.inflight = Some(rx);
            let generation = slot.generation;
            drop(slot);

            let outcome = self.refresh(&entry, key, generation).await;
            let _ = tx.send(Some(outcome.clone()));
            return outcome;
        }
    }

    /// Force the next `get` for `key` to refresh regardless of TTL.
    ///
    /// A refresh already in flight when this is called may still land its
    /// value afterwards; the value is kept but the entry stays expired, so
    /// the invalidation is never lost.
    pub async fn invalidate(&self, key: &str) {
        let entry = {
            let entries = self.entries.lock().await;
            match entries.get(key) {
                Some(entry) => entry.clone(),
                None => return,
            }
        };

        let mut slot = entry.lock().await;
        slot.generation = slot.generation.wrapping_add(1);
        slot.fetched_at = None;
    }

    async fn entry(&self, key: &str) -> Arc<Mutex<Entry<T>>> {
        let mut entries = self.entries.lock().await;
        entries
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(Entry::new())))
            .clone()
    }

    async fn await_outcome(rx: &mut watch::Receiver<Option<Outcome<T>>>) -> Option<Outcome<T>> {
        loop {
            if let Some(outcome) = rx.borrow().clone() {
                return Some(outcome);
            }
            if rx.changed().await.is_err() {
                // Sender dropped; check for an outcome published right
                // before the drop.
                return rx.borrow().clone();
            }
        }
    }

    async fn refresh(
        &self,
        entry: &Arc<Mutex<Entry<T>>>,
        key: &str,
        generation: u64,
    ) -> Outcome<T> {
        let result = match tokio::time::timeout(self.fetch_timeout, self.fetcher.fetch(key)).await {
            Ok(result) => result,
            Err(_) => Err(Error::Timeout(format!(
                "refresh for '{}' exceeded {:?}",
                key, self.fetch_timeout
            ))),
        };

        let mut slot = entry.lock().await;
        slot.inflight = None;

        match result {
            Ok(value) => {
                slot.value = Some(value.clone());
                // An invalidation issued while this refresh was in flight
                // wins: keep the value available but leave the entry expired.
                slot.fetched_at = (slot.generation == generation).then(Instant::now);
                Ok(Cached::fresh(value))
            }
            Err(err) => match &slot.value {
                Some(stale) => Ok(Cached {
                    value: stale.clone(),
                    stale_error: Some(err),
                }),
                None => Err(err),
            },
        }
    }
}
