//! Fixed-window request limiter backed by a pluggable key-value store.
//!
//! The store is eventually consistent by contract: a read failure is treated
//! as an absent record (favoring availability), while the write is awaited
//! before the decision is returned so the next request on the same key sees
//! the incremented counter. Read-then-write races under high concurrency are
//! accepted; the limiter is advisory, not a security boundary.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use anyhow::anyhow;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::warn;

use crate::error::Error;

/// One counter per client identity, persisted for `window + grace`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateRecord {
    pub count: u32,
    /// Unix seconds of the first request in the current window.
    pub window_start: u64,
}

/// Outcome of a single request against the limiter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateDecision {
    pub allowed: bool,
    pub remaining: u32,
    /// Unix seconds at which the current window resets.
    pub reset_at: u64,
}

/// Shared key-value storage for rate records.
#[async_trait]
pub trait RateStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<RateRecord>, Error>;
    async fn put(&self, key: &str, record: RateRecord, ttl: Duration) -> Result<(), Error>;
}

/// In-process store honoring record expiry. Backs tests and single-node
/// deployments; shared deployments implement [`RateStore`] over their KV
/// namespace instead.
#[derive(Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, (RateRecord, u64)>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RateStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<RateRecord>, Error> {
        let now = unix_seconds();
        let mut entries = self.entries.lock().await;
        match entries.get(key) {
            Some((record, expires_at)) if *expires_at > now => Ok(Some(*record)),
            Some(_) => {
                entries.remove(key);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn put(&self, key: &str, record: RateRecord, ttl: Duration) -> Result<(), Error> {
        let expires_at = unix_seconds() + ttl.as_secs();
        self.entries
            .lock()
            .await
            .insert(key.to_string(), (record, expires_at));
        Ok(())
    }
}

/// Store wrapper that fails every operation; used to prove the limiter
/// degrades permissively.
pub struct FailingStore;

#[async_trait]
impl RateStore for FailingStore {
    async fn get(&self, _key: &str) -> Result<Option<RateRecord>, Error> {
        Err(Error::Storage(anyhow!("simulated read failure")))
    }

    async fn put(&self, _key: &str, _record: RateRecord, _ttl: Duration) -> Result<(), Error> {
        Err(Error::Storage(anyhow!("simulated write failure")))
    }
}

pub struct RateLimiter {
    store: Arc<dyn RateStore>,
    limit: u32,
    window: Duration,
    grace: Duration,
}

impl RateLimiter {
    pub fn new(store: Arc<dyn RateStore>, limit: u32, window: Duration, grace: Duration) -> Self {
        Self {
            store,
            limit,
            window,
            grace,
        }
    }

    pub fn limit(&self) -> u32 {
        self.limit
    }

    pub fn window_secs(&self) -> u64 {
        self.window.as_secs()
    }

    /// Count this request against `client_key` and decide whether it may
    /// proceed. The limit-th request in a window succeeds; the (limit+1)-th is
    /// denied. That boundary is observable behavior and must not change.
    pub async fn check_and_increment(&self, client_key: &str) -> RateDecision {
        self.check_at(client_key, unix_seconds()).await
    }

    /// Same as [`check_and_increment`](Self::check_and_increment) with an
    /// injected clock, for deterministic window tests.
    pub async fn check_at(&self, client_key: &str, now: u64) -> RateDecision {
        let existing = match self.store.get(client_key).await {
            Ok(record) => record,
            Err(err) => {
                // Permissive on read failure: pretend the record is absent.
                warn!(error = %err, key = client_key, "rate store read failed");
                None
            }
        };

        let mut record = match existing {
            Some(record) if now.saturating_sub(record.window_start) <= self.window.as_secs() => {
                record
            }
            _ => RateRecord {
                count: 0,
                window_start: now,
            },
        };
        record.count += 1;

        let decision = RateDecision {
            allowed: record.count <= self.limit,
            remaining: self.limit.saturating_sub(record.count),
            reset_at: record.window_start + self.window.as_secs(),
        };

        // Awaited so the next request on this key observes the increment.
        if let Err(err) = self
            .store
            .put(client_key, record, self.window + self.grace)
            .await
        {
            warn!(error = %err, key = client_key, "rate store write failed");
        }

        decision
    }
}

pub(crate) fn unix_seconds() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
