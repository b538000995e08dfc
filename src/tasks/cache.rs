//! TTL'd single-slot photo cache with a background staleness checker.
//!
//! The frame persists exactly one batch as JSON at a well-known path. Read
//! failures of any kind (missing file, corrupt JSON, IO errors) are a cache
//! miss, never a fault. Entries are valid strictly before `timestamp + ttl`.

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use anyhow::Result;
use serde::{Deserialize, Serialize};
use tokio::select;
use tokio::sync::mpsc::Sender;
use tokio::time::interval;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::events::{EngineCommand, RefreshReason};
use crate::photo::{Photo, unix_millis};

/// The persisted record: one batch plus its write time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry {
    /// Unix milliseconds at write time.
    pub timestamp: u64,
    pub data: Vec<Photo>,
}

pub struct PhotoCache {
    path: PathBuf,
    ttl: Duration,
}

impl PhotoCache {
    pub fn new(path: PathBuf, ttl: Duration) -> Self {
        Self { path, ttl }
    }

    /// `true` while `now - timestamp < ttl`; expires at exactly
    /// `timestamp + ttl`.
    pub fn is_fresh(&self, timestamp_ms: u64, now_ms: u64) -> bool {
        now_ms.saturating_sub(timestamp_ms) < self.ttl.as_millis() as u64
    }

    /// The raw entry regardless of freshness, or `None` on miss/corruption.
    pub fn read_entry(&self) -> Option<CacheEntry> {
        let raw = match std::fs::read(&self.path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return None,
            Err(err) => {
                debug!(error = %err, path = %self.path.display(), "cache read failed");
                return None;
            }
        };
        match serde_json::from_slice(&raw) {
            Ok(entry) => Some(entry),
            Err(err) => {
                warn!(error = %err, path = %self.path.display(), "cache entry corrupt");
                None
            }
        }
    }

    /// The cached batch if present and still fresh.
    pub fn read(&self) -> Option<Vec<Photo>> {
        self.read_at(unix_millis())
    }

    pub fn read_at(&self, now_ms: u64) -> Option<Vec<Photo>> {
        let entry = self.read_entry()?;
        if self.is_fresh(entry.timestamp, now_ms) {
            Some(entry.data)
        } else {
            None
        }
    }

    /// Store a batch stamped with the current time. Write failures are logged
    /// and swallowed; the cache is an optimization, not a dependency.
    pub fn write(&self, photos: &[Photo]) {
        self.write_at(photos, unix_millis());
    }

    pub fn write_at(&self, photos: &[Photo], now_ms: u64) {
        let entry = CacheEntry {
            timestamp: now_ms,
            data: photos.to_vec(),
        };
        let serialized = match serde_json::to_vec(&entry) {
            Ok(serialized) => serialized,
            Err(err) => {
                warn!(error = %err, "cache entry serialization failed");
                return;
            }
        };
        if let Err(err) = std::fs::write(&self.path, serialized) {
            warn!(error = %err, path = %self.path.display(), "cache write failed");
        }
    }

    pub fn invalidate(&self) {
        match std::fs::remove_file(&self.path) {
            Ok(()) => debug!(path = %self.path.display(), "cache invalidated"),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
            Err(err) => warn!(error = %err, "cache invalidation failed"),
        }
    }
}

/// Periodically nudge the engine when the cached batch has gone stale.
///
/// A refresh is requested only when an entry exists and is expired, no fetch
/// is currently in flight, and the client believes it is online. This bounds
/// worst-case staleness to one checker period.
pub async fn run_expiry_checker(
    cache: Arc<PhotoCache>,
    fetch_in_flight: Arc<AtomicBool>,
    online: Arc<AtomicBool>,
    to_engine: Sender<EngineCommand>,
    period: Duration,
    cancel: CancellationToken,
) -> Result<()> {
    let mut ticker = interval(period);
    // First tick fires immediately; skip it so the startup fetch settles.
    ticker.tick().await;
    loop {
        select! {
            _ = cancel.cancelled() => {
                info!("cancel received; exiting expiry checker");
                break;
            }
            _ = ticker.tick() => {
                let Some(entry) = cache.read_entry() else { continue };
                if cache.is_fresh(entry.timestamp, unix_millis()) {
                    continue;
                }
                if fetch_in_flight.load(Ordering::Acquire) {
                    debug!("cache stale but a fetch is already in flight");
                    continue;
                }
                if !online.load(Ordering::Acquire) {
                    debug!("cache stale but client is offline");
                    continue;
                }
                info!("cache expired; requesting refresh");
                let _ = to_engine.send(EngineCommand::Refresh(RefreshReason::Stale)).await;
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fallback;

    fn cache_in(dir: &tempfile::TempDir, ttl: Duration) -> PhotoCache {
        PhotoCache::new(dir.path().join("cache.json"), ttl)
    }

    #[test]
    fn miss_when_absent() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(cache_in(&dir, Duration::from_secs(60)).read(), None);
    }

    #[test]
    fn expires_at_exactly_timestamp_plus_ttl() {
        let dir = tempfile::tempdir().unwrap();
        let cache = cache_in(&dir, Duration::from_millis(1000));
        let photos = fallback::photo_set();
        cache.write_at(&photos, 10_000);

        assert_eq!(cache.read_at(10_000).as_deref(), Some(photos.as_slice()));
        assert_eq!(cache.read_at(10_999).as_deref(), Some(photos.as_slice()));
        assert_eq!(cache.read_at(11_000), None, "boundary instant is stale");
        assert_eq!(cache.read_at(12_000), None);
    }

    #[test]
    fn corrupt_entry_is_a_miss() {
        let dir = tempfile::tempdir().unwrap();
        let cache = cache_in(&dir, Duration::from_secs(60));
        std::fs::write(dir.path().join("cache.json"), b"{not json").unwrap();
        assert_eq!(cache.read(), None);
    }

    #[test]
    fn invalidate_removes_the_slot() {
        let dir = tempfile::tempdir().unwrap();
        let cache = cache_in(&dir, Duration::from_secs(60));
        cache.write(&fallback::photo_set());
        assert!(cache.read().is_some());
        cache.invalidate();
        assert_eq!(cache.read(), None);
        // Idempotent on an already-empty slot.
        cache.invalidate();
    }

    #[tokio::test(start_paused = true)]
    async fn checker_requests_refresh_only_when_idle_and_online() {
        let dir = tempfile::tempdir().unwrap();
        let cache = Arc::new(cache_in(&dir, Duration::from_millis(10)));
        cache.write_at(&fallback::photo_set(), 0);

        let in_flight = Arc::new(AtomicBool::new(true));
        let online = Arc::new(AtomicBool::new(true));
        let (tx, mut rx) = tokio::sync::mpsc::channel(4);
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(run_expiry_checker(
            cache.clone(),
            in_flight.clone(),
            online.clone(),
            tx,
            Duration::from_secs(1),
            cancel.clone(),
        ));

        // Entry is long stale, but a fetch is in flight: no command.
        tokio::time::sleep(Duration::from_millis(1100)).await;
        assert!(rx.try_recv().is_err());

        in_flight.store(false, Ordering::Release);
        tokio::time::sleep(Duration::from_millis(1100)).await;
        match rx.recv().await {
            Some(EngineCommand::Refresh(RefreshReason::Stale)) => {}
            other => panic!("expected stale refresh, got {other:?}"),
        }

        cancel.cancel();
        let _ = handle.await;
    }
}
