//! Batch fetcher with single-flight de-duplication and a failure cascade.
//!
//! At most one network fetch is outstanding at any time. Concurrent callers
//! subscribe to the in-flight result over a watch channel instead of polling
//! or issuing a second call; a subscriber whose request carries a newer
//! generation refetches once the slot frees. On failure the fetcher cascades
//! network → cache → fallback, in that strict order, so it always returns
//! something to show.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use serde_json::Value;
use tokio::sync::{Mutex, watch};
use tracing::{debug, info, warn};

use crate::error::Error;
use crate::fallback::{self, FALLBACK_KEYWORD};
use crate::photo::{Photo, unix_millis};
use crate::tasks::cache::PhotoCache;

#[derive(Debug, Clone)]
pub struct FetchRequest {
    pub keyword: String,
    /// Freshness token; the engine discards results whose generation no
    /// longer matches its own.
    pub generation: u64,
    pub count: u32,
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchSource {
    Network,
    Cache,
    Fallback,
}

#[derive(Debug, Clone)]
pub struct FetchResult {
    pub generation: u64,
    pub keyword: String,
    pub photos: Vec<Photo>,
    pub source: BatchSource,
    /// Transient banner text accompanying a degraded outcome.
    pub notice: Option<String>,
}

pub struct Fetcher {
    http: reqwest::Client,
    endpoint: String,
    cache: Arc<PhotoCache>,
    online: Arc<AtomicBool>,
    in_flight: Arc<AtomicBool>,
    slot: Mutex<Option<watch::Receiver<Option<FetchResult>>>>,
}

impl Fetcher {
    pub fn new(
        endpoint: String,
        timeout: Duration,
        cache: Arc<PhotoCache>,
    ) -> Result<Self, Error> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            endpoint,
            cache,
            online: Arc::new(AtomicBool::new(true)),
            in_flight: Arc::new(AtomicBool::new(false)),
            slot: Mutex::new(None),
        })
    }

    /// Shared online/offline belief, updated from fetch outcomes.
    pub fn online_handle(&self) -> Arc<AtomicBool> {
        self.online.clone()
    }

    /// Shared in-flight flag for the staleness checker.
    pub fn in_flight_handle(&self) -> Arc<AtomicBool> {
        self.in_flight.clone()
    }

    /// Fetch a batch, or piggyback on the fetch already in flight.
    ///
    /// A subscriber only accepts the in-flight result if it carries the
    /// generation it asked for. Otherwise it retries as leader once the slot
    /// frees, so a keyword change during a fetch still gets its own batch
    /// instead of stalling on a result the engine will discard.
    pub async fn fetch(&self, request: FetchRequest) -> FetchResult {
        loop {
            let mut slot = self.slot.lock().await;
            let Some(rx) = slot.as_ref() else {
                let (tx, rx) = watch::channel(None);
                *slot = Some(rx);
                self.in_flight.store(true, Ordering::Release);
                drop(slot);

                let result = self.cascade(&request).await;

                // Free the slot before publishing so a subscriber that
                // rejects this result can immediately become the next leader.
                *self.slot.lock().await = None;
                self.in_flight.store(false, Ordering::Release);
                let _ = tx.send(Some(result.clone()));
                return result;
            };

            let mut rx = rx.clone();
            drop(slot);
            debug!(keyword = %request.keyword, "subscribing to in-flight fetch");
            let published = loop {
                if let Some(result) = rx.borrow_and_update().clone() {
                    break Some(result);
                }
                if rx.changed().await.is_err() {
                    break None;
                }
            };
            match published {
                Some(result) if result.generation == request.generation => return result,
                Some(result) => {
                    debug!(
                        got = result.generation,
                        want = request.generation,
                        "in-flight result answers an older request; refetching"
                    );
                }
                None => {
                    // Producer vanished without publishing; degrade locally.
                    warn!("in-flight fetch dropped its result");
                    return self.degrade(&request, None);
                }
            }
        }
    }

    async fn cascade(&self, request: &FetchRequest) -> FetchResult {
        match self.fetch_network(request).await {
            Ok(photos) => {
                self.online.store(true, Ordering::Release);
                // Written through so a restart or a rate-limited refresh can
                // reuse the batch.
                self.cache.write(&photos);
                info!(keyword = %request.keyword, count = photos.len(), "batch fetched");
                FetchResult {
                    generation: request.generation,
                    keyword: request.keyword.clone(),
                    photos,
                    source: BatchSource::Network,
                    notice: None,
                }
            }
            Err(err) => {
                if matches!(err, Error::Offline) {
                    self.online.store(false, Ordering::Release);
                }
                let notice = match &err {
                    Error::RateLimited { retry_after } => format!(
                        "Request limit reached; try again in about {retry_after} seconds."
                    ),
                    Error::Offline => "Offline; showing saved photos.".to_string(),
                    other => format!("Photo fetch failed: {other}"),
                };
                warn!(error = %err, keyword = %request.keyword, "network fetch failed");
                self.degrade(request, Some(notice))
            }
        }
    }

    /// Cache, then the synthetic set. Never fails.
    fn degrade(&self, request: &FetchRequest, notice: Option<String>) -> FetchResult {
        if let Some(photos) = self.cache.read() {
            return FetchResult {
                generation: request.generation,
                keyword: request.keyword.clone(),
                photos,
                source: BatchSource::Cache,
                notice,
            };
        }
        FetchResult {
            generation: request.generation,
            keyword: FALLBACK_KEYWORD.to_string(),
            photos: fallback::photo_set(),
            source: BatchSource::Fallback,
            notice,
        }
    }

    async fn fetch_network(&self, request: &FetchRequest) -> Result<Vec<Photo>, Error> {
        let response = self
            .http
            .get(&self.endpoint)
            .query(&[
                ("query", request.keyword.as_str()),
                ("count", &request.count.to_string()),
                ("width", &request.width.to_string()),
                ("height", &request.height.to_string()),
                ("_", &unix_millis().to_string()),
            ])
            .send()
            .await
            .map_err(|err| {
                if err.is_connect() || err.is_timeout() {
                    Error::Offline
                } else {
                    Error::Http(err)
                }
            })?;

        let status = response.status();
        if status.as_u16() == 429 {
            let retry_after = response
                .json::<Value>()
                .await
                .ok()
                .and_then(|body| body.get("retry_after").and_then(Value::as_u64))
                .unwrap_or(60);
            return Err(Error::RateLimited { retry_after });
        }
        if !status.is_success() {
            return Err(Error::Upstream {
                status: status.as_u16(),
            });
        }

        response
            .json::<Vec<Photo>>()
            .await
            .map_err(|err| Error::Parse(err.to_string()))
    }
}
