//! Upstream photo-search client behind a trait seam.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{AUTHORIZATION, CACHE_CONTROL};
use tracing::debug;

use crate::error::Error;
use crate::photo::{self, PexelsResponse, Photo};

/// Parameters a search call receives after sanitization and clamping.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchParams {
    pub query: String,
    pub count: u32,
    pub width: u32,
    pub height: u32,
}

/// Seam over the third-party search API so the proxy handler can be exercised
/// without network access.
#[async_trait]
pub trait PhotoSearch: Send + Sync {
    async fn search(&self, params: &SearchParams) -> Result<Vec<Photo>, Error>;
}

/// Production client for the Pexels search endpoint.
pub struct PexelsClient {
    http: reqwest::Client,
    endpoint: String,
    api_key: String,
}

impl PexelsClient {
    pub fn new(endpoint: String, api_key: String, timeout: Duration) -> Result<Self, Error> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            endpoint,
            api_key,
        })
    }
}

#[async_trait]
impl PhotoSearch for PexelsClient {
    async fn search(&self, params: &SearchParams) -> Result<Vec<Photo>, Error> {
        // The `_` parameter busts intermediary caches; the same token feeds
        // the normalized image URLs.
        let cache_buster = photo::unix_millis();
        let response = self
            .http
            .get(&self.endpoint)
            .query(&[
                ("query", params.query.as_str()),
                ("per_page", &params.count.to_string()),
                ("_", &cache_buster.to_string()),
            ])
            .header(AUTHORIZATION, &self.api_key)
            .header(CACHE_CONTROL, "no-cache")
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::Upstream {
                status: status.as_u16(),
            });
        }

        let body: PexelsResponse = response
            .json()
            .await
            .map_err(|err| Error::Parse(err.to_string()))?;
        debug!(
            query = %params.query,
            returned = body.photos.len(),
            "upstream search complete"
        );
        Ok(body
            .photos
            .iter()
            .map(|item| photo::normalize_pexels(item, params.width, cache_buster))
            .collect())
    }
}
