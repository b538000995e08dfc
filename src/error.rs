use thiserror::Error;

/// Library error type for photo-kiosk operations.
#[derive(Debug, Error)]
pub enum Error {
    /// The client identity exhausted its request budget for the current window.
    #[error("rate limit exceeded; retry after {retry_after} seconds")]
    RateLimited { retry_after: u64 },

    /// The upstream photo-search API answered with a non-success status.
    #[error("upstream API responded with {status}")]
    Upstream { status: u16 },

    /// No network connectivity (or the proxy is unreachable).
    #[error("currently offline")]
    Offline,

    /// Rate-record or cache storage failed. Callers treat this as a miss.
    #[error("storage error: {0}")]
    Storage(#[source] anyhow::Error),

    /// A response body could not be decoded into the expected schema.
    #[error("parse error: {0}")]
    Parse(String),

    /// Transport-level HTTP failure.
    #[error(transparent)]
    Http(#[from] reqwest::Error),
}
