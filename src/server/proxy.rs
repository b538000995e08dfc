//! Edge proxy: query sanitization, rate limiting, upstream normalization.
//!
//! Every response carries permissive CORS plus no-store cache headers; the
//! rate-limit headers are informational and present on success as well as on
//! denial. All outcomes are JSON.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::Router;
use axum::extract::{Query, State};
use axum::http::{HeaderMap, HeaderName, HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::get;
use serde::Deserialize;
use serde_json::json;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::photo;
use crate::server::rate_limit::{RateDecision, RateLimiter};
use crate::server::upstream::{PhotoSearch, SearchParams};

const X_RATELIMIT_LIMIT: HeaderName = HeaderName::from_static("x-ratelimit-limit");
const X_RATELIMIT_REMAINING: HeaderName = HeaderName::from_static("x-ratelimit-remaining");
const X_RATELIMIT_RESET: HeaderName = HeaderName::from_static("x-ratelimit-reset");

#[derive(Clone)]
pub struct AppState {
    pub limiter: Arc<RateLimiter>,
    pub search: Arc<dyn PhotoSearch>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/photos", get(photos_handler).options(preflight_handler))
        .with_state(state)
}

/// Bind and serve until the token is cancelled.
pub async fn serve(
    bind_addr: SocketAddr,
    state: AppState,
    cancel: CancellationToken,
) -> Result<()> {
    let listener = TcpListener::bind(bind_addr)
        .await
        .with_context(|| format!("failed to bind proxy listener on {bind_addr}"))?;
    info!(%bind_addr, "photo proxy listening");
    axum::serve(listener, router(state).into_make_service())
        .with_graceful_shutdown(async move {
            cancel.cancelled().await;
        })
        .await
        .context("proxy server exited")?;
    Ok(())
}

#[derive(Debug, Deserialize)]
struct PhotosQuery {
    query: Option<String>,
    count: Option<u32>,
    width: Option<u32>,
    height: Option<u32>,
}

fn cors_headers() -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_ORIGIN,
        HeaderValue::from_static("*"),
    );
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_METHODS,
        HeaderValue::from_static("GET,OPTIONS"),
    );
    headers.insert(
        header::CACHE_CONTROL,
        HeaderValue::from_static("no-store, no-cache, must-revalidate, proxy-revalidate"),
    );
    headers.insert(header::PRAGMA, HeaderValue::from_static("no-cache"));
    headers.insert(header::EXPIRES, HeaderValue::from_static("0"));
    headers
}

fn apply_rate_headers(headers: &mut HeaderMap, limit: u32, decision: &RateDecision) {
    let entries = [
        (X_RATELIMIT_LIMIT, limit.to_string()),
        (X_RATELIMIT_REMAINING, decision.remaining.to_string()),
        (X_RATELIMIT_RESET, decision.reset_at.to_string()),
    ];
    for (name, value) in entries {
        if let Ok(value) = HeaderValue::from_str(&value) {
            headers.insert(name, value);
        }
    }
}

/// Client identity for rate accounting: the forwarded client IP when an edge
/// header supplies one, otherwise a shared bucket.
fn client_identity(headers: &HeaderMap) -> String {
    if let Some(ip) = headers
        .get("cf-connecting-ip")
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
    {
        return ip.to_string();
    }
    if let Some(forwarded) = headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|v| !v.is_empty())
    {
        return forwarded.to_string();
    }
    "unknown".to_string()
}

async fn preflight_handler() -> Response {
    (StatusCode::OK, cors_headers()).into_response()
}

async fn photos_handler(
    State(state): State<AppState>,
    request_headers: HeaderMap,
    Query(params): Query<PhotosQuery>,
) -> Response {
    let query = photo::sanitize_query(params.query.as_deref().unwrap_or("landscape"));
    let search = SearchParams {
        query,
        count: photo::clamp_count(params.count.unwrap_or(5)),
        width: photo::clamp_width(params.width.unwrap_or(1920)),
        height: photo::clamp_height(params.height.unwrap_or(1080)),
    };

    let client_key = client_identity(&request_headers);
    let decision = state.limiter.check_and_increment(&client_key).await;

    let mut headers = cors_headers();
    apply_rate_headers(&mut headers, state.limiter.limit(), &decision);

    if !decision.allowed {
        let retry_after = state.limiter.window_secs();
        warn!(client = %client_key, "rate limit exceeded");
        if let Ok(value) = HeaderValue::from_str(&retry_after.to_string()) {
            headers.insert(header::RETRY_AFTER, value);
        }
        let body = json!({
            "error": "Rate limit exceeded",
            "message": format!("Request limit reached; retry in {retry_after} seconds."),
            "retry_after": retry_after,
        });
        return (StatusCode::TOO_MANY_REQUESTS, headers, Json(body)).into_response();
    }

    match state.search.search(&search).await {
        Ok(photos) => (StatusCode::OK, headers, Json(photos)).into_response(),
        Err(err) => {
            // Upstream failures and normalization errors alike surface as a
            // generic 500; there is no server-side retry.
            warn!(error = %err, query = %search.query, "photo search failed");
            let body = json!({
                "error": err.to_string(),
                "status": "error",
            });
            (StatusCode::INTERNAL_SERVER_ERROR, headers, Json(body)).into_response()
        }
    }
}
