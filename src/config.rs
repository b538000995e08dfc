use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, ensure};
use serde::Deserialize;

/// Top-level YAML configuration covering both deployables.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Configuration {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub frame: FrameConfig,
}

pub fn from_yaml_file(path: &Path) -> Result<Configuration> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("reading {}", path.display()))?;
    let cfg: Configuration = serde_yaml::from_str(&raw)?;
    Ok(cfg)
}

impl Configuration {
    pub fn validate(&self) -> Result<()> {
        self.server.validate()?;
        self.frame.validate()?;
        Ok(())
    }
}

/// Edge proxy settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ServerConfig {
    #[serde(default = "ServerConfig::default_bind_address")]
    pub bind_address: SocketAddr,
    /// Upstream photo-search endpoint (Pexels search schema).
    #[serde(default = "ServerConfig::default_upstream_endpoint")]
    pub upstream_endpoint: String,
    /// Name of the environment variable holding the upstream API key.
    #[serde(default = "ServerConfig::default_api_key_env")]
    pub api_key_env: String,
    /// Requests allowed per identity per window. The limit-th request still
    /// succeeds; the next one is denied.
    #[serde(default = "ServerConfig::default_rate_limit")]
    pub rate_limit: u32,
    #[serde(default = "ServerConfig::default_rate_window", with = "humantime_serde")]
    pub rate_window: Duration,
    /// Extra lifetime on persisted rate records beyond the window.
    #[serde(default = "ServerConfig::default_rate_grace", with = "humantime_serde")]
    pub rate_grace: Duration,
    #[serde(default = "ServerConfig::default_upstream_timeout", with = "humantime_serde")]
    pub upstream_timeout: Duration,
}

impl ServerConfig {
    fn default_bind_address() -> SocketAddr {
        "0.0.0.0:8080".parse().expect("static socket address")
    }

    fn default_upstream_endpoint() -> String {
        "https://api.pexels.com/v1/search".to_string()
    }

    fn default_api_key_env() -> String {
        "PEXELS_API_KEY".to_string()
    }

    fn default_rate_limit() -> u32 {
        5
    }

    fn default_rate_window() -> Duration {
        Duration::from_secs(60)
    }

    fn default_rate_grace() -> Duration {
        Duration::from_secs(10)
    }

    fn default_upstream_timeout() -> Duration {
        Duration::from_secs(30)
    }

    pub fn validate(&self) -> Result<()> {
        ensure!(self.rate_limit > 0, "rate-limit must be at least 1");
        ensure!(
            self.rate_window >= Duration::from_secs(1),
            "rate-window must be at least one second"
        );
        ensure!(
            !self.upstream_endpoint.is_empty(),
            "upstream-endpoint must not be empty"
        );
        Ok(())
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: Self::default_bind_address(),
            upstream_endpoint: Self::default_upstream_endpoint(),
            api_key_env: Self::default_api_key_env(),
            rate_limit: Self::default_rate_limit(),
            rate_window: Self::default_rate_window(),
            rate_grace: Self::default_rate_grace(),
            upstream_timeout: Self::default_upstream_timeout(),
        }
    }
}

/// Frame client settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct FrameConfig {
    /// Proxy endpoint serving normalized photo batches.
    #[serde(default = "FrameConfig::default_api_endpoint")]
    pub api_endpoint: String,
    #[serde(default = "FrameConfig::default_keywords")]
    pub keywords: Vec<String>,
    /// Photos requested per batch, clamped server-side to 1..=30.
    #[serde(default = "FrameConfig::default_photo_count")]
    pub photo_count: u32,
    #[serde(default = "FrameConfig::default_rotate_interval", with = "humantime_serde")]
    pub rotate_interval: Duration,
    #[serde(default = "FrameConfig::default_cache_ttl", with = "humantime_serde")]
    pub cache_ttl: Duration,
    /// Staleness checker period; must be shorter than the TTL.
    #[serde(default = "FrameConfig::default_cache_check_period", with = "humantime_serde")]
    pub cache_check_period: Duration,
    #[serde(default = "FrameConfig::default_cache_path")]
    pub cache_path: PathBuf,
    #[serde(default)]
    pub viewport: Viewport,
    /// Upper bound on any single batch or image fetch so the single-flight
    /// guard can never stall indefinitely.
    #[serde(default = "FrameConfig::default_fetch_timeout", with = "humantime_serde")]
    pub fetch_timeout: Duration,
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Viewport {
    #[serde(default = "Viewport::default_width")]
    pub width: u32,
    #[serde(default = "Viewport::default_height")]
    pub height: u32,
}

impl Viewport {
    fn default_width() -> u32 {
        1920
    }

    fn default_height() -> u32 {
        1080
    }
}

impl Default for Viewport {
    fn default() -> Self {
        Self {
            width: Self::default_width(),
            height: Self::default_height(),
        }
    }
}

impl FrameConfig {
    fn default_api_endpoint() -> String {
        "http://127.0.0.1:8080/api/photos".to_string()
    }

    fn default_keywords() -> Vec<String> {
        [
            "landscape", "mountains", "ocean", "forest", "sunset", "winter", "summer", "city",
            "desert", "beach", "night",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect()
    }

    fn default_photo_count() -> u32 {
        30
    }

    fn default_rotate_interval() -> Duration {
        Duration::from_secs(20)
    }

    fn default_cache_ttl() -> Duration {
        Duration::from_secs(60 * 60)
    }

    fn default_cache_check_period() -> Duration {
        Duration::from_secs(10 * 60)
    }

    fn default_cache_path() -> PathBuf {
        PathBuf::from("photo-cache.json")
    }

    fn default_fetch_timeout() -> Duration {
        Duration::from_secs(30)
    }

    pub fn validate(&self) -> Result<()> {
        ensure!(!self.keywords.is_empty(), "keywords must not be empty");
        ensure!(
            (1..=30).contains(&self.photo_count),
            "photo-count must be within 1..=30"
        );
        ensure!(
            self.rotate_interval >= Duration::from_secs(1),
            "rotate-interval must be at least one second"
        );
        ensure!(
            self.cache_check_period < self.cache_ttl,
            "cache-check-period must be shorter than cache-ttl"
        );
        ensure!(
            self.fetch_timeout >= Duration::from_secs(1),
            "fetch-timeout must be at least one second"
        );
        ensure!(
            self.viewport.width > 0 && self.viewport.height > 0,
            "viewport dimensions must be positive"
        );
        Ok(())
    }

    /// The keyword the frame starts on.
    pub fn initial_keyword(&self) -> String {
        self.keywords
            .first()
            .cloned()
            .unwrap_or_else(|| "landscape".to_string())
    }
}

impl Default for FrameConfig {
    fn default() -> Self {
        Self {
            api_endpoint: Self::default_api_endpoint(),
            keywords: Self::default_keywords(),
            photo_count: Self::default_photo_count(),
            rotate_interval: Self::default_rotate_interval(),
            cache_ttl: Self::default_cache_ttl(),
            cache_check_period: Self::default_cache_check_period(),
            cache_path: Self::default_cache_path(),
            viewport: Viewport::default(),
            fetch_timeout: Self::default_fetch_timeout(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_yields_defaults() {
        let cfg: Configuration = serde_yaml::from_str("{}").unwrap();
        cfg.validate().unwrap();
        assert_eq!(cfg.server.rate_limit, 5);
        assert_eq!(cfg.server.rate_window, Duration::from_secs(60));
        assert_eq!(cfg.frame.photo_count, 30);
        assert_eq!(cfg.frame.rotate_interval, Duration::from_secs(20));
        assert_eq!(cfg.frame.keywords[0], "landscape");
        assert_eq!(cfg.frame.viewport.width, 1920);
    }

    #[test]
    fn humantime_durations_parse() {
        let cfg: Configuration = serde_yaml::from_str(
            "frame:\n  cache-ttl: 2h\n  cache-check-period: 5m\n  rotate-interval: 30s\n",
        )
        .unwrap();
        assert_eq!(cfg.frame.cache_ttl, Duration::from_secs(7200));
        assert_eq!(cfg.frame.cache_check_period, Duration::from_secs(300));
        assert_eq!(cfg.frame.rotate_interval, Duration::from_secs(30));
        cfg.validate().unwrap();
    }

    #[test]
    fn checker_period_must_undercut_ttl() {
        let cfg: Configuration = serde_yaml::from_str(
            "frame:\n  cache-ttl: 1m\n  cache-check-period: 10m\n",
        )
        .unwrap();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn zero_rate_limit_is_rejected() {
        let cfg: Configuration = serde_yaml::from_str("server:\n  rate-limit: 0\n").unwrap();
        assert!(cfg.validate().is_err());
    }
}
