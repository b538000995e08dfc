//! Canonical photo record and upstream schema normalization.
//!
//! The proxy speaks two upstream dialects (Pexels search results and Unsplash
//! random-photo results) and flattens both into the same `Photo` shape the
//! frame consumes. Free-text fields are HTML-escaped here, once, because they
//! may later be written into a document; URLs are never escaped.

use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

/// Canonical photo unit, immutable once constructed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Photo {
    pub id: String,
    pub url: String,
    pub download_url: String,
    pub width: u32,
    pub height: u32,
    pub color: String,
    pub description: String,
    pub location: String,
    pub photographer: Photographer,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Photographer {
    pub name: String,
    pub username: String,
    pub profile: String,
}

/// Strip every character outside `[A-Za-z0-9 ,]`.
///
/// This is a safety allow-list, not a validator; an empty result is still a
/// legal query.
pub fn sanitize_query(raw: &str) -> String {
    raw.chars()
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, ' ' | ','))
        .collect()
}

pub const MAX_COUNT: u32 = 30;
pub const MAX_WIDTH: u32 = 3840;
pub const MAX_HEIGHT: u32 = 2160;

pub fn clamp_count(count: u32) -> u32 {
    count.clamp(1, MAX_COUNT)
}

pub fn clamp_width(width: u32) -> u32 {
    width.clamp(1, MAX_WIDTH)
}

pub fn clamp_height(height: u32) -> u32 {
    height.clamp(1, MAX_HEIGHT)
}

/// Escape `& < > " '` for safe insertion into markup.
pub fn escape_html(input: &str) -> String {
    let mut escaped = String::with_capacity(input.len());
    for ch in input.chars() {
        match ch {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            _ => escaped.push(ch),
        }
    }
    escaped
}

/// Image tier selected from the viewport width. Total over all widths; the
/// boundaries at 640, 1920 and 2560 are part of the public contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolutionTier {
    Medium,
    Large,
    Large2x,
    Original,
}

impl ResolutionTier {
    pub fn for_width(viewport_width: u32) -> Self {
        if viewport_width <= 640 {
            Self::Medium
        } else if viewport_width <= 1920 {
            Self::Large
        } else if viewport_width <= 2560 {
            Self::Large2x
        } else {
            Self::Original
        }
    }
}

/// Milliseconds since the epoch, used as a cache-busting token.
pub fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

fn with_query_param(url: &str, key: &str, value: &str) -> String {
    let sep = if url.contains('?') { '&' } else { '?' };
    format!("{url}{sep}{key}={value}")
}

// ---------------------------------------------------------------------------
// Pexels search schema
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct PexelsResponse {
    pub photos: Vec<PexelsPhoto>,
}

#[derive(Debug, Deserialize)]
pub struct PexelsPhoto {
    pub id: u64,
    pub width: u32,
    pub height: u32,
    /// Photo page URL; Pexels exposes no direct download link.
    pub url: String,
    pub photographer: String,
    pub photographer_url: String,
    pub photographer_id: u64,
    #[serde(default)]
    pub alt: Option<String>,
    pub src: PexelsSrc,
}

#[derive(Debug, Deserialize)]
pub struct PexelsSrc {
    pub original: String,
    pub large2x: String,
    pub large: String,
    pub medium: String,
    #[serde(default)]
    pub small: Option<String>,
}

/// Flatten one Pexels item into the canonical record.
///
/// The chosen tier URL carries a `_=<millis>` cache-buster so successive
/// batches do not collide in intermediary caches. Pexels supplies neither a
/// dominant color nor a location, so those fields come back empty.
pub fn normalize_pexels(photo: &PexelsPhoto, viewport_width: u32, cache_buster: u64) -> Photo {
    let tier_url = match ResolutionTier::for_width(viewport_width) {
        ResolutionTier::Medium => &photo.src.medium,
        ResolutionTier::Large => &photo.src.large,
        ResolutionTier::Large2x => &photo.src.large2x,
        ResolutionTier::Original => &photo.src.original,
    };
    let description = photo
        .alt
        .as_deref()
        .filter(|alt| !alt.is_empty())
        .unwrap_or("Beautiful landscape");
    Photo {
        id: photo.id.to_string(),
        url: with_query_param(tier_url, "_", &cache_buster.to_string()),
        download_url: photo.url.clone(),
        width: photo.width,
        height: photo.height,
        color: String::new(),
        description: escape_html(description),
        location: String::new(),
        photographer: Photographer {
            name: escape_html(&photo.photographer),
            username: escape_html(&photo.photographer_id.to_string()),
            profile: photo.photographer_url.clone(),
        },
    }
}

// ---------------------------------------------------------------------------
// Unsplash random-photo schema
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct UnsplashPhoto {
    pub id: String,
    pub width: u32,
    pub height: u32,
    #[serde(default)]
    pub color: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub alt_description: Option<String>,
    pub urls: UnsplashUrls,
    pub links: UnsplashLinks,
    #[serde(default)]
    pub location: Option<UnsplashLocation>,
    pub user: UnsplashUser,
}

#[derive(Debug, Deserialize)]
pub struct UnsplashUrls {
    pub raw: String,
    pub full: String,
    pub regular: String,
    pub small: String,
}

#[derive(Debug, Deserialize)]
pub struct UnsplashLinks {
    pub download: String,
}

#[derive(Debug, Deserialize)]
pub struct UnsplashLocation {
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct UnsplashUser {
    pub name: String,
    pub username: String,
    pub links: UnsplashUserLinks,
}

#[derive(Debug, Deserialize)]
pub struct UnsplashUserLinks {
    pub html: String,
}

/// Flatten one Unsplash item into the canonical record.
///
/// Unsplash honors a server-side resize via the `w` parameter, so the tier URL
/// is additionally pinned to the viewport width.
pub fn normalize_unsplash(photo: &UnsplashPhoto, viewport_width: u32) -> Photo {
    let tier_url = match ResolutionTier::for_width(viewport_width) {
        ResolutionTier::Medium => &photo.urls.small,
        ResolutionTier::Large => &photo.urls.regular,
        ResolutionTier::Large2x => &photo.urls.full,
        ResolutionTier::Original => &photo.urls.raw,
    };
    let description = photo
        .description
        .as_deref()
        .or(photo.alt_description.as_deref())
        .unwrap_or("");
    let location = photo
        .location
        .as_ref()
        .and_then(|loc| loc.name.as_deref())
        .unwrap_or("");
    Photo {
        id: photo.id.clone(),
        url: with_query_param(tier_url, "w", &viewport_width.to_string()),
        download_url: photo.links.download.clone(),
        width: photo.width,
        height: photo.height,
        color: photo.color.clone().unwrap_or_default(),
        description: escape_html(description),
        location: escape_html(location),
        photographer: Photographer {
            name: escape_html(&photo.user.name),
            username: escape_html(&photo.user.username),
            profile: photo.user.links.html.clone(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pexels_fixture() -> PexelsPhoto {
        serde_json::from_value(serde_json::json!({
            "id": 123456,
            "width": 4000,
            "height": 3000,
            "url": "https://www.pexels.com/photo/123456/",
            "photographer": "Ada <Lovelace>",
            "photographer_url": "https://www.pexels.com/@ada",
            "photographer_id": 42,
            "alt": "Snowy \"peak\" & valley",
            "src": {
                "original": "https://images.pexels.com/123456/original.jpg",
                "large2x": "https://images.pexels.com/123456/large2x.jpg",
                "large": "https://images.pexels.com/123456/large.jpg",
                "medium": "https://images.pexels.com/123456/medium.jpg",
                "small": "https://images.pexels.com/123456/small.jpg"
            }
        }))
        .unwrap()
    }

    #[test]
    fn sanitize_strips_disallowed_characters() {
        assert_eq!(sanitize_query("mountains; DROP"), "mountains DROP");
        assert_eq!(sanitize_query("a<b>&c"), "abc");
        assert_eq!(sanitize_query("city, night 42"), "city, night 42");
        assert_eq!(sanitize_query("<>;!"), "");
    }

    #[test]
    fn clamps_hold_documented_ranges() {
        assert_eq!(clamp_count(0), 1);
        assert_eq!(clamp_count(30), 30);
        assert_eq!(clamp_count(500), 30);
        assert_eq!(clamp_width(0), 1);
        assert_eq!(clamp_width(7680), 3840);
        assert_eq!(clamp_height(4320), 2160);
    }

    #[test]
    fn tier_boundaries_are_exact() {
        assert_eq!(ResolutionTier::for_width(1), ResolutionTier::Medium);
        assert_eq!(ResolutionTier::for_width(640), ResolutionTier::Medium);
        assert_eq!(ResolutionTier::for_width(641), ResolutionTier::Large);
        assert_eq!(ResolutionTier::for_width(1920), ResolutionTier::Large);
        assert_eq!(ResolutionTier::for_width(1921), ResolutionTier::Large2x);
        assert_eq!(ResolutionTier::for_width(2560), ResolutionTier::Large2x);
        assert_eq!(ResolutionTier::for_width(2561), ResolutionTier::Original);
        assert_eq!(ResolutionTier::for_width(u32::MAX), ResolutionTier::Original);
    }

    #[test]
    fn escape_html_covers_the_five_specials() {
        assert_eq!(
            escape_html("a & b < c > d \" e ' f"),
            "a &amp; b &lt; c &gt; d &quot; e &#39; f"
        );
        assert_eq!(escape_html("plain"), "plain");
    }

    #[test]
    fn pexels_normalization_fills_every_field() {
        let photo = normalize_pexels(&pexels_fixture(), 1920, 1700000000000);
        assert_eq!(photo.id, "123456");
        assert_eq!(
            photo.url,
            "https://images.pexels.com/123456/large.jpg?_=1700000000000"
        );
        assert_eq!(photo.download_url, "https://www.pexels.com/photo/123456/");
        assert_eq!(photo.width, 4000);
        assert_eq!(photo.height, 3000);
        assert_eq!(photo.color, "");
        assert_eq!(photo.description, "Snowy &quot;peak&quot; &amp; valley");
        assert_eq!(photo.location, "");
        assert_eq!(photo.photographer.name, "Ada &lt;Lovelace&gt;");
        assert_eq!(photo.photographer.username, "42");
        assert_eq!(photo.photographer.profile, "https://www.pexels.com/@ada");
    }

    #[test]
    fn pexels_tier_follows_viewport() {
        let fixture = pexels_fixture();
        let small = normalize_pexels(&fixture, 640, 1);
        assert!(small.url.starts_with("https://images.pexels.com/123456/medium.jpg"));
        let huge = normalize_pexels(&fixture, 3840, 1);
        assert!(huge.url.starts_with("https://images.pexels.com/123456/original.jpg"));
    }

    #[test]
    fn pexels_blank_alt_falls_back() {
        let mut fixture = pexels_fixture();
        fixture.alt = Some(String::new());
        let photo = normalize_pexels(&fixture, 1920, 1);
        assert_eq!(photo.description, "Beautiful landscape");
    }

    #[test]
    fn unsplash_normalization_fills_every_field() {
        let raw: UnsplashPhoto = serde_json::from_value(serde_json::json!({
            "id": "abc123",
            "width": 6000,
            "height": 4000,
            "color": "#262626",
            "description": null,
            "alt_description": "forest at dusk",
            "urls": {
                "raw": "https://images.unsplash.com/abc?ixid=1",
                "full": "https://images.unsplash.com/abc?ixid=1&q=85",
                "regular": "https://images.unsplash.com/abc?ixid=1&w=1080",
                "small": "https://images.unsplash.com/abc?ixid=1&w=400"
            },
            "links": { "download": "https://unsplash.com/photos/abc123/download" },
            "location": { "name": "Black Forest, Germany" },
            "user": {
                "name": "Grace Hopper",
                "username": "gracehopper",
                "links": { "html": "https://unsplash.com/@gracehopper" }
            }
        }))
        .unwrap();
        let photo = normalize_unsplash(&raw, 2560);
        assert_eq!(photo.id, "abc123");
        assert_eq!(photo.url, "https://images.unsplash.com/abc?ixid=1&q=85&w=2560");
        assert_eq!(photo.download_url, "https://unsplash.com/photos/abc123/download");
        assert_eq!(photo.color, "#262626");
        assert_eq!(photo.description, "forest at dusk");
        assert_eq!(photo.location, "Black Forest, Germany");
        assert_eq!(photo.photographer.username, "gracehopper");
    }

    #[test]
    fn photo_round_trips_through_json() {
        let photo = normalize_pexels(&pexels_fixture(), 800, 7);
        let json = serde_json::to_string(&photo).unwrap();
        let back: Photo = serde_json::from_str(&json).unwrap();
        assert_eq!(photo, back);
    }
}
