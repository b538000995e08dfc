//! Deterministic synthetic photos for degraded operation.
//!
//! When the network, the proxy and the local cache have all failed, the
//! slideshow keeps rotating over this fixed set of solid-color placeholders.
//! The set is pure data with zero external dependencies.

use crate::photo::{Photo, Photographer};

const PALETTE: [&str; 5] = ["#1a365d", "#2a4365", "#2c5282", "#2b6cb0", "#3182ce"];

/// Keyword attached to every synthetic photo.
pub const FALLBACK_KEYWORD: &str = "fallback";

fn solid_svg_data_url(color: &str) -> String {
    let fill = color.replace('#', "%23");
    format!(
        "data:image/svg+xml,%3Csvg xmlns='http://www.w3.org/2000/svg' width='1920' height='1080' \
         viewBox='0 0 1920 1080'%3E%3Crect width='1920' height='1080' fill='{fill}' /%3E%3C/svg%3E"
    )
}

/// The fixed placeholder batch: five solid-color 1920x1080 frames.
pub fn photo_set() -> Vec<Photo> {
    PALETTE
        .iter()
        .enumerate()
        .map(|(index, color)| Photo {
            id: format!("fallback-{index}"),
            url: solid_svg_data_url(color),
            download_url: String::new(),
            width: 1920,
            height: 1080,
            color: (*color).to_string(),
            description: "Landscape placeholder".to_string(),
            location: String::new(),
            photographer: Photographer {
                name: "System".to_string(),
                username: "system".to_string(),
                profile: "#".to_string(),
            },
        })
        .collect()
}
