//! User-agent inspection
//!
//! Heuristic, substring-based detection of the platform a peer is running on.
//! The result is only used to build a friendly device label, so a miss simply
//! yields fewer details rather than an error.

use serde::{Deserialize, Serialize};

/// Coarse device class
///
/// Desktops carry no class at all.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceClass {
    Mobile,
    Tablet,
}

/// What could be learned from a `User-Agent` header
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct UserAgent {
    pub os: Option<String>,
    pub browser: Option<String>,
    pub model: Option<String>,
    pub class: Option<DeviceClass>,
}

/// Ordered (needle, name) pairs; first match wins
const OS_RULES: &[(&str, &str)] = &[
    ("Windows Phone", "Windows Phone"),
    ("Windows", "Windows"),
    ("iPhone", "iOS"),
    ("iPad", "iOS"),
    ("iPod", "iOS"),
    ("Android", "Android"),
    ("CrOS", "Chromium OS"),
    ("Mac OS X", "Mac OS"),
    ("Macintosh", "Mac OS"),
    ("Linux", "Linux"),
];

const BROWSER_RULES: &[(&str, &str)] = &[
    ("Edg/", "Edge"),
    ("EdgA/", "Edge"),
    ("OPR/", "Opera"),
    ("Opera", "Opera"),
    ("SamsungBrowser", "Samsung Browser"),
    ("FxiOS", "Firefox"),
    ("Firefox/", "Firefox"),
    ("CriOS", "Chrome"),
    ("Chrome/", "Chrome"),
    ("Safari/", "Safari"),
];

const APPLE_MODELS: &[&str] = &["iPad", "iPhone", "iPod"];

impl UserAgent {
    /// Inspect a raw `User-Agent` header value
    pub fn parse(ua: &str) -> Self {
        let os = first_match(ua, OS_RULES);
        let browser = first_match(ua, BROWSER_RULES);
        let model = APPLE_MODELS
            .iter()
            .find(|m| ua.contains(*m))
            .map(|m| m.to_string())
            .or_else(|| android_model(ua));

        let class = if ua.contains("iPad") || ua.contains("Tablet") {
            Some(DeviceClass::Tablet)
        } else if ua.contains("Mobi") || ua.contains("iPhone") || ua.contains("iPod") {
            Some(DeviceClass::Mobile)
        } else if ua.contains("Android") {
            // Android without the "Mobile" token is a tablet
            Some(DeviceClass::Tablet)
        } else {
            None
        };

        Self {
            os,
            browser,
            model,
            class,
        }
    }
}

fn first_match(ua: &str, rules: &[(&str, &str)]) -> Option<String> {
    rules
        .iter()
        .find(|(needle, _)| ua.contains(needle))
        .map(|(_, name)| name.to_string())
}

/// Pull "Pixel 7" out of "...; Android 14; Pixel 7 Build/..." or "...; Android 14; Pixel 7)"
fn android_model(ua: &str) -> Option<String> {
    let start = ua.find("Android")?;
    let platform = &ua[start..];
    let platform = &platform[..platform.find(')').unwrap_or(platform.len())];

    let candidate = platform.split(';').nth(1)?.trim();
    let candidate = candidate
        .split(" Build/")
        .next()
        .unwrap_or(candidate)
        .trim();

    // Chrome's reduced UA replaces the model with a literal "K"
    if candidate.is_empty() || candidate == "K" || candidate.starts_with("wv") {
        None
    } else {
        Some(candidate.to_string())
    }
}
