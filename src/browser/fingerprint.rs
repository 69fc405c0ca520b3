//! Randomized but realistic browser fingerprints.
//!
//! A [`ContextProfile`] is drawn once per pool so every page in a run looks
//! like the same visitor. A [`HeaderProfile`] is drawn on every acquire.

use rand::seq::IndexedRandom;
use serde_json::{Map, Value};

use crate::http_client::random_user_agent;

/// Viewport size with a sampling weight.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Viewport {
    pub width: u32,
    pub height: u32,
    weight: f64,
}

const fn vp(width: u32, height: u32, weight: f64) -> Viewport {
    Viewport {
        width,
        height,
        weight,
    }
}

/// Common desktop resolutions weighted by market share.
pub const VIEWPORTS: &[Viewport] = &[
    vp(1920, 1080, 0.15),
    vp(1366, 768, 0.12),
    vp(1536, 864, 0.12),
    vp(1440, 900, 0.10),
    vp(1680, 1050, 0.08),
    vp(2560, 1440, 0.08),
    vp(1920, 1200, 0.07),
    vp(1280, 1024, 0.06),
    vp(2560, 1600, 0.06),
    vp(3440, 1440, 0.05),
    vp(1280, 800, 0.05),
    vp(1024, 768, 0.04),
    vp(1600, 900, 0.03),
    vp(1360, 768, 0.03),
];

pub const LOCALES: &[&str] = &[
    "en-US", "en-GB", "en-CA", "en-AU", "de-DE", "fr-FR", "it-IT", "es-ES",
];

pub const TIMEZONES: &[&str] = &[
    "America/New_York",
    "America/Los_Angeles",
    "America/Chicago",
    "Europe/London",
    "Europe/Berlin",
    "Europe/Paris",
    "Europe/Rome",
    "America/Vancouver",
    "Australia/Sydney",
    "Canada/Eastern",
];

/// Latitude/longitude pair for geolocation emulation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Geolocation {
    pub latitude: f64,
    pub longitude: f64,
}

const fn geo(latitude: f64, longitude: f64) -> Geolocation {
    Geolocation {
        latitude,
        longitude,
    }
}

pub const GEOLOCATIONS: &[Geolocation] = &[
    geo(40.7128, -74.0060),
    geo(37.7749, -122.4194),
    geo(51.5074, -0.1278),
    geo(52.5200, 13.4050),
    geo(48.8566, 2.3522),
    geo(43.6532, -79.3832),
    geo(-33.8688, 151.2093),
    geo(49.2827, -123.1207),
];

/// Context-wide settings shared by every page of a run.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ContextProfile {
    pub viewport: Viewport,
    pub locale: &'static str,
    pub timezone: &'static str,
    pub geolocation: Geolocation,
}

impl ContextProfile {
    pub fn random() -> Self {
        let mut rng = rand::rng();
        let viewport = VIEWPORTS
            .choose_weighted(&mut rng, |v| v.weight)
            .copied()
            .unwrap_or(VIEWPORTS[0]);
        Self {
            viewport,
            locale: LOCALES.choose(&mut rng).copied().unwrap_or("en-US"),
            timezone: TIMEZONES
                .choose(&mut rng)
                .copied()
                .unwrap_or("America/New_York"),
            geolocation: GEOLOCATIONS
                .choose(&mut rng)
                .copied()
                .unwrap_or(GEOLOCATIONS[0]),
        }
    }

    #[cfg(test)]
    pub(crate) fn fixed(locale: &'static str) -> Self {
        Self {
            viewport: VIEWPORTS[0],
            locale,
            timezone: TIMEZONES[0],
            geolocation: GEOLOCATIONS[0],
        }
    }
}

pub const ACCEPT_LANGUAGE: &str = "en-US,en;q=0.9,es;q=0.8";

/// Per-page request identity: a user agent plus the headers that go with it.
#[derive(Debug, Clone, PartialEq)]
pub struct HeaderProfile {
    pub user_agent: String,
    pub headers: Vec<(&'static str, String)>,
}

impl HeaderProfile {
    pub fn random() -> Self {
        Self::for_user_agent(random_user_agent())
    }

    pub fn for_user_agent(user_agent: &str) -> Self {
        let headers = vec![
            ("User-Agent", user_agent.to_string()),
            ("Accept-Language", ACCEPT_LANGUAGE.to_string()),
            ("Referer", "https://www.google.com/".to_string()),
            ("Sec-Fetch-Dest", "document".to_string()),
            ("Sec-Fetch-Mode", "navigate".to_string()),
            ("Sec-Fetch-Site", "cross-site".to_string()),
            ("Sec-Fetch-User", "?1".to_string()),
            ("Upgrade-Insecure-Requests", "1".to_string()),
        ];
        Self {
            user_agent: user_agent.to_string(),
            headers,
        }
    }

    /// Headers as the JSON object CDP expects.
    pub fn to_json(&self) -> Value {
        let map: Map<String, Value> = self
            .headers
            .iter()
            .map(|(k, v)| (k.to_string(), Value::String(v.clone())))
            .collect();
        Value::Object(map)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_weights_sum_to_one() {
        let total: f64 = VIEWPORTS.iter().map(|v| v.weight).sum();
        assert!((total - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_random_profile_draws_from_sets() {
        for _ in 0..50 {
            let p = ContextProfile::random();
            assert!(VIEWPORTS.contains(&p.viewport));
            assert!(LOCALES.contains(&p.locale));
            assert!(TIMEZONES.contains(&p.timezone));
            assert!(GEOLOCATIONS.contains(&p.geolocation));
        }
    }

    #[test]
    fn test_header_profile_json() {
        let profile = HeaderProfile::for_user_agent("Mozilla/5.0 test");
        let json = profile.to_json();
        assert_eq!(json["User-Agent"], "Mozilla/5.0 test");
        assert_eq!(json["Accept-Language"], ACCEPT_LANGUAGE);
        assert_eq!(json["Upgrade-Insecure-Requests"], "1");
    }

    #[test]
    fn test_random_header_profile_uses_browser_agent() {
        let profile = HeaderProfile::random();
        assert!(profile.user_agent.contains("Mozilla"));
    }
}
