//! Country centroids and name lookups used to place events on the map.

use rand::Rng;
use crate::core::event::GeoPoint;

/// Maximum jitter (degrees) applied around a centroid so co-located events
/// don't render on top of each other.
pub const CENTROID_JITTER_DEG: f64 = 2.0;

const CENTROIDS: &[(&str, f64, f64)] = &[
    ("US", 38.0, -97.0),
    ("CN", 36.0, 104.0),
    ("RU", 61.5, 99.0),
    ("GB", 54.0, -2.0),
    ("DE", 51.0, 10.0),
    ("FR", 46.0, 2.0),
    ("IT", 42.8, 12.5),
    ("ES", 40.4, -3.7),
    ("NL", 52.2, 5.3),
    ("SE", 62.0, 15.0),
    ("NO", 61.0, 8.0),
    ("PL", 52.0, 19.0),
    ("UA", 49.0, 32.0),
    ("TR", 39.0, 35.0),
    ("IR", 32.0, 53.0),
    ("IN", 22.0, 79.0),
    ("JP", 36.0, 138.0),
    ("KR", 36.5, 127.9),
    ("TW", 23.7, 121.0),
    ("HK", 22.3, 114.2),
    ("SG", 1.35, 103.8),
    ("AU", -25.0, 133.0),
    ("BR", -14.0, -52.0),
    ("AR", -34.0, -64.0),
    ("MX", 23.0, -102.0),
    ("CA", 56.0, -106.0),
    ("ZA", -29.0, 24.0),
    ("EG", 26.5, 30.0),
    ("SA", 24.0, 45.0),
];

/// Fixed roster used when no aggregate distribution can be computed
pub const FALLBACK_COUNTRIES: [&str; 24] = [
    "US", "CN", "RU", "GB", "DE", "FR", "IT", "ES", "NL", "SE", "PL", "TR",
    "IN", "JP", "KR", "TW", "SG", "AU", "BR", "MX", "CA", "ZA", "EG", "SA",
];

const COUNTRY_NAMES: &[(&str, &str)] = &[
    ("United States", "US"),
    ("China", "CN"),
    ("Italy", "IT"),
    ("Germany", "DE"),
    ("Brazil", "BR"),
    ("United Kingdom", "GB"),
    ("France", "FR"),
    ("Japan", "JP"),
    ("India", "IN"),
    ("Russia", "RU"),
    ("Netherlands", "NL"),
    ("Spain", "ES"),
    ("Canada", "CA"),
    ("Australia", "AU"),
    ("Turkey", "TR"),
];

/// Exact centroid for an ISO-2 country code, if known.
pub fn centroid(country: &str) -> Option<GeoPoint> {
    CENTROIDS
        .iter()
        .find(|(cc, _, _)| cc.eq_ignore_ascii_case(country))
        .map(|(_, lat, lon)| GeoPoint::new(*lat, *lon))
}

pub fn has_centroid(country: &str) -> bool {
    centroid(country).is_some()
}

/// Centroid with up to ±[`CENTROID_JITTER_DEG`] of jitter on both axes.
///
/// Unknown countries land around (0, 0); the result is never missing.
pub fn jittered_centroid<R: Rng + ?Sized>(country: &str, rng: &mut R) -> GeoPoint {
    let base = centroid(country).unwrap_or(GeoPoint::new(0.0, 0.0));
    GeoPoint::new(
        base.lat + rng.gen_range(-CENTROID_JITTER_DEG..=CENTROID_JITTER_DEG),
        base.lon + rng.gen_range(-CENTROID_JITTER_DEG..=CENTROID_JITTER_DEG),
    )
}

/// Map a country name or code to ISO-2. Two-letter inputs pass through.
pub fn country_code(name: &str) -> String {
    let name = name.trim();
    if name.len() == 2 && name.chars().all(|c| c.is_ascii_alphabetic()) {
        return name.to_ascii_uppercase();
    }
    COUNTRY_NAMES
        .iter()
        .find(|(full, _)| full.eq_ignore_ascii_case(name))
        .map(|(_, cc)| cc.to_string())
        .unwrap_or_else(|| "US".to_string())
}
