//! Event types flowing through the pipeline.
//!
//! Sources yield [`RawEvent`]s, the normalizer turns them into immutable
//! [`CanonicalEvent`]s, and the scorer pairs each one with a probability to
//! form a [`ScoredEvent`]. [`EventOut`] is the wire payload sent to live
//! subscribers.

use std::fmt;
use std::sync::Arc;
use serde::{Deserialize, Serialize};

/// Verdict the upstream edge applied to the traffic
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    #[default]
    Allow,
    Challenge,
    Block,
}

impl Action {
    /// Parse an upstream action string.
    ///
    /// Cloudflare reports several challenge flavours (`managed_challenge`,
    /// `jschallenge`, ...), all folded into `Challenge`. Anything unknown is `Allow`.
    pub fn parse(value: &str) -> Self {
        let value = value.trim().to_ascii_lowercase();
        if value.contains("challenge") {
            Action::Challenge
        } else if value == "block" || value == "drop" {
            Action::Block
        } else {
            Action::Allow
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Action::Allow => "allow",
            Action::Challenge => "challenge",
            Action::Block => "block",
        }
    }
}

/// Attack vector tag. Open set upstream; unknown tags collapse to `Syn`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
pub enum Vector {
    #[default]
    #[serde(rename = "SYN")]
    Syn,
    #[serde(rename = "UDP")]
    Udp,
    #[serde(rename = "HTTP2")]
    Http2,
}

impl Vector {
    pub const ALL: [Vector; 3] = [Vector::Syn, Vector::Udp, Vector::Http2];

    pub fn parse(value: &str) -> Self {
        match value.trim().to_ascii_uppercase().as_str() {
            "UDP" => Vector::Udp,
            "HTTP2" => Vector::Http2,
            _ => Vector::Syn,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Vector::Syn => "SYN",
            Vector::Udp => "UDP",
            Vector::Http2 => "HTTP2",
        }
    }
}

impl fmt::Display for Vector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Latitude/longitude pair in degrees
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct GeoPoint {
    pub lat: f64,
    pub lon: f64,
}

impl GeoPoint {
    pub fn new(lat: f64, lon: f64) -> Self {
        Self { lat, lon }
    }
}

/// Per-IP flow record, as reported by the live firewall feed or the mock generator.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IpFlowRecord {
    /// Unix seconds
    pub timestamp: Option<i64>,
    pub src_ip: Option<String>,
    pub dst_ip: Option<String>,
    pub src_country: Option<String>,
    pub dst_country: Option<String>,
    pub src_asn: Option<u32>,
    pub dst_asn: Option<u32>,
    /// Byte estimate for this observation
    pub bytes: Option<f64>,
    /// Packets per second reported by the source
    pub pps: Option<u64>,
    pub action: Option<String>,
    pub vector: Option<String>,
}

/// Country-to-country aggregate record with geo and rates already attached.
#[derive(Debug, Clone, PartialEq)]
pub struct CountryPairRecord {
    pub timestamp: Option<i64>,
    pub src_country: String,
    pub dst_country: String,
    pub src_geo: GeoPoint,
    pub dst_geo: GeoPoint,
    pub src_asn: Option<u32>,
    pub dst_asn: Option<u32>,
    pub bytes: f64,
    pub pps: u64,
    pub action: Option<String>,
    pub vector: Option<String>,
}

/// Source-native event before normalization
#[derive(Debug, Clone, PartialEq)]
pub enum RawEvent {
    IpFlow(IpFlowRecord),
    CountryPair(CountryPairRecord),
}

impl RawEvent {
    pub fn timestamp(&self) -> Option<i64> {
        match self {
            RawEvent::IpFlow(record) => record.timestamp,
            RawEvent::CountryPair(record) => record.timestamp,
        }
    }
}

/// One side of a canonical event
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Endpoint {
    pub ip: Option<String>,
    pub country: String,
    pub asn: Option<u32>,
    pub geo: GeoPoint,
}

/// Normalized event consumed read-only by every downstream stage.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CanonicalEvent {
    /// Unix seconds
    pub timestamp: i64,
    pub source: Endpoint,
    pub destination: Endpoint,
    pub packets_per_second: u64,
    pub bits_per_second: f64,
    /// Byte volume for this observation (`bits_per_second / 8`)
    pub bytes: f64,
    pub action: Action,
    pub vector: Vector,
    /// 0-100, zero when no IP identity is known
    pub reputation_score: u8,
}

/// Canonical event paired with its anomaly probability.
///
/// The event is shared behind an `Arc`; the store and the broadcaster each
/// hold a clone and neither can mutate it.
#[derive(Debug, Clone)]
pub struct ScoredEvent {
    pub event: Arc<CanonicalEvent>,
    pub score: f64,
}

impl ScoredEvent {
    pub fn new(event: CanonicalEvent, score: f64) -> Self {
        Self {
            event: Arc::new(event),
            score,
        }
    }
}

/// Endpoint as published to live subscribers
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EndpointOut {
    pub country: String,
    pub lat: f64,
    pub lon: f64,
    /// Always present; `null` when unknown
    #[serde(default)]
    pub asn: Option<u32>,
}

/// Broadcast payload. Field names and order are what subscribers parse.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EventOut {
    pub ts: i64,
    pub src: EndpointOut,
    pub dst: EndpointOut,
    pub vector: Vector,
    pub pps: u64,
    pub bps: f64,
    pub score: f64,
}

impl From<&ScoredEvent> for EventOut {
    fn from(scored: &ScoredEvent) -> Self {
        let event = &scored.event;
        Self {
            ts: event.timestamp,
            src: EndpointOut {
                country: event.source.country.clone(),
                lat: event.source.geo.lat,
                lon: event.source.geo.lon,
                asn: event.source.asn,
            },
            dst: EndpointOut {
                country: event.destination.country.clone(),
                lat: event.destination.geo.lat,
                lon: event.destination.geo.lon,
                asn: event.destination.asn,
            },
            vector: event.vector,
            pps: event.packets_per_second,
            bps: event.bits_per_second,
            score: scored.score,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn endpoint(country: &str, asn: Option<u32>) -> Endpoint {
        Endpoint {
            ip: None,
            country: country.to_string(),
            asn,
            geo: GeoPoint::new(10.0, 20.0),
        }
    }

    #[test]
    fn test_action_parse() {
        assert_eq!(Action::parse("block"), Action::Block);
        assert_eq!(Action::parse("managed_challenge"), Action::Challenge);
        assert_eq!(Action::parse("JSChallenge"), Action::Challenge);
        assert_eq!(Action::parse("log"), Action::Allow);
        assert_eq!(Action::parse(""), Action::Allow);
    }

    #[test]
    fn test_unknown_vector_defaults_to_syn() {
        assert_eq!(Vector::parse("udp"), Vector::Udp);
        assert_eq!(Vector::parse("HTTP2"), Vector::Http2);
        assert_eq!(Vector::parse("ICMP"), Vector::Syn);
        assert_eq!(Vector::parse("HTTP"), Vector::Syn);
    }

    #[test]
    fn test_event_out_wire_format() {
        let event = CanonicalEvent {
            timestamp: 1_700_000_000,
            source: endpoint("US", Some(13335)),
            destination: endpoint("IT", None),
            packets_per_second: 42,
            bits_per_second: 268800.0,
            bytes: 33600.0,
            action: Action::Block,
            vector: Vector::Http2,
            reputation_score: 0,
        };
        let out = EventOut::from(&ScoredEvent::new(event, 0.5));
        let json = serde_json::to_string(&out).unwrap();
        assert_eq!(
            json,
            r#"{"ts":1700000000,"src":{"country":"US","lat":10.0,"lon":20.0,"asn":13335},"dst":{"country":"IT","lat":10.0,"lon":20.0,"asn":null},"vector":"HTTP2","pps":42,"bps":268800.0,"score":0.5}"#
        );
    }
}
