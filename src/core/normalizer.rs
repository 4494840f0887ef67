//! Raw event → canonical event.
//!
//! Aggregate pairs already carry geo and rates and pass through with
//! reputation forced to 0. Flow records get centroid geo, a sliding-window
//! rate floor and a reputation score.

use std::sync::Arc;
use rand::rngs::StdRng;
use rand::SeedableRng;
use thiserror::Error;
use crate::core::event::{
    Action, CanonicalEvent, CountryPairRecord, Endpoint, IpFlowRecord, RawEvent, Vector,
};
use crate::core::geo::{country_code, jittered_centroid};
use crate::core::rate_estimator::{RateEstimator, RateKey};
use crate::core::reputation::ReputationLookup;
use crate::models::PipelineConfig;

/// Why a raw event was dropped
#[derive(Debug, Error, PartialEq, Eq)]
pub enum NormalizeError {
    #[error("missing timestamp")]
    MissingTimestamp,
    #[error("no source IP or country")]
    MissingIdentity,
    #[error("empty country in country pair")]
    EmptyCountry,
}

pub struct Normalizer {
    estimator: RateEstimator,
    reputation: Arc<ReputationLookup>,
    rng: StdRng,
    default_destination: String,
}

impl Normalizer {
    pub fn new(
        estimator: RateEstimator,
        reputation: Arc<ReputationLookup>,
        default_destination: impl Into<String>,
    ) -> Self {
        Self {
            estimator,
            reputation,
            rng: StdRng::from_entropy(),
            default_destination: default_destination.into(),
        }
    }

    pub fn from_config(config: &PipelineConfig, reputation: Arc<ReputationLookup>) -> Self {
        Self::new(
            RateEstimator::new(
                config.rate_window_secs,
                config.default_bytes_hint,
                config.compaction_interval_secs,
            ),
            reputation,
            config.default_destination_country.clone(),
        )
    }

    /// Replace the jitter RNG, for reproducible output.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = StdRng::seed_from_u64(seed);
        self
    }

    pub fn estimator(&self) -> &RateEstimator {
        &self.estimator
    }

    /// Build the canonical event for `raw`, observed at `now` (Unix seconds).
    ///
    /// # Returns
    ///
    /// * `Ok(CanonicalEvent)` with geo, rates and reputation filled in
    /// * `Err(NormalizeError)` if the event lacks a timestamp, a source identity or a pair country
    pub async fn normalize(&mut self, raw: RawEvent, now: f64) -> Result<CanonicalEvent, NormalizeError> {
        match raw {
            RawEvent::CountryPair(record) => Self::pair_event(record),
            RawEvent::IpFlow(record) => self.flow_event(record, now).await,
        }
    }

    fn pair_event(record: CountryPairRecord) -> Result<CanonicalEvent, NormalizeError> {
        let timestamp = record.timestamp.ok_or(NormalizeError::MissingTimestamp)?;
        let src_country = record.src_country.trim().to_ascii_uppercase();
        let dst_country = record.dst_country.trim().to_ascii_uppercase();
        if src_country.is_empty() || dst_country.is_empty() {
            return Err(NormalizeError::EmptyCountry);
        }
        let bytes = non_negative(record.bytes);

        Ok(CanonicalEvent {
            timestamp,
            source: Endpoint {
                ip: None,
                country: src_country,
                asn: record.src_asn,
                geo: record.src_geo,
            },
            destination: Endpoint {
                ip: None,
                country: dst_country,
                asn: record.dst_asn,
                geo: record.dst_geo,
            },
            packets_per_second: record.pps,
            bits_per_second: bytes * 8.0,
            bytes,
            action: record.action.as_deref().map(Action::parse).unwrap_or_default(),
            vector: record.vector.as_deref().map(Vector::parse).unwrap_or_default(),
            reputation_score: 0,
        })
    }

    async fn flow_event(&mut self, record: IpFlowRecord, now: f64) -> Result<CanonicalEvent, NormalizeError> {
        let timestamp = record.timestamp.ok_or(NormalizeError::MissingTimestamp)?;
        let src_ip = present(record.src_ip);
        let src_country = present(record.src_country);
        if src_ip.is_none() && src_country.is_none() {
            return Err(NormalizeError::MissingIdentity);
        }
        let src_country = src_country
            .map(|name| country_code(&name))
            .unwrap_or_else(|| "US".to_string());
        let dst_country = present(record.dst_country)
            .map(|name| country_code(&name))
            .unwrap_or_else(|| self.default_destination.clone());

        let src_geo = jittered_centroid(&src_country, &mut self.rng);
        let dst_geo = jittered_centroid(&dst_country, &mut self.rng);

        let raw_bytes = record.bytes.filter(|b| b.is_finite() && *b >= 0.0);
        let key = RateKey::for_identity(src_ip.as_deref(), &src_country, &dst_country);
        let estimate = self.estimator.update(key, raw_bytes, now);
        let reputation_score = self.reputation.score_for(src_ip.as_deref()).await;

        // the window estimate is a floor, never a ceiling
        let packets_per_second = record.pps.unwrap_or(0).max(estimate.packets_per_second);
        let bytes = raw_bytes.unwrap_or(0.0).max(estimate.bits_per_second / 8.0);

        Ok(CanonicalEvent {
            timestamp,
            source: Endpoint {
                ip: src_ip,
                country: src_country,
                asn: record.src_asn,
                geo: src_geo,
            },
            destination: Endpoint {
                ip: present(record.dst_ip),
                country: dst_country,
                asn: record.dst_asn,
                geo: dst_geo,
            },
            packets_per_second,
            bits_per_second: bytes * 8.0,
            bytes,
            action: record.action.as_deref().map(Action::parse).unwrap_or_default(),
            vector: record.vector.as_deref().map(Vector::parse).unwrap_or_default(),
            reputation_score,
        })
    }
}

fn present(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn non_negative(value: f64) -> f64 {
    if value.is_finite() { value.max(0.0) } else { 0.0 }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::event::GeoPoint;
    use crate::core::geo::{centroid, CENTROID_JITTER_DEG};
    use crate::core::reputation::{FetchOutcome, MockReputationFetcher};
    use crate::core::source::MockSource;

    fn normalizer() -> Normalizer {
        Normalizer::new(
            RateEstimator::new(3.0, 800.0, 60.0),
            Arc::new(ReputationLookup::disabled()),
            "IT",
        )
        .with_seed(5)
    }

    fn flow(ip: &str, pps: u64) -> RawEvent {
        RawEvent::IpFlow(IpFlowRecord {
            timestamp: Some(1_700_000_000),
            src_ip: Some(ip.to_string()),
            src_country: Some("DE".to_string()),
            pps: Some(pps),
            action: Some("block".to_string()),
            vector: Some("UDP".to_string()),
            ..Default::default()
        })
    }

    fn near(point: GeoPoint, center: GeoPoint) -> bool {
        (point.lat - center.lat).abs() <= CENTROID_JITTER_DEG
            && (point.lon - center.lon).abs() <= CENTROID_JITTER_DEG
    }

    #[tokio::test]
    async fn test_three_events_same_ip_within_window() {
        let mut normalizer = normalizer();
        let mut last = None;
        for (i, pps) in [100, 200, 300].into_iter().enumerate() {
            let now = 1_000.0 + i as f64 * 0.4;
            last = Some(normalizer.normalize(flow("10.0.0.1", pps), now).await.unwrap());
        }
        let event = last.unwrap();
        // floor(3 / 3) = 1, so the reported 300 wins
        assert_eq!(event.packets_per_second, 300);
        // no byte estimate: 1 pps * 800 B
        assert_eq!(event.bytes, 800.0);
        assert_eq!(event.bits_per_second, 6400.0);
        assert_eq!(event.action, Action::Block);
        assert_eq!(event.vector, Vector::Udp);
    }

    #[tokio::test]
    async fn test_estimate_floors_understated_rate() {
        let mut normalizer = Normalizer::new(
            RateEstimator::new(1.0, 800.0, 0.0),
            Arc::new(ReputationLookup::disabled()),
            "IT",
        );
        let mut event = None;
        for i in 0..10 {
            event = Some(normalizer.normalize(flow("10.0.0.9", 2), 50.0 + i as f64 * 0.05).await.unwrap());
        }
        let event = event.unwrap();
        assert_eq!(event.packets_per_second, 10);
        assert_eq!(event.bytes, 10.0 * 800.0);
    }

    #[tokio::test]
    async fn test_pps_never_below_reported_for_mock_events() {
        let mut normalizer = normalizer();
        let mut source = MockSource::seeded(9, (0, 0)).unwrap();
        for i in 0..300 {
            let raw = source.generate();
            let reported = match &raw {
                RawEvent::IpFlow(record) => record.pps.unwrap_or(0),
                _ => unreachable!(),
            };
            let event = normalizer.normalize(raw, 10.0 + i as f64 * 0.01).await.unwrap();
            assert!(event.packets_per_second >= reported);
            assert!(event.source.geo.lat.is_finite() && event.source.geo.lon.is_finite());
            assert!(event.destination.geo.lat.is_finite() && event.destination.geo.lon.is_finite());
            assert_eq!(event.destination.country, "IT");
        }
    }

    #[tokio::test]
    async fn test_geo_present_for_unknown_countries() {
        let mut normalizer = normalizer();
        let raw = RawEvent::IpFlow(IpFlowRecord {
            timestamp: Some(1),
            src_ip: Some("192.0.2.1".to_string()),
            src_country: Some("Atlantis".to_string()),
            dst_country: Some("Narnia".to_string()),
            ..Default::default()
        });
        let event = normalizer.normalize(raw, 1.0).await.unwrap();
        // unknown names resolve to US
        assert_eq!(event.source.country, "US");
        assert!(near(event.source.geo, centroid("US").unwrap()));
        assert_eq!(event.vector, Vector::Syn);
        assert_eq!(event.action, Action::Allow);
    }

    #[tokio::test]
    async fn test_country_pair_passthrough() {
        let mut normalizer = normalizer();
        let src_geo = centroid("CN").unwrap();
        let dst_geo = centroid("US").unwrap();
        let raw = RawEvent::CountryPair(CountryPairRecord {
            timestamp: Some(1_700_000_123),
            src_country: "cn".to_string(),
            dst_country: "US".to_string(),
            src_geo,
            dst_geo,
            src_asn: None,
            dst_asn: Some(13335),
            bytes: 1_000.0,
            pps: 42_000,
            action: Some("block".to_string()),
            vector: Some("HTTP2".to_string()),
        });
        let event = normalizer.normalize(raw, 5.0).await.unwrap();
        assert_eq!(event.source.country, "CN");
        assert_eq!(event.source.geo, src_geo);
        assert_eq!(event.destination.geo, dst_geo);
        assert_eq!(event.packets_per_second, 42_000);
        assert_eq!(event.bits_per_second, 8_000.0);
        assert_eq!(event.reputation_score, 0);
        assert_eq!(event.vector, Vector::Http2);
        // pass-through never touches the rate windows
        assert_eq!(normalizer.estimator().tracked_keys(), 0);
    }

    #[tokio::test]
    async fn test_malformed_events_are_rejected() {
        let mut normalizer = normalizer();
        let no_ts = RawEvent::IpFlow(IpFlowRecord {
            src_ip: Some("1.1.1.1".to_string()),
            ..Default::default()
        });
        assert_eq!(normalizer.normalize(no_ts, 1.0).await, Err(NormalizeError::MissingTimestamp));

        let no_identity = RawEvent::IpFlow(IpFlowRecord {
            timestamp: Some(1),
            src_ip: Some("  ".to_string()),
            ..Default::default()
        });
        assert_eq!(normalizer.normalize(no_identity, 1.0).await, Err(NormalizeError::MissingIdentity));

        let empty_pair = RawEvent::CountryPair(CountryPairRecord {
            timestamp: Some(1),
            src_country: String::new(),
            dst_country: "US".to_string(),
            src_geo: GeoPoint::new(0.0, 0.0),
            dst_geo: GeoPoint::new(0.0, 0.0),
            src_asn: None,
            dst_asn: None,
            bytes: 0.0,
            pps: 0,
            action: None,
            vector: None,
        });
        assert_eq!(normalizer.normalize(empty_pair, 1.0).await, Err(NormalizeError::EmptyCountry));
    }

    #[tokio::test]
    async fn test_reputation_attached_to_source_ip() {
        let mut fetcher = MockReputationFetcher::new();
        fetcher
            .expect_fetch()
            .times(1)
            .returning(|_| Ok(FetchOutcome::Score(87)));
        let lookup = Arc::new(ReputationLookup::new(Some(Arc::new(fetcher)), 3600));
        let mut normalizer = Normalizer::new(RateEstimator::default(), lookup, "IT");

        let first = normalizer.normalize(flow("203.0.113.7", 1), 1.0).await.unwrap();
        let second = normalizer.normalize(flow("203.0.113.7", 1), 1.5).await.unwrap();
        assert_eq!(first.reputation_score, 87);
        // served from cache
        assert_eq!(second.reputation_score, 87);
    }
}
