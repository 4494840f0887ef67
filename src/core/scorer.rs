//! Anomaly scoring.
//!
//! The pipeline only depends on the [`Scorer`] trait. [`LogisticScorer`] is
//! the built-in model: fixed weights over the same features the offline
//! classifier is trained on (log rates, reputation, action, vector).

use crate::core::event::{Action, CanonicalEvent, Vector};

/// Assigns an anomaly probability to a canonical event.
///
/// Implementations must not panic; a failure should produce 0.0.
pub trait Scorer: Send + Sync {
    fn score(&self, event: &CanonicalEvent) -> f64;
}

/// Clamp a score into [0, 1], mapping non-finite values to the neutral 0.0.
pub fn sanitize_score(score: f64) -> f64 {
    if score.is_finite() {
        score.clamp(0.0, 1.0)
    } else {
        0.0
    }
}

/// Feature vector derived from a canonical event
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Features {
    pub log_pps: f64,
    pub log_bps: f64,
    pub bytes_per_packet: f64,
    pub reputation: f64,
    pub action: Action,
    pub vector: Vector,
}

impl Features {
    pub fn from_event(event: &CanonicalEvent) -> Self {
        let pps = event.packets_per_second as f64;
        let bps = event.bits_per_second.max(0.0);
        Self {
            log_pps: (pps + 1.0).ln(),
            log_bps: (bps + 1.0).ln(),
            bytes_per_packet: bps / (pps + 1e-6),
            reputation: f64::from(event.reputation_score),
            action: event.action,
            vector: event.vector,
        }
    }
}

/// Fixed-weight logistic model.
///
/// The raw logit is `(log_pps + log_bps + reputation/20 + action + vector - bias) / temperature`.
#[derive(Debug, Clone)]
pub struct LogisticScorer {
    pub bias: f64,
    pub temperature: f64,
}

impl Default for LogisticScorer {
    fn default() -> Self {
        // bias sits near the 70th percentile of typical attack traffic
        Self {
            bias: 33.0,
            temperature: 1.5,
        }
    }
}

impl LogisticScorer {
    fn action_weight(action: Action) -> f64 {
        match action {
            Action::Block => 2.5,
            Action::Challenge => 1.2,
            Action::Allow => 0.0,
        }
    }

    fn vector_weight(vector: Vector) -> f64 {
        match vector {
            Vector::Udp => 0.8,
            Vector::Http2 => 0.5,
            Vector::Syn => 0.2,
        }
    }

    pub fn logit(&self, features: &Features) -> f64 {
        let raw = features.log_pps
            + features.log_bps
            + features.reputation / 20.0
            + Self::action_weight(features.action)
            + Self::vector_weight(features.vector);
        (raw - self.bias) / self.temperature.max(f64::EPSILON)
    }
}

impl Scorer for LogisticScorer {
    fn score(&self, event: &CanonicalEvent) -> f64 {
        let features = Features::from_event(event);
        let probability = 1.0 / (1.0 + (-self.logit(&features)).exp());
        sanitize_score(probability)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::event::{Endpoint, GeoPoint};

    fn event(pps: u64, bps: f64, reputation: u8, action: Action) -> CanonicalEvent {
        let endpoint = Endpoint {
            ip: None,
            country: "US".to_string(),
            asn: None,
            geo: GeoPoint::new(0.0, 0.0),
        };
        CanonicalEvent {
            timestamp: 0,
            source: endpoint.clone(),
            destination: endpoint,
            packets_per_second: pps,
            bits_per_second: bps,
            bytes: bps / 8.0,
            action,
            vector: Vector::Udp,
            reputation_score: reputation,
        }
    }

    #[test]
    fn test_sanitize_score() {
        assert_eq!(sanitize_score(f64::NAN), 0.0);
        assert_eq!(sanitize_score(f64::INFINITY), 0.0);
        assert_eq!(sanitize_score(1.7), 1.0);
        assert_eq!(sanitize_score(-0.2), 0.0);
        assert_eq!(sanitize_score(0.25), 0.25);
    }

    #[test]
    fn test_score_is_probability() {
        let scorer = LogisticScorer::default();
        for pps in [0, 1, 1_000, 400_000, u64::MAX / 2] {
            let score = scorer.score(&event(pps, pps as f64 * 1200.0, 50, Action::Allow));
            assert!((0.0..=1.0).contains(&score), "score {} out of range", score);
        }
    }

    #[test]
    fn test_heavier_traffic_scores_higher() {
        let scorer = LogisticScorer::default();
        let quiet = scorer.score(&event(10, 8_000.0, 0, Action::Allow));
        let loud = scorer.score(&event(500_000, 500_000.0 * 2_000.0, 90, Action::Block));
        assert!(loud > quiet);
        assert!(loud > 0.5);
        assert!(quiet < 0.5);
    }
}
