//! Synthetic traffic generator. No external I/O.

use std::time::Duration;
use async_trait::async_trait;
use rand::distributions::{Distribution, WeightedIndex};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::LogNormal;
use crate::core::event::{Action, IpFlowRecord, RawEvent, Vector};
use crate::core::source::{Source, SourceError, SourceKind, SourceMode, SourceStatus};
use crate::utils::get_current_timestamp;

const COUNTRIES: [&str; 10] = ["US", "CN", "IT", "DE", "BR", "GB", "FR", "JP", "IN", "RU"];
const ACTIONS: [Action; 3] = [Action::Allow, Action::Challenge, Action::Block];
const ACTION_WEIGHTS: [f64; 3] = [0.6, 0.25, 0.15];

/// Log-normal packet rate parameters (of the underlying normal)
const PPS_MU: f64 = 12.0;
const PPS_SIGMA: f64 = 0.6;

pub struct MockSource {
    rng: StdRng,
    actions: WeightedIndex<f64>,
    pps: LogNormal<f64>,
    /// Inter-arrival delay range in milliseconds
    delay_ms: (u64, u64),
    started: bool,
}

impl MockSource {
    /// Create a generator with entropy-seeded randomness and 50-400 ms between events
    ///
    /// # Arguments
    ///
    /// * `status` - Shared source status, set to `mock`
    ///
    /// # Returns
    ///
    /// * `Ok(MockSource)` ready to stream
    /// * `Err(SourceError::InvalidDistribution)` if the sampling tables are invalid
    pub fn new(status: SourceStatus) -> Result<Self, SourceError> {
        let source = Self::with_rng(StdRng::from_entropy(), (50, 400))?;
        status.set(SourceMode::Mock);
        Ok(source)
    }

    /// Deterministic generator with a custom inter-arrival range.
    pub fn seeded(seed: u64, delay_ms: (u64, u64)) -> Result<Self, SourceError> {
        Self::with_rng(StdRng::seed_from_u64(seed), delay_ms)
    }

    fn with_rng(rng: StdRng, delay_ms: (u64, u64)) -> Result<Self, SourceError> {
        let actions = WeightedIndex::new(ACTION_WEIGHTS)
            .map_err(|e| SourceError::InvalidDistribution(e.to_string()))?;
        let pps = LogNormal::new(PPS_MU, PPS_SIGMA)
            .map_err(|e| SourceError::InvalidDistribution(e.to_string()))?;
        Ok(Self {
            rng,
            actions,
            pps,
            delay_ms: (delay_ms.0.min(delay_ms.1), delay_ms.0.max(delay_ms.1)),
            started: false,
        })
    }

    fn random_ip(&mut self) -> String {
        let octets: Vec<String> = (0..4).map(|_| self.rng.gen_range(1..=254u8).to_string()).collect();
        octets.join(".")
    }

    /// Build one synthetic flow record.
    pub fn generate(&mut self) -> RawEvent {
        let src_ip = self.random_ip();
        let dst_ip = self.random_ip();
        let pps = self.pps.sample(&mut self.rng) as u64;
        let bps = pps as f64 * self.rng.gen_range(60..=240) as f64;
        let action = ACTIONS[self.actions.sample(&mut self.rng)];
        let vector = Vector::ALL[self.rng.gen_range(0..Vector::ALL.len())];
        let country = COUNTRIES[self.rng.gen_range(0..COUNTRIES.len())];

        RawEvent::IpFlow(IpFlowRecord {
            timestamp: Some(get_current_timestamp() as i64),
            src_ip: Some(src_ip),
            dst_ip: Some(dst_ip),
            src_country: Some(country.to_string()),
            dst_country: None,
            src_asn: Some(self.rng.gen_range(10_000..=65_000)),
            dst_asn: None,
            bytes: Some(bps / 8.0),
            pps: Some(pps),
            action: Some(action.as_str().to_string()),
            vector: Some(vector.as_str().to_string()),
        })
    }
}

#[async_trait]
impl Source for MockSource {
    async fn next(&mut self) -> RawEvent {
        if self.started {
            let delay = self.rng.gen_range(self.delay_ms.0..=self.delay_ms.1);
            if delay > 0 {
                tokio::time::sleep(Duration::from_millis(delay)).await;
            }
        }
        self.started = true;
        self.generate()
    }

    fn kind(&self) -> SourceKind {
        SourceKind::Mock
    }
}
