//! Event sources.
//!
//! Every source is an endless, non-restartable stream of [`RawEvent`]s.
//! Upstream failures are handled inside the source (log, wait, retry), so
//! `next` never returns an error and never ends under normal operation.

pub mod firewall;
pub mod mock;
pub mod radar;

use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;
use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;
use crate::core::event::RawEvent;
use crate::models::Config;

pub use firewall::FirewallEventsSource;
pub use mock::MockSource;
pub use radar::RadarPairsSource;

/// Errors raised while talking to an upstream API
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("API request failed: {0}")]
    RequestError(#[from] reqwest::Error),
    #[error("Invalid response: {0}")]
    InvalidResponse(String),
    #[error("Invalid sampling distribution: {0}")]
    InvalidDistribution(String),
}

/// Producer of raw events
#[async_trait]
pub trait Source: Send {
    /// Wait for the next raw event.
    ///
    /// Cancel-safe: dropping the future only loses the wait, never a
    /// buffered event.
    async fn next(&mut self) -> RawEvent;

    fn kind(&self) -> SourceKind;
}

/// Which variant is feeding the pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    Mock,
    LiveEvents,
    AggregatePairs,
}

/// How the aggregate distribution was obtained
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PairMode {
    /// No distribution built yet
    Pending,
    Computed,
    Fallback,
}

/// Externally visible source mode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceMode {
    Unknown,
    Mock,
    LiveEvents,
    AggregatePairs(PairMode),
}

impl SourceMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceMode::Unknown => "unknown",
            SourceMode::Mock => "mock",
            SourceMode::LiveEvents => "live_events",
            SourceMode::AggregatePairs(PairMode::Pending) => "aggregate_pending",
            SourceMode::AggregatePairs(PairMode::Computed) => "aggregate_computed",
            SourceMode::AggregatePairs(PairMode::Fallback) => "aggregate_fallback",
        }
    }
}

/// Shared handle to the current [`SourceMode`]
#[derive(Debug, Clone)]
pub struct SourceStatus {
    mode: Arc<RwLock<SourceMode>>,
}

impl SourceStatus {
    pub fn new() -> Self {
        Self {
            mode: Arc::new(RwLock::new(SourceMode::Unknown)),
        }
    }

    pub fn set(&self, mode: SourceMode) {
        *self.mode.write().unwrap_or_else(PoisonError::into_inner) = mode;
    }

    pub fn get(&self) -> SourceMode {
        *self.mode.read().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for SourceStatus {
    fn default() -> Self {
        Self::new()
    }
}

/// Pick a source from configuration.
///
/// Radar aggregates win when enabled and a Radar token is present; then the
/// live firewall feed when not forced to mock and zone credentials exist;
/// the mock generator otherwise.
///
/// # Arguments
///
/// * `config` - Full service configuration
/// * `status` - Shared mode flag, set by the chosen source
///
/// # Returns
///
/// * `Ok(Box<dyn Source>)` ready to stream
/// * `Err(SourceError)` if the HTTP client or generator cannot be built
pub fn build_source(config: &Config, status: SourceStatus) -> Result<Box<dyn Source>, SourceError> {
    let radar_ready = config.ingest.use_radar && !config.radar.api_token.trim().is_empty();
    let firewall_ready = !config.ingest.use_mock
        && !config.cloudflare.api_token.trim().is_empty()
        && !config.cloudflare.zone_tag.trim().is_empty();

    let source: Box<dyn Source> = if radar_ready {
        Box::new(RadarPairsSource::new(config.radar.clone(), status)?)
    } else if firewall_ready {
        Box::new(FirewallEventsSource::new(config.cloudflare.clone(), status)?)
    } else {
        Box::new(MockSource::new(status)?)
    };
    log::info!("Selected event source: {:?}", source.kind());
    Ok(source)
}

pub(crate) fn secs(value: u64) -> Duration {
    Duration::from_secs(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mock_is_default_source() {
        let status = SourceStatus::new();
        let source = build_source(&Config::default(), status.clone()).unwrap();
        assert_eq!(source.kind(), SourceKind::Mock);
        assert_eq!(status.get(), SourceMode::Mock);
    }

    #[test]
    fn test_source_selection_order() {
        let mut config = Config::default();
        config.cloudflare.api_token = "token".to_string();
        config.cloudflare.zone_tag = "zone".to_string();
        let source = build_source(&config, SourceStatus::new()).unwrap();
        assert_eq!(source.kind(), SourceKind::LiveEvents);

        config.ingest.use_mock = true;
        let source = build_source(&config, SourceStatus::new()).unwrap();
        assert_eq!(source.kind(), SourceKind::Mock);

        config.ingest.use_radar = true;
        // no radar token yet
        let source = build_source(&config, SourceStatus::new()).unwrap();
        assert_eq!(source.kind(), SourceKind::Mock);

        config.radar.api_token = "radar".to_string();
        let status = SourceStatus::new();
        let source = build_source(&config, status.clone()).unwrap();
        assert_eq!(source.kind(), SourceKind::AggregatePairs);
        assert_eq!(status.get().as_str(), "aggregate_pending");
    }
}
