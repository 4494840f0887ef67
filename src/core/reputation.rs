//! IP reputation lookup backed by AbuseIPDB with a TTL cache.
//!
//! Lookups never fail the caller. Missing credentials, missing IPs, transport
//! errors and rate-limit responses all fall back to the last cached value or 0.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use thiserror::Error;
use crate::models::ReputationConfig;
use crate::utils::get_current_timestamp;

/// Errors that can occur while fetching a reputation score
#[derive(Debug, Error)]
pub enum ReputationError {
    #[error("API request failed: {0}")]
    RequestError(#[from] reqwest::Error),
    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

/// Result of a single upstream fetch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchOutcome {
    Score(u8),
    /// Upstream answered 429: no fresh data, not an error
    RateLimited,
}

/// Upstream that knows how to score one IP
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ReputationFetcher: Send + Sync {
    async fn fetch(&self, ip: &str) -> Result<FetchOutcome, ReputationError>;
}

#[derive(Debug, Deserialize)]
struct AbuseCheckResponse {
    #[serde(default)]
    data: Option<AbuseCheckData>,
}

#[derive(Debug, Deserialize)]
struct AbuseCheckData {
    #[serde(rename = "abuseConfidenceScore", default)]
    abuse_confidence_score: Option<i64>,
}

/// AbuseIPDB `check` endpoint client
pub struct AbuseIpDbFetcher {
    client: Client,
    api_key: String,
    endpoint: String,
    max_age_days: u32,
}

impl AbuseIpDbFetcher {
    pub fn new(config: &ReputationConfig) -> Result<Self, ReputationError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()?;
        Ok(Self {
            client,
            api_key: config.api_key.clone(),
            endpoint: config.endpoint.clone(),
            max_age_days: config.max_age_days,
        })
    }
}

#[async_trait]
impl ReputationFetcher for AbuseIpDbFetcher {
    async fn fetch(&self, ip: &str) -> Result<FetchOutcome, ReputationError> {
        let response = self.client
            .get(&self.endpoint)
            .header("Key", &self.api_key)
            .header("Accept", "application/json")
            .query(&[("ipAddress", ip.to_string()), ("maxAgeInDays", self.max_age_days.to_string())])
            .send()
            .await?;

        if response.status() == StatusCode::TOO_MANY_REQUESTS {
            return Ok(FetchOutcome::RateLimited);
        }

        let body: AbuseCheckResponse = response.error_for_status()?.json().await?;
        let score = body
            .data
            .and_then(|data| data.abuse_confidence_score)
            .ok_or_else(|| ReputationError::InvalidResponse("missing abuseConfidenceScore".to_string()))?;
        Ok(FetchOutcome::Score(score.clamp(0, 100) as u8))
    }
}

#[derive(Debug, Clone, Copy)]
struct CacheEntry {
    score: u8,
    expires_at: u64,
}

/// TTL-cached, fail-open reputation lookup.
///
/// Expired entries are purged lazily when the same IP is looked up again.
/// The purged value still serves as the fallback for that one lookup if the
/// refetch is rate limited or fails; such outcomes never write the cache.
pub struct ReputationLookup {
    fetcher: Option<Arc<dyn ReputationFetcher>>,
    ttl_secs: u64,
    cache: Mutex<HashMap<String, CacheEntry>>,
}

impl ReputationLookup {
    pub fn new(fetcher: Option<Arc<dyn ReputationFetcher>>, ttl_secs: u64) -> Self {
        Self {
            fetcher,
            ttl_secs,
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Lookup that always answers 0 (no credential configured).
    pub fn disabled() -> Self {
        Self::new(None, 0)
    }

    /// Build from configuration; an empty API key disables lookups.
    pub fn from_config(config: &ReputationConfig) -> Result<Self, ReputationError> {
        if config.api_key.trim().is_empty() {
            log::info!("No AbuseIPDB key configured, reputation scores default to 0");
            return Ok(Self::disabled());
        }
        let fetcher: Arc<dyn ReputationFetcher> = Arc::new(AbuseIpDbFetcher::new(config)?);
        Ok(Self::new(Some(fetcher), config.ttl_secs))
    }

    /// Abuse confidence for `ip`, served from cache while fresh.
    ///
    /// # Arguments
    ///
    /// * `ip` - Source address; `None` or blank scores 0 without a lookup
    ///
    /// # Returns
    ///
    /// * Score 0-100. Lookup failures fall back to the last known score, or 0
    pub async fn score_for(&self, ip: Option<&str>) -> u8 {
        self.score_for_at(ip, get_current_timestamp()).await
    }

    pub async fn score_for_at(&self, ip: Option<&str>, now: u64) -> u8 {
        let ip = match ip.map(str::trim).filter(|ip| !ip.is_empty()) {
            Some(ip) => ip,
            None => return 0,
        };
        let fetcher = match &self.fetcher {
            Some(fetcher) => fetcher,
            None => return 0,
        };

        let stale = {
            let mut cache = self.cache.lock().unwrap_or_else(PoisonError::into_inner);
            match cache.get(ip).copied() {
                Some(entry) if now <= entry.expires_at => return entry.score,
                Some(entry) => {
                    cache.remove(ip);
                    Some(entry.score)
                }
                None => None,
            }
        };

        metrics::increment_counter!("reputation_lookups_total");
        match fetcher.fetch(ip).await {
            Ok(FetchOutcome::Score(score)) => {
                let mut cache = self.cache.lock().unwrap_or_else(PoisonError::into_inner);
                cache.insert(
                    ip.to_string(),
                    CacheEntry {
                        score,
                        expires_at: now.saturating_add(self.ttl_secs),
                    },
                );
                score
            }
            Ok(FetchOutcome::RateLimited) => stale.unwrap_or(0),
            Err(e) => {
                log::debug!("Reputation lookup for {} failed: {}", ip, e);
                stale.unwrap_or(0)
            }
        }
    }

    pub fn cached_entries(&self) -> usize {
        self.cache.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_no_credential_returns_zero() {
        let lookup = ReputationLookup::disabled();
        assert_eq!(lookup.score_for(Some("1.2.3.4")).await, 0);
        assert_eq!(lookup.score_for(Some("8.8.8.8")).await, 0);

        let lookup = ReputationLookup::from_config(&ReputationConfig::default()).unwrap();
        assert_eq!(lookup.score_for(Some("1.2.3.4")).await, 0);
    }

    #[tokio::test]
    async fn test_missing_ip_never_fetches() {
        let mut fetcher = MockReputationFetcher::new();
        fetcher.expect_fetch().never();
        let lookup = ReputationLookup::new(Some(Arc::new(fetcher)), 3600);
        assert_eq!(lookup.score_for(None).await, 0);
        assert_eq!(lookup.score_for(Some("  ")).await, 0);
    }

    #[tokio::test]
    async fn test_cached_value_served_within_ttl() {
        let mut fetcher = MockReputationFetcher::new();
        fetcher
            .expect_fetch()
            .times(1)
            .returning(|_| Ok(FetchOutcome::Score(77)));
        let lookup = ReputationLookup::new(Some(Arc::new(fetcher)), 3600);

        assert_eq!(lookup.score_for_at(Some("1.2.3.4"), 1_000).await, 77);
        assert_eq!(lookup.score_for_at(Some("1.2.3.4"), 4_000).await, 77);
        assert_eq!(lookup.cached_entries(), 1);
    }

    #[tokio::test]
    async fn test_rate_limit_reuses_previous_value() {
        let mut fetcher = MockReputationFetcher::new();
        let mut seq = mockall::Sequence::new();
        fetcher
            .expect_fetch()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(FetchOutcome::Score(55)));
        fetcher
            .expect_fetch()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(FetchOutcome::RateLimited));
        let lookup = ReputationLookup::new(Some(Arc::new(fetcher)), 10);

        assert_eq!(lookup.score_for_at(Some("1.2.3.4"), 100).await, 55);
        // expired, refetch is rate limited: previous value, cache not rewritten
        assert_eq!(lookup.score_for_at(Some("1.2.3.4"), 200).await, 55);
        assert_eq!(lookup.cached_entries(), 0);
    }

    #[tokio::test]
    async fn test_errors_fail_open() {
        let mut fetcher = MockReputationFetcher::new();
        fetcher
            .expect_fetch()
            .returning(|_| Err(ReputationError::InvalidResponse("boom".to_string())));
        let lookup = ReputationLookup::new(Some(Arc::new(fetcher)), 10);
        assert_eq!(lookup.score_for_at(Some("9.9.9.9"), 0).await, 0);

        let mut fetcher = MockReputationFetcher::new();
        fetcher
            .expect_fetch()
            .returning(|_| Ok(FetchOutcome::RateLimited));
        let lookup = ReputationLookup::new(Some(Arc::new(fetcher)), 10);
        assert_eq!(lookup.score_for_at(Some("9.9.9.9"), 0).await, 0);
        assert_eq!(lookup.cached_entries(), 0);
    }
}
