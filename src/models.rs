use serde::{Deserialize, Serialize};

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Server host
    pub host: String,
    /// Server port
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
        }
    }
}

/// Storage backend selection
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    #[default]
    Memory,
    Redis,
}

/// Event store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Which backend persists scored events
    pub backend: StoreBackend,
    /// Redis connection URL
    pub redis_url: String,
    /// Redis list the events are appended to
    pub key: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::Memory,
            redis_url: "redis://127.0.0.1:6379".to_string(),
            key: "ddos:events".to_string(),
        }
    }
}

/// Source selection flags
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestConfig {
    /// Force the synthetic generator even when Cloudflare credentials exist
    pub use_mock: bool,
    /// Prefer the Radar aggregate source when a Radar token is set
    pub use_radar: bool,
}

/// Cloudflare firewall events (per-zone GraphQL) configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CloudflareConfig {
    pub api_token: String,
    pub zone_tag: String,
    pub graphql_endpoint: String,
    /// Seconds between polls
    pub poll_interval_secs: u64,
    /// Width of the trailing time range queried on each poll
    pub window_secs: u64,
    pub request_timeout_secs: u64,
}

impl Default for CloudflareConfig {
    fn default() -> Self {
        Self {
            api_token: String::new(),
            zone_tag: String::new(),
            graphql_endpoint: "https://api.cloudflare.com/client/v4/graphql".to_string(),
            poll_interval_secs: 3,
            window_secs: 60,
            request_timeout_secs: 20,
        }
    }
}

/// Cloudflare Radar aggregate configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RadarConfig {
    pub api_token: String,
    pub base_url: String,
    /// Radar `dateRange` parameter, e.g. `1d`
    pub date_range: String,
    /// Number of top locations requested per side
    pub limit: u32,
    /// Events synthesized per refresh
    pub batch_events: usize,
    pub refresh_interval_secs: u64,
    /// Delay before retrying after an upstream failure
    pub retry_delay_secs: u64,
    pub request_timeout_secs: u64,
}

impl Default for RadarConfig {
    fn default() -> Self {
        Self {
            api_token: String::new(),
            base_url: "https://api.cloudflare.com/client/v4/radar".to_string(),
            date_range: "1d".to_string(),
            limit: 20,
            batch_events: 150,
            refresh_interval_secs: 8,
            retry_delay_secs: 2,
            request_timeout_secs: 20,
        }
    }
}

/// AbuseIPDB reputation configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReputationConfig {
    /// Empty disables lookups
    pub api_key: String,
    pub endpoint: String,
    /// Cache lifetime of a fetched score
    pub ttl_secs: u64,
    pub max_age_days: u32,
    pub request_timeout_secs: u64,
}

impl Default for ReputationConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            endpoint: "https://api.abuseipdb.com/api/v2/check".to_string(),
            ttl_secs: 3600,
            max_age_days: 90,
            request_timeout_secs: 10,
        }
    }
}

/// Pipeline tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Bounded persistence queue; the producer blocks when it is full
    pub persist_queue_capacity: usize,
    /// Bounded broadcast queue; messages are dropped (and counted) when full
    pub broadcast_queue_capacity: usize,
    /// Per-subscriber buffer before a slow subscriber is evicted
    pub subscriber_buffer: usize,
    /// Time the writer gets to flush queued events on shutdown
    pub drain_timeout_secs: u64,
    /// Sliding window width W
    pub rate_window_secs: f64,
    /// Bytes per event assumed when a source gives no estimate
    pub default_bytes_hint: f64,
    /// Destination country used when a source omits it
    pub default_destination_country: String,
    /// How often idle rate windows are compacted
    pub compaction_interval_secs: f64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            persist_queue_capacity: 10_000,
            broadcast_queue_capacity: 1024,
            subscriber_buffer: 256,
            drain_timeout_secs: 5,
            rate_window_secs: 3.0,
            default_bytes_hint: 800.0,
            default_destination_country: "IT".to_string(),
            compaction_interval_secs: 60.0,
        }
    }
}

/// Application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Server configuration
    pub server: ServerConfig,
    /// Event store configuration
    pub store: StoreConfig,
    /// Source selection
    pub ingest: IngestConfig,
    /// Live firewall events source
    pub cloudflare: CloudflareConfig,
    /// Aggregate pairs source
    pub radar: RadarConfig,
    /// IP reputation
    pub reputation: ReputationConfig,
    /// Pipeline tuning
    pub pipeline: PipelineConfig,
}

impl Config {
    /// Reject settings the pipeline cannot start with.
    pub fn validate(&self) -> Result<(), String> {
        let pipeline = &self.pipeline;
        if pipeline.persist_queue_capacity == 0 {
            return Err("pipeline.persist_queue_capacity must be greater than 0".to_string());
        }
        if pipeline.broadcast_queue_capacity == 0 {
            return Err("pipeline.broadcast_queue_capacity must be greater than 0".to_string());
        }
        if pipeline.subscriber_buffer == 0 {
            return Err("pipeline.subscriber_buffer must be greater than 0".to_string());
        }
        if !(pipeline.rate_window_secs.is_finite() && pipeline.rate_window_secs > 0.0) {
            return Err("pipeline.rate_window_secs must be a positive number".to_string());
        }
        if self.cloudflare.poll_interval_secs == 0 {
            return Err("cloudflare.poll_interval_secs must be greater than 0".to_string());
        }
        if self.radar.batch_events == 0 {
            return Err("radar.batch_events must be greater than 0".to_string());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.pipeline.persist_queue_capacity, 10_000);
        assert_eq!(config.reputation.ttl_secs, 3600);
        assert_eq!(config.cloudflare.poll_interval_secs, 3);
        assert_eq!(config.cloudflare.window_secs, 60);
    }

    #[test]
    fn test_zero_queue_capacity_is_rejected() {
        let mut config = Config::default();
        config.pipeline.persist_queue_capacity = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: Config = serde_json::from_str(r#"{"store":{"backend":"redis"}}"#).unwrap();
        assert_eq!(config.store.backend, StoreBackend::Redis);
        assert_eq!(config.store.key, "ddos:events");
        assert_eq!(config.server.port, 8080);
    }
}
