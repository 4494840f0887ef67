//! Configuration management for the live feed service.
//!
//! Settings are layered: serde defaults, then an optional TOML file, then
//! `DDOS_LIVE__SECTION__KEY` environment variables, then the flat variable
//! names older deployments used (`CLOUDFLARE_API_TOKEN`, `ABUSEIPDB_KEY`, ...).

use std::env;
use config::{Config as ConfigBuilder, ConfigError, Environment, File};
use crate::models::Config;

/// Flat environment variables and the keys they override
const LEGACY_ENV_KEYS: &[(&str, &str)] = &[
    ("USE_MOCK_INGEST", "ingest.use_mock"),
    ("USE_RADAR_INGEST", "ingest.use_radar"),
    ("CLOUDFLARE_API_TOKEN", "cloudflare.api_token"),
    ("CLOUDFLARE_ZONE_TAG", "cloudflare.zone_tag"),
    ("RADAR_API_TOKEN", "radar.api_token"),
    ("RADAR_DATE_RANGE", "radar.date_range"),
    ("RADAR_LIMIT", "radar.limit"),
    ("ABUSEIPDB_KEY", "reputation.api_key"),
    ("ABUSEIPDB_TTL_SEC", "reputation.ttl_secs"),
    ("REDIS_URL", "store.redis_url"),
];

/// Load configuration from the config file and environment variables
pub fn load_config() -> Result<Config, ConfigError> {
    let config_file = env::var("CONFIG_FILE").unwrap_or_else(|_| "config/default.toml".to_string());

    let mut builder = ConfigBuilder::builder()
        .add_source(File::with_name(&config_file).required(false))
        .add_source(
            Environment::with_prefix("DDOS_LIVE")
                .separator("__")
                .try_parsing(true),
        );

    for (var, key) in LEGACY_ENV_KEYS {
        let value = env::var(var).ok().filter(|v| !v.trim().is_empty());
        builder = builder.set_override_option(*key, value)?;
    }

    let config: Config = builder.build()?.try_deserialize()?;
    config.validate().map_err(ConfigError::Message)?;
    Ok(config)
}
