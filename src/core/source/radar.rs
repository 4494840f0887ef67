//! Aggregate country-pair source backed by Cloudflare Radar.
//!
//! Radar only publishes aggregates: top origin and target locations of
//! layer-3 attacks plus a protocol summary. This source turns them into a
//! weighted distribution over (origin, target) pairs and a protocol mix,
//! then synthesizes batches of events by inverse-transform sampling.
//!
//! When Radar returns no usable pairs the distribution falls back to a fixed
//! roster of countries with uniform weight; [`PairMode`] records which one
//! is in use.

use std::collections::VecDeque;
use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use reqwest::Client;
use serde_json::{Map, Value};
use crate::core::event::{CountryPairRecord, RawEvent};
use crate::core::geo::{centroid, has_centroid, FALLBACK_COUNTRIES};
use crate::core::source::{secs, PairMode, Source, SourceError, SourceKind, SourceMode, SourceStatus};
use crate::models::RadarConfig;
use crate::utils::get_current_timestamp;

/// Keys that may carry an ISO-2 country code, in priority order.
pub const COUNTRY_KEYS: [&str; 11] = [
    "location",
    "loc",
    "code",
    "alpha2",
    "country",
    "countryCode",
    "locationAlpha2",
    "originCountryAlpha2",
    "targetCountryAlpha2",
    "clientCountry",
    "clientCountryAlpha2",
];

/// Nested objects searched after the top-level keys, in priority order.
pub const NESTED_SIDES: [&str; 4] = ["origin", "source", "target", "destination"];

/// Keys that may carry the weight of a location, in priority order.
pub const VALUE_KEYS: [&str; 6] = ["value", "percentage", "share", "count", "attacks", "requests"];

const PROTOCOL_KEYS: [&str; 4] = ["udp", "tcp", "icmp", "gre"];

/// Path to a field inside one Radar result item
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldPath {
    Top(&'static str),
    Nested(&'static str, &'static str),
}

impl FieldPath {
    fn resolve<'a>(&self, item: &'a Map<String, Value>) -> Option<&'a Value> {
        match self {
            FieldPath::Top(key) => item.get(*key),
            FieldPath::Nested(side, key) => item.get(*side)?.as_object()?.get(*key),
        }
    }
}

/// Country extraction rules: every top-level key, then every nested side
/// with every key. The first rule whose value decodes wins.
pub fn country_rules() -> Vec<FieldPath> {
    let mut rules: Vec<FieldPath> = COUNTRY_KEYS.iter().map(|key| FieldPath::Top(*key)).collect();
    for side in NESTED_SIDES {
        rules.extend(COUNTRY_KEYS.iter().map(|key| FieldPath::Nested(side, *key)));
    }
    rules
}

/// Trimmed, upper-cased, exactly two ASCII letters.
fn decode_country(value: &Value) -> Option<String> {
    let code = value.as_str()?.trim().to_ascii_uppercase();
    (code.len() == 2 && code.chars().all(|c| c.is_ascii_alphabetic())).then_some(code)
}

/// Numbers and numeric strings.
fn decode_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

pub fn extract_country(item: &Map<String, Value>) -> Option<String> {
    country_rules()
        .iter()
        .find_map(|path| path.resolve(item).and_then(decode_country))
}

pub fn extract_value(item: &Map<String, Value>) -> f64 {
    VALUE_KEYS
        .iter()
        .find_map(|key| item.get(*key).and_then(decode_number))
        .unwrap_or(0.0)
}

/// The item list of a Radar `result`: the result itself when it is a list,
/// else `top_0`, else the first list-valued member.
fn result_items(response: &Value) -> Vec<&Map<String, Value>> {
    let list = match response.get("result") {
        Some(Value::Array(items)) => Some(items),
        Some(Value::Object(result)) => match result.get("top_0") {
            Some(Value::Array(items)) => Some(items),
            _ => result.values().find_map(Value::as_array),
        },
        _ => None,
    };
    list.map(|items| items.iter().filter_map(Value::as_object).collect())
        .unwrap_or_default()
}

fn normalize<K>(entries: Vec<(K, f64)>) -> Vec<(K, f64)> {
    let total: f64 = entries.iter().map(|(_, w)| w).sum();
    let total = if total > 0.0 { total } else { 1.0 };
    entries.into_iter().map(|(k, w)| (k, w / total)).collect()
}

/// Parse a top-locations response into normalized (country, weight) pairs.
pub fn parse_top_locations(response: &Value) -> Vec<(String, f64)> {
    let entries = result_items(response)
        .into_iter()
        .filter_map(|item| {
            let country = extract_country(item)?;
            let value = extract_value(item);
            (value > 0.0).then_some((country, value))
        })
        .collect();
    normalize(entries)
}

/// Parse the layer-3 protocol summary. Empty input yields UDP/TCP 50/50.
pub fn parse_protocol_mix(response: &Value) -> Vec<(String, f64)> {
    let summary = response
        .get("result")
        .and_then(|r| r.get("summary_0"))
        .and_then(Value::as_object);
    let entries: Vec<(String, f64)> = summary
        .map(|summary| {
            PROTOCOL_KEYS
                .iter()
                .filter_map(|key| {
                    let weight = summary.get(*key).and_then(decode_number)?;
                    (weight.is_finite() && weight >= 0.0).then(|| (key.to_ascii_uppercase(), weight))
                })
                .collect()
        })
        .unwrap_or_default();

    if entries.iter().map(|(_, w)| w).sum::<f64>() <= 0.0 {
        return vec![("UDP".to_string(), 0.5), ("TCP".to_string(), 0.5)];
    }
    normalize(entries)
}

/// Weighted (origin, target) pair
#[derive(Debug, Clone, PartialEq)]
pub struct PairWeight {
    pub origin: String,
    pub target: String,
    pub weight: f64,
}

/// Normalized pair distribution and how it was obtained
#[derive(Debug, Clone)]
pub struct PairDistribution {
    pub pairs: Vec<PairWeight>,
    pub mode: PairMode,
}

/// Uniform distribution over the fallback roster, self-pairs excluded.
pub fn fallback_pairs() -> Vec<PairWeight> {
    let roster: Vec<&str> = FALLBACK_COUNTRIES
        .iter()
        .copied()
        .filter(|cc| has_centroid(cc))
        .collect();
    let mut pairs = Vec::with_capacity(roster.len() * roster.len());
    for origin in &roster {
        for target in &roster {
            if origin != target {
                pairs.push(PairWeight {
                    origin: origin.to_string(),
                    target: target.to_string(),
                    weight: 1.0,
                });
            }
        }
    }
    let total = pairs.len() as f64;
    for pair in &mut pairs {
        pair.weight /= total;
    }
    pairs
}

/// Cross origins with targets (weight = product), dropping self-pairs and
/// countries without a centroid. Falls back to the roster when nothing usable remains.
pub fn build_pairs(origins: &[(String, f64)], targets: &[(String, f64)]) -> PairDistribution {
    let mut pairs = Vec::new();
    for (origin, origin_weight) in origins {
        for (target, target_weight) in targets {
            if origin == target || !has_centroid(origin) || !has_centroid(target) {
                continue;
            }
            pairs.push(PairWeight {
                origin: origin.clone(),
                target: target.clone(),
                weight: origin_weight * target_weight,
            });
        }
    }

    let total: f64 = pairs.iter().map(|p| p.weight).sum();
    if !pairs.is_empty() && total > 0.0 {
        for pair in &mut pairs {
            pair.weight /= total;
        }
        return PairDistribution {
            pairs,
            mode: PairMode::Computed,
        };
    }

    PairDistribution {
        pairs: fallback_pairs(),
        mode: PairMode::Fallback,
    }
}

/// Cumulative distribution table for inverse-transform sampling
#[derive(Debug, Clone)]
pub struct Cdf<T> {
    entries: Vec<(f64, T)>,
}

impl<T> Cdf<T> {
    pub fn new(weighted: impl IntoIterator<Item = (T, f64)>) -> Self {
        let mut acc = 0.0;
        let entries = weighted
            .into_iter()
            .map(|(item, weight)| {
                acc += weight.max(0.0);
                (acc, item)
            })
            .collect();
        Self { entries }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn total(&self) -> f64 {
        self.entries.last().map(|(acc, _)| *acc).unwrap_or(0.0)
    }

    /// First entry whose cumulative weight reaches `roll` (in [0, 1)).
    /// Rolls beyond the accumulated total map to the last entry.
    pub fn sample(&self, roll: f64) -> Option<&T> {
        let idx = self.entries.partition_point(|(acc, _)| *acc < roll);
        self.entries
            .get(idx)
            .or_else(|| self.entries.last())
            .map(|(_, item)| item)
    }
}

/// Vector tag for a Radar protocol name.
pub fn protocol_vector(protocol: &str) -> &'static str {
    match protocol {
        "UDP" | "GRE" => "UDP",
        "TCP" => "SYN",
        _ => "HTTP2",
    }
}

/// Draw `count` synthetic events from the pair and protocol distributions.
pub fn synthesize_batch<R: Rng + ?Sized>(
    rng: &mut R,
    pairs: &Cdf<PairWeight>,
    protocols: &Cdf<String>,
    count: usize,
    now: i64,
) -> Vec<RawEvent> {
    let mut events = Vec::with_capacity(count);
    for _ in 0..count {
        let pair = match pairs.sample(rng.gen()) {
            Some(pair) => pair,
            None => break,
        };
        let (src_geo, dst_geo) = match (centroid(&pair.origin), centroid(&pair.target)) {
            (Some(src), Some(dst)) => (src, dst),
            _ => continue,
        };
        let protocol = protocols.sample(rng.gen()).map(String::as_str).unwrap_or("UDP");

        // ~15k..400k pps, scaled up for heavier pairs
        let base_pps = 10f64.powf(rng.gen_range(4.2..5.6));
        let pps = (base_pps * (0.5 + 3.0 * pair.weight)) as u64;
        let avg_packet = rng.gen_range(64.0..650.0);
        let bytes = pps as f64 * avg_packet * rng.gen_range(0.8..1.2);

        events.push(RawEvent::CountryPair(CountryPairRecord {
            timestamp: Some(now),
            src_country: pair.origin.clone(),
            dst_country: pair.target.clone(),
            src_geo,
            dst_geo,
            src_asn: None,
            dst_asn: None,
            bytes,
            pps,
            action: Some("block".to_string()),
            vector: Some(protocol_vector(protocol).to_string()),
        }));
    }
    events
}

/// Thin Radar REST client
struct RadarClient {
    client: Client,
    base_url: String,
    api_token: String,
}

impl RadarClient {
    async fn get(&self, path: &str, params: &[(&str, String)]) -> Result<Value, SourceError> {
        let response = self.client
            .get(format!("{}/{}", self.base_url.trim_end_matches('/'), path))
            .header("Authorization", format!("Bearer {}", self.api_token))
            .header("Accept", "application/json")
            .query(params)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let errors = serde_json::from_str::<Value>(&body)
                .ok()
                .and_then(|v| v.get("errors").cloned())
                .unwrap_or_else(|| Value::String(body.chars().take(200).collect()));
            log::warn!("Radar GET {} -> {} errors={}", path, status, errors);
            return Err(SourceError::InvalidResponse(format!("{} returned {}", path, status)));
        }
        Ok(response.json().await?)
    }
}

pub struct RadarPairsSource {
    radar: RadarClient,
    config: RadarConfig,
    status: SourceStatus,
    rng: StdRng,
    pending: VecDeque<RawEvent>,
    refreshed: bool,
    refresh_failures: u64,
}

impl RadarPairsSource {
    pub fn new(config: RadarConfig, status: SourceStatus) -> Result<Self, SourceError> {
        let client = Client::builder()
            .timeout(secs(config.request_timeout_secs))
            .pool_max_idle_per_host(5)
            .build()?;
        status.set(SourceMode::AggregatePairs(PairMode::Pending));
        Ok(Self {
            radar: RadarClient {
                client,
                base_url: config.base_url.clone(),
                api_token: config.api_token.clone(),
            },
            config,
            status,
            rng: StdRng::from_entropy(),
            pending: VecDeque::new(),
            refreshed: false,
            refresh_failures: 0,
        })
    }

    /// Refreshes that failed since the source was built
    pub fn refresh_failures(&self) -> u64 {
        self.refresh_failures
    }

    async fn fetch_distribution(&self) -> Result<(PairDistribution, Vec<(String, f64)>), SourceError> {
        let params = [
            ("dateRange", self.config.date_range.clone()),
            ("limit", self.config.limit.to_string()),
            ("format", "json".to_string()),
        ];
        let origins = parse_top_locations(&self.radar.get("attacks/layer3/top/locations/origin", &params).await?);
        let targets = parse_top_locations(&self.radar.get("attacks/layer3/top/locations/target", &params).await?);
        let summary_params = [
            ("dateRange", self.config.date_range.clone()),
            ("format", "json".to_string()),
        ];
        let protocols = parse_protocol_mix(&self.radar.get("attacks/layer3/summary/protocol", &summary_params).await?);

        log::info!(
            "Radar origins={} targets={} range={} limit={}",
            origins.len(),
            targets.len(),
            self.config.date_range,
            self.config.limit
        );
        let distribution = build_pairs(&origins, &targets);
        if distribution.mode == PairMode::Fallback {
            log::warn!("Radar top locations empty, using fallback roster");
        }
        Ok((distribution, protocols))
    }

    async fn refresh(&mut self) -> Result<usize, SourceError> {
        let (distribution, protocols) = self.fetch_distribution().await?;
        self.status.set(SourceMode::AggregatePairs(distribution.mode));

        let pair_cdf = Cdf::new(distribution.pairs.into_iter().map(|p| {
            let weight = p.weight;
            (p, weight)
        }));
        let protocol_cdf = Cdf::new(protocols);
        let batch = synthesize_batch(
            &mut self.rng,
            &pair_cdf,
            &protocol_cdf,
            self.config.batch_events,
            get_current_timestamp() as i64,
        );
        let produced = batch.len();
        self.pending.extend(batch);
        Ok(produced)
    }
}

#[async_trait]
impl Source for RadarPairsSource {
    async fn next(&mut self) -> RawEvent {
        loop {
            if let Some(event) = self.pending.pop_front() {
                return event;
            }
            if self.refreshed {
                tokio::time::sleep(secs(self.config.refresh_interval_secs)).await;
            }
            match self.refresh().await {
                Ok(produced) => {
                    self.refreshed = true;
                    log::debug!("Radar batch of {} events ready", produced);
                }
                Err(e) => {
                    self.refresh_failures += 1;
                    metrics::increment_counter!("source_poll_failures_total", "source" => "aggregate_pairs");
                    log::error!("Radar refresh failed: {}", e);
                    self.refreshed = false;
                    tokio::time::sleep(secs(self.config.retry_delay_secs)).await;
                }
            }
        }
    }

    fn kind(&self) -> SourceKind {
        SourceKind::AggregatePairs
    }
}
