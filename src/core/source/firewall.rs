//! Live firewall events from the Cloudflare GraphQL API.
//!
//! Polls a trailing time range every `poll_interval_secs`, deduplicates
//! events across overlapping polls and yields them oldest first. Transport
//! or API failures skip the poll cycle; the stream itself never ends.

use std::collections::{HashMap, VecDeque};
use std::time::Duration;
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::time::{Interval, MissedTickBehavior};
use crate::core::event::{IpFlowRecord, RawEvent};
use crate::core::geo::country_code;
use crate::core::source::{secs, Source, SourceError, SourceKind, SourceMode, SourceStatus};
use crate::models::CloudflareConfig;

const FIREWALL_EVENTS_QUERY: &str = r#"
query ListFirewallEvents($zoneTag: String!, $filter: FirewallEventsAdaptiveFilter_InputObject) {
  viewer {
    zones(filter: { zoneTag: $zoneTag }) {
      firewallEventsAdaptive(
        filter: $filter
        limit: 100
        orderBy: [datetime_DESC]
      ) {
        action
        clientAsn
        clientCountryName
        clientIP
        datetime
        source
      }
    }
  }
}
"#;

/// Frame size assumed for an L7 firewall event
const EVENT_BYTES: f64 = 1500.0;

#[derive(Debug, Deserialize)]
struct GraphQlResponse {
    #[serde(default)]
    data: Option<ViewerData>,
    #[serde(default)]
    errors: Option<Vec<Value>>,
}

#[derive(Debug, Deserialize)]
struct ViewerData {
    viewer: Viewer,
}

#[derive(Debug, Deserialize)]
struct Viewer {
    #[serde(default)]
    zones: Vec<ZoneEvents>,
}

#[derive(Debug, Deserialize)]
struct ZoneEvents {
    #[serde(rename = "firewallEventsAdaptive", default)]
    firewall_events: Vec<FirewallEvent>,
}

/// One `firewallEventsAdaptive` row
#[derive(Debug, Clone, Default, Deserialize)]
pub struct FirewallEvent {
    #[serde(default)]
    pub action: Option<String>,
    #[serde(rename = "clientAsn", default)]
    pub client_asn: Option<Value>,
    #[serde(rename = "clientCountryName", default)]
    pub client_country_name: Option<String>,
    #[serde(rename = "clientIP", default)]
    pub client_ip: Option<String>,
    #[serde(default)]
    pub datetime: Option<String>,
    #[serde(default)]
    pub source: Option<String>,
}

/// Derive an attack vector tag from the firewall `source` field.
pub fn source_to_vector(source: &str) -> &'static str {
    let source = source.to_ascii_lowercase();
    if source.contains("waf") || source.contains("http") || source.contains("l7") {
        "HTTP2"
    } else {
        "SYN"
    }
}

fn asn_from_value(value: &Value) -> Option<u32> {
    match value {
        Value::Number(n) => n.as_u64().and_then(|n| u32::try_from(n).ok()),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

type DedupKey = (String, String, String);

pub struct FirewallEventsSource {
    client: Client,
    config: CloudflareConfig,
    ticker: Option<Interval>,
    pending: VecDeque<RawEvent>,
    /// Dedup key -> event timestamp, for compaction
    seen: HashMap<DedupKey, i64>,
    poll_failures: u64,
}

impl FirewallEventsSource {
    pub fn new(config: CloudflareConfig, status: SourceStatus) -> Result<Self, SourceError> {
        let client = Client::builder()
            .timeout(secs(config.request_timeout_secs))
            .build()?;
        status.set(SourceMode::LiveEvents);
        Ok(Self {
            client,
            config,
            ticker: None,
            pending: VecDeque::new(),
            seen: HashMap::new(),
            poll_failures: 0,
        })
    }

    /// Fetch events for the trailing window ending at `now`, newest first.
    async fn poll(&self, now: DateTime<Utc>) -> Result<Vec<FirewallEvent>, SourceError> {
        let start = now - chrono::Duration::seconds(self.config.window_secs as i64);
        let variables = json!({
            "zoneTag": self.config.zone_tag,
            "filter": {
                "datetime_geq": start.to_rfc3339_opts(SecondsFormat::Secs, true),
                "datetime_leq": now.to_rfc3339_opts(SecondsFormat::Secs, true),
            }
        });

        let response = self.client
            .post(&self.config.graphql_endpoint)
            .header("Authorization", format!("Bearer {}", self.config.api_token))
            .header("Content-Type", "application/json")
            .json(&json!({ "query": FIREWALL_EVENTS_QUERY, "variables": variables }))
            .send()
            .await?
            .error_for_status()?;

        let body: GraphQlResponse = response.json().await?;
        match body.data {
            Some(data) => Ok(data
                .viewer
                .zones
                .into_iter()
                .next()
                .map(|zone| zone.firewall_events)
                .unwrap_or_default()),
            None => Err(SourceError::InvalidResponse(format!(
                "no data in GraphQL response: {:?}",
                body.errors.unwrap_or_default()
            ))),
        }
    }

    /// Convert a newest-first batch into raw events, oldest first, skipping
    /// rows without IP or datetime and rows already seen.
    ///
    /// Returns the number of new events queued.
    pub fn ingest(&mut self, events: Vec<FirewallEvent>, now: DateTime<Utc>) -> usize {
        let mut added = 0;
        for event in events.into_iter().rev() {
            let (ip, datetime) = match (&event.client_ip, &event.datetime) {
                (Some(ip), Some(dt)) if !ip.is_empty() && !dt.is_empty() => (ip.clone(), dt.clone()),
                _ => continue,
            };
            let action = event
                .action
                .clone()
                .filter(|a| !a.is_empty())
                .unwrap_or_else(|| "allow".to_string());
            let timestamp = match DateTime::parse_from_rfc3339(&datetime) {
                Ok(dt) => dt.timestamp(),
                Err(e) => {
                    log::debug!("Skipping firewall event with bad datetime {}: {}", datetime, e);
                    continue;
                }
            };

            let key = (ip.clone(), datetime, action.clone());
            if self.seen.contains_key(&key) {
                continue;
            }
            self.seen.insert(key, timestamp);

            let country = event
                .client_country_name
                .as_deref()
                .map(country_code)
                .unwrap_or_else(|| "US".to_string());

            self.pending.push_back(RawEvent::IpFlow(IpFlowRecord {
                timestamp: Some(timestamp),
                src_ip: Some(ip),
                dst_ip: Some("0.0.0.0".to_string()),
                src_country: Some(country),
                dst_country: None,
                src_asn: event.client_asn.as_ref().and_then(asn_from_value),
                dst_asn: None,
                bytes: Some(EVENT_BYTES),
                pps: Some(1),
                action: Some(action),
                vector: Some(source_to_vector(event.source.as_deref().unwrap_or("")).to_string()),
            }));
            added += 1;
        }
        self.compact_seen(now);
        added
    }

    /// Forget dedup keys older than twice the query window; a trailing
    /// window query can no longer return them.
    fn compact_seen(&mut self, now: DateTime<Utc>) {
        let horizon = now.timestamp() - 2 * self.config.window_secs as i64;
        self.seen.retain(|_, ts| *ts >= horizon);
    }

    pub fn seen_keys(&self) -> usize {
        self.seen.len()
    }

    /// Polls that failed since the source was built
    pub fn poll_failures(&self) -> u64 {
        self.poll_failures
    }
}

#[async_trait]
impl Source for FirewallEventsSource {
    async fn next(&mut self) -> RawEvent {
        loop {
            if let Some(event) = self.pending.pop_front() {
                return event;
            }

            let period = Duration::from_secs(self.config.poll_interval_secs.max(1));
            let ticker = self.ticker.get_or_insert_with(|| {
                let mut ticker = tokio::time::interval(period);
                ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
                ticker
            });
            ticker.tick().await;

            let now = Utc::now();
            match self.poll(now).await {
                Ok(events) => {
                    let added = self.ingest(events, now);
                    log::debug!("Firewall poll queued {} new events", added);
                }
                Err(e) => {
                    self.poll_failures += 1;
                    metrics::increment_counter!("source_poll_failures_total", "source" => "live_events");
                    log::warn!("Firewall events poll failed, retrying next cycle: {}", e);
                }
            }
        }
    }

    fn kind(&self) -> SourceKind {
        SourceKind::LiveEvents
    }
}
