//! Sliding-window rate estimation.
//!
//! Counts event arrivals per key over the last `W` seconds and turns the
//! count into packets/sec and bits/sec. This measures arrival rate, used as
//! a packet-rate proxy when a source doesn't report one.

use std::collections::{HashMap, VecDeque};
use std::fmt;
use crate::utils::format_rate_key;

pub const DEFAULT_WINDOW_SECS: f64 = 3.0;
pub const DEFAULT_BYTES_HINT: f64 = 800.0;

/// Identity a window is tracked under
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum RateKey {
    Ip(String),
    CountryPair(String, String),
}

impl RateKey {
    /// IP when available, otherwise the (source, destination) country pair.
    pub fn for_identity(ip: Option<&str>, src_country: &str, dst_country: &str) -> Self {
        match ip.filter(|ip| !ip.is_empty()) {
            Some(ip) => RateKey::Ip(ip.to_string()),
            None => RateKey::CountryPair(src_country.to_string(), dst_country.to_string()),
        }
    }
}

impl fmt::Display for RateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RateKey::Ip(ip) => f.write_str(&format_rate_key("ip", ip)),
            RateKey::CountryPair(src, dst) => {
                f.write_str(&format_rate_key("cc", &format!("{}-{}", src, dst)))
            }
        }
    }
}

/// Rate pair returned by [`RateEstimator::update`]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RateEstimate {
    pub packets_per_second: u64,
    pub bits_per_second: f64,
}

/// Per-key sliding windows of arrival timestamps.
///
/// Not internally synchronized: it is owned by the single normalizer path.
/// Memory grows with the number of distinct keys; [`RateEstimator::compact`]
/// drops keys with no activity inside the window and runs periodically from
/// `update`.
pub struct RateEstimator {
    window_secs: f64,
    default_bytes_hint: f64,
    compaction_interval_secs: f64,
    last_compaction: Option<f64>,
    windows: HashMap<RateKey, VecDeque<f64>>,
}

impl RateEstimator {
    pub fn new(window_secs: f64, default_bytes_hint: f64, compaction_interval_secs: f64) -> Self {
        Self {
            window_secs: window_secs.max(f64::EPSILON),
            default_bytes_hint,
            compaction_interval_secs,
            last_compaction: None,
            windows: HashMap::new(),
        }
    }

    pub fn window_secs(&self) -> f64 {
        self.window_secs
    }

    /// Record one arrival for `key` at `now` and return the current estimate.
    ///
    /// `packets_per_second = floor(count_in_window / W)` and
    /// `bits_per_second = packets_per_second * bytes_hint * 8`, with
    /// `bytes_hint` defaulting to 800 bytes.
    ///
    /// # Arguments
    ///
    /// * `key` - Source IP, or source/destination country pair
    /// * `bytes_hint` - Observed bytes per packet, if the event carried one
    /// * `now` - Arrival time in Unix seconds
    ///
    /// # Returns
    ///
    /// * The estimate for `key` including this arrival
    pub fn update(&mut self, key: RateKey, bytes_hint: Option<f64>, now: f64) -> RateEstimate {
        self.maybe_compact(now);

        let window_secs = self.window_secs;
        let window = self.windows.entry(key).or_default();
        window.push_back(now);
        while let Some(oldest) = window.front() {
            if now - oldest > window_secs {
                window.pop_front();
            } else {
                break;
            }
        }

        let packets_per_second = (window.len() as f64 / window_secs).floor() as u64;
        let bytes_hint = bytes_hint.unwrap_or(self.default_bytes_hint);
        RateEstimate {
            packets_per_second,
            bits_per_second: packets_per_second as f64 * bytes_hint * 8.0,
        }
    }

    /// Drop every key whose newest arrival is older than the window.
    ///
    /// Returns the number of keys removed.
    pub fn compact(&mut self, now: f64) -> usize {
        let window_secs = self.window_secs;
        let before = self.windows.len();
        self.windows.retain(|_, window| {
            window
                .back()
                .map(|newest| now - newest <= window_secs)
                .unwrap_or(false)
        });
        self.last_compaction = Some(now);
        before - self.windows.len()
    }

    pub fn tracked_keys(&self) -> usize {
        self.windows.len()
    }

    fn maybe_compact(&mut self, now: f64) {
        if self.compaction_interval_secs <= 0.0 {
            return;
        }
        match self.last_compaction {
            None => self.last_compaction = Some(now),
            Some(last) if now - last >= self.compaction_interval_secs => {
                let removed = self.compact(now);
                if removed > 0 {
                    log::debug!("Compacted {} idle rate windows ({} remain)", removed, self.windows.len());
                }
            }
            Some(_) => {}
        }
    }
}

impl Default for RateEstimator {
    fn default() -> Self {
        Self::new(DEFAULT_WINDOW_SECS, DEFAULT_BYTES_HINT, 60.0)
    }
}
