use std::time::{SystemTime, UNIX_EPOCH};

pub fn get_current_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// Wall-clock seconds with sub-second precision, used for sliding windows.
pub fn now_secs_f64() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs_f64()
}

pub fn format_rate_key(prefix: &str, key: &str) -> String {
    format!("{}:{}", prefix, key)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_rate_key() {
        assert_eq!(format_rate_key("ip", "10.0.0.1"), "ip:10.0.0.1");
    }

    #[test]
    fn test_clock_helpers_agree() {
        let secs = get_current_timestamp();
        let precise = now_secs_f64();
        assert!((precise - secs as f64).abs() < 2.0);
    }
}
