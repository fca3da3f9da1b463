//! Runtime configuration, loaded once at startup from environment variables.
//!
//! Mirrors the credential-loading idiom this codebase has always used: read,
//! trim, validate, and fail with an actionable message rather than panicking
//! deep inside the engine.

use std::fmt;
use std::time::Duration;

/// Secure string wrapper that masks sensitive data in logs and Debug output.
#[derive(Clone)]
pub struct SecretString(String);

impl SecretString {
    pub fn new(value: String) -> Self {
        SecretString(value)
    }

    /// Only use this when actually needed to build a connection. Never log it.
    pub fn expose_secret(&self) -> &str {
        &self.0
    }

    fn masked(&self) -> String {
        let s = &self.0;
        if s.len() <= 8 {
            return "***".to_string();
        }
        format!("{}...{}", &s[..4], &s[s.len() - 4..])
    }
}

impl fmt::Debug for SecretString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SecretString(***)")
    }
}

impl fmt::Display for SecretString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.masked())
    }
}

impl From<String> for SecretString {
    fn from(s: String) -> Self {
        SecretString::new(s)
    }
}

/// Tunable thresholds for the liquidity and anomaly detectors.
#[derive(Clone, Debug)]
pub struct Thresholds {
    pub wall_multiplier: f64,
    pub vacuum_percentile: f64,
    pub spoofing_distance_multiplier: f64,
    pub spoofing_cancel_rate_threshold: f64,
    pub iceberg_min_fills: usize,
    pub iceberg_depth_stability: f64,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            wall_multiplier: 1.5,
            vacuum_percentile: 10.0,
            spoofing_distance_multiplier: 3.0,
            spoofing_cancel_rate_threshold: 0.7,
            iceberg_min_fills: 5,
            iceberg_depth_stability: 0.1,
        }
    }
}

/// Full process configuration, loaded once at startup.
#[derive(Clone, Debug)]
pub struct Config {
    pub stream_key: String,
    pub consumer_group: String,
    pub consumer_name: String,
    pub cache_url: String,
    pub cache_password: Option<SecretString>,
    pub cache_ttl: Duration,
    pub symbols: Option<Vec<String>>,
    pub flow_window: Duration,
    pub report_window: Duration,
    pub thresholds: Thresholds,
    pub metrics_port: u16,
}

impl Config {
    /// Loads configuration from environment variables, applying the defaults
    /// documented for each one. Returns a descriptive error on an invalid
    /// value rather than panicking.
    pub fn from_env() -> Result<Self, String> {
        let stream_key = env_or("STREAM_KEY", "nt:binance");
        let consumer_group = env_or("CONSUMER_GROUP", "analytics-engine");
        let consumer_name = std::env::var("CONSUMER_NAME")
            .unwrap_or_else(|_| format!("{}-{}", hostname(), std::process::id()));
        let cache_url = env_or("CACHE_URL", "redis://127.0.0.1:6379");
        let cache_password = std::env::var("CACHE_PASSWORD")
            .ok()
            .filter(|s| !s.is_empty())
            .map(SecretString::new);

        let cache_ttl_secs = parse_env_or("CACHE_TTL_SECS", 300u64)?;
        let symbols = std::env::var("SYMBOLS").ok().map(|s| {
            s.split(',')
                .map(|sym| sym.trim().to_uppercase())
                .filter(|sym| !sym.is_empty())
                .collect::<Vec<_>>()
        });

        let flow_window_secs = parse_env_or("FLOW_WINDOW_SECS", 30u64)?;
        let report_window_secs = parse_env_or("REPORT_WINDOW_SECS", 1800u64)?;

        let thresholds = Thresholds {
            wall_multiplier: parse_env_or("WALL_THRESHOLD_MULTIPLIER", 1.5f64)?,
            vacuum_percentile: parse_env_or("VACUUM_PERCENTILE", 10.0f64)?,
            spoofing_distance_multiplier: parse_env_or("SPOOFING_DISTANCE_MULTIPLIER", 3.0f64)?,
            spoofing_cancel_rate_threshold: parse_env_or(
                "SPOOFING_CANCEL_RATE_THRESHOLD",
                0.7f64,
            )?,
            iceberg_min_fills: parse_env_or("ICEBERG_MIN_FILLS", 5usize)?,
            iceberg_depth_stability: parse_env_or("ICEBERG_DEPTH_STABILITY", 0.1f64)?,
        };

        let metrics_port = parse_env_or("METRICS_PORT", 9090u16)?;

        Ok(Self {
            stream_key,
            consumer_group,
            consumer_name,
            cache_url,
            cache_password,
            cache_ttl: Duration::from_secs(cache_ttl_secs),
            symbols,
            flow_window: Duration::from_secs(flow_window_secs),
            report_window: Duration::from_secs(report_window_secs),
            thresholds,
            metrics_port,
        })
    }
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn parse_env_or<T>(key: &str, default: T) -> Result<T, String>
where
    T: std::str::FromStr,
    T::Err: fmt::Display,
{
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map_err(|e| format!("{key} is set but invalid ({raw:?}): {e}")),
        Err(_) => Ok(default),
    }
}

fn hostname() -> String {
    std::env::var("HOSTNAME").unwrap_or_else(|_| "engine".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn secret_string_masks_debug_and_display() {
        let s = SecretString::new("abcdefghij".to_string());
        assert_eq!(format!("{s:?}"), "SecretString(***)");
        assert_eq!(format!("{s}"), "abcd...ghij");
    }

    #[test]
    fn short_secret_fully_masked() {
        let s = SecretString::new("short".to_string());
        assert_eq!(format!("{s}"), "***");
    }
}
