//! Tunable parameters of the HF client. Every key is optional; missing or
//! ill-typed values fall back to the defaults below.

use anyhow::{bail, Context, Result};
use log::LevelFilter;
use serde_json::Value;
use std::path::Path;
use std::time::Duration;

/// How long to wait for the service level connection after a link comes up.
pub const CONNECTING_TIMEOUT: Duration = Duration::from_secs(10);

/// Interval between AT+CLCC polls while a call is in progress.
pub const QUERY_CURRENT_CALLS_INTERVAL: Duration = Duration::from_secs(2);

/// How long a locally dialed call may stay unconfirmed by the AG.
pub const OUTGOING_CALL_TIMEOUT: Duration = Duration::from_secs(10);

const CONNECTING_TIMEOUT_KEY: &str = "connecting_timeout_ms";
const QUERY_CURRENT_CALLS_INTERVAL_KEY: &str = "query_current_calls_interval_ms";
const OUTGOING_CALL_TIMEOUT_KEY: &str = "outgoing_call_timeout_ms";
const CLCC_POLL_DURING_CALL_KEY: &str = "clcc_poll_during_call";
const LOG_LEVEL_KEY: &str = "log_level";

#[derive(Clone, Debug, PartialEq)]
pub struct HfpClientConfig {
    pub connecting_timeout: Duration,
    pub query_current_calls_interval: Duration,
    pub outgoing_call_timeout: Duration,
    /// Keep polling the call list while any call exists.
    pub clcc_poll_during_call: bool,
    /// Level the host passes to [`crate::init_logging`].
    pub log_level: LevelFilter,
}

impl Default for HfpClientConfig {
    fn default() -> Self {
        HfpClientConfig {
            connecting_timeout: CONNECTING_TIMEOUT,
            query_current_calls_interval: QUERY_CURRENT_CALLS_INTERVAL,
            outgoing_call_timeout: OUTGOING_CALL_TIMEOUT,
            clcc_poll_during_call: true,
            log_level: LevelFilter::Info,
        }
    }
}

fn get_duration_ms(config: &Value, key: &str) -> Option<Duration> {
    config.get(key)?.as_u64().map(Duration::from_millis)
}

fn get_log_level_internal(config: &Value) -> Option<LevelFilter> {
    config.get(LOG_LEVEL_KEY)?.as_str()?.parse::<LevelFilter>().ok()
}

impl HfpClientConfig {
    /// Builds a config from JSON text. Unparseable text yields the defaults.
    pub fn from_json(config: &str) -> HfpClientConfig {
        match serde_json::from_str::<Value>(config) {
            Ok(value) => Self::from_value(&value),
            Err(_) => HfpClientConfig::default(),
        }
    }

    fn from_value(config: &Value) -> HfpClientConfig {
        let default = HfpClientConfig::default();
        HfpClientConfig {
            connecting_timeout: get_duration_ms(config, CONNECTING_TIMEOUT_KEY)
                .unwrap_or(default.connecting_timeout),
            query_current_calls_interval: get_duration_ms(config, QUERY_CURRENT_CALLS_INTERVAL_KEY)
                .unwrap_or(default.query_current_calls_interval),
            outgoing_call_timeout: get_duration_ms(config, OUTGOING_CALL_TIMEOUT_KEY)
                .unwrap_or(default.outgoing_call_timeout),
            clcc_poll_during_call: config
                .get(CLCC_POLL_DURING_CALL_KEY)
                .and_then(Value::as_bool)
                .unwrap_or(default.clcc_poll_during_call),
            log_level: get_log_level_internal(config).unwrap_or(default.log_level),
        }
    }

    /// Reads a config file. Unlike [`HfpClientConfig::from_json`] this fails
    /// when the file is unreadable or does not hold a JSON object.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<HfpClientConfig> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        let value = serde_json::from_str::<Value>(&text)
            .with_context(|| format!("failed to parse {}", path.display()))?;
        if !value.is_object() {
            bail!("{} does not contain a JSON object", path.display());
        }
        Ok(Self::from_value(&value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_empty_config() {
        assert_eq!(HfpClientConfig::from_json("{}"), HfpClientConfig::default());
        assert_eq!(HfpClientConfig::from_json("not json"), HfpClientConfig::default());
    }

    #[test]
    fn parse_timeouts() {
        let config = HfpClientConfig::from_json(
            "{\"connecting_timeout_ms\": 500, \"query_current_calls_interval_ms\": 1000, \
             \"outgoing_call_timeout_ms\": 3000}",
        );
        assert_eq!(config.connecting_timeout, Duration::from_millis(500));
        assert_eq!(config.query_current_calls_interval, Duration::from_secs(1));
        assert_eq!(config.outgoing_call_timeout, Duration::from_secs(3));
        assert!(config.clcc_poll_during_call);
    }

    #[test]
    fn parse_ill_typed_values() {
        let config = HfpClientConfig::from_json(
            "{\"connecting_timeout_ms\": \"fast\", \"clcc_poll_during_call\": 0, \
             \"log_level\": \"random\"}",
        );
        assert_eq!(config, HfpClientConfig::default());
    }

    #[test]
    fn parse_log_level() {
        let config = HfpClientConfig::from_json("{\"log_level\": \"debug\"}");
        assert_eq!(config.log_level, LevelFilter::Debug);
        let config = HfpClientConfig::from_json("{\"log_level\": \"error\"}");
        assert_eq!(config.log_level, LevelFilter::Error);
    }

    #[test]
    fn parse_poll_flag() {
        let config = HfpClientConfig::from_json("{\"clcc_poll_during_call\": false}");
        assert!(!config.clcc_poll_during_call);
    }

    #[test]
    fn load_missing_file_fails() {
        assert!(HfpClientConfig::load("/nonexistent/hf_client.json").is_err());
    }

    #[test]
    fn load_non_object_fails() {
        let path = std::env::temp_dir().join("bt_hf_client_config_array.json");
        std::fs::write(&path, "[1, 2, 3]").unwrap();
        assert!(HfpClientConfig::load(&path).is_err());
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn load_object() {
        let path = std::env::temp_dir().join("bt_hf_client_config_object.json");
        std::fs::write(&path, "{\"outgoing_call_timeout_ms\": 20000}").unwrap();
        let config = HfpClientConfig::load(&path).unwrap();
        assert_eq!(config.outgoing_call_timeout, Duration::from_secs(20));
        std::fs::remove_file(&path).ok();
    }
}
