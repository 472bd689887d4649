//! Client configuration

use std::time::Duration;
use xray_core::config::{get_config, get_config_bool, get_config_int};

pub const DEFAULT_API_URL: &str = "http://localhost:8000";
pub const DEFAULT_TIMEOUT_SECS: u64 = 10;

/// Where and how the tracker talks to the record API
#[derive(Debug, Clone)]
pub struct TrackerConfig {
    /// Base URL of the service, without the `/api` suffix
    pub api_url: String,
    /// Per-request timeout
    pub timeout: Duration,
    /// Validate requests locally before sending them
    pub validate_requests: bool,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            api_url: DEFAULT_API_URL.to_string(),
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            validate_requests: true,
        }
    }
}

impl TrackerConfig {
    pub fn new(api_url: impl Into<String>) -> Self {
        Self {
            api_url: api_url.into(),
            ..Self::default()
        }
    }

    /// Read `XRAY_API_URL`, `XRAY_TIMEOUT_SECS` and `XRAY_VALIDATE_REQUESTS`.
    pub fn from_env() -> Self {
        let timeout_secs = get_config_int("XRAY_TIMEOUT_SECS", DEFAULT_TIMEOUT_SECS as i64).max(1);
        Self {
            api_url: get_config("XRAY_API_URL", DEFAULT_API_URL),
            timeout: Duration::from_secs(timeout_secs as u64),
            validate_requests: get_config_bool("XRAY_VALIDATE_REQUESTS", true),
        }
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn validate_requests(mut self, enabled: bool) -> Self {
        self.validate_requests = enabled;
        self
    }
}
