//! Configuration types for dnsmirror
//!
//! [`SessionConfig`] tunes the engine, [`StoreConfig`] describes how to reach
//! the record store proxy. Both deserialize with defaults for every field.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Engine settings for one client session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionConfig {
    /// How long a fetched zone listing is served without a remote call
    #[serde(default = "default_cache_ttl_secs")]
    pub cache_ttl_secs: u64,

    /// Pause between verification polls after a committed mutation
    #[serde(default = "default_verify_delay_ms")]
    pub verify_delay_ms: u64,

    /// Polls before a verification gives up as unconfirmed
    #[serde(default = "default_max_verify_attempts")]
    pub max_verify_attempts: u32,

    /// Lifetime of a notice
    #[serde(default = "default_notice_ttl_secs")]
    pub notice_ttl_secs: u64,

    /// Page size of a fresh view
    #[serde(default = "default_page_size")]
    pub default_page_size: usize,

    /// Capacity of the session event channel
    ///
    /// When full, new events are dropped (with a warning log).
    ///
    /// Default: 1000 events
    #[serde(default = "default_event_channel_capacity")]
    pub event_channel_capacity: usize,
}

impl SessionConfig {
    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }

    pub fn verify_delay(&self) -> Duration {
        Duration::from_millis(self.verify_delay_ms)
    }

    pub fn notice_ttl(&self) -> Duration {
        Duration::from_secs(self.notice_ttl_secs)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), crate::Error> {
        if self.max_verify_attempts == 0 {
            return Err(crate::Error::config("max_verify_attempts must be > 0"));
        }
        if self.default_page_size == 0 {
            return Err(crate::Error::config("default_page_size must be > 0"));
        }
        if self.event_channel_capacity == 0 {
            return Err(crate::Error::config("event_channel_capacity must be > 0"));
        }
        Ok(())
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            cache_ttl_secs: default_cache_ttl_secs(),
            verify_delay_ms: default_verify_delay_ms(),
            max_verify_attempts: default_max_verify_attempts(),
            notice_ttl_secs: default_notice_ttl_secs(),
            default_page_size: default_page_size(),
            event_channel_capacity: default_event_channel_capacity(),
        }
    }
}

/// Where and how to reach the record store proxy
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Base URL of the proxy, without the `/api` suffix
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Per-request timeout in seconds
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl StoreConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), crate::Error> {
        if self.base_url.trim().is_empty() {
            return Err(crate::Error::config("Store base URL cannot be empty"));
        }
        if !(self.base_url.starts_with("http://") || self.base_url.starts_with("https://")) {
            return Err(crate::Error::config(format!(
                "Store base URL must start with http:// or https:// (got '{}')",
                self.base_url
            )));
        }
        if self.timeout_secs == 0 {
            return Err(crate::Error::config("Store timeout must be > 0"));
        }
        Ok(())
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_cache_ttl_secs() -> u64 {
    crate::cache::DEFAULT_CACHE_TTL.as_secs()
}

fn default_verify_delay_ms() -> u64 {
    crate::verify::DEFAULT_VERIFY_DELAY.as_millis() as u64
}

fn default_max_verify_attempts() -> u32 {
    crate::verify::DEFAULT_MAX_VERIFY_ATTEMPTS
}

fn default_notice_ttl_secs() -> u64 {
    3
}

fn default_page_size() -> usize {
    crate::view::DEFAULT_PAGE_SIZE
}

fn default_event_channel_capacity() -> usize {
    1000
}

fn default_base_url() -> String {
    "http://localhost:3000".to_string()
}

fn default_timeout_secs() -> u64 {
    45
}
