//! Configuration file loading.
//!
//! Settings live in an optional YAML file. Every field has a default, so a
//! missing file (or a file that only sets a few keys) is fine:
//!
//! ```yaml
//! cache:
//!   ttl_secs: 3600
//!   failure_backoff_base_ms: 0
//! http:
//!   timeout_secs: 30
//! enrich:
//!   item_timeout_secs: 20
//!   concurrency: 50
//! cookie_cloud:
//!   host: https://cookie.example.com
//!   uuid: 7f0d...
//!   password: hunter2
//!   update_cron: "0 */30 * * * *"
//! webdriver_url: http://localhost:9515
//! allow_user_supply_unsafe_domain: false
//! ```

use crate::backoff::Backoff;
use crate::cache::CacheSettings;
use crate::error::{Error, Result};
use crate::http::DEFAULT_USER_AGENT;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::{info, instrument};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub cache: CacheConfig,
    pub http: HttpConfig,
    pub enrich: EnrichConfig,
    pub cookie_cloud: Option<CookieCloudConfig>,
    /// WebDriver endpoint used by browser-backed routes.
    pub webdriver_url: Option<String>,
    /// Let callers point domain-parameterised routes at arbitrary hosts.
    pub allow_user_supply_unsafe_domain: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub ttl_secs: u64,
    pub capacity: usize,
    /// Zero disables failure backoff: failed keys are retried on the next call.
    pub failure_backoff_base_ms: u64,
    pub failure_backoff_max_secs: u64,
    pub sweep_interval_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl_secs: 3600,
            capacity: 10_000,
            failure_backoff_base_ms: 0,
            failure_backoff_max_secs: 300,
            sweep_interval_secs: 300,
        }
    }
}

impl CacheConfig {
    pub fn settings(&self) -> CacheSettings {
        let failure_backoff = if self.failure_backoff_base_ms == 0 {
            Backoff::disabled()
        } else {
            Backoff::new(
                Duration::from_millis(self.failure_backoff_base_ms),
                Duration::from_secs(self.failure_backoff_max_secs),
            )
        };
        CacheSettings {
            ttl: Duration::from_secs(self.ttl_secs),
            capacity: self.capacity,
            failure_backoff,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    pub user_agent: String,
    pub timeout_secs: u64,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            user_agent: DEFAULT_USER_AGENT.to_string(),
            timeout_secs: 30,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EnrichConfig {
    pub item_timeout_secs: u64,
    pub concurrency: usize,
}

impl Default for EnrichConfig {
    fn default() -> Self {
        Self {
            item_timeout_secs: 20,
            concurrency: 50,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CookieCloudConfig {
    pub host: String,
    pub uuid: String,
    pub password: String,
    #[serde(default = "default_update_cron")]
    pub update_cron: String,
}

fn default_update_cron() -> String {
    "0 */30 * * * *".to_string()
}

impl Config {
    /// Load the config at `path`; a missing file yields the defaults.
    #[instrument(level = "info", skip_all, fields(path = %path.as_ref().display()))]
    pub async fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        match tokio::fs::read_to_string(path).await {
            Ok(text) => {
                let config = Self::from_yaml(&text)?;
                info!("Loaded configuration");
                Ok(config)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!("No configuration file; using defaults");
                Ok(Self::default())
            }
            Err(e) => Err(Error::Config(format!("{}: {e}", path.display()))),
        }
    }

    pub fn from_yaml(text: &str) -> Result<Self> {
        if text.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(text)?)
    }

    /// The cookie-cloud settings, or a configuration error naming what is missing.
    pub fn require_cookie_cloud(&self) -> Result<&CookieCloudConfig> {
        self.cookie_cloud
            .as_ref()
            .ok_or_else(|| Error::Config("cookie_cloud is not configured".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_empty_yaml_is_default() {
        assert_eq!(Config::from_yaml("").unwrap(), Config::default());
    }

    #[test]
    fn test_partial_yaml_keeps_defaults() {
        let config = Config::from_yaml(
            "cache:\n  ttl_secs: 60\nenrich:\n  concurrency: 4\nwebdriver_url: http://localhost:9515\n",
        )
        .unwrap();
        assert_eq!(config.cache.ttl_secs, 60);
        assert_eq!(config.cache.capacity, 10_000);
        assert_eq!(config.enrich.concurrency, 4);
        assert_eq!(config.enrich.item_timeout_secs, 20);
        assert_eq!(config.http.timeout_secs, 30);
        assert_eq!(config.webdriver_url.as_deref(), Some("http://localhost:9515"));
        assert!(config.cookie_cloud.is_none());
    }

    #[test]
    fn test_cookie_cloud_default_cron() {
        let config = Config::from_yaml(
            "cookie_cloud:\n  host: https://c.example\n  uuid: u\n  password: p\n",
        )
        .unwrap();
        let cloud = config.require_cookie_cloud().unwrap();
        assert_eq!(cloud.update_cron, "0 */30 * * * *");
    }

    #[test]
    fn test_missing_cookie_cloud_is_config_error() {
        let err = Config::default().require_cookie_cloud().unwrap_err();
        assert!(err.is_client_error());
    }

    #[test]
    fn test_cache_settings() {
        let disabled = CacheConfig::default().settings();
        assert!(disabled.failure_backoff.is_disabled());
        assert_eq!(disabled.ttl, Duration::from_secs(3600));

        let enabled = CacheConfig {
            failure_backoff_base_ms: 500,
            ..CacheConfig::default()
        }
        .settings();
        assert!(!enabled.failure_backoff.is_disabled());
    }

    #[test]
    fn test_invalid_yaml_is_config_error() {
        assert!(matches!(
            Config::from_yaml("cache: [1, 2"),
            Err(Error::Config(_))
        ));
    }

    #[tokio::test]
    async fn test_missing_file_is_default() {
        let config = Config::load("/definitely/not/here/config.yaml").await.unwrap();
        assert_eq!(config, Config::default());
    }
}
