// Layered settings: defaults -> optional quotehub.toml -> QUOTEHUB_* environment.
//
//   QUOTEHUB_PROVIDER__REST_URL=https://api.example.com/v1
//   QUOTEHUB_HUB__RECONNECT__MAX_ATTEMPTS=5

use std::time::Duration;

use config::{Config, ConfigError, Environment, File, FileFormat};
use serde::Deserialize;

use crate::market_data::reconnect::ReconnectConfig;
use crate::market_data::retry::RetryExecutor;

pub const DEFAULT_CONFIG_FILE: &str = "quotehub.toml";
const ENV_PREFIX: &str = "QUOTEHUB";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub provider: ProviderSettings,
    pub cache: CacheSettings,
    pub retry: RetrySettings,
    pub hub: HubSettings,
    pub http: HttpSettings,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ProviderSettings {
    pub rest_url: String,
    pub stream_url: String,
    pub token: Option<String>,
}

impl Default for ProviderSettings {
    fn default() -> Self {
        Self {
            rest_url: "http://127.0.0.1:8080".into(),
            stream_url: "ws://127.0.0.1:8080".into(),
            token: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheSettings {
    pub quote_ttl_secs: u64,
    pub search_ttl_secs: u64,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self { quote_ttl_secs: 10, search_ttl_secs: 300 }
    }
}

impl CacheSettings {
    pub fn quote_ttl(&self) -> Duration {
        Duration::from_secs(self.quote_ttl_secs)
    }

    pub fn search_ttl(&self) -> Duration {
        Duration::from_secs(self.search_ttl_secs)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self { max_attempts: 3, base_delay_ms: 1_000 }
    }
}

impl RetrySettings {
    pub fn executor(&self) -> RetryExecutor {
        RetryExecutor::new(self.max_attempts, Duration::from_millis(self.base_delay_ms))
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HubSettings {
    /// Pushed quotes refresh the fetcher's cache.
    pub share_cache: bool,
    pub reconnect: ReconnectConfig,
}

impl Default for HubSettings {
    fn default() -> Self {
        Self { share_cache: true, reconnect: ReconnectConfig::default() }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HttpSettings {
    pub timeout_secs: u64,
}

impl Default for HttpSettings {
    fn default() -> Self {
        Self { timeout_secs: 10 }
    }
}

impl HttpSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

fn environment() -> Environment {
    Environment::with_prefix(ENV_PREFIX)
        .prefix_separator("_")
        .separator("__")
        .try_parsing(true)
}

impl Settings {
    /// `path` defaults to `quotehub.toml` in the working directory; a missing file is fine.
    pub fn load(path: Option<&str>) -> Result<Self, ConfigError> {
        let path = path.unwrap_or(DEFAULT_CONFIG_FILE);
        Config::builder()
            .add_source(File::with_name(path).required(false))
            .add_source(environment())
            .build()?
            .try_deserialize()
    }

    pub fn from_toml_str(toml: &str) -> Result<Self, ConfigError> {
        Config::builder()
            .add_source(File::from_str(toml, FileFormat::Toml))
            .build()?
            .try_deserialize()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let s = Settings::default();
        assert_eq!(s.cache.quote_ttl(), Duration::from_secs(10));
        assert_eq!(s.cache.search_ttl(), Duration::from_secs(300));
        assert_eq!(s.retry.executor().max_attempts(), 3);
        assert_eq!(s.retry.executor().delay_after(2), Duration::from_secs(2));
        assert!(s.hub.share_cache);
        assert!(s.hub.reconnect.enabled);
        assert_eq!(s.hub.reconnect.max_attempts, 0);
    }

    #[test]
    fn test_partial_toml_keeps_other_defaults() {
        let s = Settings::from_toml_str(
            r#"
            [provider]
            rest_url = "https://api.example.com/v1"
            token = "secret"

            [cache]
            quote_ttl_secs = 3

            [hub.reconnect]
            enabled = false
            "#,
        )
        .unwrap();
        assert_eq!(s.provider.rest_url, "https://api.example.com/v1");
        assert_eq!(s.provider.token.as_deref(), Some("secret"));
        assert_eq!(s.provider.stream_url, ProviderSettings::default().stream_url);
        assert_eq!(s.cache.quote_ttl_secs, 3);
        assert_eq!(s.cache.search_ttl_secs, 300);
        assert!(!s.hub.reconnect.enabled);
        assert_eq!(s.hub.reconnect.initial_delay_ms, 500);
    }

    #[test]
    fn test_missing_file_is_not_an_error() {
        let s = Settings::load(Some("definitely/not/here.toml")).unwrap();
        assert_eq!(s.retry.max_attempts, RetrySettings::default().max_attempts);
    }
}
