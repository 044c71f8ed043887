pub mod validation;

use serde::{Deserialize, Serialize};
use std::fmt;

use self::validation::validate_config;

/// Error type for configuration loading and validation.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("Config validation error: {0}")]
    Validation(String),
}

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default)]
    pub base_path: String,
    #[serde(default = "default_http_pool_max_idle_per_host")]
    pub http_pool_max_idle_per_host: usize,
    #[serde(default = "default_http_pool_idle_timeout_secs")]
    pub http_pool_idle_timeout_secs: u64,
    /// Maximum silence between two upstream reads; `0` waits forever.
    #[serde(default = "default_upstream_idle_timeout_secs")]
    pub upstream_idle_timeout_secs: u64,
    #[serde(default)]
    pub http_use_env_proxy: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub runtime_worker_threads: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub runtime_max_blocking_threads: Option<usize>,
}

fn default_port() -> u16 {
    8000
}
fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_http_pool_max_idle_per_host() -> usize {
    16
}
fn default_http_pool_idle_timeout_secs() -> u64 {
    15
}
fn default_upstream_idle_timeout_secs() -> u64 {
    120
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            host: default_host(),
            base_path: String::new(),
            http_pool_max_idle_per_host: default_http_pool_max_idle_per_host(),
            http_pool_idle_timeout_secs: default_http_pool_idle_timeout_secs(),
            upstream_idle_timeout_secs: default_upstream_idle_timeout_secs(),
            http_use_env_proxy: false,
            runtime_worker_threads: None,
            runtime_max_blocking_threads: None,
        }
    }
}

/// The generateContent upstream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpstreamConfig {
    pub base_url: String,
    #[serde(default)]
    pub proxy: Option<String>,
}

/// How the gateway authenticates itself against the upstream.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum CredentialsConfig {
    /// Fixed API key sent as `x-goog-api-key`.
    Static { api_key: String },
    /// Refresh-token grant; access tokens are sent as `Authorization: Bearer`.
    OAuth {
        token_url: String,
        client_id: String,
        client_secret: String,
        refresh_token: String,
    },
}

/// One entry of the model capability table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    pub id: String,
    #[serde(default)]
    pub vision: bool,
    #[serde(default)]
    pub fallback: Option<String>,
}

/// Rate-limit fallback settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FallbackConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_notice_template")]
    pub notice_template: String,
}

fn default_notice_template() -> String {
    "[{from} is rate limited; switched to {to}]\n\n".to_string()
}

impl Default for FallbackConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            notice_template: default_notice_template(),
        }
    }
}

/// Where thought fragments are delivered downstream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ThinkingDelivery {
    /// Inline in `delta.content`, wrapped in delimiters.
    #[default]
    Content,
    /// In `delta.reasoning`; content is never touched.
    Metadata,
}

impl fmt::Display for ThinkingDelivery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ThinkingDelivery::Content => write!(f, "content"),
            ThinkingDelivery::Metadata => write!(f, "metadata"),
        }
    }
}

/// Thinking settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThinkingConfig {
    #[serde(default = "default_true")]
    pub real: bool,
    #[serde(default)]
    pub delivery: ThinkingDelivery,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub budget_tokens: Option<u64>,
    #[serde(default)]
    pub synthetic: bool,
    #[serde(default = "default_synthetic_chunk_chars")]
    pub synthetic_chunk_chars: usize,
    #[serde(default = "default_synthetic_delay_ms")]
    pub synthetic_delay_ms: u64,
    #[serde(default = "default_synthetic_preview_chars")]
    pub synthetic_preview_chars: usize,
}

fn default_synthetic_chunk_chars() -> usize {
    24
}
fn default_synthetic_delay_ms() -> u64 {
    40
}
fn default_synthetic_preview_chars() -> usize {
    80
}

impl Default for ThinkingConfig {
    fn default() -> Self {
        Self {
            real: true,
            delivery: ThinkingDelivery::default(),
            budget_tokens: None,
            synthetic: false,
            synthetic_chunk_chars: default_synthetic_chunk_chars(),
            synthetic_delay_ms: default_synthetic_delay_ms(),
            synthetic_preview_chars: default_synthetic_preview_chars(),
        }
    }
}

impl ThinkingConfig {
    /// Synthetic reasoning only runs when real upstream thinking is off.
    #[must_use]
    pub fn synthetic_active(&self) -> bool {
        self.synthetic && !self.real
    }
}

/// Client authentication configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientAuthConfig {
    pub allowed_keys: Vec<String>,
}

/// Feature flags and settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeaturesConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_true() -> bool {
    true
}
fn default_log_level() -> String {
    "INFO".to_string()
}

impl Default for FeaturesConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
        }
    }
}

/// Top-level application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    pub upstream: UpstreamConfig,
    pub credentials: CredentialsConfig,
    #[serde(default)]
    pub models: Vec<ModelConfig>,
    #[serde(default)]
    pub fallback: FallbackConfig,
    #[serde(default)]
    pub thinking: ThinkingConfig,
    pub client_authentication: ClientAuthConfig,
    #[serde(default)]
    pub features: FeaturesConfig,
}

/// Load configuration from a YAML file and validate it.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] when reading the file fails, [`ConfigError::Yaml`]
/// when parsing fails, or [`ConfigError::Validation`] when semantic validation fails.
pub fn load_config(path: &str) -> Result<AppConfig, ConfigError> {
    let contents = std::fs::read_to_string(path)?;
    parse_config(&contents)
}

/// Parse and validate configuration from YAML text.
///
/// # Errors
///
/// Returns [`ConfigError::Yaml`] or [`ConfigError::Validation`].
pub fn parse_config(contents: &str) -> Result<AppConfig, ConfigError> {
    let config: AppConfig = serde_yaml::from_str(contents)?;
    validate_config(&config)?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_example_config() {
        let config = load_config("config.example.yaml");
        assert!(
            config.is_ok(),
            "Failed to load example config: {:?}",
            config.err()
        );
        let config = config.unwrap();
        assert_eq!(config.server.port, 8000);
        assert_eq!(config.server.upstream_idle_timeout_secs, 120);
        assert!(config.fallback.enabled);
        assert!(config.models.iter().any(|m| m.fallback.is_some()));
        assert_eq!(config.client_authentication.allowed_keys.len(), 2);
    }

    #[test]
    fn test_minimal_config_defaults() {
        let config = parse_config(
            r"
upstream:
  base_url: https://upstream.example.com/v1beta
credentials:
  kind: static
  api_key: k
client_authentication:
  allowed_keys: [client-key]
",
        )
        .unwrap();
        assert_eq!(config.thinking.delivery, ThinkingDelivery::Content);
        assert!(config.thinking.real);
        assert!(!config.thinking.synthetic_active());
        assert_eq!(config.thinking.synthetic_chunk_chars, 24);
        assert!(config.models.is_empty());
        assert_eq!(config.features.log_level, "INFO");
    }

    #[test]
    fn test_thinking_delivery_serde() {
        let json = serde_json::to_string(&ThinkingDelivery::Metadata).unwrap();
        assert_eq!(json, "\"metadata\"");
        let mode: ThinkingDelivery = serde_json::from_str("\"content\"").unwrap();
        assert_eq!(mode, ThinkingDelivery::Content);
    }

    #[test]
    fn test_oauth_credentials_parse() {
        let creds: CredentialsConfig = serde_yaml::from_str(
            r"
kind: oauth
token_url: https://oauth.example.com/token
client_id: id
client_secret: secret
refresh_token: rt
",
        )
        .unwrap();
        assert!(matches!(creds, CredentialsConfig::OAuth { .. }));
    }

    #[test]
    fn test_synthetic_active_requires_real_off() {
        let mut thinking = ThinkingConfig {
            synthetic: true,
            ..ThinkingConfig::default()
        };
        assert!(!thinking.synthetic_active());
        thinking.real = false;
        assert!(thinking.synthetic_active());
    }
}
