use std::collections::HashSet;

use super::{AppConfig, ConfigError, CredentialsConfig};

/// Validate the full application config, returning an error if any rule is violated.
///
/// # Errors
///
/// Returns [`ConfigError::Validation`] when any configuration invariant is violated.
pub fn validate_config(config: &AppConfig) -> Result<(), ConfigError> {
    validate_server_config(config)?;
    validate_allowed_keys(config)?;
    validate_upstream(config)?;
    validate_credentials(config)?;
    validate_models(config)?;
    validate_thinking(config)?;
    validate_log_level(config)?;
    Ok(())
}

fn validation_err(msg: impl Into<String>) -> ConfigError {
    ConfigError::Validation(msg.into())
}

fn validate_server_config(config: &AppConfig) -> Result<(), ConfigError> {
    let server = &config.server;
    if server.http_pool_max_idle_per_host == 0 {
        return Err(validation_err(
            "server.http_pool_max_idle_per_host must be greater than 0",
        ));
    }
    if server.runtime_worker_threads == Some(0) {
        return Err(validation_err(
            "server.runtime_worker_threads must be greater than 0 when set",
        ));
    }
    if server.runtime_max_blocking_threads == Some(0) {
        return Err(validation_err(
            "server.runtime_max_blocking_threads must be greater than 0 when set",
        ));
    }
    Ok(())
}

fn validate_allowed_keys(config: &AppConfig) -> Result<(), ConfigError> {
    if config.client_authentication.allowed_keys.is_empty() {
        return Err(validation_err("allowed_keys cannot be empty"));
    }
    for key in &config.client_authentication.allowed_keys {
        if key.trim().is_empty() {
            return Err(validation_err("allowed_keys contains an empty key"));
        }
    }
    Ok(())
}

fn validate_upstream(config: &AppConfig) -> Result<(), ConfigError> {
    let base_url = &config.upstream.base_url;
    if !base_url.starts_with("http://") && !base_url.starts_with("https://") {
        return Err(validation_err(
            "upstream.base_url must start with http:// or https://",
        ));
    }
    validate_url_field("upstream.proxy", config.upstream.proxy.as_deref())
}

fn validate_url_field(field_name: &str, value: Option<&str>) -> Result<(), ConfigError> {
    let Some(value) = value.map(str::trim) else {
        return Ok(());
    };
    if value.is_empty() {
        return Err(validation_err(format!(
            "{field_name} cannot be empty when set"
        )));
    }
    let parsed = url::Url::parse(value)
        .map_err(|err| validation_err(format!("{field_name} is not a valid URL: {err}")))?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(validation_err(format!(
            "{field_name} must use http:// or https://"
        )));
    }
    Ok(())
}

fn validate_credentials(config: &AppConfig) -> Result<(), ConfigError> {
    match &config.credentials {
        CredentialsConfig::Static { api_key } => {
            if api_key.trim().is_empty() {
                return Err(validation_err("credentials.api_key cannot be empty"));
            }
        }
        CredentialsConfig::OAuth {
            token_url,
            client_id,
            client_secret,
            refresh_token,
        } => {
            validate_url_field("credentials.token_url", Some(token_url))?;
            for (name, value) in [
                ("client_id", client_id),
                ("client_secret", client_secret),
                ("refresh_token", refresh_token),
            ] {
                if value.trim().is_empty() {
                    return Err(validation_err(format!(
                        "credentials.{name} cannot be empty"
                    )));
                }
            }
        }
    }
    Ok(())
}

fn validate_models(config: &AppConfig) -> Result<(), ConfigError> {
    let mut seen = HashSet::new();
    for model in &config.models {
        if model.id.trim().is_empty() {
            return Err(validation_err("model id cannot be empty"));
        }
        if !seen.insert(model.id.as_str()) {
            return Err(validation_err(format!(
                "duplicate model entry '{}'",
                model.id
            )));
        }
        if let Some(fallback) = model.fallback.as_deref() {
            if fallback.trim().is_empty() {
                return Err(validation_err(format!(
                    "Model '{}': fallback cannot be empty when set",
                    model.id
                )));
            }
            if fallback == model.id {
                return Err(validation_err(format!(
                    "Model '{}': fallback must differ from the model itself",
                    model.id
                )));
            }
        }
    }
    Ok(())
}

fn validate_thinking(config: &AppConfig) -> Result<(), ConfigError> {
    if config.thinking.synthetic_chunk_chars == 0 {
        return Err(validation_err(
            "thinking.synthetic_chunk_chars must be greater than 0",
        ));
    }
    Ok(())
}

fn validate_log_level(config: &AppConfig) -> Result<(), ConfigError> {
    let valid_levels = ["DEBUG", "INFO", "WARNING", "ERROR", "CRITICAL", "DISABLED"];
    if !valid_levels.contains(&config.features.log_level.to_uppercase().as_str()) {
        return Err(validation_err(format!(
            "log_level must be one of {valid_levels:?}"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::*;

    fn make_valid_config() -> AppConfig {
        AppConfig {
            server: ServerConfig::default(),
            upstream: UpstreamConfig {
                base_url: "https://generativelanguage.googleapis.com/v1beta".to_string(),
                proxy: None,
            },
            credentials: CredentialsConfig::Static {
                api_key: "upstream-key".to_string(),
            },
            models: vec![ModelConfig {
                id: "gemini-2.5-pro".to_string(),
                vision: true,
                fallback: Some("gemini-2.5-flash".to_string()),
            }],
            fallback: FallbackConfig::default(),
            thinking: ThinkingConfig::default(),
            client_authentication: ClientAuthConfig {
                allowed_keys: vec!["sk-client-key".to_string()],
            },
            features: FeaturesConfig::default(),
        }
    }

    #[test]
    fn test_valid_config() {
        assert!(validate_config(&make_valid_config()).is_ok());
    }

    #[test]
    fn test_empty_allowed_keys() {
        let mut config = make_valid_config();
        config.client_authentication.allowed_keys = vec![];
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_blank_allowed_key() {
        let mut config = make_valid_config();
        config.client_authentication.allowed_keys = vec!["  ".to_string()];
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_invalid_base_url() {
        let mut config = make_valid_config();
        config.upstream.base_url = "ftp://bad.url".to_string();
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_empty_api_key() {
        let mut config = make_valid_config();
        config.credentials = CredentialsConfig::Static {
            api_key: "  ".to_string(),
        };
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_oauth_missing_refresh_token() {
        let mut config = make_valid_config();
        config.credentials = CredentialsConfig::OAuth {
            token_url: "https://oauth2.example.com/token".to_string(),
            client_id: "id".to_string(),
            client_secret: "secret".to_string(),
            refresh_token: String::new(),
        };
        let msg = validate_config(&config).unwrap_err().to_string();
        assert!(msg.contains("refresh_token"));
    }

    #[test]
    fn test_oauth_bad_token_url() {
        let mut config = make_valid_config();
        config.credentials = CredentialsConfig::OAuth {
            token_url: "not a url".to_string(),
            client_id: "id".to_string(),
            client_secret: "secret".to_string(),
            refresh_token: "rt".to_string(),
        };
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_self_fallback_rejected() {
        let mut config = make_valid_config();
        config.models[0].fallback = Some("gemini-2.5-pro".to_string());
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_duplicate_model_rejected() {
        let mut config = make_valid_config();
        config.models.push(config.models[0].clone());
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_invalid_log_level() {
        let mut config = make_valid_config();
        config.features.log_level = "VERBOSE".to_string();
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_invalid_pool_max_idle_per_host() {
        let mut config = make_valid_config();
        config.server.http_pool_max_idle_per_host = 0;
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_invalid_runtime_worker_threads() {
        let mut config = make_valid_config();
        config.server.runtime_worker_threads = Some(0);
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_zero_synthetic_chunk_rejected() {
        let mut config = make_valid_config();
        config.thinking.synthetic_chunk_chars = 0;
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_invalid_proxy_url() {
        let mut config = make_valid_config();
        config.upstream.proxy = Some("bad-proxy".to_string());
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_valid_proxy_url() {
        let mut config = make_valid_config();
        config.upstream.proxy = Some("http://127.0.0.1:8080".to_string());
        assert!(validate_config(&config).is_ok());
    }
}
