use http::header::AUTHORIZATION;
use rustc_hash::FxHashSet;

use crate::config::ClientAuthConfig;
use crate::error::GatewayError;

/// Compact index of the client keys allowed to call the gateway.
pub enum AllowedClientKeys {
    Empty,
    Single { bearer: Box<str> },
    Multiple(FxHashSet<String>),
}

fn missing_key() -> GatewayError {
    GatewayError::Auth("Missing API key".to_string())
}

fn invalid_key() -> GatewayError {
    GatewayError::Auth("Invalid API key".to_string())
}

/// Extract the key from `Authorization: Bearer <key>`.
///
/// # Errors
///
/// Returns [`GatewayError::Auth`] when the header is absent or not a bearer
/// token.
pub fn extract_api_key(headers: &http::HeaderMap) -> Result<&str, GatewayError> {
    headers
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|key| !key.is_empty())
        .ok_or_else(missing_key)
}

/// Check the request's bearer key against the allowed set.
///
/// # Errors
///
/// Returns [`GatewayError::Auth`] when the key is missing or not allowed.
pub fn authenticate(
    headers: &http::HeaderMap,
    allowed_keys: &AllowedClientKeys,
) -> Result<(), GatewayError> {
    match allowed_keys {
        AllowedClientKeys::Single { bearer } => match headers.get(AUTHORIZATION) {
            Some(value) if value.as_bytes() == bearer.as_bytes() => Ok(()),
            Some(_) => Err(invalid_key()),
            None => Err(missing_key()),
        },
        AllowedClientKeys::Multiple(allowed_set) => {
            let client_key = extract_api_key(headers)?;
            if allowed_set.contains(client_key) {
                Ok(())
            } else {
                Err(invalid_key())
            }
        }
        AllowedClientKeys::Empty => Err(invalid_key()),
    }
}

/// Build the allowed-key index.
#[must_use]
pub fn build_allowed_key_set(config: &ClientAuthConfig) -> AllowedClientKeys {
    let mut allowed_set: FxHashSet<String> = config.allowed_keys.iter().cloned().collect();

    match allowed_set.len() {
        0 => AllowedClientKeys::Empty,
        1 => match allowed_set.drain().next() {
            Some(single_key) => AllowedClientKeys::Single {
                bearer: format!("Bearer {single_key}").into_boxed_str(),
            },
            None => AllowedClientKeys::Empty,
        },
        _ => AllowedClientKeys::Multiple(allowed_set),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn keys(allowed: &[&str]) -> AllowedClientKeys {
        build_allowed_key_set(&ClientAuthConfig {
            allowed_keys: allowed.iter().map(ToString::to_string).collect(),
        })
    }

    fn bearer(value: &str) -> http::HeaderMap {
        let mut headers = http::HeaderMap::new();
        headers.insert("authorization", value.parse().unwrap());
        headers
    }

    #[test]
    fn test_extract_bearer() {
        assert_eq!(
            extract_api_key(&bearer("Bearer sk-test123")).unwrap(),
            "sk-test123"
        );
    }

    #[test]
    fn test_extract_missing_key() {
        let err = extract_api_key(&http::HeaderMap::new()).unwrap_err();
        assert!(matches!(err, GatewayError::Auth(_)));
        assert!(extract_api_key(&bearer("Basic abc")).is_err());
    }

    #[test]
    fn test_authenticate_single_key() {
        let index = keys(&["valid-key"]);
        assert!(authenticate(&bearer("Bearer valid-key"), &index).is_ok());
        assert!(authenticate(&bearer("Bearer wrong-key"), &index).is_err());
        assert!(authenticate(&http::HeaderMap::new(), &index).is_err());
    }

    #[test]
    fn test_authenticate_multiple_keys() {
        let index = keys(&["a", "b"]);
        assert!(authenticate(&bearer("Bearer a"), &index).is_ok());
        assert!(authenticate(&bearer("Bearer b"), &index).is_ok());
        let err = authenticate(&bearer("Bearer c"), &index).unwrap_err();
        assert_eq!(err.to_string(), "Authentication error: Invalid API key");
    }

    #[test]
    fn test_build_allowed_key_set_dedups() {
        assert!(matches!(
            keys(&["single", "single"]),
            AllowedClientKeys::Single { .. }
        ));
        match keys(&["a", "b", "a"]) {
            AllowedClientKeys::Multiple(set) => assert_eq!(set.len(), 2),
            _ => panic!("expected multiple-key index"),
        }
        assert!(matches!(keys(&[]), AllowedClientKeys::Empty));
    }
}
