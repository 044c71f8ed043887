use std::time::{Duration, SystemTime};

use http::header::RETRY_AFTER;

use crate::error::{category_from_upstream_status, ErrorCategory, GatewayError};

const ERROR_MESSAGE_MAX_CHARS: usize = 512;

#[inline]
pub fn parse_retry_after_delay(headers: &http::HeaderMap) -> Option<Duration> {
    let raw = headers.get(RETRY_AFTER)?.to_str().ok()?.trim();
    if raw.is_empty() {
        return None;
    }

    if let Ok(seconds) = raw.parse::<u64>() {
        return Some(Duration::from_secs(seconds));
    }

    let target = httpdate::parse_http_date(raw).ok()?;
    Some(target.duration_since(SystemTime::now()).unwrap_or_default())
}

/// Pull a human-readable message out of an upstream error body.
///
/// Understands `{"error":{"message":..}}`, `{"error":".."}` and the same
/// shapes wrapped in a one-element array; anything else is returned as
/// trimmed text.
#[must_use]
pub fn extract_upstream_message(body: &str) -> String {
    let trimmed = body.trim();
    if let Ok(value) = serde_json::from_str::<serde_json::Value>(trimmed) {
        let value = match &value {
            serde_json::Value::Array(items) if items.len() == 1 => &items[0],
            other => other,
        };
        let error = value.get("error");
        let message = error
            .and_then(|err| err.get("message"))
            .and_then(serde_json::Value::as_str)
            .or_else(|| error.and_then(serde_json::Value::as_str));
        if let Some(message) = message {
            return message.to_string();
        }
    }
    if trimmed.is_empty() {
        return "empty upstream error body".to_string();
    }
    crate::util::truncate_chars_with_ellipsis(trimmed, ERROR_MESSAGE_MAX_CHARS)
}

/// Map a non-2xx upstream reply to a [`GatewayError`].
#[must_use]
pub fn status_error(status: http::StatusCode, headers: &http::HeaderMap, body: &str) -> GatewayError {
    let message = extract_upstream_message(body);
    let code = status.as_u16();
    match category_from_upstream_status(code) {
        ErrorCategory::Authentication => GatewayError::Auth(message),
        ErrorCategory::RateLimit => {
            let message = match parse_retry_after_delay(headers) {
                Some(delay) => format!("{message} (retry after {}s)", delay.as_secs()),
                None => message,
            };
            GatewayError::RateLimit {
                status: code,
                message,
            }
        }
        ErrorCategory::Validation | ErrorCategory::ServerError => GatewayError::Upstream {
            status: code,
            message,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_retry_after_seconds() {
        let mut headers = http::HeaderMap::new();
        headers.insert(RETRY_AFTER, http::HeaderValue::from_static("7"));
        assert_eq!(
            parse_retry_after_delay(&headers),
            Some(Duration::from_secs(7))
        );
    }

    #[test]
    fn test_parse_retry_after_http_date() {
        let mut headers = http::HeaderMap::new();
        let target = SystemTime::now() + Duration::from_secs(120);
        headers.insert(
            RETRY_AFTER,
            http::HeaderValue::from_str(&httpdate::fmt_http_date(target)).unwrap(),
        );
        let delay = parse_retry_after_delay(&headers).unwrap();
        assert!(delay <= Duration::from_secs(120));
        assert!(delay >= Duration::from_secs(100));
    }

    #[test]
    fn test_parse_retry_after_garbage() {
        let mut headers = http::HeaderMap::new();
        headers.insert(RETRY_AFTER, http::HeaderValue::from_static("soon"));
        assert!(parse_retry_after_delay(&headers).is_none());
        assert!(parse_retry_after_delay(&http::HeaderMap::new()).is_none());
    }

    #[test]
    fn test_extract_message_shapes() {
        assert_eq!(
            extract_upstream_message(r#"{"error":{"code":429,"message":"quota"}}"#),
            "quota"
        );
        assert_eq!(
            extract_upstream_message(r#"[{"error":{"message":"wrapped"}}]"#),
            "wrapped"
        );
        assert_eq!(extract_upstream_message(r#"{"error":"flat"}"#), "flat");
        assert_eq!(extract_upstream_message("  plain text "), "plain text");
        assert_eq!(extract_upstream_message(""), "empty upstream error body");
    }

    #[test]
    fn test_status_error_classes() {
        let headers = http::HeaderMap::new();
        assert!(matches!(
            status_error(http::StatusCode::UNAUTHORIZED, &headers, "expired"),
            GatewayError::Auth(_)
        ));
        assert!(matches!(
            status_error(http::StatusCode::SERVICE_UNAVAILABLE, &headers, ""),
            GatewayError::RateLimit { status: 503, .. }
        ));
        assert!(matches!(
            status_error(http::StatusCode::BAD_REQUEST, &headers, "bad"),
            GatewayError::Upstream { status: 400, .. }
        ));
    }

    #[test]
    fn test_rate_limit_message_carries_retry_after() {
        let mut headers = http::HeaderMap::new();
        headers.insert(RETRY_AFTER, http::HeaderValue::from_static("30"));
        let err = status_error(
            http::StatusCode::TOO_MANY_REQUESTS,
            &headers,
            r#"{"error":{"message":"slow down"}}"#,
        );
        assert!(matches!(
            err,
            GatewayError::RateLimit { status: 429, ref message } if message == "slow down (retry after 30s)"
        ));
    }
}
