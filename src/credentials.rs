use std::time::{Duration, Instant};

use futures_util::future::BoxFuture;
use http::header::{HeaderName, HeaderValue, AUTHORIZATION};
use parking_lot::RwLock;
use serde::Deserialize;

use crate::config::CredentialsConfig;
use crate::error::GatewayError;

const X_GOOG_API_KEY: HeaderName = HeaderName::from_static("x-goog-api-key");
/// Tokens this close to expiry are treated as expired.
const EXPIRY_SKEW: Duration = Duration::from_secs(60);
const DEFAULT_TOKEN_LIFETIME_SECS: u64 = 3600;
/// Upper bound on a server-declared token lifetime.
const MAX_TOKEN_LIFETIME_SECS: u64 = 24 * 3600;

/// How a credential is presented to the upstream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialStyle {
    /// `x-goog-api-key: <key>`
    ApiKey,
    /// `Authorization: Bearer <token>`
    Bearer,
}

/// Source of upstream credentials shared by all requests.
///
/// `invalidate` names the token the caller saw rejected, so a token that a
/// concurrent request already refreshed is left alone.
pub trait CredentialProvider: Send + Sync {
    fn access_token(&self) -> BoxFuture<'_, Result<String, GatewayError>>;
    fn invalidate(&self, stale_token: &str);
    fn style(&self) -> CredentialStyle;
}

/// Insert the credential header for `style`.
///
/// # Errors
///
/// Returns [`GatewayError::Auth`] when the token is not a valid header value.
pub fn apply_credential(
    headers: &mut http::HeaderMap,
    style: CredentialStyle,
    token: &str,
) -> Result<(), GatewayError> {
    let invalid = |_| GatewayError::Auth("upstream credential is not a valid header value".into());
    match style {
        CredentialStyle::ApiKey => {
            headers.insert(X_GOOG_API_KEY, HeaderValue::from_str(token).map_err(invalid)?);
        }
        CredentialStyle::Bearer => {
            let value = HeaderValue::from_str(&format!("Bearer {token}")).map_err(invalid)?;
            headers.insert(AUTHORIZATION, value);
        }
    }
    Ok(())
}

/// Fixed API key. Invalidation has nothing to refresh, so a replayed 401
/// fails again.
pub struct StaticCredential {
    api_key: String,
}

impl StaticCredential {
    #[must_use]
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
        }
    }
}

impl CredentialProvider for StaticCredential {
    fn access_token(&self) -> BoxFuture<'_, Result<String, GatewayError>> {
        let token = self.api_key.clone();
        Box::pin(async move { Ok(token) })
    }

    fn invalidate(&self, _stale_token: &str) {
        tracing::debug!("static upstream credential cannot be refreshed");
    }

    fn style(&self) -> CredentialStyle {
        CredentialStyle::ApiKey
    }
}

#[derive(Debug, Clone)]
struct CachedToken {
    token: String,
    expires_at: Instant,
}

impl CachedToken {
    fn is_fresh(&self) -> bool {
        Instant::now() + EXPIRY_SKEW < self.expires_at
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<u64>,
}

/// Refresh-token grant with an in-memory token cache.
pub struct OAuthCredential {
    client: reqwest::Client,
    token_url: String,
    client_id: String,
    client_secret: String,
    refresh_token: String,
    cached: RwLock<Option<CachedToken>>,
    refresh_lock: tokio::sync::Mutex<()>,
}

impl OAuthCredential {
    #[must_use]
    pub fn new(
        client: reqwest::Client,
        token_url: String,
        client_id: String,
        client_secret: String,
        refresh_token: String,
    ) -> Self {
        Self {
            client,
            token_url,
            client_id,
            client_secret,
            refresh_token,
            cached: RwLock::new(None),
            refresh_lock: tokio::sync::Mutex::new(()),
        }
    }

    fn fresh_cached(&self) -> Option<String> {
        self.cached
            .read()
            .as_ref()
            .filter(|cached| cached.is_fresh())
            .map(|cached| cached.token.clone())
    }

    async fn fetch_token(&self) -> Result<CachedToken, GatewayError> {
        let form = url::form_urlencoded::Serializer::new(String::new())
            .append_pair("grant_type", "refresh_token")
            .append_pair("client_id", &self.client_id)
            .append_pair("client_secret", &self.client_secret)
            .append_pair("refresh_token", &self.refresh_token)
            .finish();
        let response = self
            .client
            .post(&self.token_url)
            .header(
                http::header::CONTENT_TYPE,
                "application/x-www-form-urlencoded",
            )
            .body(form)
            .send()
            .await
            .map_err(|err| GatewayError::Auth(format!("token refresh failed: {err}")))?;
        let status = response.status();
        let body = response
            .bytes()
            .await
            .map_err(|err| GatewayError::Auth(format!("token refresh failed: {err}")))?;
        if !status.is_success() {
            return Err(GatewayError::Auth(format!(
                "token refresh rejected with status {}",
                status.as_u16()
            )));
        }
        let parsed: TokenResponse = serde_json::from_slice(&body)
            .map_err(|err| GatewayError::Auth(format!("invalid token response: {err}")))?;
        Ok(CachedToken {
            token: parsed.access_token,
            expires_at: expiry_after(parsed.expires_in),
        })
    }
}

/// Expiry instant for a token that lives `expires_in` seconds from now.
fn expiry_after(expires_in: Option<u64>) -> Instant {
    let lifetime = expires_in
        .unwrap_or(DEFAULT_TOKEN_LIFETIME_SECS)
        .min(MAX_TOKEN_LIFETIME_SECS);
    let now = Instant::now();
    now.checked_add(Duration::from_secs(lifetime)).unwrap_or(now)
}

impl CredentialProvider for OAuthCredential {
    fn access_token(&self) -> BoxFuture<'_, Result<String, GatewayError>> {
        Box::pin(async move {
            if let Some(token) = self.fresh_cached() {
                return Ok(token);
            }
            let _guard = self.refresh_lock.lock().await;
            // Another request may have refreshed while this one waited.
            if let Some(token) = self.fresh_cached() {
                return Ok(token);
            }
            let fresh = self.fetch_token().await?;
            let token = fresh.token.clone();
            *self.cached.write() = Some(fresh);
            tracing::info!("refreshed upstream access token");
            Ok(token)
        })
    }

    fn invalidate(&self, stale_token: &str) {
        let mut cached = self.cached.write();
        if cached
            .as_ref()
            .is_some_and(|current| current.token == stale_token)
        {
            *cached = None;
        }
    }

    fn style(&self) -> CredentialStyle {
        CredentialStyle::Bearer
    }
}

/// Build the provider described by config.
#[must_use]
pub fn build_credential_provider(
    config: &CredentialsConfig,
    client: reqwest::Client,
) -> std::sync::Arc<dyn CredentialProvider> {
    match config {
        CredentialsConfig::Static { api_key } => {
            std::sync::Arc::new(StaticCredential::new(api_key.clone()))
        }
        CredentialsConfig::OAuth {
            token_url,
            client_id,
            client_secret,
            refresh_token,
        } => std::sync::Arc::new(OAuthCredential::new(
            client,
            token_url.clone(),
            client_id.clone(),
            client_secret.clone(),
            refresh_token.clone(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use axum::routing::post;
    use axum::Router;

    async fn spawn_token_server(hits: Arc<AtomicUsize>) -> String {
        spawn_token_server_with_lifetime(hits, serde_json::json!(3600)).await
    }

    async fn spawn_token_server_with_lifetime(
        hits: Arc<AtomicUsize>,
        expires_in: serde_json::Value,
    ) -> String {
        let app = Router::new().route(
            "/token",
            post(move |body: String| {
                let hits = Arc::clone(&hits);
                let expires_in = expires_in.clone();
                async move {
                    assert!(body.contains("grant_type=refresh_token"));
                    assert!(body.contains("refresh_token=rt-1"));
                    let n = hits.fetch_add(1, Ordering::SeqCst) + 1;
                    axum::Json(serde_json::json!({
                        "access_token": format!("token-{n}"),
                        "expires_in": expires_in
                    }))
                }
            }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });
        format!("http://{addr}/token")
    }

    fn oauth(token_url: String) -> OAuthCredential {
        OAuthCredential::new(
            reqwest::Client::new(),
            token_url,
            "client".into(),
            "secret".into(),
            "rt-1".into(),
        )
    }

    #[tokio::test]
    async fn test_static_credential() {
        let cred = StaticCredential::new("key-1");
        assert_eq!(cred.access_token().await.unwrap(), "key-1");
        cred.invalidate("key-1");
        assert_eq!(cred.access_token().await.unwrap(), "key-1");
        assert_eq!(cred.style(), CredentialStyle::ApiKey);
    }

    #[tokio::test]
    async fn test_oauth_caches_and_refreshes_after_invalidate() {
        let hits = Arc::new(AtomicUsize::new(0));
        let cred = oauth(spawn_token_server(Arc::clone(&hits)).await);

        assert_eq!(cred.access_token().await.unwrap(), "token-1");
        assert_eq!(cred.access_token().await.unwrap(), "token-1");
        assert_eq!(hits.load(Ordering::SeqCst), 1);

        cred.invalidate("token-1");
        assert_eq!(cred.access_token().await.unwrap(), "token-2");
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_oauth_ignores_stale_invalidation() {
        let hits = Arc::new(AtomicUsize::new(0));
        let cred = oauth(spawn_token_server(Arc::clone(&hits)).await);
        assert_eq!(cred.access_token().await.unwrap(), "token-1");
        cred.invalidate("some-older-token");
        assert_eq!(cred.access_token().await.unwrap(), "token-1");
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_oauth_concurrent_callers_refresh_once() {
        let hits = Arc::new(AtomicUsize::new(0));
        let cred = Arc::new(oauth(spawn_token_server(Arc::clone(&hits)).await));
        let mut handles = Vec::new();
        for _ in 0..8 {
            let cred = Arc::clone(&cred);
            handles.push(tokio::spawn(async move { cred.access_token().await }));
        }
        for handle in handles {
            assert_eq!(handle.await.unwrap().unwrap(), "token-1");
        }
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_oauth_refresh_failure_is_auth_error() {
        let cred = oauth("http://127.0.0.1:9/token".to_string());
        let err = cred.access_token().await.unwrap_err();
        assert!(matches!(err, GatewayError::Auth(_)));
    }

    #[tokio::test]
    async fn test_oauth_huge_expires_in_is_clamped() {
        let hits = Arc::new(AtomicUsize::new(0));
        let cred = oauth(
            spawn_token_server_with_lifetime(Arc::clone(&hits), serde_json::json!(u64::MAX)).await,
        );
        let token = tokio::spawn(async move { cred.access_token().await })
            .await
            .expect("token refresh must not panic");
        assert_eq!(token.unwrap(), "token-1");
    }

    #[test]
    fn test_expiry_after_bounds_lifetime() {
        let before = Instant::now();
        let expiry = expiry_after(Some(u64::MAX));
        assert!(expiry <= Instant::now() + Duration::from_secs(MAX_TOKEN_LIFETIME_SECS));
        assert!(expiry >= before + Duration::from_secs(MAX_TOKEN_LIFETIME_SECS));
        assert!(expiry_after(None) <= Instant::now() + Duration::from_secs(DEFAULT_TOKEN_LIFETIME_SECS));
    }

    #[test]
    fn test_apply_credential_styles() {
        let mut headers = http::HeaderMap::new();
        apply_credential(&mut headers, CredentialStyle::ApiKey, "k").unwrap();
        assert_eq!(headers.get("x-goog-api-key").unwrap(), "k");
        apply_credential(&mut headers, CredentialStyle::Bearer, "t").unwrap();
        assert_eq!(headers.get(AUTHORIZATION).unwrap(), "Bearer t");
        assert!(apply_credential(&mut headers, CredentialStyle::Bearer, "bad\nvalue").is_err());
    }
}
