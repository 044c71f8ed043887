use std::time::Duration;

use bytes::Bytes;
use futures_util::future::BoxFuture;
use futures_util::StreamExt;

use crate::config::{ServerConfig, UpstreamConfig};
use crate::error::GatewayError;

use super::{UpstreamReply, UpstreamTransport};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

fn build_reqwest_client(
    pool_max_idle_per_host: usize,
    pool_idle_timeout: Option<Duration>,
    use_env_proxy: bool,
    proxy_url: Option<&str>,
) -> Result<reqwest::Client, GatewayError> {
    // No overall timeout: streams are bounded by the idle timeout instead.
    let mut builder = reqwest::Client::builder()
        .pool_max_idle_per_host(pool_max_idle_per_host)
        .pool_idle_timeout(pool_idle_timeout)
        .tcp_nodelay(true)
        .connect_timeout(CONNECT_TIMEOUT)
        .redirect(reqwest::redirect::Policy::none());

    if let Some(proxy_url) = proxy_url {
        let proxy = reqwest::Proxy::all(proxy_url)
            .map_err(|err| GatewayError::Transport(format!("Invalid proxy URL: {err}")))?;
        builder = builder.no_proxy().proxy(proxy);
    } else if !use_env_proxy {
        builder = builder.no_proxy();
    }

    builder
        .build()
        .map_err(|err| GatewayError::Transport(format!("Failed to build HTTP client: {err}")))
}

/// reqwest-backed [`UpstreamTransport`] with a pooled client.
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    /// Build the pooled client from server and upstream settings.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::Transport`] when the proxy URL is invalid or
    /// the TLS backend cannot be initialised.
    pub fn new(server: &ServerConfig, upstream: &UpstreamConfig) -> Result<Self, GatewayError> {
        let pool_idle_timeout = if server.http_pool_idle_timeout_secs == 0 {
            None
        } else {
            Some(Duration::from_secs(server.http_pool_idle_timeout_secs))
        };
        let client = build_reqwest_client(
            server.http_pool_max_idle_per_host.max(1),
            pool_idle_timeout,
            server.http_use_env_proxy,
            upstream.proxy.as_deref(),
        )?;
        Ok(Self { client })
    }

    /// Shared client, also used for credential refresh calls.
    #[must_use]
    pub fn client(&self) -> &reqwest::Client {
        &self.client
    }
}

impl UpstreamTransport for HttpTransport {
    fn post_stream<'a>(
        &'a self,
        url: &'a str,
        headers: http::HeaderMap,
        body: Bytes,
    ) -> BoxFuture<'a, Result<UpstreamReply, GatewayError>> {
        Box::pin(async move {
            let response = self
                .client
                .post(url)
                .headers(headers)
                .body(body)
                .send()
                .await
                .map_err(|err| GatewayError::Transport(format!("upstream request failed: {err}")))?;
            let status = response.status();
            let headers = response.headers().clone();
            let body = response
                .bytes_stream()
                .map(|chunk| {
                    chunk.map_err(|err| {
                        GatewayError::Transport(format!("upstream read failed: {err}"))
                    })
                })
                .boxed();
            Ok(UpstreamReply {
                status,
                headers,
                body,
            })
        })
    }
}
