mod http_transport;
mod retry_policy;

pub use http_transport::HttpTransport;
pub use retry_policy::{extract_upstream_message, parse_retry_after_delay, status_error};

use std::future::Future;
use std::time::Duration;

use bytes::Bytes;
use futures_util::future::BoxFuture;
use futures_util::stream::BoxStream;
use futures_util::StreamExt;

use crate::error::GatewayError;

/// Response body as a stream of raw reads.
pub type ByteStream = BoxStream<'static, Result<Bytes, GatewayError>>;

/// Upper bound on how much of an error body is read back.
const ERROR_BODY_LIMIT: usize = 64 * 1024;

/// Error for an upstream that stayed silent longer than `limit`.
#[must_use]
pub fn idle_timeout_error(limit: Duration) -> GatewayError {
    GatewayError::Upstream {
        status: 504,
        message: format!("no upstream data received for {} seconds", limit.as_secs()),
    }
}

/// Await `fut`, giving up once `idle` elapses without it resolving.
///
/// # Errors
///
/// Returns [`idle_timeout_error`] when the limit is hit.
pub async fn within_idle<F: Future>(
    idle: Option<Duration>,
    fut: F,
) -> Result<F::Output, GatewayError> {
    let Some(limit) = idle else {
        return Ok(fut.await);
    };
    tokio::time::timeout(limit, fut).await.map_err(|_| {
        tracing::warn!(idle_secs = limit.as_secs(), "upstream went idle");
        idle_timeout_error(limit)
    })
}

/// Status, headers and the unread body of one upstream call.
pub struct UpstreamReply {
    pub status: http::StatusCode,
    pub headers: http::HeaderMap,
    pub body: ByteStream,
}

impl UpstreamReply {
    /// Drain the body into text, stopping after `limit` bytes. Each read
    /// waits at most `idle`.
    ///
    /// # Errors
    ///
    /// Returns the first read error from the body stream, or an idle
    /// timeout.
    pub async fn read_text(
        mut self,
        limit: usize,
        idle: Option<Duration>,
    ) -> Result<String, GatewayError> {
        let mut buf = Vec::new();
        while let Some(chunk) = within_idle(idle, self.body.next()).await? {
            let chunk = chunk?;
            let room = limit.saturating_sub(buf.len());
            buf.extend_from_slice(&chunk[..chunk.len().min(room)]);
            if buf.len() >= limit {
                break;
            }
        }
        Ok(String::from_utf8_lossy(&buf).into_owned())
    }

    /// Turn a non-2xx reply into the matching [`GatewayError`].
    ///
    /// A body that stalls past `idle` is classified by status alone.
    pub async fn into_error(self, idle: Option<Duration>) -> GatewayError {
        let status = self.status;
        let headers = self.headers.clone();
        let body = self
            .read_text(ERROR_BODY_LIMIT, idle)
            .await
            .unwrap_or_default();
        status_error(status, &headers, &body)
    }
}

/// Which generateContent method to call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endpoint {
    Stream,
    Unary,
}

/// Build `{base}/models/{model}:streamGenerateContent?alt=sse` or
/// `{base}/models/{model}:generateContent`.
#[must_use]
pub fn endpoint_url(base_url: &str, model: &str, endpoint: Endpoint) -> String {
    let base = base_url.trim_end_matches('/');
    let method = match endpoint {
        Endpoint::Stream => ":streamGenerateContent?alt=sse",
        Endpoint::Unary => ":generateContent",
    };
    let mut url = String::with_capacity(base.len() + model.len() + method.len() + 8);
    url.push_str(base);
    url.push_str("/models/");
    url.push_str(model);
    url.push_str(method);
    url
}

/// The single upstream operation. Implementations never retry; retries
/// belong to the caller.
pub trait UpstreamTransport: Send + Sync {
    fn post_stream<'a>(
        &'a self,
        url: &'a str,
        headers: http::HeaderMap,
        body: Bytes,
    ) -> BoxFuture<'a, Result<UpstreamReply, GatewayError>>;
}
