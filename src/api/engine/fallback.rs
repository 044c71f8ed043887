use std::sync::Arc;

use bytes::Bytes;
use http::header::{HeaderValue, ACCEPT, CONTENT_TYPE};

use crate::credentials::apply_credential;
use crate::error::GatewayError;
use crate::routing::render_fallback_notice;
use crate::state::AppState;
use crate::transport::{endpoint_url, within_idle, Endpoint, UpstreamReply};

/// Original attempt plus one auth replay plus one fallback.
const MAX_ATTEMPTS: u32 = 3;

/// What a caller gets once the upstream answered 2xx.
pub(crate) struct Established {
    pub reply: UpstreamReply,
    /// Model that actually serves the response.
    pub model: Arc<str>,
    /// Switch notice to emit before any content, set only after a fallback.
    pub notice: Option<String>,
}

/// Retries left per failure class. Each class is spent at most once.
#[derive(Debug, Clone, Copy)]
struct RetryBudget {
    auth_replay: bool,
    fallback: bool,
}

#[derive(Debug, PartialEq, Eq)]
enum NextStep {
    ReplayWithFreshCredential,
    SwitchModel(Arc<str>),
    Fail,
}

fn next_step(err: &GatewayError, budget: &mut RetryBudget, fallback: Option<&Arc<str>>) -> NextStep {
    match err {
        GatewayError::Auth(_) if budget.auth_replay => {
            budget.auth_replay = false;
            NextStep::ReplayWithFreshCredential
        }
        GatewayError::RateLimit { .. } if budget.fallback => match fallback {
            Some(model) => {
                budget.fallback = false;
                NextStep::SwitchModel(Arc::clone(model))
            }
            None => NextStep::Fail,
        },
        _ => NextStep::Fail,
    }
}

fn upstream_headers(endpoint: Endpoint) -> http::HeaderMap {
    let mut headers = http::HeaderMap::with_capacity(3);
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    if endpoint == Endpoint::Stream {
        headers.insert(ACCEPT, HeaderValue::from_static("text/event-stream"));
    }
    headers
}

/// One upstream call guarded by the retry budgets.
pub(crate) struct UpstreamCall<'a> {
    pub request_id: &'a str,
    pub model: &'a str,
    pub body: &'a Bytes,
    pub endpoint: Endpoint,
    /// Whether a rate limit may switch to the catalog fallback model.
    pub allow_fallback: bool,
}

/// Open the upstream response, replaying on a rejected credential and
/// switching to the fallback model on a rate limit, each at most once.
///
/// # Errors
///
/// Returns the first error no budget covers: a second 401, a rate limit
/// without (or after) a fallback, any other non-2xx status, or a transport
/// failure.
pub(crate) async fn open_upstream(
    state: &AppState,
    call: UpstreamCall<'_>,
) -> Result<Established, GatewayError> {
    let fallback = if call.allow_fallback {
        state.catalog.fallback_for(call.model)
    } else {
        None
    };
    let mut budget = RetryBudget {
        auth_replay: true,
        fallback: true,
    };
    let mut model: Arc<str> = Arc::from(call.model);
    let mut notice = None;
    let mut last_error = None;
    let idle = state.upstream_idle_timeout();

    for attempt in 0..MAX_ATTEMPTS {
        let token = state.credentials.access_token().await?;
        let mut headers = upstream_headers(call.endpoint);
        apply_credential(&mut headers, state.credentials.style(), &token)?;
        let url = endpoint_url(&state.config.upstream.base_url, &model, call.endpoint);

        let reply = within_idle(
            idle,
            state
                .transport
                .post_stream(&url, headers, call.body.clone()),
        )
        .await??;
        let status = reply.status.as_u16();
        if reply.status.is_success() {
            tracing::debug!(
                request_id = call.request_id,
                model = &*model,
                status,
                attempt,
                "upstream response established"
            );
            return Ok(Established {
                reply,
                model,
                notice,
            });
        }

        let err = reply.into_error(idle).await;
        match next_step(&err, &mut budget, fallback.as_ref()) {
            NextStep::ReplayWithFreshCredential => {
                tracing::warn!(
                    request_id = call.request_id,
                    model = &*model,
                    status,
                    attempt,
                    "upstream rejected credential, refreshing and replaying"
                );
                state.credentials.invalidate(&token);
            }
            NextStep::SwitchModel(next_model) => {
                tracing::warn!(
                    request_id = call.request_id,
                    model = &*model,
                    fallback = &*next_model,
                    status,
                    attempt,
                    "upstream rate limited, switching to fallback model"
                );
                notice = Some(render_fallback_notice(
                    &state.config.fallback,
                    &model,
                    &next_model,
                ));
                model = next_model;
            }
            NextStep::Fail => {
                tracing::warn!(
                    request_id = call.request_id,
                    model = &*model,
                    status,
                    attempt,
                    "upstream call failed: {err}"
                );
                return Err(err);
            }
        }
        last_error = Some(err);
    }

    Err(last_error
        .unwrap_or_else(|| GatewayError::Internal("upstream retry budget exhausted".to_string())))
}
