use std::sync::Arc;
use std::time::Instant;

use axum::http::HeaderMap;
use axum::response::Response;
use bytes::Bytes;

use crate::api::common::{non_streaming, streaming, ChatContext};
use crate::error::{into_axum_response, GatewayError};
use crate::observability::token_counter::estimate_request_tokens;
use crate::protocol::gemini::encoder::{encode_gemini_request, latest_user_text};
use crate::protocol::openai_chat::OpenAiChatRequest;
use crate::state::AppState;
use crate::util::unix_now_secs;

/// `POST /v1/chat/completions`.
pub async fn handler(state: Arc<AppState>, headers: HeaderMap, body: Bytes) -> Response {
    let started = Instant::now();
    if let Err(err) = state.authenticate(&headers) {
        return into_axum_response(&err);
    }

    let (ctx, stream) = match prepare(&state, &body, started) {
        Ok(prepared) => prepared,
        Err(err) => {
            tracing::info!("rejected chat request: {err}");
            return into_axum_response(&err);
        }
    };

    tracing::info!(
        request_id = %ctx.request_id,
        model = %ctx.model,
        stream,
        "chat completion request"
    );

    if stream {
        streaming::handle_streaming(state, ctx).await
    } else {
        match non_streaming::handle_non_streaming(&state, ctx).await {
            Ok(response) => response,
            Err(err) => into_axum_response(&err),
        }
    }
}

/// Parse, validate and encode the client request. Everything rejected here
/// is rejected before any upstream call.
fn prepare(
    state: &AppState,
    body: &[u8],
    started: Instant,
) -> Result<(ChatContext, bool), GatewayError> {
    let request: OpenAiChatRequest = serde_json::from_slice(body)
        .map_err(|err| GatewayError::Validation(format!("invalid request body: {err}")))?;
    state.catalog.validate_request(&request)?;

    let upstream_request = encode_gemini_request(&request, &state.config.thinking)?;
    let upstream_body = serde_json::to_vec(&upstream_request)
        .map(Bytes::from)
        .map_err(|err| GatewayError::Internal(format!("failed to encode upstream request: {err}")))?;

    let ctx = ChatContext {
        request_id: state.next_completion_id(),
        created: unix_now_secs(),
        user_text: latest_user_text(&request),
        estimated_prompt_tokens: estimate_request_tokens(&request),
        upstream_body,
        started,
        model: request.model.clone(),
    };
    Ok((ctx, request.is_stream()))
}
