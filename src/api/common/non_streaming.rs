use std::sync::Arc;

use axum::response::Response;
use bytes::Bytes;
use futures_util::StreamExt;

use crate::api::engine::{open_upstream, UpstreamCall};
use crate::config::ThinkingDelivery;
use crate::error::GatewayError;
use crate::observability::log_request_complete;
use crate::observability::token_counter::{estimate_tokens, merge_usage};
use crate::protocol::gemini::{GeminiResponse, UpstreamEnvelope};
use crate::protocol::openai_chat::{
    OpenAiChatResponse, OpenAiChoice, OpenAiCompletionTokensDetails, OpenAiResponseMessage,
    OpenAiUsage,
};
use crate::routing::render_fallback_notice;
use crate::state::AppState;
use crate::stream::translator::append_delta;
use crate::stream::{classify_event, upstream_event_stream, ThinkingChannel, UsageSnapshot};
use crate::transport::Endpoint;

use super::{ok_json_response, ChatContext};

/// Largest unary upstream body accepted.
const UNARY_BODY_LIMIT: usize = 32 * 1024 * 1024;

/// Buffered assistant output for one non-streaming response.
struct CompletionAccumulator {
    channel: ThinkingChannel,
    emissions: crate::stream::thinking::Emissions,
    content: String,
    reasoning: String,
    usage: Option<UsageSnapshot>,
}

impl CompletionAccumulator {
    fn new(delivery: ThinkingDelivery) -> Self {
        Self {
            channel: ThinkingChannel::new(delivery),
            emissions: crate::stream::thinking::Emissions::new(),
            content: String::new(),
            reasoning: String::new(),
            usage: None,
        }
    }

    /// Fold one upstream event in. Returns the in-band error message, if any.
    fn push_event(&mut self, event: &GeminiResponse) -> Option<String> {
        let classified = classify_event(event);
        if classified.usage.is_some() {
            self.usage = classified.usage;
        }
        for fragment in classified.fragments {
            self.channel.on_fragment(fragment, &mut self.emissions);
        }
        for delta in self.emissions.drain(..) {
            append_delta(&delta, &mut self.content, &mut self.reasoning);
        }
        classified.error
    }

    /// Close an open thinking section so the content never ends mid-section.
    fn finish(&mut self) {
        self.channel.close_into(&mut self.emissions);
        for delta in self.emissions.drain(..) {
            append_delta(&delta, &mut self.content, &mut self.reasoning);
        }
    }
}

struct Completion {
    model: Arc<str>,
    content: String,
    reasoning: String,
    usage: Option<UsageSnapshot>,
}

fn in_band_error(message: String) -> GatewayError {
    GatewayError::Upstream {
        status: 500,
        message,
    }
}

/// Serve a non-streaming chat completion.
///
/// The unary call never switches models itself: its rate limit is only
/// seen once the call failed, so the fallback is served by draining the
/// streaming endpoint for the fallback model and prefixing the notice.
///
/// # Errors
///
/// Returns the error that ended the upstream exchange.
pub(crate) async fn handle_non_streaming(
    state: &AppState,
    ctx: ChatContext,
) -> Result<Response, GatewayError> {
    let completion = match unary_completion(state, &ctx).await {
        Ok(completion) => completion,
        Err(err) if err.is_rate_limit() => {
            let Some(fallback) = state.catalog.fallback_for(&ctx.model) else {
                return Err(err);
            };
            tracing::warn!(
                request_id = %ctx.request_id,
                model = %ctx.model,
                fallback = &*fallback,
                "unary call rate limited, serving fallback model via stream"
            );
            let mut completion = streamed_completion(state, &ctx, &fallback).await?;
            let notice = render_fallback_notice(&state.config.fallback, &ctx.model, &fallback);
            completion.content.insert_str(0, &notice);
            completion
        }
        Err(err) => return Err(err),
    };

    let usage = merge_usage(
        completion.usage,
        ctx.estimated_prompt_tokens,
        estimate_tokens(&completion.content) + estimate_tokens(&completion.reasoning),
    );
    log_request_complete(&ctx.request_id, &completion.model, &usage, ctx.started);

    let body = build_response_body(&ctx, completion)?;
    Ok(ok_json_response(body))
}

async fn unary_completion(state: &AppState, ctx: &ChatContext) -> Result<Completion, GatewayError> {
    let established = open_upstream(
        state,
        UpstreamCall {
            request_id: &ctx.request_id,
            model: &ctx.model,
            body: &ctx.upstream_body,
            endpoint: Endpoint::Unary,
            allow_fallback: false,
        },
    )
    .await?;

    let text = established
        .reply
        .read_text(UNARY_BODY_LIMIT, state.upstream_idle_timeout())
        .await?;
    let envelope: UpstreamEnvelope = serde_json::from_str(&text).map_err(|err| {
        GatewayError::Protocol(format!("invalid upstream response body: {err}"))
    })?;

    let mut acc = CompletionAccumulator::new(state.config.thinking.delivery);
    if let Some(message) = acc.push_event(&envelope.into_response()) {
        return Err(in_band_error(message));
    }
    acc.finish();
    Ok(Completion {
        model: established.model,
        content: acc.content,
        reasoning: acc.reasoning,
        usage: acc.usage,
    })
}

async fn streamed_completion(
    state: &AppState,
    ctx: &ChatContext,
    model: &str,
) -> Result<Completion, GatewayError> {
    let established = open_upstream(
        state,
        UpstreamCall {
            request_id: &ctx.request_id,
            model,
            body: &ctx.upstream_body,
            endpoint: Endpoint::Stream,
            allow_fallback: false,
        },
    )
    .await?;

    let mut acc = CompletionAccumulator::new(state.config.thinking.delivery);
    let events = upstream_event_stream(established.reply.body, state.upstream_idle_timeout());
    let mut events = std::pin::pin!(events);
    while let Some(event) = events.next().await {
        if let Some(message) = acc.push_event(&event?) {
            return Err(in_band_error(message));
        }
    }
    acc.finish();
    Ok(Completion {
        model: established.model,
        content: acc.content,
        reasoning: acc.reasoning,
        usage: acc.usage,
    })
}

fn build_response_body(ctx: &ChatContext, completion: Completion) -> Result<Bytes, GatewayError> {
    let usage = completion.usage.map(|usage| OpenAiUsage {
        prompt_tokens: usage.prompt_tokens,
        completion_tokens: usage.completion_tokens,
        total_tokens: usage.total_tokens,
        completion_tokens_details: usage
            .reasoning_tokens
            .map(|reasoning_tokens| OpenAiCompletionTokensDetails { reasoning_tokens }),
    });
    let response = OpenAiChatResponse {
        id: ctx.request_id.clone(),
        object: "chat.completion".to_string(),
        created: ctx.created,
        model: completion.model.to_string(),
        choices: vec![OpenAiChoice {
            index: 0,
            message: OpenAiResponseMessage {
                role: "assistant".to_string(),
                content: completion.content,
                reasoning: (!completion.reasoning.is_empty()).then_some(completion.reasoning),
            },
            finish_reason: Some("stop".to_string()),
        }],
        usage,
    };
    serde_json::to_vec(&response)
        .map(Bytes::from)
        .map_err(|err| GatewayError::Internal(format!("failed to serialize response: {err}")))
}
