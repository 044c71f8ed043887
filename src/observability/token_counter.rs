use std::time::Duration;

use serde_json::Value;
use tracing::info;

use crate::protocol::openai_chat::OpenAiChatRequest;
use crate::stream::UsageSnapshot;

/// Estimate the number of tokens in a text of `len` bytes.
///
/// Uses a lightweight heuristic (`bytes / 4`) to avoid loading model BPE tables.
#[must_use]
pub fn estimate_tokens_for_len(len: usize) -> u64 {
    (len as u64).div_ceil(4)
}

#[must_use]
pub fn estimate_tokens(text: &str) -> u64 {
    estimate_tokens_for_len(text.len())
}

/// Estimate the input tokens of a chat request from its text parts.
/// Images are not counted.
#[must_use]
pub fn estimate_request_tokens(request: &OpenAiChatRequest) -> u64 {
    request
        .messages
        .iter()
        .filter_map(|message| message.content.as_ref())
        .map(|content| match content {
            Value::String(text) => estimate_tokens(text),
            Value::Array(items) => items
                .iter()
                .filter_map(|item| item.get("text").and_then(Value::as_str))
                .map(estimate_tokens)
                .sum(),
            _ => 0,
        })
        .sum()
}

/// Merge upstream-reported usage with local estimates.
///
/// Non-zero upstream values always win; missing or zero fields are filled
/// from the estimates and the total is recomputed when absent.
#[must_use]
pub fn merge_usage(
    upstream: Option<UsageSnapshot>,
    estimated_prompt: u64,
    estimated_completion: u64,
) -> UsageSnapshot {
    let upstream = upstream.unwrap_or_default();
    let prompt_tokens = match upstream.prompt_tokens {
        0 => estimated_prompt,
        v => v,
    };
    let completion_tokens = match upstream.completion_tokens {
        0 => estimated_completion,
        v => v,
    };
    let total_tokens = match upstream.total_tokens {
        0 => prompt_tokens + completion_tokens + upstream.reasoning_tokens.unwrap_or(0),
        v => v,
    };
    UsageSnapshot {
        prompt_tokens,
        completion_tokens,
        total_tokens,
        reasoning_tokens: upstream.reasoning_tokens,
    }
}

/// Log token usage for a completed request at INFO level.
pub fn log_request_usage(request_id: &str, model: &str, usage: &UsageSnapshot, duration: Duration) {
    info!(
        request_id = request_id,
        model = model,
        prompt_tokens = usage.prompt_tokens,
        completion_tokens = usage.completion_tokens,
        reasoning_tokens = usage.reasoning_tokens.unwrap_or(0),
        total_tokens = usage.total_tokens,
        duration_seconds = duration.as_secs_f64(),
        "request completed"
    );
}
