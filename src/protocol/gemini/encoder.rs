use serde_json::Value;

use crate::config::ThinkingConfig;
use crate::error::GatewayError;
use crate::protocol::gemini::{
    GeminiBlob, GeminiContent, GeminiFileData, GeminiGenerationConfig, GeminiPart, GeminiRequest,
    GeminiThinkingConfig,
};
use crate::protocol::openai_chat::{OpenAiChatRequest, OpenAiMessage};

/// Encode an `OpenAI` chat request into a generateContent request.
///
/// # Errors
///
/// Returns [`GatewayError::Validation`] for unknown roles, unsupported
/// content parts, malformed `data:` URLs, or a conversation without any
/// user or assistant turn.
pub fn encode_gemini_request(
    request: &OpenAiChatRequest,
    thinking: &ThinkingConfig,
) -> Result<GeminiRequest, GatewayError> {
    let mut system_parts = Vec::new();
    let mut contents: Vec<GeminiContent> = Vec::with_capacity(request.messages.len());

    for message in &request.messages {
        let role = match message.role.as_str() {
            "system" | "developer" => {
                system_parts.extend(message_parts(message)?);
                continue;
            }
            "user" | "tool" => "user",
            "assistant" => "model",
            other => {
                return Err(GatewayError::Validation(format!(
                    "unsupported message role '{other}'"
                )))
            }
        };
        let parts = message_parts(message)?;
        if parts.is_empty() {
            continue;
        }
        // Adjacent turns with the same role are merged into one content.
        match contents.last_mut() {
            Some(last) if last.role.as_deref() == Some(role) => last.parts.extend(parts),
            _ => contents.push(GeminiContent {
                role: Some(role.to_string()),
                parts,
            }),
        }
    }

    if contents.is_empty() {
        return Err(GatewayError::Validation(
            "messages must contain at least one user or assistant message".to_string(),
        ));
    }

    let system_instruction = (!system_parts.is_empty()).then(|| GeminiContent {
        role: None,
        parts: system_parts,
    });

    Ok(GeminiRequest {
        contents,
        system_instruction,
        generation_config: generation_config(request, thinking),
    })
}

fn generation_config(
    request: &OpenAiChatRequest,
    thinking: &ThinkingConfig,
) -> Option<GeminiGenerationConfig> {
    let thinking_config = thinking.real.then(|| GeminiThinkingConfig {
        include_thoughts: true,
        thinking_budget: thinking.budget_tokens,
    });
    let config = GeminiGenerationConfig {
        temperature: request.temperature,
        top_p: request.top_p,
        max_output_tokens: request.max_completion_tokens.or(request.max_tokens),
        stop_sequences: request.stop.clone().map(|stop| stop.into_vec()),
        thinking_config,
    };
    let is_empty = config.temperature.is_none()
        && config.top_p.is_none()
        && config.max_output_tokens.is_none()
        && config.stop_sequences.is_none()
        && config.thinking_config.is_none();
    (!is_empty).then_some(config)
}

fn message_parts(message: &OpenAiMessage) -> Result<Vec<GeminiPart>, GatewayError> {
    match &message.content {
        None | Some(Value::Null) => Ok(Vec::new()),
        Some(Value::String(text)) => Ok(if text.is_empty() {
            Vec::new()
        } else {
            vec![GeminiPart::Text(text.clone())]
        }),
        Some(Value::Array(items)) => {
            let mut parts = Vec::with_capacity(items.len());
            for item in items {
                if let Some(part) = content_item_part(item)? {
                    parts.push(part);
                }
            }
            Ok(parts)
        }
        Some(_) => Err(GatewayError::Validation(
            "message content must be a string or an array of parts".to_string(),
        )),
    }
}

fn content_item_part(item: &Value) -> Result<Option<GeminiPart>, GatewayError> {
    match item.get("type").and_then(Value::as_str) {
        Some("text") => Ok(item
            .get("text")
            .and_then(Value::as_str)
            .filter(|text| !text.is_empty())
            .map(|text| GeminiPart::Text(text.to_string()))),
        Some("image_url") => {
            let url = image_url_of(item).ok_or_else(|| {
                GatewayError::Validation("image_url part is missing its url".to_string())
            })?;
            image_part(url).map(Some)
        }
        Some(other) => Err(GatewayError::Validation(format!(
            "unsupported content part type '{other}'"
        ))),
        None => Err(GatewayError::Validation(
            "content part is missing its type".to_string(),
        )),
    }
}

fn image_url_of(item: &Value) -> Option<&str> {
    match item.get("image_url")? {
        Value::String(url) => Some(url),
        Value::Object(obj) => obj.get("url").and_then(Value::as_str),
        _ => None,
    }
}

fn image_part(url: &str) -> Result<GeminiPart, GatewayError> {
    let Some(rest) = url.strip_prefix("data:") else {
        return Ok(GeminiPart::FileData(GeminiFileData {
            mime_type: None,
            file_uri: url.to_string(),
        }));
    };
    let (meta, data) = rest
        .split_once(',')
        .ok_or_else(|| GatewayError::Validation("malformed data URL".to_string()))?;
    let mime_type = meta
        .strip_suffix(";base64")
        .ok_or_else(|| GatewayError::Validation("data URL must be base64 encoded".to_string()))?;
    if mime_type.is_empty() || data.is_empty() {
        return Err(GatewayError::Validation("malformed data URL".to_string()));
    }
    Ok(GeminiPart::InlineData(GeminiBlob {
        mime_type: mime_type.to_string(),
        data: data.to_string(),
    }))
}

/// Whether any message carries an image part.
#[must_use]
pub fn request_has_images(request: &OpenAiChatRequest) -> bool {
    request.messages.iter().any(|message| match &message.content {
        Some(Value::Array(items)) => items
            .iter()
            .any(|item| item.get("type").and_then(Value::as_str) == Some("image_url")),
        _ => false,
    })
}

/// Text of the most recent user message, parts joined with a space.
#[must_use]
pub fn latest_user_text(request: &OpenAiChatRequest) -> String {
    let Some(message) = request.messages.iter().rev().find(|m| m.role == "user") else {
        return String::new();
    };
    match &message.content {
        Some(Value::String(text)) => text.clone(),
        Some(Value::Array(items)) => items
            .iter()
            .filter(|item| item.get("type").and_then(Value::as_str) == Some("text"))
            .filter_map(|item| item.get("text").and_then(Value::as_str))
            .collect::<Vec<_>>()
            .join(" "),
        _ => String::new(),
    }
}
