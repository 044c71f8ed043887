use std::sync::LazyLock;

use regex_lite::Regex;
use smallvec::SmallVec;

use crate::protocol::gemini::{GeminiResponse, GeminiResponsePart, GeminiUsageMetadata};

pub const LEGACY_THINK_OPEN: &str = "<think>";

static LEGACY_THINK_PAIR: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"(?s)<think>(.*?)</think>").ok());

/// A classified unit of upstream content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContentFragment {
    Text(String),
    Thought(String),
}

impl ContentFragment {
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            ContentFragment::Text(text) | ContentFragment::Thought(text) => text,
        }
    }
}

/// The kind of a raw upstream part, decided once per part.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PartKind<'a> {
    /// Explicitly flagged `thought: true`.
    Thought(&'a str),
    /// Text carrying an inline `<think>…</think>` pair.
    MixedTagged(&'a str),
    Text(&'a str),
}

/// Token counts reported by the upstream.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UsageSnapshot {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
    pub reasoning_tokens: Option<u64>,
}

impl UsageSnapshot {
    #[must_use]
    pub fn from_metadata(meta: &GeminiUsageMetadata) -> Self {
        let prompt_tokens = meta.prompt_token_count.unwrap_or(0);
        let completion_tokens = meta.candidates_token_count.unwrap_or(0);
        let reasoning_tokens = meta.thoughts_token_count;
        let total_tokens = meta.total_token_count.unwrap_or(
            prompt_tokens + completion_tokens + reasoning_tokens.unwrap_or(0),
        );
        Self {
            prompt_tokens,
            completion_tokens,
            total_tokens,
            reasoning_tokens,
        }
    }
}

/// Everything one upstream event contributes to the downstream response.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClassifiedEvent {
    pub fragments: SmallVec<[ContentFragment; 4]>,
    pub usage: Option<UsageSnapshot>,
    /// In-band upstream error message, if the event carried one.
    pub error: Option<String>,
}

/// Decide the kind of a single upstream part. Parts without text, or with
/// empty text, carry nothing.
#[must_use]
pub fn tag_part(part: &GeminiResponsePart) -> Option<PartKind<'_>> {
    let text = part.text.as_deref()?;
    if text.is_empty() {
        return None;
    }
    if part.thought == Some(true) {
        return Some(PartKind::Thought(text));
    }
    if text.contains(LEGACY_THINK_OPEN) {
        return Some(PartKind::MixedTagged(text));
    }
    Some(PartKind::Text(text))
}

/// Split a legacy tagged part with one non-greedy match of the tag pair.
///
/// The inner text becomes a thought, the remainder (tags removed, trimmed)
/// becomes text. Without a closing tag the part stays opaque text.
pub fn split_legacy_tagged(text: &str, out: &mut SmallVec<[ContentFragment; 4]>) {
    let captures = LEGACY_THINK_PAIR
        .as_ref()
        .and_then(|pattern| pattern.captures(text));
    let Some(captures) = captures else {
        tracing::debug!(
            len = text.len(),
            "unterminated legacy thinking tag kept as plain text"
        );
        out.push(ContentFragment::Text(text.to_string()));
        return;
    };
    let (Some(whole), Some(inner)) = (captures.get(0), captures.get(1)) else {
        out.push(ContentFragment::Text(text.to_string()));
        return;
    };
    if !inner.as_str().is_empty() {
        out.push(ContentFragment::Thought(inner.as_str().to_string()));
    }
    let mut rest = String::with_capacity(text.len() - whole.len());
    rest.push_str(&text[..whole.start()]);
    rest.push_str(&text[whole.end()..]);
    let rest = rest.trim();
    if !rest.is_empty() {
        out.push(ContentFragment::Text(rest.to_string()));
    }
}

/// Classify one upstream event into ordered fragments plus usage.
#[must_use]
pub fn classify_event(event: &GeminiResponse) -> ClassifiedEvent {
    let mut classified = ClassifiedEvent {
        usage: event.usage_metadata.as_ref().map(UsageSnapshot::from_metadata),
        error: event.error.as_ref().map(|err| err.message.clone()),
        ..ClassifiedEvent::default()
    };

    let parts = event
        .candidates
        .iter()
        .flatten()
        .filter_map(|candidate| candidate.content.as_ref())
        .flat_map(|content| content.parts.iter());

    for part in parts {
        match tag_part(part) {
            Some(PartKind::Thought(text)) => classified
                .fragments
                .push(ContentFragment::Thought(text.to_string())),
            Some(PartKind::MixedTagged(text)) => {
                split_legacy_tagged(text, &mut classified.fragments);
            }
            Some(PartKind::Text(text)) => classified
                .fragments
                .push(ContentFragment::Text(text.to_string())),
            None => {}
        }
    }
    classified
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(json: &str) -> GeminiResponse {
        serde_json::from_str(json).unwrap()
    }

    fn fragments(json: &str) -> Vec<ContentFragment> {
        classify_event(&event(json)).fragments.into_vec()
    }

    #[test]
    fn test_legacy_tag_splits_thought_then_text() {
        let got = fragments(
            r#"{"candidates":[{"content":{"parts":[{"text":"<think>A</think>B"}]}}]}"#,
        );
        assert_eq!(
            got,
            vec![
                ContentFragment::Thought("A".into()),
                ContentFragment::Text("B".into())
            ]
        );
    }

    #[test]
    fn test_legacy_tag_remainder_is_trimmed() {
        let got = fragments(
            r#"{"candidates":[{"content":{"parts":[{"text":"  <think>plan\nsteps</think>\n\n answer "}]}}]}"#,
        );
        assert_eq!(
            got,
            vec![
                ContentFragment::Thought("plan\nsteps".into()),
                ContentFragment::Text("answer".into())
            ]
        );
    }

    #[test]
    fn test_legacy_tag_only_thought() {
        let got = fragments(
            r#"{"candidates":[{"content":{"parts":[{"text":"<think>only</think>"}]}}]}"#,
        );
        assert_eq!(got, vec![ContentFragment::Thought("only".into())]);
    }

    #[test]
    fn test_legacy_tag_non_greedy_single_match() {
        let got = fragments(
            r#"{"candidates":[{"content":{"parts":[{"text":"<think>a</think>b<think>c</think>"}]}}]}"#,
        );
        assert_eq!(
            got,
            vec![
                ContentFragment::Thought("a".into()),
                ContentFragment::Text("b<think>c</think>".into())
            ]
        );
    }

    #[test]
    fn test_unterminated_tag_is_opaque_text() {
        let got = fragments(
            r#"{"candidates":[{"content":{"parts":[{"text":"<think>never closed"}]}}]}"#,
        );
        assert_eq!(
            got,
            vec![ContentFragment::Text("<think>never closed".into())]
        );
    }

    #[test]
    fn test_thought_flag_wins_over_tags() {
        let got = fragments(
            r#"{"candidates":[{"content":{"parts":[{"text":"<think>x</think>","thought":true}]}}]}"#,
        );
        assert_eq!(got, vec![ContentFragment::Thought("<think>x</think>".into())]);
    }

    #[test]
    fn test_order_preserved_and_empty_parts_skipped() {
        let got = fragments(
            r#"{"candidates":[{"content":{"parts":[
                {"text":"t1","thought":true},
                {"text":""},
                {"inlineData":{"mimeType":"image/png","data":"AA"}},
                {"text":"hello"},
                {"text":"t2","thought":true}
            ]}}]}"#,
        );
        assert_eq!(
            got,
            vec![
                ContentFragment::Thought("t1".into()),
                ContentFragment::Text("hello".into()),
                ContentFragment::Thought("t2".into()),
            ]
        );
    }

    #[test]
    fn test_thought_false_is_text() {
        let got = fragments(
            r#"{"candidates":[{"content":{"parts":[{"text":"hi","thought":false}]}}]}"#,
        );
        assert_eq!(got, vec![ContentFragment::Text("hi".into())]);
    }

    #[test]
    fn test_usage_alongside_fragments() {
        let classified = classify_event(&event(
            r#"{"candidates":[{"content":{"parts":[{"text":"x"}]}}],
                "usageMetadata":{"promptTokenCount":10,"candidatesTokenCount":4,"thoughtsTokenCount":6,"totalTokenCount":20}}"#,
        ));
        assert_eq!(classified.fragments.len(), 1);
        assert_eq!(
            classified.usage,
            Some(UsageSnapshot {
                prompt_tokens: 10,
                completion_tokens: 4,
                total_tokens: 20,
                reasoning_tokens: Some(6),
            })
        );
    }

    #[test]
    fn test_usage_total_derived_when_missing() {
        let usage = UsageSnapshot::from_metadata(&GeminiUsageMetadata {
            prompt_token_count: Some(3),
            candidates_token_count: Some(5),
            thoughts_token_count: None,
            total_token_count: None,
        });
        assert_eq!(usage.total_tokens, 8);
    }

    #[test]
    fn test_in_band_error_surfaced() {
        let classified = classify_event(&event(
            r#"{"error":{"code":500,"message":"backend exploded","status":"INTERNAL"}}"#,
        ));
        assert!(classified.fragments.is_empty());
        assert_eq!(classified.error.as_deref(), Some("backend exploded"));
    }

    #[test]
    fn test_tag_part_kinds() {
        let thought = GeminiResponsePart {
            text: Some("x".into()),
            thought: Some(true),
        };
        let mixed = GeminiResponsePart {
            text: Some("<think>y</think>".into()),
            thought: None,
        };
        let empty = GeminiResponsePart::default();
        assert_eq!(tag_part(&thought), Some(PartKind::Thought("x")));
        assert_eq!(
            tag_part(&mixed),
            Some(PartKind::MixedTagged("<think>y</think>"))
        );
        assert_eq!(tag_part(&empty), None);
    }
}
