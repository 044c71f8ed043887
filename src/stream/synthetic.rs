use std::time::Duration;

use futures_util::Stream;

use crate::config::ThinkingConfig;
use crate::util::truncate_chars_with_ellipsis;

const EMPTY_PREVIEW: &str = "(no text)";

/// Build the canned reasoning narrative around a preview of the user's text.
#[must_use]
pub fn build_narrative(user_text: &str, preview_chars: usize) -> String {
    let collapsed = user_text.split_whitespace().collect::<Vec<_>>().join(" ");
    let preview = if collapsed.is_empty() {
        EMPTY_PREVIEW.to_string()
    } else {
        truncate_chars_with_ellipsis(&collapsed, preview_chars)
    };
    format!(
        "The user wrote: \"{preview}\". \
         First I should work out what is actually being asked. \
         Then I will check the details that matter for a correct answer. \
         Finally I will put the answer together clearly."
    )
}

fn is_break_char(ch: char) -> bool {
    ch.is_whitespace() || ch.is_ascii_punctuation()
}

/// Split `text` into chunks of roughly `target_chars` characters.
///
/// A chunk ends just after a whitespace or punctuation character within half
/// a target of the ideal cut, nearest first and earlier on ties. Without such
/// a boundary the chunk is cut at exactly `target_chars`.
#[must_use]
pub fn split_for_delivery(text: &str, target_chars: usize) -> Vec<String> {
    let target = target_chars.max(1);
    let slack = (target / 2).max(1);
    let mut chunks = Vec::new();
    let mut rest = text;
    while !rest.is_empty() {
        let window: Vec<(usize, char)> = rest.char_indices().take(target + slack + 1).collect();
        if window.len() <= target {
            chunks.push(rest.to_string());
            break;
        }
        let cut = nearest_break(&window, target - 1, slack).unwrap_or(window[target].0);
        chunks.push(rest[..cut].to_string());
        rest = &rest[cut..];
    }
    chunks
}

fn nearest_break(window: &[(usize, char)], ideal: usize, slack: usize) -> Option<usize> {
    let end_after = |pos: usize| {
        let (offset, ch) = window[pos];
        offset + ch.len_utf8()
    };
    for distance in 0..=slack {
        if let Some(pos) = ideal.checked_sub(distance) {
            if is_break_char(window[pos].1) {
                return Some(end_after(pos));
            }
        }
        let pos = ideal + distance;
        if distance > 0 && pos < window.len() && is_break_char(window[pos].1) {
            return Some(end_after(pos));
        }
    }
    None
}

/// Chunked synthetic reasoning for one request.
#[derive(Debug, Clone)]
pub struct SyntheticReasoning {
    chunks: Vec<String>,
    delay: Duration,
}

impl SyntheticReasoning {
    #[must_use]
    pub fn new(config: &ThinkingConfig, user_text: &str) -> Self {
        let narrative = build_narrative(user_text, config.synthetic_preview_chars);
        Self {
            chunks: split_for_delivery(&narrative, config.synthetic_chunk_chars),
            delay: Duration::from_millis(config.synthetic_delay_ms),
        }
    }

    #[must_use]
    pub fn chunks(&self) -> &[String] {
        &self.chunks
    }

    /// Yield the chunks in order with the configured delay between them.
    pub fn into_stream(self) -> impl Stream<Item = String> + Send {
        let delay = self.delay;
        futures_util::stream::unfold(
            (self.chunks.into_iter(), false),
            move |(mut chunks, started)| async move {
                let chunk = chunks.next()?;
                if started && !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                Some((chunk, (chunks, true)))
            },
        )
    }
}
