use crate::config::ThinkingDelivery;
use crate::protocol::gemini::GeminiResponse;

use super::classify::{classify_event, ClassifiedEvent, UsageSnapshot};
use super::serializer::ChunkSerializer;
use super::thinking::{DeltaFragment, Emissions, ThinkingChannel, ThoughtOrigin};

/// Text delivered in the content channel when a stream fails after the
/// response headers went out.
#[must_use]
pub fn inline_error_text(message: &str) -> String {
    format!("\n\n[Error: {message}]")
}

/// Classifier, thinking channel and serializer for one downstream stream.
///
/// Every `push_*` method appends complete SSE frames to `out`.
#[derive(Debug)]
pub struct StreamTranslator {
    channel: ThinkingChannel,
    serializer: ChunkSerializer,
    usage: Option<UsageSnapshot>,
    emissions: Emissions,
    content_chunks: usize,
    emitted_bytes: usize,
}

impl StreamTranslator {
    #[must_use]
    pub fn new(id: String, created: u64, model: String, delivery: ThinkingDelivery) -> Self {
        Self {
            channel: ThinkingChannel::new(delivery),
            serializer: ChunkSerializer::new(id, created, model),
            usage: None,
            emissions: Emissions::new(),
            content_chunks: 0,
            emitted_bytes: 0,
        }
    }

    #[must_use]
    pub fn model(&self) -> &str {
        self.serializer.model()
    }

    pub fn set_model(&mut self, model: &str) {
        self.serializer.set_model(model);
    }

    /// Latest usage reported upstream; later snapshots replace earlier ones.
    #[must_use]
    pub fn usage(&self) -> Option<UsageSnapshot> {
        self.usage
    }

    /// Number of content-bearing chunks written so far.
    #[must_use]
    pub fn content_chunks(&self) -> usize {
        self.content_chunks
    }

    /// Bytes of delta text emitted so far, delimiters included.
    #[must_use]
    pub fn emitted_bytes(&self) -> usize {
        self.emitted_bytes
    }

    /// Classify and translate one upstream event. Returns the in-band error
    /// message if the event carried one.
    pub fn push_event(&mut self, event: &GeminiResponse, out: &mut String) -> Option<String> {
        self.push_classified(classify_event(event), out)
    }

    pub fn push_classified(&mut self, classified: ClassifiedEvent, out: &mut String) -> Option<String> {
        if classified.usage.is_some() {
            self.usage = classified.usage;
        }
        for fragment in classified.fragments {
            self.channel.on_fragment(fragment, &mut self.emissions);
        }
        self.drain_emissions(out);
        classified.error
    }

    pub fn push_synthetic(&mut self, chunk: String, out: &mut String) {
        self.channel
            .on_thought(chunk, ThoughtOrigin::Synthetic, &mut self.emissions);
        self.drain_emissions(out);
    }

    /// Plain text injected by the gateway itself, such as the fallback notice.
    pub fn push_text(&mut self, text: String, out: &mut String) {
        self.channel.on_text(text, &mut self.emissions);
        self.drain_emissions(out);
    }

    pub fn push_inline_error(&mut self, message: &str, out: &mut String) {
        self.push_text(inline_error_text(message), out);
    }

    pub fn push_finish(&mut self, out: &mut String) {
        self.serializer.push_finish(out);
    }

    fn drain_emissions(&mut self, out: &mut String) {
        for delta in self.emissions.drain(..) {
            self.emitted_bytes += delta_text(&delta).len();
            let before = out.len();
            self.serializer.push_delta(&delta, out);
            if out.len() > before {
                self.content_chunks += 1;
            }
        }
    }
}

fn delta_text(delta: &DeltaFragment) -> &str {
    match delta {
        DeltaFragment::Content(text) | DeltaFragment::Reasoning(text) => text,
    }
}

/// Collapse deltas into `(content, reasoning)` strings.
pub fn append_delta(delta: &DeltaFragment, content: &mut String, reasoning: &mut String) {
    match delta {
        DeltaFragment::Content(text) => content.push_str(text),
        DeltaFragment::Reasoning(text) => reasoning.push_str(text),
    }
}
