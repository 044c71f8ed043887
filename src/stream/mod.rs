//! Streaming translation core: upstream SSE bytes in, OpenAI chunk frames out.

pub mod classify;
pub mod serializer;
pub mod sse;
pub mod synthetic;
pub mod thinking;
pub mod translator;

pub use classify::{classify_event, ClassifiedEvent, ContentFragment, UsageSnapshot};
pub use serializer::ChunkSerializer;
pub use sse::{json_event_stream, upstream_event_stream, SseParser, DONE_FRAME};
pub use synthetic::SyntheticReasoning;
pub use thinking::{DeltaFragment, ThinkingChannel, ThinkingState, ThoughtOrigin};
pub use translator::{inline_error_text, StreamTranslator};
