use crate::util::{push_json_string_escaped, push_u64_decimal};

use super::sse::DONE_FRAME;
use super::thinking::DeltaFragment;

const FINISH_REASON_STOP: &str = "stop";

/// Writes `chat.completion.chunk` SSE frames for one downstream stream.
///
/// `id` and `created` are fixed for the lifetime of the serializer. The
/// `role` field is attached to the first content-bearing chunk only.
#[derive(Debug)]
pub struct ChunkSerializer {
    id: String,
    created: u64,
    model: String,
    role_sent: bool,
}

impl ChunkSerializer {
    #[must_use]
    pub fn new(id: String, created: u64, model: String) -> Self {
        Self {
            id,
            created,
            model,
            role_sent: false,
        }
    }

    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    #[must_use]
    pub fn created(&self) -> u64 {
        self.created
    }

    #[must_use]
    pub fn model(&self) -> &str {
        &self.model
    }

    /// Echo a substituted model in every later chunk.
    pub fn set_model(&mut self, model: &str) {
        model.clone_into(&mut self.model);
    }

    #[must_use]
    pub fn role_sent(&self) -> bool {
        self.role_sent
    }

    /// Append one delta chunk frame to `out`. Empty deltas produce nothing.
    pub fn push_delta(&mut self, delta: &DeltaFragment, out: &mut String) {
        let (field, text) = match delta {
            DeltaFragment::Content(text) => ("content", text.as_str()),
            DeltaFragment::Reasoning(text) => ("reasoning", text.as_str()),
        };
        if text.is_empty() {
            return;
        }
        out.reserve(160 + self.id.len() + self.model.len() + text.len());
        self.push_prefix(out);
        out.push_str(",\"choices\":[{\"index\":0,\"delta\":{");
        if !self.role_sent {
            self.role_sent = true;
            out.push_str("\"role\":\"assistant\",");
        }
        out.push('"');
        out.push_str(field);
        out.push_str("\":");
        push_json_string_escaped(out, text);
        out.push_str("},\"finish_reason\":null}],\"usage\":null}\n\n");
    }

    /// Append the terminal pair: an empty-delta chunk with the stop marker,
    /// then the `[DONE]` sentinel.
    pub fn push_finish(&self, out: &mut String) {
        out.reserve(160 + self.id.len() + self.model.len());
        self.push_prefix(out);
        out.push_str(",\"choices\":[{\"index\":0,\"delta\":{},\"finish_reason\":");
        push_json_string_escaped(out, FINISH_REASON_STOP);
        out.push_str("}],\"usage\":null}\n\n");
        out.push_str(DONE_FRAME);
    }

    fn push_prefix(&self, out: &mut String) {
        out.push_str("data: {\"id\":");
        push_json_string_escaped(out, &self.id);
        out.push_str(",\"object\":\"chat.completion.chunk\",\"created\":");
        push_u64_decimal(out, self.created);
        out.push_str(",\"model\":");
        push_json_string_escaped(out, &self.model);
    }
}
