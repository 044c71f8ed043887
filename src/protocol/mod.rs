pub(crate) mod error_shapes;
pub mod gemini;
pub mod openai_chat;
