pub mod dispatch;

use std::sync::Arc;

use rustc_hash::FxHashMap;

use crate::config::{AppConfig, FallbackConfig};
use crate::error::GatewayError;
use crate::protocol::gemini::encoder::request_has_images;
use crate::protocol::openai_chat::OpenAiChatRequest;

/// Capabilities of one configured model.
#[derive(Debug, Clone)]
pub struct ModelEntry {
    pub id: Arc<str>,
    pub vision: bool,
    pub fallback: Option<Arc<str>>,
}

/// Model capability table built once from config.
///
/// Models absent from the table are forwarded as-is, with no fallback and
/// no capability checks.
#[derive(Debug, Clone)]
pub struct ModelCatalog {
    entries: Vec<ModelEntry>,
    index: FxHashMap<Arc<str>, usize>,
    fallback_enabled: bool,
}

impl ModelCatalog {
    #[must_use]
    pub fn new(config: &AppConfig) -> Self {
        let mut entries = Vec::with_capacity(config.models.len());
        let mut index = FxHashMap::default();
        for model in &config.models {
            let id: Arc<str> = Arc::from(model.id.as_str());
            index.insert(Arc::clone(&id), entries.len());
            entries.push(ModelEntry {
                id,
                vision: model.vision,
                fallback: model.fallback.as_deref().map(Arc::from),
            });
        }
        Self {
            entries,
            index,
            fallback_enabled: config.fallback.enabled,
        }
    }

    #[must_use]
    pub fn get(&self, model: &str) -> Option<&ModelEntry> {
        self.index.get(model).map(|&idx| &self.entries[idx])
    }

    #[must_use]
    pub fn entries(&self) -> &[ModelEntry] {
        &self.entries
    }

    /// The substitute to use when `model` is rate limited, if any.
    #[must_use]
    pub fn fallback_for(&self, model: &str) -> Option<Arc<str>> {
        if !self.fallback_enabled {
            return None;
        }
        self.get(model).and_then(|entry| entry.fallback.clone())
    }

    /// Reject requests the target model cannot serve, before any upstream call.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::Validation`] for an empty message list or for
    /// image parts sent to a model without vision support.
    pub fn validate_request(&self, request: &OpenAiChatRequest) -> Result<(), GatewayError> {
        if request.model.trim().is_empty() {
            return Err(GatewayError::Validation("model is required".to_string()));
        }
        if request.messages.is_empty() {
            return Err(GatewayError::Validation(
                "messages cannot be empty".to_string(),
            ));
        }
        if let Some(entry) = self.get(&request.model) {
            if !entry.vision && request_has_images(request) {
                return Err(GatewayError::Validation(format!(
                    "model '{}' does not support image input",
                    entry.id
                )));
            }
        }
        Ok(())
    }
}

/// Render the fallback notice for a switch from `from` to `to`.
#[must_use]
pub fn render_fallback_notice(config: &FallbackConfig, from: &str, to: &str) -> String {
    config
        .notice_template
        .replace("{from}", from)
        .replace("{to}", to)
}
