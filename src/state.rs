mod request_id;

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;

use crate::auth::{authenticate, build_allowed_key_set, AllowedClientKeys};
use crate::config::AppConfig;
use crate::credentials::{build_credential_provider, CredentialProvider};
use crate::error::GatewayError;
use crate::protocol::openai_chat::{OpenAiModel, OpenAiModelList};
use crate::routing::ModelCatalog;
use crate::transport::{HttpTransport, UpstreamTransport};
use crate::util::unix_now_secs;

use request_id::RequestIdGenerator;

const MODEL_OWNER: &str = "gemini-bridge";

/// Shared application state accessible to all handlers.
pub struct AppState {
    pub config: AppConfig,
    pub transport: Arc<dyn UpstreamTransport>,
    pub credentials: Arc<dyn CredentialProvider>,
    pub catalog: ModelCatalog,
    allowed_client_keys: AllowedClientKeys,
    request_ids: RequestIdGenerator,
    models_response_body: Bytes,
}

impl AppState {
    /// Wire the production transport and credential provider from config.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::Transport`] when the HTTP client cannot be built.
    pub fn from_config(config: AppConfig) -> Result<Self, GatewayError> {
        let transport = HttpTransport::new(&config.server, &config.upstream)?;
        let credentials = build_credential_provider(&config.credentials, transport.client().clone());
        Ok(Self::new(config, Arc::new(transport), credentials))
    }

    /// Build state around injected upstream collaborators.
    #[must_use]
    pub fn new(
        config: AppConfig,
        transport: Arc<dyn UpstreamTransport>,
        credentials: Arc<dyn CredentialProvider>,
    ) -> Self {
        let catalog = ModelCatalog::new(&config);
        let allowed_client_keys = build_allowed_key_set(&config.client_authentication);
        let models_response_body = build_models_response_body(&catalog);
        Self {
            config,
            transport,
            credentials,
            catalog,
            allowed_client_keys,
            request_ids: RequestIdGenerator::new(),
            models_response_body,
        }
    }

    /// Authenticate an incoming request using the prebuilt key index.
    ///
    /// # Errors
    ///
    /// Returns `GatewayError::Auth` when the API key is missing or invalid.
    pub fn authenticate(&self, headers: &http::HeaderMap) -> Result<(), GatewayError> {
        authenticate(headers, &self.allowed_client_keys)
    }

    #[must_use]
    pub fn next_completion_id(&self) -> String {
        self.request_ids.next_completion_id()
    }

    /// Upper bound on silence between upstream reads, `None` when disabled.
    #[must_use]
    pub fn upstream_idle_timeout(&self) -> Option<Duration> {
        match self.config.server.upstream_idle_timeout_secs {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        }
    }

    #[must_use]
    pub fn models_response_body(&self) -> Bytes {
        self.models_response_body.clone()
    }
}

fn build_models_response_body(catalog: &ModelCatalog) -> Bytes {
    let created = unix_now_secs();
    let list = OpenAiModelList {
        object: "list".to_string(),
        data: catalog
            .entries()
            .iter()
            .map(|entry| OpenAiModel {
                id: entry.id.to_string(),
                object: "model".to_string(),
                created,
                owned_by: MODEL_OWNER.to_string(),
            })
            .collect(),
    };
    match serde_json::to_vec(&list) {
        Ok(body) => Bytes::from(body),
        Err(err) => {
            tracing::error!("failed to serialize model list: {err}");
            Bytes::from_static(br#"{"object":"list","data":[]}"#)
        }
    }
}
