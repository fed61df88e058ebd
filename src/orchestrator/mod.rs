use futures::{Stream, StreamExt};
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, error, warn};

use crate::config::GenerationDefaults;
use crate::models::{ChatTurn, CompletionResponse, GenerateRequest, StreamChunk};
use crate::persistence::{MessageStore, NewMessage};
use crate::providers::{ClientRegistry, CompletionParams, StreamOutcome};
use crate::router::route;

/// Per-request context the HTTP layer resolves before generation.
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    pub user_id: Option<String>,
}

/// One event on the client-facing SSE wire.
#[derive(Debug, Clone)]
pub enum WireEvent {
    /// A canonical chunk, forwarded verbatim.
    Chunk(StreamChunk),
    /// A non-fatal notice; generation continues.
    Warning { message: String },
    /// A fatal error; always the last event of the stream.
    Fatal { message: String, error_type: String },
}

impl WireEvent {
    pub fn warning(message: impl Into<String>) -> Self {
        WireEvent::Warning {
            message: message.into(),
        }
    }

    pub fn fatal(message: impl Into<String>, error_type: impl Into<String>) -> Self {
        WireEvent::Fatal {
            message: message.into(),
            error_type: error_type.into(),
        }
    }

    /// Serialize to the `data: <json>\n\n` wire form.
    pub fn to_sse(&self) -> String {
        let json = match self {
            WireEvent::Chunk(chunk) => serde_json::to_string(chunk).unwrap_or_else(|e| {
                json!({
                    "error": true,
                    "message": format!("failed to serialize chunk: {}", e),
                    "type": "UnexpectedError",
                })
                .to_string()
            }),
            WireEvent::Warning { message } => {
                json!({"warning": true, "message": message}).to_string()
            }
            WireEvent::Fatal {
                message,
                error_type,
            } => json!({"error": true, "message": message, "type": error_type}).to_string(),
        };
        format!("data: {}\n\n", json)
    }
}

/// Drives a single generation: validates the conversation, persists the user
/// turn, routes to a provider, forwards the provider's chunk stream, and
/// persists the assistant turn when generation succeeded.
#[derive(Clone)]
pub struct Orchestrator {
    registry: Arc<ClientRegistry>,
    store: Arc<dyn MessageStore>,
    defaults: GenerationDefaults,
}

impl Orchestrator {
    pub fn new(
        registry: Arc<ClientRegistry>,
        store: Arc<dyn MessageStore>,
        defaults: GenerationDefaults,
    ) -> Self {
        Self {
            registry,
            store,
            defaults,
        }
    }

    fn params_for(&self, request: &GenerateRequest, local_model: String) -> CompletionParams {
        CompletionParams {
            messages: request.messages.clone(),
            model: Some(local_model),
            system_prompt: request.system_prompt.clone(),
            temperature: request.temperature.or(self.defaults.temperature),
            max_tokens: request.max_tokens.or(self.defaults.max_tokens),
        }
    }

    /// The streaming generation pass. Dropping the returned stream cancels
    /// the in-flight provider request.
    pub fn process(
        &self,
        request: GenerateRequest,
        ctx: RequestContext,
    ) -> impl Stream<Item = WireEvent> + Send + 'static {
        let this = self.clone();
        async_stream::stream! {
            let last_is_user = request
                .messages
                .last()
                .map(ChatTurn::is_user)
                .unwrap_or(false);
            if !last_is_user {
                yield WireEvent::fatal(
                    "Conversation must end with a user message",
                    "InvariantViolation",
                );
                return;
            }
            let user_text = request
                .messages
                .last()
                .and_then(ChatTurn::text)
                .unwrap_or_default()
                .to_string();

            if let Some(ref project_id) = request.project_id {
                let message = NewMessage::new(project_id.clone(), "user", user_text)
                    .with_user(ctx.user_id.clone());
                if let Err(e) = this.store.create(message).await {
                    warn!(error = %e, project_id = %project_id, "failed to persist user turn");
                    yield WireEvent::warning(format!(
                        "Failed to save your message; continuing with generation: {}",
                        e
                    ));
                }
            }

            let target = route(&request.model);
            let Some(kind) = target.provider else {
                yield WireEvent::fatal(
                    format!("Could not determine provider for model '{}'", request.model),
                    "RoutingError",
                );
                return;
            };
            debug!(provider = kind.as_str(), model = %target.local_model, "routed request");

            let client = this.registry.get(kind);
            let params = this.params_for(&request, target.local_model);
            let mut chunks = match client.stream(params).await {
                StreamOutcome::Stream(s) => s,
                StreamOutcome::Failed(chunk) => {
                    yield WireEvent::Chunk(chunk);
                    return;
                }
            };

            let mut accumulated = String::new();
            let mut model_name: Option<String> = None;
            let mut errored = false;
            while let Some(chunk) = chunks.next().await {
                if let Some(ref delta) = chunk.delta {
                    accumulated.push_str(delta);
                }
                if let Some(ref name) = chunk.model_name {
                    model_name = Some(name.clone());
                }
                if chunk.error {
                    errored = true;
                }
                yield WireEvent::Chunk(chunk);
            }

            if let Some(project_id) = request.project_id {
                if !errored && !accumulated.is_empty() {
                    let message = NewMessage::new(project_id.clone(), "assistant", accumulated)
                        .with_user(ctx.user_id)
                        .with_model(model_name);
                    if let Err(e) = this.store.create(message).await {
                        error!(error = %e, project_id = %project_id, "failed to persist assistant turn");
                    }
                }
            }
        }
    }

    /// Non-streaming pass: route and complete, no persistence.
    pub async fn complete(&self, request: GenerateRequest) -> CompletionResponse {
        let target = route(&request.model);
        let Some(kind) = target.provider else {
            return CompletionResponse {
                error: true,
                content: None,
                finish_reason: None,
                usage: None,
                model_name: request.model.clone(),
                raw_response: None,
                message: Some(format!(
                    "Could not determine provider for model '{}'",
                    request.model
                )),
                error_type: Some("RoutingError".to_string()),
                status_code: None,
                error_code: None,
            };
        };

        let client = self.registry.get(kind);
        let params = self.params_for(&request, target.local_model);
        client.complete(params).await
    }
}
