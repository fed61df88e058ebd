pub mod anthropic;
pub mod error;
pub mod google;
pub mod openai;
pub mod registry;
pub mod sse;

use async_trait::async_trait;
use futures::stream::Stream;
use std::pin::Pin;

use crate::models::{ChatTurn, CompletionResponse, StreamChunk, UsageTotals};
use error::ProviderError;

pub use anthropic::AnthropicClient;
pub use google::GoogleClient;
pub use openai::OpenAiClient;
pub use registry::ClientRegistry;

/// Sampling defaults applied when a request leaves them unset.
pub const DEFAULT_TEMPERATURE: f32 = 0.7;
pub const DEFAULT_MAX_TOKENS: u32 = 1000;

/// A finite stream of canonical chunks. The stream itself is infallible:
/// provider failures are folded into a terminal error chunk.
pub type ChunkStream = Pin<Box<dyn Stream<Item = StreamChunk> + Send>>;

/// Result of a streaming call: either a live chunk stream or a single
/// terminal error chunk for failures detected before streaming began.
pub enum StreamOutcome {
    Stream(ChunkStream),
    Failed(StreamChunk),
}

impl StreamOutcome {
    pub fn failed(err: &ProviderError) -> Self {
        StreamOutcome::Failed(error_chunk(err, String::new()))
    }
}

/// Normalized parameters for one completion call, provider-agnostic.
#[derive(Debug, Clone)]
pub struct CompletionParams {
    pub messages: Vec<ChatTurn>,
    pub model: Option<String>,
    pub system_prompt: Option<String>,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
}

impl CompletionParams {
    /// History with empty-content assistant turns removed; some vendor APIs
    /// reject those.
    pub fn filtered_messages(&self) -> Vec<&ChatTurn> {
        self.messages
            .iter()
            .filter(|turn| !turn.is_empty_assistant())
            .collect()
    }

    pub fn temperature_or_default(&self) -> f32 {
        self.temperature.unwrap_or(DEFAULT_TEMPERATURE)
    }

    pub fn max_tokens_or_default(&self) -> u32 {
        self.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS)
    }
}

/// Uniform capability contract over the vendor SDK-style HTTP clients.
///
/// Clients are constructible without credentials; a missing key surfaces as
/// a ConfigurationError from every call rather than a construction failure,
/// so callers can probe per call. Neither method ever returns or yields a
/// raw error: failures arrive as error-flagged canonical values.
#[async_trait]
pub trait LlmClient: Send + Sync {
    fn name(&self) -> &'static str;

    /// Whether the underlying credential is present.
    fn is_configured(&self) -> bool;

    /// One-shot completion. Errors come back as an error-flagged response.
    async fn complete(&self, params: CompletionParams) -> CompletionResponse;

    /// Streaming completion. Pre-stream failures come back as
    /// `StreamOutcome::Failed`; mid-stream failures end the stream with a
    /// terminal error chunk.
    async fn stream(&self, params: CompletionParams) -> StreamOutcome;
}

/// Convert a provider error into the canonical error response shape.
pub fn error_response(err: &ProviderError, model_name: &str) -> CompletionResponse {
    CompletionResponse {
        error: true,
        content: None,
        finish_reason: None,
        usage: None,
        model_name: model_name.to_string(),
        raw_response: None,
        message: Some(err.to_string()),
        error_type: Some(err.type_name().to_string()),
        status_code: err.status_code(),
        error_code: err.error_code().map(str::to_string),
    }
}

/// Convert a provider error into a terminal error chunk, preserving any
/// content accumulated before the failure.
pub fn error_chunk(err: &ProviderError, accumulated: String) -> StreamChunk {
    StreamChunk {
        error: true,
        delta: None,
        is_final: true,
        accumulated_content: accumulated,
        finish_reason: Some("ERROR".to_string()),
        usage: None,
        model_name: None,
        message: Some(err.to_string()),
        error_type: Some(err.type_name().to_string()),
        status_code: err.status_code(),
        error_code: err.error_code().map(str::to_string),
    }
}

/// Streaming accumulator shared by the provider wrappers.
///
/// Tracks the running concatenation of text deltas plus the final-chunk
/// metadata captured along the way, and mints chunks that uphold the
/// exactly-one-final and accumulation invariants.
#[derive(Debug, Default)]
pub struct StreamState {
    accumulated: String,
    pub finish_reason: Option<String>,
    pub usage: Option<UsageTotals>,
    pub model_name: Option<String>,
}

impl StreamState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn accumulated(&self) -> &str {
        &self.accumulated
    }

    /// Record a text delta and mint the chunk to emit for it.
    pub fn push_delta(&mut self, text: &str) -> StreamChunk {
        self.accumulated.push_str(text);
        StreamChunk::delta(text, self.accumulated.clone())
    }

    /// The terminal summary chunk after the vendor stream is exhausted.
    pub fn into_final(self) -> StreamChunk {
        StreamChunk::finished(self.accumulated, self.finish_reason, self.usage, self.model_name)
    }

    /// The terminal error chunk for a mid-stream failure.
    pub fn into_error(self, err: &ProviderError) -> StreamChunk {
        let mut chunk = error_chunk(err, self.accumulated);
        chunk.model_name = self.model_name;
        chunk
    }
}
