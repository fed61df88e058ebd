use async_trait::async_trait;
use futures::StreamExt;
use reqwest::{header, Client};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

use super::error::ProviderError;
use super::sse::SseStream;
use super::{
    error_response, CompletionParams, LlmClient, StreamOutcome, StreamState,
};
use crate::models::{ChatTurn, CompletionResponse, UsageTotals};

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
const DEFAULT_MODEL: &str = "gpt-4o";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

/// Client for the OpenAI-style chat-completions API.
pub struct OpenAiClient {
    api_key: Option<String>,
    base_url: String,
    default_model: String,
    // Builder failures (e.g. TLS init) are kept and surfaced per call, the
    // same way a missing key is.
    client: Result<Client, String>,
}

impl OpenAiClient {
    pub fn new(
        api_key: Option<String>,
        base_url: Option<String>,
        default_model: Option<String>,
    ) -> Self {
        Self {
            api_key,
            base_url: base_url.unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            default_model: default_model.unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            client: Client::builder()
                .timeout(REQUEST_TIMEOUT)
                .build()
                .map_err(|e| e.to_string()),
        }
    }

    fn key(&self) -> Result<&str, ProviderError> {
        self.api_key.as_deref().ok_or_else(|| {
            ProviderError::Configuration("OpenAI API key not configured".to_string())
        })
    }

    fn http(&self) -> Result<&Client, ProviderError> {
        self.client.as_ref().map_err(|e| {
            ProviderError::Configuration(format!("HTTP client initialization failed: {}", e))
        })
    }

    /// Map turns to the vendor message shape. The system prompt becomes a
    /// synthetic leading system message, but only when the history does not
    /// already carry one.
    fn convert_messages(&self, params: &CompletionParams) -> Vec<OpenAiMessage> {
        let mut out = Vec::new();

        if let Some(ref prompt) = params.system_prompt {
            if !params.messages.iter().any(ChatTurn::is_system) {
                out.push(OpenAiMessage {
                    role: "system",
                    content: Some(prompt.clone()),
                    name: None,
                    function_call: None,
                });
            }
        }

        for turn in params.filtered_messages() {
            out.push(match turn {
                ChatTurn::System { content } => OpenAiMessage {
                    role: "system",
                    content: Some(content.clone()),
                    name: None,
                    function_call: None,
                },
                ChatTurn::User { content } => OpenAiMessage {
                    role: "user",
                    content: Some(content.clone()),
                    name: None,
                    function_call: None,
                },
                ChatTurn::Assistant {
                    content,
                    function_call,
                } => OpenAiMessage {
                    role: "assistant",
                    content: content.clone(),
                    name: None,
                    function_call: function_call.as_ref().map(|fc| OpenAiFunctionCall {
                        name: fc.name.clone(),
                        arguments: fc.arguments.clone(),
                    }),
                },
                ChatTurn::FunctionResult { name, content } => OpenAiMessage {
                    role: "function",
                    content: content.clone(),
                    name: Some(name.clone()),
                    function_call: None,
                },
            });
        }

        out
    }

    fn build_request(&self, params: &CompletionParams, stream: bool) -> OpenAiRequest {
        OpenAiRequest {
            model: params
                .model
                .clone()
                .unwrap_or_else(|| self.default_model.clone()),
            messages: self.convert_messages(params),
            temperature: params.temperature_or_default(),
            max_tokens: params.max_tokens_or_default(),
            stream,
        }
    }

    async fn send(&self, request: &OpenAiRequest) -> Result<reqwest::Response, ProviderError> {
        let key = self.key()?;
        let url = format!("{}/chat/completions", self.base_url);
        let response = self
            .http()?
            .post(&url)
            .header(header::AUTHORIZATION, format!("Bearer {}", key))
            .json(request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(api_error_from_body(status.as_u16(), body));
        }
        Ok(response)
    }
}

#[async_trait]
impl LlmClient for OpenAiClient {
    fn name(&self) -> &'static str {
        "openai"
    }

    fn is_configured(&self) -> bool {
        self.api_key.is_some()
    }

    async fn complete(&self, params: CompletionParams) -> CompletionResponse {
        let request = self.build_request(&params, false);
        debug!(model = %request.model, "openai complete");

        let result: Result<CompletionResponse, ProviderError> = async {
            let response = self.send(&request).await?;
            let raw: serde_json::Value = response
                .json()
                .await
                .map_err(|e| ProviderError::Parsing(e.to_string()))?;
            let parsed: OpenAiResponse = serde_json::from_value(raw.clone())
                .map_err(|e| ProviderError::Parsing(e.to_string()))?;

            let choice = parsed
                .choices
                .into_iter()
                .next()
                .ok_or_else(|| ProviderError::Parsing("response had no choices".to_string()))?;

            Ok(CompletionResponse::success(
                choice.message.content,
                choice.finish_reason,
                parsed.usage.map(UsageTotals::from),
                parsed.model,
                Some(raw),
            ))
        }
        .await;

        result.unwrap_or_else(|e| error_response(&e, &request.model))
    }

    async fn stream(&self, params: CompletionParams) -> StreamOutcome {
        let request = self.build_request(&params, true);
        debug!(model = %request.model, "openai stream");

        let response = match self.send(&request).await {
            Ok(r) => r,
            Err(e) => return StreamOutcome::failed(&e),
        };

        let mut events = SseStream::new(Box::pin(response.bytes_stream()));
        let stream = async_stream::stream! {
            let mut state = StreamState::new();

            while let Some(event) = events.next().await {
                let event = match event {
                    Ok(ev) => ev,
                    Err(e) => {
                        yield state.into_error(&e);
                        return;
                    }
                };

                if event.data == "[DONE]" {
                    break;
                }

                let chunk: OpenAiStreamChunk = match serde_json::from_str(&event.data) {
                    Ok(c) => c,
                    Err(e) => {
                        let err = ProviderError::Parsing(format!(
                            "bad stream chunk: {} (data: {})",
                            e, event.data
                        ));
                        yield state.into_error(&err);
                        return;
                    }
                };

                if !chunk.model.is_empty() {
                    state.model_name = Some(chunk.model);
                }
                if let Some(usage) = chunk.usage {
                    // Only present when the vendor reports final totals.
                    state.usage = Some(UsageTotals::from(usage));
                }
                if let Some(choice) = chunk.choices.into_iter().next() {
                    if let Some(reason) = choice.finish_reason {
                        state.finish_reason = Some(reason);
                    }
                    if let Some(text) = choice.delta.content {
                        if !text.is_empty() {
                            yield state.push_delta(&text);
                        }
                    }
                }
            }

            yield state.into_final();
        };

        StreamOutcome::Stream(Box::pin(stream))
    }
}

/// Pull the human-readable message and error code out of a vendor error
/// body when it has the documented `{"error": {...}}` shape.
fn api_error_from_body(status: u16, body: String) -> ProviderError {
    if let Ok(value) = serde_json::from_str::<serde_json::Value>(&body) {
        if let Some(err) = value.get("error") {
            let message = err
                .get("message")
                .and_then(|m| m.as_str())
                .unwrap_or(&body)
                .to_string();
            let error_code = err
                .get("code")
                .and_then(|c| c.as_str())
                .map(str::to_string);
            return match status {
                429 => ProviderError::RateLimited {
                    message,
                    status,
                    error_code: error_code.or(Some("rate_limit_exceeded".to_string())),
                },
                408 | 504 => ProviderError::Timeout(message),
                _ => ProviderError::Api {
                    status,
                    message,
                    error_code,
                },
            };
        }
    }
    ProviderError::from_status(status, body)
}

// Vendor wire types

#[derive(Debug, Serialize)]
struct OpenAiRequest {
    model: String,
    messages: Vec<OpenAiMessage>,
    temperature: f32,
    max_tokens: u32,
    stream: bool,
}

#[derive(Debug, Serialize)]
struct OpenAiMessage {
    role: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    function_call: Option<OpenAiFunctionCall>,
}

#[derive(Debug, Serialize)]
struct OpenAiFunctionCall {
    name: String,
    arguments: String,
}

#[derive(Debug, Deserialize)]
struct OpenAiResponse {
    model: String,
    choices: Vec<OpenAiChoice>,
    usage: Option<OpenAiUsage>,
}

#[derive(Debug, Deserialize)]
struct OpenAiChoice {
    message: OpenAiResponseMessage,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OpenAiResponseMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OpenAiUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
    #[serde(default)]
    total_tokens: u32,
}

impl From<OpenAiUsage> for UsageTotals {
    fn from(u: OpenAiUsage) -> Self {
        UsageTotals {
            prompt_tokens: u.prompt_tokens,
            completion_tokens: u.completion_tokens,
            total_tokens: u.total_tokens,
        }
    }
}

#[derive(Debug, Deserialize)]
struct OpenAiStreamChunk {
    #[serde(default)]
    model: String,
    #[serde(default)]
    choices: Vec<OpenAiStreamChoice>,
    #[serde(default)]
    usage: Option<OpenAiUsage>,
}

#[derive(Debug, Deserialize)]
struct OpenAiStreamChoice {
    delta: OpenAiStreamDelta,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct OpenAiStreamDelta {
    #[serde(default)]
    content: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(messages: Vec<ChatTurn>, system_prompt: Option<&str>) -> CompletionParams {
        CompletionParams {
            messages,
            model: None,
            system_prompt: system_prompt.map(str::to_string),
            temperature: None,
            max_tokens: None,
        }
    }

    #[test]
    fn system_prompt_injected_as_leading_message() {
        let client = OpenAiClient::new(Some("k".into()), None, None);
        let converted =
            client.convert_messages(&params(vec![ChatTurn::user("Hi")], Some("Be terse.")));
        assert_eq!(converted.len(), 2);
        assert_eq!(converted[0].role, "system");
        assert_eq!(converted[0].content.as_deref(), Some("Be terse."));
        assert_eq!(converted[1].role, "user");
    }

    #[test]
    fn system_prompt_not_duplicated_when_history_has_one() {
        let client = OpenAiClient::new(Some("k".into()), None, None);
        let converted = client.convert_messages(&params(
            vec![ChatTurn::system("Existing."), ChatTurn::user("Hi")],
            Some("Be terse."),
        ));
        assert_eq!(converted.len(), 2);
        assert_eq!(converted[0].content.as_deref(), Some("Existing."));
    }

    #[test]
    fn empty_assistant_turns_excluded_from_request() {
        let client = OpenAiClient::new(Some("k".into()), None, None);
        let converted = client.convert_messages(&params(
            vec![
                ChatTurn::user("Hi"),
                ChatTurn::Assistant {
                    content: None,
                    function_call: None,
                },
            ],
            None,
        ));
        assert_eq!(converted.len(), 1);
    }

    #[test]
    fn unconfigured_client_is_probed_per_call() {
        let client = OpenAiClient::new(None, None, None);
        assert!(!client.is_configured());
        assert_eq!(
            client.key().unwrap_err().type_name(),
            "ConfigurationError"
        );
    }

    #[tokio::test]
    async fn failed_client_construction_surfaces_per_call() {
        let mut client = OpenAiClient::new(Some("k".into()), None, None);
        client.client = Err("tls backend unavailable".to_string());

        let response = client.complete(params(vec![ChatTurn::user("Hi")], None)).await;
        assert!(response.error);
        assert_eq!(response.error_type.as_deref(), Some("ConfigurationError"));
        assert!(response
            .message
            .as_deref()
            .unwrap()
            .contains("tls backend unavailable"));

        match client.stream(params(vec![ChatTurn::user("Hi")], None)).await {
            StreamOutcome::Failed(chunk) => {
                assert!(chunk.error);
                assert!(chunk.is_final);
                assert_eq!(chunk.error_type.as_deref(), Some("ConfigurationError"));
            }
            StreamOutcome::Stream(_) => panic!("expected up-front failure"),
        }
    }

    #[test]
    fn vendor_error_body_is_unwrapped() {
        let body = r#"{"error":{"message":"quota exceeded","code":"insufficient_quota"}}"#;
        let err = api_error_from_body(429, body.to_string());
        assert_eq!(err.type_name(), "RateLimitError");
        assert_eq!(err.error_code(), Some("insufficient_quota"));
        assert!(err.to_string().contains("quota exceeded"));
    }
}
