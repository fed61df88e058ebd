use async_trait::async_trait;
use futures::StreamExt;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

use super::error::ProviderError;
use super::sse::SseStream;
use super::{
    error_response, CompletionParams, LlmClient, StreamOutcome, StreamState,
};
use crate::models::{ChatTurn, CompletionResponse, UsageTotals};

const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";
const DEFAULT_MODEL: &str = "claude-3-5-sonnet-20240620";
const API_VERSION: &str = "2023-06-01";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

/// Client for the Anthropic Messages API.
pub struct AnthropicClient {
    api_key: Option<String>,
    base_url: String,
    default_model: String,
    // Builder failures are kept and surfaced per call.
    client: Result<Client, String>,
}

impl AnthropicClient {
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
            ProviderError::Configuration("Anthropic API key not configured".to_string())
        })
    }

    fn http(&self) -> Result<&Client, ProviderError> {
        self.client.as_ref().map_err(|e| {
            ProviderError::Configuration(format!("HTTP client initialization failed: {}", e))
        })
    }

    /// The Messages API takes system text as a top-level field and only
    /// user/assistant roles in the message list. System turns in the history
    /// are hoisted into that field, after the explicit system prompt.
    fn convert_messages(
        &self,
        params: &CompletionParams,
    ) -> (Option<String>, Vec<AnthropicMessage>) {
        let mut system_parts: Vec<String> = Vec::new();
        if let Some(ref prompt) = params.system_prompt {
            system_parts.push(prompt.clone());
        }

        let mut messages = Vec::new();
        for turn in params.filtered_messages() {
            match turn {
                ChatTurn::System { content } => system_parts.push(content.clone()),
                ChatTurn::User { content } => messages.push(AnthropicMessage {
                    role: "user",
                    content: content.clone(),
                }),
                ChatTurn::Assistant { content, .. } => {
                    if let Some(text) = content {
                        messages.push(AnthropicMessage {
                            role: "assistant",
                            content: text.clone(),
                        });
                    }
                }
                ChatTurn::FunctionResult { content, .. } => {
                    if let Some(text) = content {
                        messages.push(AnthropicMessage {
                            role: "user",
                            content: text.clone(),
                        });
                    }
                }
            }
        }

        let system = if system_parts.is_empty() {
            None
        } else {
            Some(system_parts.join("\n\n"))
        };
        (system, messages)
    }

    fn build_request(&self, params: &CompletionParams, stream: bool) -> AnthropicRequest {
        let (system, messages) = self.convert_messages(params);
        AnthropicRequest {
            model: params
                .model
                .clone()
                .unwrap_or_else(|| self.default_model.clone()),
            messages,
            system,
            temperature: params.temperature_or_default(),
            max_tokens: params.max_tokens_or_default(),
            stream,
        }
    }

    async fn send(&self, request: &AnthropicRequest) -> Result<reqwest::Response, ProviderError> {
        let key = self.key()?;
        let url = format!("{}/v1/messages", self.base_url);
        let response = self
            .http()?
            .post(&url)
            .header("x-api-key", key)
            .header("anthropic-version", API_VERSION)
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
impl LlmClient for AnthropicClient {
    fn name(&self) -> &'static str {
        "anthropic"
    }

    fn is_configured(&self) -> bool {
        self.api_key.is_some()
    }

    async fn complete(&self, params: CompletionParams) -> CompletionResponse {
        let request = self.build_request(&params, false);
        debug!(model = %request.model, "anthropic complete");

        let result: Result<CompletionResponse, ProviderError> = async {
            let response = self.send(&request).await?;
            let raw: serde_json::Value = response
                .json()
                .await
                .map_err(|e| ProviderError::Parsing(e.to_string()))?;
            let parsed: AnthropicResponse = serde_json::from_value(raw.clone())
                .map_err(|e| ProviderError::Parsing(e.to_string()))?;

            let text: String = parsed
                .content
                .iter()
                .filter_map(|block| block.text.as_deref())
                .collect();

            Ok(CompletionResponse::success(
                if text.is_empty() { None } else { Some(text) },
                parsed.stop_reason,
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
        debug!(model = %request.model, "anthropic stream");

        let response = match self.send(&request).await {
            Ok(r) => r,
            Err(e) => return StreamOutcome::failed(&e),
        };

        let mut events = SseStream::new(Box::pin(response.bytes_stream()));
        let stream = async_stream::stream! {
            let mut state = StreamState::new();
            // Prompt tokens arrive at message_start, output tokens as a
            // cumulative count on each message_delta.
            let mut prompt_tokens: u32 = 0;
            let mut output_tokens: u32 = 0;
            let mut saw_usage = false;

            while let Some(event) = events.next().await {
                let event = match event {
                    Ok(ev) => ev,
                    Err(e) => {
                        yield state.into_error(&e);
                        return;
                    }
                };

                let parsed: AnthropicStreamEvent = match serde_json::from_str(&event.data) {
                    Ok(p) => p,
                    Err(e) => {
                        let err = ProviderError::Parsing(format!(
                            "bad stream event: {} (data: {})",
                            e, event.data
                        ));
                        yield state.into_error(&err);
                        return;
                    }
                };

                match parsed {
                    AnthropicStreamEvent::MessageStart { message } => {
                        state.model_name = Some(message.model);
                        if let Some(usage) = message.usage {
                            prompt_tokens = usage.input_tokens.unwrap_or(0);
                            saw_usage = true;
                        }
                    }
                    AnthropicStreamEvent::ContentBlockDelta { delta } => {
                        if let Some(text) = delta.text {
                            if !text.is_empty() {
                                yield state.push_delta(&text);
                            }
                        }
                    }
                    AnthropicStreamEvent::MessageDelta { delta, usage } => {
                        if let Some(reason) = delta.and_then(|d| d.stop_reason) {
                            state.finish_reason = Some(reason);
                        }
                        if let Some(usage) = usage {
                            if let Some(out) = usage.output_tokens {
                                output_tokens = out;
                                saw_usage = true;
                            }
                        }
                    }
                    AnthropicStreamEvent::Error { error } => {
                        let err = ProviderError::Unexpected {
                            type_name: "APIError".to_string(),
                            message: format!("{} ({})", error.message, error.error_type),
                        };
                        yield state.into_error(&err);
                        return;
                    }
                    AnthropicStreamEvent::MessageStop => break,
                    AnthropicStreamEvent::Other => {}
                }
            }

            if saw_usage {
                state.usage = Some(UsageTotals {
                    prompt_tokens,
                    completion_tokens: output_tokens,
                    total_tokens: prompt_tokens + output_tokens,
                });
            }
            yield state.into_final();
        };

        StreamOutcome::Stream(Box::pin(stream))
    }
}

fn api_error_from_body(status: u16, body: String) -> ProviderError {
    if let Ok(value) = serde_json::from_str::<serde_json::Value>(&body) {
        if let Some(err) = value.get("error") {
            let message = err
                .get("message")
                .and_then(|m| m.as_str())
                .unwrap_or(&body)
                .to_string();
            let error_code = err
                .get("type")
                .and_then(|t| t.as_str())
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
struct AnthropicRequest {
    model: String,
    messages: Vec<AnthropicMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    temperature: f32,
    max_tokens: u32,
    stream: bool,
}

#[derive(Debug, Serialize)]
struct AnthropicMessage {
    role: &'static str,
    content: String,
}

#[derive(Debug, Deserialize)]
struct AnthropicResponse {
    model: String,
    #[serde(default)]
    content: Vec<AnthropicContentBlock>,
    #[serde(default)]
    stop_reason: Option<String>,
    #[serde(default)]
    usage: Option<AnthropicUsage>,
}

#[derive(Debug, Deserialize)]
struct AnthropicContentBlock {
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AnthropicUsage {
    #[serde(default)]
    input_tokens: Option<u32>,
    #[serde(default)]
    output_tokens: Option<u32>,
}

impl From<AnthropicUsage> for UsageTotals {
    fn from(u: AnthropicUsage) -> Self {
        let prompt = u.input_tokens.unwrap_or(0);
        let completion = u.output_tokens.unwrap_or(0);
        UsageTotals {
            prompt_tokens: prompt,
            completion_tokens: completion,
            total_tokens: prompt + completion,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum AnthropicStreamEvent {
    MessageStart {
        message: AnthropicStreamMessage,
    },
    ContentBlockDelta {
        delta: AnthropicTextDelta,
    },
    MessageDelta {
        #[serde(default)]
        delta: Option<AnthropicStopDelta>,
        #[serde(default)]
        usage: Option<AnthropicUsage>,
    },
    MessageStop,
    Error {
        error: AnthropicStreamError,
    },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
struct AnthropicStreamMessage {
    model: String,
    #[serde(default)]
    usage: Option<AnthropicUsage>,
}

#[derive(Debug, Deserialize)]
struct AnthropicTextDelta {
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AnthropicStopDelta {
    #[serde(default)]
    stop_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AnthropicStreamError {
    #[serde(rename = "type")]
    error_type: String,
    message: String,
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
    fn system_turns_hoisted_into_system_field() {
        let client = AnthropicClient::new(Some("k".into()), None, None);
        let (system, messages) = client.convert_messages(&params(
            vec![ChatTurn::system("Rules."), ChatTurn::user("Hi")],
            Some("Be terse."),
        ));
        assert_eq!(system.as_deref(), Some("Be terse.\n\nRules."));
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].role, "user");
    }

    #[test]
    fn no_system_field_without_system_text() {
        let client = AnthropicClient::new(Some("k".into()), None, None);
        let (system, _) = client.convert_messages(&params(vec![ChatTurn::user("Hi")], None));
        assert!(system.is_none());
    }

    #[tokio::test]
    async fn failed_client_construction_surfaces_per_call() {
        let mut client = AnthropicClient::new(Some("k".into()), None, None);
        client.client = Err("tls backend unavailable".to_string());

        let response = client.complete(params(vec![ChatTurn::user("Hi")], None)).await;
        assert!(response.error);
        assert_eq!(response.error_type.as_deref(), Some("ConfigurationError"));
    }

    #[test]
    fn stream_event_tags_parse() {
        let start: AnthropicStreamEvent = serde_json::from_str(
            r#"{"type":"message_start","message":{"model":"claude-3-5-sonnet-20240620","usage":{"input_tokens":12}}}"#,
        )
        .unwrap();
        assert!(matches!(start, AnthropicStreamEvent::MessageStart { .. }));

        let ping: AnthropicStreamEvent = serde_json::from_str(r#"{"type":"ping"}"#).unwrap();
        assert!(matches!(ping, AnthropicStreamEvent::Other));

        let delta: AnthropicStreamEvent = serde_json::from_str(
            r#"{"type":"content_block_delta","index":0,"delta":{"type":"text_delta","text":"Hi"}}"#,
        )
        .unwrap();
        match delta {
            AnthropicStreamEvent::ContentBlockDelta { delta } => {
                assert_eq!(delta.text.as_deref(), Some("Hi"));
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }
}
