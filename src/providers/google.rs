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

const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";
const DEFAULT_MODEL: &str = "gemini-1.5-flash-latest";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

/// Client for the Gemini generateContent API.
pub struct GoogleClient {
    api_key: Option<String>,
    base_url: String,
    default_model: String,
    // Builder failures are kept and surfaced per call.
    client: Result<Client, String>,
}

impl GoogleClient {
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
            ProviderError::Configuration("Google API key not configured".to_string())
        })
    }

    fn http(&self) -> Result<&Client, ProviderError> {
        self.client.as_ref().map_err(|e| {
            ProviderError::Configuration(format!("HTTP client initialization failed: {}", e))
        })
    }

    /// Gemini speaks user/model roles and takes system text as a separate
    /// systemInstruction block. Assistant turns map to the model role and
    /// system turns join the instruction text.
    fn convert_messages(
        &self,
        params: &CompletionParams,
    ) -> (Option<GeminiContent>, Vec<GeminiContent>) {
        let mut instruction_parts: Vec<String> = Vec::new();
        if let Some(ref prompt) = params.system_prompt {
            instruction_parts.push(prompt.clone());
        }

        let mut contents = Vec::new();
        for turn in params.filtered_messages() {
            match turn {
                ChatTurn::System { content } => instruction_parts.push(content.clone()),
                ChatTurn::User { content } => {
                    contents.push(GeminiContent::text("user", content.clone()))
                }
                ChatTurn::Assistant { content, .. } => {
                    if let Some(text) = content {
                        contents.push(GeminiContent::text("model", text.clone()));
                    }
                }
                ChatTurn::FunctionResult { content, .. } => {
                    if let Some(text) = content {
                        contents.push(GeminiContent::text("user", text.clone()));
                    }
                }
            }
        }

        let instruction = if instruction_parts.is_empty() {
            None
        } else {
            Some(GeminiContent {
                role: None,
                parts: vec![GeminiPart {
                    text: instruction_parts.join("\n\n"),
                }],
            })
        };
        (instruction, contents)
    }

    fn build_request(&self, params: &CompletionParams) -> (String, GeminiRequest) {
        let (instruction, contents) = self.convert_messages(params);
        let model = params
            .model
            .clone()
            .unwrap_or_else(|| self.default_model.clone());
        let request = GeminiRequest {
            contents,
            system_instruction: instruction,
            generation_config: GeminiGenerationConfig {
                temperature: params.temperature_or_default(),
                max_output_tokens: params.max_tokens_or_default(),
            },
        };
        (model, request)
    }

    async fn send(
        &self,
        model: &str,
        request: &GeminiRequest,
        stream: bool,
    ) -> Result<reqwest::Response, ProviderError> {
        let key = self.key()?;
        let url = if stream {
            format!(
                "{}/models/{}:streamGenerateContent?alt=sse&key={}",
                self.base_url, model, key
            )
        } else {
            format!("{}/models/{}:generateContent?key={}", self.base_url, model, key)
        };
        let response = self.http()?.post(&url).json(request).send().await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(api_error_from_body(status.as_u16(), body));
        }
        Ok(response)
    }
}

#[async_trait]
impl LlmClient for GoogleClient {
    fn name(&self) -> &'static str {
        "google"
    }

    fn is_configured(&self) -> bool {
        self.api_key.is_some()
    }

    async fn complete(&self, params: CompletionParams) -> CompletionResponse {
        let (model, request) = self.build_request(&params);
        debug!(model = %model, "google complete");

        let result: Result<CompletionResponse, ProviderError> = async {
            let response = self.send(&model, &request, false).await?;
            let raw: serde_json::Value = response
                .json()
                .await
                .map_err(|e| ProviderError::Parsing(e.to_string()))?;
            let parsed: GeminiResponse = serde_json::from_value(raw.clone())
                .map_err(|e| ProviderError::Parsing(e.to_string()))?;

            let model_name = parsed.model_version.clone().unwrap_or_else(|| model.clone());
            let usage = parsed.usage_metadata.map(UsageTotals::from);

            if let Some(reason) = parsed
                .prompt_feedback
                .as_ref()
                .and_then(|f| f.block_reason.as_deref())
            {
                return Ok(CompletionResponse::success(
                    None,
                    Some(format!("BLOCKED_{}", reason)),
                    usage,
                    model_name,
                    Some(raw),
                ));
            }

            let candidate = parsed
                .candidates
                .into_iter()
                .next()
                .ok_or_else(|| ProviderError::Parsing("response had no candidates".to_string()))?;
            let text: String = candidate
                .content
                .map(|c| c.parts.into_iter().map(|p| p.text).collect())
                .unwrap_or_default();

            Ok(CompletionResponse::success(
                if text.is_empty() { None } else { Some(text) },
                candidate.finish_reason,
                usage,
                model_name,
                Some(raw),
            ))
        }
        .await;

        result.unwrap_or_else(|e| error_response(&e, &model))
    }

    async fn stream(&self, params: CompletionParams) -> StreamOutcome {
        let (model, request) = self.build_request(&params);
        debug!(model = %model, "google stream");

        let response = match self.send(&model, &request, true).await {
            Ok(r) => r,
            Err(e) => return StreamOutcome::failed(&e),
        };

        let mut events = SseStream::new(Box::pin(response.bytes_stream()));
        let stream = async_stream::stream! {
            let mut state = StreamState::new();
            state.model_name = Some(model);

            while let Some(event) = events.next().await {
                let event = match event {
                    Ok(ev) => ev,
                    Err(e) => {
                        yield state.into_error(&e);
                        return;
                    }
                };

                let chunk: GeminiResponse = match serde_json::from_str(&event.data) {
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

                if let Some(version) = chunk.model_version {
                    state.model_name = Some(version);
                }
                // Each chunk reports totals so far, so the latest wins.
                if let Some(usage) = chunk.usage_metadata {
                    state.usage = Some(UsageTotals::from(usage));
                }

                if let Some(reason) = chunk
                    .prompt_feedback
                    .as_ref()
                    .and_then(|f| f.block_reason.as_deref())
                {
                    state.finish_reason = Some(format!("BLOCKED_{}", reason));
                    continue;
                }

                if let Some(candidate) = chunk.candidates.into_iter().next() {
                    if let Some(reason) = candidate.finish_reason {
                        state.finish_reason = Some(reason);
                    }
                    if let Some(content) = candidate.content {
                        let text: String =
                            content.parts.into_iter().map(|p| p.text).collect();
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

fn api_error_from_body(status: u16, body: String) -> ProviderError {
    if let Ok(value) = serde_json::from_str::<serde_json::Value>(&body) {
        if let Some(err) = value.get("error") {
            let message = err
                .get("message")
                .and_then(|m| m.as_str())
                .unwrap_or(&body)
                .to_string();
            let error_code = err
                .get("status")
                .and_then(|s| s.as_str())
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
#[serde(rename_all = "camelCase")]
struct GeminiRequest {
    contents: Vec<GeminiContent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<GeminiContent>,
    generation_config: GeminiGenerationConfig,
}

#[derive(Debug, Serialize)]
struct GeminiContent {
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<&'static str>,
    parts: Vec<GeminiPart>,
}

impl GeminiContent {
    fn text(role: &'static str, text: String) -> Self {
        Self {
            role: Some(role),
            parts: vec![GeminiPart { text }],
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct GeminiPart {
    #[serde(default)]
    text: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiGenerationConfig {
    temperature: f32,
    max_output_tokens: u32,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<GeminiCandidate>,
    #[serde(default)]
    usage_metadata: Option<GeminiUsage>,
    #[serde(default)]
    prompt_feedback: Option<GeminiPromptFeedback>,
    #[serde(default)]
    model_version: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiCandidate {
    #[serde(default)]
    content: Option<GeminiCandidateContent>,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GeminiCandidateContent {
    #[serde(default)]
    parts: Vec<GeminiPart>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiUsage {
    #[serde(default)]
    prompt_token_count: u32,
    #[serde(default)]
    candidates_token_count: u32,
    #[serde(default)]
    total_token_count: u32,
}

impl From<GeminiUsage> for UsageTotals {
    fn from(u: GeminiUsage) -> Self {
        UsageTotals {
            prompt_tokens: u.prompt_token_count,
            completion_tokens: u.candidates_token_count,
            total_tokens: u.total_token_count,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiPromptFeedback {
    #[serde(default)]
    block_reason: Option<String>,
}
