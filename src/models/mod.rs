use serde::{Deserialize, Serialize};

/// One conversation turn, tagged by role.
///
/// The wire shape is `{"role": "...", "content": ..., ...}`. Using a tagged
/// enum instead of an open map lets the provider adapters match exhaustively
/// on the turn kind.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(tag = "role", rename_all = "snake_case")]
pub enum ChatTurn {
    System {
        content: String,
    },
    User {
        content: String,
    },
    Assistant {
        content: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        function_call: Option<FunctionCall>,
    },
    /// Result of a tool/function invocation fed back into the conversation.
    #[serde(rename = "function")]
    FunctionResult {
        name: String,
        content: Option<String>,
    },
}

impl ChatTurn {
    pub fn user(content: impl Into<String>) -> Self {
        ChatTurn::User {
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        ChatTurn::Assistant {
            content: Some(content.into()),
            function_call: None,
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        ChatTurn::System {
            content: content.into(),
        }
    }

    pub fn is_user(&self) -> bool {
        matches!(self, ChatTurn::User { .. })
    }

    pub fn is_system(&self) -> bool {
        matches!(self, ChatTurn::System { .. })
    }

    /// True for assistant turns with no usable text. Some vendor APIs reject
    /// these, so history is filtered before sending.
    pub fn is_empty_assistant(&self) -> bool {
        match self {
            ChatTurn::Assistant { content, .. } => {
                content.as_deref().map(str::is_empty).unwrap_or(true)
            }
            _ => false,
        }
    }

    pub fn text(&self) -> Option<&str> {
        match self {
            ChatTurn::System { content } | ChatTurn::User { content } => Some(content),
            ChatTurn::Assistant { content, .. } | ChatTurn::FunctionResult { content, .. } => {
                content.as_deref()
            }
        }
    }
}

/// A function/tool call recorded on an assistant turn.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct FunctionCall {
    pub name: String,
    /// Arguments as a JSON-encoded string, matching the vendor convention.
    pub arguments: String,
}

/// Input to the generation orchestrator.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GenerateRequest {
    pub messages: Vec<ChatTurn>,
    pub model: String,
    #[serde(default)]
    pub stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,
    /// Conversation association, opaque to the orchestrator beyond being
    /// handed to persistence.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub project_id: Option<String>,
}

/// Token usage totals, normalized across vendors.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq, Default)]
pub struct UsageTotals {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

/// Canonical non-streaming completion response.
///
/// Errors are carried in-band (`error == true` plus the message/type fields)
/// rather than through `Result`, so callers can always serialize the value
/// straight to the client.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CompletionResponse {
    pub error: bool,
    pub content: Option<String>,
    pub finish_reason: Option<String>,
    pub usage: Option<UsageTotals>,
    pub model_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub raw_response: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub error_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status_code: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
}

impl CompletionResponse {
    pub fn success(
        content: Option<String>,
        finish_reason: Option<String>,
        usage: Option<UsageTotals>,
        model_name: impl Into<String>,
        raw_response: Option<serde_json::Value>,
    ) -> Self {
        Self {
            error: false,
            content,
            finish_reason,
            usage,
            model_name: model_name.into(),
            raw_response,
            message: None,
            error_type: None,
            status_code: None,
            error_code: None,
        }
    }
}

/// Canonical streaming chunk.
///
/// Exactly one chunk per stream has `is_final == true` and it is always the
/// last one emitted; an error chunk is itself final. `accumulated_content`
/// is the concatenation of every delta seen so far, in emission order.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StreamChunk {
    pub error: bool,
    pub delta: Option<String>,
    pub is_final: bool,
    pub accumulated_content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finish_reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<UsageTotals>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub error_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status_code: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
}

impl StreamChunk {
    /// An intermediate text delta.
    pub fn delta(text: impl Into<String>, accumulated: impl Into<String>) -> Self {
        Self {
            error: false,
            delta: Some(text.into()),
            is_final: false,
            accumulated_content: accumulated.into(),
            finish_reason: None,
            usage: None,
            model_name: None,
            message: None,
            error_type: None,
            status_code: None,
            error_code: None,
        }
    }

    /// The terminal summary chunk for a successfully exhausted stream.
    pub fn finished(
        accumulated: impl Into<String>,
        finish_reason: Option<String>,
        usage: Option<UsageTotals>,
        model_name: Option<String>,
    ) -> Self {
        Self {
            error: false,
            delta: None,
            is_final: true,
            accumulated_content: accumulated.into(),
            finish_reason,
            usage,
            model_name,
            message: None,
            error_type: None,
            status_code: None,
            error_code: None,
        }
    }
}
