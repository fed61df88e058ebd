use serde::{Deserialize, Serialize};

/// The closed set of providers this gateway can talk to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    OpenAi,
    Anthropic,
    Google,
}

impl ProviderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderKind::OpenAi => "openai",
            ProviderKind::Anthropic => "anthropic",
            ProviderKind::Google => "google",
        }
    }
}

impl std::fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of routing a model identifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteTarget {
    /// `None` when the identifier matched no known provider. There is no
    /// default provider; unresolved models are a routing error upstream.
    pub provider: Option<ProviderKind>,
    /// The model name the provider itself understands: the substring after
    /// the last `/` when one is present, otherwise the input unchanged.
    pub local_model: String,
}

/// Map a model identifier to a provider and a provider-local model name.
///
/// Recognized forms, checked in order:
/// 1. short prefixes: `gpt-*` -> openai, `claude-*` -> anthropic,
///    `gemini-*` -> google;
/// 2. qualified names: `openai/<m>`, `anthropic/<m>`, `google/<m>`.
///
/// Pure and total; never fails and touches no state.
pub fn route(model_id: &str) -> RouteTarget {
    let lowered = model_id.to_ascii_lowercase();

    let local_model = match model_id.rsplit_once('/') {
        Some((_, rest)) => rest.to_string(),
        None => model_id.to_string(),
    };

    let provider = if lowered.starts_with("gpt-") {
        Some(ProviderKind::OpenAi)
    } else if lowered.starts_with("claude-") {
        Some(ProviderKind::Anthropic)
    } else if lowered.starts_with("gemini-") {
        Some(ProviderKind::Google)
    } else if let Some((prefix, _)) = lowered.split_once('/') {
        match prefix {
            "openai" => Some(ProviderKind::OpenAi),
            "anthropic" => Some(ProviderKind::Anthropic),
            "google" => Some(ProviderKind::Google),
            _ => None,
        }
    } else {
        None
    };

    RouteTarget {
        provider,
        local_model,
    }
}
