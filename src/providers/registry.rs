use std::sync::Arc;
use tracing::info;

use super::anthropic::AnthropicClient;
use super::google::GoogleClient;
use super::openai::OpenAiClient;
use super::LlmClient;
use crate::config::ProvidersConfig;
use crate::router::ProviderKind;

/// Holds one client per provider for the lifetime of the process.
/// Clients are constructed even without an API key so that requests
/// surface a configuration error instead of failing at startup.
pub struct ClientRegistry {
    openai: Arc<dyn LlmClient>,
    anthropic: Arc<dyn LlmClient>,
    google: Arc<dyn LlmClient>,
}

impl ClientRegistry {
    pub fn from_config(config: &ProvidersConfig) -> Self {
        let openai = OpenAiClient::new(
            config.openai.resolved_key("OPENAI_API_KEY"),
            config.openai.base_url.clone(),
            config.openai.default_model.clone(),
        );
        let anthropic = AnthropicClient::new(
            config.anthropic.resolved_key("ANTHROPIC_API_KEY"),
            config.anthropic.base_url.clone(),
            config.anthropic.default_model.clone(),
        );
        let google = GoogleClient::new(
            config.google.resolved_key("GOOGLE_API_KEY"),
            config.google.base_url.clone(),
            config.google.default_model.clone(),
        );

        let registry = Self::from_clients(
            Arc::new(openai),
            Arc::new(anthropic),
            Arc::new(google),
        );
        for kind in [ProviderKind::OpenAi, ProviderKind::Anthropic, ProviderKind::Google] {
            let client = registry.get(kind);
            info!(
                provider = client.name(),
                configured = client.is_configured(),
                "registered provider"
            );
        }
        registry
    }

    pub fn from_clients(
        openai: Arc<dyn LlmClient>,
        anthropic: Arc<dyn LlmClient>,
        google: Arc<dyn LlmClient>,
    ) -> Self {
        Self {
            openai,
            anthropic,
            google,
        }
    }

    pub fn get(&self, kind: ProviderKind) -> Arc<dyn LlmClient> {
        match kind {
            ProviderKind::OpenAi => Arc::clone(&self.openai),
            ProviderKind::Anthropic => Arc::clone(&self.anthropic),
            ProviderKind::Google => Arc::clone(&self.google),
        }
    }
}
