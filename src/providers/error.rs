use thiserror::Error;

/// Failures a provider client can encounter.
///
/// These never cross the client boundary as raw errors: the client converts
/// them into the canonical error shape (an error-flagged response or a
/// terminal error chunk) before returning.
#[derive(Error, Debug)]
pub enum ProviderError {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("rate limited: {message}")]
    RateLimited {
        message: String,
        status: u16,
        error_code: Option<String>,
    },

    #[error("request timed out: {0}")]
    Timeout(String),

    #[error("provider API error: {status} - {message}")]
    Api {
        status: u16,
        message: String,
        error_code: Option<String>,
    },

    #[error("response did not match expected shape: {0}")]
    Parsing(String),

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("{type_name}: {message}")]
    Unexpected { type_name: String, message: String },
}

impl ProviderError {
    /// The canonical `type` tag for this error, as exposed on wire payloads.
    pub fn type_name(&self) -> &str {
        match self {
            ProviderError::Configuration(_) => "ConfigurationError",
            ProviderError::RateLimited { .. } => "RateLimitError",
            ProviderError::Timeout(_) => "TimeoutError",
            ProviderError::Api { .. } => "APIError",
            ProviderError::Parsing(_) => "ParsingError",
            ProviderError::Http(e) if e.is_timeout() => "TimeoutError",
            ProviderError::Http(_) => "APIError",
            ProviderError::Unexpected { type_name, .. } => type_name,
        }
    }

    pub fn status_code(&self) -> Option<u16> {
        match self {
            ProviderError::RateLimited { status, .. } | ProviderError::Api { status, .. } => {
                Some(*status)
            }
            ProviderError::Http(e) => e.status().map(|s| s.as_u16()),
            _ => None,
        }
    }

    pub fn error_code(&self) -> Option<&str> {
        match self {
            ProviderError::RateLimited { error_code, .. }
            | ProviderError::Api { error_code, .. } => error_code.as_deref(),
            _ => None,
        }
    }

    /// Classify a non-success HTTP status from a vendor endpoint.
    pub fn from_status(status: u16, body: String) -> Self {
        match status {
            429 => ProviderError::RateLimited {
                message: body,
                status,
                error_code: Some("rate_limit_exceeded".to_string()),
            },
            408 | 504 => ProviderError::Timeout(body),
            _ => ProviderError::Api {
                status,
                message: body,
                error_code: None,
            },
        }
    }
}
