//! Answer-synthesis LLM providers.

use std::fmt;

mod anthropic;
mod openai;

pub use anthropic::AnthropicProvider;
pub use openai::OpenAiProvider;

/// Trait implemented by concrete LLM providers.
pub trait LlmProvider: Send + Sync {
    /// Requests one completion; failures stay in their own channel so the
    /// caller decides how to render them.
    fn answer(&self, request: &ProviderRequest) -> Result<String, CompletionError>;
}

/// Request envelope shared by the various providers.
pub struct ProviderRequest<'a> {
    /// System message governing the answer policy.
    pub system: &'a str,
    /// User message carrying the question and retrieved context.
    pub prompt: &'a str,
    /// Sampling temperature.
    pub temperature: f32,
    /// Maximum tokens to request from the completion model.
    pub max_tokens: usize,
}

/// Typed completion failures, never folded into the answer channel.
#[derive(Debug)]
pub enum CompletionError {
    /// The provider is missing credentials or configuration.
    NotConfigured(String),
    /// The request never produced a usable HTTP response.
    Network(reqwest::Error),
    /// The endpoint answered with a non-success status.
    Api {
        /// HTTP status code.
        status: u16,
        /// Response body, when readable.
        body: String,
    },
    /// The response parsed but carried no answer text.
    EmptyAnswer,
    /// The response body could not be interpreted.
    Malformed(String),
}

impl fmt::Display for CompletionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotConfigured(detail) => write!(f, "provider not configured: {detail}"),
            Self::Network(err) => write!(f, "completion request failed: {err}"),
            Self::Api { status, body } => {
                write!(f, "completion endpoint returned {status}: {body}")
            }
            Self::EmptyAnswer => write!(f, "completion response carried no answer text"),
            Self::Malformed(detail) => write!(f, "malformed completion response: {detail}"),
        }
    }
}

impl std::error::Error for CompletionError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Network(err) => Some(err),
            _ => None,
        }
    }
}
