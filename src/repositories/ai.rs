use async_trait::async_trait;
use std::time::Duration;

mod gemini;

pub use gemini::GeminiApi;

#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("Text provider unavailable")]
    Unavailable,
    #[error("Text provider request failed: {0}")]
    Request(String),
    #[error("Text provider returned a bad response: {0}")]
    BadResponse(String),
    #[error("Text provider timed out after {0:?}")]
    Timeout(Duration),
}

/// Generative text capability. Callers always race it against a timeout and
/// keep a local fallback.
#[async_trait]
pub trait TextProvider: Send + Sync + 'static {
    async fn generate(&self, prompt: &str) -> Result<String, ProviderError>;
}

/// Provider used when no AI backend is configured: every call fails
/// immediately, so callers go straight to their fallback content.
pub struct OfflineProvider;

#[async_trait]
impl TextProvider for OfflineProvider {
    async fn generate(&self, _prompt: &str) -> Result<String, ProviderError> {
        Err(ProviderError::Unavailable)
    }
}

/// Runs `generate` under `limit`. A response arriving after the deadline is
/// dropped with the future.
pub async fn generate_with_timeout(
    provider: &dyn TextProvider,
    prompt: &str,
    limit: Duration,
) -> Result<String, ProviderError> {
    match tokio::time::timeout(limit, provider.generate(prompt)).await {
        Ok(result) => result,
        Err(_) => Err(ProviderError::Timeout(limit)),
    }
}

/// Strips markdown code fences and surrounding prose, returning the
/// outermost `[...]` span if there is one.
pub fn extract_json_array(text: &str) -> Option<&str> {
    let start = text.find('[')?;
    let end = text.rfind(']')?;
    if end <= start {
        return None;
    }

    Some(&text[start..=end])
}
