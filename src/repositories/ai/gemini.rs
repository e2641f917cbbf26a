use async_trait::async_trait;
use serde_json::json;

use super::{ProviderError, TextProvider};

pub struct GeminiApi {
    api_key: String,
    url: String,
    model: String,
    client: reqwest::Client,
}

impl GeminiApi {
    pub fn new(api_key: String, url: String, model: String) -> Self {
        Self {
            api_key,
            url,
            model,
            client: reqwest::Client::new(),
        }
    }
}

pub fn parse_response(j: &serde_json::Value) -> Option<String> {
    let parts = j.pointer("/candidates/0/content/parts")?.as_array()?;
    let text: String = parts
        .iter()
        .filter_map(|part| part.get("text").and_then(|t| t.as_str()))
        .collect();

    if text.trim().is_empty() {
        None
    } else {
        Some(text)
    }
}

#[async_trait]
impl TextProvider for GeminiApi {
    async fn generate(&self, prompt: &str) -> Result<String, ProviderError> {
        let payload = json!({
            "contents": [
                { "parts": [ { "text": prompt } ] }
            ]
        });

        let response = self
            .client
            .post(format!(
                "{}/models/{}:generateContent",
                self.url, self.model
            ))
            .header("x-goog-api-key", &self.api_key)
            .json(&payload)
            .send()
            .await
            .map_err(|e| ProviderError::Request(e.to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| ProviderError::Request(e.to_string()))?;
        if !status.is_success() {
            return Err(ProviderError::Request(format!("Gemini: {}: {}", status, body)));
        }

        let response_json: serde_json::Value =
            serde_json::from_str(&body).map_err(|e| ProviderError::BadResponse(e.to_string()))?;
        parse_response(&response_json)
            .ok_or_else(|| ProviderError::BadResponse("Gemini: no text candidate.".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn joins_text_parts() {
        let j = json!({
            "candidates": [ { "content": { "parts": [ { "text": "12" }, { "text": "345" } ] } } ]
        });
        assert_eq!(parse_response(&j).as_deref(), Some("12345"));
    }

    #[test]
    fn empty_or_missing_candidates_are_rejected() {
        assert!(parse_response(&json!({ "candidates": [] })).is_none());
        let blank = json!({ "candidates": [ { "content": { "parts": [ { "text": "  " } ] } } ] });
        assert!(parse_response(&blank).is_none());
    }
}
