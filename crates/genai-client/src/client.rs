//! HTTP client for the generative language API
//!
//! One method, one endpoint: POST `models/{model}:generateContent` with the
//! API key in the `x-goog-api-key` header (never in the URL, so keys cannot
//! leak through request logs). Every non-2xx response and transport failure
//! is normalized into `CallError` before it leaves this crate.

use tracing::debug;

use crate::error::{CallError, Result};
use crate::types::{GenerateRequest, GenerateResponse};

/// Header carrying the API key.
const API_KEY_HEADER: &str = "x-goog-api-key";

/// Client for one provider endpoint + model pair.
///
/// Cheap to clone; holds a shared `reqwest::Client`.
#[derive(Debug, Clone)]
pub struct GenAiClient {
    http: reqwest::Client,
    base_url: String,
    model: String,
}

impl GenAiClient {
    pub fn new(http: reqwest::Client, base_url: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            http,
            base_url: base_url.into(),
            model: model.into(),
        }
    }

    /// Endpoint URL for the configured model.
    fn generate_url(&self) -> String {
        format!(
            "{}/v1beta/models/{}:generateContent",
            self.base_url.trim_end_matches('/'),
            self.model
        )
    }

    /// Run one generation call with the given key and return the completion
    /// text.
    ///
    /// The key is accepted as a plain `&str` so the caller (the pool's
    /// orchestrator) controls which credential is used per attempt.
    pub async fn generate(&self, api_key: &str, prompt: &str) -> Result<String> {
        let request = GenerateRequest::from_prompt(prompt);

        let response = self
            .http
            .post(self.generate_url())
            .header(API_KEY_HEADER, api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| CallError::Network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| String::from("<no body>"));
            return Err(CallError::from_response(status.as_u16(), &body));
        }

        let parsed: GenerateResponse = response
            .json()
            .await
            .map_err(|e| CallError::InvalidResponse(e.to_string()))?;

        let text = parsed.first_text().ok_or_else(|| {
            CallError::InvalidResponse("response contained no candidate text".to_string())
        })?;

        debug!(model = %self.model, chars = text.len(), "generation call succeeded");
        Ok(text)
    }
}
