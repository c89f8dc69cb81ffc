//! Remediation bridge over the Anthropic `/v1/messages` API.

use serde::{Deserialize, Serialize};

use super::{
    check_http_response, fix_prompt, generation_prompt, strip_code_fence, BridgeError, Prompt,
    RemediationBridge,
};
use crate::config::RemediationConfig;
use crate::policy::PolicyModule;

const ANTHROPIC_VERSION: &str = "2023-06-01";

// ---------------------------------------------------------------------------
// Wire types (pub for integration testing)
// ---------------------------------------------------------------------------

/// Messages API request body.
#[doc(hidden)]
#[derive(Debug, Serialize)]
pub struct AnthropicRequest {
    /// Model identifier.
    pub model: String,
    /// Maximum tokens to generate.
    pub max_tokens: u32,
    /// System prompt.
    pub system: String,
    /// Conversation messages.
    pub messages: Vec<AnthropicMessage>,
}

/// A message in Anthropic format.
#[doc(hidden)]
#[derive(Debug, Serialize)]
pub struct AnthropicMessage {
    /// Role: always "user" here.
    pub role: String,
    /// Plain text content.
    pub content: String,
}

/// Messages API response body.
#[doc(hidden)]
#[derive(Debug, Deserialize)]
pub struct AnthropicResponse {
    /// Content blocks in the response.
    pub content: Vec<AnthropicContentBlock>,
}

/// A content block in the response. Only text is used.
#[doc(hidden)]
#[derive(Debug, Deserialize)]
pub struct AnthropicContentBlock {
    /// Block type, e.g. `text`.
    #[serde(rename = "type")]
    pub kind: String,
    /// Text payload for text blocks.
    #[serde(default)]
    pub text: String,
}

// ---------------------------------------------------------------------------
// Request / Response builders (pub for integration testing)
// ---------------------------------------------------------------------------

/// Build a messages request from a prompt.
#[doc(hidden)]
pub fn build_request(model: &str, max_tokens: u32, prompt: &Prompt) -> AnthropicRequest {
    AnthropicRequest {
        model: model.to_owned(),
        max_tokens,
        system: prompt.system.clone(),
        messages: vec![AnthropicMessage {
            role: "user".to_owned(),
            content: prompt.user.clone(),
        }],
    }
}

/// Parse a messages response into the reply text.
///
/// Text blocks are concatenated; a single enclosing code fence is removed.
///
/// # Errors
///
/// Returns `BridgeError::Parse` for schema mismatches and
/// `BridgeError::EmptyResponse` when no text came back.
#[doc(hidden)]
pub fn parse_response(body: &str) -> Result<String, BridgeError> {
    let resp: AnthropicResponse =
        serde_json::from_str(body).map_err(|e| BridgeError::Parse(e.to_string()))?;

    let text: String = resp
        .content
        .iter()
        .filter(|block| block.kind == "text")
        .map(|block| block.text.as_str())
        .collect();
    if text.trim().is_empty() {
        return Err(BridgeError::EmptyResponse);
    }
    Ok(strip_code_fence(&text))
}

// ---------------------------------------------------------------------------
// Bridge
// ---------------------------------------------------------------------------

/// Anthropic-backed remediation bridge.
#[derive(Clone)]
pub struct AnthropicBridge {
    api_url: String,
    api_key: String,
    model: String,
    max_tokens: u32,
    client: reqwest::Client,
}

impl std::fmt::Debug for AnthropicBridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnthropicBridge")
            .field("api_url", &self.api_url)
            .field("api_key", &"[REDACTED]")
            .field("model", &self.model)
            .field("max_tokens", &self.max_tokens)
            .finish()
    }
}

impl AnthropicBridge {
    /// Create a bridge from configuration and an API key.
    pub fn new(config: &RemediationConfig, api_key: String) -> Self {
        Self {
            api_url: config.api_url.clone(),
            api_key,
            model: config.model.clone(),
            max_tokens: config.max_tokens,
            client: reqwest::Client::new(),
        }
    }

    /// Model this bridge sends requests to.
    pub fn model(&self) -> &str {
        &self.model
    }

    async fn complete(&self, prompt: &Prompt) -> Result<String, BridgeError> {
        let request = build_request(&self.model, self.max_tokens, prompt);
        let response = self
            .client
            .post(&self.api_url)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("content-type", "application/json")
            .header("x-api-key", &self.api_key)
            .json(&request)
            .send()
            .await?;

        let payload = check_http_response(response).await?;
        parse_response(&payload)
    }
}

#[async_trait::async_trait]
impl RemediationBridge for AnthropicBridge {
    async fn generate_config(
        &self,
        domain: &str,
        requirements: &str,
        policies: &[PolicyModule],
    ) -> Result<String, BridgeError> {
        self.complete(&generation_prompt(domain, requirements, policies))
            .await
    }

    async fn fix_violations(
        &self,
        domain: &str,
        original: &str,
        violations: &[String],
    ) -> Result<String, BridgeError> {
        self.complete(&fix_prompt(domain, original, violations)).await
    }
}
