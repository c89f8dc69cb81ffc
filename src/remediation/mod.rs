//! Remediation bridge: drafting and fixing configurations with a
//! generative assistant.
//!
//! The core only supplies grounding context (policy sources, violation
//! messages) and hands back the assistant's text. Generated output is
//! re-validated by [`revalidate`] before any compliance claim is made;
//! fixed output is returned as-is.

use async_trait::async_trait;
use regex::Regex;
use tracing::warn;

use crate::policy::{PolicyModule, Violation};
use crate::validator::Validator;

pub mod anthropic;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors returned by a remediation bridge.
#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    /// HTTP transport failure.
    #[error("remediation request failed: {0}")]
    Request(#[from] reqwest::Error),
    /// Upstream responded with an error status.
    #[error("remediation service returned status {status}: {body}")]
    HttpStatus {
        /// HTTP status code.
        status: u16,
        /// Sanitized response body.
        body: String,
    },
    /// Response did not match the expected schema.
    #[error("remediation response parse error: {0}")]
    Parse(String),
    /// Response carried no text.
    #[error("empty response from remediation service")]
    EmptyResponse,
    /// No credential is configured.
    #[error("remediation unavailable: {0}")]
    Unavailable(String),
    /// The caller went away before the reply arrived.
    #[error("remediation request cancelled")]
    Cancelled,
}

// ---------------------------------------------------------------------------
// Trait
// ---------------------------------------------------------------------------

/// Generative assistant used to draft or repair configuration text.
///
/// Calls are plain futures: dropping one cancels the outstanding request.
#[async_trait]
pub trait RemediationBridge: Send + Sync {
    /// Draft a configuration for `domain` satisfying `requirements`.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError`] on transport, status, or parse failure.
    async fn generate_config(
        &self,
        domain: &str,
        requirements: &str,
        policies: &[PolicyModule],
    ) -> Result<String, BridgeError>;

    /// Rewrite `original` so the listed violations no longer apply.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError`] on transport, status, or parse failure.
    async fn fix_violations(
        &self,
        domain: &str,
        original: &str,
        violations: &[String],
    ) -> Result<String, BridgeError>;
}

// ---------------------------------------------------------------------------
// Prompts
// ---------------------------------------------------------------------------

/// A system prompt plus one user message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Prompt {
    /// Instructions for the assistant.
    pub system: String,
    /// The request itself.
    pub user: String,
}

/// Prompt for drafting a policy-compliant configuration.
pub fn generation_prompt(domain: &str, requirements: &str, policies: &[PolicyModule]) -> Prompt {
    let rules = policies
        .iter()
        .map(|policy| {
            format!(
                "Policy: {}\nDomain: {}\nDescription: {}\nContent:\n{}",
                policy.name, policy.domain, policy.description, policy.raw_content
            )
        })
        .collect::<Vec<_>>()
        .join("\n---\n");

    Prompt {
        system: format!(
            "You are an infrastructure configuration generator. Generate valid, \
             policy-compliant {domain} configurations.\n\
             Every generated config must comply with these Rego policies:\n\n\
             {rules}\n\n\
             Output ONLY the YAML configuration, no explanations."
        ),
        user: format!("Generate a {domain} configuration for: {requirements}"),
    }
}

/// Prompt for repairing a configuration.
pub fn fix_prompt(domain: &str, original: &str, violations: &[String]) -> Prompt {
    Prompt {
        system: format!(
            "You are an infrastructure configuration remediation expert for {domain}.\n\
             Fix policy violations while preserving the original intent. \
             Output ONLY the corrected YAML."
        ),
        user: format!(
            "Fix the following violations in this configuration:\n\n\
             Violations:\n{}\n\nConfiguration:\n{original}",
            violations.join("\n")
        ),
    }
}

/// Strip one Markdown code fence wrapping the whole reply, if present.
pub fn strip_code_fence(reply: &str) -> String {
    let trimmed = reply.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return reply.to_owned();
    };
    let Some(body) = rest.strip_suffix("```") else {
        return reply.to_owned();
    };
    // Drop the info string (e.g. `yaml`) on the opening line.
    match body.split_once('\n') {
        Some((_, content)) => content.trim_end().to_owned(),
        None => body.trim().to_owned(),
    }
}

// ---------------------------------------------------------------------------
// Re-validation
// ---------------------------------------------------------------------------

/// Result of checking generated text against the domain's policies.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Recheck {
    /// Whether the text parsed and passed every module.
    pub validated: bool,
    /// Violations found, empty when validation could not run.
    pub violations: Vec<Violation>,
    /// Why validation could not run, if it could not.
    pub error: Option<String>,
}

/// Validate generated text instead of asserting it complies.
pub fn revalidate(validator: &Validator, domain: &str, text: &str) -> Recheck {
    match validator.validate(domain, text) {
        Ok(result) => Recheck {
            validated: result.valid(),
            violations: result.into_violations(),
            error: None,
        },
        Err(e) => {
            warn!(domain, error = %e, "generated configuration could not be validated");
            Recheck {
                validated: false,
                violations: Vec::new(),
                error: Some(e.to_string()),
            }
        }
    }
}

// ---------------------------------------------------------------------------
// HTTP helpers
// ---------------------------------------------------------------------------

/// Check HTTP response status and return body text or a structured error.
///
/// # Errors
///
/// Returns `BridgeError::Request` on transport failure, `BridgeError::HttpStatus` on non-2xx.
pub async fn check_http_response(response: reqwest::Response) -> Result<String, BridgeError> {
    let status = response.status();
    let body = response.text().await?;
    if !status.is_success() {
        return Err(BridgeError::HttpStatus {
            status: status.as_u16(),
            body: sanitize_http_error_body(&body),
        });
    }
    Ok(body)
}

/// Upstream error text longer than this is cut before it reaches callers.
const MAX_ERROR_BODY_CHARS: usize = 256;

/// API keys that upstream services sometimes echo back in error bodies.
const SECRET_PATTERN: &str = r"sk-ant-[A-Za-z0-9_\-]{10,}|sk-[A-Za-z0-9]{32,}";

/// Collapse whitespace, redact credentials, and truncate an error body.
pub fn sanitize_http_error_body(raw: &str) -> String {
    let collapsed = raw.split_whitespace().collect::<Vec<_>>().join(" ");
    let redacted = match Regex::new(SECRET_PATTERN) {
        Ok(secrets) => secrets.replace_all(&collapsed, "[REDACTED]").into_owned(),
        Err(_) => collapsed,
    };

    match redacted.char_indices().nth(MAX_ERROR_BODY_CHARS) {
        Some((cut, _)) => format!("{}...[truncated]", &redacted[..cut]),
        None => redacted,
    }
}
