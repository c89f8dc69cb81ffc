//! Request routing and handlers.
//!
//! Handlers are transport-free: they take a method, a URL, and the body read
//! result, and produce an [`HttpResponse`]. The listener in the parent
//! module does the I/O. Only remediation calls are rationed; validation
//! and admission reviews never wait for a slot.

use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::Semaphore;
use tracing::{error, warn};

use crate::admission;
use crate::remediation::{self, BridgeError, RemediationBridge};
use crate::validator::{ValidateError, Validator};

/// A JSON response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    /// HTTP status code.
    pub status: u16,
    /// JSON body.
    pub body: Value,
}

impl HttpResponse {
    /// 200 with `body`.
    pub fn ok(body: Value) -> Self {
        Self { status: 200, body }
    }

    /// `status` with `{"error": message}`.
    pub fn error(status: u16, message: impl std::fmt::Display) -> Self {
        Self {
            status,
            body: json!({ "error": message.to_string() }),
        }
    }
}

/// Known endpoints.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route {
    /// `GET /health`
    Health,
    /// `POST /validate`
    Validate,
    /// `POST /generate`
    Generate,
    /// `POST /fix`
    Fix,
    /// `GET /policies[/domain]`
    Policies(String),
    /// `POST /webhook/validate`
    Admission,
}

impl Route {
    /// Resolve a request URL (query string ignored).
    pub fn parse(url: &str) -> Option<Self> {
        let path = url.split_once('?').map_or(url, |(path, _)| path);
        match path {
            "/health" => Some(Self::Health),
            "/validate" => Some(Self::Validate),
            "/generate" => Some(Self::Generate),
            "/fix" => Some(Self::Fix),
            "/webhook/validate" => Some(Self::Admission),
            "/policies" => Some(Self::Policies(String::new())),
            _ => path
                .strip_prefix("/policies/")
                .map(|domain| Self::Policies(domain.trim_matches('/').to_owned())),
        }
    }

    /// The method this route accepts.
    pub fn method(&self) -> &'static str {
        match self {
            Self::Health | Self::Policies(_) => "GET",
            Self::Validate | Self::Generate | Self::Fix | Self::Admission => "POST",
        }
    }
}

#[derive(Debug, Deserialize)]
struct ValidateRequest {
    #[serde(default)]
    domain: String,
    #[serde(default)]
    config: String,
}

#[derive(Debug, Deserialize)]
struct GenerateRequest {
    #[serde(default)]
    domain: String,
    #[serde(default)]
    requirements: String,
}

#[derive(Debug, Deserialize)]
struct FixRequest {
    #[serde(default)]
    domain: String,
    #[serde(default)]
    config: String,
    #[serde(default)]
    violations: Vec<String>,
}

/// Assistant calls served at once unless configured otherwise.
pub const DEFAULT_REMEDIATION_LIMIT: usize = 4;

/// Shared state behind every request.
#[derive(Clone)]
pub struct AppState {
    validator: Arc<Validator>,
    bridge: Option<Arc<dyn RemediationBridge>>,
    remediation_slots: Arc<Semaphore>,
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("validator", &self.validator)
            .field("remediation", &self.bridge.is_some())
            .field(
                "remediation_slots",
                &self.remediation_slots.available_permits(),
            )
            .finish()
    }
}

impl AppState {
    /// Build state; `bridge` is `None` when no credential is configured.
    pub fn new(validator: Arc<Validator>, bridge: Option<Arc<dyn RemediationBridge>>) -> Self {
        Self {
            validator,
            bridge,
            remediation_slots: Arc::new(Semaphore::new(DEFAULT_REMEDIATION_LIMIT)),
        }
    }

    /// Cap concurrent `/generate` and `/fix` calls at `limit` (at least one).
    #[must_use]
    pub fn with_remediation_limit(mut self, limit: usize) -> Self {
        self.remediation_slots = Arc::new(Semaphore::new(limit.max(1)));
        self
    }

    /// Route and handle one request.
    pub async fn dispatch(
        &self,
        method: &str,
        url: &str,
        body: Result<Vec<u8>, std::io::Error>,
    ) -> HttpResponse {
        let Some(route) = Route::parse(url) else {
            return HttpResponse::error(404, "not found");
        };
        if !method.eq_ignore_ascii_case(route.method()) {
            return HttpResponse::error(405, "method not allowed");
        }

        match route {
            Route::Health => HttpResponse::ok(json!({ "status": "healthy" })),
            Route::Policies(domain) => self.list_policies(&domain),
            Route::Validate => self.validate(body),
            Route::Generate => self.generate(body).await,
            Route::Fix => self.fix(body).await,
            Route::Admission => {
                let review = admission::review(self.validator.as_ref(), body);
                match serde_json::to_value(review) {
                    Ok(value) => HttpResponse::ok(value),
                    Err(e) => HttpResponse::error(500, e),
                }
            }
        }
    }

    fn list_policies(&self, domain: &str) -> HttpResponse {
        match self.validator.policies(domain) {
            Ok(policies) => HttpResponse::ok(json!({ "policies": policies })),
            Err(e) => HttpResponse::error(500, e),
        }
    }

    fn validate(&self, body: Result<Vec<u8>, std::io::Error>) -> HttpResponse {
        let request: ValidateRequest = match decode_body(body) {
            Ok(request) => request,
            Err(response) => return response,
        };
        match self.validator.validate(&request.domain, &request.config) {
            Ok(result) => match serde_json::to_value(result) {
                Ok(value) => HttpResponse::ok(value),
                Err(e) => HttpResponse::error(500, e),
            },
            Err(e @ ValidateError::Format(_)) => HttpResponse::error(400, e),
            Err(e @ ValidateError::Policy(_)) => HttpResponse::error(500, e),
        }
    }

    async fn generate(&self, body: Result<Vec<u8>, std::io::Error>) -> HttpResponse {
        let Some(bridge) = self.bridge.as_ref() else {
            return bridge_unavailable();
        };
        let request: GenerateRequest = match decode_body(body) {
            Ok(request) => request,
            Err(response) => return response,
        };

        let policies = match self.validator.policies(&request.domain) {
            Ok(policies) => policies,
            Err(e) => return HttpResponse::error(500, e),
        };
        let Ok(_slot) = self.remediation_slots.acquire().await else {
            return bridge_unavailable();
        };
        let config = match bridge
            .generate_config(&request.domain, &request.requirements, &policies)
            .await
        {
            Ok(config) => config,
            Err(e) => return bridge_failure(&e),
        };

        let recheck = remediation::revalidate(&self.validator, &request.domain, &config);
        let mut body = json!({
            "domain": request.domain,
            "config": config,
            "validated": recheck.validated,
            "violations": recheck.violations,
        });
        if let (Some(error), Some(map)) = (recheck.error, body.as_object_mut()) {
            map.insert("validation_error".to_owned(), Value::String(error));
        }
        HttpResponse::ok(body)
    }

    async fn fix(&self, body: Result<Vec<u8>, std::io::Error>) -> HttpResponse {
        let Some(bridge) = self.bridge.as_ref() else {
            return bridge_unavailable();
        };
        let request: FixRequest = match decode_body(body) {
            Ok(request) => request,
            Err(response) => return response,
        };
        let Ok(_slot) = self.remediation_slots.acquire().await else {
            return bridge_unavailable();
        };

        match bridge
            .fix_violations(&request.domain, &request.config, &request.violations)
            .await
        {
            Ok(fixed) => HttpResponse::ok(json!({
                "domain": request.domain,
                "fixed_config": fixed,
                "original": request.config,
            })),
            Err(e) => bridge_failure(&e),
        }
    }
}

fn decode_body<T: DeserializeOwned>(
    body: Result<Vec<u8>, std::io::Error>,
) -> Result<T, HttpResponse> {
    let bytes = body.map_err(|e| {
        warn!(error = %e, "failed to read request body");
        HttpResponse::error(400, "invalid request body")
    })?;
    serde_json::from_slice(&bytes).map_err(|e| {
        warn!(error = %e, "failed to decode request body");
        HttpResponse::error(400, "invalid request body")
    })
}

fn bridge_unavailable() -> HttpResponse {
    HttpResponse::error(503, "remediation not configured")
}

fn bridge_failure(e: &BridgeError) -> HttpResponse {
    error!(error = %e, "remediation request failed");
    match e {
        BridgeError::Cancelled | BridgeError::Unavailable(_) => HttpResponse::error(503, e),
        _ => HttpResponse::error(502, e),
    }
}
