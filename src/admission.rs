//! Admission-review adapter for cluster intercept hooks.
//!
//! Receive → Parse → DomainInfer → Delegate → Respond. A malformed envelope
//! is denied (fail-closed). Once the envelope is well-formed, an evaluation
//! error allows the request (fail-open). The decision always travels in the
//! payload; the transport status is success either way.

use serde::Serialize;
use serde_json::Value;
use tracing::{debug, error, warn};

use crate::document::Document;
use crate::validator::DocumentValidator;

/// Protocol version used when the inbound review does not name one.
pub const DEFAULT_API_VERSION: &str = "admission.k8s.io/v1";
/// Envelope kind used when the inbound review does not name one.
pub const REVIEW_KIND: &str = "AdmissionReview";
/// Domain for kinds missing from [`KIND_DOMAINS`].
pub const DEFAULT_DOMAIN: &str = "kubernetes";

/// Lower-cased resource kind to policy domain.
///
/// Closed on purpose: new kinds should be agreed on before they get a case.
pub const KIND_DOMAINS: &[(&str, &str)] = &[
    ("deployment", "kubernetes"),
    ("pod", "kubernetes"),
    ("service", "kubernetes"),
    ("statefulset", "kubernetes"),
    ("daemonset", "kubernetes"),
    ("kafkatopic", "kafka"),
    ("kafkaconnector", "kafka"),
];

/// Reasons an admission envelope is rejected before evaluation.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// The request body could not be read.
    #[error("failed to read request: {0}")]
    Read(#[from] std::io::Error),
    /// The body is not JSON.
    #[error("invalid admission review: {0}")]
    Decode(#[from] serde_json::Error),
    /// The body is JSON but not an object.
    #[error("invalid admission review: expected a JSON object")]
    NotAnObject,
    /// The `request` member is absent or not an object.
    #[error("missing request in admission review")]
    MissingRequest,
    /// A required member of `request` is absent.
    #[error("missing {0} in admission request")]
    MissingField(&'static str),
}

/// The parts of an inbound review the adapter acts on.
#[derive(Debug, Clone, PartialEq)]
pub struct AdmissionEnvelope {
    /// Correlation identifier echoed in the response.
    pub uid: String,
    /// Resource kind, e.g. `Deployment`.
    pub request_kind: String,
    /// Requested operation (`CREATE`, `UPDATE`, `DELETE`, ...), empty when
    /// the review does not say.
    pub operation: String,
    /// The resource under review. Only a `DELETE` may come without one.
    pub object: Option<Value>,
}

impl AdmissionEnvelope {
    /// Extract `request.uid`, `request.kind.kind`, `request.operation`,
    /// and `request.object`.
    ///
    /// A `DELETE` carries the resource in `oldObject` and leaves `object`
    /// null, so the object is optional for that operation only.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::MissingRequest`] or
    /// [`ProtocolError::MissingField`] when a member is absent.
    pub fn from_review(review: &Value) -> Result<Self, ProtocolError> {
        let request = review
            .get("request")
            .and_then(Value::as_object)
            .ok_or(ProtocolError::MissingRequest)?;

        let uid = match request.get("uid") {
            None | Some(Value::Null) => return Err(ProtocolError::MissingField("request.uid")),
            Some(Value::String(s)) => s.clone(),
            Some(other) => other.to_string(),
        };
        let request_kind = request
            .get("kind")
            .and_then(|kind| kind.get("kind"))
            .and_then(Value::as_str)
            .ok_or(ProtocolError::MissingField("request.kind.kind"))?
            .to_owned();
        let operation = request
            .get("operation")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_owned();
        let object = match request.get("object") {
            None | Some(Value::Null) if operation.eq_ignore_ascii_case("DELETE") => None,
            None | Some(Value::Null) => {
                return Err(ProtocolError::MissingField("request.object"));
            }
            Some(object) => Some(object.clone()),
        };

        Ok(Self {
            uid,
            request_kind,
            operation,
            object,
        })
    }
}

/// Outgoing review envelope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AdmissionReview {
    /// Mirrors the inbound `apiVersion`.
    pub api_version: String,
    /// Mirrors the inbound `kind`.
    pub kind: String,
    /// The decision.
    pub response: AdmissionResponse,
}

/// Allow/deny decision for one review.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AdmissionResponse {
    /// Inbound `request.uid`, empty if it could not be read.
    pub uid: String,
    /// Whether the resource is admitted.
    pub allowed: bool,
    /// Explanation shown to the submitter.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<AdmissionStatus>,
}

/// Status block carrying the decision message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AdmissionStatus {
    /// Joined violation summaries or the protocol error.
    pub message: String,
}

impl AdmissionResponse {
    /// Admit without a message.
    pub fn allow(uid: impl Into<String>) -> Self {
        Self {
            uid: uid.into(),
            allowed: true,
            status: None,
        }
    }

    /// Reject with an explanation.
    pub fn deny(uid: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            uid: uid.into(),
            allowed: false,
            status: Some(AdmissionStatus {
                message: message.into(),
            }),
        }
    }

    /// The message, if any.
    pub fn message(&self) -> Option<&str> {
        self.status.as_ref().map(|status| status.message.as_str())
    }
}

/// Protocol tag (`apiVersion`, `kind`) of an inbound review.
#[derive(Debug, Clone, PartialEq, Eq)]
struct ProtocolTag {
    api_version: String,
    kind: String,
}

impl Default for ProtocolTag {
    fn default() -> Self {
        Self {
            api_version: DEFAULT_API_VERSION.to_owned(),
            kind: REVIEW_KIND.to_owned(),
        }
    }
}

impl ProtocolTag {
    fn from_review(review: &Value) -> Self {
        let field = |key: &str, fallback: &str| {
            review
                .get(key)
                .and_then(Value::as_str)
                .unwrap_or(fallback)
                .to_owned()
        };
        Self {
            api_version: field("apiVersion", DEFAULT_API_VERSION),
            kind: field("kind", REVIEW_KIND),
        }
    }

    fn wrap(self, response: AdmissionResponse) -> AdmissionReview {
        AdmissionReview {
            api_version: self.api_version,
            kind: self.kind,
            response,
        }
    }
}

/// Map a resource kind to its policy domain (case-insensitive).
pub fn infer_domain(kind: &str) -> &'static str {
    let kind = kind.to_lowercase();
    KIND_DOMAINS
        .iter()
        .find(|&&(known, _)| known == kind)
        .map_or(DEFAULT_DOMAIN, |&(_, domain)| domain)
}

/// Decode a raw body into a JSON object.
///
/// # Errors
///
/// Returns [`ProtocolError`] if the body is unreadable, not JSON, or not
/// an object.
pub fn decode_review(body: Result<Vec<u8>, std::io::Error>) -> Result<Value, ProtocolError> {
    let body = body?;
    let review: Value = serde_json::from_slice(&body)?;
    if !review.is_object() {
        return Err(ProtocolError::NotAnObject);
    }
    Ok(review)
}

/// Review one admission request end to end.
pub fn review<V>(validator: &V, body: Result<Vec<u8>, std::io::Error>) -> AdmissionReview
where
    V: DocumentValidator + ?Sized,
{
    let raw = match decode_review(body) {
        Ok(raw) => raw,
        Err(e) => {
            warn!(error = %e, "rejecting unreadable admission review");
            return ProtocolTag::default().wrap(AdmissionResponse::deny("", e.to_string()));
        }
    };
    let tag = ProtocolTag::from_review(&raw);

    let envelope = match AdmissionEnvelope::from_review(&raw) {
        Ok(envelope) => envelope,
        Err(e) => {
            warn!(error = %e, "rejecting malformed admission review");
            let uid = raw
                .pointer("/request/uid")
                .and_then(Value::as_str)
                .unwrap_or_default();
            return tag.wrap(AdmissionResponse::deny(uid, e.to_string()));
        }
    };

    let domain = infer_domain(&envelope.request_kind);
    debug!(
        uid = %envelope.uid,
        kind = %envelope.request_kind,
        operation = %envelope.operation,
        domain,
        "admission review"
    );

    // Nothing is being admitted when a resource is removed.
    let Some(object) = envelope.object else {
        return tag.wrap(AdmissionResponse::allow(envelope.uid));
    };
    let document = Document::from_value(object);
    let response = match validator.validate_document(domain, &document) {
        Ok(result) if result.valid() => AdmissionResponse::allow(envelope.uid),
        Ok(result) => {
            let message = result
                .violations()
                .iter()
                .map(|violation| violation.summary())
                .collect::<Vec<_>>()
                .join("; ");
            AdmissionResponse::deny(envelope.uid, message)
        }
        Err(e) => {
            error!(uid = %envelope.uid, domain, error = %e, "admission validation failed, allowing");
            AdmissionResponse::allow(envelope.uid)
        }
    };
    tag.wrap(response)
}
