//! HTTP handlers, driven without a socket.

use std::io;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use tempfile::TempDir;

use policy_agent::policy::PolicyModule;
use policy_agent::remediation::{BridgeError, RemediationBridge};
use policy_agent::server::AppState;

use crate::common::{policy_tree, review_body, validator_for, REPLICAS_POLICY};

/// Canned assistant: returns `reply`, or fails with the given status.
struct FakeBridge {
    reply: Result<String, u16>,
}

#[async_trait]
impl RemediationBridge for FakeBridge {
    async fn generate_config(
        &self,
        _domain: &str,
        _requirements: &str,
        _policies: &[PolicyModule],
    ) -> Result<String, BridgeError> {
        self.answer()
    }

    async fn fix_violations(
        &self,
        _domain: &str,
        _original: &str,
        _violations: &[String],
    ) -> Result<String, BridgeError> {
        self.answer()
    }
}

impl FakeBridge {
    fn answer(&self) -> Result<String, BridgeError> {
        self.reply.clone().map_err(|status| BridgeError::HttpStatus {
            status,
            body: "upstream overloaded".to_owned(),
        })
    }
}

fn state(bridge: Option<FakeBridge>) -> (TempDir, AppState) {
    let tree = policy_tree(&[
        ("kubernetes/replicas.rego", REPLICAS_POLICY),
        ("kafka/topics.rego", "# Topic rules\n"),
    ]);
    let validator = Arc::new(validator_for(tree.path()));
    let bridge = bridge.map(|bridge| Arc::new(bridge) as Arc<dyn RemediationBridge>);
    (tree, AppState::new(validator, bridge))
}

fn json_body(value: &Value) -> io::Result<Vec<u8>> {
    Ok(value.to_string().into_bytes())
}

#[tokio::test]
async fn health_reports_healthy() {
    let (_tree, state) = state(None);
    let response = state.dispatch("GET", "/health", Ok(Vec::new())).await;
    assert_eq!(response.status, 200);
    assert_eq!(response.body, json!({ "status": "healthy" }));
}

#[tokio::test]
async fn validate_returns_result() {
    let (_tree, state) = state(None);
    let body = json!({ "domain": "kubernetes", "config": "kind: Deployment\nspec: {}\n" });

    let response = state.dispatch("POST", "/validate", json_body(&body)).await;
    assert_eq!(response.status, 200);
    assert_eq!(response.body["valid"], json!(false));
    assert_eq!(
        response.body["violations"][0],
        json!({
            "rule": "replicas",
            "message": "missing replica limit",
            "severity": "high",
            "domain": "kubernetes",
        })
    );
}

#[tokio::test]
async fn validate_passes_compliant_config() {
    let (_tree, state) = state(None);
    let body = json!({ "domain": "kubernetes", "config": "spec:\n  replicas: 2\n" });

    let response = state.dispatch("POST", "/validate", json_body(&body)).await;
    assert_eq!(response.status, 200);
    assert_eq!(response.body, json!({ "valid": true, "violations": [] }));
}

#[tokio::test]
async fn validate_rejects_bad_yaml_and_bad_body() {
    let (_tree, state) = state(None);

    let bad_yaml = json!({ "domain": "kubernetes", "config": "spec: [unclosed" });
    let response = state.dispatch("POST", "/validate", json_body(&bad_yaml)).await;
    assert_eq!(response.status, 400);
    assert!(response.body["error"]
        .as_str()
        .is_some_and(|error| error.starts_with("invalid YAML")));

    let response = state
        .dispatch("POST", "/validate", Ok(b"not json".to_vec()))
        .await;
    assert_eq!(response.status, 400);
    assert_eq!(response.body["error"], json!("invalid request body"));

    let response = state
        .dispatch(
            "POST",
            "/validate",
            Err(io::Error::new(io::ErrorKind::UnexpectedEof, "reset")),
        )
        .await;
    assert_eq!(response.status, 400);
}

#[tokio::test]
async fn wrong_method_and_unknown_path() {
    let (_tree, state) = state(None);
    assert_eq!(state.dispatch("GET", "/validate", Ok(Vec::new())).await.status, 405);
    assert_eq!(state.dispatch("POST", "/health", Ok(Vec::new())).await.status, 405);
    assert_eq!(state.dispatch("GET", "/metrics", Ok(Vec::new())).await.status, 404);
}

#[tokio::test]
async fn policies_lists_by_domain() {
    let (_tree, state) = state(None);

    let all = state.dispatch("GET", "/policies", Ok(Vec::new())).await;
    assert_eq!(all.status, 200);
    assert_eq!(all.body["policies"].as_array().map(Vec::len), Some(2));

    let kafka = state.dispatch("GET", "/policies/kafka", Ok(Vec::new())).await;
    let policies = kafka.body["policies"].as_array().cloned().unwrap_or_default();
    assert_eq!(policies.len(), 1);
    assert_eq!(policies[0]["name"], json!("topics"));
    assert_eq!(policies[0]["domain"], json!("kafka"));
    assert_eq!(policies[0]["description"], json!("Topic rules"));
    assert_eq!(policies[0]["path"], json!("kafka/topics.rego"));
    assert_eq!(policies[0]["content"], json!("# Topic rules\n"));

    let none = state.dispatch("GET", "/policies/terraform", Ok(Vec::new())).await;
    assert_eq!(none.body, json!({ "policies": [] }));
}

#[tokio::test]
async fn generate_without_bridge_is_unavailable() {
    let (_tree, state) = state(None);
    let body = json!({ "domain": "kubernetes", "requirements": "a web app" });

    let response = state.dispatch("POST", "/generate", json_body(&body)).await;
    assert_eq!(response.status, 503);
    let response = state.dispatch("POST", "/fix", json_body(&body)).await;
    assert_eq!(response.status, 503);
}

#[tokio::test]
async fn generate_reports_real_validation_outcome() {
    let (_tree, state) = state(Some(FakeBridge {
        reply: Ok("kind: Deployment\nspec:\n  replicas: 2".to_owned()),
    }));
    let body = json!({ "domain": "kubernetes", "requirements": "a web app" });

    let response = state.dispatch("POST", "/generate", json_body(&body)).await;
    assert_eq!(response.status, 200);
    assert_eq!(response.body["domain"], json!("kubernetes"));
    assert_eq!(response.body["config"], json!("kind: Deployment\nspec:\n  replicas: 2"));
    assert_eq!(response.body["validated"], json!(true));
    assert_eq!(response.body["violations"], json!([]));
}

#[tokio::test]
async fn generate_flags_noncompliant_output() {
    let (_tree, state) = state(Some(FakeBridge {
        reply: Ok("kind: Deployment\nspec: {}".to_owned()),
    }));
    let body = json!({ "domain": "kubernetes", "requirements": "a web app" });

    let response = state.dispatch("POST", "/generate", json_body(&body)).await;
    assert_eq!(response.status, 200);
    assert_eq!(response.body["validated"], json!(false));
    assert_eq!(
        response.body["violations"][0]["message"],
        json!("missing replica limit")
    );
}

#[tokio::test]
async fn fix_echoes_original() {
    let (_tree, state) = state(Some(FakeBridge {
        reply: Ok("spec:\n  replicas: 2".to_owned()),
    }));
    let body = json!({
        "domain": "kubernetes",
        "config": "spec: {}",
        "violations": ["missing replica limit"],
    });

    let response = state.dispatch("POST", "/fix", json_body(&body)).await;
    assert_eq!(response.status, 200);
    assert_eq!(
        response.body,
        json!({
            "domain": "kubernetes",
            "fixed_config": "spec:\n  replicas: 2",
            "original": "spec: {}",
        })
    );
}

#[tokio::test]
async fn upstream_failure_is_bad_gateway() {
    let (_tree, state) = state(Some(FakeBridge { reply: Err(529) }));
    let body = json!({ "domain": "kafka", "requirements": "a topic" });

    let response = state.dispatch("POST", "/generate", json_body(&body)).await;
    assert_eq!(response.status, 502);
    assert!(response.body["error"]
        .as_str()
        .is_some_and(|error| error.contains("529")));
}

#[tokio::test]
async fn webhook_answers_admission_review() {
    let (_tree, state) = state(None);
    let object = json!({ "kind": "Deployment", "spec": {} });

    let response = state
        .dispatch(
            "POST",
            "/webhook/validate",
            Ok(review_body("uid-7", "Deployment", &object)),
        )
        .await;
    assert_eq!(response.status, 200);
    assert_eq!(response.body["apiVersion"], json!("admission.k8s.io/v1"));
    assert_eq!(response.body["response"]["uid"], json!("uid-7"));
    assert_eq!(response.body["response"]["allowed"], json!(false));
    assert_eq!(
        response.body["response"]["status"]["message"],
        json!("[high] missing replica limit")
    );
}

#[tokio::test]
async fn webhook_rejection_is_still_http_success() {
    let (_tree, state) = state(None);
    let response = state
        .dispatch("POST", "/webhook/validate", Ok(b"garbage".to_vec()))
        .await;
    assert_eq!(response.status, 200);
    assert_eq!(response.body["response"]["allowed"], json!(false));
}
