//! Domain-scoped evaluation.
//!
//! Each module under the requested domain runs independently. A module that
//! fails to evaluate contributes nothing and is logged; the rest of the
//! domain still runs. Violations keep module discovery order and carry the
//! requested domain.

use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, warn};

use super::evaluator::RuleEvaluator;
use super::store::PolicyStore;
use super::{PolicyError, PolicyModule, ValidationResult, Violation};
use crate::document::Document;

/// Evaluation orchestrator over the current policy snapshot.
#[derive(Clone)]
pub struct PolicyEngine {
    store: Arc<PolicyStore>,
}

impl std::fmt::Debug for PolicyEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PolicyEngine")
            .field("root", &self.store.root())
            .finish()
    }
}

impl PolicyEngine {
    /// Create an engine reading from `store`.
    pub fn new(store: Arc<PolicyStore>) -> Self {
        Self { store }
    }

    /// The backing policy store.
    pub fn store(&self) -> &Arc<PolicyStore> {
        &self.store
    }

    /// Evaluate every module under `domain` against `document`.
    ///
    /// A domain with no modules passes.
    ///
    /// # Errors
    ///
    /// Only fails if the repository snapshot cannot be read; module failures
    /// are contained.
    pub fn evaluate(
        &self,
        domain: &str,
        document: &Document,
    ) -> Result<ValidationResult, PolicyError> {
        let repository = self.store.snapshot()?;
        let modules = repository.list(domain);
        if modules.is_empty() {
            debug!(domain, "no policy modules for domain, passing");
            return Ok(ValidationResult::passed());
        }
        Ok(evaluate_modules(
            self.store.evaluator(),
            modules,
            domain,
            document,
        ))
    }

    /// Owned copies of the modules under `domain` (empty lists everything).
    ///
    /// # Errors
    ///
    /// Fails if the repository snapshot cannot be read.
    pub fn list(&self, domain: &str) -> Result<Vec<PolicyModule>, PolicyError> {
        let repository = self.store.snapshot()?;
        Ok(repository.list(domain).into_iter().cloned().collect())
    }
}

/// Run `modules` in order and aggregate their violations.
///
/// Evaluator errors are logged and dropped.
pub fn evaluate_modules<'a>(
    evaluator: &dyn RuleEvaluator,
    modules: impl IntoIterator<Item = &'a PolicyModule>,
    domain: &str,
    document: &Document,
) -> ValidationResult {
    let mut violations = Vec::new();
    for module in modules {
        match evaluator.evaluate(module, document) {
            Ok(findings) => {
                violations.extend(
                    findings
                        .iter()
                        .filter_map(|finding| violation_from(finding, domain)),
                );
            }
            Err(e) => {
                warn!(
                    module = %module.relative_path,
                    domain,
                    error = %e,
                    "policy module failed to evaluate, skipping"
                );
            }
        }
    }
    ValidationResult::from_violations(violations)
}

/// Convert one evaluator finding into a [`Violation`].
///
/// Non-mapping findings are ignored. String fields are taken verbatim,
/// other values in their JSON form, missing fields as empty strings.
pub fn violation_from(finding: &Value, domain: &str) -> Option<Violation> {
    let fields = finding.as_object()?;
    let text = |key: &str| match fields.get(key) {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
    };
    Some(Violation {
        rule: text("rule"),
        message: text("message"),
        severity: text("severity"),
        domain: domain.to_owned(),
    })
}
