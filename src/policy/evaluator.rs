//! The rule-language seam.
//!
//! The engine only needs two capabilities from a rule language: reject a
//! malformed module at load time, and run a module against a document to
//! produce violation objects. [`RegoEvaluator`] provides both for Rego via
//! the `regorus` interpreter.

use serde_json::Value;

use super::PolicyModule;
use crate::document::Document;

/// Rule query evaluated when none is configured.
pub const DEFAULT_QUERY: &str = "data.policy.violations";

/// Errors from a single module check or evaluation.
///
/// The engine contains these per module; they never reach callers of
/// [`super::PolicyEngine::evaluate`].
#[derive(Debug, thiserror::Error)]
pub enum EvaluatorError {
    /// The module source failed to parse or compile.
    #[error("failed to compile policy module: {0}")]
    Compile(String),
    /// The input document could not be handed to the evaluator.
    #[error("failed to load input document: {0}")]
    Input(String),
    /// Evaluation of the rule query failed.
    #[error("policy evaluation failed: {0}")]
    Eval(String),
    /// The query produced something other than a collection.
    #[error("unexpected evaluation result: {0}")]
    Output(String),
}

/// Executes policy modules against normalized documents.
///
/// Implementations must be `Send + Sync`: one evaluator is shared by every
/// connection task.
pub trait RuleEvaluator: Send + Sync {
    /// Validate module source without evaluating it.
    ///
    /// # Errors
    ///
    /// Returns [`EvaluatorError::Compile`] if the source is malformed.
    fn check(&self, path: &str, source: &str) -> Result<(), EvaluatorError>;

    /// Evaluate a module, returning the raw violation objects it yields.
    ///
    /// # Errors
    ///
    /// Returns [`EvaluatorError`] on compile, input, or evaluation failure.
    fn evaluate(
        &self,
        module: &PolicyModule,
        document: &Document,
    ) -> Result<Vec<Value>, EvaluatorError>;
}

/// Rego evaluator backed by `regorus`.
///
/// A fresh interpreter is built for every call, so no state leaks between
/// modules or requests.
#[derive(Debug, Clone)]
pub struct RegoEvaluator {
    query: String,
}

impl RegoEvaluator {
    /// Create an evaluator for a rule path such as `data.policy.violations`.
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
        }
    }

    /// The rule path this evaluator queries.
    pub fn query(&self) -> &str {
        &self.query
    }
}

impl Default for RegoEvaluator {
    fn default() -> Self {
        Self::new(DEFAULT_QUERY)
    }
}

impl RuleEvaluator for RegoEvaluator {
    fn check(&self, path: &str, source: &str) -> Result<(), EvaluatorError> {
        let mut engine = regorus::Engine::new();
        engine
            .add_policy(path.to_owned(), source.to_owned())
            .map_err(|e| EvaluatorError::Compile(e.to_string()))?;
        Ok(())
    }

    fn evaluate(
        &self,
        module: &PolicyModule,
        document: &Document,
    ) -> Result<Vec<Value>, EvaluatorError> {
        let mut engine = regorus::Engine::new();
        engine
            .add_policy(module.relative_path.clone(), module.raw_content.clone())
            .map_err(|e| EvaluatorError::Compile(e.to_string()))?;

        let input = regorus::Value::from_json_str(&document.to_json())
            .map_err(|e| EvaluatorError::Input(e.to_string()))?;
        engine.set_input(input);

        let result = engine
            .eval_rule(self.query.clone())
            .map_err(|e| EvaluatorError::Eval(e.to_string()))?;
        if result == regorus::Value::Undefined {
            return Ok(Vec::new());
        }

        let json = result
            .to_json_str()
            .map_err(|e| EvaluatorError::Output(e.to_string()))?;
        match serde_json::from_str::<Value>(&json) {
            // Rego sets serialize as arrays.
            Ok(Value::Array(items)) => Ok(items),
            Ok(other) => Err(EvaluatorError::Output(format!(
                "{} returned {other}, expected a set or array",
                self.query
            ))),
            Err(e) => Err(EvaluatorError::Output(e.to_string())),
        }
    }
}
