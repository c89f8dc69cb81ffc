//! Policy modules, violations, and the evaluation pipeline.
//!
//! - [`repository::Repository`]: one-shot scan of the policy root, grouped by domain
//! - [`evaluator::RuleEvaluator`]: the rule-language seam ([`evaluator::RegoEvaluator`] by default)
//! - [`engine::PolicyEngine`]: per-domain evaluation with per-module containment
//! - [`store::PolicyStore`]: atomically swapped repository snapshots

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

pub mod engine;
pub mod evaluator;
pub mod repository;
pub mod store;

pub use engine::PolicyEngine;
pub use evaluator::{EvaluatorError, RegoEvaluator, RuleEvaluator};
pub use repository::Repository;
pub use store::PolicyStore;

// ---------------------------------------------------------------------------
// Core types
// ---------------------------------------------------------------------------

/// A single policy source file discovered under the policy root.
///
/// Identity is the relative path. Modules are immutable once loaded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PolicyModule {
    /// File name without the extension.
    pub name: String,
    /// First path segment under the root; empty for root-level files.
    pub domain: String,
    /// First `# ` comment line, trimmed; empty if none.
    pub description: String,
    /// Path relative to the policy root, `/`-separated.
    #[serde(rename = "path")]
    pub relative_path: String,
    /// Raw rule source.
    #[serde(rename = "content")]
    pub raw_content: String,
}

/// A structured finding that a document breaks a rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Violation {
    /// Rule identifier reported by the module.
    pub rule: String,
    /// Human-readable explanation.
    pub message: String,
    /// Severity label. Open set: modules may report any string.
    pub severity: String,
    /// Domain the evaluation was requested for.
    pub domain: String,
}

impl Violation {
    /// Render as `[severity] message`.
    pub fn summary(&self) -> String {
        format!("[{}] {}", self.severity, self.message)
    }
}

/// Aggregate outcome of evaluating one domain.
///
/// `valid` is derived from the violation list and cannot disagree with it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValidationResult {
    valid: bool,
    violations: Vec<Violation>,
}

impl ValidationResult {
    /// Build a result from collected violations.
    pub fn from_violations(violations: Vec<Violation>) -> Self {
        Self {
            valid: violations.is_empty(),
            violations,
        }
    }

    /// A passing result with no violations.
    pub fn passed() -> Self {
        Self::from_violations(Vec::new())
    }

    /// Whether the document passed every module.
    pub fn valid(&self) -> bool {
        self.valid
    }

    /// Violations in module discovery order.
    pub fn violations(&self) -> &[Violation] {
        &self.violations
    }

    /// Consume the result, returning the violations.
    pub fn into_violations(self) -> Vec<Violation> {
        self.violations
    }
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors raised while loading or reading the policy repository.
#[derive(Debug, thiserror::Error)]
pub enum PolicyError {
    /// A policy file could not be read.
    #[error("failed to read {}: {source}", path.display())]
    Io {
        /// File that failed.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
    /// The policy tree could not be traversed.
    #[error("failed to walk policy tree: {0}")]
    Walk(#[from] walkdir::Error),
    /// A policy file is not valid rule source.
    #[error("failed to parse {path}: {message}")]
    Parse {
        /// Relative path of the offending module.
        path: String,
        /// Parser diagnostic.
        message: String,
    },
    /// The policy directory watcher could not be started.
    #[error("failed to watch policy tree: {0}")]
    Watch(#[from] notify::Error),
    /// The current repository snapshot cannot be read.
    #[error("policy repository unavailable: {0}")]
    Unavailable(String),
}
