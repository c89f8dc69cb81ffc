//! Validation facade shared by the CLI, the HTTP API, and the admission hook.

use tracing::{error, info};

use crate::document::{self, Document, FormatError};
use crate::policy::{PolicyEngine, PolicyError, PolicyModule, ValidationResult};

/// Errors from validating a configuration.
#[derive(Debug, thiserror::Error)]
pub enum ValidateError {
    /// The configuration text is not a valid document.
    #[error(transparent)]
    Format(#[from] FormatError),
    /// The policy repository could not be read.
    #[error(transparent)]
    Policy(#[from] PolicyError),
}

/// Judges an already-normalized document for a domain.
///
/// The admission adapter depends on this rather than on [`Validator`]
/// directly.
pub trait DocumentValidator {
    /// Evaluate `document` against the policies of `domain`.
    ///
    /// # Errors
    ///
    /// Returns [`ValidateError`] when evaluation cannot run.
    fn validate_document(
        &self,
        domain: &str,
        document: &Document,
    ) -> Result<ValidationResult, ValidateError>;
}

/// Normalizes input and runs it through the policy engine, with logging.
#[derive(Debug, Clone)]
pub struct Validator {
    engine: PolicyEngine,
}

impl Validator {
    /// Wrap a policy engine.
    pub fn new(engine: PolicyEngine) -> Self {
        Self { engine }
    }

    /// The underlying engine.
    pub fn engine(&self) -> &PolicyEngine {
        &self.engine
    }

    /// Validate configuration source text for `domain`.
    ///
    /// # Errors
    ///
    /// Returns [`ValidateError::Format`] for unparsable text and
    /// [`ValidateError::Policy`] if the repository is unavailable.
    pub fn validate(&self, domain: &str, source: &str) -> Result<ValidationResult, ValidateError> {
        info!(domain, "validating configuration");
        let document = document::normalize(source).inspect_err(|e| {
            info!(domain, error = %e, "configuration is not a valid document");
        })?;
        self.validate_document(domain, &document)
    }

    /// Validate an already-normalized document for `domain`.
    ///
    /// # Errors
    ///
    /// Returns [`ValidateError::Policy`] if the repository is unavailable.
    pub fn validate_document(
        &self,
        domain: &str,
        document: &Document,
    ) -> Result<ValidationResult, ValidateError> {
        let result = self.engine.evaluate(domain, document).inspect_err(|e| {
            error!(domain, error = %e, "validation failed");
        })?;
        info!(
            domain,
            valid = result.valid(),
            violations = result.violations().len(),
            "validation complete"
        );
        Ok(result)
    }

    /// Policy modules under `domain` (empty lists all).
    ///
    /// # Errors
    ///
    /// Fails if the repository snapshot cannot be read.
    pub fn policies(&self, domain: &str) -> Result<Vec<PolicyModule>, PolicyError> {
        self.engine.list(domain)
    }
}

impl DocumentValidator for Validator {
    fn validate_document(
        &self,
        domain: &str,
        document: &Document,
    ) -> Result<ValidationResult, ValidateError> {
        Validator::validate_document(self, domain, document)
    }
}

/// Human-readable pass/fail summary with a numbered violation list.
pub fn render_report(result: &ValidationResult) -> String {
    if result.valid() {
        return "✓ Configuration is valid - no policy violations found".to_owned();
    }
    let mut report = format!(
        "✗ Found {} policy violation(s):",
        result.violations().len()
    );
    for (number, violation) in (1_usize..).zip(result.violations()) {
        report.push_str(&format!("\n  {number}. {}", violation.summary()));
    }
    report
}
