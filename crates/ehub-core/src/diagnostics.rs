//! Non-fatal observations collected while a model is assembled.
//!
//! Anything that makes construction impossible is an error; everything that
//! is legal but suspicious (a capacity factor above 1, a candidate that can
//! never be built, an arc losing most of its flow) lands here so callers
//! can surface it next to the model.
//!
//! # Example
//!
//! ```
//! use ehub_core::diagnostics::{Diagnostics, Severity};
//!
//! let mut diag = Diagnostics::new();
//! diag.warn("fit", "capacity factor above 1 at step 12", "city/PV");
//! diag.note("aggregation", "aggregation disabled, using full resolution");
//!
//! assert_eq!(diag.warning_count(), 1);
//! assert_eq!(diag.count(Severity::Info), 1);
//! ```

use serde::Serialize;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Informational, no action needed
    Info,
    /// Legal input that is probably not intended
    Warning,
}

/// A single observation.
#[derive(Debug, Clone, Serialize)]
pub struct DiagnosticIssue {
    pub severity: Severity,
    /// Construction stage ("topology", "fit", "network", ...)
    pub category: String,
    pub message: String,
    /// Offending entity, e.g. "city/PV"
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entity: Option<String>,
}

impl std::fmt::Display for DiagnosticIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let severity = match self.severity {
            Severity::Info => "info",
            Severity::Warning => "warning",
        };
        write!(f, "[{}:{}] {}", severity, self.category, self.message)?;
        if let Some(entity) = &self.entity {
            write!(f, " ({})", entity)?;
        }
        Ok(())
    }
}

/// Ordered collection of observations.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Diagnostics {
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub issues: Vec<DiagnosticIssue>,
}

impl Diagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a warning about `entity` and forward it to the log.
    pub fn warn(&mut self, category: &str, message: impl Into<String>, entity: impl Into<String>) {
        let issue = DiagnosticIssue {
            severity: Severity::Warning,
            category: category.to_string(),
            message: message.into(),
            entity: Some(entity.into()),
        };
        warn!(category, entity = issue.entity.as_deref(), "{}", issue.message);
        self.issues.push(issue);
    }

    /// Record an informational note.
    pub fn note(&mut self, category: &str, message: impl Into<String>) {
        let issue = DiagnosticIssue {
            severity: Severity::Info,
            category: category.to_string(),
            message: message.into(),
            entity: None,
        };
        info!(category, "{}", issue.message);
        self.issues.push(issue);
    }

    pub fn count(&self, severity: Severity) -> usize {
        self.issues.iter().filter(|i| i.severity == severity).count()
    }

    pub fn warning_count(&self) -> usize {
        self.count(Severity::Warning)
    }

    pub fn has_warnings(&self) -> bool {
        self.warning_count() > 0
    }

    pub fn issues_by_category<'a>(
        &'a self,
        category: &'a str,
    ) -> impl Iterator<Item = &'a DiagnosticIssue> {
        self.issues.iter().filter(move |i| i.category == category)
    }

    pub fn merge(&mut self, other: Diagnostics) {
        self.issues.extend(other.issues);
    }

    pub fn summary(&self) -> String {
        match self.warning_count() {
            0 => "No warnings".to_string(),
            1 => "1 warning".to_string(),
            w => format!("{} warnings", w),
        }
    }
}

impl std::fmt::Display for Diagnostics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Diagnostics: {}", self.summary())?;
        for issue in &self.issues {
            writeln!(f, "  {}", issue)?;
        }
        Ok(())
    }
}
