//! # Errors and diagnostics
//!
//! Fatal conditions travel as [`PyroError`] through `?`. Recoverable ones
//! (an unmatched compound, a missing element column, an exclusion that names
//! nothing) are collected as [`Diagnostic`] values so the caller can report
//! them after the run, and each of them is logged with `warn!` when recorded.
use log::warn;
use std::fmt;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PyroError {
    /// the source table lacks a column the schema requires
    #[error("malformed {source_name} table: required column '{column}' is missing")]
    MalformedRow {
        source_name: String,
        column: String,
    },
    #[error("compound '{0}' not found in the reference database")]
    NotFound(String),
    #[error("reference compound '{0}' not found in the peak table")]
    ReferenceCompoundNotFound(String),
    #[error("cannot quantify '{compound}': {reason}")]
    Quantification { compound: String, reason: String },
    #[error("calibration exhausted: only {remaining} point(s) left after outlier removal")]
    InsufficientCalibrationData { remaining: usize },
    #[error("{record} has no value for '{field}'")]
    MissingField { record: String, field: String },
    #[error("no peak table for experiment '{experiment}' (looked for {file_name})")]
    PeakFileNotFound {
        experiment: String,
        file_name: String,
    },
    #[error("statistics error: {0}")]
    Statistics(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type PyroResult<T> = Result<T, PyroError>;

impl PyroError {
    pub fn malformed(source_name: &str, column: &str) -> Self {
        PyroError::MalformedRow {
            source_name: source_name.to_string(),
            column: column.to_string(),
        }
    }

    pub fn quantification(compound: &str, reason: impl Into<String>) -> Self {
        PyroError::Quantification {
            compound: compound.to_string(),
            reason: reason.into(),
        }
    }
}

/// Non-fatal condition met while processing a table.
#[derive(Debug, Clone, PartialEq)]
pub enum Diagnostic {
    UnmatchedCompound(String),
    ExclusionAbsent(String),
    MissingElement { compound: String, element: String },
    MissingGroupTag { compound: String, group: String },
    DroppedRow { source_name: String, row: String, reason: String },
    IncompleteCalibrationPoint(String),
    MissingYield { experiment: String, compound: String },
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Diagnostic::UnmatchedCompound(name) => {
                write!(f, "{} not found in database", name)
            }
            Diagnostic::ExclusionAbsent(name) => {
                write!(f, "{} requested for exclusion but not present", name)
            }
            Diagnostic::MissingElement { compound, element } => {
                write!(f, "{} has no {} count", compound, element.to_uppercase())
            }
            Diagnostic::MissingGroupTag { compound, group } => {
                write!(f, "{} has no value for grouping '{}'", compound, group)
            }
            Diagnostic::DroppedRow {
                source_name,
                row,
                reason,
            } => write!(f, "{} row '{}' dropped: {}", source_name, row, reason),
            Diagnostic::IncompleteCalibrationPoint(label) => {
                write!(f, "calibration point '{}' removed: incomplete", label)
            }
            Diagnostic::MissingYield {
                experiment,
                compound,
            } => write!(f, "{} not found in results of {}", compound, experiment),
        }
    }
}

/// Ordered list of diagnostics gathered by one operation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Diagnostics {
    pub entries: Vec<Diagnostic>,
}

impl Diagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    /// records the diagnostic and logs it
    pub fn push(&mut self, diagnostic: Diagnostic) {
        warn!("{}", diagnostic);
        self.entries.push(diagnostic);
    }

    pub fn extend(&mut self, other: Diagnostics) {
        self.entries.extend(other.entries);
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Diagnostic> {
        self.entries.iter()
    }

    /// names of all compounds reported as unmatched
    pub fn unmatched(&self) -> Vec<&str> {
        self.entries
            .iter()
            .filter_map(|d| match d {
                Diagnostic::UnmatchedCompound(name) => Some(name.as_str()),
                _ => None,
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let err = PyroError::malformed("reference database", "formula");
        assert_eq!(
            err.to_string(),
            "malformed reference database table: required column 'formula' is missing"
        );
        let err = PyroError::ReferenceCompoundNotFound("fluoranthene".to_string());
        assert!(err.to_string().contains("fluoranthene"));
    }

    #[test]
    fn test_diagnostics_unmatched() {
        let mut diagnostics = Diagnostics::new();
        diagnostics.push(Diagnostic::UnmatchedCompound("unknown 1".to_string()));
        diagnostics.push(Diagnostic::ExclusionAbsent("toluene".to_string()));
        diagnostics.push(Diagnostic::UnmatchedCompound("unknown 2".to_string()));
        assert_eq!(diagnostics.len(), 3);
        assert_eq!(diagnostics.unmatched(), vec!["unknown 1", "unknown 2"]);
    }
}
