//! Per-step outcome tracking for multi-step maintenance workflows
//!
//! Backup, restore and reset are sequences of steps where some failures abort
//! the workflow and others are only worth a warning. `StepReport` records both
//! kinds uniformly so the coordinators read as a flat list of steps.

use tracing::{error, warn};

use crate::database::DatabaseError;

/// Outcome of a single workflow step
#[derive(Debug, Clone, PartialEq)]
pub enum StepOutcome {
    /// Step completed
    Ok,
    /// Step failed; the workflow cannot continue with its fatal-sensitive steps
    FatalFailure(String),
    /// Step failed; the workflow continues and reports a warning
    RecoverableFailure(String),
}

/// Accumulates step outcomes for one workflow run
#[derive(Debug, Default)]
pub struct StepReport {
    outcomes: Vec<(String, StepOutcome)>,
}

impl StepReport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the result of a step whose failure is tolerated
    pub fn best_effort<T>(
        &mut self,
        step: &str,
        result: std::result::Result<T, DatabaseError>,
    ) -> Option<T> {
        match result {
            Ok(value) => {
                self.outcomes.push((step.to_string(), StepOutcome::Ok));
                Some(value)
            }
            Err(e) => {
                warn!(step, error = %e, "best-effort step failed, continuing");
                self.outcomes
                    .push((step.to_string(), StepOutcome::RecoverableFailure(e.to_string())));
                None
            }
        }
    }

    /// Record the result of a step whose failure aborts the workflow
    ///
    /// The result is handed back unchanged so callers can short-circuit with `?`.
    pub fn require<T>(
        &mut self,
        step: &str,
        result: std::result::Result<T, DatabaseError>,
    ) -> std::result::Result<T, DatabaseError> {
        match &result {
            Ok(_) => self.outcomes.push((step.to_string(), StepOutcome::Ok)),
            Err(e) => {
                error!(step, error = %e, "fatal step failed");
                self.outcomes
                    .push((step.to_string(), StepOutcome::FatalFailure(e.to_string())));
            }
        }
        result
    }

    /// First fatal failure, formatted as `step: cause`
    pub fn fatal(&self) -> Option<String> {
        self.outcomes.iter().find_map(|(step, outcome)| match outcome {
            StepOutcome::FatalFailure(cause) => Some(format!("{}: {}", step, cause)),
            _ => None,
        })
    }

    pub fn is_fatal(&self) -> bool {
        self.fatal().is_some()
    }

    /// Recoverable failures in the order they happened
    pub fn warnings(&self) -> Vec<String> {
        self.outcomes
            .iter()
            .filter_map(|(step, outcome)| match outcome {
                StepOutcome::RecoverableFailure(cause) => Some(format!("{}: {}", step, cause)),
                _ => None,
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recoverable_failures_become_warnings() {
        let mut report = StepReport::new();

        let value = report.best_effort("copy drafts", Ok::<_, DatabaseError>(3));
        assert_eq!(value, Some(3));

        let missing: Option<()> = report.best_effort(
            "copy signatures",
            Err(DatabaseError::Config("no signatures directory".into())),
        );
        assert!(missing.is_none());

        assert!(!report.is_fatal());
        assert_eq!(
            report.warnings(),
            vec!["copy signatures: Configuration error: no signatures directory".to_string()]
        );
    }

    #[test]
    fn test_first_fatal_failure_is_reported() {
        let mut report = StepReport::new();
        let copied = report.require::<()>("copy database", Err(DatabaseError::NotInitialized));
        assert!(matches!(copied, Err(DatabaseError::NotInitialized)));
        let _ = report.require::<()>("verify bundle", Err(DatabaseError::BackupNotFound));

        assert!(report.is_fatal());
        assert_eq!(
            report.fatal().unwrap(),
            "copy database: Database connection is not initialized"
        );
        assert!(report.warnings().is_empty());
    }
}
