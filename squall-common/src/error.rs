//! Error catalog for Squall.
//!
//! Each kind maps to a distinct failure mode of a scenario:
//!
//! | Kind                 | Meaning                                        |
//! |----------------------|------------------------------------------------|
//! | `Precondition`       | Required environment missing - fatal at startup|
//! | `Induction`          | Fault could not be applied - no retry          |
//! | `ConvergenceTimeout` | Bounded poll never observed success            |
//! | `Validation`         | Observation completed with a wrong result      |
//! | `Reversal`           | Fault could not be undone - most severe        |
//! | `Driver`             | Transient collaborator failure                 |

use crate::types::{FaultKind, NodeId};
use std::time::Duration;
use thiserror::Error;

/// Result alias used throughout Squall.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// Required configuration or environment is missing.
    #[error("missing required environment variables: {}", missing.join(", "))]
    Precondition { missing: Vec<String> },

    /// A fault could not be applied to a target. Partial inductions are
    /// reported here, never retried automatically.
    #[error("could not induce {fault} on node {node}: {detail}")]
    Induction {
        fault: FaultKind,
        node: NodeId,
        detail: String,
    },

    /// A bounded poll exhausted its budget without observing success.
    /// Carries the last observed failure detail.
    #[error("timed out after {waited:?} waiting for {what} (last seen: {last_seen})")]
    ConvergenceTimeout {
        what: String,
        waited: Duration,
        last_seen: String,
    },

    /// An observation ran to completion but returned a semantically wrong
    /// result (e.g., zero snapshot entries). Distinct from a timeout.
    #[error("{what}: {detail}")]
    Validation { what: String, detail: String },

    /// A fault could not be undone. Aborts remaining cycles; the scenario
    /// skips straight to best-effort teardown.
    #[error("could not reverse {fault} on node {node}: {detail}")]
    Reversal {
        fault: FaultKind,
        node: NodeId,
        detail: String,
    },

    /// A collaborator call failed. Treated as "not yet converged" inside a
    /// poll, terminal elsewhere.
    #[error("driver error: {0}")]
    Driver(String),
}

impl Error {
    /// Reversal failures abort all remaining fault cycles.
    pub fn is_reversal(&self) -> bool {
        matches!(self, Self::Reversal { .. })
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::ConvergenceTimeout { .. })
    }

    pub fn is_validation(&self) -> bool {
        matches!(self, Self::Validation { .. })
    }

    /// Short kind label for step reports and logs.
    pub fn kind_label(&self) -> &'static str {
        match self {
            Self::Precondition { .. } => "precondition",
            Self::Induction { .. } => "induction-failure",
            Self::ConvergenceTimeout { .. } => "convergence-timeout",
            Self::Validation { .. } => "validation-failure",
            Self::Reversal { .. } => "reversal-failure",
            Self::Driver(_) => "driver-error",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reversal_is_flagged() {
        let err = Error::Reversal {
            fault: FaultKind::DriveFailure,
            node: NodeId::new("n1"),
            detail: "token already consumed".to_string(),
        };
        assert!(err.is_reversal());
        assert_eq!(err.kind_label(), "reversal-failure");
    }

    #[test]
    fn test_timeout_carries_last_seen() {
        let err = Error::ConvergenceTimeout {
            what: "storage driver up on n1".to_string(),
            waited: Duration::from_secs(120),
            last_seen: "driver down".to_string(),
        };
        assert!(err.is_timeout());
        let msg = err.to_string();
        assert!(msg.contains("storage driver up on n1"));
        assert!(msg.contains("driver down"));
    }

    #[test]
    fn test_validation_distinct_from_timeout() {
        let err = Error::Validation {
            what: "snapshot schedule pg-data-interval-schedule".to_string(),
            detail: "no scheduled snapshot status entries".to_string(),
        };
        assert!(err.is_validation());
        assert!(!err.is_timeout());
    }
}
