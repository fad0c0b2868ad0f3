use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

use crate::session::{Action, Scope};

pub type RosterResult<T> = Result<T, RosterError>;

/// Outcomes the roster core reports to its callers instead of panicking.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RosterError {
    #[error("invalid {field}: {message}")]
    Validation { field: &'static str, message: String },
    #[error("student {student_id} not found")]
    NotFound { student_id: Uuid },
    #[error("{action} denied for {scope}: {reason}")]
    Forbidden {
        action: Action,
        scope: Scope,
        reason: String,
    },
    #[error("conflicting update for student {student_id}: {message}")]
    Conflict { student_id: Uuid, message: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    ValidationError,
    NotFound,
    Forbidden,
    Conflict,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::ValidationError => "validation_error",
            ErrorKind::NotFound => "not_found",
            ErrorKind::Forbidden => "forbidden",
            ErrorKind::Conflict => "conflict",
        }
    }
}

impl RosterError {
    pub(crate) fn validation(field: &'static str, message: impl Into<String>) -> Self {
        RosterError::Validation {
            field,
            message: message.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            RosterError::Validation { .. } => ErrorKind::ValidationError,
            RosterError::NotFound { .. } => ErrorKind::NotFound,
            RosterError::Forbidden { .. } => ErrorKind::Forbidden,
            RosterError::Conflict { .. } => ErrorKind::Conflict,
        }
    }

    /// Only conflicts may be retried, and only after re-reading current state.
    pub fn is_retryable(&self) -> bool {
        matches!(self, RosterError::Conflict { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_map_to_stable_codes() {
        let err = RosterError::validation("attendance_percent", "must be within 0..=100");
        assert_eq!(err.kind().as_str(), "validation_error");
        assert_eq!(
            err.to_string(),
            "invalid attendance_percent: must be within 0..=100"
        );

        let missing = RosterError::NotFound {
            student_id: Uuid::nil(),
        };
        assert_eq!(missing.kind(), ErrorKind::NotFound);
    }

    #[test]
    fn only_conflicts_are_retryable() {
        let conflict = RosterError::Conflict {
            student_id: Uuid::nil(),
            message: "revision moved".to_string(),
        };
        let forbidden = RosterError::Forbidden {
            action: Action::ViewRoster,
            scope: Scope::Cohort("SEM-06-D".to_string()),
            reason: "cohort not assigned".to_string(),
        };

        assert!(conflict.is_retryable());
        assert!(!forbidden.is_retryable());
        assert!(!RosterError::validation("full_name", "empty").is_retryable());
        assert_eq!(
            forbidden.to_string(),
            "view_roster denied for cohort SEM-06-D: cohort not assigned"
        );
    }
}
