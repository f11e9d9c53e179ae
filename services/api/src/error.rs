//! services/api/src/error.rs
//!
//! Defines the primary error type for the entire API service, and the mapping
//! of engine errors onto HTTP status codes.

use crate::config::ConfigError;
use adaptive_quiz_core::{PortError, QuizError};
use axum::http::StatusCode;

/// The primary error type for the `api` service.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// Represents an error that occurred during configuration loading.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Represents an error from the underlying database library.
    #[error("Database Error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration Error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// Represents a standard Input/Output error (e.g., binding to a network socket).
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A catch-all for any other unexpected errors.
    #[error("An unexpected internal error occurred: {0}")]
    Internal(String),
}

/// The HTTP status a failed engine operation is answered with.
pub fn status_for(err: &QuizError) -> StatusCode {
    match err {
        QuizError::Port(PortError::NotFound(_)) => StatusCode::NOT_FOUND,
        QuizError::Port(PortError::Conflict(_)) => StatusCode::CONFLICT,
        QuizError::Port(PortError::Transaction(_) | PortError::Unexpected(_)) => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
        QuizError::InconsistentTree { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        QuizError::UnknownChild { .. } | QuizError::UnknownSlot(_) => StatusCode::NOT_FOUND,
        QuizError::InvalidPlacement { .. }
        | QuizError::IllegalConditionReference(_)
        | QuizError::MainBlockCondition
        | QuizError::MarkOutOfRange { .. } => StatusCode::UNPROCESSABLE_ENTITY,
        QuizError::InvalidGrade(_) => StatusCode::BAD_REQUEST,
        QuizError::NoQuestions(_)
        | QuizError::AttemptFinished(_)
        | QuizError::SlotMismatch { .. }
        | QuizError::SlotAlreadyFinished(_)
        | QuizError::SlotStillOpen(_)
        | QuizError::QuizHasAttempts(_) => StatusCode::CONFLICT,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use adaptive_quiz_core::{AttemptId, ElementId, QuizId};

    #[test]
    fn engine_errors_map_to_statuses() {
        let cases = [
            (QuizError::Port(PortError::NotFound("quiz".into())), StatusCode::NOT_FOUND),
            (QuizError::Port(PortError::Conflict("slot".into())), StatusCode::CONFLICT),
            (QuizError::Port(PortError::Transaction("commit".into())), StatusCode::INTERNAL_SERVER_ERROR),
            (QuizError::SlotMismatch { current: 2, submitted: 1 }, StatusCode::CONFLICT),
            (QuizError::AttemptFinished(AttemptId(1)), StatusCode::CONFLICT),
            (QuizError::NoQuestions(QuizId(1)), StatusCode::CONFLICT),
            (QuizError::IllegalConditionReference(ElementId(3)), StatusCode::UNPROCESSABLE_ENTITY),
            (QuizError::InvalidGrade(f64::NAN), StatusCode::BAD_REQUEST),
            (QuizError::QuizHasAttempts(QuizId(1)), StatusCode::CONFLICT),
            (QuizError::SlotStillOpen(2), StatusCode::CONFLICT),
            (
                QuizError::MarkOutOfRange { slot: 1, mark: 7.0, max_mark: 5.0 },
                StatusCode::UNPROCESSABLE_ENTITY,
            ),
        ];
        for (err, status) in cases {
            assert_eq!(status_for(&err), status, "{}", err);
        }
    }
}
