//! crates/adaptive_quiz_core/src/error.rs
//!
//! The error type returned by the quiz engine's operations.

use crate::domain::{AttemptId, BlockId, ElementId, QuizId};
use crate::ports::PortError;

#[derive(Debug, thiserror::Error)]
pub enum QuizError {
    /// Propagated from the record store or the question execution service.
    #[error(transparent)]
    Port(#[from] PortError),

    #[error("Block tree of quiz {quiz_id} is inconsistent: {detail}")]
    InconsistentTree { quiz_id: QuizId, detail: String },

    #[error("Element {element_id} is not a child of block {block_id}")]
    UnknownChild {
        block_id: BlockId,
        element_id: ElementId,
    },

    #[error("Block {block_id} cannot be placed there: {reason}")]
    InvalidPlacement { block_id: BlockId, reason: String },

    #[error("Condition part references element {0}, which does not precede the gated block")]
    IllegalConditionReference(ElementId),

    #[error("The main block of a quiz cannot carry a condition")]
    MainBlockCondition,

    #[error("Invalid grade value: {0}")]
    InvalidGrade(f64),

    #[error("Quiz {0} has no questions")]
    NoQuestions(QuizId),

    #[error("Attempt {0} is already finished")]
    AttemptFinished(AttemptId),

    #[error("Submitted slot {submitted} does not match the current slot {current}")]
    SlotMismatch { current: u32, submitted: u32 },

    #[error("Slot {0} does not exist in this attempt")]
    UnknownSlot(u32),

    #[error("Slot {0} has already been finished")]
    SlotAlreadyFinished(u32),

    #[error("Slot {0} has not been finished yet")]
    SlotStillOpen(u32),

    #[error("Mark {mark} is outside 0..={max_mark} for slot {slot}")]
    MarkOutOfRange { slot: u32, mark: f64, max_mark: f64 },

    #[error("Quiz {0} already has attempts; its structure can no longer change")]
    QuizHasAttempts(QuizId),
}

impl QuizError {
    /// Whether the error stems from a record that does not exist.
    pub fn is_not_found(&self) -> bool {
        matches!(self, QuizError::Port(PortError::NotFound(_)))
    }
}

/// A convenience type alias for `Result<T, QuizError>`.
pub type QuizResult<T> = Result<T, QuizError>;
