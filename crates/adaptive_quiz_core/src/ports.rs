//! crates/adaptive_quiz_core/src/ports.rs
//!
//! Defines the service contracts (traits) the quiz engine depends on.
//! These traits form the boundary of the hexagonal architecture, allowing the core
//! to be independent of the concrete record store and question execution service.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::domain::{
    Attempt, AttemptId, BlockElement, BlockId, BlockRecord, Condition, ConditionChanges,
    ConditionOwner, ElementId, ElementRef, FeedbackBlock, FeedbackBlockId, NewAttempt,
    NewQuestion, Question, QuestionId, QuestionUsage, Quiz, QuizId, Response, UsageId,
    UsageSlot,
};

//=========================================================================================
// Generic Port Error and Result Types
//=========================================================================================

/// A generic error type for all port operations.
/// This abstracts away the specific errors from external services (e.g., the database).
#[derive(Debug, thiserror::Error)]
pub enum PortError {
    #[error("Item not found: {0}")]
    NotFound(String),
    /// A concurrent writer changed the record since it was read.
    #[error("Conflicting update: {0}")]
    Conflict(String),
    /// The store refused to commit; nothing of the operation was persisted.
    #[error("Transaction failed: {0}")]
    Transaction(String),
    #[error("An unexpected error occurred: {0}")]
    Unexpected(String),
}

/// A convenience type alias for `Result<T, PortError>`.
pub type PortResult<T> = Result<T, PortError>;

//=========================================================================================
// Service Ports (Traits)
//=========================================================================================

/// The record store holding quizzes, blocks, conditions, attempts and feedback.
///
/// Every method is one logical operation. Methods that touch several records
/// must apply all of their writes or none of them.
#[async_trait]
pub trait QuizStore: Send + Sync {
    // --- Quizzes ---
    /// Creates the quiz together with its (empty) main block named after the quiz.
    async fn create_quiz(&self, name: &str, grade: f64, now: DateTime<Utc>) -> PortResult<Quiz>;

    async fn get_quiz(&self, quiz_id: QuizId) -> PortResult<Quiz>;

    async fn update_quiz_sum_grades(
        &self,
        quiz_id: QuizId,
        sum_grades: f64,
        now: DateTime<Utc>,
    ) -> PortResult<()>;

    /// Deletes the quiz and every record owned by it.
    async fn delete_quiz(&self, quiz_id: QuizId) -> PortResult<()>;

    // --- Question Bank ---
    async fn create_question(&self, question: NewQuestion) -> PortResult<Question>;

    async fn get_question(&self, question_id: QuestionId) -> PortResult<Question>;

    // --- Blocks ---
    async fn create_block(&self, quiz_id: QuizId, name: &str) -> PortResult<BlockRecord>;

    async fn get_block(&self, block_id: BlockId) -> PortResult<BlockRecord>;

    async fn rename_block(&self, block_id: BlockId, name: &str) -> PortResult<()>;

    /// Returns the elements of a block ordered by slot.
    async fn get_block_elements(&self, block_id: BlockId) -> PortResult<Vec<BlockElement>>;

    /// Appends an element; its slot is the block's child count at insertion time.
    async fn insert_block_element(
        &self,
        block_id: BlockId,
        target: ElementRef,
        grade: f64,
    ) -> PortResult<BlockElement>;

    /// Deletes an element and renumbers its later siblings so slots stay contiguous.
    async fn delete_block_element(&self, element_id: ElementId) -> PortResult<()>;

    // --- Conditions ---
    async fn get_condition(&self, owner: ConditionOwner) -> PortResult<Option<Condition>>;

    /// Applies condition edits in one transaction.
    ///
    /// Creates the condition of `owner` first when it has none; a new condition
    /// combines with AND unless `changes.use_and` says otherwise. Deleted and
    /// updated parts must belong to that condition, otherwise nothing is written.
    async fn apply_condition_changes(
        &self,
        owner: ConditionOwner,
        changes: &ConditionChanges,
    ) -> PortResult<Condition>;

    // --- Attempts ---
    async fn count_attempts(&self, quiz_id: QuizId, user_id: Uuid) -> PortResult<u32>;

    /// Creates the question usage and the attempt linked to it in one transaction.
    async fn create_attempt(
        &self,
        attempt: NewAttempt,
        slots: Vec<UsageSlot>,
    ) -> PortResult<(Attempt, QuestionUsage)>;

    async fn get_attempt(&self, attempt_id: AttemptId) -> PortResult<Attempt>;

    async fn get_usage(&self, usage_id: UsageId) -> PortResult<QuestionUsage>;

    /// Persists the attempt row and its usage in one transaction.
    ///
    /// Fails with `PortError::Conflict` when the stored attempt is no longer at
    /// `expected_slot`, in which case nothing is written.
    async fn save_attempt_progress(
        &self,
        attempt: &Attempt,
        expected_slot: u32,
        usage: &QuestionUsage,
    ) -> PortResult<()>;

    /// Persists a regraded slot of the attempt's usage together with the
    /// attempt row, in one transaction.
    async fn save_manual_mark(&self, attempt: &Attempt, slot: &UsageSlot) -> PortResult<()>;

    async fn list_attempts(&self, quiz_id: QuizId) -> PortResult<Vec<Attempt>>;

    // --- Feedback Blocks ---
    /// Creates a feedback block together with its empty AND condition.
    async fn create_feedback_block(
        &self,
        quiz_id: QuizId,
        name: &str,
        feedback_text: &str,
    ) -> PortResult<(FeedbackBlock, Condition)>;

    async fn get_feedback_block(&self, feedback_id: FeedbackBlockId) -> PortResult<FeedbackBlock>;

    /// Lists the feedback blocks of a quiz in creation order.
    async fn list_feedback_blocks(&self, quiz_id: QuizId) -> PortResult<Vec<FeedbackBlock>>;

    /// Replaces name, text and used elements of a feedback block and applies
    /// the edits of its condition, all in one transaction.
    async fn update_feedback_block(
        &self,
        feedback: &FeedbackBlock,
        condition: &ConditionChanges,
    ) -> PortResult<Condition>;

    /// Deletes a feedback block together with its condition.
    async fn delete_feedback_block(&self, feedback_id: FeedbackBlockId) -> PortResult<()>;
}

/// The opaque question execution service that judges responses.
#[async_trait]
pub trait QuestionEngine: Send + Sync {
    /// Grades a response, returning the achieved fraction of the question's mark in `[0, 1]`.
    async fn grade_response(&self, question: &Question, response: &Response) -> PortResult<f64>;
}
