//! crates/adaptive_quiz_core/src/domain.rs
//!
//! Defines the pure, core data structures of the adaptive quiz.
//! These structs are independent of any database or serialization format.

use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

//=========================================================================================
// Record Identifiers
//=========================================================================================

macro_rules! record_id {
    ($($(#[$meta:meta])* $name:ident),* $(,)?) => {
        $(
            $(#[$meta])*
            #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
            pub struct $name(pub i64);

            impl fmt::Display for $name {
                fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                    write!(f, "{}", self.0)
                }
            }
        )*
    };
}

record_id!(
    QuizId,
    QuestionId,
    BlockId,
    /// Identifies a positioned entry inside a block (a "question instance").
    ElementId,
    ConditionId,
    PartId,
    UsageId,
    AttemptId,
    FeedbackBlockId,
);

//=========================================================================================
// Quiz and Question Bank
//=========================================================================================

/// An adaptive quiz. Its questions live in the block tree rooted at `main_block_id`.
#[derive(Debug, Clone)]
pub struct Quiz {
    pub id: QuizId,
    pub name: String,
    pub main_block_id: BlockId,
    /// The grade a perfect attempt is scaled to.
    pub grade: f64,
    /// The maximum raw mark attainable, recomputed after structural edits.
    pub sum_grades: f64,
    pub created_at: DateTime<Utc>,
    pub modified_at: DateTime<Utc>,
}

/// A question borrowed from the question bank.
#[derive(Debug, Clone)]
pub struct Question {
    pub id: QuestionId,
    pub name: String,
    pub question_text: String,
    pub default_mark: f64,
    /// Reference answer, only interpreted by the question execution service.
    pub answer: Option<String>,
}

#[derive(Debug, Clone)]
pub struct NewQuestion {
    pub name: String,
    pub question_text: String,
    pub default_mark: f64,
    pub answer: Option<String>,
}

//=========================================================================================
// Blocks
//=========================================================================================

/// The stored row of a block. Children and condition are loaded separately.
#[derive(Debug, Clone)]
pub struct BlockRecord {
    pub id: BlockId,
    pub quiz_id: QuizId,
    pub name: String,
}

/// What a block element points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElementRef {
    Question(QuestionId),
    Block(BlockId),
}

/// A positioned reference from a block to a question or to a nested block.
#[derive(Debug, Clone, PartialEq)]
pub struct BlockElement {
    pub id: ElementId,
    pub block_id: BlockId,
    pub target: ElementRef,
    /// Zero-based position within the owning block.
    pub slot: u32,
    /// Grade weight of this element (the mark a fully correct answer earns).
    pub grade: f64,
}

impl BlockElement {
    pub fn is_question(&self) -> bool {
        matches!(self.target, ElementRef::Question(_))
    }

    pub fn is_block(&self) -> bool {
        matches!(self.target, ElementRef::Block(_))
    }

    /// The id of the wrapped block, if this element is a sub-block.
    pub fn sub_block(&self) -> Option<BlockId> {
        match self.target {
            ElementRef::Block(id) => Some(id),
            ElementRef::Question(_) => None,
        }
    }
}

//=========================================================================================
// Conditions
//=========================================================================================

/// The comparison a condition part applies to a previously obtained mark.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Comparator {
    WasDisplayed,
    Less,
    LessOrEqual,
    Greater,
    GreaterOrEqual,
    Equal,
    NotEqual,
}

/// Which aggregate a condition gates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConditionOwner {
    Block(BlockId),
    Feedback(FeedbackBlockId),
}

#[derive(Debug, Clone, PartialEq)]
pub struct ConditionPart {
    pub id: PartId,
    pub comparator: Comparator,
    pub element_id: ElementId,
    pub grade: f64,
}

/// A condition part as submitted by an editor. Parts without an id are new.
#[derive(Debug, Clone, PartialEq)]
pub struct PartDraft {
    pub id: Option<PartId>,
    pub comparator: Comparator,
    pub element_id: ElementId,
    pub grade: f64,
}

/// A boolean gate combining its parts with AND (`use_and`) or OR.
#[derive(Debug, Clone)]
pub struct Condition {
    pub id: ConditionId,
    pub owner: ConditionOwner,
    pub use_and: bool,
    pub parts: Vec<ConditionPart>,
}

/// The writes that turn a stored condition into an edited one.
///
/// A store applies all of them or none.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConditionChanges {
    /// The new combinator, `None` to keep the stored one.
    pub use_and: Option<bool>,
    pub deleted: Vec<PartId>,
    pub updated: Vec<ConditionPart>,
    pub inserted: Vec<PartDraft>,
}

//=========================================================================================
// Question Usage (the question execution session of an attempt)
//=========================================================================================

/// Submitted form data for one question, keyed by field name.
pub type Response = BTreeMap<String, String>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotState {
    /// Started, waiting for the student.
    Todo,
    /// A response was recorded but not yet graded.
    Answered,
    Graded,
    /// Finished without a response.
    GaveUp,
}

#[derive(Debug, Clone, PartialEq)]
pub struct UsageSlot {
    /// One-based slot number at the time the usage was created.
    pub slot: u32,
    pub element_id: ElementId,
    pub question_id: QuestionId,
    pub max_mark: f64,
    pub state: SlotState,
    pub response: Option<Response>,
    /// Achieved fraction of `max_mark`, set once graded.
    pub fraction: Option<f64>,
    /// Whether the slot has been presented to the student.
    pub viewed: bool,
    /// When the slot was last graded or given up.
    pub finished_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
pub struct QuestionUsage {
    pub id: UsageId,
    pub slots: Vec<UsageSlot>,
}

//=========================================================================================
// Attempts
//=========================================================================================

/// One student's traversal through a quiz.
#[derive(Debug, Clone)]
pub struct Attempt {
    pub id: AttemptId,
    pub quiz_id: QuizId,
    pub user_id: Uuid,
    /// Sequence number of this attempt for the user on the quiz, starting at 1.
    pub attempt_number: u32,
    pub usage_id: UsageId,
    /// One-based position in the enumerated slot sequence.
    pub current_slot: u32,
    pub sum_grades: Option<f64>,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub modified_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewAttempt {
    pub quiz_id: QuizId,
    pub user_id: Uuid,
    pub attempt_number: u32,
    pub current_slot: u32,
    /// Set together with `finished_at` for attempts with no reachable slot.
    pub sum_grades: Option<f64>,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptStatus {
    InProgress,
    Finished,
}

//=========================================================================================
// Specialized Feedback
//=========================================================================================

/// A condition-gated feedback text that overrides the feedback of the elements it uses.
#[derive(Debug, Clone)]
pub struct FeedbackBlock {
    pub id: FeedbackBlockId,
    pub quiz_id: QuizId,
    pub name: String,
    pub feedback_text: String,
    pub used_elements: Vec<ElementId>,
}
