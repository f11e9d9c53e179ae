//! services/api/src/web/protocol.rs
//!
//! Defines the JSON payloads exchanged between editor/student clients and the
//! API server. Identifiers travel as plain integers.

use std::collections::BTreeMap;

use adaptive_quiz_core::domain::{
    AttemptStatus, BlockElement, Comparator, Condition, ConditionPart, ElementId, ElementRef,
    PartDraft, PartId, Question, Quiz,
};
use adaptive_quiz_core::feedback::GatedFeedback;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

//=========================================================================================
// Quizzes and Questions
//=========================================================================================

#[derive(Deserialize, ToSchema)]
pub struct CreateQuizRequest {
    pub name: String,
    /// Defaults to the configured quiz grade.
    pub grade: Option<f64>,
}

#[derive(Serialize, Deserialize, ToSchema)]
pub struct QuizResponse {
    pub id: i64,
    pub name: String,
    pub main_block_id: i64,
    pub grade: f64,
    pub sum_grades: f64,
    pub created_at: DateTime<Utc>,
    pub modified_at: DateTime<Utc>,
}

impl From<Quiz> for QuizResponse {
    fn from(quiz: Quiz) -> Self {
        Self {
            id: quiz.id.0,
            name: quiz.name,
            main_block_id: quiz.main_block_id.0,
            grade: quiz.grade,
            sum_grades: quiz.sum_grades,
            created_at: quiz.created_at,
            modified_at: quiz.modified_at,
        }
    }
}

#[derive(Deserialize, ToSchema)]
pub struct CreateQuestionRequest {
    pub name: String,
    pub question_text: String,
    pub default_mark: f64,
    /// Accepted answers, alternatives separated by `|`.
    pub answer: Option<String>,
}

#[derive(Serialize, Deserialize, ToSchema)]
pub struct QuestionResponse {
    pub id: i64,
    pub name: String,
    pub question_text: String,
    pub default_mark: f64,
    pub has_answer_key: bool,
}

impl From<Question> for QuestionResponse {
    fn from(question: Question) -> Self {
        Self {
            id: question.id.0,
            name: question.name,
            question_text: question.question_text,
            default_mark: question.default_mark,
            has_answer_key: question.answer.is_some(),
        }
    }
}

//=========================================================================================
// Blocks and Conditions
//=========================================================================================

#[derive(Serialize, Deserialize, ToSchema, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ElementKind {
    Question,
    Block,
}

#[derive(Serialize, Deserialize, ToSchema)]
pub struct ElementResponse {
    pub id: i64,
    /// Zero-based position within the owning block.
    pub slot: u32,
    pub kind: ElementKind,
    pub question_id: Option<i64>,
    pub block_id: Option<i64>,
    pub grade: f64,
}

impl From<&BlockElement> for ElementResponse {
    fn from(element: &BlockElement) -> Self {
        let (kind, question_id, block_id) = match element.target {
            ElementRef::Question(id) => (ElementKind::Question, Some(id.0), None),
            ElementRef::Block(id) => (ElementKind::Block, None, Some(id.0)),
        };
        Self {
            id: element.id.0,
            slot: element.slot,
            kind,
            question_id,
            block_id,
            grade: element.grade,
        }
    }
}

#[derive(Serialize, Deserialize, ToSchema, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ComparatorDto {
    WasDisplayed,
    Less,
    LessOrEqual,
    Greater,
    GreaterOrEqual,
    Equal,
    NotEqual,
}

impl From<ComparatorDto> for Comparator {
    fn from(dto: ComparatorDto) -> Self {
        match dto {
            ComparatorDto::WasDisplayed => Comparator::WasDisplayed,
            ComparatorDto::Less => Comparator::Less,
            ComparatorDto::LessOrEqual => Comparator::LessOrEqual,
            ComparatorDto::Greater => Comparator::Greater,
            ComparatorDto::GreaterOrEqual => Comparator::GreaterOrEqual,
            ComparatorDto::Equal => Comparator::Equal,
            ComparatorDto::NotEqual => Comparator::NotEqual,
        }
    }
}

impl From<Comparator> for ComparatorDto {
    fn from(comparator: Comparator) -> Self {
        match comparator {
            Comparator::WasDisplayed => ComparatorDto::WasDisplayed,
            Comparator::Less => ComparatorDto::Less,
            Comparator::LessOrEqual => ComparatorDto::LessOrEqual,
            Comparator::Greater => ComparatorDto::Greater,
            Comparator::GreaterOrEqual => ComparatorDto::GreaterOrEqual,
            Comparator::Equal => ComparatorDto::Equal,
            Comparator::NotEqual => ComparatorDto::NotEqual,
        }
    }
}

/// A condition part as submitted by the editor. Parts without an id are new.
#[derive(Serialize, Deserialize, ToSchema, Clone)]
pub struct PartPayload {
    pub id: Option<i64>,
    pub comparator: ComparatorDto,
    pub element_id: i64,
    pub grade: f64,
}

impl From<PartPayload> for PartDraft {
    fn from(payload: PartPayload) -> Self {
        PartDraft {
            id: payload.id.map(PartId),
            comparator: payload.comparator.into(),
            element_id: ElementId(payload.element_id),
            grade: payload.grade,
        }
    }
}

#[derive(Serialize, Deserialize, ToSchema)]
pub struct PartResponse {
    pub id: i64,
    pub comparator: ComparatorDto,
    pub element_id: i64,
    pub grade: f64,
}

impl From<&ConditionPart> for PartResponse {
    fn from(part: &ConditionPart) -> Self {
        Self {
            id: part.id.0,
            comparator: part.comparator.into(),
            element_id: part.element_id.0,
            grade: part.grade,
        }
    }
}

#[derive(Serialize, Deserialize, ToSchema)]
pub struct ConditionResponse {
    pub id: i64,
    pub use_and: bool,
    pub parts: Vec<PartResponse>,
}

impl From<&Condition> for ConditionResponse {
    fn from(condition: &Condition) -> Self {
        Self {
            id: condition.id.0,
            use_and: condition.use_and,
            parts: condition.parts.iter().map(PartResponse::from).collect(),
        }
    }
}

#[derive(Deserialize, ToSchema)]
pub struct UpdateConditionRequest {
    pub use_and: bool,
    pub parts: Vec<PartPayload>,
}

#[derive(Serialize, Deserialize, ToSchema)]
pub struct BlockResponse {
    pub id: i64,
    pub name: String,
    pub is_main_block: bool,
    pub parent_id: Option<i64>,
    pub has_questions: bool,
    pub children: Vec<ElementResponse>,
    pub condition: Option<ConditionResponse>,
    /// Elements a condition on this block may reference.
    pub condition_candidates: Vec<i64>,
}

#[derive(Deserialize, ToSchema)]
pub struct RenameBlockRequest {
    pub name: String,
}

#[derive(Deserialize, ToSchema)]
pub struct AddQuestionRequest {
    pub question_id: i64,
}

#[derive(Deserialize, ToSchema)]
pub struct CreateSubblockRequest {
    pub name: String,
}

#[derive(Serialize, Deserialize, ToSchema)]
pub struct ChildrenResponse {
    pub block_id: i64,
    pub children: Vec<ElementResponse>,
}

/// One block of the structure overview.
#[derive(Serialize, Deserialize, ToSchema)]
pub struct BlockNode {
    pub id: i64,
    pub name: String,
    pub parent_id: Option<i64>,
    pub children: Vec<ElementResponse>,
    pub condition: Option<ConditionResponse>,
}

#[derive(Serialize, Deserialize, ToSchema)]
pub struct SlotEntry {
    pub slot: u32,
    pub element_id: i64,
}

#[derive(Serialize, Deserialize, ToSchema)]
pub struct StructureResponse {
    pub quiz_id: i64,
    pub main_block_id: i64,
    pub total_slots: u32,
    /// Blocks in depth-first pre-order, main block first.
    pub blocks: Vec<BlockNode>,
    pub slots: Vec<SlotEntry>,
}

//=========================================================================================
// Attempts
//=========================================================================================

#[derive(Serialize, Deserialize, ToSchema, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AttemptStatusDto {
    InProgress,
    Finished,
}

impl From<AttemptStatus> for AttemptStatusDto {
    fn from(status: AttemptStatus) -> Self {
        match status {
            AttemptStatus::InProgress => AttemptStatusDto::InProgress,
            AttemptStatus::Finished => AttemptStatusDto::Finished,
        }
    }
}

#[derive(Deserialize, ToSchema)]
pub struct ProcessSlotRequest {
    /// Submitted form fields, e.g. `{"answer": "42"}`.
    pub response: BTreeMap<String, String>,
}

#[derive(Serialize, Deserialize, ToSchema)]
pub struct CurrentQuestion {
    pub slot: u32,
    pub element_id: i64,
    pub question_id: i64,
    pub name: String,
    pub question_text: String,
    pub max_mark: f64,
}

#[derive(Serialize, Deserialize, ToSchema)]
pub struct SlotReview {
    pub slot: u32,
    pub element_id: i64,
    pub state: String,
    pub mark: Option<f64>,
    pub max_mark: f64,
    pub viewed: bool,
    /// When the slot was graded or given up.
    pub finished_at: Option<DateTime<Utc>>,
    /// Specialized feedback replacing the question's default feedback.
    pub feedback: Option<String>,
}

#[derive(Deserialize, ToSchema)]
pub struct ManualMarkRequest {
    /// The new mark, between 0 and the slot's maximum mark.
    pub mark: f64,
}

#[derive(Serialize, Deserialize, ToSchema)]
pub struct AttemptResponse {
    pub id: i64,
    pub quiz_id: i64,
    pub user_id: Uuid,
    pub attempt_number: u32,
    pub status: AttemptStatusDto,
    pub current_slot: u32,
    pub total_slots: u32,
    pub current_question: Option<CurrentQuestion>,
    pub sum_grades: Option<f64>,
    /// The sum rescaled onto the quiz grade.
    pub grade: Option<f64>,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    /// Per-slot results, filled once the attempt is finished.
    pub review: Vec<SlotReview>,
}

#[derive(Serialize, Deserialize, ToSchema)]
pub struct OverviewRowResponse {
    pub attempt_id: i64,
    pub user_id: Uuid,
    pub attempt_number: u32,
    pub status: AttemptStatusDto,
    pub sum_grades: Option<f64>,
    pub grade: Option<f64>,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

#[derive(Serialize, Deserialize, ToSchema)]
pub struct BestGrade {
    pub user_id: Uuid,
    pub grade: f64,
}

#[derive(Serialize, Deserialize, ToSchema)]
pub struct OverviewResponse {
    pub quiz_id: i64,
    pub grade: f64,
    pub sum_grades: f64,
    pub total_slots: u32,
    pub attempts: Vec<OverviewRowResponse>,
    pub best_grades: Vec<BestGrade>,
}

//=========================================================================================
// Specialized Feedback
//=========================================================================================

#[derive(Deserialize, ToSchema)]
pub struct CreateFeedbackRequest {
    pub name: String,
}

#[derive(Deserialize, ToSchema)]
pub struct UpdateFeedbackRequest {
    pub name: String,
    pub feedback_text: String,
    pub used_elements: Vec<i64>,
    pub use_and: bool,
    pub parts: Vec<PartPayload>,
}

#[derive(Serialize, Deserialize, ToSchema)]
pub struct FeedbackResponse {
    pub id: i64,
    pub name: String,
    pub feedback_text: String,
    pub used_elements: Vec<i64>,
    pub condition: ConditionResponse,
}

impl From<&GatedFeedback> for FeedbackResponse {
    fn from(gated: &GatedFeedback) -> Self {
        Self {
            id: gated.block.id.0,
            name: gated.block.name.clone(),
            feedback_text: gated.block.feedback_text.clone(),
            used_elements: gated.block.used_elements.iter().map(|e| e.0).collect(),
            condition: ConditionResponse::from(&gated.condition),
        }
    }
}
