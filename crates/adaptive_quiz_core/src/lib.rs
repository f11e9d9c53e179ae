pub mod attempt;
pub mod block;
pub mod condition;
pub mod domain;
pub mod error;
pub mod feedback;
pub mod memory;
pub mod ports;
pub mod quiz;
pub mod sequencer;
pub mod tree;
pub mod usage;

pub use attempt::{AttemptResults, AttemptSession, SlotOutcome};
pub use block::Block;
pub use condition::{ResultLookup, MARK_TOLERANCE};
pub use domain::{
    Attempt, AttemptId, AttemptStatus, BlockElement, BlockId, BlockRecord, Comparator, Condition,
    ConditionChanges, ConditionId, ConditionOwner, ConditionPart, ElementId, ElementRef,
    FeedbackBlock, FeedbackBlockId, NewAttempt, NewQuestion, PartDraft, PartId, Question, QuestionId,
    QuestionUsage, Quiz, QuizId, Response, SlotState, UsageId, UsageSlot,
};
pub use error::{QuizError, QuizResult};
pub use feedback::{FeedbackUpdate, GatedFeedback, SpecializedFeedback};
pub use memory::InMemoryStore;
pub use ports::{PortError, PortResult, QuestionEngine, QuizStore};
pub use quiz::{AttemptsOverview, OverviewRow};
pub use sequencer::{SlotMap, SlotSequencer};
pub use tree::BlockTree;
pub use usage::UsagePlan;
