//! crates/adaptive_quiz_core/src/feedback.rs
//!
//! Specialized feedback: condition-gated feedback texts that replace the default
//! feedback of the elements they use.

use std::collections::HashSet;

use tracing::info;

use crate::condition::ResultLookup;
use crate::domain::{
    Condition, ConditionChanges, ConditionOwner, ElementId, FeedbackBlock, FeedbackBlockId,
    PartDraft, Quiz,
};
use crate::error::{QuizError, QuizResult};
use crate::ports::{PortError, QuizStore};
use crate::tree::BlockTree;

/// A feedback block paired with its condition.
#[derive(Debug, Clone)]
pub struct GatedFeedback {
    pub block: FeedbackBlock,
    pub condition: Condition,
}

/// The submitted state of a feedback block.
#[derive(Debug, Clone)]
pub struct FeedbackUpdate {
    pub name: String,
    pub feedback_text: String,
    pub used_elements: Vec<ElementId>,
    pub use_and: bool,
    pub parts: Vec<PartDraft>,
}

/// Creates an empty feedback block with an (always fulfilled) empty AND condition.
pub async fn create_feedback_block(
    store: &dyn QuizStore,
    quiz: &Quiz,
    name: &str,
) -> QuizResult<GatedFeedback> {
    let (block, condition) = store.create_feedback_block(quiz.id, name, "").await?;
    info!(quiz_id = %quiz.id, feedback_id = %block.id, "Feedback block created");
    Ok(GatedFeedback { block, condition })
}

pub async fn load_feedback_block(
    store: &dyn QuizStore,
    quiz: &Quiz,
    feedback_id: FeedbackBlockId,
) -> QuizResult<GatedFeedback> {
    let block = store.get_feedback_block(feedback_id).await?;
    if block.quiz_id != quiz.id {
        return Err(PortError::NotFound(format!(
            "Feedback block {} not found in quiz {}",
            feedback_id, quiz.id
        ))
        .into());
    }
    let condition = Condition::load_or_create(store, ConditionOwner::Feedback(feedback_id)).await?;
    Ok(GatedFeedback { block, condition })
}

/// Applies an editor submission to a feedback block.
///
/// Used elements and condition parts may reference any element of the tree.
pub async fn update_feedback_block(
    store: &dyn QuizStore,
    quiz: &Quiz,
    feedback_id: FeedbackBlockId,
    update: FeedbackUpdate,
) -> QuizResult<GatedFeedback> {
    let mut gated = load_feedback_block(store, quiz, feedback_id).await?;
    let tree = BlockTree::load(store, quiz).await?;
    let referenced = update
        .used_elements
        .iter()
        .copied()
        .chain(update.parts.iter().map(|part| part.element_id));
    for element in referenced {
        if tree.element(element).is_none() {
            return Err(QuizError::IllegalConditionReference(element));
        }
    }

    let changes = ConditionChanges::between(Some(&gated.condition), update.use_and, update.parts)?;

    let mut used_elements = update.used_elements;
    let mut seen = HashSet::new();
    used_elements.retain(|element| seen.insert(*element));
    gated.block.name = update.name;
    gated.block.feedback_text = update.feedback_text;
    gated.block.used_elements = used_elements;
    gated.condition = store.update_feedback_block(&gated.block, &changes).await?;
    info!(quiz_id = %quiz.id, %feedback_id, "Feedback block updated");
    Ok(gated)
}

pub async fn delete_feedback_block(
    store: &dyn QuizStore,
    quiz: &Quiz,
    feedback_id: FeedbackBlockId,
) -> QuizResult<()> {
    load_feedback_block(store, quiz, feedback_id).await?;
    store.delete_feedback_block(feedback_id).await?;
    Ok(())
}

/// All feedback blocks of a quiz, in creation order.
#[derive(Debug, Clone, Default)]
pub struct SpecializedFeedback {
    blocks: Vec<GatedFeedback>,
}

impl SpecializedFeedback {
    pub async fn load(store: &dyn QuizStore, quiz: &Quiz) -> QuizResult<Self> {
        let mut blocks = Vec::new();
        for block in store.list_feedback_blocks(quiz.id).await? {
            let condition =
                Condition::load_or_create(store, ConditionOwner::Feedback(block.id)).await?;
            blocks.push(GatedFeedback { block, condition });
        }
        Ok(Self { blocks })
    }

    pub fn blocks(&self) -> &[GatedFeedback] {
        &self.blocks
    }

    /// Whether any feedback block overrides the feedback of `element`.
    pub fn has_specialized_feedback(&self, element: ElementId) -> bool {
        self.blocks
            .iter()
            .any(|gated| gated.block.used_elements.contains(&element))
    }

    /// The feedback blocks whose condition holds for the attempt.
    pub fn active_blocks(&self, results: &dyn ResultLookup) -> Vec<&FeedbackBlock> {
        self.blocks
            .iter()
            .filter(|gated| gated.condition.is_fulfilled(results))
            .map(|gated| &gated.block)
            .collect()
    }

    /// The text replacing the feedback of `element`, from the first active block using it.
    pub fn feedback_for(&self, element: ElementId, results: &dyn ResultLookup) -> Option<&str> {
        self.blocks
            .iter()
            .filter(|gated| gated.block.used_elements.contains(&element))
            .find(|gated| gated.condition.is_fulfilled(results))
            .map(|gated| gated.block.feedback_text.as_str())
    }
}
