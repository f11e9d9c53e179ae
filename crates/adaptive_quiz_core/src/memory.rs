//! crates/adaptive_quiz_core/src/memory.rs
//!
//! An in-process `QuizStore` backed by ordered maps behind a mutex.
//!
//! It is used by the test suites and by embedders that do not need persistence.
//! Every operation takes the lock once, so multi-record writes are applied
//! atomically with respect to other callers.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::domain::{
    Attempt, AttemptId, BlockElement, BlockId, BlockRecord, Condition, ConditionChanges,
    ConditionId, ConditionOwner, ConditionPart, ElementId, ElementRef, FeedbackBlock,
    FeedbackBlockId, NewAttempt, NewQuestion, PartId, Question, QuestionId, QuestionUsage, Quiz,
    QuizId, UsageId, UsageSlot,
};
use crate::ports::{PortError, PortResult, QuizStore};

#[derive(Debug, Clone, Copy)]
struct ConditionRow {
    owner: ConditionOwner,
    use_and: bool,
}

#[derive(Debug, Default)]
struct State {
    next_id: i64,
    quizzes: BTreeMap<QuizId, Quiz>,
    questions: BTreeMap<QuestionId, Question>,
    blocks: BTreeMap<BlockId, BlockRecord>,
    elements: BTreeMap<ElementId, BlockElement>,
    conditions: BTreeMap<ConditionId, ConditionRow>,
    parts: BTreeMap<PartId, (ConditionId, ConditionPart)>,
    usages: BTreeMap<UsageId, QuestionUsage>,
    attempts: BTreeMap<AttemptId, Attempt>,
    feedback: BTreeMap<FeedbackBlockId, FeedbackBlock>,
}

impl State {
    fn next_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }

    fn quiz(&self, quiz_id: QuizId) -> PortResult<&Quiz> {
        self.quizzes
            .get(&quiz_id)
            .ok_or_else(|| PortError::NotFound(format!("Quiz {} not found", quiz_id)))
    }

    fn condition_of(&self, owner: ConditionOwner) -> Option<ConditionId> {
        self.conditions
            .iter()
            .find(|(_, row)| row.owner == owner)
            .map(|(id, _)| *id)
    }

    fn load_condition(&self, condition_id: ConditionId) -> Option<Condition> {
        let row = self.conditions.get(&condition_id)?;
        let parts = self
            .parts
            .values()
            .filter(|(owner_id, _)| *owner_id == condition_id)
            .map(|(_, part)| part.clone())
            .collect();
        Some(Condition {
            id: condition_id,
            owner: row.owner,
            use_and: row.use_and,
            parts,
        })
    }

    /// Checks every edit against the current state, then applies them all.
    fn apply_condition_changes(
        &mut self,
        owner: ConditionOwner,
        changes: &ConditionChanges,
    ) -> PortResult<Condition> {
        let existing = self.condition_of(owner);
        let touched = changes
            .deleted
            .iter()
            .copied()
            .chain(changes.updated.iter().map(|part| part.id));
        for part_id in touched {
            match self.parts.get(&part_id) {
                Some((condition_id, _)) if Some(*condition_id) == existing => {}
                _ => {
                    return Err(PortError::NotFound(format!(
                        "Condition part {} not found",
                        part_id
                    )))
                }
            }
        }

        let condition_id = match existing {
            Some(condition_id) => condition_id,
            None => {
                let condition_id = ConditionId(self.next_id());
                let use_and = changes.use_and.unwrap_or(true);
                self.conditions.insert(condition_id, ConditionRow { owner, use_and });
                condition_id
            }
        };
        if let (Some(use_and), Some(row)) = (changes.use_and, self.conditions.get_mut(&condition_id)) {
            row.use_and = use_and;
        }
        for part_id in &changes.deleted {
            self.parts.remove(part_id);
        }
        for part in &changes.updated {
            self.parts.insert(part.id, (condition_id, part.clone()));
        }
        for draft in &changes.inserted {
            let part = ConditionPart {
                id: PartId(self.next_id()),
                comparator: draft.comparator,
                element_id: draft.element_id,
                grade: draft.grade,
            };
            self.parts.insert(part.id, (condition_id, part));
        }
        self.load_condition(condition_id)
            .ok_or_else(|| PortError::Unexpected(format!("Condition {} vanished", condition_id)))
    }

    fn delete_condition(&mut self, owner: ConditionOwner) {
        if let Some(condition_id) = self.condition_of(owner) {
            self.conditions.remove(&condition_id);
            self.parts.retain(|_, (owner_id, _)| *owner_id != condition_id);
        }
    }
}

#[derive(Debug, Default)]
pub struct InMemoryStore {
    state: Mutex<State>,
    fail_next_commit: AtomicBool,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the next multi-record write fail with `PortError::Transaction`
    /// without applying any of its changes.
    pub fn fail_next_commit(&self) {
        self.fail_next_commit.store(true, Ordering::SeqCst);
    }

    fn state(&self) -> PortResult<MutexGuard<'_, State>> {
        self.state
            .lock()
            .map_err(|e| PortError::Unexpected(format!("Store lock poisoned: {}", e)))
    }

    /// Locks the state for a multi-record write, honouring `fail_next_commit`.
    fn begin(&self) -> PortResult<MutexGuard<'_, State>> {
        if self.fail_next_commit.swap(false, Ordering::SeqCst) {
            return Err(PortError::Transaction("Commit refused".to_string()));
        }
        self.state()
    }
}

#[async_trait]
impl QuizStore for InMemoryStore {
    // --- Quizzes ---
    async fn create_quiz(&self, name: &str, grade: f64, now: DateTime<Utc>) -> PortResult<Quiz> {
        let mut state = self.begin()?;
        let quiz_id = QuizId(state.next_id());
        let main_block_id = BlockId(state.next_id());
        state.blocks.insert(
            main_block_id,
            BlockRecord {
                id: main_block_id,
                quiz_id,
                name: name.to_string(),
            },
        );
        let quiz = Quiz {
            id: quiz_id,
            name: name.to_string(),
            main_block_id,
            grade,
            sum_grades: 0.0,
            created_at: now,
            modified_at: now,
        };
        state.quizzes.insert(quiz_id, quiz.clone());
        Ok(quiz)
    }

    async fn get_quiz(&self, quiz_id: QuizId) -> PortResult<Quiz> {
        self.state()?.quiz(quiz_id).cloned()
    }

    async fn update_quiz_sum_grades(
        &self,
        quiz_id: QuizId,
        sum_grades: f64,
        now: DateTime<Utc>,
    ) -> PortResult<()> {
        let mut state = self.state()?;
        let quiz = state
            .quizzes
            .get_mut(&quiz_id)
            .ok_or_else(|| PortError::NotFound(format!("Quiz {} not found", quiz_id)))?;
        quiz.sum_grades = sum_grades;
        quiz.modified_at = now;
        Ok(())
    }

    async fn delete_quiz(&self, quiz_id: QuizId) -> PortResult<()> {
        let mut state = self.begin()?;
        state.quiz(quiz_id)?;
        state.quizzes.remove(&quiz_id);

        let blocks: Vec<BlockId> = state
            .blocks
            .values()
            .filter(|block| block.quiz_id == quiz_id)
            .map(|block| block.id)
            .collect();
        for block_id in &blocks {
            state.blocks.remove(block_id);
            state.delete_condition(ConditionOwner::Block(*block_id));
        }
        state
            .elements
            .retain(|_, element| !blocks.contains(&element.block_id));

        let feedback: Vec<FeedbackBlockId> = state
            .feedback
            .values()
            .filter(|block| block.quiz_id == quiz_id)
            .map(|block| block.id)
            .collect();
        for feedback_id in feedback {
            state.feedback.remove(&feedback_id);
            state.delete_condition(ConditionOwner::Feedback(feedback_id));
        }

        let usages: Vec<UsageId> = state
            .attempts
            .values()
            .filter(|attempt| attempt.quiz_id == quiz_id)
            .map(|attempt| attempt.usage_id)
            .collect();
        state.attempts.retain(|_, attempt| attempt.quiz_id != quiz_id);
        for usage_id in usages {
            state.usages.remove(&usage_id);
        }
        Ok(())
    }

    // --- Question Bank ---
    async fn create_question(&self, question: NewQuestion) -> PortResult<Question> {
        let mut state = self.state()?;
        let question = Question {
            id: QuestionId(state.next_id()),
            name: question.name,
            question_text: question.question_text,
            default_mark: question.default_mark,
            answer: question.answer,
        };
        state.questions.insert(question.id, question.clone());
        Ok(question)
    }

    async fn get_question(&self, question_id: QuestionId) -> PortResult<Question> {
        self.state()?
            .questions
            .get(&question_id)
            .cloned()
            .ok_or_else(|| PortError::NotFound(format!("Question {} not found", question_id)))
    }

    // --- Blocks ---
    async fn create_block(&self, quiz_id: QuizId, name: &str) -> PortResult<BlockRecord> {
        let mut state = self.state()?;
        state.quiz(quiz_id)?;
        let block = BlockRecord {
            id: BlockId(state.next_id()),
            quiz_id,
            name: name.to_string(),
        };
        state.blocks.insert(block.id, block.clone());
        Ok(block)
    }

    async fn get_block(&self, block_id: BlockId) -> PortResult<BlockRecord> {
        self.state()?
            .blocks
            .get(&block_id)
            .cloned()
            .ok_or_else(|| PortError::NotFound(format!("Block {} not found", block_id)))
    }

    async fn rename_block(&self, block_id: BlockId, name: &str) -> PortResult<()> {
        let mut state = self.state()?;
        let block = state
            .blocks
            .get_mut(&block_id)
            .ok_or_else(|| PortError::NotFound(format!("Block {} not found", block_id)))?;
        block.name = name.to_string();
        Ok(())
    }

    async fn get_block_elements(&self, block_id: BlockId) -> PortResult<Vec<BlockElement>> {
        let state = self.state()?;
        let mut elements: Vec<BlockElement> = state
            .elements
            .values()
            .filter(|element| element.block_id == block_id)
            .cloned()
            .collect();
        elements.sort_by_key(|element| element.slot);
        Ok(elements)
    }

    async fn insert_block_element(
        &self,
        block_id: BlockId,
        target: ElementRef,
        grade: f64,
    ) -> PortResult<BlockElement> {
        let mut state = self.state()?;
        if !state.blocks.contains_key(&block_id) {
            return Err(PortError::NotFound(format!("Block {} not found", block_id)));
        }
        let slot = state
            .elements
            .values()
            .filter(|element| element.block_id == block_id)
            .count() as u32;
        let element = BlockElement {
            id: ElementId(state.next_id()),
            block_id,
            target,
            slot,
            grade,
        };
        state.elements.insert(element.id, element.clone());
        Ok(element)
    }

    async fn delete_block_element(&self, element_id: ElementId) -> PortResult<()> {
        let mut state = self.begin()?;
        let removed = state
            .elements
            .remove(&element_id)
            .ok_or_else(|| PortError::NotFound(format!("Element {} not found", element_id)))?;
        for element in state.elements.values_mut() {
            if element.block_id == removed.block_id && element.slot > removed.slot {
                element.slot -= 1;
            }
        }
        Ok(())
    }

    // --- Conditions ---
    async fn get_condition(&self, owner: ConditionOwner) -> PortResult<Option<Condition>> {
        let state = self.state()?;
        Ok(state
            .condition_of(owner)
            .and_then(|condition_id| state.load_condition(condition_id)))
    }

    async fn apply_condition_changes(
        &self,
        owner: ConditionOwner,
        changes: &ConditionChanges,
    ) -> PortResult<Condition> {
        self.begin()?.apply_condition_changes(owner, changes)
    }

    // --- Attempts ---
    async fn count_attempts(&self, quiz_id: QuizId, user_id: Uuid) -> PortResult<u32> {
        let state = self.state()?;
        Ok(state
            .attempts
            .values()
            .filter(|attempt| attempt.quiz_id == quiz_id && attempt.user_id == user_id)
            .count() as u32)
    }

    async fn create_attempt(
        &self,
        attempt: NewAttempt,
        slots: Vec<UsageSlot>,
    ) -> PortResult<(Attempt, QuestionUsage)> {
        let mut state = self.begin()?;
        state.quiz(attempt.quiz_id)?;
        let duplicate = state.attempts.values().any(|existing| {
            existing.quiz_id == attempt.quiz_id
                && existing.user_id == attempt.user_id
                && existing.attempt_number == attempt.attempt_number
        });
        if duplicate {
            return Err(PortError::Conflict(format!(
                "Attempt {} of user {} already exists",
                attempt.attempt_number, attempt.user_id
            )));
        }

        let usage = QuestionUsage {
            id: UsageId(state.next_id()),
            slots,
        };
        let attempt = Attempt {
            id: AttemptId(state.next_id()),
            quiz_id: attempt.quiz_id,
            user_id: attempt.user_id,
            attempt_number: attempt.attempt_number,
            usage_id: usage.id,
            current_slot: attempt.current_slot,
            sum_grades: attempt.sum_grades,
            started_at: attempt.started_at,
            finished_at: attempt.finished_at,
            modified_at: attempt.started_at,
        };
        state.usages.insert(usage.id, usage.clone());
        state.attempts.insert(attempt.id, attempt.clone());
        Ok((attempt, usage))
    }

    async fn get_attempt(&self, attempt_id: AttemptId) -> PortResult<Attempt> {
        self.state()?
            .attempts
            .get(&attempt_id)
            .cloned()
            .ok_or_else(|| PortError::NotFound(format!("Attempt {} not found", attempt_id)))
    }

    async fn get_usage(&self, usage_id: UsageId) -> PortResult<QuestionUsage> {
        self.state()?
            .usages
            .get(&usage_id)
            .cloned()
            .ok_or_else(|| PortError::NotFound(format!("Question usage {} not found", usage_id)))
    }

    async fn save_attempt_progress(
        &self,
        attempt: &Attempt,
        expected_slot: u32,
        usage: &QuestionUsage,
    ) -> PortResult<()> {
        let mut state = self.begin()?;
        let stored = state
            .attempts
            .get(&attempt.id)
            .ok_or_else(|| PortError::NotFound(format!("Attempt {} not found", attempt.id)))?;
        if stored.current_slot != expected_slot || stored.finished_at.is_some() {
            return Err(PortError::Conflict(format!(
                "Attempt {} moved on to slot {}",
                attempt.id, stored.current_slot
            )));
        }
        if !state.usages.contains_key(&usage.id) {
            return Err(PortError::NotFound(format!("Question usage {} not found", usage.id)));
        }
        state.attempts.insert(attempt.id, attempt.clone());
        state.usages.insert(usage.id, usage.clone());
        Ok(())
    }

    async fn save_manual_mark(&self, attempt: &Attempt, slot: &UsageSlot) -> PortResult<()> {
        let mut state = self.begin()?;
        if !state.attempts.contains_key(&attempt.id) {
            return Err(PortError::NotFound(format!("Attempt {} not found", attempt.id)));
        }
        let stored = state
            .usages
            .get_mut(&attempt.usage_id)
            .and_then(|usage| usage.slots.iter_mut().find(|s| s.slot == slot.slot))
            .ok_or_else(|| {
                PortError::NotFound(format!(
                    "Slot {} of question usage {} not found",
                    slot.slot, attempt.usage_id
                ))
            })?;
        *stored = slot.clone();
        state.attempts.insert(attempt.id, attempt.clone());
        Ok(())
    }

    async fn list_attempts(&self, quiz_id: QuizId) -> PortResult<Vec<Attempt>> {
        let state = self.state()?;
        Ok(state
            .attempts
            .values()
            .filter(|attempt| attempt.quiz_id == quiz_id)
            .cloned()
            .collect())
    }

    // --- Feedback Blocks ---
    async fn create_feedback_block(
        &self,
        quiz_id: QuizId,
        name: &str,
        feedback_text: &str,
    ) -> PortResult<(FeedbackBlock, Condition)> {
        let mut state = self.begin()?;
        state.quiz(quiz_id)?;
        let block = FeedbackBlock {
            id: FeedbackBlockId(state.next_id()),
            quiz_id,
            name: name.to_string(),
            feedback_text: feedback_text.to_string(),
            used_elements: Vec::new(),
        };
        state.feedback.insert(block.id, block.clone());
        let condition = state.apply_condition_changes(
            ConditionOwner::Feedback(block.id),
            &ConditionChanges::default(),
        )?;
        Ok((block, condition))
    }

    async fn get_feedback_block(&self, feedback_id: FeedbackBlockId) -> PortResult<FeedbackBlock> {
        self.state()?
            .feedback
            .get(&feedback_id)
            .cloned()
            .ok_or_else(|| PortError::NotFound(format!("Feedback block {} not found", feedback_id)))
    }

    async fn list_feedback_blocks(&self, quiz_id: QuizId) -> PortResult<Vec<FeedbackBlock>> {
        let state = self.state()?;
        Ok(state
            .feedback
            .values()
            .filter(|block| block.quiz_id == quiz_id)
            .cloned()
            .collect())
    }

    async fn update_feedback_block(
        &self,
        feedback: &FeedbackBlock,
        condition: &ConditionChanges,
    ) -> PortResult<Condition> {
        let mut state = self.begin()?;
        if !state.feedback.contains_key(&feedback.id) {
            return Err(PortError::NotFound(format!("Feedback block {} not found", feedback.id)));
        }
        let condition = state.apply_condition_changes(ConditionOwner::Feedback(feedback.id), condition)?;
        state.feedback.insert(feedback.id, feedback.clone());
        Ok(condition)
    }

    async fn delete_feedback_block(&self, feedback_id: FeedbackBlockId) -> PortResult<()> {
        let mut state = self.begin()?;
        state
            .feedback
            .remove(&feedback_id)
            .ok_or_else(|| PortError::NotFound(format!("Feedback block {} not found", feedback_id)))?;
        state.delete_condition(ConditionOwner::Feedback(feedback_id));
        Ok(())
    }
}
