//! crates/adaptive_quiz_core/src/attempt.rs
//!
//! The attempt state machine.
//!
//! An attempt is in progress while its current slot lies within the enumerated
//! slot sequence and finished once it has moved past the last slot. Each
//! operation reads the attempt fresh, computes the new state in memory and
//! persists attempt row and question usage together in a single store call.

use chrono::{DateTime, Utc};
use tracing::info;
use uuid::Uuid;

use crate::condition::ResultLookup;
use crate::domain::{
    Attempt, AttemptId, AttemptStatus, BlockElement, ElementId, ElementRef, NewAttempt,
    QuestionUsage, Quiz, QuizId, Response, UsageId, UsageSlot,
};
use crate::error::{QuizError, QuizResult};
use crate::ports::{QuestionEngine, QuizStore};
use crate::sequencer::{SlotMap, SlotSequencer};
use crate::tree::BlockTree;
use crate::usage::UsagePlan;

//=========================================================================================
// Attempt Results
//=========================================================================================

/// Condition-evaluation view over an attempt's question usage.
///
/// A block element's mark is the sum of the graded questions inside it.
pub struct AttemptResults<'a> {
    tree: &'a BlockTree,
    usage: &'a QuestionUsage,
}

impl<'a> AttemptResults<'a> {
    pub fn new(tree: &'a BlockTree, usage: &'a QuestionUsage) -> Self {
        Self { tree, usage }
    }

    fn question_slots(&self, element: ElementId) -> Vec<&'a UsageSlot> {
        let Some(element) = self.tree.element(element) else {
            return Vec::new();
        };
        self.tree
            .questions_within(element)
            .into_iter()
            .filter_map(|question| self.usage.slot_for_element(question.id))
            .collect()
    }
}

impl ResultLookup for AttemptResults<'_> {
    fn mark(&self, element: ElementId) -> Option<f64> {
        self.question_slots(element)
            .into_iter()
            .filter_map(UsageSlot::mark)
            .fold(None, |sum, mark| Some(sum.unwrap_or(0.0) + mark))
    }

    fn was_displayed(&self, element: ElementId) -> bool {
        self.question_slots(element).iter().any(|slot| slot.viewed)
    }
}

//=========================================================================================
// Attempt Session
//=========================================================================================

/// What processing a slot led to.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SlotOutcome {
    Advanced { next_slot: u32 },
    Finished { sum_grades: f64 },
}

impl Attempt {
    pub fn status(&self, total_slots: u32) -> AttemptStatus {
        if self.finished_at.is_some() || self.current_slot > total_slots {
            AttemptStatus::Finished
        } else {
            AttemptStatus::InProgress
        }
    }
}

/// An attempt loaded together with everything needed to advance it.
pub struct AttemptSession {
    pub attempt: Attempt,
    pub quiz: Quiz,
    pub tree: BlockTree,
    pub usage: QuestionUsage,
    slots: SlotMap,
}

impl AttemptSession {
    /// Starts a new attempt of `user_id` on the quiz.
    ///
    /// Every question of the tree is registered in the usage up front, regardless
    /// of conditions, so any of them can be answered once reached.
    pub async fn start(
        store: &dyn QuizStore,
        quiz_id: QuizId,
        user_id: Uuid,
        now: DateTime<Utc>,
    ) -> QuizResult<Self> {
        let quiz = store.get_quiz(quiz_id).await?;
        let tree = BlockTree::load(store, &quiz).await?;

        let mut plan = UsagePlan::new();
        for element in tree.question_elements() {
            if let ElementRef::Question(question_id) = element.target {
                plan.add_question(element.id, question_id, element.grade);
            }
        }
        if plan.is_empty() {
            return Err(QuizError::NoQuestions(quiz_id));
        }

        let slots = SlotMap::enumerate(&tree);
        let first_slot = {
            let unanswered = QuestionUsage {
                id: UsageId(0),
                slots: Vec::new(),
            };
            let results = AttemptResults::new(&tree, &unanswered);
            SlotSequencer::new(&tree).next_slot(0, &results)
        };

        let attempt_number = store.count_attempts(quiz_id, user_id).await? + 1;
        // With nothing reachable from the start the attempt is finished right away.
        let (new_attempt, usage_slots) = match first_slot {
            Some(first_slot) => (
                NewAttempt {
                    quiz_id,
                    user_id,
                    attempt_number,
                    current_slot: first_slot,
                    sum_grades: None,
                    started_at: now,
                    finished_at: None,
                },
                plan.start_all(first_slot),
            ),
            None => (
                NewAttempt {
                    quiz_id,
                    user_id,
                    attempt_number,
                    current_slot: slots.total() + 1,
                    sum_grades: Some(0.0),
                    started_at: now,
                    finished_at: Some(now),
                },
                plan.close_all(now),
            ),
        };
        let (attempt, usage) = store.create_attempt(new_attempt, usage_slots).await?;
        info!(
            attempt_id = %attempt.id,
            %quiz_id,
            %user_id,
            attempt_number,
            slots = usage.slots.len(),
            finished = attempt.finished_at.is_some(),
            "Attempt started"
        );

        Ok(Self {
            attempt,
            quiz,
            tree,
            usage,
            slots,
        })
    }

    /// Loads an attempt with its quiz, block tree and question usage.
    pub async fn load(store: &dyn QuizStore, attempt_id: AttemptId) -> QuizResult<Self> {
        let attempt = store.get_attempt(attempt_id).await?;
        let quiz = store.get_quiz(attempt.quiz_id).await?;
        let tree = BlockTree::load(store, &quiz).await?;
        let usage = store.get_usage(attempt.usage_id).await?;
        let slots = SlotMap::enumerate(&tree);
        Ok(Self {
            attempt,
            quiz,
            tree,
            usage,
            slots,
        })
    }

    pub fn total_slots(&self) -> u32 {
        self.slots.total()
    }

    pub fn slots(&self) -> &SlotMap {
        &self.slots
    }

    pub fn status(&self) -> AttemptStatus {
        self.attempt.status(self.total_slots())
    }

    pub fn is_finished(&self) -> bool {
        self.status() == AttemptStatus::Finished
    }

    /// The element presented at the current slot, `None` once finished.
    pub fn current_element(&self) -> Option<&BlockElement> {
        if self.is_finished() {
            return None;
        }
        self.slots
            .element_at(self.attempt.current_slot)
            .and_then(|element| self.tree.element(element))
    }

    /// The usage slot backing the current slot, `None` once finished.
    pub fn current_usage_slot(&self) -> Option<&UsageSlot> {
        self.current_element()
            .and_then(|element| self.usage.slot_for_element(element.id))
    }

    pub fn results(&self) -> AttemptResults<'_> {
        AttemptResults::new(&self.tree, &self.usage)
    }

    /// Submits the response for the current slot, grades it and moves on.
    ///
    /// `slot` is the slot the student answered; a mismatch with the current
    /// slot means the submission is stale (e.g. submitted twice).
    pub async fn process_slot(
        &mut self,
        store: &dyn QuizStore,
        engine: &dyn QuestionEngine,
        slot: u32,
        response: Response,
        now: DateTime<Utc>,
    ) -> QuizResult<SlotOutcome> {
        if self.is_finished() {
            return Err(QuizError::AttemptFinished(self.attempt.id));
        }
        let current = self.attempt.current_slot;
        if slot != current {
            return Err(QuizError::SlotMismatch {
                current,
                submitted: slot,
            });
        }

        let usage_slot = self
            .current_usage_slot()
            .map(|s| s.slot)
            .ok_or(QuizError::UnknownSlot(current))?;
        self.usage.process_action(usage_slot, response)?;
        self.usage.finish_question(store, engine, usage_slot, now).await?;

        let next = SlotSequencer::new(&self.tree).next_slot(current, &self.results());
        let outcome = match next {
            Some(next_slot) => {
                self.attempt.current_slot = next_slot;
                if let Some(next_usage_slot) = self
                    .slots
                    .element_at(next_slot)
                    .and_then(|element| self.usage.slot_for_element(element))
                    .map(|s| s.slot)
                {
                    self.usage.mark_viewed(next_usage_slot)?;
                }
                SlotOutcome::Advanced { next_slot }
            }
            None => SlotOutcome::Finished {
                sum_grades: self.complete(store, engine, now).await?,
            },
        };
        self.attempt.modified_at = now;

        store
            .save_attempt_progress(&self.attempt, current, &self.usage)
            .await?;
        match outcome {
            SlotOutcome::Advanced { next_slot } => {
                info!(attempt_id = %self.attempt.id, from = current, to = next_slot, "Attempt advanced")
            }
            SlotOutcome::Finished { sum_grades } => {
                info!(attempt_id = %self.attempt.id, sum_grades, "Attempt finished")
            }
        }
        Ok(outcome)
    }

    /// Finishes the attempt, returning its summed grade.
    ///
    /// Finishing an already finished attempt returns the recorded grade.
    pub async fn finish(
        &mut self,
        store: &dyn QuizStore,
        engine: &dyn QuestionEngine,
        now: DateTime<Utc>,
    ) -> QuizResult<f64> {
        if let (Some(_), Some(sum_grades)) = (self.attempt.finished_at, self.attempt.sum_grades) {
            return Ok(sum_grades);
        }
        let expected = self.attempt.current_slot;
        let sum_grades = self.complete(store, engine, now).await?;
        self.attempt.modified_at = now;
        store
            .save_attempt_progress(&self.attempt, expected, &self.usage)
            .await?;
        info!(attempt_id = %self.attempt.id, sum_grades, "Attempt finished");
        Ok(sum_grades)
    }

    /// Replaces the mark obtained at presentation slot `slot` with one set by a grader.
    ///
    /// Only answered or abandoned questions can be marked. On a finished
    /// attempt the summed grade is recomputed and returned.
    pub async fn regrade(
        &mut self,
        store: &dyn QuizStore,
        slot: u32,
        mark: f64,
        now: DateTime<Utc>,
    ) -> QuizResult<Option<f64>> {
        let usage_slot = self
            .slots
            .element_at(slot)
            .and_then(|element| self.usage.slot_for_element(element))
            .map(|s| s.slot)
            .ok_or(QuizError::UnknownSlot(slot))?;
        let updated = self.usage.set_manual_mark(usage_slot, mark, now)?.clone();

        if self.attempt.finished_at.is_some() {
            self.attempt.sum_grades = Some(self.usage.total_mark());
        }
        self.attempt.modified_at = now;
        store.save_manual_mark(&self.attempt, &updated).await?;
        info!(
            attempt_id = %self.attempt.id,
            slot,
            mark,
            sum_grades = ?self.attempt.sum_grades,
            "Slot regraded"
        );
        Ok(self.attempt.sum_grades)
    }

    /// Closes every open slot and records the sum of the obtained marks.
    async fn complete(
        &mut self,
        store: &dyn QuizStore,
        engine: &dyn QuestionEngine,
        now: DateTime<Utc>,
    ) -> QuizResult<f64> {
        self.usage.finish_all(store, engine, now).await?;
        let sum_grades = self.usage.total_mark();
        self.attempt.current_slot = self.total_slots() + 1;
        self.attempt.sum_grades = Some(sum_grades);
        self.attempt.finished_at = Some(now);
        Ok(sum_grades)
    }
}
