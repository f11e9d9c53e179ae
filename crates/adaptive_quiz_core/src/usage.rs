//! crates/adaptive_quiz_core/src/usage.rs
//!
//! The question usage of an attempt: one slot per question of the quiz, each
//! tracking the student's response and its grade. Grading itself is delegated
//! to the `QuestionEngine` port.

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::domain::{
    ElementId, QuestionId, QuestionUsage, Response, SlotState, UsageSlot,
};
use crate::error::{QuizError, QuizResult};
use crate::ports::{QuestionEngine, QuizStore};

/// Collects the questions of a usage before it is stored.
#[derive(Debug, Default)]
pub struct UsagePlan {
    slots: Vec<UsageSlot>,
}

impl UsagePlan {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a question and returns its slot number.
    pub fn add_question(&mut self, element_id: ElementId, question_id: QuestionId, max_mark: f64) -> u32 {
        let slot = self.slots.len() as u32 + 1;
        self.slots.push(UsageSlot {
            slot,
            element_id,
            question_id,
            max_mark,
            state: SlotState::Todo,
            response: None,
            fraction: None,
            viewed: false,
            finished_at: None,
        });
        slot
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Starts every question and marks `first_slot` as shown.
    pub fn start_all(mut self, first_slot: u32) -> Vec<UsageSlot> {
        for slot in &mut self.slots {
            slot.state = SlotState::Todo;
            slot.viewed = slot.slot == first_slot;
        }
        self.slots
    }

    /// Gives up every question at once, for attempts that have nothing to show.
    pub fn close_all(mut self, now: DateTime<Utc>) -> Vec<UsageSlot> {
        for slot in &mut self.slots {
            slot.state = SlotState::GaveUp;
            slot.finished_at = Some(now);
        }
        self.slots
    }
}

impl SlotState {
    pub fn as_str(self) -> &'static str {
        match self {
            SlotState::Todo => "todo",
            SlotState::Answered => "answered",
            SlotState::Graded => "graded",
            SlotState::GaveUp => "gaveup",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "todo" => Some(SlotState::Todo),
            "answered" => Some(SlotState::Answered),
            "graded" => Some(SlotState::Graded),
            "gaveup" => Some(SlotState::GaveUp),
            _ => None,
        }
    }

    pub fn is_finished(self) -> bool {
        matches!(self, SlotState::Graded | SlotState::GaveUp)
    }
}

impl UsageSlot {
    /// The mark obtained, `None` until graded.
    pub fn mark(&self) -> Option<f64> {
        self.fraction.map(|fraction| fraction * self.max_mark)
    }
}

impl QuestionUsage {
    pub fn slot(&self, slot: u32) -> QuizResult<&UsageSlot> {
        self.slots
            .iter()
            .find(|s| s.slot == slot)
            .ok_or(QuizError::UnknownSlot(slot))
    }

    fn slot_mut(&mut self, slot: u32) -> QuizResult<&mut UsageSlot> {
        self.slots
            .iter_mut()
            .find(|s| s.slot == slot)
            .ok_or(QuizError::UnknownSlot(slot))
    }

    pub fn slot_for_element(&self, element: ElementId) -> Option<&UsageSlot> {
        self.slots.iter().find(|s| s.element_id == element)
    }

    pub fn mark_viewed(&mut self, slot: u32) -> QuizResult<()> {
        self.slot_mut(slot)?.viewed = true;
        Ok(())
    }

    /// Records the student's response for a slot without grading it.
    pub fn process_action(&mut self, slot: u32, response: Response) -> QuizResult<()> {
        let usage_slot = self.slot_mut(slot)?;
        if usage_slot.state.is_finished() {
            return Err(QuizError::SlotAlreadyFinished(slot));
        }
        usage_slot.response = Some(response);
        usage_slot.state = SlotState::Answered;
        usage_slot.viewed = true;
        Ok(())
    }

    /// Finishes one slot: grades its response, or gives up when there is none.
    pub async fn finish_question(
        &mut self,
        store: &dyn QuizStore,
        engine: &dyn QuestionEngine,
        slot: u32,
        now: DateTime<Utc>,
    ) -> QuizResult<()> {
        let usage_slot = self.slot_mut(slot)?;
        match (usage_slot.state, usage_slot.response.as_ref()) {
            (SlotState::Graded | SlotState::GaveUp, _) => {}
            (_, Some(response)) => {
                let question = store.get_question(usage_slot.question_id).await?;
                let fraction = engine.grade_response(&question, response).await?;
                usage_slot.fraction = Some(fraction.clamp(0.0, 1.0));
                usage_slot.state = SlotState::Graded;
                usage_slot.finished_at = Some(now);
                debug!(slot, fraction, "Question graded");
            }
            (_, None) => {
                usage_slot.state = SlotState::GaveUp;
                usage_slot.finished_at = Some(now);
            }
        }
        Ok(())
    }

    /// Overrides the mark of a finished slot with one set by a grader.
    ///
    /// The mark must lie within `0..=max_mark`. A slot that was given up
    /// counts as graded afterwards.
    pub fn set_manual_mark(&mut self, slot: u32, mark: f64, now: DateTime<Utc>) -> QuizResult<&UsageSlot> {
        let usage_slot = self.slot_mut(slot)?;
        if !usage_slot.state.is_finished() {
            return Err(QuizError::SlotStillOpen(slot));
        }
        if !mark.is_finite() || mark < 0.0 || mark > usage_slot.max_mark {
            return Err(QuizError::MarkOutOfRange {
                slot,
                mark,
                max_mark: usage_slot.max_mark,
            });
        }
        usage_slot.fraction = Some(if usage_slot.max_mark > 0.0 {
            mark / usage_slot.max_mark
        } else {
            0.0
        });
        usage_slot.state = SlotState::Graded;
        usage_slot.finished_at = Some(now);
        debug!(slot, mark, "Mark set manually");
        Ok(usage_slot)
    }

    /// Finishes every slot that is still open.
    pub async fn finish_all(
        &mut self,
        store: &dyn QuizStore,
        engine: &dyn QuestionEngine,
        now: DateTime<Utc>,
    ) -> QuizResult<()> {
        let open: Vec<u32> = self
            .slots
            .iter()
            .filter(|s| !s.state.is_finished())
            .map(|s| s.slot)
            .collect();
        for slot in open {
            self.finish_question(store, engine, slot, now).await?;
        }
        Ok(())
    }

    pub fn mark(&self, slot: u32) -> Option<f64> {
        self.slot(slot).ok().and_then(UsageSlot::mark)
    }

    /// The sum of all marks obtained; skipped or unanswered slots add nothing.
    pub fn total_mark(&self) -> f64 {
        self.slots.iter().filter_map(UsageSlot::mark).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::UsageId;

    fn usage() -> QuestionUsage {
        let mut plan = UsagePlan::new();
        plan.add_question(ElementId(10), QuestionId(1), 5.0);
        plan.add_question(ElementId(11), QuestionId(2), 2.0);
        QuestionUsage {
            id: UsageId(1),
            slots: plan.start_all(1),
        }
    }

    #[test]
    fn plan_numbers_slots_from_one() {
        let usage = usage();
        assert_eq!(usage.slots[0].slot, 1);
        assert_eq!(usage.slots[1].slot, 2);
        assert!(usage.slots[0].viewed);
        assert!(!usage.slots[1].viewed);
    }

    #[test]
    fn total_mark_only_counts_graded_slots() {
        let mut usage = usage();
        usage.slots[0].fraction = Some(0.5);
        usage.slots[0].state = SlotState::Graded;
        assert_eq!(usage.mark(1), Some(2.5));
        assert_eq!(usage.mark(2), None);
        assert_eq!(usage.total_mark(), 2.5);
    }

    #[test]
    fn finished_slot_rejects_new_response() {
        let mut usage = usage();
        usage.slots[1].state = SlotState::GaveUp;
        let result = usage.process_action(2, Response::new());
        assert!(matches!(result, Err(QuizError::SlotAlreadyFinished(2))));
        assert!(matches!(usage.process_action(7, Response::new()), Err(QuizError::UnknownSlot(7))));
    }

    #[test]
    fn manual_marks_are_range_checked() {
        let at = chrono::DateTime::<Utc>::UNIX_EPOCH;
        let mut usage = usage();
        assert!(matches!(usage.set_manual_mark(1, 2.0, at), Err(QuizError::SlotStillOpen(1))));

        usage.slots[0].state = SlotState::GaveUp;
        assert!(matches!(
            usage.set_manual_mark(1, 5.5, at),
            Err(QuizError::MarkOutOfRange { slot: 1, .. })
        ));
        assert!(usage.set_manual_mark(1, -1.0, at).is_err());

        let slot = usage.set_manual_mark(1, 4.0, at).unwrap();
        assert_eq!(slot.state, SlotState::Graded);
        assert_eq!(slot.finished_at, Some(at));
        assert_eq!(usage.mark(1), Some(4.0));
    }

    #[test]
    fn closed_plans_give_up_every_question() {
        let mut plan = UsagePlan::new();
        plan.add_question(ElementId(10), QuestionId(1), 5.0);
        let at = chrono::DateTime::<Utc>::UNIX_EPOCH;
        let slots = plan.close_all(at);
        assert_eq!(slots[0].state, SlotState::GaveUp);
        assert_eq!(slots[0].finished_at, Some(at));
        assert!(!slots[0].viewed);
    }

    #[test]
    fn slot_state_strings_round_trip() {
        for state in [SlotState::Todo, SlotState::Answered, SlotState::Graded, SlotState::GaveUp] {
            assert_eq!(SlotState::parse(state.as_str()), Some(state));
        }
    }
}
