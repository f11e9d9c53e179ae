//! crates/adaptive_quiz_core/src/condition.rs
//!
//! The boolean condition model gating blocks and feedback blocks.
//!
//! A condition combines its parts with AND or OR. Each part compares the mark an
//! attempt obtained on one earlier element against a threshold.

use std::collections::HashSet;

use tracing::debug;

use crate::domain::{
    Comparator, Condition, ConditionChanges, ConditionOwner, ConditionPart, ElementId, PartDraft,
};
use crate::error::{QuizError, QuizResult};
use crate::ports::QuizStore;

/// Marks closer than this are considered equal.
pub const MARK_TOLERANCE: f64 = 1e-7;

/// Read access to the results an attempt has produced so far.
pub trait ResultLookup {
    /// The mark obtained on an element, `None` while nothing inside it was graded.
    fn mark(&self, element: ElementId) -> Option<f64>;

    /// Whether any question of the element has been presented to the student.
    fn was_displayed(&self, element: ElementId) -> bool;
}

//=========================================================================================
// Comparators and Parts
//=========================================================================================

impl Comparator {
    pub const ALL: [Comparator; 7] = [
        Comparator::WasDisplayed,
        Comparator::Less,
        Comparator::LessOrEqual,
        Comparator::Greater,
        Comparator::GreaterOrEqual,
        Comparator::Equal,
        Comparator::NotEqual,
    ];

    /// The integer code used in storage.
    pub fn code(self) -> i16 {
        match self {
            Comparator::WasDisplayed => 0,
            Comparator::Less => 1,
            Comparator::LessOrEqual => 2,
            Comparator::Greater => 3,
            Comparator::GreaterOrEqual => 4,
            Comparator::Equal => 5,
            Comparator::NotEqual => 6,
        }
    }

    pub fn from_code(code: i16) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.code() == code)
    }

    /// Whether the comparator inspects a mark (as opposed to visibility).
    pub fn is_numeric(self) -> bool {
        self != Comparator::WasDisplayed
    }

    /// Applies a numeric comparator as `mark <op> threshold`.
    ///
    /// `WasDisplayed` has no numeric meaning and never matches here.
    pub fn compare(self, mark: f64, threshold: f64) -> bool {
        match self {
            Comparator::WasDisplayed => false,
            Comparator::Less => mark < threshold - MARK_TOLERANCE,
            Comparator::LessOrEqual => mark <= threshold + MARK_TOLERANCE,
            Comparator::Greater => mark > threshold + MARK_TOLERANCE,
            Comparator::GreaterOrEqual => mark >= threshold - MARK_TOLERANCE,
            Comparator::Equal => (mark - threshold).abs() <= MARK_TOLERANCE,
            Comparator::NotEqual => (mark - threshold).abs() > MARK_TOLERANCE,
        }
    }
}

impl ConditionPart {
    /// Evaluates this part against the attempt's results.
    ///
    /// An element without a mark yet counts as having scored zero.
    pub fn is_fulfilled(&self, results: &dyn ResultLookup) -> bool {
        if self.comparator.is_numeric() {
            let mark = results.mark(self.element_id).unwrap_or(0.0);
            self.comparator.compare(mark, self.grade)
        } else {
            results.was_displayed(self.element_id)
        }
    }
}

//=========================================================================================
// Conditions
//=========================================================================================

impl ConditionChanges {
    pub fn is_empty(&self) -> bool {
        self.use_and.is_none()
            && self.deleted.is_empty()
            && self.updated.is_empty()
            && self.inserted.is_empty()
    }

    /// Computes the writes that merge a submission into `stored`.
    ///
    /// Stored parts missing from the submission are deleted, submitted parts whose
    /// id matches a stored part update it in place, and all others are inserted.
    /// Nothing is computed when a threshold is not finite.
    pub fn between(
        stored: Option<&Condition>,
        use_and: bool,
        submitted: Vec<PartDraft>,
    ) -> QuizResult<Self> {
        if let Some(draft) = submitted.iter().find(|d| !d.grade.is_finite()) {
            return Err(QuizError::InvalidGrade(draft.grade));
        }
        let stored_parts = stored.map(Condition::parts).unwrap_or_default();
        let stored_use_and = stored.map_or(true, |c| c.use_and);

        let existing_ids: HashSet<_> = stored_parts.iter().map(|p| p.id).collect();
        let kept_ids: HashSet<_> = submitted
            .iter()
            .filter_map(|d| d.id)
            .filter(|id| existing_ids.contains(id))
            .collect();

        let mut changes = ConditionChanges {
            use_and: (use_and != stored_use_and).then_some(use_and),
            deleted: stored_parts
                .iter()
                .map(|p| p.id)
                .filter(|id| !kept_ids.contains(id))
                .collect(),
            ..Self::default()
        };
        let mut claimed = HashSet::new();
        for draft in submitted {
            match draft.id.filter(|id| kept_ids.contains(id) && claimed.insert(*id)) {
                Some(id) => {
                    let part = ConditionPart {
                        id,
                        comparator: draft.comparator,
                        element_id: draft.element_id,
                        grade: draft.grade,
                    };
                    if !stored_parts.contains(&part) {
                        changes.updated.push(part);
                    }
                }
                None => changes.inserted.push(PartDraft { id: None, ..draft }),
            }
        }
        Ok(changes)
    }
}

impl Condition {
    /// Reconstructs the condition of `owner` with all of its parts.
    pub async fn load(store: &dyn QuizStore, owner: ConditionOwner) -> QuizResult<Option<Self>> {
        Ok(store.get_condition(owner).await?)
    }

    /// Loads the condition of `owner`, creating an empty AND condition if none exists.
    pub async fn load_or_create(store: &dyn QuizStore, owner: ConditionOwner) -> QuizResult<Self> {
        match store.get_condition(owner).await? {
            Some(condition) => Ok(condition),
            None => Ok(store
                .apply_condition_changes(owner, &ConditionChanges::default())
                .await?),
        }
    }

    /// Stores the submitted combinator and parts as the condition of `owner`
    /// in one write, creating the condition when needed.
    pub async fn save(
        store: &dyn QuizStore,
        owner: ConditionOwner,
        use_and: bool,
        submitted: Vec<PartDraft>,
    ) -> QuizResult<Self> {
        let stored = Condition::load(store, owner).await?;
        let changes = ConditionChanges::between(stored.as_ref(), use_and, submitted)?;
        match stored {
            Some(condition) if changes.is_empty() => Ok(condition),
            _ => Ok(store.apply_condition_changes(owner, &changes).await?),
        }
    }

    pub fn parts(&self) -> &[ConditionPart] {
        &self.parts
    }

    /// AND: every part holds (vacuously true when empty).
    /// OR: at least one part holds (false when empty).
    pub fn is_fulfilled(&self, results: &dyn ResultLookup) -> bool {
        if self.use_and {
            self.parts.iter().all(|part| part.is_fulfilled(results))
        } else {
            self.parts.iter().any(|part| part.is_fulfilled(results))
        }
    }

    /// Switches between AND and OR, writing only when the value changes.
    pub async fn set_use_and(&mut self, store: &dyn QuizStore, use_and: bool) -> QuizResult<()> {
        if self.use_and == use_and {
            return Ok(());
        }
        let changes = ConditionChanges {
            use_and: Some(use_and),
            ..ConditionChanges::default()
        };
        *self = store.apply_condition_changes(self.owner, &changes).await?;
        Ok(())
    }

    /// Merges the submitted parts into the stored ones, keeping the ids of
    /// parts that survive.
    pub async fn update(
        &mut self,
        store: &dyn QuizStore,
        submitted: Vec<PartDraft>,
    ) -> QuizResult<&[ConditionPart]> {
        let changes = ConditionChanges::between(Some(self), self.use_and, submitted)?;
        if !changes.is_empty() {
            let before = self.parts.len();
            *self = store.apply_condition_changes(self.owner, &changes).await?;
            debug!(
                condition_id = %self.id,
                before,
                after = self.parts.len(),
                "Condition parts updated"
            );
        }
        Ok(&self.parts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{ConditionId, PartId};
    use std::collections::HashMap;

    struct Marks(HashMap<ElementId, f64>);

    impl ResultLookup for Marks {
        fn mark(&self, element: ElementId) -> Option<f64> {
            self.0.get(&element).copied()
        }

        fn was_displayed(&self, element: ElementId) -> bool {
            self.0.contains_key(&element)
        }
    }

    fn part(comparator: Comparator, element: i64, grade: f64) -> ConditionPart {
        ConditionPart {
            id: PartId(element),
            comparator,
            element_id: ElementId(element),
            grade,
        }
    }

    fn condition(use_and: bool, parts: Vec<ConditionPart>) -> Condition {
        Condition {
            id: ConditionId(1),
            owner: ConditionOwner::Block(crate::domain::BlockId(1)),
            use_and,
            parts,
        }
    }

    #[test]
    fn comparator_codes_round_trip() {
        for comparator in Comparator::ALL {
            assert_eq!(Comparator::from_code(comparator.code()), Some(comparator));
        }
        assert_eq!(Comparator::from_code(42), None);
    }

    #[test]
    fn numeric_comparators_respect_boundaries() {
        assert!(Comparator::GreaterOrEqual.compare(5.0, 5.0));
        assert!(!Comparator::Greater.compare(5.0, 5.0));
        assert!(Comparator::LessOrEqual.compare(5.0, 5.0));
        assert!(!Comparator::Less.compare(5.0, 5.0));
        assert!(Comparator::Equal.compare(0.1 + 0.2, 0.3));
        assert!(Comparator::NotEqual.compare(3.0, 5.0));
        assert!(!Comparator::WasDisplayed.compare(1.0, 0.0));
    }

    #[test]
    fn empty_and_is_fulfilled_and_empty_or_is_not() {
        let marks = Marks(HashMap::new());
        assert!(condition(true, vec![]).is_fulfilled(&marks));
        assert!(!condition(false, vec![]).is_fulfilled(&marks));
    }

    #[test]
    fn and_needs_all_parts_or_needs_one() {
        let marks = Marks(HashMap::from([(ElementId(1), 7.0), (ElementId(2), 2.0)]));
        let parts = vec![
            part(Comparator::GreaterOrEqual, 1, 5.0),
            part(Comparator::GreaterOrEqual, 2, 5.0),
        ];
        assert!(!condition(true, parts.clone()).is_fulfilled(&marks));
        assert!(condition(false, parts).is_fulfilled(&marks));
    }

    #[test]
    fn missing_mark_counts_as_zero() {
        let marks = Marks(HashMap::new());
        assert!(part(Comparator::Less, 9, 1.0).is_fulfilled(&marks));
        assert!(!part(Comparator::Greater, 9, 0.0).is_fulfilled(&marks));
    }

    #[test]
    fn was_displayed_uses_visibility_not_marks() {
        let marks = Marks(HashMap::from([(ElementId(3), 0.0)]));
        assert!(part(Comparator::WasDisplayed, 3, 100.0).is_fulfilled(&marks));
        assert!(!part(Comparator::WasDisplayed, 4, 0.0).is_fulfilled(&marks));
    }

    fn draft(id: Option<i64>, comparator: Comparator, element: i64, grade: f64) -> PartDraft {
        PartDraft {
            id: id.map(PartId),
            comparator,
            element_id: ElementId(element),
            grade,
        }
    }

    #[test]
    fn changes_delete_update_and_insert() {
        let stored = condition(
            true,
            vec![part(Comparator::Less, 1, 5.0), part(Comparator::Greater, 2, 1.0)],
        );
        let changes = ConditionChanges::between(
            Some(&stored),
            false,
            vec![
                draft(Some(1), Comparator::Less, 1, 6.0),
                draft(None, Comparator::Equal, 3, 2.0),
                draft(Some(99), Comparator::Equal, 4, 2.0),
            ],
        )
        .unwrap();
        assert_eq!(changes.use_and, Some(false));
        assert_eq!(changes.deleted, vec![PartId(2)]);
        assert_eq!(changes.updated, vec![part(Comparator::Less, 1, 6.0)]);
        assert_eq!(changes.inserted.len(), 2);
        assert!(changes.inserted.iter().all(|d| d.id.is_none()));
    }

    #[test]
    fn unchanged_submission_needs_no_writes() {
        let stored = condition(true, vec![part(Comparator::Less, 1, 5.0)]);
        let changes =
            ConditionChanges::between(Some(&stored), true, vec![draft(Some(1), Comparator::Less, 1, 5.0)])
                .unwrap();
        assert!(changes.is_empty());
        // A missing condition defaults to AND.
        assert!(ConditionChanges::between(None, true, vec![]).unwrap().is_empty());
    }

    #[test]
    fn non_finite_threshold_yields_no_changes() {
        let stored = condition(true, vec![part(Comparator::Less, 1, 5.0)]);
        let result = ConditionChanges::between(
            Some(&stored),
            false,
            vec![draft(None, Comparator::Less, 1, f64::INFINITY)],
        );
        assert!(matches!(result, Err(QuizError::InvalidGrade(g)) if g.is_infinite()));
    }
}
