//! crates/adaptive_quiz_core/src/quiz.rs
//!
//! Operations on the quiz aggregate: creation, grade bookkeeping, deletion and
//! the attempts overview report.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use tracing::info;
use uuid::Uuid;

use crate::domain::{Attempt, AttemptStatus, Quiz, QuizId};
use crate::error::{QuizError, QuizResult};
use crate::ports::QuizStore;
use crate::sequencer::SlotMap;
use crate::tree::BlockTree;

/// Creates a quiz and its main block, named after the quiz.
pub async fn create_quiz(
    store: &dyn QuizStore,
    name: &str,
    grade: f64,
    now: DateTime<Utc>,
) -> QuizResult<Quiz> {
    if !grade.is_finite() || grade < 0.0 {
        return Err(QuizError::InvalidGrade(grade));
    }
    let quiz = store.create_quiz(name, grade, now).await?;
    info!(quiz_id = %quiz.id, main_block = %quiz.main_block_id, "Quiz created");
    Ok(quiz)
}

/// Recomputes and stores the maximum attainable raw grade: the sum of the
/// grades of the questions placed directly in the main block.
pub async fn recompute_sum_grades(
    store: &dyn QuizStore,
    quiz: &mut Quiz,
    now: DateTime<Utc>,
) -> QuizResult<f64> {
    let sum_grades: f64 = store
        .get_block_elements(quiz.main_block_id)
        .await?
        .iter()
        .filter(|element| element.is_question())
        .map(|element| element.grade)
        .sum();
    if (sum_grades - quiz.sum_grades).abs() > f64::EPSILON {
        store.update_quiz_sum_grades(quiz.id, sum_grades, now).await?;
        quiz.sum_grades = sum_grades;
        quiz.modified_at = now;
    }
    Ok(sum_grades)
}

impl Quiz {
    /// Scales a raw attempt total onto the quiz's grade, `None` while nothing is attainable.
    ///
    /// `sum_grades` only counts questions placed directly in the main block, so questions
    /// inside sub-blocks can push the raw total past it. The result never
    /// exceeds the quiz grade.
    pub fn rescale_grade(&self, raw: f64) -> Option<f64> {
        if self.sum_grades > 0.0 {
            Some((raw / self.sum_grades * self.grade).min(self.grade))
        } else {
            None
        }
    }
}

pub async fn delete_quiz(store: &dyn QuizStore, quiz_id: QuizId) -> QuizResult<()> {
    store.delete_quiz(quiz_id).await?;
    info!(%quiz_id, "Quiz deleted");
    Ok(())
}

//=========================================================================================
// Attempts Overview
//=========================================================================================

#[derive(Debug, Clone)]
pub struct OverviewRow {
    pub attempt: Attempt,
    pub status: AttemptStatus,
    /// The raw sum rescaled onto the quiz grade.
    pub grade: Option<f64>,
}

#[derive(Debug, Clone)]
pub struct AttemptsOverview {
    pub quiz: Quiz,
    pub total_slots: u32,
    pub rows: Vec<OverviewRow>,
    /// Highest rescaled grade of a finished attempt, per user.
    pub best_grades: BTreeMap<Uuid, f64>,
}

impl AttemptsOverview {
    pub async fn load(store: &dyn QuizStore, quiz_id: QuizId) -> QuizResult<Self> {
        let quiz = store.get_quiz(quiz_id).await?;
        let tree = BlockTree::load(store, &quiz).await?;
        let total_slots = SlotMap::enumerate(&tree).total();

        let mut rows = Vec::new();
        let mut best_grades: BTreeMap<Uuid, f64> = BTreeMap::new();
        for attempt in store.list_attempts(quiz_id).await? {
            let status = attempt.status(total_slots);
            let grade = attempt
                .sum_grades
                .and_then(|raw| quiz.rescale_grade(raw));
            if let (AttemptStatus::Finished, Some(grade)) = (status, grade) {
                let best = best_grades.entry(attempt.user_id).or_insert(grade);
                *best = best.max(grade);
            }
            rows.push(OverviewRow {
                attempt,
                status,
                grade,
            });
        }

        Ok(Self {
            quiz,
            total_slots,
            rows,
            best_grades,
        })
    }
}
