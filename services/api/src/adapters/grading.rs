//! services/api/src/adapters/grading.rs
//!
//! This module contains a reference question execution adapter that grades
//! responses against the answer key stored with each question.
//! It implements the `QuestionEngine` port from the `core` crate.

use adaptive_quiz_core::domain::{Question, Response};
use adaptive_quiz_core::ports::{PortResult, QuestionEngine};
use async_trait::async_trait;
use tracing::debug;

/// The response field holding the student's answer.
pub const ANSWER_FIELD: &str = "answer";

/// Alternatives in an answer key are separated by this character.
const ALTERNATIVE_SEPARATOR: char = '|';

/// Numeric answers closer than this to the key count as correct.
const NUMERIC_TOLERANCE: f64 = 1e-6;

/// Grades short answers against the question's answer key.
///
/// A response earns full marks when it matches one of the key's alternatives,
/// compared numerically when both sides are numbers and case-insensitively
/// otherwise. Questions without a key accept any non-empty answer.
#[derive(Clone, Default)]
pub struct AnswerKeyEngine;

impl AnswerKeyEngine {
    pub fn new() -> Self {
        Self
    }

    fn matches(expected: &str, given: &str) -> bool {
        match (expected.parse::<f64>(), given.parse::<f64>()) {
            (Ok(expected), Ok(given)) => (expected - given).abs() <= NUMERIC_TOLERANCE,
            _ => expected.eq_ignore_ascii_case(given),
        }
    }
}

#[async_trait]
impl QuestionEngine for AnswerKeyEngine {
    async fn grade_response(&self, question: &Question, response: &Response) -> PortResult<f64> {
        let given = response
            .get(ANSWER_FIELD)
            .map(|answer| answer.trim())
            .unwrap_or_default();
        if given.is_empty() {
            return Ok(0.0);
        }

        let fraction = match question.answer.as_deref() {
            None => 1.0,
            Some(key) => {
                let correct = key
                    .split(ALTERNATIVE_SEPARATOR)
                    .map(str::trim)
                    .filter(|alternative| !alternative.is_empty())
                    .any(|alternative| Self::matches(alternative, given));
                if correct {
                    1.0
                } else {
                    0.0
                }
            }
        };
        debug!(question_id = %question.id, fraction, "Response graded");
        Ok(fraction)
    }
}
