//! Common fixtures for building quizzes against the in-memory store.
use adaptive_quiz_core::*;
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};

/// Grades a response by reading the fraction from its `fraction` field.
pub struct FractionEngine;

#[async_trait]
impl QuestionEngine for FractionEngine {
    async fn grade_response(&self, _question: &Question, response: &Response) -> PortResult<f64> {
        response
            .get("fraction")
            .ok_or_else(|| PortError::Unexpected("missing fraction".to_string()))?
            .parse::<f64>()
            .map_err(|e| PortError::Unexpected(e.to_string()))
    }
}

#[allow(dead_code)]
pub fn now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0).unwrap()
}

/// A response earning `mark` points on a question worth 10.
#[allow(dead_code)]
pub fn scored(mark: f64) -> Response {
    Response::from([("fraction".to_string(), (mark / 10.0).to_string())])
}

#[allow(dead_code)]
pub async fn question(store: &InMemoryStore, name: &str) -> QuestionId {
    store
        .create_question(NewQuestion {
            name: name.to_string(),
            question_text: format!("What about {}?", name),
            default_mark: 10.0,
            answer: None,
        })
        .await
        .unwrap()
        .id
}

/// The quiz `[Q1, X [Q2], Q3]`, with element ids for each entry.
#[allow(dead_code)]
pub struct Scenario {
    pub quiz: Quiz,
    pub q1: ElementId,
    pub x: Block,
    pub x_element: ElementId,
    pub q2: ElementId,
    pub q3: ElementId,
}

#[allow(dead_code)]
pub async fn scenario(store: &InMemoryStore) -> Scenario {
    let quiz = adaptive_quiz_core::quiz::create_quiz(store, "Scenario", 100.0, now())
        .await
        .unwrap();
    let mut main = Block::load(store, &quiz, quiz.main_block_id).await.unwrap();

    let (first, second, third) = (
        question(store, "Q1").await,
        question(store, "Q2").await,
        question(store, "Q3").await,
    );
    let q1 = main.add_question(store, first).await.unwrap()[0].id;
    let mut x = main.create_subblock(store, &quiz, "X").await.unwrap();
    let x_element = main.children(store).await.unwrap()[1].id;
    let q2 = x.add_question(store, second).await.unwrap()[0].id;
    let q3 = main.add_question(store, third).await.unwrap()[2].id;

    Scenario {
        quiz,
        q1,
        x,
        x_element,
        q2,
        q3,
    }
}

/// Gates block X of the scenario on `Q1 >= 5`.
#[allow(dead_code)]
pub async fn gate_on_q1(store: &InMemoryStore, scenario: &mut Scenario) {
    let part = PartDraft {
        id: None,
        comparator: Comparator::GreaterOrEqual,
        element_id: scenario.q1,
        grade: 5.0,
    };
    scenario
        .x
        .update_condition(store, &scenario.quiz, true, vec![part])
        .await
        .unwrap();
}
