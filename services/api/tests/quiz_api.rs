mod common;

use axum::http::{Method, StatusCode};
use common::*;
use serde_json::json;
use uuid::Uuid;

#[tokio::test]
async fn editing_builds_the_tree_and_tracks_the_attainable_grade() {
    let app = app();
    let quiz = adaptive_quiz(&app).await;

    let (status, body) = app.get(&format!("/quizzes/{}", quiz.quiz_id)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["grade"], 100.0);
    // Only questions placed directly in the main block count.
    assert_eq!(body["sum_grades"], 20.0);

    let (status, structure) = app.get(&format!("/quizzes/{}/structure", quiz.quiz_id)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(structure["total_slots"], 3);
    assert_eq!(structure["blocks"][0]["id"], quiz.main_block);
    assert_eq!(structure["blocks"][1]["id"], quiz.x_block);
    assert_eq!(structure["blocks"][1]["parent_id"], quiz.main_block);
    assert_eq!(structure["slots"][1]["element_id"], quiz.q2_element);

    let (status, block) = app
        .get(&format!("/quizzes/{}/blocks/{}", quiz.quiz_id, quiz.x_block))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(block["is_main_block"], false);
    assert_eq!(block["has_questions"], true);
    assert_eq!(block["condition_candidates"], json!([quiz.q1_element]));

    let (status, children) = app
        .send(
            Method::DELETE,
            &format!(
                "/quizzes/{}/blocks/{}/elements/{}",
                quiz.quiz_id, quiz.main_block, quiz.q1_element
            ),
            None,
            None,
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(children["children"][0]["id"], quiz.x_element);
    assert_eq!(children["children"][0]["slot"], 0);
    let (_, body) = app.get(&format!("/quizzes/{}", quiz.quiz_id)).await;
    assert_eq!(body["sum_grades"], 10.0);
}

#[tokio::test]
async fn editing_rejects_invalid_requests() {
    let app = app();
    let quiz = adaptive_quiz(&app).await;

    let (status, _) = app.post("/quizzes", json!({ "name": "  " })).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    let (status, _) = app.post("/quizzes", json!({ "name": "Q", "grade": -1.0 })).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    let (status, _) = app.get("/quizzes/9999").await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let condition = |element: i64| {
        json!({
            "use_and": true,
            "parts": [{ "comparator": "less", "element_id": element, "grade": 5.0 }],
        })
    };
    let (status, _) = app
        .put(
            &format!("/quizzes/{}/blocks/{}/condition", quiz.quiz_id, quiz.main_block),
            condition(quiz.q1_element),
        )
        .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    // Q3 comes after X, so X cannot depend on it.
    let (status, _) = app
        .put(
            &format!("/quizzes/{}/blocks/{}/condition", quiz.quiz_id, quiz.x_block),
            condition(quiz.q3_element),
        )
        .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);

    let (status, _) = app
        .send(
            Method::DELETE,
            &format!(
                "/quizzes/{}/blocks/{}/elements/{}",
                quiz.quiz_id, quiz.x_block, quiz.q1_element
            ),
            None,
            None,
        )
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn a_weak_answer_skips_the_gated_block() {
    let app = app();
    let quiz = adaptive_quiz(&app).await;
    gate_x_on_q1(&app, &quiz).await;
    let (_, condition) = app
        .get(&format!("/quizzes/{}/blocks/{}/condition", quiz.quiz_id, quiz.x_block))
        .await;
    assert_eq!(condition["parts"][0]["comparator"], "greater_or_equal");
    let student = Uuid::new_v4();

    let (status, attempt) = app
        .as_user(Method::POST, &format!("/quizzes/{}/attempts", quiz.quiz_id), student, None)
        .await;
    assert_eq!(status, StatusCode::CREATED, "{}", attempt);
    assert_eq!(attempt["attempt_number"], 1);
    assert_eq!(attempt["current_slot"], 1);
    assert_eq!(attempt["current_question"]["name"], "Q1");
    let attempt_uri = format!("/attempts/{}", attempt["id"]);

    let (status, attempt) = app
        .as_user(Method::POST, &format!("{}/slots/1", attempt_uri), student, Some(answer("5")))
        .await;
    assert_eq!(status, StatusCode::OK, "{}", attempt);
    assert_eq!(attempt["current_slot"], 3);
    assert_eq!(attempt["current_question"]["name"], "Q3");

    let (status, attempt) = app
        .as_user(Method::POST, &format!("{}/slots/3", attempt_uri), student, Some(answer("Blue")))
        .await;
    assert_eq!(status, StatusCode::OK, "{}", attempt);
    assert_eq!(attempt["status"], "finished");
    assert_eq!(attempt["sum_grades"], 10.0);
    assert_eq!(attempt["grade"], 50.0);
    assert_eq!(attempt["review"][1]["state"], "gaveup");
    assert_eq!(attempt["review"][1]["viewed"], false);
    assert_eq!(attempt["review"][2]["mark"], 10.0);
}

#[tokio::test]
async fn a_strong_answer_enters_the_gated_block() {
    let app = app();
    let quiz = adaptive_quiz(&app).await;
    gate_x_on_q1(&app, &quiz).await;
    let student = Uuid::new_v4();

    let (_, attempt) = app
        .as_user(Method::POST, &format!("/quizzes/{}/attempts", quiz.quiz_id), student, None)
        .await;
    let attempt_uri = format!("/attempts/{}", attempt["id"]);
    let (_, attempt) = app
        .as_user(Method::POST, &format!("{}/slots/1", attempt_uri), student, Some(answer("4")))
        .await;
    assert_eq!(attempt["current_slot"], 2);
    assert_eq!(attempt["current_question"]["name"], "Q2");

    // Answering the same slot again is stale.
    let (status, _) = app
        .as_user(Method::POST, &format!("{}/slots/1", attempt_uri), student, Some(answer("4")))
        .await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, attempt) = app
        .as_user(Method::POST, &format!("{}/finish", attempt_uri), student, None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(attempt["status"], "finished");
    assert_eq!(attempt["sum_grades"], 10.0);
    assert_eq!(attempt["current_question"], serde_json::Value::Null);

    let (status, _) = app
        .as_user(Method::POST, &format!("{}/slots/2", attempt_uri), student, Some(answer("paris")))
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn attempts_belong_to_their_user() {
    let app = app();
    let quiz = adaptive_quiz(&app).await;
    let student = Uuid::new_v4();

    let (status, _) = app
        .send(Method::POST, &format!("/quizzes/{}/attempts", quiz.quiz_id), None, None)
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (_, attempt) = app
        .as_user(Method::POST, &format!("/quizzes/{}/attempts", quiz.quiz_id), student, None)
        .await;
    let attempt_uri = format!("/attempts/{}", attempt["id"]);
    let (status, _) = app
        .as_user(Method::GET, &attempt_uri, Uuid::new_v4(), None)
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    let (status, body) = app.as_user(Method::GET, &attempt_uri, student, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "in_progress");

    let (_, second) = app
        .as_user(Method::POST, &format!("/quizzes/{}/attempts", quiz.quiz_id), student, None)
        .await;
    assert_eq!(second["attempt_number"], 2);
}

#[tokio::test]
async fn an_empty_quiz_cannot_be_attempted() {
    let app = app();
    let (_, quiz) = app.post("/quizzes", json!({ "name": "Empty", "grade": 10.0 })).await;
    let (status, _) = app
        .as_user(
            Method::POST,
            &format!("/quizzes/{}/attempts", quiz["id"]),
            Uuid::new_v4(),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
}

/// Runs an attempt answering only slot 1 and returns that slot's review feedback.
async fn first_slot_feedback(app: &TestApp, quiz_id: i64, given: &str) -> serde_json::Value {
    let student = Uuid::new_v4();
    let (_, attempt) = app
        .as_user(Method::POST, &format!("/quizzes/{}/attempts", quiz_id), student, None)
        .await;
    let attempt_uri = format!("/attempts/{}", attempt["id"]);
    app.as_user(Method::POST, &format!("{}/slots/1", attempt_uri), student, Some(answer(given)))
        .await;
    let (_, finished) = app
        .as_user(Method::POST, &format!("{}/finish", attempt_uri), student, None)
        .await;
    finished["review"][0]["feedback"].clone()
}

#[tokio::test]
async fn specialized_feedback_replaces_the_review_text_when_its_condition_holds() {
    let app = app();
    let quiz = adaptive_quiz(&app).await;
    let feedback_uri = format!("/quizzes/{}/feedback", quiz.quiz_id);

    let (status, created) = app.post(&feedback_uri, json!({ "name": "Arithmetic" })).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(created["condition"]["use_and"], true);
    let block_uri = format!("{}/{}", feedback_uri, created["id"]);

    let (status, updated) = app
        .put(
            &block_uri,
            json!({
                "name": "Arithmetic",
                "feedback_text": "Revise your times tables.",
                "used_elements": [quiz.q1_element, quiz.q1_element],
                "use_and": true,
                "parts": [{ "comparator": "less", "element_id": quiz.q1_element, "grade": 5.0 }],
            }),
        )
        .await;
    assert_eq!(status, StatusCode::OK, "{}", updated);
    assert_eq!(updated["used_elements"], json!([quiz.q1_element]));

    let (status, _) = app
        .put(
            &block_uri,
            json!({
                "name": "Arithmetic",
                "feedback_text": "",
                "used_elements": [9999],
                "use_and": true,
                "parts": [],
            }),
        )
        .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);

    assert_eq!(
        first_slot_feedback(&app, quiz.quiz_id, "3").await,
        "Revise your times tables."
    );
    assert_eq!(
        first_slot_feedback(&app, quiz.quiz_id, "4").await,
        serde_json::Value::Null
    );

    let (status, _) = app.send(Method::DELETE, &block_uri, None, None).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    let (_, list) = app.get(&feedback_uri).await;
    assert_eq!(list, json!([]));
}

#[tokio::test]
async fn overview_reports_the_best_finished_grade_per_user() {
    let app = app();
    let quiz = adaptive_quiz(&app).await;
    let student = Uuid::new_v4();

    for given in ["4", "0"] {
        let (_, attempt) = app
            .as_user(Method::POST, &format!("/quizzes/{}/attempts", quiz.quiz_id), student, None)
            .await;
        let attempt_uri = format!("/attempts/{}", attempt["id"]);
        app.as_user(Method::POST, &format!("{}/slots/1", attempt_uri), student, Some(answer(given)))
            .await;
        app.as_user(Method::POST, &format!("{}/finish", attempt_uri), student, None)
            .await;
    }

    let (status, overview) = app.get(&format!("/quizzes/{}/overview", quiz.quiz_id)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(overview["attempts"].as_array().unwrap().len(), 2);
    assert_eq!(overview["attempts"][1]["grade"], 0.0);
    assert_eq!(overview["best_grades"][0]["user_id"], student.to_string());
    assert_eq!(overview["best_grades"][0]["grade"], 50.0);

    let (status, _) = app
        .send(Method::DELETE, &format!("/quizzes/{}", quiz.quiz_id), None, None)
        .await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    let (status, _) = app.get(&format!("/quizzes/{}/overview", quiz.quiz_id)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn attempted_quizzes_keep_their_structure_but_can_be_regraded() {
    let app = app();
    let quiz = adaptive_quiz(&app).await;
    let student = Uuid::new_v4();
    let (_, attempt) = app
        .as_user(Method::POST, &format!("/quizzes/{}/attempts", quiz.quiz_id), student, None)
        .await;
    let attempt_uri = format!("/attempts/{}", attempt["id"]);
    let (_, attempt) = app
        .as_user(Method::POST, &format!("{}/slots/1", attempt_uri), student, Some(answer("5")))
        .await;
    assert_eq!(attempt["current_slot"], 2);

    let q4 = app.question("Q4", "yes").await;
    let (status, _) = app
        .post(
            &format!("/quizzes/{}/blocks/{}/questions", quiz.quiz_id, quiz.main_block),
            json!({ "question_id": q4 }),
        )
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
    let (status, _) = app
        .send(
            Method::DELETE,
            &format!(
                "/quizzes/{}/blocks/{}/elements/{}",
                quiz.quiz_id, quiz.main_block, quiz.q1_element
            ),
            None,
            None,
        )
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
    let (_, structure) = app.get(&format!("/quizzes/{}/structure", quiz.quiz_id)).await;
    assert_eq!(structure["total_slots"], 3);

    // Slot 2 is still open.
    let (status, _) = app
        .put(&format!("{}/slots/2/mark", attempt_uri), json!({ "mark": 5.0 }))
        .await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (_, attempt) = app
        .as_user(Method::POST, &format!("{}/finish", attempt_uri), student, None)
        .await;
    assert_eq!(attempt["sum_grades"], 0.0);

    let (status, _) = app
        .put(&format!("{}/slots/1/mark", attempt_uri), json!({ "mark": 12.0 }))
        .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    let (status, _) = app
        .put(&format!("{}/slots/9/mark", attempt_uri), json!({ "mark": 1.0 }))
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, attempt) = app
        .put(&format!("{}/slots/1/mark", attempt_uri), json!({ "mark": 10.0 }))
        .await;
    assert_eq!(status, StatusCode::OK, "{}", attempt);
    assert_eq!(attempt["sum_grades"], 10.0);
    assert_eq!(attempt["grade"], 50.0);
    assert_eq!(attempt["review"][0]["state"], "graded");
    assert_eq!(attempt["review"][0]["mark"], 10.0);
    assert!(attempt["review"][0]["finished_at"].is_string());
}
