//! Shared helpers for driving the router against the in-memory store.
use adaptive_quiz_core::InMemoryStore;
use api_lib::{
    adapters::AnswerKeyEngine,
    config::Config,
    web::{self, middleware::USER_ID_HEADER, state::AppState},
};
use axum::{
    body::Body,
    http::{Method, Request, StatusCode},
    Router,
};
use http_body_util::BodyExt;
use serde_json::{json, Value};
use std::sync::Arc;
use tower::ServiceExt;
use uuid::Uuid;

#[allow(dead_code)]
pub struct TestApp {
    pub router: Router,
    pub store: Arc<InMemoryStore>,
}

pub fn app() -> TestApp {
    let config = Config::from_lookup(|key| match key {
        "DATABASE_URL" => Some("postgres://localhost/unused".to_string()),
        _ => None,
    })
    .unwrap();
    let store = Arc::new(InMemoryStore::new());
    let state = Arc::new(AppState {
        store: store.clone(),
        engine: Arc::new(AnswerKeyEngine::new()),
        config: Arc::new(config),
    });
    TestApp {
        router: web::router(state),
        store,
    }
}

impl TestApp {
    /// Sends a request and returns the status with the body parsed as JSON
    /// (plain-text bodies come back as a JSON string).
    pub async fn send(
        &self,
        method: Method,
        uri: &str,
        user: Option<Uuid>,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let mut request = Request::builder().method(method).uri(uri);
        if let Some(user) = user {
            request = request.header(USER_ID_HEADER, user.to_string());
        }
        let request = match body {
            Some(body) => request
                .header("content-type", "application/json")
                .body(Body::from(serde_json::to_vec(&body).unwrap())),
            None => request.body(Body::empty()),
        }
        .unwrap();

        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes)
                .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&bytes).into_owned()))
        };
        (status, value)
    }

    #[allow(dead_code)]
    pub async fn get(&self, uri: &str) -> (StatusCode, Value) {
        self.send(Method::GET, uri, None, None).await
    }

    #[allow(dead_code)]
    pub async fn post(&self, uri: &str, body: Value) -> (StatusCode, Value) {
        self.send(Method::POST, uri, None, Some(body)).await
    }

    #[allow(dead_code)]
    pub async fn put(&self, uri: &str, body: Value) -> (StatusCode, Value) {
        self.send(Method::PUT, uri, None, Some(body)).await
    }

    #[allow(dead_code)]
    pub async fn as_user(
        &self,
        method: Method,
        uri: &str,
        user: Uuid,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        self.send(method, uri, Some(user), body).await
    }

    /// Creates a question worth 10 with the given answer key.
    pub async fn question(&self, name: &str, answer: &str) -> i64 {
        let (status, body) = self
            .post(
                "/questions",
                json!({
                    "name": name,
                    "question_text": format!("{}?", name),
                    "default_mark": 10.0,
                    "answer": answer,
                }),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED, "{}", body);
        body["id"].as_i64().unwrap()
    }
}

/// The quiz `[Q1, X [Q2], Q3]` with the ids the tests refer to.
#[allow(dead_code)]
pub struct Adaptive {
    pub quiz_id: i64,
    pub main_block: i64,
    pub x_block: i64,
    pub q1_element: i64,
    pub x_element: i64,
    pub q2_element: i64,
    pub q3_element: i64,
}

/// Builds the scenario quiz. Q1 expects "4", Q2 "paris", Q3 "blue".
pub async fn adaptive_quiz(app: &TestApp) -> Adaptive {
    let (status, quiz) = app.post("/quizzes", json!({ "name": "Adaptive" })).await;
    assert_eq!(status, StatusCode::CREATED, "{}", quiz);
    let quiz_id = quiz["id"].as_i64().unwrap();
    let main_block = quiz["main_block_id"].as_i64().unwrap();

    let q1 = app.question("Q1", "4").await;
    let q2 = app.question("Q2", "paris").await;
    let q3 = app.question("Q3", "blue").await;
    let blocks = format!("/quizzes/{}/blocks", quiz_id);

    let (_, children) = app
        .post(&format!("{}/{}/questions", blocks, main_block), json!({ "question_id": q1 }))
        .await;
    let q1_element = children["children"][0]["id"].as_i64().unwrap();

    let (status, x) = app
        .post(&format!("{}/{}/subblocks", blocks, main_block), json!({ "name": "X" }))
        .await;
    assert_eq!(status, StatusCode::CREATED, "{}", x);
    let x_block = x["id"].as_i64().unwrap();

    let (_, children) = app
        .post(&format!("{}/{}/questions", blocks, x_block), json!({ "question_id": q2 }))
        .await;
    let q2_element = children["children"][0]["id"].as_i64().unwrap();

    let (_, children) = app
        .post(&format!("{}/{}/questions", blocks, main_block), json!({ "question_id": q3 }))
        .await;
    let x_element = children["children"][1]["id"].as_i64().unwrap();
    let q3_element = children["children"][2]["id"].as_i64().unwrap();

    Adaptive {
        quiz_id,
        main_block,
        x_block,
        q1_element,
        x_element,
        q2_element,
        q3_element,
    }
}

/// Gates block X on `Q1 >= 5`.
#[allow(dead_code)]
pub async fn gate_x_on_q1(app: &TestApp, quiz: &Adaptive) {
    let (status, body) = app
        .put(
            &format!("/quizzes/{}/blocks/{}/condition", quiz.quiz_id, quiz.x_block),
            json!({
                "use_and": true,
                "parts": [{ "comparator": "greater_or_equal", "element_id": quiz.q1_element, "grade": 5.0 }],
            }),
        )
        .await;
    assert_eq!(status, StatusCode::OK, "{}", body);
}

#[allow(dead_code)]
pub fn answer(text: &str) -> Value {
    json!({ "response": { "answer": text } })
}
