//! services/api/src/web/attempts.rs
//!
//! Handlers that drive a student's attempt through a quiz. All routes here act
//! on behalf of the user named by the `x-user-id` header, except manual grading,
//! which is an editing action.

use crate::web::{
    middleware::UserId,
    protocol::*,
    rest::{reject, Rejection},
    state::AppState,
};
use adaptive_quiz_core::{
    AttemptId, AttemptSession, ElementRef, QuizId, QuizResult, QuizStore, SpecializedFeedback,
};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Json},
    Extension,
};
use chrono::Utc;
use std::sync::Arc;
use tracing::warn;
use uuid::Uuid;

/// Loads an attempt, refusing attempts of other users.
async fn load_own_session(
    store: &dyn QuizStore,
    attempt_id: i64,
    user: UserId,
) -> Result<AttemptSession, Rejection> {
    let session = AttemptSession::load(store, AttemptId(attempt_id))
        .await
        .map_err(|e| reject("Load attempt", e))?;
    if session.attempt.user_id != user.0 {
        warn!(attempt_id, user_id = %user.0, "Attempt requested by another user");
        return Err((
            StatusCode::FORBIDDEN,
            "Attempt belongs to another user".to_string(),
        ));
    }
    Ok(session)
}

async fn attempt_response(
    store: &dyn QuizStore,
    session: &AttemptSession,
) -> QuizResult<AttemptResponse> {
    let attempt = &session.attempt;

    let current_question = match session.current_element() {
        Some(element) => match element.target {
            ElementRef::Question(question_id) => {
                let question = store.get_question(question_id).await?;
                Some(CurrentQuestion {
                    slot: attempt.current_slot,
                    element_id: element.id.0,
                    question_id: question.id.0,
                    name: question.name,
                    question_text: question.question_text,
                    max_mark: element.grade,
                })
            }
            ElementRef::Block(_) => None,
        },
        None => None,
    };

    let review = if session.is_finished() {
        let feedback = SpecializedFeedback::load(store, &session.quiz).await?;
        let results = session.results();
        session
            .slots()
            .iter()
            .filter_map(|(slot, element_id)| {
                let usage_slot = session.usage.slot_for_element(element_id)?;
                Some(SlotReview {
                    slot,
                    element_id: element_id.0,
                    state: usage_slot.state.as_str().to_string(),
                    mark: usage_slot.mark(),
                    max_mark: usage_slot.max_mark,
                    viewed: usage_slot.viewed,
                    finished_at: usage_slot.finished_at,
                    feedback: feedback
                        .feedback_for(element_id, &results)
                        .map(str::to_string),
                })
            })
            .collect()
    } else {
        Vec::new()
    };

    Ok(AttemptResponse {
        id: attempt.id.0,
        quiz_id: attempt.quiz_id.0,
        user_id: attempt.user_id,
        attempt_number: attempt.attempt_number,
        status: session.status().into(),
        current_slot: attempt.current_slot,
        total_slots: session.total_slots(),
        current_question,
        sum_grades: attempt.sum_grades,
        grade: attempt
            .sum_grades
            .and_then(|raw| session.quiz.rescale_grade(raw)),
        started_at: attempt.started_at,
        finished_at: attempt.finished_at,
        review,
    })
}

//=========================================================================================
// Attempt Handlers
//=========================================================================================

/// Start a new attempt of the calling user on a quiz.
///
/// The first slot is the first question whose enclosing blocks' conditions hold.
#[utoipa::path(
    post,
    path = "/quizzes/{quiz_id}/attempts",
    responses(
        (status = 201, description = "Attempt started", body = AttemptResponse),
        (status = 400, description = "Missing or malformed x-user-id header"),
        (status = 404, description = "Quiz not found"),
        (status = 409, description = "The quiz has no questions")
    ),
    params(
        ("quiz_id" = i64, Path, description = "The quiz id."),
        ("x-user-id" = Uuid, Header, description = "The unique ID of the user.")
    )
)]
pub async fn start_attempt_handler(
    State(app_state): State<Arc<AppState>>,
    Extension(user): Extension<UserId>,
    Path(quiz_id): Path<i64>,
) -> Result<impl IntoResponse, Rejection> {
    let store = app_state.store.as_ref();
    let session = AttemptSession::start(store, QuizId(quiz_id), user.0, Utc::now())
        .await
        .map_err(|e| reject("Start attempt", e))?;
    let response = attempt_response(store, &session)
        .await
        .map_err(|e| reject("Load attempt", e))?;
    Ok((StatusCode::CREATED, Json(response)))
}

#[utoipa::path(
    get,
    path = "/attempts/{attempt_id}",
    responses(
        (status = 200, description = "The attempt, its current question and, once finished, its review", body = AttemptResponse),
        (status = 403, description = "Attempt of another user"),
        (status = 404, description = "Attempt not found")
    ),
    params(
        ("attempt_id" = i64, Path, description = "The attempt id."),
        ("x-user-id" = Uuid, Header, description = "The unique ID of the user.")
    )
)]
pub async fn get_attempt_handler(
    State(app_state): State<Arc<AppState>>,
    Extension(user): Extension<UserId>,
    Path(attempt_id): Path<i64>,
) -> Result<impl IntoResponse, Rejection> {
    let store = app_state.store.as_ref();
    let session = load_own_session(store, attempt_id, user).await?;
    let response = attempt_response(store, &session)
        .await
        .map_err(|e| reject("Load attempt", e))?;
    Ok(Json(response))
}

/// Submit the response to the current slot.
///
/// The response is graded, the next reachable slot becomes current, and the
/// attempt finishes when no reachable slot is left.
#[utoipa::path(
    post,
    path = "/attempts/{attempt_id}/slots/{slot}",
    request_body = ProcessSlotRequest,
    responses(
        (status = 200, description = "Response recorded", body = AttemptResponse),
        (status = 403, description = "Attempt of another user"),
        (status = 404, description = "Attempt not found"),
        (status = 409, description = "Stale slot or finished attempt")
    ),
    params(
        ("attempt_id" = i64, Path, description = "The attempt id."),
        ("slot" = u32, Path, description = "The slot being answered."),
        ("x-user-id" = Uuid, Header, description = "The unique ID of the user.")
    )
)]
pub async fn process_slot_handler(
    State(app_state): State<Arc<AppState>>,
    Extension(user): Extension<UserId>,
    Path((attempt_id, slot)): Path<(i64, u32)>,
    Json(payload): Json<ProcessSlotRequest>,
) -> Result<impl IntoResponse, Rejection> {
    let store = app_state.store.as_ref();
    let mut session = load_own_session(store, attempt_id, user).await?;
    session
        .process_slot(
            store,
            app_state.engine.as_ref(),
            slot,
            payload.response,
            Utc::now(),
        )
        .await
        .map_err(|e| reject("Process slot", e))?;
    let response = attempt_response(store, &session)
        .await
        .map_err(|e| reject("Load attempt", e))?;
    Ok(Json(response))
}

/// Finish the attempt, giving up on every slot not yet answered.
#[utoipa::path(
    post,
    path = "/attempts/{attempt_id}/finish",
    responses(
        (status = 200, description = "Attempt finished", body = AttemptResponse),
        (status = 403, description = "Attempt of another user"),
        (status = 404, description = "Attempt not found"),
        (status = 409, description = "The attempt was advanced concurrently")
    ),
    params(
        ("attempt_id" = i64, Path, description = "The attempt id."),
        ("x-user-id" = Uuid, Header, description = "The unique ID of the user.")
    )
)]
pub async fn finish_attempt_handler(
    State(app_state): State<Arc<AppState>>,
    Extension(user): Extension<UserId>,
    Path(attempt_id): Path<i64>,
) -> Result<impl IntoResponse, Rejection> {
    let store = app_state.store.as_ref();
    let mut session = load_own_session(store, attempt_id, user).await?;
    session
        .finish(store, app_state.engine.as_ref(), Utc::now())
        .await
        .map_err(|e| reject("Finish attempt", e))?;
    let response = attempt_response(store, &session)
        .await
        .map_err(|e| reject("Load attempt", e))?;
    Ok(Json(response))
}

/// Override the mark of an answered or abandoned slot.
///
/// On a finished attempt the summed grade is recomputed.
#[utoipa::path(
    put,
    path = "/attempts/{attempt_id}/slots/{slot}/mark",
    request_body = ManualMarkRequest,
    responses(
        (status = 200, description = "Mark recorded", body = AttemptResponse),
        (status = 404, description = "Attempt or slot not found"),
        (status = 409, description = "The slot has not been finished yet"),
        (status = 422, description = "Mark outside the slot's range")
    ),
    params(
        ("attempt_id" = i64, Path, description = "The attempt id."),
        ("slot" = u32, Path, description = "The slot being graded.")
    )
)]
pub async fn regrade_slot_handler(
    State(app_state): State<Arc<AppState>>,
    Path((attempt_id, slot)): Path<(i64, u32)>,
    Json(payload): Json<ManualMarkRequest>,
) -> Result<impl IntoResponse, Rejection> {
    let store = app_state.store.as_ref();
    let mut session = AttemptSession::load(store, AttemptId(attempt_id))
        .await
        .map_err(|e| reject("Load attempt", e))?;
    session
        .regrade(store, slot, payload.mark, Utc::now())
        .await
        .map_err(|e| reject("Regrade slot", e))?;
    let response = attempt_response(store, &session)
        .await
        .map_err(|e| reject("Load attempt", e))?;
    Ok(Json(response))
}
