//! services/api/src/web/feedback.rs
//!
//! Handlers for the condition-gated feedback blocks of a quiz.

use crate::web::{
    protocol::*,
    rest::{bad_request, load_quiz, reject, Rejection},
    state::AppState,
};
use adaptive_quiz_core::{
    feedback::{
        create_feedback_block, delete_feedback_block, load_feedback_block, update_feedback_block,
    },
    ElementId, FeedbackBlockId, FeedbackUpdate, PartDraft, SpecializedFeedback,
};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Json},
};
use std::sync::Arc;

#[utoipa::path(
    post,
    path = "/quizzes/{quiz_id}/feedback",
    request_body = CreateFeedbackRequest,
    responses(
        (status = 201, description = "Feedback block created with an empty condition", body = FeedbackResponse),
        (status = 400, description = "Empty name"),
        (status = 404, description = "Quiz not found")
    ),
    params(("quiz_id" = i64, Path, description = "The quiz id."))
)]
pub async fn create_feedback_handler(
    State(app_state): State<Arc<AppState>>,
    Path(quiz_id): Path<i64>,
    Json(payload): Json<CreateFeedbackRequest>,
) -> Result<impl IntoResponse, Rejection> {
    let name = payload.name.trim();
    if name.is_empty() {
        return Err(bad_request("Feedback name must not be empty"));
    }
    let quiz = load_quiz(&app_state, quiz_id).await?;
    let gated = create_feedback_block(app_state.store.as_ref(), &quiz, name)
        .await
        .map_err(|e| reject("Create feedback block", e))?;
    Ok((StatusCode::CREATED, Json(FeedbackResponse::from(&gated))))
}

#[utoipa::path(
    get,
    path = "/quizzes/{quiz_id}/feedback",
    responses(
        (status = 200, description = "Feedback blocks in creation order", body = Vec<FeedbackResponse>),
        (status = 404, description = "Quiz not found")
    ),
    params(("quiz_id" = i64, Path, description = "The quiz id."))
)]
pub async fn list_feedback_handler(
    State(app_state): State<Arc<AppState>>,
    Path(quiz_id): Path<i64>,
) -> Result<impl IntoResponse, Rejection> {
    let quiz = load_quiz(&app_state, quiz_id).await?;
    let feedback = SpecializedFeedback::load(app_state.store.as_ref(), &quiz)
        .await
        .map_err(|e| reject("List feedback blocks", e))?;
    let blocks: Vec<FeedbackResponse> =
        feedback.blocks().iter().map(FeedbackResponse::from).collect();
    Ok(Json(blocks))
}

#[utoipa::path(
    get,
    path = "/quizzes/{quiz_id}/feedback/{feedback_id}",
    responses(
        (status = 200, description = "The feedback block", body = FeedbackResponse),
        (status = 404, description = "Quiz or feedback block not found")
    ),
    params(
        ("quiz_id" = i64, Path, description = "The quiz id."),
        ("feedback_id" = i64, Path, description = "The feedback block id.")
    )
)]
pub async fn get_feedback_handler(
    State(app_state): State<Arc<AppState>>,
    Path((quiz_id, feedback_id)): Path<(i64, i64)>,
) -> Result<impl IntoResponse, Rejection> {
    let quiz = load_quiz(&app_state, quiz_id).await?;
    let gated = load_feedback_block(
        app_state.store.as_ref(),
        &quiz,
        FeedbackBlockId(feedback_id),
    )
    .await
    .map_err(|e| reject("Load feedback block", e))?;
    Ok(Json(FeedbackResponse::from(&gated)))
}

/// Replace name, text, used elements and condition of a feedback block.
#[utoipa::path(
    put,
    path = "/quizzes/{quiz_id}/feedback/{feedback_id}",
    request_body = UpdateFeedbackRequest,
    responses(
        (status = 200, description = "Feedback block stored", body = FeedbackResponse),
        (status = 400, description = "Empty name or invalid grade in a part"),
        (status = 404, description = "Quiz or feedback block not found"),
        (status = 422, description = "An element outside the quiz is referenced")
    ),
    params(
        ("quiz_id" = i64, Path, description = "The quiz id."),
        ("feedback_id" = i64, Path, description = "The feedback block id.")
    )
)]
pub async fn update_feedback_handler(
    State(app_state): State<Arc<AppState>>,
    Path((quiz_id, feedback_id)): Path<(i64, i64)>,
    Json(payload): Json<UpdateFeedbackRequest>,
) -> Result<impl IntoResponse, Rejection> {
    if payload.name.trim().is_empty() {
        return Err(bad_request("Feedback name must not be empty"));
    }
    let quiz = load_quiz(&app_state, quiz_id).await?;
    let update = FeedbackUpdate {
        name: payload.name.trim().to_string(),
        feedback_text: payload.feedback_text,
        used_elements: payload.used_elements.into_iter().map(ElementId).collect(),
        use_and: payload.use_and,
        parts: payload.parts.into_iter().map(PartDraft::from).collect(),
    };
    let gated = update_feedback_block(
        app_state.store.as_ref(),
        &quiz,
        FeedbackBlockId(feedback_id),
        update,
    )
    .await
    .map_err(|e| reject("Update feedback block", e))?;
    Ok(Json(FeedbackResponse::from(&gated)))
}

#[utoipa::path(
    delete,
    path = "/quizzes/{quiz_id}/feedback/{feedback_id}",
    responses(
        (status = 204, description = "Feedback block deleted"),
        (status = 404, description = "Quiz or feedback block not found")
    ),
    params(
        ("quiz_id" = i64, Path, description = "The quiz id."),
        ("feedback_id" = i64, Path, description = "The feedback block id.")
    )
)]
pub async fn delete_feedback_handler(
    State(app_state): State<Arc<AppState>>,
    Path((quiz_id, feedback_id)): Path<(i64, i64)>,
) -> Result<impl IntoResponse, Rejection> {
    let quiz = load_quiz(&app_state, quiz_id).await?;
    delete_feedback_block(
        app_state.store.as_ref(),
        &quiz,
        FeedbackBlockId(feedback_id),
    )
    .await
    .map_err(|e| reject("Delete feedback block", e))?;
    Ok(StatusCode::NO_CONTENT)
}
