//! services/api/src/web/rest.rs
//!
//! Contains the Axum handlers for quizzes and the question bank, the error
//! mapping shared by every handler, and the master definition for the
//! OpenAPI specification.

use crate::error::status_for;
use crate::web::{attempts, edit, feedback, protocol::*, state::AppState};
use adaptive_quiz_core::{
    quiz, AttemptsOverview, BlockTree, NewQuestion, QuestionId, Quiz, QuizError, QuizId,
    SlotMap,
};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Json},
};
use chrono::Utc;
use std::sync::Arc;
use tracing::{error, warn};
use utoipa::OpenApi;

//=========================================================================================
// OpenAPI Master Definition
//=========================================================================================

#[derive(OpenApi)]
#[openapi(
    paths(
        create_quiz_handler,
        get_quiz_handler,
        delete_quiz_handler,
        get_structure_handler,
        get_overview_handler,
        create_question_handler,
        get_question_handler,
        edit::get_block_handler,
        edit::rename_block_handler,
        edit::add_question_handler,
        edit::create_subblock_handler,
        edit::remove_child_handler,
        edit::get_condition_handler,
        edit::update_condition_handler,
        attempts::start_attempt_handler,
        attempts::get_attempt_handler,
        attempts::process_slot_handler,
        attempts::finish_attempt_handler,
        attempts::regrade_slot_handler,
        feedback::create_feedback_handler,
        feedback::list_feedback_handler,
        feedback::get_feedback_handler,
        feedback::update_feedback_handler,
        feedback::delete_feedback_handler,
    ),
    components(
        schemas(
            CreateQuizRequest, QuizResponse, CreateQuestionRequest, QuestionResponse,
            ElementKind, ElementResponse, ComparatorDto, PartPayload, PartResponse,
            ConditionResponse, UpdateConditionRequest, BlockResponse, RenameBlockRequest,
            AddQuestionRequest, CreateSubblockRequest, ChildrenResponse, BlockNode, SlotEntry,
            StructureResponse, AttemptStatusDto, ProcessSlotRequest, ManualMarkRequest, CurrentQuestion,
            SlotReview, AttemptResponse, OverviewRowResponse, BestGrade, OverviewResponse,
            CreateFeedbackRequest, UpdateFeedbackRequest, FeedbackResponse
        )
    ),
    tags(
        (name = "Adaptive Quiz API", description = "Editing adaptive quizzes and running attempts on them.")
    )
)]
pub struct ApiDoc;

//=========================================================================================
// Shared Handler Plumbing
//=========================================================================================

/// What every handler returns on failure: a status code and a message.
pub type Rejection = (StatusCode, String);

/// Turns an engine error into a response, logging it on the way.
///
/// Server-side failures are logged in full but answered with a generic message.
pub fn reject(context: &str, err: QuizError) -> Rejection {
    let status = status_for(&err);
    if status.is_server_error() {
        error!("{} failed: {:?}", context, err);
        (status, format!("{} failed", context))
    } else {
        warn!("{} rejected: {}", context, err);
        (status, err.to_string())
    }
}

pub(crate) fn bad_request(message: &str) -> Rejection {
    (StatusCode::BAD_REQUEST, message.to_string())
}

pub(crate) async fn load_quiz(state: &AppState, quiz_id: i64) -> Result<Quiz, Rejection> {
    state
        .store
        .get_quiz(QuizId(quiz_id))
        .await
        .map_err(|e| reject("Load quiz", e.into()))
}

//=========================================================================================
// Quiz Handlers
//=========================================================================================

/// Create a new quiz with an empty main block.
#[utoipa::path(
    post,
    path = "/quizzes",
    request_body = CreateQuizRequest,
    responses(
        (status = 201, description = "Quiz created", body = QuizResponse),
        (status = 400, description = "Empty name or invalid grade"),
        (status = 500, description = "Internal server error")
    )
)]
pub async fn create_quiz_handler(
    State(app_state): State<Arc<AppState>>,
    Json(payload): Json<CreateQuizRequest>,
) -> Result<impl IntoResponse, Rejection> {
    let name = payload.name.trim();
    if name.is_empty() {
        return Err(bad_request("Quiz name must not be empty"));
    }
    let grade = payload.grade.unwrap_or(app_state.config.default_quiz_grade);
    let quiz = quiz::create_quiz(app_state.store.as_ref(), name, grade, Utc::now())
        .await
        .map_err(|e| reject("Create quiz", e))?;
    Ok((StatusCode::CREATED, Json(QuizResponse::from(quiz))))
}

#[utoipa::path(
    get,
    path = "/quizzes/{quiz_id}",
    responses(
        (status = 200, description = "The quiz", body = QuizResponse),
        (status = 404, description = "Quiz not found")
    ),
    params(("quiz_id" = i64, Path, description = "The quiz id."))
)]
pub async fn get_quiz_handler(
    State(app_state): State<Arc<AppState>>,
    Path(quiz_id): Path<i64>,
) -> Result<impl IntoResponse, Rejection> {
    let quiz = load_quiz(&app_state, quiz_id).await?;
    Ok(Json(QuizResponse::from(quiz)))
}

/// Delete a quiz together with its blocks, conditions, attempts and feedback.
#[utoipa::path(
    delete,
    path = "/quizzes/{quiz_id}",
    responses(
        (status = 204, description = "Quiz deleted"),
        (status = 404, description = "Quiz not found")
    ),
    params(("quiz_id" = i64, Path, description = "The quiz id."))
)]
pub async fn delete_quiz_handler(
    State(app_state): State<Arc<AppState>>,
    Path(quiz_id): Path<i64>,
) -> Result<impl IntoResponse, Rejection> {
    quiz::delete_quiz(app_state.store.as_ref(), QuizId(quiz_id))
        .await
        .map_err(|e| reject("Delete quiz", e))?;
    Ok(StatusCode::NO_CONTENT)
}

/// The whole block tree with the slot numbering an attempt would see.
#[utoipa::path(
    get,
    path = "/quizzes/{quiz_id}/structure",
    responses(
        (status = 200, description = "The quiz structure", body = StructureResponse),
        (status = 404, description = "Quiz not found"),
        (status = 500, description = "The stored block tree is inconsistent")
    ),
    params(("quiz_id" = i64, Path, description = "The quiz id."))
)]
pub async fn get_structure_handler(
    State(app_state): State<Arc<AppState>>,
    Path(quiz_id): Path<i64>,
) -> Result<impl IntoResponse, Rejection> {
    let quiz = load_quiz(&app_state, quiz_id).await?;
    let tree = BlockTree::load(app_state.store.as_ref(), &quiz)
        .await
        .map_err(|e| reject("Load quiz structure", e))?;
    let slots = SlotMap::enumerate(&tree);

    let blocks = tree
        .blocks()
        .into_iter()
        .map(|node| BlockNode {
            id: node.record.id.0,
            name: node.record.name.clone(),
            parent_id: node.parent.map(|parent| parent.0),
            children: node.children.iter().map(ElementResponse::from).collect(),
            condition: node.condition.as_ref().map(ConditionResponse::from),
        })
        .collect();

    Ok(Json(StructureResponse {
        quiz_id: quiz.id.0,
        main_block_id: quiz.main_block_id.0,
        total_slots: slots.total(),
        blocks,
        slots: slots
            .iter()
            .map(|(slot, element)| SlotEntry {
                slot,
                element_id: element.0,
            })
            .collect(),
    }))
}

/// All attempts of a quiz with their rescaled grades and each user's best grade.
#[utoipa::path(
    get,
    path = "/quizzes/{quiz_id}/overview",
    responses(
        (status = 200, description = "The attempts overview", body = OverviewResponse),
        (status = 404, description = "Quiz not found")
    ),
    params(("quiz_id" = i64, Path, description = "The quiz id."))
)]
pub async fn get_overview_handler(
    State(app_state): State<Arc<AppState>>,
    Path(quiz_id): Path<i64>,
) -> Result<impl IntoResponse, Rejection> {
    let overview = AttemptsOverview::load(app_state.store.as_ref(), QuizId(quiz_id))
        .await
        .map_err(|e| reject("Load attempts overview", e))?;

    let attempts = overview
        .rows
        .into_iter()
        .map(|row| OverviewRowResponse {
            attempt_id: row.attempt.id.0,
            user_id: row.attempt.user_id,
            attempt_number: row.attempt.attempt_number,
            status: row.status.into(),
            sum_grades: row.attempt.sum_grades,
            grade: row.grade,
            started_at: row.attempt.started_at,
            finished_at: row.attempt.finished_at,
        })
        .collect();
    let best_grades = overview
        .best_grades
        .into_iter()
        .map(|(user_id, grade)| BestGrade { user_id, grade })
        .collect();

    Ok(Json(OverviewResponse {
        quiz_id: overview.quiz.id.0,
        grade: overview.quiz.grade,
        sum_grades: overview.quiz.sum_grades,
        total_slots: overview.total_slots,
        attempts,
        best_grades,
    }))
}

//=========================================================================================
// Question Bank Handlers
//=========================================================================================

#[utoipa::path(
    post,
    path = "/questions",
    request_body = CreateQuestionRequest,
    responses(
        (status = 201, description = "Question created", body = QuestionResponse),
        (status = 400, description = "Empty name or invalid default mark")
    )
)]
pub async fn create_question_handler(
    State(app_state): State<Arc<AppState>>,
    Json(payload): Json<CreateQuestionRequest>,
) -> Result<impl IntoResponse, Rejection> {
    if payload.name.trim().is_empty() {
        return Err(bad_request("Question name must not be empty"));
    }
    if !payload.default_mark.is_finite() || payload.default_mark < 0.0 {
        return Err(reject(
            "Create question",
            QuizError::InvalidGrade(payload.default_mark),
        ));
    }
    let question = app_state
        .store
        .create_question(NewQuestion {
            name: payload.name.trim().to_string(),
            question_text: payload.question_text,
            default_mark: payload.default_mark,
            answer: payload.answer.filter(|answer| !answer.trim().is_empty()),
        })
        .await
        .map_err(|e| reject("Create question", e.into()))?;
    Ok((StatusCode::CREATED, Json(QuestionResponse::from(question))))
}

#[utoipa::path(
    get,
    path = "/questions/{question_id}",
    responses(
        (status = 200, description = "The question", body = QuestionResponse),
        (status = 404, description = "Question not found")
    ),
    params(("question_id" = i64, Path, description = "The question id."))
)]
pub async fn get_question_handler(
    State(app_state): State<Arc<AppState>>,
    Path(question_id): Path<i64>,
) -> Result<impl IntoResponse, Rejection> {
    let question = app_state
        .store
        .get_question(QuestionId(question_id))
        .await
        .map_err(|e| reject("Load question", e.into()))?;
    Ok(Json(QuestionResponse::from(question)))
}
