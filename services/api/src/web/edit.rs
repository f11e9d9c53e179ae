//! services/api/src/web/edit.rs
//!
//! Handlers for editing the block tree of a quiz: renaming blocks, placing
//! questions and sub-blocks, removing children and editing block conditions.
//!
//! Every structural edit recomputes the quiz's attainable grade before answering.

use crate::web::{
    protocol::*,
    rest::{bad_request, load_quiz, reject, Rejection},
    state::AppState,
};
use adaptive_quiz_core::{
    quiz, Block, BlockId, BlockTree, ElementId, PartDraft, PortError, QuestionId, Quiz,
    QuizError, QuizResult, QuizStore,
};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Json},
};
use chrono::Utc;
use std::sync::Arc;

/// Loads a block of the quiz, refusing blocks that are not placed in its tree.
async fn load_placed_block(
    store: &dyn QuizStore,
    quiz: &Quiz,
    block_id: i64,
) -> QuizResult<(Block, BlockTree)> {
    let block = Block::load(store, quiz, BlockId(block_id)).await?;
    let tree = BlockTree::load(store, quiz).await?;
    if !tree.contains(block.id()) {
        return Err(PortError::NotFound(format!(
            "Block {} is not placed in quiz {}",
            block_id, quiz.id
        ))
        .into());
    }
    Ok((block, tree))
}

async fn block_response(
    store: &dyn QuizStore,
    mut block: Block,
    tree: &BlockTree,
) -> QuizResult<BlockResponse> {
    let parent_id = tree.parent_of(block.id())?.map(|parent| parent.0);
    let condition_candidates = tree
        .condition_candidates(block.id())?
        .iter()
        .map(|element| element.id.0)
        .collect();
    let has_questions = block.has_questions(store).await?;
    let children = block
        .children(store)
        .await?
        .iter()
        .map(ElementResponse::from)
        .collect();
    let condition = block.condition(store).await?.map(ConditionResponse::from);

    Ok(BlockResponse {
        id: block.id().0,
        name: block.name().to_string(),
        is_main_block: block.is_main_block(),
        parent_id,
        has_questions,
        children,
        condition,
        condition_candidates,
    })
}

async fn refresh_sum_grades(store: &dyn QuizStore, quiz: &mut Quiz) -> Result<(), Rejection> {
    quiz::recompute_sum_grades(store, quiz, Utc::now())
        .await
        .map(|_| ())
        .map_err(|e| reject("Recompute quiz grade", e))
}

//=========================================================================================
// Block Handlers
//=========================================================================================

#[utoipa::path(
    get,
    path = "/quizzes/{quiz_id}/blocks/{block_id}",
    responses(
        (status = 200, description = "The block with its children and condition", body = BlockResponse),
        (status = 404, description = "Quiz or block not found")
    ),
    params(
        ("quiz_id" = i64, Path, description = "The quiz id."),
        ("block_id" = i64, Path, description = "The block id.")
    )
)]
pub async fn get_block_handler(
    State(app_state): State<Arc<AppState>>,
    Path((quiz_id, block_id)): Path<(i64, i64)>,
) -> Result<impl IntoResponse, Rejection> {
    let store = app_state.store.as_ref();
    let quiz = load_quiz(&app_state, quiz_id).await?;
    let response = async {
        let (block, tree) = load_placed_block(store, &quiz, block_id).await?;
        block_response(store, block, &tree).await
    }
    .await
    .map_err(|e| reject("Load block", e))?;
    Ok(Json(response))
}

#[utoipa::path(
    put,
    path = "/quizzes/{quiz_id}/blocks/{block_id}/name",
    request_body = RenameBlockRequest,
    responses(
        (status = 200, description = "Block renamed", body = BlockResponse),
        (status = 400, description = "Empty name"),
        (status = 404, description = "Quiz or block not found")
    ),
    params(
        ("quiz_id" = i64, Path, description = "The quiz id."),
        ("block_id" = i64, Path, description = "The block id.")
    )
)]
pub async fn rename_block_handler(
    State(app_state): State<Arc<AppState>>,
    Path((quiz_id, block_id)): Path<(i64, i64)>,
    Json(payload): Json<RenameBlockRequest>,
) -> Result<impl IntoResponse, Rejection> {
    let name = payload.name.trim();
    if name.is_empty() {
        return Err(bad_request("Block name must not be empty"));
    }
    let store = app_state.store.as_ref();
    let quiz = load_quiz(&app_state, quiz_id).await?;
    let response = async {
        let (mut block, tree) = load_placed_block(store, &quiz, block_id).await?;
        block.set_name(store, name).await?;
        block_response(store, block, &tree).await
    }
    .await
    .map_err(|e| reject("Rename block", e))?;
    Ok(Json(response))
}

/// Append a question from the question bank to a block.
#[utoipa::path(
    post,
    path = "/quizzes/{quiz_id}/blocks/{block_id}/questions",
    request_body = AddQuestionRequest,
    responses(
        (status = 201, description = "Question placed; the block's children", body = ChildrenResponse),
        (status = 404, description = "Quiz, block or question not found"),
        (status = 409, description = "The quiz already has attempts")
    ),
    params(
        ("quiz_id" = i64, Path, description = "The quiz id."),
        ("block_id" = i64, Path, description = "The block id.")
    )
)]
pub async fn add_question_handler(
    State(app_state): State<Arc<AppState>>,
    Path((quiz_id, block_id)): Path<(i64, i64)>,
    Json(payload): Json<AddQuestionRequest>,
) -> Result<impl IntoResponse, Rejection> {
    let store = app_state.store.as_ref();
    let mut quiz = load_quiz(&app_state, quiz_id).await?;
    let children = async {
        let (mut block, _) = load_placed_block(store, &quiz, block_id).await?;
        let children: Vec<ElementResponse> = block
            .add_question(store, QuestionId(payload.question_id))
            .await?
            .iter()
            .map(ElementResponse::from)
            .collect();
        Ok::<_, QuizError>(children)
    }
    .await
    .map_err(|e| reject("Add question", e))?;
    refresh_sum_grades(store, &mut quiz).await?;
    Ok((
        StatusCode::CREATED,
        Json(ChildrenResponse { block_id, children }),
    ))
}

/// Create a new block and append it as a sub-block.
#[utoipa::path(
    post,
    path = "/quizzes/{quiz_id}/blocks/{block_id}/subblocks",
    request_body = CreateSubblockRequest,
    responses(
        (status = 201, description = "Sub-block created", body = BlockResponse),
        (status = 400, description = "Empty name"),
        (status = 404, description = "Quiz or block not found"),
        (status = 409, description = "The quiz already has attempts")
    ),
    params(
        ("quiz_id" = i64, Path, description = "The quiz id."),
        ("block_id" = i64, Path, description = "The id of the block receiving the sub-block.")
    )
)]
pub async fn create_subblock_handler(
    State(app_state): State<Arc<AppState>>,
    Path((quiz_id, block_id)): Path<(i64, i64)>,
    Json(payload): Json<CreateSubblockRequest>,
) -> Result<impl IntoResponse, Rejection> {
    let name = payload.name.trim();
    if name.is_empty() {
        return Err(bad_request("Block name must not be empty"));
    }
    let store = app_state.store.as_ref();
    let quiz = load_quiz(&app_state, quiz_id).await?;
    let response = async {
        let (mut parent, _) = load_placed_block(store, &quiz, block_id).await?;
        let block = parent.create_subblock(store, &quiz, name).await?;
        let tree = BlockTree::load(store, &quiz).await?;
        block_response(store, block, &tree).await
    }
    .await
    .map_err(|e| reject("Create sub-block", e))?;
    Ok((StatusCode::CREATED, Json(response)))
}

/// Remove a question or sub-block from a block.
///
/// Later siblings move up one slot. A removed sub-block is detached from the
/// tree together with everything inside it.
#[utoipa::path(
    delete,
    path = "/quizzes/{quiz_id}/blocks/{block_id}/elements/{element_id}",
    responses(
        (status = 200, description = "Element removed; the block's children", body = ChildrenResponse),
        (status = 404, description = "Quiz, block or element not found"),
        (status = 409, description = "The quiz already has attempts")
    ),
    params(
        ("quiz_id" = i64, Path, description = "The quiz id."),
        ("block_id" = i64, Path, description = "The block id."),
        ("element_id" = i64, Path, description = "The element to remove.")
    )
)]
pub async fn remove_child_handler(
    State(app_state): State<Arc<AppState>>,
    Path((quiz_id, block_id, element_id)): Path<(i64, i64, i64)>,
) -> Result<impl IntoResponse, Rejection> {
    let store = app_state.store.as_ref();
    let mut quiz = load_quiz(&app_state, quiz_id).await?;
    let children = async {
        let (mut block, _) = load_placed_block(store, &quiz, block_id).await?;
        let children: Vec<ElementResponse> = block
            .remove_child(store, ElementId(element_id))
            .await?
            .iter()
            .map(ElementResponse::from)
            .collect();
        Ok::<_, QuizError>(children)
    }
    .await
    .map_err(|e| reject("Remove element", e))?;
    refresh_sum_grades(store, &mut quiz).await?;
    Ok(Json(ChildrenResponse { block_id, children }))
}

/// The condition gating a block, `null` when the block is ungated.
#[utoipa::path(
    get,
    path = "/quizzes/{quiz_id}/blocks/{block_id}/condition",
    responses(
        (status = 200, description = "The block's condition", body = Option<ConditionResponse>),
        (status = 404, description = "Quiz or block not found")
    ),
    params(
        ("quiz_id" = i64, Path, description = "The quiz id."),
        ("block_id" = i64, Path, description = "The block id.")
    )
)]
pub async fn get_condition_handler(
    State(app_state): State<Arc<AppState>>,
    Path((quiz_id, block_id)): Path<(i64, i64)>,
) -> Result<impl IntoResponse, Rejection> {
    let store = app_state.store.as_ref();
    let quiz = load_quiz(&app_state, quiz_id).await?;
    let response = async {
        let (mut block, _) = load_placed_block(store, &quiz, block_id).await?;
        let condition = block.condition(store).await?.map(ConditionResponse::from);
        Ok::<_, QuizError>(condition)
    }
    .await
    .map_err(|e| reject("Load block condition", e))?;
    Ok(Json(response))
}

/// Replace the condition gating a block.
///
/// Parts carrying an id update that part, parts without one are added, and
/// stored parts missing from the submission are deleted.
#[utoipa::path(
    put,
    path = "/quizzes/{quiz_id}/blocks/{block_id}/condition",
    request_body = UpdateConditionRequest,
    responses(
        (status = 200, description = "Condition stored", body = ConditionResponse),
        (status = 400, description = "Invalid grade in a part"),
        (status = 404, description = "Quiz or block not found"),
        (status = 422, description = "Main block, or a part references an element that does not precede the block")
    ),
    params(
        ("quiz_id" = i64, Path, description = "The quiz id."),
        ("block_id" = i64, Path, description = "The block id.")
    )
)]
pub async fn update_condition_handler(
    State(app_state): State<Arc<AppState>>,
    Path((quiz_id, block_id)): Path<(i64, i64)>,
    Json(payload): Json<UpdateConditionRequest>,
) -> Result<impl IntoResponse, Rejection> {
    let store = app_state.store.as_ref();
    let quiz = load_quiz(&app_state, quiz_id).await?;
    let parts: Vec<PartDraft> = payload.parts.into_iter().map(PartDraft::from).collect();
    let response = async {
        let (mut block, _) = load_placed_block(store, &quiz, block_id).await?;
        let condition = block
            .update_condition(store, &quiz, payload.use_and, parts)
            .await?;
        Ok::<_, QuizError>(ConditionResponse::from(condition))
    }
    .await
    .map_err(|e| reject("Update block condition", e))?;
    Ok(Json(response))
}
