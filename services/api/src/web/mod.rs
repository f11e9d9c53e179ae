pub mod attempts;
pub mod edit;
pub mod feedback;
pub mod middleware;
pub mod protocol;
pub mod rest;
pub mod state;

use axum::{
    middleware as axum_middleware,
    routing::{delete, get, post, put},
    Router,
};
use std::sync::Arc;

pub use middleware::require_user;
pub use state::AppState;

/// Builds the API routes. Outer layers (CORS, tracing, Swagger UI) are added by the binary.
pub fn router(app_state: Arc<AppState>) -> Router {
    let editing_routes = Router::new()
        .route("/quizzes", post(rest::create_quiz_handler))
        .route(
            "/quizzes/{quiz_id}",
            get(rest::get_quiz_handler).delete(rest::delete_quiz_handler),
        )
        .route("/quizzes/{quiz_id}/structure", get(rest::get_structure_handler))
        .route("/quizzes/{quiz_id}/overview", get(rest::get_overview_handler))
        .route("/questions", post(rest::create_question_handler))
        .route("/questions/{question_id}", get(rest::get_question_handler))
        .route(
            "/quizzes/{quiz_id}/blocks/{block_id}",
            get(edit::get_block_handler),
        )
        .route(
            "/quizzes/{quiz_id}/blocks/{block_id}/name",
            put(edit::rename_block_handler),
        )
        .route(
            "/quizzes/{quiz_id}/blocks/{block_id}/questions",
            post(edit::add_question_handler),
        )
        .route(
            "/quizzes/{quiz_id}/blocks/{block_id}/subblocks",
            post(edit::create_subblock_handler),
        )
        .route(
            "/quizzes/{quiz_id}/blocks/{block_id}/elements/{element_id}",
            delete(edit::remove_child_handler),
        )
        .route(
            "/quizzes/{quiz_id}/blocks/{block_id}/condition",
            get(edit::get_condition_handler).put(edit::update_condition_handler),
        )
        .route(
            "/quizzes/{quiz_id}/feedback",
            get(feedback::list_feedback_handler).post(feedback::create_feedback_handler),
        )
        .route(
            "/quizzes/{quiz_id}/feedback/{feedback_id}",
            get(feedback::get_feedback_handler)
                .put(feedback::update_feedback_handler)
                .delete(feedback::delete_feedback_handler),
        )
        .route(
            "/attempts/{attempt_id}/slots/{slot}/mark",
            put(attempts::regrade_slot_handler),
        );

    // Attempt routes act on behalf of the user named in the x-user-id header.
    let attempt_routes = Router::new()
        .route(
            "/quizzes/{quiz_id}/attempts",
            post(attempts::start_attempt_handler),
        )
        .route("/attempts/{attempt_id}", get(attempts::get_attempt_handler))
        .route(
            "/attempts/{attempt_id}/slots/{slot}",
            post(attempts::process_slot_handler),
        )
        .route(
            "/attempts/{attempt_id}/finish",
            post(attempts::finish_attempt_handler),
        )
        .layer(axum_middleware::from_fn(require_user));

    Router::new()
        .merge(editing_routes)
        .merge(attempt_routes)
        .with_state(app_state)
}
