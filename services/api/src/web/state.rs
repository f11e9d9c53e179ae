//! services/api/src/web/state.rs
//!
//! Defines the application's shared state.

use crate::config::Config;
use adaptive_quiz_core::ports::{QuestionEngine, QuizStore};
use std::sync::Arc;

//=========================================================================================
// AppState (Shared Across All Requests)
//=========================================================================================

/// The shared application state, created once at startup and passed to all handlers.
///
/// Requests load the engine's objects fresh from the store; nothing is cached here.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn QuizStore>,
    pub engine: Arc<dyn QuestionEngine>,
    pub config: Arc<Config>,
}
