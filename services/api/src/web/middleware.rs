//! services/api/src/web/middleware.rs
//!
//! Identity middleware for routes that act on behalf of a student.

use axum::{
    extract::Request,
    http::StatusCode,
    middleware::Next,
    response::{IntoResponse, Response},
};
use tracing::warn;
use uuid::Uuid;

/// The header carrying the acting user's id.
pub const USER_ID_HEADER: &str = "x-user-id";

/// The acting user, inserted into request extensions by [`require_user`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UserId(pub Uuid);

/// Middleware that reads the `x-user-id` header and exposes it to handlers.
///
/// The header is trusted as given; a missing or malformed value is a bad request.
pub async fn require_user(mut req: Request, next: Next) -> Response {
    let user_id = req
        .headers()
        .get(USER_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(|v| Uuid::parse_str(v.trim()));

    match user_id {
        Some(Ok(user_id)) => {
            req.extensions_mut().insert(UserId(user_id));
            next.run(req).await
        }
        Some(Err(e)) => {
            warn!("Rejected malformed {} header: {}", USER_ID_HEADER, e);
            (StatusCode::BAD_REQUEST, "Invalid x-user-id format".to_string()).into_response()
        }
        None => (
            StatusCode::BAD_REQUEST,
            "x-user-id header is required".to_string(),
        )
            .into_response(),
    }
}
