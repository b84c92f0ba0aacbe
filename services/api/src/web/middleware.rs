//! services/api/src/web/middleware.rs
//!
//! Authentication middleware for protecting routes. There is one middleware per
//! role and each consults only its own session authority.

use axum::{
    extract::{Request, State},
    http::{header, HeaderMap},
    middleware::Next,
    response::Response,
};
use conduz_core::ports::PortError;
use std::sync::Arc;
use tracing::debug;

use crate::error::ApiError;
use crate::web::state::AppState;

/// Pulls the token out of an `Authorization: Bearer <token>` header.
pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

/// Requires a live instructor token and inserts the `InstructorSession`
/// into request extensions for handlers to use.
pub async fn require_instructor(
    State(state): State<Arc<AppState>>,
    mut req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    // 1. Extract the bearer token
    let token = bearer_token(req.headers()).ok_or(PortError::Unauthorized)?;

    // 2. Verify it against the instructor track only
    let session = state.instructor_sessions.verify(token).await.map_err(|e| {
        debug!("Instructor token rejected: {}", e);
        e
    })?;

    // 3. Continue to the handler
    req.extensions_mut().insert(session);
    Ok(next.run(req).await)
}

/// Requires a live student token and inserts the `StudentSession`
/// into request extensions for handlers to use.
pub async fn require_student(
    State(state): State<Arc<AppState>>,
    mut req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let token = bearer_token(req.headers()).ok_or(PortError::Unauthorized)?;

    let session = state.student_sessions.verify(token).await.map_err(|e| {
        debug!("Student token rejected: {}", e);
        e
    })?;

    req.extensions_mut().insert(session);
    Ok(next.run(req).await)
}
