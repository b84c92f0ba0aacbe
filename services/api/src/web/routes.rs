//! services/api/src/web/routes.rs
//!
//! Assembles the HTTP router. Public, instructor and student routes are kept in
//! separate groups, each guarded by its own middleware.

use axum::{
    extract::DefaultBodyLimit,
    http::{
        header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE},
        HeaderValue, Method,
    },
    middleware as axum_middleware,
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tracing::warn;

use crate::web::{
    auth, invitations,
    middleware::{require_instructor, require_student},
    profiles, rest,
    state::AppState,
};

pub fn build_router(state: Arc<AppState>) -> Router {
    // Public routes (no auth required)
    let public_routes = Router::new()
        .route("/health", get(rest::health_handler))
        .route("/auth/instructor/register", post(auth::instructor_register_handler))
        .route("/auth/instructor/login", post(auth::instructor_login_handler))
        .route("/auth/student/register", post(auth::student_register_handler))
        .route("/auth/student/login", post(auth::student_login_handler))
        .route(
            "/invitations/{slug}/{code}/validate",
            get(invitations::validate_invitation_handler),
        );

    // Instructor routes. `route_layer` keeps unmatched paths out of the auth check.
    let instructor_routes = Router::new()
        .route("/auth/instructor/logout", post(auth::instructor_logout_handler))
        .route("/invitations", post(invitations::create_invitation_handler))
        .route("/invitations/mine", get(invitations::list_invitations_handler))
        .route(
            "/invitations/{slug}/{code}/revoke",
            post(invitations::revoke_invitation_handler),
        )
        .route("/instructors/me", get(profiles::instructor_profile_handler))
        .route("/instructors/me/students", get(profiles::linked_students_handler))
        .route_layer(axum_middleware::from_fn_with_state(
            state.clone(),
            require_instructor,
        ));

    // Student routes
    let student_routes = Router::new()
        .route("/auth/student/logout", post(auth::student_logout_handler))
        .route(
            "/invitations/{slug}/{code}/accept",
            post(invitations::accept_invitation_handler),
        )
        .route("/students/me", get(profiles::student_profile_handler))
        .route_layer(axum_middleware::from_fn_with_state(
            state.clone(),
            require_student,
        ));

    let cors = match state.config.cors_origin.parse::<HeaderValue>() {
        Ok(origin) => CorsLayer::new()
            .allow_origin(origin)
            .allow_credentials(true)
            .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
            .allow_headers([AUTHORIZATION, CONTENT_TYPE, ACCEPT]),
        Err(_) => {
            warn!(
                "CORS_ORIGIN '{}' is not a valid header value; cross-origin requests disabled",
                state.config.cors_origin
            );
            CorsLayer::new()
        }
    };

    Router::new()
        .merge(public_routes)
        .merge(instructor_routes)
        .merge(student_routes)
        .layer(DefaultBodyLimit::max(64 * 1024))
        .layer(cors)
        .with_state(state)
}
