//! services/api/src/web/rest.rs
//!
//! The master OpenAPI document and the liveness probe.

use axum::response::Json;
use serde::Serialize;
use utoipa::{
    openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme},
    Modify, OpenApi, ToSchema,
};

use crate::web::{auth, invitations, profiles};

//=========================================================================================
// OpenAPI Master Definition
//=========================================================================================

#[derive(OpenApi)]
#[openapi(
    paths(
        health_handler,
        auth::instructor_register_handler,
        auth::instructor_login_handler,
        auth::instructor_logout_handler,
        auth::student_register_handler,
        auth::student_login_handler,
        auth::student_logout_handler,
        invitations::create_invitation_handler,
        invitations::list_invitations_handler,
        invitations::revoke_invitation_handler,
        invitations::validate_invitation_handler,
        invitations::accept_invitation_handler,
        profiles::instructor_profile_handler,
        profiles::linked_students_handler,
        profiles::student_profile_handler,
    ),
    components(
        schemas(
            HealthResponse,
            auth::InstructorSignupRequest,
            auth::StudentSignupRequest,
            auth::LoginRequest,
            auth::AuthResponse,
            invitations::InvitationResponse,
            invitations::InvitationListResponse,
            invitations::ValidateResponse,
            invitations::AcceptResponse,
            profiles::InstructorProfileResponse,
            profiles::LinkedStudentsResponse,
            profiles::StudentProfileResponse,
        )
    ),
    modifiers(&BearerTokens),
    tags(
        (name = "auth", description = "Registration and sessions for instructors and students."),
        (name = "invitations", description = "Instructor invitation links and account linking."),
        (name = "profiles", description = "Account views.")
    )
)]
pub struct ApiDoc;

/// Declares the two bearer schemes, one per role.
struct BearerTokens;

impl Modify for BearerTokens {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            for name in ["instructor_token", "student_token"] {
                components.add_security_scheme(
                    name,
                    SecurityScheme::Http(HttpBuilder::new().scheme(HttpAuthScheme::Bearer).build()),
                );
            }
        }
    }
}

//=========================================================================================
// Health
//=========================================================================================

#[derive(Serialize, ToSchema)]
pub struct HealthResponse {
    status: String,
}

/// Liveness probe.
#[utoipa::path(
    get,
    path = "/health",
    responses((status = 200, description = "Service is up", body = HealthResponse))
)]
pub async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
    })
}
