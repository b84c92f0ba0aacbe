//! services/api/src/web/invitations.rs
//!
//! Axum handlers for the invitation lifecycle. Validation is public; issuing,
//! listing and revoking need an instructor session; accepting needs a student one.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Extension, Json,
};
use chrono::{DateTime, Utc};
use conduz_core::{
    AcceptOutcome, InstructorSession, IssuedInvitation, StudentSession, ValidationOutcome,
};
use serde::Serialize;
use std::sync::Arc;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::error::ApiError;
use crate::web::state::AppState;

//=========================================================================================
// API Response Structs
//=========================================================================================

/// An invitation as its owner sees it.
#[derive(Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct InvitationResponse {
    pub slug: String,
    pub code: String,
    pub link: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    /// Absent when the invitation may be used any number of times before it expires.
    pub usage_limit: Option<u32>,
    pub usage_count: u32,
    pub is_active: bool,
}

impl From<IssuedInvitation> for InvitationResponse {
    fn from(issued: IssuedInvitation) -> Self {
        let inv = issued.invitation;
        Self {
            slug: inv.slug,
            code: inv.code,
            link: issued.link,
            created_at: inv.created_at,
            expires_at: inv.expires_at,
            usage_limit: inv.usage_limit,
            usage_count: inv.usage_count,
            is_active: inv.is_active,
        }
    }
}

#[derive(Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct InvitationListResponse {
    pub invitations: Vec<InvitationResponse>,
}

#[derive(Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ValidateResponse {
    pub usable: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instructor_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instructor_specialty: Option<String>,
    /// One of `not_found`, `expired`, `revoked`, `usage_exceeded`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl From<ValidationOutcome> for ValidateResponse {
    fn from(outcome: ValidationOutcome) -> Self {
        match outcome {
            ValidationOutcome::Usable { instructor } => Self {
                usable: true,
                instructor_name: Some(instructor.name),
                instructor_specialty: Some(instructor.specialty),
                reason: None,
            },
            ValidationOutcome::Unusable { reason } => Self {
                usable: false,
                instructor_name: None,
                instructor_specialty: None,
                reason: Some(reason.as_str().to_string()),
            },
        }
    }
}

#[derive(Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct AcceptResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instructor_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instructor_name: Option<String>,
    /// One of `not_found`, `expired`, `revoked`, `usage_exceeded`, `already_linked`,
    /// or `unavailable` when the invitation could not be processed at all.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl AcceptResponse {
    pub const UNAVAILABLE: &'static str = "unavailable";

    /// The invitation was sent but could not be processed; the caller may retry it.
    pub fn unavailable() -> Self {
        Self {
            success: false,
            instructor_id: None,
            instructor_name: None,
            reason: Some(Self::UNAVAILABLE.to_string()),
        }
    }
}

impl From<AcceptOutcome> for AcceptResponse {
    fn from(outcome: AcceptOutcome) -> Self {
        match outcome {
            AcceptOutcome::Linked {
                instructor_id,
                instructor,
            } => Self {
                success: true,
                instructor_id: Some(instructor_id),
                instructor_name: Some(instructor.name),
                reason: None,
            },
            AcceptOutcome::Rejected { reason } => Self {
                success: false,
                instructor_id: None,
                instructor_name: None,
                reason: Some(reason.as_str().to_string()),
            },
        }
    }
}

//=========================================================================================
// Instructor Handlers
//=========================================================================================

/// Issue a new invitation link.
#[utoipa::path(
    post,
    path = "/invitations",
    responses(
        (status = 201, description = "Invitation created", body = InvitationResponse),
        (status = 401, description = "No instructor session")
    ),
    security(("instructor_token" = [])),
    tag = "invitations"
)]
pub async fn create_invitation_handler(
    State(state): State<Arc<AppState>>,
    Extension(session): Extension<InstructorSession>,
) -> Result<impl IntoResponse, ApiError> {
    let issued = state.invitations.issue(&session).await?;
    Ok((StatusCode::CREATED, Json(InvitationResponse::from(issued))))
}

/// List the caller's invitations, newest first.
#[utoipa::path(
    get,
    path = "/invitations/mine",
    responses(
        (status = 200, description = "The caller's invitations", body = InvitationListResponse),
        (status = 401, description = "No instructor session")
    ),
    security(("instructor_token" = [])),
    tag = "invitations"
)]
pub async fn list_invitations_handler(
    State(state): State<Arc<AppState>>,
    Extension(session): Extension<InstructorSession>,
) -> Result<Json<InvitationListResponse>, ApiError> {
    let invitations = state.invitations.list_mine(&session).await?;
    Ok(Json(InvitationListResponse {
        invitations: invitations.into_iter().map(Into::into).collect(),
    }))
}

/// Revoke one of the caller's invitations. Revocation cannot be undone.
#[utoipa::path(
    post,
    path = "/invitations/{slug}/{code}/revoke",
    params(
        ("slug" = String, Path, description = "The issuing instructor's slug"),
        ("code" = String, Path, description = "The invitation code")
    ),
    responses(
        (status = 200, description = "Invitation revoked", body = InvitationResponse),
        (status = 401, description = "No instructor session"),
        (status = 403, description = "Invitation belongs to another instructor"),
        (status = 404, description = "No such invitation")
    ),
    security(("instructor_token" = [])),
    tag = "invitations"
)]
pub async fn revoke_invitation_handler(
    State(state): State<Arc<AppState>>,
    Extension(session): Extension<InstructorSession>,
    Path((slug, code)): Path<(String, String)>,
) -> Result<Json<InvitationResponse>, ApiError> {
    let revoked = state.invitations.revoke(&session, &slug, &code).await?;
    Ok(Json(
        IssuedInvitation {
            link: state.invitations.link_for(&revoked),
            invitation: revoked,
        }
        .into(),
    ))
}

//=========================================================================================
// Public and Student Handlers
//=========================================================================================

/// Check whether an invitation link is currently usable. No authentication.
#[utoipa::path(
    get,
    path = "/invitations/{slug}/{code}/validate",
    params(
        ("slug" = String, Path, description = "The issuing instructor's slug"),
        ("code" = String, Path, description = "The invitation code")
    ),
    responses(
        (status = 200, description = "Usability of the invitation", body = ValidateResponse)
    ),
    tag = "invitations"
)]
pub async fn validate_invitation_handler(
    State(state): State<Arc<AppState>>,
    Path((slug, code)): Path<(String, String)>,
) -> Result<Json<ValidateResponse>, ApiError> {
    let outcome = state.invitations.validate(&slug, &code).await?;
    Ok(Json(outcome.into()))
}

/// Accept an invitation and link the calling student to its instructor.
#[utoipa::path(
    post,
    path = "/invitations/{slug}/{code}/accept",
    params(
        ("slug" = String, Path, description = "The issuing instructor's slug"),
        ("code" = String, Path, description = "The invitation code")
    ),
    responses(
        (status = 200, description = "Outcome of the acceptance", body = AcceptResponse),
        (status = 401, description = "No student session")
    ),
    security(("student_token" = [])),
    tag = "invitations"
)]
pub async fn accept_invitation_handler(
    State(state): State<Arc<AppState>>,
    Extension(session): Extension<StudentSession>,
    Path((slug, code)): Path<(String, String)>,
) -> Result<Json<AcceptResponse>, ApiError> {
    let outcome = state.invitations.accept(&session, &slug, &code).await?;
    Ok(Json(outcome.into()))
}
