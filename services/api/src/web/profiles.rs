//! services/api/src/web/profiles.rs
//!
//! Read-only account views for each role.

use axum::{extract::State, Extension, Json};
use chrono::{DateTime, Utc};
use conduz_core::ports::PortError;
use conduz_core::{InstructorSession, StudentSession};
use serde::Serialize;
use std::sync::Arc;
use tracing::warn;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::error::ApiError;
use crate::web::state::AppState;

#[derive(Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct InstructorProfileResponse {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    pub slug: String,
    pub specialty: String,
    pub bio: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct LinkedStudentResponse {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    /// When the student account was created.
    pub registered_at: DateTime<Utc>,
}

#[derive(Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct LinkedStudentsResponse {
    pub students: Vec<LinkedStudentResponse>,
}

#[derive(Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct LinkedInstructorResponse {
    pub name: String,
    pub specialty: String,
}

#[derive(Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct StudentProfileResponse {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    pub instructor: Option<LinkedInstructorResponse>,
    pub created_at: DateTime<Utc>,
}

/// The calling instructor's own profile, including the slug used in invitation links.
#[utoipa::path(
    get,
    path = "/instructors/me",
    responses(
        (status = 200, description = "Instructor profile", body = InstructorProfileResponse),
        (status = 401, description = "No instructor session")
    ),
    security(("instructor_token" = [])),
    tag = "profiles"
)]
pub async fn instructor_profile_handler(
    State(state): State<Arc<AppState>>,
    Extension(session): Extension<InstructorSession>,
) -> Result<Json<InstructorProfileResponse>, ApiError> {
    let instructor = state.accounts.get_instructor(session.instructor_id()).await?;
    Ok(Json(InstructorProfileResponse {
        id: instructor.id,
        name: instructor.name,
        email: instructor.email,
        slug: instructor.slug,
        specialty: instructor.specialty,
        bio: instructor.bio,
        created_at: instructor.created_at,
    }))
}

/// Students currently linked to the calling instructor.
#[utoipa::path(
    get,
    path = "/instructors/me/students",
    responses(
        (status = 200, description = "Linked students", body = LinkedStudentsResponse),
        (status = 401, description = "No instructor session")
    ),
    security(("instructor_token" = [])),
    tag = "profiles"
)]
pub async fn linked_students_handler(
    State(state): State<Arc<AppState>>,
    Extension(session): Extension<InstructorSession>,
) -> Result<Json<LinkedStudentsResponse>, ApiError> {
    let students = state
        .accounts
        .list_students_by_instructor(session.instructor_id())
        .await?;
    Ok(Json(LinkedStudentsResponse {
        students: students
            .into_iter()
            .map(|s| LinkedStudentResponse {
                id: s.id,
                name: s.name,
                email: s.email,
                registered_at: s.created_at,
            })
            .collect(),
    }))
}

/// The calling student's own profile and the instructor they are linked to.
#[utoipa::path(
    get,
    path = "/students/me",
    responses(
        (status = 200, description = "Student profile", body = StudentProfileResponse),
        (status = 401, description = "No student session")
    ),
    security(("student_token" = [])),
    tag = "profiles"
)]
pub async fn student_profile_handler(
    State(state): State<Arc<AppState>>,
    Extension(session): Extension<StudentSession>,
) -> Result<Json<StudentProfileResponse>, ApiError> {
    let student = state.accounts.get_student(session.student_id()).await?;

    let instructor = match student.linked_instructor_id {
        None => None,
        Some(instructor_id) => match state.accounts.get_instructor(instructor_id).await {
            Ok(instructor) => {
                let profile = instructor.public_profile();
                Some(LinkedInstructorResponse {
                    name: profile.name,
                    specialty: profile.specialty,
                })
            }
            Err(PortError::NotFound(_)) => {
                warn!(student_id = %student.id, %instructor_id, "Linked instructor is missing");
                None
            }
            Err(e) => return Err(e.into()),
        },
    };

    Ok(Json(StudentProfileResponse {
        id: student.id,
        name: student.name,
        email: student.email,
        instructor,
        created_at: student.created_at,
    }))
}
