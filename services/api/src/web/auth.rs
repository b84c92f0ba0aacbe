//! services/api/src/web/auth.rs
//!
//! Registration, login and logout for both roles. The instructor and student
//! endpoints mint tokens through separate session authorities.

use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use axum::{
    extract::State,
    http::{header, HeaderMap, StatusCode},
    response::IntoResponse,
    Json,
};
use chrono::{DateTime, Duration, Utc};
use conduz_core::domain::{derive_slug, NewInstructor, NewStudent};
use conduz_core::ports::PortError;
use conduz_core::IssuedToken;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info, warn};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::error::ApiError;
use crate::web::invitations::AcceptResponse;
use crate::web::middleware::bearer_token;
use crate::web::state::AppState;

pub const INSTRUCTOR_REMEMBER_COOKIE: &str = "conduz_instructor_remembered_email";
pub const STUDENT_REMEMBER_COOKIE: &str = "conduz_student_remembered_email";
const REMEMBER_DAYS: i64 = 30;
const MIN_PASSWORD_LEN: usize = 8;

pub const SPECIALTIES: [&str; 5] = [
    "Direção Defensiva",
    "Legislação",
    "Segurança",
    "Manobras",
    "Geral",
];

//=========================================================================================
// Request/Response Types
//=========================================================================================

#[derive(Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct InstructorSignupRequest {
    pub name: String,
    pub email: String,
    pub password: String,
    pub confirm_password: String,
    pub specialty: String,
    #[serde(default)]
    pub bio: String,
}

#[derive(Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct StudentSignupRequest {
    pub name: String,
    pub email: String,
    pub password: String,
    pub confirm_password: String,
    pub invite_slug: Option<String>,
    pub invite_code: Option<String>,
}

#[derive(Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
    #[serde(default)]
    pub remember_me: bool,
}

#[derive(Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct AuthResponse {
    pub token: String,
    pub role: String,
    pub account_id: Uuid,
    pub name: String,
    pub email: String,
    pub expires_at: DateTime<Utc>,
    pub persistence_scope: String,
    /// Outcome of the invitation supplied at student registration, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub invitation: Option<AcceptResponse>,
}

impl AuthResponse {
    fn new(issued: IssuedToken, name: String, email: String) -> Self {
        Self {
            token: issued.token,
            role: match issued.role {
                conduz_core::Role::Instructor => "instructor".to_string(),
                conduz_core::Role::Student => "student".to_string(),
            },
            account_id: issued.subject_id,
            name,
            email,
            expires_at: issued.expires_at,
            persistence_scope: issued.persistence_scope.as_str().to_string(),
            invitation: None,
        }
    }
}

//=========================================================================================
// Helpers
//=========================================================================================

fn hash_password(password: &str) -> Result<String, ApiError> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| {
            error!("Failed to hash password: {:?}", e);
            ApiError::Internal("Failed to hash password".to_string())
        })
}

fn verify_password(password: &str, hashed: &str) -> Result<bool, ApiError> {
    let parsed_hash = PasswordHash::new(hashed).map_err(|e| {
        error!("Failed to parse password hash: {:?}", e);
        ApiError::Internal("Authentication error".to_string())
    })?;
    Ok(Argon2::default()
        .verify_password(password.as_bytes(), &parsed_hash)
        .is_ok())
}

/// Normalises and checks the fields every signup shares.
fn check_signup(
    name: &str,
    email: &str,
    password: &str,
    confirm_password: &str,
) -> Result<(String, String), ApiError> {
    let name = name.trim();
    if name.is_empty() {
        return Err(ApiError::BadRequest("Name is required".to_string()));
    }
    let email = email.trim().to_lowercase();
    let plausible = email.split_once('@').is_some_and(|(local, domain)| {
        !local.is_empty() && domain.contains('.')
    }) && !email
        .chars()
        .any(|c| c.is_whitespace() || c == ';' || c == ',' || c == '"');
    if !plausible {
        return Err(ApiError::BadRequest("Invalid email address".to_string()));
    }
    if password.chars().count() < MIN_PASSWORD_LEN {
        return Err(ApiError::BadRequest(format!(
            "Password must have at least {} characters",
            MIN_PASSWORD_LEN
        )));
    }
    if password != confirm_password {
        return Err(ApiError::BadRequest("Passwords do not match".to_string()));
    }
    Ok((name.to_string(), email))
}

/// A client-readable cookie holding only the e-mail, used to prefill the next
/// login form. It never re-authenticates anyone.
fn remember_cookie(name: &str, email: Option<&str>) -> String {
    match email {
        Some(email) => format!(
            "{}={}; Secure; SameSite=Lax; Path=/; Max-Age={}",
            name,
            email,
            Duration::days(REMEMBER_DAYS).num_seconds()
        ),
        None => format!("{}=; Secure; SameSite=Lax; Path=/; Max-Age=0", name),
    }
}

fn login_failure(e: PortError) -> ApiError {
    match e {
        PortError::NotFound(_) => ApiError::InvalidCredentials,
        other => other.into(),
    }
}

//=========================================================================================
// Instructor Handlers
//=========================================================================================

/// POST /auth/instructor/register - Create an instructor account
#[utoipa::path(
    post,
    path = "/auth/instructor/register",
    request_body = InstructorSignupRequest,
    responses(
        (status = 201, description = "Instructor created", body = AuthResponse),
        (status = 400, description = "Invalid request"),
        (status = 409, description = "E-mail already registered")
    ),
    tag = "auth"
)]
pub async fn instructor_register_handler(
    State(state): State<Arc<AppState>>,
    Json(req): Json<InstructorSignupRequest>,
) -> Result<impl IntoResponse, ApiError> {
    // 1. Validate the request
    let (name, email) = check_signup(&req.name, &req.email, &req.password, &req.confirm_password)?;
    if !SPECIALTIES.contains(&req.specialty.as_str()) {
        return Err(ApiError::BadRequest(format!(
            "Specialty must be one of: {}",
            SPECIALTIES.join(", ")
        )));
    }

    // 2. Create the instructor with a permanent slug
    let instructor = state
        .accounts
        .create_instructor(NewInstructor {
            slug: derive_slug(&name),
            name,
            email,
            hashed_password: hash_password(&req.password)?,
            specialty: req.specialty,
            bio: req.bio.trim().to_string(),
        })
        .await?;
    info!(instructor_id = %instructor.id, slug = %instructor.slug, "Instructor registered");

    // 3. Open an instructor session
    let issued = state.instructor_sessions.issue(instructor.id).await?;

    Ok((
        StatusCode::CREATED,
        Json(AuthResponse::new(issued, instructor.name, instructor.email)),
    ))
}

/// POST /auth/instructor/login - Login as an instructor
#[utoipa::path(
    post,
    path = "/auth/instructor/login",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Login successful", body = AuthResponse),
        (status = 401, description = "Invalid credentials")
    ),
    tag = "auth"
)]
pub async fn instructor_login_handler(
    State(state): State<Arc<AppState>>,
    Json(req): Json<LoginRequest>,
) -> Result<impl IntoResponse, ApiError> {
    // 1. Look up and verify the credentials
    let email = req.email.trim().to_lowercase();
    let creds = state
        .accounts
        .get_instructor_credentials(&email)
        .await
        .map_err(login_failure)?;
    if !verify_password(&req.password, &creds.hashed_password)? {
        warn!(instructor_id = %creds.account_id, "Instructor login refused");
        return Err(ApiError::InvalidCredentials);
    }

    // 2. Open an instructor session
    let instructor = state.accounts.get_instructor(creds.account_id).await?;
    let issued = state.instructor_sessions.issue(instructor.id).await?;

    // 3. Remember only the e-mail, and only when asked to
    let cookie = remember_cookie(
        INSTRUCTOR_REMEMBER_COOKIE,
        req.remember_me.then_some(instructor.email.as_str()),
    );

    Ok((
        StatusCode::OK,
        [(header::SET_COOKIE, cookie)],
        Json(AuthResponse::new(issued, instructor.name, instructor.email)),
    ))
}

/// POST /auth/instructor/logout - Invalidate the instructor token
#[utoipa::path(
    post,
    path = "/auth/instructor/logout",
    responses(
        (status = 204, description = "Logged out"),
        (status = 401, description = "No active instructor session")
    ),
    security(("instructor_token" = [])),
    tag = "auth"
)]
pub async fn instructor_logout_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ApiError> {
    let token = bearer_token(&headers).ok_or(PortError::Unauthorized)?;
    state.instructor_sessions.revoke(token).await?;
    Ok(StatusCode::NO_CONTENT)
}

//=========================================================================================
// Student Handlers
//=========================================================================================

/// POST /auth/student/register - Create a student account, optionally accepting an invitation
#[utoipa::path(
    post,
    path = "/auth/student/register",
    request_body = StudentSignupRequest,
    responses(
        (status = 201, description = "Student created", body = AuthResponse),
        (status = 400, description = "Invalid request"),
        (status = 409, description = "E-mail already registered")
    ),
    tag = "auth"
)]
pub async fn student_register_handler(
    State(state): State<Arc<AppState>>,
    Json(req): Json<StudentSignupRequest>,
) -> Result<impl IntoResponse, ApiError> {
    // 1. Validate the request
    let (name, email) = check_signup(&req.name, &req.email, &req.password, &req.confirm_password)?;
    let invite = match (req.invite_slug.as_deref(), req.invite_code.as_deref()) {
        (Some(slug), Some(code)) => Some((slug.to_string(), code.to_string())),
        (None, None) => None,
        _ => {
            return Err(ApiError::BadRequest(
                "inviteSlug and inviteCode must be sent together".to_string(),
            ))
        }
    };

    // 2. Create the student
    let student = state
        .accounts
        .create_student(NewStudent {
            name,
            email,
            hashed_password: hash_password(&req.password)?,
        })
        .await?;
    info!(student_id = %student.id, "Student registered");

    // 3. Open a student session
    let issued = state.student_sessions.issue(student.id).await?;
    let token = issued.token.clone();
    let mut response = AuthResponse::new(issued, student.name, student.email);

    // 4. Accept the invitation the student arrived with. The account stays either way.
    if let Some((slug, code)) = invite {
        let accepted = match state.student_sessions.verify(&token).await {
            Ok(session) => state.invitations.accept(&session, &slug, &code).await,
            Err(e) => Err(e),
        };
        match accepted {
            Ok(outcome) => response.invitation = Some(outcome.into()),
            Err(e) => {
                error!(student_id = %student.id, "Invitation at signup failed: {:?}", e);
                response.invitation = Some(AcceptResponse::unavailable());
            }
        }
    }

    Ok((StatusCode::CREATED, Json(response)))
}

/// POST /auth/student/login - Login as a student
#[utoipa::path(
    post,
    path = "/auth/student/login",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Login successful", body = AuthResponse),
        (status = 401, description = "Invalid credentials")
    ),
    tag = "auth"
)]
pub async fn student_login_handler(
    State(state): State<Arc<AppState>>,
    Json(req): Json<LoginRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let email = req.email.trim().to_lowercase();
    let creds = state
        .accounts
        .get_student_credentials(&email)
        .await
        .map_err(login_failure)?;
    if !verify_password(&req.password, &creds.hashed_password)? {
        warn!(student_id = %creds.account_id, "Student login refused");
        return Err(ApiError::InvalidCredentials);
    }

    let student = state.accounts.get_student(creds.account_id).await?;
    let issued = state.student_sessions.issue(student.id).await?;

    let cookie = remember_cookie(
        STUDENT_REMEMBER_COOKIE,
        req.remember_me.then_some(student.email.as_str()),
    );

    Ok((
        StatusCode::OK,
        [(header::SET_COOKIE, cookie)],
        Json(AuthResponse::new(issued, student.name, student.email)),
    ))
}

/// POST /auth/student/logout - Invalidate the student token
#[utoipa::path(
    post,
    path = "/auth/student/logout",
    responses(
        (status = 204, description = "Logged out"),
        (status = 401, description = "No active student session")
    ),
    security(("student_token" = [])),
    tag = "auth"
)]
pub async fn student_logout_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ApiError> {
    let token = bearer_token(&headers).ok_or(PortError::Unauthorized)?;
    state.student_sessions.revoke(token).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signup_checks() {
        assert!(check_signup("Ana", "ana@conduz.example", "12345678", "12345678").is_ok());
        assert!(check_signup(" ", "ana@conduz.example", "12345678", "12345678").is_err());
        assert!(check_signup("Ana", "ana.conduz.example", "12345678", "12345678").is_err());
        assert!(check_signup("Ana", "a;b@conduz.example", "12345678", "12345678").is_err());
        assert!(check_signup("Ana", "ana@conduz.example", "1234", "1234").is_err());
        assert!(check_signup("Ana", "ana@conduz.example", "12345678", "12345679").is_err());

        let (name, email) =
            check_signup(" Ana ", " Ana@Conduz.Example ", "12345678", "12345678").unwrap();
        assert_eq!(name, "Ana");
        assert_eq!(email, "ana@conduz.example");
    }

    #[test]
    fn remember_cookie_never_holds_more_than_the_email() {
        let set = remember_cookie(STUDENT_REMEMBER_COOKIE, Some("ana@conduz.example"));
        assert!(set.starts_with("conduz_student_remembered_email=ana@conduz.example;"));
        assert!(set.contains("Max-Age=2592000"));

        let cleared = remember_cookie(STUDENT_REMEMBER_COOKIE, None);
        assert!(cleared.starts_with("conduz_student_remembered_email=;"));
        assert!(cleared.contains("Max-Age=0"));
    }

    #[test]
    fn password_hash_round_trip() {
        let hash = hash_password("correct horse").unwrap();
        assert!(verify_password("correct horse", &hash).unwrap());
        assert!(!verify_password("wrong horse", &hash).unwrap());
    }
}
