//! crates/conduz_core/src/ports.rs
//!
//! Defines the service contracts (traits) for the application's core logic.
//! These traits form the boundary of the hexagonal architecture, allowing the core
//! to be independent of specific external implementations like databases or clocks.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::domain::{
    AccountCredentials, Instructor, Invitation, NewInstructor, NewStudent, SessionRecord,
    Student,
};

//=========================================================================================
// Generic Port Error and Result Types
//=========================================================================================

/// A generic error type for all port operations.
/// This abstracts away the specific errors from external services (e.g., database, network).
#[derive(Debug, thiserror::Error)]
pub enum PortError {
    #[error("Item not found: {0}")]
    NotFound(String),
    #[error("Conflict: {0}")]
    Conflict(String),
    #[error("An unexpected error occurred: {0}")]
    Unexpected(String),
    #[error("Unauthorized")]
    Unauthorized,
    #[error("Forbidden")]
    Forbidden,
}

/// A convenience type alias for `Result<T, PortError>`.
pub type PortResult<T> = Result<T, PortError>;

//=========================================================================================
// Service Ports (Traits)
//=========================================================================================

/// Persistence for invitations.
#[async_trait]
pub trait InvitationStore: Send + Sync {
    async fn insert_invitation(&self, invitation: &Invitation) -> PortResult<()>;

    async fn find_invitation(&self, slug: &str, code: &str) -> PortResult<Option<Invitation>>;

    async fn list_invitations_by_instructor(
        &self,
        instructor_id: Uuid,
    ) -> PortResult<Vec<Invitation>>;

    /// Increments `usage_count` in one indivisible step, only if the invitation is
    /// usable at `now`. Returns the updated record, or `None` when nothing matched
    /// or the condition did not hold at the moment of the write.
    async fn try_consume(
        &self,
        slug: &str,
        code: &str,
        now: DateTime<Utc>,
    ) -> PortResult<Option<Invitation>>;

    /// Gives back one usage taken by `try_consume`. Never drops below zero.
    async fn release_usage(&self, invitation_id: Uuid) -> PortResult<()>;

    /// Sets `is_active` to false. There is no operation that sets it back.
    async fn deactivate_invitation(&self, invitation_id: Uuid) -> PortResult<Invitation>;
}

/// The account records for both roles.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    // --- Instructors ---
    async fn create_instructor(&self, new: NewInstructor) -> PortResult<Instructor>;

    async fn get_instructor(&self, instructor_id: Uuid) -> PortResult<Instructor>;

    async fn get_instructor_credentials(&self, email: &str) -> PortResult<AccountCredentials>;

    // --- Students ---
    async fn create_student(&self, new: NewStudent) -> PortResult<Student>;

    async fn get_student(&self, student_id: Uuid) -> PortResult<Student>;

    async fn get_student_credentials(&self, email: &str) -> PortResult<AccountCredentials>;

    async fn list_students_by_instructor(&self, instructor_id: Uuid) -> PortResult<Vec<Student>>;

    /// Atomically sets the student's `linked_instructor_id`. Without `overwrite` the
    /// write only applies while the student has no link. Reports whether it applied.
    async fn link_student(
        &self,
        student_id: Uuid,
        instructor_id: Uuid,
        overwrite: bool,
    ) -> PortResult<bool>;
}

/// Bearer tokens of the instructor track.
#[async_trait]
pub trait InstructorSessionStore: Send + Sync {
    async fn create_instructor_session(&self, session: &SessionRecord) -> PortResult<()>;

    async fn find_instructor_session(&self, token: &str) -> PortResult<Option<SessionRecord>>;

    async fn delete_instructor_session(&self, token: &str) -> PortResult<()>;
}

/// Bearer tokens of the student track.
#[async_trait]
pub trait StudentSessionStore: Send + Sync {
    async fn create_student_session(&self, session: &SessionRecord) -> PortResult<()>;

    async fn find_student_session(&self, token: &str) -> PortResult<Option<SessionRecord>>;

    async fn delete_student_session(&self, token: &str) -> PortResult<()>;
}

/// Source of "now" for every time-dependent decision.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}
