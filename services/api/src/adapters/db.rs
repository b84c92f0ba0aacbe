//! services/api/src/adapters/db.rs
//!
//! This module contains the database adapter, which is the concrete implementation
//! of the storage ports from the `core` crate. It handles all interactions
//! with the PostgreSQL database using `sqlx`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use conduz_core::domain::{
    AccountCredentials, Instructor, Invitation, NewInstructor, NewStudent, SessionRecord,
    Student,
};
use conduz_core::ports::{
    CredentialStore, InstructorSessionStore, InvitationStore, PortError, PortResult,
    StudentSessionStore,
};
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

//=========================================================================================
// The Main Adapter Struct
//=========================================================================================

/// A database adapter that implements every storage port.
#[derive(Clone)]
pub struct DbAdapter {
    pool: PgPool,
}

impl DbAdapter {
    /// Creates a new `DbAdapter`.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// A helper function to run database migrations at startup.
    pub async fn run_migrations(&self) -> Result<(), sqlx::migrate::MigrateError> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }
}

fn unexpected(e: sqlx::Error) -> PortError {
    PortError::Unexpected(e.to_string())
}

/// Maps unique-constraint violations to `Conflict`, everything else to `Unexpected`.
fn insert_error(e: sqlx::Error, what: &str) -> PortError {
    match &e {
        sqlx::Error::Database(db) if db.is_unique_violation() => {
            PortError::Conflict(format!("{} already exists", what))
        }
        _ => unexpected(e),
    }
}

const INVITATION_COLUMNS: &str =
    "id, slug, code, instructor_id, created_at, expires_at, is_active, usage_limit, usage_count";
const INSTRUCTOR_COLUMNS: &str = "id, name, email, slug, specialty, bio, created_at";
const STUDENT_COLUMNS: &str = "id, name, email, linked_instructor_id, created_at";

//=========================================================================================
// "Impure" Database Record Structs
//=========================================================================================

#[derive(FromRow)]
struct InvitationRecord {
    id: Uuid,
    slug: String,
    code: String,
    instructor_id: Uuid,
    created_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
    is_active: bool,
    usage_limit: Option<i32>,
    usage_count: i32,
}
impl InvitationRecord {
    fn to_domain(self) -> Invitation {
        Invitation {
            id: self.id,
            slug: self.slug,
            code: self.code,
            instructor_id: self.instructor_id,
            created_at: self.created_at,
            expires_at: self.expires_at,
            is_active: self.is_active,
            usage_limit: self.usage_limit.map(|l| l.max(0) as u32),
            usage_count: self.usage_count.max(0) as u32,
        }
    }
}

#[derive(FromRow)]
struct InstructorRecord {
    id: Uuid,
    name: String,
    email: String,
    slug: String,
    specialty: String,
    bio: String,
    created_at: DateTime<Utc>,
}
impl InstructorRecord {
    fn to_domain(self) -> Instructor {
        Instructor {
            id: self.id,
            name: self.name,
            email: self.email,
            slug: self.slug,
            specialty: self.specialty,
            bio: self.bio,
            created_at: self.created_at,
        }
    }
}

#[derive(FromRow)]
struct StudentRecord {
    id: Uuid,
    name: String,
    email: String,
    linked_instructor_id: Option<Uuid>,
    created_at: DateTime<Utc>,
}
impl StudentRecord {
    fn to_domain(self) -> Student {
        Student {
            id: self.id,
            name: self.name,
            email: self.email,
            linked_instructor_id: self.linked_instructor_id,
            created_at: self.created_at,
        }
    }
}

#[derive(FromRow)]
struct CredentialsRecord {
    id: Uuid,
    email: String,
    hashed_password: String,
}
impl CredentialsRecord {
    fn to_domain(self) -> AccountCredentials {
        AccountCredentials {
            account_id: self.id,
            email: self.email,
            hashed_password: self.hashed_password,
        }
    }
}

#[derive(FromRow)]
struct SessionRow {
    token: String,
    subject_id: Uuid,
    issued_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
}
impl SessionRow {
    fn to_domain(self) -> SessionRecord {
        SessionRecord {
            token: self.token,
            subject_id: self.subject_id,
            issued_at: self.issued_at,
            expires_at: self.expires_at,
        }
    }
}

//=========================================================================================
// `InvitationStore` Trait Implementation
//=========================================================================================

#[async_trait]
impl InvitationStore for DbAdapter {
    async fn insert_invitation(&self, invitation: &Invitation) -> PortResult<()> {
        let usage_limit = invitation
            .usage_limit
            .map(i32::try_from)
            .transpose()
            .map_err(|_| PortError::Unexpected("Usage limit does not fit the column".to_string()))?;
        sqlx::query(
            "INSERT INTO invitations (id, slug, code, instructor_id, created_at, expires_at, is_active, usage_limit, usage_count) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)",
        )
        .bind(invitation.id)
        .bind(&invitation.slug)
        .bind(&invitation.code)
        .bind(invitation.instructor_id)
        .bind(invitation.created_at)
        .bind(invitation.expires_at)
        .bind(invitation.is_active)
        .bind(usage_limit)
        .bind(invitation.usage_count as i32)
        .execute(&self.pool)
        .await
        .map_err(|e| insert_error(e, "Invitation"))?;
        Ok(())
    }

    async fn find_invitation(&self, slug: &str, code: &str) -> PortResult<Option<Invitation>> {
        let record = sqlx::query_as::<_, InvitationRecord>(&format!(
            "SELECT {} FROM invitations WHERE slug = $1 AND code = $2",
            INVITATION_COLUMNS
        ))
        .bind(slug)
        .bind(code)
        .fetch_optional(&self.pool)
        .await
        .map_err(unexpected)?;
        Ok(record.map(InvitationRecord::to_domain))
    }

    async fn list_invitations_by_instructor(
        &self,
        instructor_id: Uuid,
    ) -> PortResult<Vec<Invitation>> {
        let records = sqlx::query_as::<_, InvitationRecord>(&format!(
            "SELECT {} FROM invitations WHERE instructor_id = $1 ORDER BY created_at DESC",
            INVITATION_COLUMNS
        ))
        .bind(instructor_id)
        .fetch_all(&self.pool)
        .await
        .map_err(unexpected)?;
        Ok(records.into_iter().map(|r| r.to_domain()).collect())
    }

    async fn try_consume(
        &self,
        slug: &str,
        code: &str,
        now: DateTime<Utc>,
    ) -> PortResult<Option<Invitation>> {
        // Concurrent updates of the same row queue on its lock and re-check the
        // WHERE clause against the committed row, so the cap holds across processes.
        let record = sqlx::query_as::<_, InvitationRecord>(&format!(
            "UPDATE invitations SET usage_count = usage_count + 1 \
             WHERE slug = $1 AND code = $2 \
               AND is_active \
               AND expires_at > $3 \
               AND (usage_limit IS NULL OR usage_count < usage_limit) \
             RETURNING {}",
            INVITATION_COLUMNS
        ))
        .bind(slug)
        .bind(code)
        .bind(now)
        .fetch_optional(&self.pool)
        .await
        .map_err(unexpected)?;
        Ok(record.map(InvitationRecord::to_domain))
    }

    async fn release_usage(&self, invitation_id: Uuid) -> PortResult<()> {
        sqlx::query(
            "UPDATE invitations SET usage_count = usage_count - 1 WHERE id = $1 AND usage_count > 0",
        )
        .bind(invitation_id)
        .execute(&self.pool)
        .await
        .map_err(unexpected)?;
        Ok(())
    }

    async fn deactivate_invitation(&self, invitation_id: Uuid) -> PortResult<Invitation> {
        let record = sqlx::query_as::<_, InvitationRecord>(&format!(
            "UPDATE invitations SET is_active = FALSE WHERE id = $1 RETURNING {}",
            INVITATION_COLUMNS
        ))
        .bind(invitation_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(unexpected)?
        .ok_or_else(|| PortError::NotFound(format!("Invitation {} not found", invitation_id)))?;
        Ok(record.to_domain())
    }
}

//=========================================================================================
// `CredentialStore` Trait Implementation
//=========================================================================================

#[async_trait]
impl CredentialStore for DbAdapter {
    async fn create_instructor(&self, new: NewInstructor) -> PortResult<Instructor> {
        let record = sqlx::query_as::<_, InstructorRecord>(&format!(
            "INSERT INTO instructors (id, name, email, hashed_password, slug, specialty, bio) \
             VALUES ($1, $2, $3, $4, $5, $6, $7) RETURNING {}",
            INSTRUCTOR_COLUMNS
        ))
        .bind(Uuid::new_v4())
        .bind(&new.name)
        .bind(&new.email)
        .bind(&new.hashed_password)
        .bind(&new.slug)
        .bind(&new.specialty)
        .bind(&new.bio)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| insert_error(e, "Instructor"))?;
        Ok(record.to_domain())
    }

    async fn get_instructor(&self, instructor_id: Uuid) -> PortResult<Instructor> {
        let record = sqlx::query_as::<_, InstructorRecord>(&format!(
            "SELECT {} FROM instructors WHERE id = $1",
            INSTRUCTOR_COLUMNS
        ))
        .bind(instructor_id)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| match e {
            sqlx::Error::RowNotFound => {
                PortError::NotFound(format!("Instructor {} not found", instructor_id))
            }
            _ => unexpected(e),
        })?;
        Ok(record.to_domain())
    }

    async fn get_instructor_credentials(&self, email: &str) -> PortResult<AccountCredentials> {
        let record = sqlx::query_as::<_, CredentialsRecord>(
            "SELECT id, email, hashed_password FROM instructors WHERE email = $1",
        )
        .bind(email)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| match e {
            sqlx::Error::RowNotFound => PortError::NotFound("Instructor not found".to_string()),
            _ => unexpected(e),
        })?;
        Ok(record.to_domain())
    }

    async fn create_student(&self, new: NewStudent) -> PortResult<Student> {
        let record = sqlx::query_as::<_, StudentRecord>(&format!(
            "INSERT INTO students (id, name, email, hashed_password) VALUES ($1, $2, $3, $4) RETURNING {}",
            STUDENT_COLUMNS
        ))
        .bind(Uuid::new_v4())
        .bind(&new.name)
        .bind(&new.email)
        .bind(&new.hashed_password)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| insert_error(e, "Student"))?;
        Ok(record.to_domain())
    }

    async fn get_student(&self, student_id: Uuid) -> PortResult<Student> {
        let record = sqlx::query_as::<_, StudentRecord>(&format!(
            "SELECT {} FROM students WHERE id = $1",
            STUDENT_COLUMNS
        ))
        .bind(student_id)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| match e {
            sqlx::Error::RowNotFound => {
                PortError::NotFound(format!("Student {} not found", student_id))
            }
            _ => unexpected(e),
        })?;
        Ok(record.to_domain())
    }

    async fn get_student_credentials(&self, email: &str) -> PortResult<AccountCredentials> {
        let record = sqlx::query_as::<_, CredentialsRecord>(
            "SELECT id, email, hashed_password FROM students WHERE email = $1",
        )
        .bind(email)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| match e {
            sqlx::Error::RowNotFound => PortError::NotFound("Student not found".to_string()),
            _ => unexpected(e),
        })?;
        Ok(record.to_domain())
    }

    async fn list_students_by_instructor(&self, instructor_id: Uuid) -> PortResult<Vec<Student>> {
        let records = sqlx::query_as::<_, StudentRecord>(&format!(
            "SELECT {} FROM students WHERE linked_instructor_id = $1 ORDER BY name ASC",
            STUDENT_COLUMNS
        ))
        .bind(instructor_id)
        .fetch_all(&self.pool)
        .await
        .map_err(unexpected)?;
        Ok(records.into_iter().map(|r| r.to_domain()).collect())
    }

    async fn link_student(
        &self,
        student_id: Uuid,
        instructor_id: Uuid,
        overwrite: bool,
    ) -> PortResult<bool> {
        let sql = if overwrite {
            "UPDATE students SET linked_instructor_id = $1 WHERE id = $2"
        } else {
            "UPDATE students SET linked_instructor_id = $1 WHERE id = $2 AND linked_instructor_id IS NULL"
        };
        let result = sqlx::query(sql)
            .bind(instructor_id)
            .bind(student_id)
            .execute(&self.pool)
            .await
            .map_err(unexpected)?;
        Ok(result.rows_affected() == 1)
    }
}

//=========================================================================================
// Session Store Implementations
//=========================================================================================

#[async_trait]
impl InstructorSessionStore for DbAdapter {
    async fn create_instructor_session(&self, session: &SessionRecord) -> PortResult<()> {
        sqlx::query(
            "INSERT INTO instructor_sessions (token, instructor_id, issued_at, expires_at) VALUES ($1, $2, $3, $4)",
        )
        .bind(&session.token)
        .bind(session.subject_id)
        .bind(session.issued_at)
        .bind(session.expires_at)
        .execute(&self.pool)
        .await
        .map_err(unexpected)?;
        Ok(())
    }

    async fn find_instructor_session(&self, token: &str) -> PortResult<Option<SessionRecord>> {
        let row = sqlx::query_as::<_, SessionRow>(
            "SELECT token, instructor_id AS subject_id, issued_at, expires_at FROM instructor_sessions WHERE token = $1",
        )
        .bind(token)
        .fetch_optional(&self.pool)
        .await
        .map_err(unexpected)?;
        Ok(row.map(SessionRow::to_domain))
    }

    async fn delete_instructor_session(&self, token: &str) -> PortResult<()> {
        sqlx::query("DELETE FROM instructor_sessions WHERE token = $1")
            .bind(token)
            .execute(&self.pool)
            .await
            .map_err(unexpected)?;
        Ok(())
    }
}

#[async_trait]
impl StudentSessionStore for DbAdapter {
    async fn create_student_session(&self, session: &SessionRecord) -> PortResult<()> {
        sqlx::query(
            "INSERT INTO student_sessions (token, student_id, issued_at, expires_at) VALUES ($1, $2, $3, $4)",
        )
        .bind(&session.token)
        .bind(session.subject_id)
        .bind(session.issued_at)
        .bind(session.expires_at)
        .execute(&self.pool)
        .await
        .map_err(unexpected)?;
        Ok(())
    }

    async fn find_student_session(&self, token: &str) -> PortResult<Option<SessionRecord>> {
        let row = sqlx::query_as::<_, SessionRow>(
            "SELECT token, student_id AS subject_id, issued_at, expires_at FROM student_sessions WHERE token = $1",
        )
        .bind(token)
        .fetch_optional(&self.pool)
        .await
        .map_err(unexpected)?;
        Ok(row.map(SessionRow::to_domain))
    }

    async fn delete_student_session(&self, token: &str) -> PortResult<()> {
        sqlx::query("DELETE FROM student_sessions WHERE token = $1")
            .bind(token)
            .execute(&self.pool)
            .await
            .map_err(unexpected)?;
        Ok(())
    }
}
