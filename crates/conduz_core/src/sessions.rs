//! crates/conduz_core/src/sessions.rs
//!
//! The two authentication tracks. Instructor and student sessions live in
//! separate stores, carry separate token prefixes and are verified by separate
//! code. A verified session is the only way to obtain an `InstructorSession` or a
//! `StudentSession`, so an operation that takes one cannot be reached with the other.

use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

use crate::domain::{PersistenceScope, Role, SessionRecord};
use crate::ports::{Clock, InstructorSessionStore, PortError, PortResult, StudentSessionStore};
use crate::secret::generate_secret;

pub const INSTRUCTOR_TOKEN_PREFIX: &str = "ins_";
pub const STUDENT_TOKEN_PREFIX: &str = "stu_";

/// A freshly minted bearer token, handed to the client once.
#[derive(Debug, Clone)]
pub struct IssuedToken {
    pub token: String,
    pub role: Role,
    pub subject_id: Uuid,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub persistence_scope: PersistenceScope,
}

//=========================================================================================
// Instructor Track
//=========================================================================================

/// Proof that the caller holds a live instructor token.
#[derive(Debug, Clone)]
pub struct InstructorSession {
    instructor_id: Uuid,
    issued_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
}

impl InstructorSession {
    pub fn instructor_id(&self) -> Uuid {
        self.instructor_id
    }

    pub fn issued_at(&self) -> DateTime<Utc> {
        self.issued_at
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        self.expires_at
    }

    pub fn is_live_at(&self, now: DateTime<Utc>) -> bool {
        now < self.expires_at
    }
}

/// Issues and verifies instructor tokens.
pub struct InstructorSessions {
    store: Arc<dyn InstructorSessionStore>,
    clock: Arc<dyn Clock>,
    ttl: Duration,
}

impl InstructorSessions {
    pub const SCOPE: PersistenceScope = PersistenceScope::Durable;

    pub fn new(store: Arc<dyn InstructorSessionStore>, clock: Arc<dyn Clock>, ttl: Duration) -> Self {
        Self { store, clock, ttl }
    }

    pub async fn issue(&self, instructor_id: Uuid) -> PortResult<IssuedToken> {
        let issued_at = self.clock.now();
        let record = SessionRecord {
            token: format!("{}{}", INSTRUCTOR_TOKEN_PREFIX, generate_secret()),
            subject_id: instructor_id,
            issued_at,
            expires_at: issued_at + self.ttl,
        };
        self.store.create_instructor_session(&record).await?;
        info!(%instructor_id, "Instructor session issued");

        Ok(IssuedToken {
            token: record.token,
            role: Role::Instructor,
            subject_id: instructor_id,
            issued_at,
            expires_at: record.expires_at,
            persistence_scope: Self::SCOPE,
        })
    }

    /// Resolves a bearer token into a live instructor session.
    /// Expiry is checked here on every call, not only at issuance.
    pub async fn verify(&self, token: &str) -> PortResult<InstructorSession> {
        if !token.starts_with(INSTRUCTOR_TOKEN_PREFIX) {
            return Err(PortError::Unauthorized);
        }
        let record = self
            .store
            .find_instructor_session(token)
            .await?
            .ok_or(PortError::Unauthorized)?;

        if self.clock.now() >= record.expires_at {
            debug!(instructor_id = %record.subject_id, "Expired instructor session dropped");
            self.store.delete_instructor_session(token).await?;
            return Err(PortError::Unauthorized);
        }

        Ok(InstructorSession {
            instructor_id: record.subject_id,
            issued_at: record.issued_at,
            expires_at: record.expires_at,
        })
    }

    pub async fn revoke(&self, token: &str) -> PortResult<()> {
        self.store.delete_instructor_session(token).await
    }
}

//=========================================================================================
// Student Track
//=========================================================================================

/// Proof that the caller holds a live student token.
#[derive(Debug, Clone)]
pub struct StudentSession {
    student_id: Uuid,
    issued_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
}

impl StudentSession {
    pub fn student_id(&self) -> Uuid {
        self.student_id
    }

    pub fn issued_at(&self) -> DateTime<Utc> {
        self.issued_at
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        self.expires_at
    }

    pub fn is_live_at(&self, now: DateTime<Utc>) -> bool {
        now < self.expires_at
    }
}

/// Issues and verifies student tokens.
pub struct StudentSessions {
    store: Arc<dyn StudentSessionStore>,
    clock: Arc<dyn Clock>,
    ttl: Duration,
}

impl StudentSessions {
    pub const SCOPE: PersistenceScope = PersistenceScope::TabScoped;

    pub fn new(store: Arc<dyn StudentSessionStore>, clock: Arc<dyn Clock>, ttl: Duration) -> Self {
        Self { store, clock, ttl }
    }

    pub async fn issue(&self, student_id: Uuid) -> PortResult<IssuedToken> {
        let issued_at = self.clock.now();
        let record = SessionRecord {
            token: format!("{}{}", STUDENT_TOKEN_PREFIX, generate_secret()),
            subject_id: student_id,
            issued_at,
            expires_at: issued_at + self.ttl,
        };
        self.store.create_student_session(&record).await?;
        info!(%student_id, "Student session issued");

        Ok(IssuedToken {
            token: record.token,
            role: Role::Student,
            subject_id: student_id,
            issued_at,
            expires_at: record.expires_at,
            persistence_scope: Self::SCOPE,
        })
    }

    pub async fn verify(&self, token: &str) -> PortResult<StudentSession> {
        if !token.starts_with(STUDENT_TOKEN_PREFIX) {
            return Err(PortError::Unauthorized);
        }
        let Some(record) = self.store.find_student_session(token).await? else {
            return Err(PortError::Unauthorized);
        };

        if self.clock.now() >= record.expires_at {
            debug!(student_id = %record.subject_id, "Expired student session dropped");
            self.store.delete_student_session(token).await?;
            return Err(PortError::Unauthorized);
        }

        Ok(StudentSession {
            student_id: record.subject_id,
            issued_at: record.issued_at,
            expires_at: record.expires_at,
        })
    }

    pub async fn revoke(&self, token: &str) -> PortResult<()> {
        self.store.delete_student_session(token).await
    }
}
