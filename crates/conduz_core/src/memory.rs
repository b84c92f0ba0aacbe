//! crates/conduz_core/src/memory.rs
//!
//! An in-process adapter implementing every storage port. Each table sits behind
//! its own mutex, and every conditional update runs entirely under that lock.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::HashMap;
use uuid::Uuid;

use crate::domain::{
    assess, AccountCredentials, Instructor, Invitation, NewInstructor, NewStudent,
    SessionRecord, Student,
};
use crate::ports::{
    CredentialStore, InstructorSessionStore, InvitationStore, PortError, PortResult,
    StudentSessionStore,
};

struct InstructorRow {
    instructor: Instructor,
    hashed_password: String,
}

struct StudentRow {
    student: Student,
    hashed_password: String,
}

#[derive(Default)]
pub struct MemoryStore {
    invitations: Mutex<HashMap<Uuid, Invitation>>,
    instructors: Mutex<HashMap<Uuid, InstructorRow>>,
    students: Mutex<HashMap<Uuid, StudentRow>>,
    instructor_sessions: Mutex<HashMap<String, SessionRecord>>,
    student_sessions: Mutex<HashMap<String, SessionRecord>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

//=========================================================================================
// `InvitationStore` Implementation
//=========================================================================================

#[async_trait]
impl InvitationStore for MemoryStore {
    async fn insert_invitation(&self, invitation: &Invitation) -> PortResult<()> {
        let mut table = self.invitations.lock();
        if table.values().any(|i| i.code == invitation.code) {
            return Err(PortError::Conflict("Invitation code already exists".to_string()));
        }
        table.insert(invitation.id, invitation.clone());
        Ok(())
    }

    async fn find_invitation(&self, slug: &str, code: &str) -> PortResult<Option<Invitation>> {
        Ok(self
            .invitations
            .lock()
            .values()
            .find(|i| i.slug == slug && i.code == code)
            .cloned())
    }

    async fn list_invitations_by_instructor(
        &self,
        instructor_id: Uuid,
    ) -> PortResult<Vec<Invitation>> {
        Ok(self
            .invitations
            .lock()
            .values()
            .filter(|i| i.instructor_id == instructor_id)
            .cloned()
            .collect())
    }

    async fn try_consume(
        &self,
        slug: &str,
        code: &str,
        now: DateTime<Utc>,
    ) -> PortResult<Option<Invitation>> {
        let mut table = self.invitations.lock();
        let Some(invitation) = table
            .values_mut()
            .find(|i| i.slug == slug && i.code == code)
        else {
            return Ok(None);
        };
        let blocked = assess(
            invitation.is_active,
            invitation.expires_at,
            invitation.usage_count,
            invitation.usage_limit,
            now,
        );
        if blocked.is_some() {
            return Ok(None);
        }
        invitation.usage_count += 1;
        Ok(Some(invitation.clone()))
    }

    async fn release_usage(&self, invitation_id: Uuid) -> PortResult<()> {
        let mut table = self.invitations.lock();
        let invitation = table
            .get_mut(&invitation_id)
            .ok_or_else(|| PortError::NotFound(format!("Invitation {} not found", invitation_id)))?;
        invitation.usage_count = invitation.usage_count.saturating_sub(1);
        Ok(())
    }

    async fn deactivate_invitation(&self, invitation_id: Uuid) -> PortResult<Invitation> {
        let mut table = self.invitations.lock();
        let invitation = table
            .get_mut(&invitation_id)
            .ok_or_else(|| PortError::NotFound(format!("Invitation {} not found", invitation_id)))?;
        invitation.is_active = false;
        Ok(invitation.clone())
    }
}

//=========================================================================================
// `CredentialStore` Implementation
//=========================================================================================

#[async_trait]
impl CredentialStore for MemoryStore {
    async fn create_instructor(&self, new: NewInstructor) -> PortResult<Instructor> {
        let mut table = self.instructors.lock();
        if table
            .values()
            .any(|r| r.instructor.email == new.email || r.instructor.slug == new.slug)
        {
            return Err(PortError::Conflict(format!(
                "Instructor {} already registered",
                new.email
            )));
        }
        let instructor = Instructor {
            id: Uuid::new_v4(),
            name: new.name,
            email: new.email,
            slug: new.slug,
            specialty: new.specialty,
            bio: new.bio,
            created_at: Utc::now(),
        };
        table.insert(
            instructor.id,
            InstructorRow {
                instructor: instructor.clone(),
                hashed_password: new.hashed_password,
            },
        );
        Ok(instructor)
    }

    async fn get_instructor(&self, instructor_id: Uuid) -> PortResult<Instructor> {
        self.instructors
            .lock()
            .get(&instructor_id)
            .map(|r| r.instructor.clone())
            .ok_or_else(|| PortError::NotFound(format!("Instructor {} not found", instructor_id)))
    }

    async fn get_instructor_credentials(&self, email: &str) -> PortResult<AccountCredentials> {
        self.instructors
            .lock()
            .values()
            .find(|r| r.instructor.email == email)
            .map(|r| AccountCredentials {
                account_id: r.instructor.id,
                email: r.instructor.email.clone(),
                hashed_password: r.hashed_password.clone(),
            })
            .ok_or_else(|| PortError::NotFound("Instructor not found".to_string()))
    }

    async fn create_student(&self, new: NewStudent) -> PortResult<Student> {
        let mut table = self.students.lock();
        if table.values().any(|r| r.student.email == new.email) {
            return Err(PortError::Conflict(format!(
                "Student {} already registered",
                new.email
            )));
        }
        let student = Student {
            id: Uuid::new_v4(),
            name: new.name,
            email: new.email,
            linked_instructor_id: None,
            created_at: Utc::now(),
        };
        table.insert(
            student.id,
            StudentRow {
                student: student.clone(),
                hashed_password: new.hashed_password,
            },
        );
        Ok(student)
    }

    async fn get_student(&self, student_id: Uuid) -> PortResult<Student> {
        self.students
            .lock()
            .get(&student_id)
            .map(|r| r.student.clone())
            .ok_or_else(|| PortError::NotFound(format!("Student {} not found", student_id)))
    }

    async fn get_student_credentials(&self, email: &str) -> PortResult<AccountCredentials> {
        self.students
            .lock()
            .values()
            .find(|r| r.student.email == email)
            .map(|r| AccountCredentials {
                account_id: r.student.id,
                email: r.student.email.clone(),
                hashed_password: r.hashed_password.clone(),
            })
            .ok_or_else(|| PortError::NotFound("Student not found".to_string()))
    }

    async fn list_students_by_instructor(&self, instructor_id: Uuid) -> PortResult<Vec<Student>> {
        let mut students: Vec<Student> = self
            .students
            .lock()
            .values()
            .filter(|r| r.student.linked_instructor_id == Some(instructor_id))
            .map(|r| r.student.clone())
            .collect();
        students.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(students)
    }

    async fn link_student(
        &self,
        student_id: Uuid,
        instructor_id: Uuid,
        overwrite: bool,
    ) -> PortResult<bool> {
        let mut table = self.students.lock();
        let row = table
            .get_mut(&student_id)
            .ok_or_else(|| PortError::NotFound(format!("Student {} not found", student_id)))?;
        if !overwrite && row.student.linked_instructor_id.is_some() {
            return Ok(false);
        }
        row.student.linked_instructor_id = Some(instructor_id);
        Ok(true)
    }
}

//=========================================================================================
// Session Store Implementations
//=========================================================================================

#[async_trait]
impl InstructorSessionStore for MemoryStore {
    async fn create_instructor_session(&self, session: &SessionRecord) -> PortResult<()> {
        self.instructor_sessions
            .lock()
            .insert(session.token.clone(), session.clone());
        Ok(())
    }

    async fn find_instructor_session(&self, token: &str) -> PortResult<Option<SessionRecord>> {
        Ok(self.instructor_sessions.lock().get(token).cloned())
    }

    async fn delete_instructor_session(&self, token: &str) -> PortResult<()> {
        self.instructor_sessions.lock().remove(token);
        Ok(())
    }
}

#[async_trait]
impl StudentSessionStore for MemoryStore {
    async fn create_student_session(&self, session: &SessionRecord) -> PortResult<()> {
        self.student_sessions
            .lock()
            .insert(session.token.clone(), session.clone());
        Ok(())
    }

    async fn find_student_session(&self, token: &str) -> PortResult<Option<SessionRecord>> {
        Ok(self.student_sessions.lock().get(token).cloned())
    }

    async fn delete_student_session(&self, token: &str) -> PortResult<()> {
        self.student_sessions.lock().remove(token);
        Ok(())
    }
}
