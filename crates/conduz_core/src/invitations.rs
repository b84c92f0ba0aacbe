//! crates/conduz_core/src/invitations.rs
//!
//! Invitation lifecycle: issuance, validation, consumption (account linking),
//! revocation and listing.
//!
//! Consumption relies on `InvitationStore::try_consume` being a single conditional
//! write. If the link write that follows fails or does not apply, the consumed
//! usage is handed back with `release_usage`.

use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::domain::{Instructor, InstructorProfile, Invitation, InvitationReason};
use crate::ports::{Clock, CredentialStore, InvitationStore, PortError, PortResult};
use crate::secret::generate_secret;
use crate::sessions::{InstructorSession, StudentSession};

//=========================================================================================
// Policy
//=========================================================================================

pub const DEFAULT_INVITATION_TTL_DAYS: i64 = 7;

/// `None` is unlimited acceptances until expiry.
pub const DEFAULT_USAGE_LIMIT: Option<u32> = None;

/// What happens when a student who already has an instructor accepts another invitation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RelinkPolicy {
    #[default]
    Reject,
    Overwrite,
}

/// System-wide invitation settings, fixed at startup.
#[derive(Debug, Clone)]
pub struct InvitationPolicy {
    pub ttl: Duration,
    pub usage_limit: Option<u32>,
    pub relink: RelinkPolicy,
}

impl Default for InvitationPolicy {
    fn default() -> Self {
        Self {
            ttl: Duration::days(DEFAULT_INVITATION_TTL_DAYS),
            usage_limit: DEFAULT_USAGE_LIMIT,
            relink: RelinkPolicy::default(),
        }
    }
}

//=========================================================================================
// Outcomes
//=========================================================================================

/// An invitation together with its shareable link.
#[derive(Debug, Clone)]
pub struct IssuedInvitation {
    pub invitation: Invitation,
    pub link: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationOutcome {
    Usable { instructor: InstructorProfile },
    Unusable { reason: InvitationReason },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AcceptOutcome {
    Linked {
        instructor_id: Uuid,
        instructor: InstructorProfile,
    },
    Rejected {
        reason: InvitationReason,
    },
}

impl AcceptOutcome {
    pub fn is_linked(&self) -> bool {
        matches!(self, AcceptOutcome::Linked { .. })
    }
}

//=========================================================================================
// Service
//=========================================================================================

pub struct InvitationService {
    invitations: Arc<dyn InvitationStore>,
    accounts: Arc<dyn CredentialStore>,
    clock: Arc<dyn Clock>,
    policy: InvitationPolicy,
    base_url: String,
}

impl InvitationService {
    pub fn new(
        invitations: Arc<dyn InvitationStore>,
        accounts: Arc<dyn CredentialStore>,
        clock: Arc<dyn Clock>,
        policy: InvitationPolicy,
        base_url: impl Into<String>,
    ) -> Self {
        Self {
            invitations,
            accounts,
            clock,
            policy,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn policy(&self) -> &InvitationPolicy {
        &self.policy
    }

    /// The browser-facing link for an invitation.
    pub fn link_for(&self, invitation: &Invitation) -> String {
        format!(
            "{}/join-instructor/{}/{}",
            self.base_url, invitation.slug, invitation.code
        )
    }

    /// Mints a new invitation owned by the calling instructor.
    pub async fn issue(&self, session: &InstructorSession) -> PortResult<IssuedInvitation> {
        let now = self.clock.now();
        if !session.is_live_at(now) {
            return Err(PortError::Unauthorized);
        }
        let instructor = self.session_instructor(session).await?;

        let invitation = Invitation {
            id: Uuid::new_v4(),
            slug: instructor.slug,
            code: generate_secret(),
            instructor_id: instructor.id,
            created_at: now,
            expires_at: now + self.policy.ttl,
            is_active: true,
            usage_limit: self.policy.usage_limit,
            usage_count: 0,
        };
        self.invitations.insert_invitation(&invitation).await?;

        info!(
            invitation_id = %invitation.id,
            instructor_id = %invitation.instructor_id,
            slug = %invitation.slug,
            expires_at = %invitation.expires_at,
            "Invitation issued"
        );
        Ok(IssuedInvitation {
            link: self.link_for(&invitation),
            invitation,
        })
    }

    /// Read-only landing-page check, open to anyone holding the link.
    pub async fn validate(&self, slug: &str, code: &str) -> PortResult<ValidationOutcome> {
        let now = self.clock.now();
        let Some(invitation) = self.invitations.find_invitation(slug, code).await? else {
            return Ok(ValidationOutcome::Unusable {
                reason: InvitationReason::NotFound,
            });
        };
        if let Some(reason) = invitation.unusable_reason_at(now) {
            return Ok(ValidationOutcome::Unusable { reason });
        }

        match self.accounts.get_instructor(invitation.instructor_id).await {
            Ok(instructor) => Ok(ValidationOutcome::Usable {
                instructor: instructor.public_profile(),
            }),
            Err(PortError::NotFound(_)) => Ok(ValidationOutcome::Unusable {
                reason: InvitationReason::NotFound,
            }),
            Err(e) => Err(e),
        }
    }

    /// Consumes one usage and links the student to the issuing instructor.
    pub async fn accept(
        &self,
        session: &StudentSession,
        slug: &str,
        code: &str,
    ) -> PortResult<AcceptOutcome> {
        let now = self.clock.now();
        if !session.is_live_at(now) {
            return Err(PortError::Unauthorized);
        }
        let student = match self.accounts.get_student(session.student_id()).await {
            Ok(student) => student,
            Err(PortError::NotFound(_)) => return Err(PortError::Unauthorized),
            Err(e) => return Err(e),
        };

        if student.linked_instructor_id.is_some() && self.policy.relink == RelinkPolicy::Reject {
            warn!(student_id = %student.id, slug, "Accept rejected: student already linked");
            return Ok(rejected(InvitationReason::AlreadyLinked));
        }

        // A repeat accept by a student already linked to this invitation's instructor
        // is answered from a read and never spends another usage.
        if let Some(linked_to) = student.linked_instructor_id {
            if let Some(outcome) = self.repeat_accept(linked_to, slug, code, now).await? {
                info!(
                    student_id = %student.id,
                    instructor_id = %linked_to,
                    "Repeat accept answered without consuming"
                );
                return Ok(outcome);
            }
        }

        // 1. The atomic check-and-increment.
        let Some(consumed) = self.invitations.try_consume(slug, code, now).await? else {
            let reason = self.current_reason(slug, code).await?;
            warn!(student_id = %student.id, slug, reason = reason.as_str(), "Accept rejected");
            return Ok(rejected(reason));
        };

        // 2. Resolve the instructor before touching the student record.
        let instructor = match self.accounts.get_instructor(consumed.instructor_id).await {
            Ok(instructor) => instructor,
            Err(e) => {
                self.compensate(&consumed).await;
                return Err(e);
            }
        };

        // 3. Record the link; hand the usage back if it does not land.
        let overwrite = self.policy.relink == RelinkPolicy::Overwrite;
        match self
            .accounts
            .link_student(student.id, instructor.id, overwrite)
            .await
        {
            Ok(true) => {}
            Ok(false) => {
                self.compensate(&consumed).await;
                warn!(student_id = %student.id, slug, "Accept rejected: linked concurrently");
                return Ok(rejected(InvitationReason::AlreadyLinked));
            }
            Err(e) => {
                self.compensate(&consumed).await;
                return Err(e);
            }
        }

        info!(
            invitation_id = %consumed.id,
            student_id = %student.id,
            instructor_id = %instructor.id,
            usage_count = consumed.usage_count,
            "Student linked to instructor"
        );
        Ok(AcceptOutcome::Linked {
            instructor_id: instructor.id,
            instructor: instructor.public_profile(),
        })
    }

    /// Deactivates an invitation owned by the caller. Revocation is one-way.
    pub async fn revoke(
        &self,
        session: &InstructorSession,
        slug: &str,
        code: &str,
    ) -> PortResult<Invitation> {
        if !session.is_live_at(self.clock.now()) {
            return Err(PortError::Unauthorized);
        }
        let invitation = self
            .invitations
            .find_invitation(slug, code)
            .await?
            .ok_or_else(|| PortError::NotFound(format!("Invitation for {}", slug)))?;
        if invitation.instructor_id != session.instructor_id() {
            warn!(
                invitation_id = %invitation.id,
                caller = %session.instructor_id(),
                "Revocation refused: not the owner"
            );
            return Err(PortError::Forbidden);
        }

        let revoked = self.invitations.deactivate_invitation(invitation.id).await?;
        info!(invitation_id = %revoked.id, "Invitation revoked");
        Ok(revoked)
    }

    /// Every invitation the caller has issued, newest first.
    pub async fn list_mine(&self, session: &InstructorSession) -> PortResult<Vec<IssuedInvitation>> {
        if !session.is_live_at(self.clock.now()) {
            return Err(PortError::Unauthorized);
        }
        let mut invitations = self
            .invitations
            .list_invitations_by_instructor(session.instructor_id())
            .await?;
        invitations.sort_by(|a, b| b.created_at.cmp(&a.created_at));

        Ok(invitations
            .into_iter()
            .map(|invitation| IssuedInvitation {
                link: self.link_for(&invitation),
                invitation,
            })
            .collect())
    }

    //=====================================================================================
    // Helpers
    //=====================================================================================

    async fn session_instructor(&self, session: &InstructorSession) -> PortResult<Instructor> {
        match self.accounts.get_instructor(session.instructor_id()).await {
            Ok(instructor) => Ok(instructor),
            Err(PortError::NotFound(_)) => Err(PortError::Unauthorized),
            Err(e) => Err(e),
        }
    }

    /// Re-reads an invitation whose conditional update did not apply and names the
    /// reason. If it reads as usable again, another accept won the race for the last
    /// usage in between, which is reported as exhaustion.
    async fn current_reason(&self, slug: &str, code: &str) -> PortResult<InvitationReason> {
        let now = self.clock.now();
        Ok(match self.invitations.find_invitation(slug, code).await? {
            None => InvitationReason::NotFound,
            Some(invitation) => invitation
                .unusable_reason_at(now)
                .unwrap_or(InvitationReason::UsageExceeded),
        })
    }

    /// `Some` when the invitation belongs to the instructor the student is already
    /// linked to. Revoked or expired invitations are still refused; an exhausted one
    /// reports the existing link, since the student already holds one of its usages.
    async fn repeat_accept(
        &self,
        linked_to: Uuid,
        slug: &str,
        code: &str,
        now: DateTime<Utc>,
    ) -> PortResult<Option<AcceptOutcome>> {
        let Some(invitation) = self.invitations.find_invitation(slug, code).await? else {
            return Ok(None);
        };
        if invitation.instructor_id != linked_to {
            return Ok(None);
        }
        match invitation.unusable_reason_at(now) {
            Some(reason @ (InvitationReason::Revoked | InvitationReason::Expired)) => {
                Ok(Some(rejected(reason)))
            }
            _ => {
                let instructor = self.accounts.get_instructor(linked_to).await?;
                Ok(Some(AcceptOutcome::Linked {
                    instructor_id: instructor.id,
                    instructor: instructor.public_profile(),
                }))
            }
        }
    }

    async fn compensate(&self, consumed: &Invitation) {
        if let Err(e) = self.invitations.release_usage(consumed.id).await {
            error!(
                invitation_id = %consumed.id,
                "Failed to release usage after unsuccessful link: {:?}", e
            );
        } else {
            warn!(invitation_id = %consumed.id, "Usage released after unsuccessful link");
        }
    }
}

fn rejected(reason: InvitationReason) -> AcceptOutcome {
    AcceptOutcome::Rejected { reason }
}
