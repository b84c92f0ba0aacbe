//! crates/conduz_core/src/domain.rs
//!
//! Defines the pure, core data structures for the application.
//! These structs are independent of any database or serialization format.

use chrono::{DateTime, Utc};
use rand::Rng;
use uuid::Uuid;

//=========================================================================================
// Accounts
//=========================================================================================

/// An instructor account. The slug is assigned once at registration and never changes.
#[derive(Debug, Clone)]
pub struct Instructor {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    pub slug: String,
    pub specialty: String,
    pub bio: String,
    pub created_at: DateTime<Utc>,
}

impl Instructor {
    /// The part of an instructor that may be shown to anyone holding an invitation link.
    pub fn public_profile(&self) -> InstructorProfile {
        InstructorProfile {
            name: self.name.clone(),
            specialty: self.specialty.clone(),
        }
    }
}

/// Public identity of an instructor. Never carries the id, e-mail or credentials.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstructorProfile {
    pub name: String,
    pub specialty: String,
}

/// A student account.
#[derive(Debug, Clone)]
pub struct Student {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    pub linked_instructor_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

// Only used internally for login/signup - contains sensitive data
#[derive(Debug, Clone)]
pub struct AccountCredentials {
    pub account_id: Uuid,
    pub email: String,
    pub hashed_password: String,
}

#[derive(Debug, Clone)]
pub struct NewInstructor {
    pub name: String,
    pub email: String,
    pub hashed_password: String,
    pub slug: String,
    pub specialty: String,
    pub bio: String,
}

#[derive(Debug, Clone)]
pub struct NewStudent {
    pub name: String,
    pub email: String,
    pub hashed_password: String,
}

/// Builds the permanent routing slug for a new instructor: a readable stem taken
/// from the name plus a random suffix so two instructors named alike never collide.
pub fn derive_slug(name: &str) -> String {
    let mut stem = String::with_capacity(name.len());
    for c in name.trim().to_lowercase().chars() {
        if c.is_ascii_alphanumeric() {
            stem.push(c);
        } else if !stem.is_empty() && !stem.ends_with('-') {
            stem.push('-');
        }
        if stem.len() >= 40 {
            break;
        }
    }
    let stem = stem.trim_end_matches('-');
    let stem = if stem.is_empty() { "instructor" } else { stem };

    let suffix: u32 = rand::thread_rng().gen_range(0..0x100_0000);
    format!("{}-{:06x}", stem, suffix)
}

//=========================================================================================
// Sessions
//=========================================================================================

/// The two authentication tracks. A token minted for one is never accepted by the other.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Student,
    Instructor,
}

/// Where a client is expected to keep its bearer token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PersistenceScope {
    TabScoped,
    Durable,
}

impl PersistenceScope {
    pub fn as_str(&self) -> &'static str {
        match self {
            PersistenceScope::TabScoped => "tab_scoped",
            PersistenceScope::Durable => "durable",
        }
    }
}

/// A stored bearer token. Each role keeps these in its own store.
#[derive(Debug, Clone)]
pub struct SessionRecord {
    pub token: String,
    pub subject_id: Uuid,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

//=========================================================================================
// Invitations
//=========================================================================================

/// A time-boxed, usage-limited capability that lets students link to an instructor.
#[derive(Debug, Clone)]
pub struct Invitation {
    pub id: Uuid,
    pub slug: String,
    pub code: String,
    pub instructor_id: Uuid,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub is_active: bool,
    /// `None` means unlimited within the TTL.
    pub usage_limit: Option<u32>,
    pub usage_count: u32,
}

impl Invitation {
    /// Why the invitation cannot be consumed at `now`, or `None` if it can.
    pub fn unusable_reason_at(&self, now: DateTime<Utc>) -> Option<InvitationReason> {
        assess(
            self.is_active,
            self.expires_at,
            self.usage_count,
            self.usage_limit,
            now,
        )
    }

    pub fn is_usable_at(&self, now: DateTime<Utc>) -> bool {
        self.unusable_reason_at(now).is_none()
    }
}

/// The usability predicate, evaluated fresh on every call.
///
/// Revocation is reported ahead of expiry and exhaustion so that a revoked
/// invitation always reads as revoked, whatever else has happened to it.
pub fn assess(
    is_active: bool,
    expires_at: DateTime<Utc>,
    usage_count: u32,
    usage_limit: Option<u32>,
    now: DateTime<Utc>,
) -> Option<InvitationReason> {
    if !is_active {
        return Some(InvitationReason::Revoked);
    }
    if now >= expires_at {
        return Some(InvitationReason::Expired);
    }
    match usage_limit {
        Some(limit) if usage_count >= limit => Some(InvitationReason::UsageExceeded),
        _ => None,
    }
}

/// User-facing reasons an invitation could not be validated or accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvitationReason {
    NotFound,
    Expired,
    Revoked,
    UsageExceeded,
    /// Only produced by accept, when the re-linking policy forbids a second link.
    AlreadyLinked,
}

impl InvitationReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            InvitationReason::NotFound => "not_found",
            InvitationReason::Expired => "expired",
            InvitationReason::Revoked => "revoked",
            InvitationReason::UsageExceeded => "usage_exceeded",
            InvitationReason::AlreadyLinked => "already_linked",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn invitation(now: DateTime<Utc>) -> Invitation {
        Invitation {
            id: Uuid::new_v4(),
            slug: "ana-souza-0a1b2c".to_string(),
            code: "secret".to_string(),
            instructor_id: Uuid::new_v4(),
            created_at: now,
            expires_at: now + Duration::days(7),
            is_active: true,
            usage_limit: Some(2),
            usage_count: 0,
        }
    }

    #[test]
    fn expired_regardless_of_usage() {
        let now = Utc::now();
        let mut inv = invitation(now);
        inv.usage_limit = None;
        for count in [0, 1, 1000] {
            inv.usage_count = count;
            assert_eq!(
                inv.unusable_reason_at(inv.expires_at),
                Some(InvitationReason::Expired)
            );
            assert!(!inv.is_usable_at(inv.expires_at + Duration::seconds(1)));
        }
        assert!(inv.is_usable_at(inv.expires_at - Duration::seconds(1)));
    }

    #[test]
    fn revoked_takes_precedence() {
        let now = Utc::now();
        let mut inv = invitation(now);
        inv.is_active = false;
        inv.usage_count = 2;
        assert_eq!(
            inv.unusable_reason_at(now + Duration::days(30)),
            Some(InvitationReason::Revoked)
        );
    }

    #[test]
    fn usage_limit_is_a_cap() {
        let now = Utc::now();
        let mut inv = invitation(now);
        inv.usage_count = 1;
        assert!(inv.is_usable_at(now));
        inv.usage_count = 2;
        assert_eq!(
            inv.unusable_reason_at(now),
            Some(InvitationReason::UsageExceeded)
        );
    }

    #[test]
    fn slug_is_readable_and_suffixed() {
        let slug = derive_slug("  Ana Souza  (Legislação) ");
        assert!(slug.starts_with("ana-souza-legisla"), "{}", slug);
        let suffix = slug.rsplit('-').next().unwrap();
        assert_eq!(suffix.len(), 6);
        assert!(derive_slug("!!!").starts_with("instructor-"));
    }
}
