//! Invitation lifecycle tests: issuance, validation, acceptance, expiry, revocation,
//! re-linking policy and the usage cap under genuinely concurrent accepts.

use async_trait::async_trait;
use chrono::{Duration, Utc};
use std::sync::Arc;
use tokio::sync::Barrier;
use uuid::Uuid;

use conduz_core::domain::derive_slug;
use conduz_core::{
    AcceptOutcome, AccountCredentials, CredentialStore, Instructor, InstructorSession,
    InstructorSessions, InvitationPolicy, InvitationReason, InvitationService, InvitationStore,
    ManualClock, MemoryStore, NewInstructor, NewStudent, PortError, PortResult, RelinkPolicy,
    Student, StudentSession, StudentSessions, ValidationOutcome,
};

struct Harness {
    store: Arc<MemoryStore>,
    clock: Arc<ManualClock>,
    service: Arc<InvitationService>,
    instructor_sessions: InstructorSessions,
    student_sessions: StudentSessions,
}

fn harness(policy: InvitationPolicy) -> Harness {
    let store = Arc::new(MemoryStore::new());
    harness_with_accounts(store.clone(), store, policy)
}

fn harness_with_accounts(
    store: Arc<MemoryStore>,
    accounts: Arc<dyn CredentialStore>,
    policy: InvitationPolicy,
) -> Harness {
    let clock = Arc::new(ManualClock::new(Utc::now()));
    let service = Arc::new(InvitationService::new(
        store.clone(),
        accounts,
        clock.clone(),
        policy,
        "https://conduz.example/",
    ));
    Harness {
        instructor_sessions: InstructorSessions::new(store.clone(), clock.clone(), Duration::hours(72)),
        student_sessions: StudentSessions::new(store.clone(), clock.clone(), Duration::hours(72)),
        store,
        clock,
        service,
    }
}

fn limited(limit: u32) -> InvitationPolicy {
    InvitationPolicy {
        usage_limit: Some(limit),
        ..InvitationPolicy::default()
    }
}

impl Harness {
    async fn instructor(&self, name: &str) -> (Instructor, InstructorSession) {
        let instructor = self
            .store
            .create_instructor(NewInstructor {
                name: name.to_string(),
                email: format!("{}@conduz.example", Uuid::new_v4()),
                hashed_password: "hash".to_string(),
                slug: derive_slug(name),
                specialty: "Legislação".to_string(),
                bio: String::new(),
            })
            .await
            .unwrap();
        let token = self.instructor_sessions.issue(instructor.id).await.unwrap();
        let session = self.instructor_sessions.verify(&token.token).await.unwrap();
        (instructor, session)
    }

    async fn student(&self, name: &str) -> (Student, StudentSession) {
        let student = self
            .store
            .create_student(NewStudent {
                name: name.to_string(),
                email: format!("{}@conduz.example", Uuid::new_v4()),
                hashed_password: "hash".to_string(),
            })
            .await
            .unwrap();
        let token = self.student_sessions.issue(student.id).await.unwrap();
        let session = self.student_sessions.verify(&token.token).await.unwrap();
        (student, session)
    }

    async fn usage_count(&self, slug: &str, code: &str) -> u32 {
        self.store
            .find_invitation(slug, code)
            .await
            .unwrap()
            .unwrap()
            .usage_count
    }
}

fn rejected(reason: InvitationReason) -> AcceptOutcome {
    AcceptOutcome::Rejected { reason }
}

//=========================================================================================
// Issuance
//=========================================================================================

#[tokio::test]
async fn issue_sets_fresh_state_and_link() {
    let h = harness(InvitationPolicy::default());
    let (instructor, session) = h.instructor("Ana Souza").await;

    let issued = h.service.issue(&session).await.unwrap();
    let inv = &issued.invitation;

    assert_eq!(inv.instructor_id, instructor.id);
    assert_eq!(inv.slug, instructor.slug);
    assert_eq!(inv.code.len(), 43);
    assert!(inv.is_active);
    assert_eq!(inv.usage_count, 0);
    assert_eq!(inv.usage_limit, None);
    assert_eq!(inv.expires_at - inv.created_at, Duration::days(7));
    assert_eq!(
        issued.link,
        format!(
            "https://conduz.example/join-instructor/{}/{}",
            instructor.slug, inv.code
        )
    );

    // Same slug, different code on every issue.
    let second = h.service.issue(&session).await.unwrap();
    assert_eq!(second.invitation.slug, inv.slug);
    assert_ne!(second.invitation.code, inv.code);
}

#[tokio::test]
async fn issue_requires_a_live_session() {
    let h = harness(InvitationPolicy::default());
    let (_, session) = h.instructor("Ana Souza").await;
    h.clock.advance(Duration::hours(73));
    assert!(matches!(
        h.service.issue(&session).await,
        Err(PortError::Unauthorized)
    ));
}

#[tokio::test]
async fn list_mine_only_shows_own_invitations_newest_first() {
    let h = harness(InvitationPolicy::default());
    let (_, ana) = h.instructor("Ana").await;
    let (_, bruno) = h.instructor("Bruno").await;

    let first = h.service.issue(&ana).await.unwrap();
    h.clock.advance(Duration::minutes(5));
    let second = h.service.issue(&ana).await.unwrap();
    h.service.issue(&bruno).await.unwrap();

    let mine = h.service.list_mine(&ana).await.unwrap();
    let codes: Vec<_> = mine.iter().map(|i| i.invitation.code.clone()).collect();
    assert_eq!(codes, vec![second.invitation.code, first.invitation.code]);
    assert!(mine[0].link.ends_with(&mine[0].invitation.code));
}

//=========================================================================================
// Scenarios A-D
//=========================================================================================

#[tokio::test]
async fn scenario_a_unlimited_invitation_validates() {
    let h = harness(InvitationPolicy::default());
    let (instructor, session) = h.instructor("Ana Souza").await;
    let issued = h.service.issue(&session).await.unwrap();

    let outcome = h
        .service
        .validate(&issued.invitation.slug, &issued.invitation.code)
        .await
        .unwrap();
    assert_eq!(
        outcome,
        ValidationOutcome::Usable {
            instructor: instructor.public_profile()
        }
    );
}

#[tokio::test]
async fn scenario_b_validate_reports_expired_after_ttl() {
    let h = harness(InvitationPolicy::default());
    let (_, session) = h.instructor("Ana Souza").await;
    let inv = h.service.issue(&session).await.unwrap().invitation;

    h.clock.advance(Duration::days(7) - Duration::seconds(1));
    assert!(matches!(
        h.service.validate(&inv.slug, &inv.code).await.unwrap(),
        ValidationOutcome::Usable { .. }
    ));

    h.clock.advance(Duration::seconds(1));
    assert_eq!(
        h.service.validate(&inv.slug, &inv.code).await.unwrap(),
        ValidationOutcome::Unusable {
            reason: InvitationReason::Expired
        }
    );

    let (_, student) = h.student("Carla").await;
    assert_eq!(
        h.service.accept(&student, &inv.slug, &inv.code).await.unwrap(),
        rejected(InvitationReason::Expired)
    );
    assert_eq!(h.usage_count(&inv.slug, &inv.code).await, 0);
}

#[tokio::test]
async fn scenario_c_accept_needs_a_student_session_then_links() {
    let h = harness(InvitationPolicy::default());
    let (instructor, ins_session) = h.instructor("Ana Souza").await;
    let inv = h.service.issue(&ins_session).await.unwrap().invitation;

    let (student, session) = h.student("Carla").await;

    // Logged out: the token no longer resolves to a session.
    let stale = h.student_sessions.issue(student.id).await.unwrap();
    h.student_sessions.revoke(&stale.token).await.unwrap();
    assert!(matches!(
        h.student_sessions.verify(&stale.token).await,
        Err(PortError::Unauthorized)
    ));
    // An instructor token is no student session either.
    let ins_token = h.instructor_sessions.issue(instructor.id).await.unwrap();
    assert!(h.student_sessions.verify(&ins_token.token).await.is_err());

    let outcome = h.service.accept(&session, &inv.slug, &inv.code).await.unwrap();
    assert_eq!(
        outcome,
        AcceptOutcome::Linked {
            instructor_id: instructor.id,
            instructor: instructor.public_profile(),
        }
    );
    let student = h.store.get_student(student.id).await.unwrap();
    assert_eq!(student.linked_instructor_id, Some(instructor.id));
    assert_eq!(h.usage_count(&inv.slug, &inv.code).await, 1);
}

#[tokio::test]
async fn accept_with_an_expired_session_is_unauthorized() {
    let h = harness(InvitationPolicy::default());
    let (_, ins_session) = h.instructor("Ana Souza").await;
    let inv = h.service.issue(&ins_session).await.unwrap().invitation;
    let (_, session) = h.student("Carla").await;

    h.clock.advance(Duration::hours(72));
    assert!(matches!(
        h.service.accept(&session, &inv.slug, &inv.code).await,
        Err(PortError::Unauthorized)
    ));
    assert_eq!(h.usage_count(&inv.slug, &inv.code).await, 0);
}

#[tokio::test]
async fn scenario_d_revoked_invitation_fails_accept() {
    let h = harness(InvitationPolicy::default());
    let (_, ins_session) = h.instructor("Ana Souza").await;
    let inv = h.service.issue(&ins_session).await.unwrap().invitation;

    // The student saw a usable invitation on the landing page...
    assert!(matches!(
        h.service.validate(&inv.slug, &inv.code).await.unwrap(),
        ValidationOutcome::Usable { .. }
    ));
    // ...then the instructor revoked it.
    let revoked = h.service.revoke(&ins_session, &inv.slug, &inv.code).await.unwrap();
    assert!(!revoked.is_active);

    let (student, session) = h.student("Carla").await;
    assert_eq!(
        h.service.accept(&session, &inv.slug, &inv.code).await.unwrap(),
        rejected(InvitationReason::Revoked)
    );
    assert_eq!(
        h.store.get_student(student.id).await.unwrap().linked_instructor_id,
        None
    );
}

//=========================================================================================
// Properties
//=========================================================================================

#[tokio::test]
async fn revocation_is_monotonic() {
    let h = harness(InvitationPolicy::default());
    let (_, ins_session) = h.instructor("Ana Souza").await;
    let inv = h.service.issue(&ins_session).await.unwrap().invitation;

    h.service.revoke(&ins_session, &inv.slug, &inv.code).await.unwrap();
    // Revoking twice is harmless and keeps it revoked.
    let again = h.service.revoke(&ins_session, &inv.slug, &inv.code).await.unwrap();
    assert!(!again.is_active);

    for _ in 0..3 {
        let (_, session) = h.student("Carla").await;
        assert_eq!(
            h.service.accept(&session, &inv.slug, &inv.code).await.unwrap(),
            rejected(InvitationReason::Revoked)
        );
        assert_eq!(
            h.service.validate(&inv.slug, &inv.code).await.unwrap(),
            ValidationOutcome::Unusable {
                reason: InvitationReason::Revoked
            }
        );
    }

    // Still reported as revoked rather than expired once the TTL passes.
    h.clock.advance(Duration::days(30));
    assert_eq!(
        h.service.validate(&inv.slug, &inv.code).await.unwrap(),
        ValidationOutcome::Unusable {
            reason: InvitationReason::Revoked
        }
    );
}

#[tokio::test]
async fn revoke_checks_ownership_and_existence() {
    let h = harness(InvitationPolicy::default());
    let (_, ana) = h.instructor("Ana").await;
    let (_, bruno) = h.instructor("Bruno").await;
    let inv = h.service.issue(&ana).await.unwrap().invitation;

    assert!(matches!(
        h.service.revoke(&bruno, &inv.slug, &inv.code).await,
        Err(PortError::Forbidden)
    ));
    assert!(matches!(
        h.service.revoke(&ana, &inv.slug, "no-such-code").await,
        Err(PortError::NotFound(_))
    ));
    assert!(matches!(
        h.service.validate(&inv.slug, &inv.code).await.unwrap(),
        ValidationOutcome::Usable { .. }
    ));
}

#[tokio::test]
async fn validate_never_mutates() {
    let h = harness(limited(1));
    let (_, ins_session) = h.instructor("Ana Souza").await;
    let inv = h.service.issue(&ins_session).await.unwrap().invitation;

    for _ in 0..50 {
        h.service.validate(&inv.slug, &inv.code).await.unwrap();
    }
    let stored = h.store.find_invitation(&inv.slug, &inv.code).await.unwrap().unwrap();
    assert_eq!(stored.usage_count, 0);
    assert!(stored.is_active);

    let (_, session) = h.student("Carla").await;
    assert!(h
        .service
        .accept(&session, &inv.slug, &inv.code)
        .await
        .unwrap()
        .is_linked());

    for _ in 0..50 {
        assert_eq!(
            h.service.validate(&inv.slug, &inv.code).await.unwrap(),
            ValidationOutcome::Unusable {
                reason: InvitationReason::UsageExceeded
            }
        );
    }
    assert_eq!(h.usage_count(&inv.slug, &inv.code).await, 1);
}

#[tokio::test]
async fn unknown_pairs_are_not_found() {
    let h = harness(InvitationPolicy::default());
    let (_, ins_session) = h.instructor("Ana Souza").await;
    let inv = h.service.issue(&ins_session).await.unwrap().invitation;

    assert_eq!(
        h.service.validate("someone-else", &inv.code).await.unwrap(),
        ValidationOutcome::Unusable {
            reason: InvitationReason::NotFound
        }
    );
    let (_, session) = h.student("Carla").await;
    assert_eq!(
        h.service.accept(&session, &inv.slug, "guess").await.unwrap(),
        rejected(InvitationReason::NotFound)
    );
}

#[tokio::test]
async fn limit_of_three_admits_three_students() {
    let h = harness(limited(3));
    let (instructor, ins_session) = h.instructor("Ana Souza").await;
    let inv = h.service.issue(&ins_session).await.unwrap().invitation;
    assert_eq!(inv.usage_limit, Some(3));

    for name in ["Carla", "Davi", "Elisa"] {
        let (student, session) = h.student(name).await;
        assert!(h
            .service
            .accept(&session, &inv.slug, &inv.code)
            .await
            .unwrap()
            .is_linked());
        assert_eq!(
            h.store.get_student(student.id).await.unwrap().linked_instructor_id,
            Some(instructor.id)
        );
    }

    let (_, fourth) = h.student("Fábio").await;
    assert_eq!(
        h.service.accept(&fourth, &inv.slug, &inv.code).await.unwrap(),
        rejected(InvitationReason::UsageExceeded)
    );
    assert_eq!(h.usage_count(&inv.slug, &inv.code).await, 3);
    assert_eq!(
        h.store
            .list_students_by_instructor(instructor.id)
            .await
            .unwrap()
            .len(),
        3
    );
}

async fn race(limit: u32, contenders: usize) -> (usize, Vec<AcceptOutcome>, u32) {
    let h = harness(limited(limit));
    let (_, ins_session) = h.instructor("Ana Souza").await;
    let inv = h.service.issue(&ins_session).await.unwrap().invitation;

    let barrier = Arc::new(Barrier::new(contenders));
    let mut handles = Vec::with_capacity(contenders);
    for i in 0..contenders {
        let (_, session) = h.student(&format!("Student {}", i)).await;
        let service = h.service.clone();
        let barrier = barrier.clone();
        let (slug, code) = (inv.slug.clone(), inv.code.clone());
        handles.push(tokio::spawn(async move {
            barrier.wait().await;
            service.accept(&session, &slug, &code).await
        }));
    }

    let mut outcomes = Vec::with_capacity(contenders);
    for handle in handles {
        outcomes.push(handle.await.unwrap().unwrap());
    }
    let linked = outcomes.iter().filter(|o| o.is_linked()).count();
    let count = h.usage_count(&inv.slug, &inv.code).await;
    (linked, outcomes, count)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn concurrent_accepts_of_a_single_use_invitation_admit_exactly_one() {
    for _ in 0..20 {
        let (linked, outcomes, count) = race(1, 16).await;
        assert_eq!(linked, 1);
        assert_eq!(count, 1);
        for outcome in outcomes.iter().filter(|o| !o.is_linked()) {
            assert_eq!(outcome, &rejected(InvitationReason::UsageExceeded));
        }
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn concurrent_accepts_never_exceed_the_limit() {
    let (linked, _, count) = race(5, 40).await;
    assert_eq!(linked, 5);
    assert_eq!(count, 5);
}

//=========================================================================================
// Re-linking policy
//=========================================================================================

#[tokio::test]
async fn reject_policy_refuses_a_second_instructor() {
    let h = harness(InvitationPolicy::default());
    let (ana, ana_session) = h.instructor("Ana").await;
    let (_, bruno_session) = h.instructor("Bruno").await;
    let from_ana = h.service.issue(&ana_session).await.unwrap().invitation;
    let from_bruno = h.service.issue(&bruno_session).await.unwrap().invitation;

    let (student, session) = h.student("Carla").await;
    assert!(h
        .service
        .accept(&session, &from_ana.slug, &from_ana.code)
        .await
        .unwrap()
        .is_linked());
    assert_eq!(
        h.service
            .accept(&session, &from_bruno.slug, &from_bruno.code)
            .await
            .unwrap(),
        rejected(InvitationReason::AlreadyLinked)
    );

    assert_eq!(
        h.store.get_student(student.id).await.unwrap().linked_instructor_id,
        Some(ana.id)
    );
    assert_eq!(h.usage_count(&from_bruno.slug, &from_bruno.code).await, 0);
}

#[tokio::test]
async fn overwrite_policy_moves_the_student() {
    let h = harness(InvitationPolicy {
        relink: RelinkPolicy::Overwrite,
        ..InvitationPolicy::default()
    });
    let (_, ana_session) = h.instructor("Ana").await;
    let (bruno, bruno_session) = h.instructor("Bruno").await;
    let from_ana = h.service.issue(&ana_session).await.unwrap().invitation;
    let from_bruno = h.service.issue(&bruno_session).await.unwrap().invitation;

    let (student, session) = h.student("Carla").await;
    h.service
        .accept(&session, &from_ana.slug, &from_ana.code)
        .await
        .unwrap();
    let outcome = h
        .service
        .accept(&session, &from_bruno.slug, &from_bruno.code)
        .await
        .unwrap();

    assert_eq!(
        outcome,
        AcceptOutcome::Linked {
            instructor_id: bruno.id,
            instructor: bruno.public_profile(),
        }
    );
    assert_eq!(
        h.store.get_student(student.id).await.unwrap().linked_instructor_id,
        Some(bruno.id)
    );
    assert_eq!(h.usage_count(&from_bruno.slug, &from_bruno.code).await, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn racing_two_invitations_links_once_and_releases_the_loser() {
    for _ in 0..20 {
        let h = harness(InvitationPolicy::default());
        let (_, ana_session) = h.instructor("Ana").await;
        let (_, bruno_session) = h.instructor("Bruno").await;
        let a = h.service.issue(&ana_session).await.unwrap().invitation;
        let b = h.service.issue(&bruno_session).await.unwrap().invitation;
        let (_, session) = h.student("Carla").await;

        let barrier = Arc::new(Barrier::new(2));
        let mut handles = Vec::new();
        for inv in [a.clone(), b.clone()] {
            let (service, barrier, session) = (h.service.clone(), barrier.clone(), session.clone());
            handles.push(tokio::spawn(async move {
                barrier.wait().await;
                service.accept(&session, &inv.slug, &inv.code).await
            }));
        }
        let mut linked = 0;
        for handle in handles {
            match handle.await.unwrap().unwrap() {
                AcceptOutcome::Linked { .. } => linked += 1,
                other => assert_eq!(other, rejected(InvitationReason::AlreadyLinked)),
            }
        }
        assert_eq!(linked, 1);
        let total = h.usage_count(&a.slug, &a.code).await + h.usage_count(&b.slug, &b.code).await;
        assert_eq!(total, 1);
    }
}

//=========================================================================================
// Link-write failure
//=========================================================================================

/// Delegates to the memory store but cannot write links.
struct BrokenLinks(Arc<MemoryStore>);

#[async_trait]
impl CredentialStore for BrokenLinks {
    async fn create_instructor(&self, new: NewInstructor) -> PortResult<Instructor> {
        self.0.create_instructor(new).await
    }
    async fn get_instructor(&self, instructor_id: Uuid) -> PortResult<Instructor> {
        self.0.get_instructor(instructor_id).await
    }
    async fn get_instructor_credentials(&self, email: &str) -> PortResult<AccountCredentials> {
        self.0.get_instructor_credentials(email).await
    }
    async fn create_student(&self, new: NewStudent) -> PortResult<Student> {
        self.0.create_student(new).await
    }
    async fn get_student(&self, student_id: Uuid) -> PortResult<Student> {
        self.0.get_student(student_id).await
    }
    async fn get_student_credentials(&self, email: &str) -> PortResult<AccountCredentials> {
        self.0.get_student_credentials(email).await
    }
    async fn list_students_by_instructor(&self, instructor_id: Uuid) -> PortResult<Vec<Student>> {
        self.0.list_students_by_instructor(instructor_id).await
    }
    async fn link_student(&self, _: Uuid, _: Uuid, _: bool) -> PortResult<bool> {
        Err(PortError::Unexpected("connection reset".to_string()))
    }
}

#[tokio::test]
async fn failed_link_write_releases_the_usage() {
    let store = Arc::new(MemoryStore::new());
    let h = harness_with_accounts(store.clone(), Arc::new(BrokenLinks(store)), limited(1));
    let (_, ins_session) = h.instructor("Ana Souza").await;
    let inv = h.service.issue(&ins_session).await.unwrap().invitation;
    let (student, session) = h.student("Carla").await;

    assert!(matches!(
        h.service.accept(&session, &inv.slug, &inv.code).await,
        Err(PortError::Unexpected(_))
    ));
    assert_eq!(h.usage_count(&inv.slug, &inv.code).await, 0);
    assert_eq!(
        h.store.get_student(student.id).await.unwrap().linked_instructor_id,
        None
    );
    // The single use is still available.
    assert!(matches!(
        h.service.validate(&inv.slug, &inv.code).await.unwrap(),
        ValidationOutcome::Usable { .. }
    ));
}

#[tokio::test]
async fn repeat_accept_under_overwrite_does_not_spend_a_usage() {
    let h = harness(InvitationPolicy {
        usage_limit: Some(2),
        relink: RelinkPolicy::Overwrite,
        ..InvitationPolicy::default()
    });
    let (ana, ana_session) = h.instructor("Ana").await;
    let inv = h.service.issue(&ana_session).await.unwrap().invitation;
    let linked = AcceptOutcome::Linked {
        instructor_id: ana.id,
        instructor: ana.public_profile(),
    };

    let (_, carla) = h.student("Carla").await;
    assert_eq!(h.service.accept(&carla, &inv.slug, &inv.code).await.unwrap(), linked);
    assert_eq!(h.service.accept(&carla, &inv.slug, &inv.code).await.unwrap(), linked);
    assert_eq!(h.usage_count(&inv.slug, &inv.code).await, 1);

    // The second usage is still there for someone else.
    let (_, dora) = h.student("Dora").await;
    assert_eq!(h.service.accept(&dora, &inv.slug, &inv.code).await.unwrap(), linked);
    assert_eq!(h.usage_count(&inv.slug, &inv.code).await, 2);

    // Once exhausted, the existing link is still reported for a retry.
    assert_eq!(h.service.accept(&carla, &inv.slug, &inv.code).await.unwrap(), linked);
    assert_eq!(h.usage_count(&inv.slug, &inv.code).await, 2);
}

#[tokio::test]
async fn repeat_accept_of_a_revoked_invitation_is_still_refused() {
    let h = harness(InvitationPolicy {
        relink: RelinkPolicy::Overwrite,
        ..InvitationPolicy::default()
    });
    let (_, ana_session) = h.instructor("Ana").await;
    let inv = h.service.issue(&ana_session).await.unwrap().invitation;
    let (_, carla) = h.student("Carla").await;
    assert!(h
        .service
        .accept(&carla, &inv.slug, &inv.code)
        .await
        .unwrap()
        .is_linked());

    h.service
        .revoke(&ana_session, &inv.slug, &inv.code)
        .await
        .unwrap();
    assert_eq!(
        h.service.accept(&carla, &inv.slug, &inv.code).await.unwrap(),
        rejected(InvitationReason::Revoked)
    );
    assert_eq!(h.usage_count(&inv.slug, &inv.code).await, 1);
}
