//! services/api/src/web/state.rs
//!
//! Defines the application's shared state.

use crate::config::Config;
use conduz_core::ports::{
    Clock, CredentialStore, InstructorSessionStore, InvitationStore, StudentSessionStore,
};
use conduz_core::{InstructorSessions, InvitationService, StudentSessions};
use std::sync::Arc;

//=========================================================================================
// AppState (Shared Across All Requests)
//=========================================================================================

/// The shared application state, created once at startup and passed to all handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub accounts: Arc<dyn CredentialStore>,
    pub invitations: Arc<InvitationService>,
    pub instructor_sessions: Arc<InstructorSessions>,
    pub student_sessions: Arc<StudentSessions>,
}

/// The storage ports the state is assembled from.
pub struct Stores {
    pub invitations: Arc<dyn InvitationStore>,
    pub accounts: Arc<dyn CredentialStore>,
    pub instructor_sessions: Arc<dyn InstructorSessionStore>,
    pub student_sessions: Arc<dyn StudentSessionStore>,
}

impl Stores {
    /// Every port served by one adapter that implements them all.
    pub fn from_adapter<A>(adapter: Arc<A>) -> Self
    where
        A: InvitationStore + CredentialStore + InstructorSessionStore + StudentSessionStore + 'static,
    {
        Self {
            invitations: adapter.clone(),
            accounts: adapter.clone(),
            instructor_sessions: adapter.clone(),
            student_sessions: adapter,
        }
    }
}

impl AppState {
    pub fn new(config: Arc<Config>, stores: Stores, clock: Arc<dyn Clock>) -> Self {
        let invitations = Arc::new(InvitationService::new(
            stores.invitations,
            stores.accounts.clone(),
            clock.clone(),
            config.invitation_policy(),
            config.public_base_url.clone(),
        ));
        let instructor_sessions = Arc::new(InstructorSessions::new(
            stores.instructor_sessions,
            clock.clone(),
            config.session_ttl,
        ));
        let student_sessions = Arc::new(StudentSessions::new(
            stores.student_sessions,
            clock,
            config.session_ttl,
        ));

        Self {
            config,
            accounts: stores.accounts,
            invitations,
            instructor_sessions,
            student_sessions,
        }
    }
}
