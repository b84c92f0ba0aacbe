pub mod clock;
pub mod domain;
pub mod invitations;
pub mod memory;
pub mod ports;
pub mod secret;
pub mod sessions;

pub use clock::{ManualClock, SystemClock};
pub use domain::{
    AccountCredentials, Instructor, InstructorProfile, Invitation, InvitationReason,
    NewInstructor, NewStudent, PersistenceScope, Role, SessionRecord, Student,
};
pub use invitations::{
    AcceptOutcome, InvitationPolicy, InvitationService, IssuedInvitation, RelinkPolicy,
    ValidationOutcome,
};
pub use memory::MemoryStore;
pub use ports::{
    Clock, CredentialStore, InstructorSessionStore, InvitationStore, PortError, PortResult,
    StudentSessionStore,
};
pub use sessions::{
    InstructorSession, InstructorSessions, IssuedToken, StudentSession, StudentSessions,
};
