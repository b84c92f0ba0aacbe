pub mod auth;
pub mod invitations;
pub mod middleware;
pub mod profiles;
pub mod rest;
pub mod routes;
pub mod state;

// Re-export the router builder so binaries and tests can reach it directly.
pub use middleware::{require_instructor, require_student};
pub use routes::build_router;
