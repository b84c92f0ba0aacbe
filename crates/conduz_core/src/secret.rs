//! crates/conduz_core/src/secret.rs
//!
//! Generation of unguessable bearer values (invitation codes, session tokens).

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use rand::{rngs::OsRng, RngCore};

/// Number of random bytes behind every generated secret (256 bits).
pub const SECRET_BYTES: usize = 32;

/// A URL-safe secret drawn from the operating system's CSPRNG.
pub fn generate_secret() -> String {
    let mut bytes = [0u8; SECRET_BYTES];
    OsRng.fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}
