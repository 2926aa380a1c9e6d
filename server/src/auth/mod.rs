//! Authentication: the token verification adapter and its axum extractors.

mod middleware;
mod verifier;

pub use middleware::OptionalAuthContext;
pub use verifier::{AuthContext, SharedSecretVerifier, TokenVerifier};
