//! The `verify(token) -> {owner_id, device_id, roles}` adapter boundary.
//!
//! Real deployments swap [`SharedSecretVerifier`] for a call into whatever
//! identity provider issues their tokens (OAuth introspection, a JWT decode,
//! a session lookup). The server only depends on the [`TokenVerifier`] trait,
//! never on a specific scheme.

use vectorsync_engine::{DeviceId, OwnerId};

use crate::error::{AppError, Result};

/// The identity a verified token resolves to.
#[derive(Debug, Clone)]
pub struct AuthContext {
    pub owner_id: OwnerId,
    pub device_id: DeviceId,
    pub roles: Vec<String>,
}

/// Resolves a bearer token to an [`AuthContext`].
pub trait TokenVerifier: Send + Sync {
    fn verify(&self, token: &str) -> Result<AuthContext>;
}

/// A minimal stand-in verifier: tokens are `owner_id:device_id` pairs,
/// optionally suffixed with a shared secret (`owner_id:device_id:secret`)
/// when one is configured. This is intentionally unsophisticated — it
/// exists to exercise the adapter boundary, not to be a production auth
/// scheme.
pub struct SharedSecretVerifier {
    secret: Option<String>,
}

impl SharedSecretVerifier {
    pub fn new(secret: Option<String>) -> Self {
        Self { secret }
    }
}

impl TokenVerifier for SharedSecretVerifier {
    fn verify(&self, token: &str) -> Result<AuthContext> {
        let mut parts = token.splitn(3, ':');
        let owner_id = parts.next().filter(|s| !s.is_empty());
        let device_id = parts.next().filter(|s| !s.is_empty());
        let presented_secret = parts.next();

        let (Some(owner_id), Some(device_id)) = (owner_id, device_id) else {
            return Err(AppError::Unauthorized);
        };

        if let Some(expected) = &self.secret {
            if presented_secret != Some(expected.as_str()) {
                return Err(AppError::Unauthorized);
            }
        }

        Ok(AuthContext {
            owner_id: owner_id.to_string(),
            device_id: device_id.to_string(),
            roles: vec!["device".to_string()],
        })
    }
}
