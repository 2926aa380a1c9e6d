//! Authentication middleware.
//!
//! Extracts an [`AuthContext`] from the `Authorization` header by handing the
//! bearer token to the configured [`TokenVerifier`].

use axum::{
    extract::FromRequestParts,
    http::{header::AUTHORIZATION, request::Parts, StatusCode},
};

use super::verifier::AuthContext;
use crate::AppState;

impl FromRequestParts<AppState> for AuthContext {
    type Rejection = (StatusCode, &'static str);

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let auth_header = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|value| value.to_str().ok());

        let token = match auth_header {
            Some(header) if header.starts_with("Bearer ") => {
                header.trim_start_matches("Bearer ").to_string()
            }
            Some(_) => return Err((StatusCode::UNAUTHORIZED, "invalid authorization header format")),
            None => return Err((StatusCode::UNAUTHORIZED, "missing authorization header")),
        };

        state
            .verifier
            .verify(&token)
            .map_err(|_| (StatusCode::UNAUTHORIZED, "invalid or expired token"))
    }
}

/// Optional authenticated context — doesn't reject if missing or invalid.
#[derive(Debug, Clone)]
pub struct OptionalAuthContext(pub Option<AuthContext>);

impl FromRequestParts<AppState> for OptionalAuthContext {
    type Rejection = (StatusCode, &'static str);

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        match AuthContext::from_request_parts(parts, state).await {
            Ok(ctx) => Ok(OptionalAuthContext(Some(ctx))),
            Err(_) => Ok(OptionalAuthContext(None)),
        }
    }
}
