//! Token verification at the WebSocket door.
//!
//! Identity is an external collaborator's concern: the session manager only
//! ever sees an already-verified [`PrincipalId`]. [`TokenVerifier`] is the
//! seam; [`JwtVerifier`] is the default implementation, checking the HS256
//! JWT the client passes as a query parameter and extracting the `sub`
//! claim as the principal.

use jsonwebtoken::{Algorithm, DecodingKey, Validation};
use relay_core::PrincipalId;
use serde::Deserialize;
use thiserror::Error;

/// Token verification failure. Rejected before the WebSocket upgrade.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum AuthError {
    /// The token is malformed, has a bad signature, or is expired.
    #[error("invalid or expired token")]
    InvalidToken,
    /// The token verified but carries no subject claim.
    #[error("token has no subject claim")]
    MissingSubject,
}

/// Maps a bearer token to the principal it identifies, or rejects it.
pub trait TokenVerifier: Send + Sync {
    /// Verify `token` and return the owning principal.
    fn verify(&self, token: &str) -> Result<PrincipalId, AuthError>;
}

#[derive(Debug, Deserialize)]
struct Claims {
    sub: Option<String>,
}

/// HS256 JWT verifier.
pub struct JwtVerifier {
    decoding_key: DecodingKey,
    validation: Validation,
}

impl JwtVerifier {
    /// Create a verifier from the shared HMAC secret.
    #[must_use]
    pub fn new(secret: &str) -> Self {
        Self {
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            validation: Validation::new(Algorithm::HS256),
        }
    }
}

impl TokenVerifier for JwtVerifier {
    fn verify(&self, token: &str) -> Result<PrincipalId, AuthError> {
        let data = jsonwebtoken::decode::<Claims>(token, &self.decoding_key, &self.validation)
            .map_err(|_| AuthError::InvalidToken)?;
        data.claims
            .sub
            .map(PrincipalId::from_string)
            .ok_or(AuthError::MissingSubject)
    }
}
