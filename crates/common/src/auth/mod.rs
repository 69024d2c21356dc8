//! Authentication utilities
//!
//! Provides:
//! - Plugin token validation (constant-time, over SHA-256 digests)
//! - Axum middleware guarding the plugin routes
//! - Argon2 password hashing for tenant credentials

use crate::config::AuthConfig;
use crate::errors::{AppError, Result};
use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use axum::{
    extract::{Request, State},
    http::HeaderMap,
    middleware::Next,
    response::Response,
};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use tracing::warn;

/// Header carrying the plugin secret unless configured otherwise
pub const DEFAULT_PLUGIN_TOKEN_HEADER: &str = "x-plugin-token";

fn digest(value: &str) -> [u8; 32] {
    Sha256::digest(value.as_bytes()).into()
}

/// Compare two digests without an early exit
fn constant_time_eq(a: &[u8; 32], b: &[u8; 32]) -> bool {
    a.iter().zip(b.iter()).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

/// Validates the shared plugin secret.
///
/// Only the digest of the configured token is kept in memory.
#[derive(Clone)]
pub struct PluginAuthenticator {
    expected: Arc<[u8; 32]>,
    header: String,
}

impl std::fmt::Debug for PluginAuthenticator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginAuthenticator")
            .field("header", &self.header)
            .finish_non_exhaustive()
    }
}

impl PluginAuthenticator {
    pub fn new(token: &str, header: &str) -> Self {
        let header = if header.is_empty() {
            DEFAULT_PLUGIN_TOKEN_HEADER
        } else {
            header
        };

        Self {
            expected: Arc::new(digest(token)),
            header: header.to_ascii_lowercase(),
        }
    }

    pub fn from_config(config: &AuthConfig) -> Self {
        Self::new(&config.plugin_token, &config.plugin_token_header)
    }

    pub fn header_name(&self) -> &str {
        &self.header
    }

    /// Check a presented token against the configured one
    pub fn verify(&self, presented: &str) -> bool {
        constant_time_eq(&self.expected, &digest(presented))
    }

    /// Validate the token carried by a request's headers
    pub fn authorize(&self, headers: &HeaderMap) -> Result<()> {
        let presented = headers
            .get(self.header.as_str())
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default();

        if self.verify(presented) {
            Ok(())
        } else {
            Err(AppError::InvalidPluginToken)
        }
    }
}

/// Middleware rejecting plugin requests without a valid token.
///
/// Install with `axum::middleware::from_fn_with_state(authenticator, plugin_auth_middleware)`.
pub async fn plugin_auth_middleware(
    State(auth): State<PluginAuthenticator>,
    request: Request,
    next: Next,
) -> std::result::Result<Response, AppError> {
    if let Err(err) = auth.authorize(request.headers()) {
        crate::metrics::record_plugin_auth_failure();
        warn!(
            path = %request.uri().path(),
            "Rejected plugin request with missing or invalid token"
        );
        return Err(err);
    }

    Ok(next.run(request).await)
}

/// Hash a tenant password into a PHC string
pub fn hash_password(password: &str) -> Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| AppError::Internal {
            message: format!("Failed to hash password: {}", e),
        })
}

/// Verify a password against a stored PHC string; malformed hashes never match
pub fn verify_password(password: &str, stored_hash: &str) -> bool {
    match PasswordHash::new(stored_hash) {
        Ok(parsed) => Argon2::default()
            .verify_password(password.as_bytes(), &parsed)
            .is_ok(),
        Err(_) => false,
    }
}
