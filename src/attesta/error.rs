//! Error taxonomy surfaced by the authentication service.
//!
//! Credential, assertion, and staged-token failures are user-recoverable and
//! deliberately vague about which check failed. Store unavailability is its
//! own error so the boundary never mistakes an outage for bad credentials.

use thiserror::Error;

use crate::keysigner::IssueError;
use crate::store::StoreError;

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("invalid credentials")]
    InvalidCredentials,
    #[error("malformed email address")]
    MalformedEmail,
    #[error("invalid assertion")]
    InvalidAssertion,
    #[error("invalid or expired token")]
    InvalidOrExpiredToken,
    #[error("no active session")]
    NoActiveSession,
    #[error("backing store unavailable")]
    StoreUnavailable(#[from] StoreError),
    #[error("certificate issuance failed")]
    IssuanceFailed(#[from] IssueError),
    #[error("password hashing failed")]
    Hashing(#[from] password_hash::Error),
    #[error("failed to generate staged token")]
    TokenGeneration(#[from] rand::Error),
}
