//! Backing-store boundary.
//!
//! The service talks to durability through [`StoreConnection`], one handle
//! per pooled connection. A handle is expected to tolerate concurrent use;
//! the pool hands the same handle to several callers and does not serialize
//! access. Store unavailability is its own error, never conflated with bad
//! credentials, and the core never retries.

pub mod memory;
pub mod pool;
pub mod postgres;

use async_trait::async_trait;
use serde::Serialize;
use std::collections::BTreeMap;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store query failed: {0}")]
    Query(#[from] sqlx::Error),
    #[error("store connection is closed")]
    Closed,
    #[error("store connection failed to close: {0}")]
    Shutdown(String),
    #[error("corrupt store record: {0}")]
    Corrupt(&'static str),
}

/// Whether an address is certified by its own domain or managed locally.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EmailKind {
    Primary,
    Secondary,
}

impl EmailKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Primary => "primary",
            Self::Secondary => "secondary",
        }
    }

    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "primary" => Some(Self::Primary),
            "secondary" => Some(Self::Secondary),
            _ => None,
        }
    }
}

/// What a staged token, once confirmed, will do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StagedKind {
    NewAccount,
    PasswordReset,
}

impl StagedKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::NewAccount => "new_account",
            Self::PasswordReset => "password_reset",
        }
    }

    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "new_account" => Some(Self::NewAccount),
            "password_reset" => Some(Self::PasswordReset),
            _ => None,
        }
    }
}

/// Account row as seen through one of its email addresses.
#[derive(Debug, Clone)]
pub struct UserRecord {
    pub id: i64,
    pub email: String,
    /// PHC string; absent for primary-only accounts.
    pub password_hash: Option<String>,
    pub verified: bool,
    pub kind: EmailKind,
}

/// Per-address properties returned by `list_emails`.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct EmailProperties {
    #[serde(rename = "type")]
    pub kind: EmailKind,
    pub verified: bool,
}

/// A pending account-creation or password-reset action, keyed by the hash of
/// its single-use token. The raw token only ever travels out-of-band.
#[derive(Debug, Clone)]
pub struct StagedRecord {
    pub token_hash: Vec<u8>,
    pub email: String,
    pub kind: StagedKind,
    pub password_hash: Option<String>,
    pub site_origin: String,
    pub created_at_ms: i64,
}

/// One backing-store handle.
#[async_trait]
pub trait StoreConnection: Send + Sync {
    async fn lookup_user(&self, email: &str) -> Result<Option<UserRecord>, StoreError>;

    /// Create an account owning `email`; returns the new user id.
    async fn create_user(
        &self,
        email: &str,
        password_hash: Option<&str>,
        kind: EmailKind,
        verified: bool,
    ) -> Result<i64, StoreError>;

    async fn list_emails(
        &self,
        user_id: i64,
    ) -> Result<BTreeMap<String, EmailProperties>, StoreError>;

    async fn update_password(&self, user_id: i64, password_hash: &str) -> Result<(), StoreError>;

    async fn mark_verified(&self, email: &str) -> Result<(), StoreError>;

    async fn insert_staged(&self, staged: StagedRecord) -> Result<(), StoreError>;

    /// Atomically remove and return the staged record for `token_hash`.
    /// A second call with the same hash returns `None`; that is the
    /// single-use guarantee.
    async fn consume_staged(&self, token_hash: &[u8]) -> Result<Option<StagedRecord>, StoreError>;

    async fn ping(&self) -> Result<(), StoreError>;

    /// Close the handle. Idempotent; used only by pool shutdown.
    async fn close(&self) -> Result<(), StoreError>;
}
