//! The authentication service.
//!
//! Orchestrates password and assertion authentication, the staged
//! account-creation and password-reset flows, session prolongation, and
//! certificate issuance. Session state lives entirely in the caller-held
//! cookie; the service holds only its collaborators and policy.

use std::collections::BTreeMap;
use std::sync::{Arc, OnceLock};

use base64ct::{Base64UrlUnpadded, Encoding};
use chrono::Utc;
use rand::{rngs::OsRng, RngCore};
use regex::Regex;
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::keysigner::assertion::Assertion;
use crate::keysigner::{decode_public_key, KeySigner, SignedCertificate};
use crate::primary::{email_domain, PrimaryDelegationClient};
use crate::session::{AuthMethod, Session, SessionPolicy};
use crate::store::pool::ConnectionPool;
use crate::store::{EmailKind, EmailProperties, StagedKind, StagedRecord};

use super::error::AuthError;
use super::password;

/// Staged tokens are honored for 15 minutes.
pub const DEFAULT_STAGED_TTL_MS: u64 = 900_000;

/// Service-wide policy knobs.
#[derive(Debug, Clone)]
pub struct ServicePolicy {
    pub session: SessionPolicy,
    pub staged_ttl_ms: u64,
    /// Expected assertion audience; `None` skips the check (single-audience
    /// deployments behind a fixed origin).
    pub audience: Option<String>,
    pub secure_cookies: bool,
}

impl Default for ServicePolicy {
    fn default() -> Self {
        Self {
            session: SessionPolicy::default(),
            staged_ttl_ms: DEFAULT_STAGED_TTL_MS,
            audience: None,
            secure_cookies: false,
        }
    }
}

impl ServicePolicy {
    #[must_use]
    pub fn with_session(mut self, session: SessionPolicy) -> Self {
        self.session = session;
        self
    }

    #[must_use]
    pub fn with_staged_ttl_ms(mut self, ms: u64) -> Self {
        self.staged_ttl_ms = ms;
        self
    }

    #[must_use]
    pub fn with_audience(mut self, audience: String) -> Self {
        self.audience = Some(audience);
        self
    }

    #[must_use]
    pub fn with_secure_cookies(mut self, secure: bool) -> Self {
        self.secure_cookies = secure;
        self
    }
}

pub struct AuthService {
    pool: Arc<ConnectionPool>,
    primary: Arc<PrimaryDelegationClient>,
    signer: KeySigner,
    policy: ServicePolicy,
}

impl AuthService {
    #[must_use]
    pub fn new(
        pool: Arc<ConnectionPool>,
        primary: Arc<PrimaryDelegationClient>,
        signer: KeySigner,
        policy: ServicePolicy,
    ) -> Self {
        Self {
            pool,
            primary,
            signer,
            policy,
        }
    }

    #[must_use]
    pub fn pool(&self) -> &ConnectionPool {
        &self.pool
    }

    #[must_use]
    pub fn policy(&self) -> &ServicePolicy {
        &self.policy
    }

    /// Authenticate a secondary account by password.
    ///
    /// # Errors
    ///
    /// `InvalidCredentials` for an unknown account, a password-less account,
    /// or a mismatch; `StoreUnavailable` when the lookup itself fails.
    pub async fn authenticate_with_password(
        &self,
        email: &str,
        pass: &str,
        ephemeral: bool,
    ) -> Result<Session, AuthError> {
        let user = self
            .pool
            .acquire()
            .lookup_user(email)
            .await?
            .ok_or(AuthError::InvalidCredentials)?;
        let stored = user
            .password_hash
            .as_deref()
            .ok_or(AuthError::InvalidCredentials)?;
        if !password::verify_password(pass, stored) {
            return Err(AuthError::InvalidCredentials);
        }

        debug!("password authentication for user {}", user.id);
        Ok(Session::issue(
            user.id,
            ephemeral,
            AuthMethod::Password,
            &self.policy.session,
            now_ms(),
        ))
    }

    /// Authenticate with a signed assertion instead of a password.
    ///
    /// If the principal's domain publishes primary support, the certificate
    /// chain is checked against that domain's key and the account is created
    /// lazily on first sight. Otherwise the certificate must come from this
    /// service's own issuer key and the address must already be verified.
    ///
    /// # Errors
    ///
    /// Every validation failure folds into `InvalidAssertion`.
    pub async fn authenticate_with_assertion(
        &self,
        assertion: &str,
        ephemeral: bool,
    ) -> Result<Session, AuthError> {
        let assertion = Assertion::parse(assertion).map_err(|_| AuthError::InvalidAssertion)?;
        let preview = assertion
            .peek_certificate()
            .map_err(|_| AuthError::InvalidAssertion)?;
        let principal = preview.principal;
        let domain = email_domain(&principal).ok_or(AuthError::InvalidAssertion)?;
        let audience = self.policy.audience.as_deref();
        let now = now_ms();

        let subject = if let Some(document) = self.primary.support_document(domain).await {
            let domain_key = decode_public_key(&document.public_key)
                .map_err(|_| AuthError::InvalidAssertion)?;
            assertion
                .verify(&domain_key, audience, now)
                .map_err(|_| AuthError::InvalidAssertion)?;

            let conn = self.pool.acquire();
            match conn.lookup_user(&principal).await? {
                Some(user) => user.id,
                // Primary identities are vouched for by their domain; the
                // local account row appears on first login.
                None => {
                    conn.create_user(&principal, None, EmailKind::Primary, true)
                        .await?
                }
            }
        } else {
            assertion
                .verify(&self.signer.verifying_key(), audience, now)
                .map_err(|_| AuthError::InvalidAssertion)?;
            let user = self
                .pool
                .acquire()
                .lookup_user(&principal)
                .await?
                .ok_or(AuthError::InvalidAssertion)?;
            if !user.verified {
                return Err(AuthError::InvalidAssertion);
            }
            user.id
        };

        debug!("assertion authentication for user {subject}");
        Ok(Session::issue(
            subject,
            ephemeral,
            AuthMethod::Assertion,
            &self.policy.session,
            now,
        ))
    }

    /// Stage a new account. Returns the raw single-use token for out-of-band
    /// delivery; only its hash is stored. Existing sessions are untouched.
    ///
    /// # Errors
    ///
    /// `MalformedEmail` when the address does not look like one, `Hashing`
    /// if the password cannot be hashed, `StoreUnavailable` on store failure.
    pub async fn stage_user(
        &self,
        email: &str,
        pass: &str,
        site_origin: &str,
    ) -> Result<String, AuthError> {
        if !valid_email(email) {
            return Err(AuthError::MalformedEmail);
        }
        let password_hash = password::hash_password(pass)?;
        self.stage(email, StagedKind::NewAccount, Some(password_hash), site_origin)
            .await
    }

    /// Stage a password reset for an existing account.
    ///
    /// # Errors
    ///
    /// `InvalidCredentials` when no account owns the address.
    pub async fn stage_reset(&self, email: &str, site_origin: &str) -> Result<String, AuthError> {
        if !valid_email(email) {
            return Err(AuthError::MalformedEmail);
        }
        self.pool
            .acquire()
            .lookup_user(email)
            .await?
            .ok_or(AuthError::InvalidCredentials)?;
        self.stage(email, StagedKind::PasswordReset, None, site_origin)
            .await
    }

    async fn stage(
        &self,
        email: &str,
        kind: StagedKind,
        password_hash: Option<String>,
        site_origin: &str,
    ) -> Result<String, AuthError> {
        let token = generate_token()?;
        let record = StagedRecord {
            token_hash: hash_token(&token),
            email: email.to_string(),
            kind,
            password_hash,
            site_origin: site_origin.to_string(),
            created_at_ms: now_ms(),
        };
        self.pool.acquire().insert_staged(record).await?;
        debug!("staged {} for {email}", kind.as_str());
        Ok(token)
    }

    /// Confirm a staged account creation. Consumes the token; the caller's
    /// session, if any, stays exactly as it was.
    ///
    /// # Errors
    ///
    /// `InvalidOrExpiredToken` for unknown, expired, already-consumed, or
    /// wrong-kind tokens.
    pub async fn complete_user_creation(&self, token: &str) -> Result<(), AuthError> {
        let staged = self.take_staged(token, StagedKind::NewAccount).await?;
        let conn = self.pool.acquire();
        match conn.lookup_user(&staged.email).await? {
            Some(user) => {
                if let Some(hash) = &staged.password_hash {
                    conn.update_password(user.id, hash).await?;
                }
                conn.mark_verified(&staged.email).await?;
            }
            None => {
                conn.create_user(
                    &staged.email,
                    staged.password_hash.as_deref(),
                    EmailKind::Secondary,
                    true,
                )
                .await?;
            }
        }
        Ok(())
    }

    /// Confirm a staged password reset with the new password. The caller's
    /// session duration is not touched.
    ///
    /// # Errors
    ///
    /// `InvalidOrExpiredToken` as for [`Self::complete_user_creation`].
    pub async fn complete_reset(&self, pass: &str, token: &str) -> Result<(), AuthError> {
        let staged = self.take_staged(token, StagedKind::PasswordReset).await?;
        let password_hash = password::hash_password(pass)?;
        let conn = self.pool.acquire();
        let user = conn
            .lookup_user(&staged.email)
            .await?
            .ok_or(AuthError::InvalidOrExpiredToken)?;
        conn.update_password(user.id, &password_hash).await?;
        conn.mark_verified(&staged.email).await?;
        Ok(())
    }

    async fn take_staged(&self, token: &str, kind: StagedKind) -> Result<StagedRecord, AuthError> {
        let staged = self
            .pool
            .acquire()
            .consume_staged(&hash_token(token))
            .await?
            .ok_or(AuthError::InvalidOrExpiredToken)?;
        // Consumption already removed the record, so a wrong-kind or expired
        // token burns it. That is intended: tokens are strictly single-use.
        if staged.kind != kind {
            return Err(AuthError::InvalidOrExpiredToken);
        }
        let age = now_ms().saturating_sub(staged.created_at_ms);
        if age > i64::try_from(self.policy.staged_ttl_ms).unwrap_or(i64::MAX) {
            return Err(AuthError::InvalidOrExpiredToken);
        }
        Ok(staged)
    }

    /// Restart the clock on a live session; duration and flags are kept.
    ///
    /// # Errors
    ///
    /// `NoActiveSession` when there is no session or it has expired.
    pub fn prolong_session(&self, session: Option<&Session>) -> Result<Session, AuthError> {
        let now = now_ms();
        let session = active_session(session, now)?;
        let mut prolonged = session.clone();
        prolonged.prolong(now);
        Ok(prolonged)
    }

    /// Issue a certificate binding `public_key` to `email` for the caller's
    /// session. When no duration is requested, ephemeral requests default to
    /// the ephemeral session length and persistent ones to the issuance cap.
    ///
    /// # Errors
    ///
    /// `NoActiveSession` unless a live session owns `email`;
    /// `IssuanceFailed` when signing fails.
    pub async fn cert_key(
        &self,
        session: Option<&Session>,
        email: &str,
        public_key: &str,
        duration_ms: Option<u64>,
        ephemeral: bool,
    ) -> Result<SignedCertificate, AuthError> {
        let session = active_session(session, now_ms())?;
        let user = self
            .pool
            .acquire()
            .lookup_user(email)
            .await?
            .ok_or(AuthError::NoActiveSession)?;
        if user.id != session.subject {
            return Err(AuthError::NoActiveSession);
        }

        let requested = duration_ms.unwrap_or(if ephemeral {
            self.policy.session.ephemeral_session_duration_ms
        } else {
            self.signer.max_duration_ms()
        });
        Ok(self.signer.issue(public_key, email, requested)?)
    }

    /// Addresses owned by the session's account, with their properties.
    /// As a side effect the well-known cache is warmed for every returned
    /// domain; the caller is expected to ask about one of them next.
    ///
    /// # Errors
    ///
    /// `NoActiveSession` without a live session; `StoreUnavailable` when the
    /// store fails.
    pub async fn list_emails(
        &self,
        session: Option<&Session>,
    ) -> Result<BTreeMap<String, EmailProperties>, AuthError> {
        let session = active_session(session, now_ms())?;
        let emails = self.pool.acquire().list_emails(session.subject).await?;
        self.primary.prefetch(emails.keys().cloned());
        Ok(emails)
    }
}

fn active_session<'s>(
    session: Option<&'s Session>,
    now_ms: i64,
) -> Result<&'s Session, AuthError> {
    match session {
        Some(session) if !session.is_expired(now_ms) => Ok(session),
        _ => Err(AuthError::NoActiveSession),
    }
}

fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

/// Coarse shape check before an address enters the store. The confirmation
/// mail is the real proof of ownership, so this only filters out garbage.
fn valid_email(email: &str) -> bool {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    let pattern = PATTERN
        .get_or_init(|| Regex::new(r"^[\w.+-]+@[\w.:-]+$").expect("email pattern compiles"));
    email.len() <= 254 && pattern.is_match(email)
}

/// 32 random bytes, base64url. Unguessable by construction.
fn generate_token() -> Result<String, AuthError> {
    let mut bytes = [0u8; 32];
    OsRng.try_fill_bytes(&mut bytes)?;
    Ok(Base64UrlUnpadded::encode_string(&bytes))
}

/// Raw staged tokens never reach the store; only this hash does.
fn hash_token(token: &str) -> Vec<u8> {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    hasher.finalize().to_vec()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keysigner::encode_public_key;
    use crate::primary::PrimaryConfig;
    use crate::store::memory::memory_pool;
    use crate::store::StoreConnection;
    use ed25519_dalek::SigningKey;

    fn service() -> AuthService {
        let policy = ServicePolicy::default()
            .with_session(
                crate::session::SessionPolicy::default()
                    .with_ephemeral_session_duration_ms(1_000)
                    .with_authentication_duration_ms(60_000),
            )
            .with_staged_ttl_ms(5_000);
        AuthService::new(
            Arc::new(memory_pool(3)),
            Arc::new(
                PrimaryDelegationClient::new(PrimaryConfig::default()).expect("client"),
            ),
            KeySigner::new("attesta.test".to_string(), SigningKey::from_bytes(&[7u8; 32])),
            policy,
        )
    }

    #[tokio::test]
    async fn unknown_account_and_bad_password_both_fail_the_same_way() {
        let service = service();
        let err = service
            .authenticate_with_password("nobody@example.com", "pw", false)
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::InvalidCredentials));

        let token = service
            .stage_user("user@example.com", "rightpassword", "https://site.example")
            .await
            .expect("stage");
        service.complete_user_creation(&token).await.expect("complete");

        let err = service
            .authenticate_with_password("user@example.com", "wrongpassword", false)
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::InvalidCredentials));
    }

    #[tokio::test]
    async fn staged_tokens_are_single_use() {
        let service = service();
        let token = service
            .stage_user("user@example.com", "password", "https://site.example")
            .await
            .expect("stage");

        service.complete_user_creation(&token).await.expect("first use");
        let err = service.complete_user_creation(&token).await.unwrap_err();
        assert!(matches!(err, AuthError::InvalidOrExpiredToken));
    }

    #[tokio::test]
    async fn wrong_kind_token_is_rejected() {
        let service = service();
        let token = service
            .stage_user("user@example.com", "password", "https://site.example")
            .await
            .expect("stage");

        // A creation token handed to the reset flow is invalid.
        let err = service.complete_reset("newpassword", &token).await.unwrap_err();
        assert!(matches!(err, AuthError::InvalidOrExpiredToken));
    }

    #[tokio::test]
    async fn expired_staged_token_is_rejected() {
        let service = service();
        let token = "expired-token";
        service
            .pool
            .acquire()
            .insert_staged(StagedRecord {
                token_hash: hash_token(token),
                email: "user@example.com".to_string(),
                kind: StagedKind::NewAccount,
                password_hash: None,
                site_origin: "https://site.example".to_string(),
                created_at_ms: now_ms() - 6_000,
            })
            .await
            .expect("insert");

        let err = service.complete_user_creation(token).await.unwrap_err();
        assert!(matches!(err, AuthError::InvalidOrExpiredToken));
    }

    #[test]
    fn email_shape_check_filters_garbage() {
        assert!(valid_email("user@example.com"));
        assert!(valid_email("first.last+tag@sub.example.com"));
        assert!(valid_email("user@127.0.0.1:8080"));
        assert!(!valid_email("no-at-sign"));
        assert!(!valid_email("spaces in@example.com"));
        assert!(!valid_email(&format!("{}@example.com", "a".repeat(300))));
    }

    #[tokio::test]
    async fn staging_a_malformed_address_is_refused() {
        let service = service();
        let err = service
            .stage_user("not an email", "password", "https://site.example")
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::MalformedEmail));
    }

    #[tokio::test]
    async fn stage_reset_requires_an_existing_account() {
        let service = service();
        let err = service
            .stage_reset("nobody@example.com", "https://site.example")
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::InvalidCredentials));
    }

    #[tokio::test]
    async fn cert_key_requires_the_session_to_own_the_address() {
        let service = service();
        for email in ["first@example.com", "second@example.com"] {
            let token = service
                .stage_user(email, "password", "https://site.example")
                .await
                .expect("stage");
            service.complete_user_creation(&token).await.expect("complete");
        }
        let session = service
            .authenticate_with_password("first@example.com", "password", false)
            .await
            .expect("authenticate");

        let public_key =
            encode_public_key(&SigningKey::from_bytes(&[9u8; 32]).verifying_key());
        let err = service
            .cert_key(Some(&session), "second@example.com", &public_key, None, false)
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::NoActiveSession));

        let signed = service
            .cert_key(Some(&session), "first@example.com", &public_key, Some(2_000), false)
            .await
            .expect("issue");
        let cert = signed.certificate;
        assert_eq!(cert.expires_at_ms - cert.issued_at_ms, 2_000);
        assert_eq!(cert.principal, "first@example.com");
    }

    #[tokio::test]
    async fn cert_key_defaults_duration_from_the_ephemeral_flag() {
        let service = service();
        let token = service
            .stage_user("user@example.com", "password", "https://site.example")
            .await
            .expect("stage");
        service.complete_user_creation(&token).await.expect("complete");
        let session = service
            .authenticate_with_password("user@example.com", "password", false)
            .await
            .expect("authenticate");
        let public_key =
            encode_public_key(&SigningKey::from_bytes(&[9u8; 32]).verifying_key());

        let ephemeral = service
            .cert_key(Some(&session), "user@example.com", &public_key, None, true)
            .await
            .expect("issue");
        let cert = ephemeral.certificate;
        assert_eq!(cert.expires_at_ms - cert.issued_at_ms, 1_000);

        let persistent = service
            .cert_key(Some(&session), "user@example.com", &public_key, None, false)
            .await
            .expect("issue");
        let cert = persistent.certificate;
        assert_eq!(
            cert.expires_at_ms - cert.issued_at_ms,
            i64::try_from(crate::keysigner::DEFAULT_CERT_MAX_DURATION_MS).expect("fits")
        );
    }

    #[tokio::test]
    async fn operations_without_a_session_are_refused() {
        let service = service();
        assert!(matches!(
            service.prolong_session(None).unwrap_err(),
            AuthError::NoActiveSession
        ));
        assert!(matches!(
            service.list_emails(None).await.unwrap_err(),
            AuthError::NoActiveSession
        ));

        let mut stale = Session::issue(
            1,
            true,
            AuthMethod::Password,
            &service.policy.session,
            now_ms() - 10_000,
        );
        stale.duration_ms = 1_000;
        assert!(matches!(
            service.prolong_session(Some(&stale)).unwrap_err(),
            AuthError::NoActiveSession
        ));
    }

    #[tokio::test]
    async fn prolong_keeps_duration_and_flags() {
        let service = service();
        let token = service
            .stage_user("user@example.com", "password", "https://site.example")
            .await
            .expect("stage");
        service.complete_user_creation(&token).await.expect("complete");
        let session = service
            .authenticate_with_password("user@example.com", "password", true)
            .await
            .expect("authenticate");

        let prolonged = service.prolong_session(Some(&session)).expect("prolong");
        assert_eq!(prolonged.duration_ms, session.duration_ms);
        assert_eq!(prolonged.ephemeral, session.ephemeral);
        assert!(prolonged.authenticated_at_ms >= session.authenticated_at_ms);
    }
}
