//! End-to-end account and session flows against the in-process store.

use std::sync::Arc;

use chrono::Utc;
use ed25519_dalek::SigningKey;

use attesta::attesta::{AuthError, AuthService, ServicePolicy};
use attesta::keysigner::assertion::{sign_claim, Assertion, AssertionClaim};
use attesta::keysigner::{encode_public_key, verify_certificate, KeySigner};
use attesta::primary::{PrimaryConfig, PrimaryDelegationClient};
use attesta::session::SessionPolicy;
use attesta::store::memory::memory_pool;
use attesta::store::EmailKind;

const ISSUER_SEED: [u8; 32] = [11u8; 32];

fn service() -> AuthService {
    let policy = ServicePolicy::default().with_session(
        SessionPolicy::default()
            .with_ephemeral_session_duration_ms(3_600_000)
            .with_authentication_duration_ms(1_209_600_000),
    );
    AuthService::new(
        Arc::new(memory_pool(3)),
        Arc::new(PrimaryDelegationClient::new(PrimaryConfig::default()).expect("client")),
        KeySigner::new("attesta.test".to_string(), SigningKey::from_bytes(&ISSUER_SEED)),
        policy,
    )
}

async fn create_account(service: &AuthService, email: &str, pass: &str) {
    let token = service
        .stage_user(email, pass, "https://site.example")
        .await
        .expect("stage");
    service
        .complete_user_creation(&token)
        .await
        .expect("complete");
}

#[tokio::test]
async fn account_creation_then_sessions_of_both_durations() {
    let service = service();
    create_account(&service, "someuser@somedomain.com", "thisismypassword").await;

    let ephemeral = service
        .authenticate_with_password("someuser@somedomain.com", "thisismypassword", true)
        .await
        .expect("ephemeral login");
    assert!(ephemeral.ephemeral);
    assert_eq!(ephemeral.duration_ms, 3_600_000);

    let persistent = service
        .authenticate_with_password("someuser@somedomain.com", "thisismypassword", false)
        .await
        .expect("persistent login");
    assert!(!persistent.ephemeral);
    assert_eq!(persistent.duration_ms, 1_209_600_000);

    let prolonged = service
        .prolong_session(Some(&persistent))
        .expect("prolong");
    assert_eq!(prolonged.duration_ms, persistent.duration_ms);
    assert!(prolonged.authenticated_at_ms >= persistent.authenticated_at_ms);
}

#[tokio::test]
async fn password_reset_swaps_the_password_and_burns_the_token() {
    let service = service();
    create_account(&service, "someuser@somedomain.com", "thisismypassword").await;

    let session = service
        .authenticate_with_password("someuser@somedomain.com", "thisismypassword", false)
        .await
        .expect("login");

    let token = service
        .stage_reset("someuser@somedomain.com", "https://site.example")
        .await
        .expect("stage reset");
    service
        .complete_reset("mynewpassword", &token)
        .await
        .expect("complete reset");

    let err = service
        .authenticate_with_password("someuser@somedomain.com", "thisismypassword", false)
        .await
        .unwrap_err();
    assert!(matches!(err, AuthError::InvalidCredentials));

    service
        .authenticate_with_password("someuser@somedomain.com", "mynewpassword", false)
        .await
        .expect("new password works");

    // Completing the reset never touches the session held before it.
    assert_eq!(session.duration_ms, 1_209_600_000);
    let prolonged = service.prolong_session(Some(&session)).expect("still live");
    assert_eq!(prolonged.duration_ms, 1_209_600_000);

    // The token was consumed; replaying it is refused.
    let err = service
        .complete_reset("anotherpassword", &token)
        .await
        .unwrap_err();
    assert!(matches!(err, AuthError::InvalidOrExpiredToken));
}

#[tokio::test]
async fn certificate_issuance_for_the_logged_in_address() {
    let service = service();
    create_account(&service, "someuser@somedomain.com", "thisismypassword").await;
    let session = service
        .authenticate_with_password("someuser@somedomain.com", "thisismypassword", false)
        .await
        .expect("login");

    let browser_key = SigningKey::from_bytes(&[42u8; 32]);
    let public_key = encode_public_key(&browser_key.verifying_key());
    let signed = service
        .cert_key(
            Some(&session),
            "someuser@somedomain.com",
            &public_key,
            Some(60_000),
            false,
        )
        .await
        .expect("issue");

    let issuer_key = SigningKey::from_bytes(&ISSUER_SEED).verifying_key();
    let cert = verify_certificate(&signed.token, &issuer_key).expect("verifies");
    assert_eq!(cert.principal, "someuser@somedomain.com");
    assert_eq!(cert.issuer, "attesta.test");
    assert_eq!(cert.public_key, public_key);
}

#[tokio::test]
async fn assertion_login_with_a_locally_issued_certificate() {
    let service = service();
    // The address uses a port-qualified loopback domain so the well-known
    // probe fails fast with connection refused instead of timing out.
    let email = "someuser@127.0.0.1:1";
    create_account(&service, email, "thisismypassword").await;

    let browser_key = SigningKey::from_bytes(&[42u8; 32]);
    let issuer = KeySigner::new(
        "attesta.test".to_string(),
        SigningKey::from_bytes(&ISSUER_SEED),
    );
    let now = Utc::now().timestamp_millis();
    let signed = issuer
        .issue_at(
            &encode_public_key(&browser_key.verifying_key()),
            email,
            60_000,
            now,
        )
        .expect("issue");
    let claim = AssertionClaim {
        audience: "https://site.example".to_string(),
        expires_at_ms: now + 60_000,
    };
    let claim_token = sign_claim(&claim, &browser_key).expect("sign claim");
    let assertion = Assertion::compose(&signed.token, &claim_token);

    let session = service
        .authenticate_with_assertion(&assertion, true)
        .await
        .expect("assertion login");
    assert!(session.ephemeral);

    let emails = service.list_emails(Some(&session)).await.expect("emails");
    let properties = emails.get(email).expect("address listed");
    assert_eq!(properties.kind, EmailKind::Secondary);
    assert!(properties.verified);

    // A mangled assertion is refused without revealing which check failed.
    let err = service
        .authenticate_with_assertion("not-an-assertion", true)
        .await
        .unwrap_err();
    assert!(matches!(err, AuthError::InvalidAssertion));
}
