//! Certificate issuance.
//!
//! A certificate binds a user's public key to a verified email address
//! (the principal) for a bounded time. The signed artifact is
//! `b64url(json payload) "." b64url(ed25519 signature)`; relying parties
//! verify it against the issuer's published key. Issuance is stateless: the
//! signer never looks at sessions or the store, callers gate it.

pub mod assertion;

use base64ct::{Base64UrlUnpadded, Encoding};
use chrono::Utc;
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Policy ceiling for certificate lifetime, 24 hours.
pub const DEFAULT_CERT_MAX_DURATION_MS: u64 = 86_400_000;

/// Payload of a signed certificate.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Certificate {
    /// Base64url-encoded Ed25519 key of the certified subject.
    #[serde(rename = "public-key")]
    pub public_key: String,
    /// Verified email address the key is bound to.
    pub principal: String,
    pub issuer: String,
    pub issued_at_ms: i64,
    pub expires_at_ms: i64,
}

/// A certificate together with its signed wire form.
#[derive(Debug, Clone)]
pub struct SignedCertificate {
    pub certificate: Certificate,
    pub token: String,
}

#[derive(Debug, Error)]
pub enum IssueError {
    #[error("requested certificate duration must be positive")]
    InvalidDuration,
    #[error("malformed subject public key")]
    InvalidPublicKey,
    #[error("failed to serialize certificate payload")]
    Serialization(#[from] serde_json::Error),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum KeyError {
    #[error("key material is not valid base64url")]
    InvalidEncoding,
    #[error("key material must be 32 bytes")]
    InvalidLength,
    #[error("not a valid Ed25519 key")]
    InvalidKey,
}

#[derive(Debug, Error)]
pub enum VerifyError {
    #[error("malformed certificate token")]
    Malformed,
    #[error("certificate payload is not valid json")]
    Payload(#[from] serde_json::Error),
    #[error("certificate signature does not verify")]
    BadSignature,
}

/// Signs certificates with the service's Ed25519 issuer key.
pub struct KeySigner {
    issuer: String,
    signing_key: SigningKey,
    max_duration_ms: u64,
}

impl KeySigner {
    #[must_use]
    pub fn new(issuer: String, signing_key: SigningKey) -> Self {
        Self {
            issuer,
            signing_key,
            max_duration_ms: DEFAULT_CERT_MAX_DURATION_MS,
        }
    }

    #[must_use]
    pub fn with_max_duration_ms(mut self, ms: u64) -> Self {
        self.max_duration_ms = ms;
        self
    }

    #[must_use]
    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    #[must_use]
    pub fn max_duration_ms(&self) -> u64 {
        self.max_duration_ms
    }

    #[must_use]
    pub fn verifying_key(&self) -> VerifyingKey {
        self.signing_key.verifying_key()
    }

    /// Issue a certificate for `public_key` and `principal`.
    ///
    /// The lifetime is the requested duration clamped to the policy maximum;
    /// the expiry always lies strictly after issuance.
    ///
    /// # Errors
    ///
    /// Fails on a zero duration, a public key that does not decode to an
    /// Ed25519 key, or payload serialization failure.
    pub fn issue(
        &self,
        public_key: &str,
        principal: &str,
        requested_duration_ms: u64,
    ) -> Result<SignedCertificate, IssueError> {
        self.issue_at(
            public_key,
            principal,
            requested_duration_ms,
            Utc::now().timestamp_millis(),
        )
    }

    /// Same as [`Self::issue`] with an explicit clock.
    ///
    /// # Errors
    ///
    /// As for [`Self::issue`].
    pub fn issue_at(
        &self,
        public_key: &str,
        principal: &str,
        requested_duration_ms: u64,
        issued_at_ms: i64,
    ) -> Result<SignedCertificate, IssueError> {
        if requested_duration_ms == 0 {
            return Err(IssueError::InvalidDuration);
        }
        decode_public_key(public_key).map_err(|_| IssueError::InvalidPublicKey)?;

        let duration_ms = requested_duration_ms.min(self.max_duration_ms);
        let expires_at_ms =
            issued_at_ms.saturating_add(i64::try_from(duration_ms).unwrap_or(i64::MAX));

        let certificate = Certificate {
            public_key: public_key.to_string(),
            principal: principal.to_string(),
            issuer: self.issuer.clone(),
            issued_at_ms,
            expires_at_ms,
        };

        let payload = serde_json::to_vec(&certificate)?;
        let signature = self.signing_key.sign(&payload);
        let token = format!(
            "{}.{}",
            Base64UrlUnpadded::encode_string(&payload),
            Base64UrlUnpadded::encode_string(&signature.to_bytes())
        );

        Ok(SignedCertificate { certificate, token })
    }
}

/// Decode a base64url Ed25519 verifying key.
///
/// # Errors
///
/// Returns a [`KeyError`] describing which check failed.
pub fn decode_public_key(encoded: &str) -> Result<VerifyingKey, KeyError> {
    let bytes = Base64UrlUnpadded::decode_vec(encoded).map_err(|_| KeyError::InvalidEncoding)?;
    let bytes: [u8; 32] = bytes.try_into().map_err(|_| KeyError::InvalidLength)?;
    VerifyingKey::from_bytes(&bytes).map_err(|_| KeyError::InvalidKey)
}

#[must_use]
pub fn encode_public_key(key: &VerifyingKey) -> String {
    Base64UrlUnpadded::encode_string(key.as_bytes())
}

/// Load a signing key from its base64url-encoded 32-byte seed.
///
/// # Errors
///
/// Returns a [`KeyError`] if the seed does not decode or has the wrong length.
pub fn signing_key_from_encoded(seed: &str) -> Result<SigningKey, KeyError> {
    let bytes =
        Base64UrlUnpadded::decode_vec(seed.trim()).map_err(|_| KeyError::InvalidEncoding)?;
    let bytes: [u8; 32] = bytes.try_into().map_err(|_| KeyError::InvalidLength)?;
    Ok(SigningKey::from_bytes(&bytes))
}

/// Verify a certificate token's signature against the issuer key and return
/// the payload. Expiry is the caller's check; it depends on the caller's
/// clock and tolerance.
///
/// # Errors
///
/// Returns a [`VerifyError`] for malformed tokens or bad signatures.
pub fn verify_certificate(
    token: &str,
    issuer_key: &VerifyingKey,
) -> Result<Certificate, VerifyError> {
    let (payload_b64, signature_b64) = token.split_once('.').ok_or(VerifyError::Malformed)?;
    let payload =
        Base64UrlUnpadded::decode_vec(payload_b64).map_err(|_| VerifyError::Malformed)?;
    let signature_bytes =
        Base64UrlUnpadded::decode_vec(signature_b64).map_err(|_| VerifyError::Malformed)?;
    let signature_bytes: [u8; 64] =
        signature_bytes.try_into().map_err(|_| VerifyError::Malformed)?;
    let signature = Signature::from_bytes(&signature_bytes);

    issuer_key
        .verify(&payload, &signature)
        .map_err(|_| VerifyError::BadSignature)?;

    Ok(serde_json::from_slice(&payload)?)
}

/// Decode a certificate token's payload without verifying the signature.
/// Used to discover the asserted principal before the issuer key is known.
///
/// # Errors
///
/// Returns a [`VerifyError`] if the payload does not decode.
pub fn peek_certificate(token: &str) -> Result<Certificate, VerifyError> {
    let (payload_b64, _) = token.split_once('.').ok_or(VerifyError::Malformed)?;
    let payload =
        Base64UrlUnpadded::decode_vec(payload_b64).map_err(|_| VerifyError::Malformed)?;
    Ok(serde_json::from_slice(&payload)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn signer() -> KeySigner {
        KeySigner::new("attesta.test".to_string(), SigningKey::from_bytes(&[7u8; 32]))
            .with_max_duration_ms(10_000)
    }

    fn subject_key() -> String {
        encode_public_key(&SigningKey::from_bytes(&[9u8; 32]).verifying_key())
    }

    #[test]
    fn lifetime_is_requested_duration_when_under_the_cap() {
        let signed = signer()
            .issue_at(&subject_key(), "a@example.com", 5_000, 1_000)
            .expect("issue");
        let cert = signed.certificate;
        assert_eq!(cert.expires_at_ms - cert.issued_at_ms, 5_000);
    }

    #[test]
    fn lifetime_is_clamped_to_the_policy_maximum() {
        let signed = signer()
            .issue_at(&subject_key(), "a@example.com", 600_000, 1_000)
            .expect("issue");
        let cert = signed.certificate;
        assert_eq!(cert.expires_at_ms - cert.issued_at_ms, 10_000);
        assert!(cert.expires_at_ms > cert.issued_at_ms);
    }

    #[test]
    fn zero_duration_is_rejected() {
        let err = signer()
            .issue_at(&subject_key(), "a@example.com", 0, 1_000)
            .unwrap_err();
        assert!(matches!(err, IssueError::InvalidDuration));
    }

    #[test]
    fn garbage_public_key_is_rejected() {
        let err = signer()
            .issue_at("not a key", "a@example.com", 5_000, 1_000)
            .unwrap_err();
        assert!(matches!(err, IssueError::InvalidPublicKey));
    }

    #[test]
    fn issued_token_verifies_against_the_issuer_key() {
        let signer = signer();
        let signed = signer
            .issue_at(&subject_key(), "a@example.com", 5_000, 1_000)
            .expect("issue");
        let cert = verify_certificate(&signed.token, &signer.verifying_key()).expect("verify");
        assert_eq!(cert, signed.certificate);
        assert_eq!(cert.principal, "a@example.com");
    }

    #[test]
    fn tampered_token_fails_verification() {
        let signer = signer();
        let signed = signer
            .issue_at(&subject_key(), "a@example.com", 5_000, 1_000)
            .expect("issue");
        // The first payload character encodes '{', so this always differs.
        let forged = format!("B{}", &signed.token[1..]);
        assert!(verify_certificate(&forged, &signer.verifying_key()).is_err());
    }

    #[test]
    fn wrong_issuer_key_fails_verification() {
        let signed = signer()
            .issue_at(&subject_key(), "a@example.com", 5_000, 1_000)
            .expect("issue");
        let other = SigningKey::from_bytes(&[8u8; 32]).verifying_key();
        assert!(matches!(
            verify_certificate(&signed.token, &other),
            Err(VerifyError::BadSignature)
        ));
    }

    #[test]
    fn signing_key_round_trips_through_seed_encoding() {
        let seed = Base64UrlUnpadded::encode_string(&[7u8; 32]);
        let key = signing_key_from_encoded(&seed).expect("seed decodes");
        assert_eq!(key.to_bytes(), [7u8; 32]);
        assert_eq!(
            signing_key_from_encoded("short").unwrap_err(),
            KeyError::InvalidEncoding
        );
    }
}
