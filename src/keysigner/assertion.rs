//! Assertion parsing and verification.
//!
//! An assertion is a client-presented proof of control over an identity:
//! a certificate token (binding the client's key to an email) and a claim
//! token (signed with that key, scoping the proof to an audience for a short
//! time), joined by `~`. The certificate is checked against either the
//! principal domain's published key or this service's own issuer key.

use base64ct::{Base64UrlUnpadded, Encoding};
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::{decode_public_key, peek_certificate, verify_certificate, Certificate};

/// Claim half of an assertion, signed by the certified key.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AssertionClaim {
    pub audience: String,
    pub expires_at_ms: i64,
}

#[derive(Debug, Error)]
pub enum AssertionError {
    #[error("malformed assertion")]
    Malformed,
    #[error("assertion signature does not verify")]
    BadSignature,
    #[error("assertion has expired")]
    Expired,
    #[error("assertion audience does not match")]
    AudienceMismatch,
}

/// A parsed, not yet verified assertion.
#[derive(Debug, Clone)]
pub struct Assertion {
    cert_token: String,
    claim_token: String,
}

impl Assertion {
    /// Split the `cert~claim` wire form.
    ///
    /// # Errors
    ///
    /// Returns [`AssertionError::Malformed`] if either half is missing.
    pub fn parse(raw: &str) -> Result<Self, AssertionError> {
        let (cert_token, claim_token) = raw.split_once('~').ok_or(AssertionError::Malformed)?;
        if cert_token.is_empty() || claim_token.is_empty() {
            return Err(AssertionError::Malformed);
        }
        Ok(Self {
            cert_token: cert_token.to_string(),
            claim_token: claim_token.to_string(),
        })
    }

    /// Join the two halves back into the wire form.
    #[must_use]
    pub fn compose(cert_token: &str, claim_token: &str) -> String {
        format!("{cert_token}~{claim_token}")
    }

    /// Read the certificate payload without verifying anything. The asserted
    /// principal decides which issuer key the full verification uses.
    ///
    /// # Errors
    ///
    /// Returns [`AssertionError::Malformed`] if the payload does not decode.
    pub fn peek_certificate(&self) -> Result<Certificate, AssertionError> {
        peek_certificate(&self.cert_token).map_err(|_| AssertionError::Malformed)
    }

    /// Verify the full chain: certificate signature by `issuer_key`,
    /// certificate expiry, claim signature by the certified key, claim
    /// expiry, and (when given) the expected audience.
    ///
    /// # Errors
    ///
    /// Returns an [`AssertionError`]; callers fold all variants into a single
    /// "invalid assertion" answer so the failing check is never revealed.
    pub fn verify(
        &self,
        issuer_key: &VerifyingKey,
        audience: Option<&str>,
        now_ms: i64,
    ) -> Result<Certificate, AssertionError> {
        let certificate = verify_certificate(&self.cert_token, issuer_key)
            .map_err(|_| AssertionError::BadSignature)?;
        if certificate.expires_at_ms <= now_ms {
            return Err(AssertionError::Expired);
        }

        let subject_key = decode_public_key(&certificate.public_key)
            .map_err(|_| AssertionError::Malformed)?;
        let claim = verify_claim(&self.claim_token, &subject_key)?;
        if claim.expires_at_ms <= now_ms {
            return Err(AssertionError::Expired);
        }
        if let Some(expected) = audience {
            if claim.audience != expected {
                return Err(AssertionError::AudienceMismatch);
            }
        }

        Ok(certificate)
    }
}

/// Sign a claim with the certified key, producing the claim token half.
///
/// # Errors
///
/// Returns an error if the claim fails to serialize.
pub fn sign_claim(claim: &AssertionClaim, key: &SigningKey) -> Result<String, serde_json::Error> {
    let payload = serde_json::to_vec(claim)?;
    let signature = key.sign(&payload);
    Ok(format!(
        "{}.{}",
        Base64UrlUnpadded::encode_string(&payload),
        Base64UrlUnpadded::encode_string(&signature.to_bytes())
    ))
}

fn verify_claim(token: &str, key: &VerifyingKey) -> Result<AssertionClaim, AssertionError> {
    let (payload_b64, signature_b64) = token.split_once('.').ok_or(AssertionError::Malformed)?;
    let payload =
        Base64UrlUnpadded::decode_vec(payload_b64).map_err(|_| AssertionError::Malformed)?;
    let signature_bytes =
        Base64UrlUnpadded::decode_vec(signature_b64).map_err(|_| AssertionError::Malformed)?;
    let signature_bytes: [u8; 64] = signature_bytes
        .try_into()
        .map_err(|_| AssertionError::Malformed)?;
    let signature = Signature::from_bytes(&signature_bytes);

    key.verify(&payload, &signature)
        .map_err(|_| AssertionError::BadSignature)?;

    serde_json::from_slice(&payload).map_err(|_| AssertionError::Malformed)
}
