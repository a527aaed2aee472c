//! Session state carried in the `browserid_state` cookie.
//!
//! The cookie value is a versioned, dot-delimited field string. Sessions are
//! per-caller state: the server never keeps them in memory, every request
//! decodes the cookie it was handed. The duration field lives at a fixed
//! position (index 3) and is set exactly once, when the session is issued or
//! explicitly prolonged. No other operation may touch it.

use thiserror::Error;
use ulid::Ulid;

/// Cookie under which the encoded session travels.
pub const SESSION_COOKIE_NAME: &str = "browserid_state";

const FORMAT_VERSION: &str = "1";
const FIELD_COUNT: usize = 7;

/// "Don't remember me" sessions default to one hour.
pub const DEFAULT_EPHEMERAL_SESSION_DURATION_MS: u64 = 3_600_000;
/// Persistent sessions default to two weeks.
pub const DEFAULT_AUTHENTICATION_DURATION_MS: u64 = 1_209_600_000;

/// How the session was established.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthMethod {
    Password,
    Assertion,
}

impl AuthMethod {
    fn as_wire(self) -> &'static str {
        match self {
            Self::Password => "pw",
            Self::Assertion => "as",
        }
    }

    fn from_wire(field: &str) -> Option<Self> {
        match field {
            "pw" => Some(Self::Password),
            "as" => Some(Self::Assertion),
            _ => None,
        }
    }
}

/// Session duration policy, fixed at service start.
#[derive(Debug, Clone)]
pub struct SessionPolicy {
    pub ephemeral_session_duration_ms: u64,
    pub authentication_duration_ms: u64,
}

impl Default for SessionPolicy {
    fn default() -> Self {
        Self {
            ephemeral_session_duration_ms: DEFAULT_EPHEMERAL_SESSION_DURATION_MS,
            authentication_duration_ms: DEFAULT_AUTHENTICATION_DURATION_MS,
        }
    }
}

impl SessionPolicy {
    #[must_use]
    pub fn with_ephemeral_session_duration_ms(mut self, ms: u64) -> Self {
        self.ephemeral_session_duration_ms = ms;
        self
    }

    #[must_use]
    pub fn with_authentication_duration_ms(mut self, ms: u64) -> Self {
        self.authentication_duration_ms = ms;
        self
    }

    #[must_use]
    pub fn duration_for(&self, ephemeral: bool) -> u64 {
        if ephemeral {
            self.ephemeral_session_duration_ms
        } else {
            self.authentication_duration_ms
        }
    }
}

/// Decoded session state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    /// User id the session was issued for.
    pub subject: i64,
    pub authenticated_at_ms: i64,
    pub duration_ms: u64,
    pub ephemeral: bool,
    pub method: AuthMethod,
    /// Random per-issuance marker; keeps two sessions for the same user
    /// distinguishable on the wire.
    pub nonce: String,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DecodeError {
    #[error("unsupported session format version {0:?}")]
    UnsupportedVersion(String),
    #[error("expected {FIELD_COUNT} session fields, found {0}")]
    FieldCount(usize),
    #[error("malformed session field: {0}")]
    MalformedField(&'static str),
}

impl Session {
    /// Create a fresh session. The duration is derived from the policy here
    /// and nowhere else.
    #[must_use]
    pub fn issue(
        subject: i64,
        ephemeral: bool,
        method: AuthMethod,
        policy: &SessionPolicy,
        now_ms: i64,
    ) -> Self {
        Self {
            subject,
            authenticated_at_ms: now_ms,
            duration_ms: policy.duration_for(ephemeral),
            ephemeral,
            method,
            nonce: Ulid::new().to_string(),
        }
    }

    /// Reset the session age. Duration and flags stay as issued.
    pub fn prolong(&mut self, now_ms: i64) {
        self.authenticated_at_ms = now_ms;
    }

    #[must_use]
    pub fn expires_at_ms(&self) -> i64 {
        let duration = i64::try_from(self.duration_ms).unwrap_or(i64::MAX);
        self.authenticated_at_ms.saturating_add(duration)
    }

    #[must_use]
    pub fn is_expired(&self, now_ms: i64) -> bool {
        now_ms > self.expires_at_ms()
    }

    /// Encode to the dot-delimited cookie value.
    ///
    /// Field layout: `version.subject.authenticated_at.duration.ephemeral.method.nonce`.
    /// The duration in milliseconds sits at index 3; relying parties and the
    /// test suite read it from there.
    #[must_use]
    pub fn encode(&self) -> String {
        format!(
            "{FORMAT_VERSION}.{}.{}.{}.{}.{}.{}",
            self.subject,
            self.authenticated_at_ms,
            self.duration_ms,
            u8::from(self.ephemeral),
            self.method.as_wire(),
            self.nonce
        )
    }

    /// Decode a cookie value produced by [`Session::encode`].
    ///
    /// # Errors
    ///
    /// Returns a [`DecodeError`] for unknown versions, wrong field counts, or
    /// fields that fail to parse. Malformed tokens never panic.
    pub fn decode(token: &str) -> Result<Self, DecodeError> {
        let fields: Vec<&str> = token.split('.').collect();

        let version = fields.first().copied().unwrap_or_default();
        if version != FORMAT_VERSION {
            return Err(DecodeError::UnsupportedVersion(version.to_string()));
        }
        if fields.len() != FIELD_COUNT {
            return Err(DecodeError::FieldCount(fields.len()));
        }

        let subject = fields[1]
            .parse::<i64>()
            .map_err(|_| DecodeError::MalformedField("subject"))?;
        let authenticated_at_ms = fields[2]
            .parse::<i64>()
            .map_err(|_| DecodeError::MalformedField("authenticated_at"))?;
        let duration_ms = fields[3]
            .parse::<u64>()
            .map_err(|_| DecodeError::MalformedField("duration"))?;
        let ephemeral = match fields[4] {
            "0" => false,
            "1" => true,
            _ => return Err(DecodeError::MalformedField("ephemeral")),
        };
        let method = AuthMethod::from_wire(fields[5])
            .ok_or(DecodeError::MalformedField("method"))?;
        if fields[6].is_empty() {
            return Err(DecodeError::MalformedField("nonce"));
        }

        Ok(Self {
            subject,
            authenticated_at_ms,
            duration_ms,
            ephemeral,
            method,
            nonce: fields[6].to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> SessionPolicy {
        SessionPolicy::default()
            .with_ephemeral_session_duration_ms(1_000)
            .with_authentication_duration_ms(60_000)
    }

    #[test]
    fn issue_uses_policy_duration() {
        let policy = policy();
        let ephemeral = Session::issue(7, true, AuthMethod::Password, &policy, 100);
        let persistent = Session::issue(7, false, AuthMethod::Password, &policy, 100);
        assert_eq!(ephemeral.duration_ms, 1_000);
        assert_eq!(persistent.duration_ms, 60_000);
    }

    #[test]
    fn encode_decode_round_trip() {
        let session = Session::issue(42, false, AuthMethod::Assertion, &policy(), 1_234);
        let decoded = Session::decode(&session.encode()).expect("round trip");
        assert_eq!(decoded, session);
    }

    #[test]
    fn duration_is_the_fourth_dot_field() {
        let session = Session::issue(42, true, AuthMethod::Password, &policy(), 0);
        let token = session.encode();
        let field = token.split('.').nth(3).expect("duration field");
        assert_eq!(field.parse::<u64>().ok(), Some(1_000));
    }

    #[test]
    fn prolong_resets_age_but_keeps_duration() {
        let mut session = Session::issue(1, false, AuthMethod::Password, &policy(), 10);
        let nonce = session.nonce.clone();
        session.prolong(500);
        assert_eq!(session.authenticated_at_ms, 500);
        assert_eq!(session.duration_ms, 60_000);
        assert!(!session.ephemeral);
        assert_eq!(session.nonce, nonce);
    }

    #[test]
    fn expiry_is_strict() {
        let session = Session::issue(1, true, AuthMethod::Password, &policy(), 0);
        assert!(!session.is_expired(1_000));
        assert!(session.is_expired(1_001));
    }

    #[test]
    fn decode_rejects_unknown_version() {
        let err = Session::decode("2.1.0.1000.0.pw.nonce").unwrap_err();
        assert_eq!(err, DecodeError::UnsupportedVersion("2".to_string()));
    }

    #[test]
    fn decode_rejects_wrong_field_count() {
        let err = Session::decode("1.1.0.1000").unwrap_err();
        assert_eq!(err, DecodeError::FieldCount(4));
    }

    #[test]
    fn decode_rejects_malformed_fields() {
        assert_eq!(
            Session::decode("1.x.0.1000.0.pw.nonce").unwrap_err(),
            DecodeError::MalformedField("subject")
        );
        assert_eq!(
            Session::decode("1.1.0.big.0.pw.nonce").unwrap_err(),
            DecodeError::MalformedField("duration")
        );
        assert_eq!(
            Session::decode("1.1.0.1000.2.pw.nonce").unwrap_err(),
            DecodeError::MalformedField("ephemeral")
        );
        assert_eq!(
            Session::decode("1.1.0.1000.0.xx.nonce").unwrap_err(),
            DecodeError::MalformedField("method")
        );
    }

    #[test]
    fn decode_garbage_is_an_error_not_a_panic() {
        assert!(Session::decode("").is_err());
        assert!(Session::decode("......").is_err());
        assert!(Session::decode("not a cookie at all").is_err());
    }
}
