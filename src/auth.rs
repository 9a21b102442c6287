use std::borrow::Cow;
use std::fmt;

use chrono::Utc;
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use serde::{Deserialize, Serialize};

use crate::error::{Result, TriggerError};

/// Audience expected by the App Store Connect API.
pub const AUDIENCE: &str = "appstoreconnect-v1";

/// Lifetime of an issued token in seconds.
pub const TOKEN_LIFETIME_SECS: i64 = 10 * 60;

/// App Store Connect API key material.
#[derive(Clone, Default)]
pub struct Credentials {
    pub key_id: String,
    pub issuer_id: String,
    pub private_key_pem: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("key_id", &self.key_id)
            .field("issuer_id", &self.issuer_id)
            .field("private_key_pem", &"<redacted>")
            .finish()
    }
}

impl Credentials {
    pub fn new(
        key_id: impl Into<String>,
        issuer_id: impl Into<String>,
        private_key_pem: impl Into<String>,
    ) -> Self {
        Self {
            key_id: key_id.into(),
            issuer_id: issuer_id.into(),
            private_key_pem: private_key_pem.into(),
        }
    }

    fn missing_fields(&self) -> Vec<&'static str> {
        [
            ("keyId", &self.key_id),
            ("issuerId", &self.issuer_id),
            ("key", &self.private_key_pem),
        ]
        .into_iter()
        .filter(|(_, value)| value.trim().is_empty())
        .map(|(name, _)| name)
        .collect()
    }
}

/// Anything that can hand out API credentials for a single run.
pub trait CredentialSource {
    fn credentials(&self) -> Credentials;
}

impl CredentialSource for Credentials {
    fn credentials(&self) -> Credentials {
        self.clone()
    }
}

/// Short-lived bearer token for the App Store Connect API.
#[derive(Clone, PartialEq, Eq)]
pub struct SignedToken {
    value: String,
    issued_at: i64,
    expires_at: i64,
}

impl SignedToken {
    pub fn as_str(&self) -> &str {
        &self.value
    }

    pub fn issued_at(&self) -> i64 {
        self.issued_at
    }

    pub fn expires_at(&self) -> i64 {
        self.expires_at
    }
}

impl fmt::Debug for SignedToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SignedToken")
            .field("value", &"<redacted>")
            .field("issued_at", &self.issued_at)
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub iss: String,
    pub aud: String,
    pub iat: i64,
    pub exp: i64,
}

/// Replaces literal `\n` escapes with real newlines.
///
/// Secret stores that only hold single-line values usually carry PEM
/// material in this form.
pub fn normalize_private_key(pem: &str) -> Cow<'_, str> {
    if pem.contains("\\n") {
        Cow::Owned(pem.replace("\\n", "\n"))
    } else {
        Cow::Borrowed(pem)
    }
}

/// Mints ES256 tokens for the App Store Connect API.
#[derive(Debug, Default, Clone, Copy)]
pub struct TokenIssuer;

impl TokenIssuer {
    pub fn issue(&self, credentials: &Credentials) -> Result<SignedToken> {
        self.issue_at(credentials, Utc::now().timestamp())
    }

    /// Issues a token as if the current Unix time were `now`.
    pub fn issue_at(&self, credentials: &Credentials, now: i64) -> Result<SignedToken> {
        let missing = credentials.missing_fields();
        if !missing.is_empty() {
            return Err(TriggerError::MissingCredentials { missing });
        }

        let pem = normalize_private_key(&credentials.private_key_pem);
        let key = EncodingKey::from_ec_pem(pem.as_bytes()).map_err(TriggerError::MalformedKey)?;

        let mut header = Header::new(Algorithm::ES256);
        header.kid = Some(credentials.key_id.clone());

        let claims = Claims {
            iss: credentials.issuer_id.clone(),
            aud: AUDIENCE.to_string(),
            iat: now,
            exp: now + TOKEN_LIFETIME_SECS,
        };

        let value = encode(&header, &claims, &key).map_err(TriggerError::MalformedKey)?;

        Ok(SignedToken {
            value,
            issued_at: claims.iat,
            expires_at: claims.exp,
        })
    }
}
