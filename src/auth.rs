use bcrypt::{hash, verify};
use chrono::Utc;
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use std::time::Duration;
use uuid::Uuid;

use crate::models::{AuthPayload, Identity};

pub const ACCESS_TOKEN_TTL: Duration = Duration::from_secs(15 * 60);
pub const REFRESH_TOKEN_TTL: Duration = Duration::from_secs(7 * 24 * 60 * 60);

pub fn hash_password(password: &str, cost: u32) -> Result<String, bcrypt::BcryptError> {
    hash(password, cost)
}

pub fn verify_password(password: &str, hash: &str) -> Result<bool, bcrypt::BcryptError> {
    verify(password, hash)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    Access,
    Refresh,
}

#[derive(Debug, thiserror::Error)]
pub enum TokenError {
    #[error("token has expired")]
    Expired,

    /// Malformed token, bad signature, or signed with the other secret.
    #[error("invalid token: {0}")]
    Invalid(String),

    /// Well-formed and correctly signed, but failed another validation rule.
    #[error("token rejected: {0}")]
    Rejected(String),

    #[error("failed to sign token: {0}")]
    Encode(#[source] jsonwebtoken::errors::Error),
}

impl From<jsonwebtoken::errors::Error> for TokenError {
    fn from(err: jsonwebtoken::errors::Error) -> Self {
        match err.kind() {
            ErrorKind::ExpiredSignature => TokenError::Expired,
            ErrorKind::InvalidToken
            | ErrorKind::InvalidSignature
            | ErrorKind::InvalidAlgorithm
            | ErrorKind::InvalidAlgorithmName
            | ErrorKind::MissingRequiredClaim(_)
            | ErrorKind::Base64(_)
            | ErrorKind::Json(_)
            | ErrorKind::Utf8(_) => TokenError::Invalid(err.to_string()),
            _ => TokenError::Rejected(err.to_string()),
        }
    }
}

struct SigningKey {
    encoding: EncodingKey,
    decoding: DecodingKey,
    ttl: Duration,
}

impl SigningKey {
    fn new(secret: &str, ttl: Duration) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
            ttl,
        }
    }
}

/// Issues and verifies the access/refresh token pair. Each kind has its own
/// secret, so a refresh token never passes as an access token or vice versa.
pub struct TokenCodec {
    access: SigningKey,
    refresh: SigningKey,
    validation: Validation,
}

impl TokenCodec {
    pub fn new(access_secret: &str, refresh_secret: &str) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        // Expiry is exact; jsonwebtoken defaults to 60s of leeway.
        validation.leeway = 0;
        validation.set_required_spec_claims(&["exp"]);

        Self {
            access: SigningKey::new(access_secret, ACCESS_TOKEN_TTL),
            refresh: SigningKey::new(refresh_secret, REFRESH_TOKEN_TTL),
            validation,
        }
    }

    fn key(&self, kind: TokenKind) -> &SigningKey {
        match kind {
            TokenKind::Access => &self.access,
            TokenKind::Refresh => &self.refresh,
        }
    }

    pub fn issue_access_token(&self, user_id: &str) -> Result<String, TokenError> {
        self.issue(TokenKind::Access, user_id, now())
    }

    pub fn issue_refresh_token(&self, user_id: &str) -> Result<String, TokenError> {
        self.issue(TokenKind::Refresh, user_id, now())
    }

    /// Issue a token as if it had been signed at `issued_at` (unix seconds).
    pub fn issue(
        &self,
        kind: TokenKind,
        user_id: &str,
        issued_at: u64,
    ) -> Result<String, TokenError> {
        let key = self.key(kind);
        let claims = AuthPayload {
            user_id: user_id.to_owned(),
            jti: Uuid::new_v4().to_string(),
            iat: issued_at,
            exp: issued_at + key.ttl.as_secs(),
        };

        encode(&Header::new(Algorithm::HS256), &claims, &key.encoding).map_err(TokenError::Encode)
    }

    pub fn verify(&self, kind: TokenKind, token: &str) -> Result<Identity, TokenError> {
        let token_data = decode::<AuthPayload>(token, &self.key(kind).decoding, &self.validation)?;
        if token_data.claims.user_id.is_empty() {
            return Err(TokenError::Invalid("token carries no user id".into()));
        }
        Ok(Identity {
            user_id: token_data.claims.user_id,
        })
    }
}

fn now() -> u64 {
    Utc::now().timestamp().max(0) as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    fn codec() -> TokenCodec {
        TokenCodec::new("access-secret-for-tests", "refresh-secret-for-tests")
    }

    #[test]
    fn access_token_round_trips_identity() {
        let codec = codec();
        let token = codec.issue_access_token("user-1").unwrap();
        let identity = codec.verify(TokenKind::Access, &token).unwrap();
        assert_eq!(identity.user_id, "user-1");
    }

    #[test]
    fn refresh_token_is_not_an_access_token() {
        let codec = codec();
        let refresh = codec.issue_refresh_token("user-1").unwrap();
        assert!(matches!(
            codec.verify(TokenKind::Access, &refresh),
            Err(TokenError::Invalid(_))
        ));
        assert!(codec.verify(TokenKind::Refresh, &refresh).is_ok());
    }

    #[test]
    fn one_second_past_expiry_is_expired() {
        let codec = codec();
        let issued_at = now() - ACCESS_TOKEN_TTL.as_secs() - 1;
        let token = codec.issue(TokenKind::Access, "user-1", issued_at).unwrap();
        assert!(matches!(
            codec.verify(TokenKind::Access, &token),
            Err(TokenError::Expired)
        ));
    }

    #[test]
    fn garbage_is_invalid() {
        assert!(matches!(
            codec().verify(TokenKind::Access, "not.a.jwt"),
            Err(TokenError::Invalid(_))
        ));
    }

    #[test]
    fn tokens_issued_together_differ() {
        let codec = codec();
        let a = codec.issue(TokenKind::Access, "user-1", 1_000).unwrap();
        let b = codec.issue(TokenKind::Access, "user-1", 1_000).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn password_hash_verifies() {
        let hashed = hash_password("secret1", 4).unwrap();
        assert!(verify_password("secret1", &hashed).unwrap());
        assert!(!verify_password("wrong", &hashed).unwrap());
    }
}
