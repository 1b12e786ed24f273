//! Signing and verification of bearer tokens.

use chrono::{DateTime, Utc};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use thiserror::Error;

use crate::claims::{ClaimsError, JwtClaims, validate_claims};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TokenError {
    #[error("token could not be signed: {0}")]
    Encode(String),

    #[error("token is malformed or has a bad signature: {0}")]
    Decode(String),

    #[error(transparent)]
    Claims(#[from] ClaimsError),
}

/// Issues and verifies bearer tokens.
pub trait TokenCodec: Send + Sync {
    fn issue(&self, claims: &JwtClaims) -> Result<String, TokenError>;

    /// Verify signature and time window, returning the claims.
    fn verify(&self, token: &str, now: DateTime<Utc>) -> Result<JwtClaims, TokenError>;
}

/// HMAC-SHA256 signed JWTs.
pub struct Hs256TokenCodec {
    encoding: EncodingKey,
    decoding: DecodingKey,
}

impl Hs256TokenCodec {
    pub fn new(secret: impl AsRef<[u8]>) -> Self {
        let secret = secret.as_ref();
        Self {
            encoding: EncodingKey::from_secret(secret),
            decoding: DecodingKey::from_secret(secret),
        }
    }
}

impl TokenCodec for Hs256TokenCodec {
    fn issue(&self, claims: &JwtClaims) -> Result<String, TokenError> {
        jsonwebtoken::encode(&Header::new(Algorithm::HS256), claims, &self.encoding)
            .map_err(|e| TokenError::Encode(e.to_string()))
    }

    fn verify(&self, token: &str, now: DateTime<Utc>) -> Result<JwtClaims, TokenError> {
        // Time checks are done by `validate_claims` against the caller's clock.
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = false;
        validation.required_spec_claims.clear();

        let data = jsonwebtoken::decode::<JwtClaims>(token, &self.decoding, &validation)
            .map_err(|e| TokenError::Decode(e.to_string()))?;
        validate_claims(&data.claims, now)?;
        Ok(data.claims)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use loanportal_core::{SessionId, UserId};

    #[test]
    fn issued_token_verifies() {
        let codec = Hs256TokenCodec::new("secret");
        let now = Utc::now();
        let claims = JwtClaims::new(UserId::new(), SessionId::new(), now, Duration::minutes(10));

        let token = codec.issue(&claims).unwrap();
        assert_eq!(codec.verify(&token, now).unwrap(), claims);
    }

    #[test]
    fn wrong_secret_is_rejected() {
        let now = Utc::now();
        let claims = JwtClaims::new(UserId::new(), SessionId::new(), now, Duration::minutes(10));
        let token = Hs256TokenCodec::new("a").issue(&claims).unwrap();

        assert!(matches!(
            Hs256TokenCodec::new("b").verify(&token, now),
            Err(TokenError::Decode(_))
        ));
    }

    #[test]
    fn expired_token_is_rejected() {
        let codec = Hs256TokenCodec::new("secret");
        let then = Utc::now() - Duration::hours(2);
        let claims = JwtClaims::new(UserId::new(), SessionId::new(), then, Duration::minutes(10));
        let token = codec.issue(&claims).unwrap();

        assert_eq!(
            codec.verify(&token, Utc::now()),
            Err(TokenError::Claims(ClaimsError::Expired))
        );
    }
}
