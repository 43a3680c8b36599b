//! JWT identity tokens
//!
//! The subject of a verified token becomes the request identity, which
//! per-user caches fold into their keys.

use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Token lifetime used when the caller does not pick one
pub const DEFAULT_TOKEN_HOURS: i64 = 24;

#[derive(Error, Debug)]
pub enum AuthError {
    #[error("authorization header is not a bearer token")]
    NotBearer,

    #[error("empty bearer token")]
    EmptyToken,

    #[error("invalid token: {0}")]
    InvalidToken(#[source] jsonwebtoken::errors::Error),

    #[error("failed to issue token: {0}")]
    Issue(#[source] jsonwebtoken::errors::Error),
}

/// JWT claims structure
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct Claims {
    /// Subject: the user identifier
    pub sub: String,
    /// Issued at (timestamp)
    pub iat: i64,
    /// Expiration time (timestamp)
    pub exp: i64,
}

/// Issues and verifies HS256 identity tokens
pub struct JwtAuth {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    validation: Validation,
}

impl JwtAuth {
    pub fn new(secret: &str) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = true;

        Self {
            encoding_key: EncodingKey::from_secret(secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            validation,
        }
    }

    /// Issue a token for `user_id`, valid for `hours`
    pub fn issue(&self, user_id: &str, hours: i64) -> Result<String, AuthError> {
        let now = Utc::now();
        let claims = Claims {
            sub: user_id.to_string(),
            iat: now.timestamp(),
            exp: (now + Duration::hours(hours)).timestamp(),
        };

        encode(&Header::default(), &claims, &self.encoding_key).map_err(AuthError::Issue)
    }

    /// Verify signature and expiry, returning the claims
    pub fn verify(&self, token: &str) -> Result<Claims, AuthError> {
        decode::<Claims>(token, &self.decoding_key, &self.validation)
            .map(|data| data.claims)
            .map_err(AuthError::InvalidToken)
    }

    /// Token part of an `Authorization: Bearer <token>` header value
    pub fn bearer_token(header: &str) -> Result<&str, AuthError> {
        let token = header.strip_prefix("Bearer ").ok_or(AuthError::NotBearer)?.trim();
        if token.is_empty() {
            return Err(AuthError::EmptyToken);
        }
        Ok(token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_issue_and_verify() {
        let auth = JwtAuth::new("test_secret_key_12345");

        let token = auth.issue("user123", 1).unwrap();
        let claims = auth.verify(&token).unwrap();

        assert_eq!(claims.sub, "user123");
        assert!(claims.exp > claims.iat);
    }

    #[test]
    fn test_wrong_secret_is_rejected() {
        let token = JwtAuth::new("one").issue("user123", 1).unwrap();
        assert!(matches!(
            JwtAuth::new("two").verify(&token),
            Err(AuthError::InvalidToken(_))
        ));
    }

    #[test]
    fn test_expired_token_is_rejected() {
        let auth = JwtAuth::new("test_secret_key_12345");
        let token = auth.issue("user123", -2).unwrap();
        assert!(auth.verify(&token).is_err());
    }

    #[test]
    fn test_bearer_token() {
        assert_eq!(JwtAuth::bearer_token("Bearer abc.def").unwrap(), "abc.def");
        assert!(matches!(JwtAuth::bearer_token("Basic abc"), Err(AuthError::NotBearer)));
        assert!(matches!(JwtAuth::bearer_token("Bearer  "), Err(AuthError::EmptyToken)));
    }
}
