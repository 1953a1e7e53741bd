//! Bearer token validation shared by the chat socket handshake and the REST API.
//!
//! Tokens are issued by the account service (HS256, shared secret) and carry the
//! user id in a `user_id` claim; `sub` is accepted as a fallback so tokens minted
//! by other tooling keep working.
//!
//! ## Usage
//!
//! ```rust
//! use crypto_core::jwt::JwtValidator;
//!
//! let validator = JwtValidator::from_secret(b"a-very-long-shared-secret-of-32-bytes!").unwrap();
//! let token = validator
//!     .issue_access_token(uuid::Uuid::new_v4(), "alice", chrono::Duration::minutes(5))
//!     .unwrap();
//! let claims = validator.validate(&token).unwrap();
//! assert_eq!(claims.username.as_deref(), Some("alice"));
//! ```
use chrono::{Duration, Utc};
use jsonwebtoken::{
    decode, encode, errors::ErrorKind, Algorithm, DecodingKey, EncodingKey, Header, Validation,
};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Minimum accepted HS256 secret length in bytes
pub const MIN_SECRET_LEN: usize = 32;

const JWT_ALGORITHM: Algorithm = Algorithm::HS256;
const ACCESS_TOKEN_TYPE: &str = "access";

#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum JwtError {
    #[error("token expired")]
    Expired,

    #[error("invalid token: {0}")]
    Invalid(String),

    #[error("unexpected token type: {0}")]
    WrongTokenType(String),

    #[error("token has no subject")]
    MissingSubject,

    #[error("malformed subject: {0}")]
    MalformedSubject(String),

    #[error("secret must be at least {MIN_SECRET_LEN} bytes")]
    WeakSecret,

    #[error("failed to sign token: {0}")]
    Signing(String),
}

/// Claims understood by the chat services
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Claims {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sub: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    /// "access" or "refresh"; absent on some third-party tokens
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_type: Option<String>,
    pub exp: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iat: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jti: Option<String>,
}

impl Claims {
    /// User id carried by the token
    pub fn subject(&self) -> Result<Uuid, JwtError> {
        let raw = self
            .user_id
            .as_deref()
            .or(self.sub.as_deref())
            .ok_or(JwtError::MissingSubject)?;

        Uuid::parse_str(raw).map_err(|_| JwtError::MalformedSubject(raw.to_string()))
    }
}

/// Validates (and, for tooling, issues) HS256 bearer tokens.
///
/// Constructed once at startup and shared behind an `Arc`.
#[derive(Clone)]
pub struct JwtValidator {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    validation: Validation,
}

impl fmt::Debug for JwtValidator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JwtValidator")
            .field("algorithm", &JWT_ALGORITHM)
            .field("secret", &"[REDACTED]")
            .finish()
    }
}

impl JwtValidator {
    pub fn from_secret(secret: &[u8]) -> Result<Self, JwtError> {
        if secret.len() < MIN_SECRET_LEN {
            return Err(JwtError::WeakSecret);
        }

        let mut validation = Validation::new(JWT_ALGORITHM);
        validation.validate_exp = true;

        Ok(Self {
            encoding_key: EncodingKey::from_secret(secret),
            decoding_key: DecodingKey::from_secret(secret),
            validation,
        })
    }

    /// Verify signature and expiry, reject non-access tokens.
    pub fn validate(&self, token: &str) -> Result<Claims, JwtError> {
        let data = decode::<Claims>(token, &self.decoding_key, &self.validation).map_err(|e| {
            match e.kind() {
                ErrorKind::ExpiredSignature => JwtError::Expired,
                _ => JwtError::Invalid(e.to_string()),
            }
        })?;

        let claims = data.claims;
        if let Some(token_type) = claims.token_type.as_deref() {
            if token_type != ACCESS_TOKEN_TYPE {
                return Err(JwtError::WrongTokenType(token_type.to_string()));
            }
        }

        Ok(claims)
    }

    /// Validate and return the user id in one step
    pub fn user_id(&self, token: &str) -> Result<Uuid, JwtError> {
        self.validate(token)?.subject()
    }

    pub fn issue_access_token(
        &self,
        user_id: Uuid,
        username: &str,
        ttl: Duration,
    ) -> Result<String, JwtError> {
        let now = Utc::now();
        let claims = Claims {
            user_id: Some(user_id.to_string()),
            sub: None,
            username: Some(username.to_string()),
            token_type: Some(ACCESS_TOKEN_TYPE.to_string()),
            exp: (now + ttl).timestamp(),
            iat: Some(now.timestamp()),
            jti: Some(Uuid::new_v4().simple().to_string()),
        };

        self.sign(&claims)
    }

    pub fn sign(&self, claims: &Claims) -> Result<String, JwtError> {
        encode(&Header::new(JWT_ALGORITHM), claims, &self.encoding_key)
            .map_err(|e| JwtError::Signing(e.to_string()))
    }
}

/// Pull a bearer token out of an `Authorization` header value
pub fn bearer_token(header_value: &str) -> Option<&str> {
    header_value
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &[u8] = b"test-secret-key-min-32-chars-long!!!";

    fn validator() -> JwtValidator {
        JwtValidator::from_secret(SECRET).unwrap()
    }

    #[test]
    fn test_issue_and_validate_roundtrip() {
        let v = validator();
        let user_id = Uuid::new_v4();
        let token = v
            .issue_access_token(user_id, "alice", Duration::minutes(5))
            .unwrap();

        assert_eq!(token.matches('.').count(), 2);
        assert_eq!(v.user_id(&token).unwrap(), user_id);
    }

    #[test]
    fn test_short_secret_rejected() {
        assert_eq!(
            JwtValidator::from_secret(b"short").unwrap_err(),
            JwtError::WeakSecret
        );
    }

    #[test]
    fn test_expired_token_rejected() {
        let v = validator();
        let token = v
            .issue_access_token(Uuid::new_v4(), "alice", Duration::hours(-2))
            .unwrap();

        assert_eq!(v.validate(&token).unwrap_err(), JwtError::Expired);
    }

    #[test]
    fn test_wrong_signature_rejected() {
        let other = JwtValidator::from_secret(b"wrong-secret-key!!!!!!!!!!!!!!!!!!").unwrap();
        let token = other
            .issue_access_token(Uuid::new_v4(), "mallory", Duration::minutes(5))
            .unwrap();

        assert!(matches!(
            validator().validate(&token),
            Err(JwtError::Invalid(_))
        ));
    }

    #[test]
    fn test_refresh_token_rejected() {
        let v = validator();
        let claims = Claims {
            user_id: Some(Uuid::new_v4().to_string()),
            sub: None,
            username: None,
            token_type: Some("refresh".into()),
            exp: (Utc::now() + Duration::minutes(5)).timestamp(),
            iat: None,
            jti: None,
        };
        let token = v.sign(&claims).unwrap();

        assert_eq!(
            v.validate(&token).unwrap_err(),
            JwtError::WrongTokenType("refresh".into())
        );
    }

    #[test]
    fn test_sub_fallback_and_malformed_subject() {
        let v = validator();
        let user_id = Uuid::new_v4();
        let mut claims = Claims {
            user_id: None,
            sub: Some(user_id.to_string()),
            username: None,
            token_type: None,
            exp: (Utc::now() + Duration::minutes(5)).timestamp(),
            iat: None,
            jti: None,
        };
        assert_eq!(v.user_id(&v.sign(&claims).unwrap()).unwrap(), user_id);

        claims.sub = Some("user-42".into());
        assert_eq!(
            v.user_id(&v.sign(&claims).unwrap()).unwrap_err(),
            JwtError::MalformedSubject("user-42".into())
        );
    }

    #[test]
    fn test_malformed_token() {
        assert!(matches!(
            validator().validate("invalid.token.format"),
            Err(JwtError::Invalid(_))
        ));
    }

    #[test]
    fn test_bearer_token() {
        assert_eq!(bearer_token("Bearer abc"), Some("abc"));
        assert_eq!(bearer_token("Basic abc"), None);
        assert_eq!(bearer_token("Bearer "), None);
    }
}
