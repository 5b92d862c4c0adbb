//! JWT token validation (and generation, for the token-issuing service and tests)

use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use reclaim_shared::UserId;
use serde::{Deserialize, Serialize};
use time::{Duration, OffsetDateTime};
use uuid::Uuid;

/// JWT claims structure for Reclaim-issued tokens
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// Subject (user ID)
    pub sub: Uuid,
    /// Issued at
    pub iat: i64,
    /// Expiration
    pub exp: i64,
    /// Token type (access or refresh)
    pub token_type: TokenType,
    /// JWT ID (jti) for session tracking and revocation
    pub jti: String,
}

impl Claims {
    pub fn user_id(&self) -> UserId {
        UserId(self.sub)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenType {
    Access,
    Refresh,
}

/// JWT manager for token operations
#[derive(Clone)]
pub struct JwtManager {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    access_token_expiry_hours: i64,
    refresh_token_expiry_days: i64,
}

impl JwtManager {
    /// Create a new JWT manager
    pub fn new(secret: &str, access_token_expiry_hours: i64) -> Self {
        Self {
            encoding_key: EncodingKey::from_secret(secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            access_token_expiry_hours,
            refresh_token_expiry_days: 30, // Refresh tokens last 30 days
        }
    }

    /// Generate an access token with unique JTI for session tracking
    pub fn generate_access_token(&self, user_id: UserId) -> Result<(String, String), JwtError> {
        let now = OffsetDateTime::now_utc();
        let exp = now + Duration::hours(self.access_token_expiry_hours);
        let jti = Uuid::new_v4().to_string(); // Unique token ID for revocation

        let claims = Claims {
            sub: user_id.0,
            iat: now.unix_timestamp(),
            exp: exp.unix_timestamp(),
            token_type: TokenType::Access,
            jti: jti.clone(),
        };

        // Explicit algorithm prevents algorithm confusion attacks
        let token = encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)
            .map_err(|e| JwtError::Encoding(e.to_string()))?;

        Ok((token, jti))
    }

    /// Generate a refresh token with unique JTI for session tracking
    pub fn generate_refresh_token(&self, user_id: UserId) -> Result<(String, String), JwtError> {
        let now = OffsetDateTime::now_utc();
        let exp = now + Duration::days(self.refresh_token_expiry_days);
        let jti = Uuid::new_v4().to_string();

        let claims = Claims {
            sub: user_id.0,
            iat: now.unix_timestamp(),
            exp: exp.unix_timestamp(),
            token_type: TokenType::Refresh,
            jti: jti.clone(),
        };

        let token = encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)
            .map_err(|e| JwtError::Encoding(e.to_string()))?;

        Ok((token, jti))
    }

    /// Validate and decode a token
    /// Explicit algorithm validation prevents algorithm confusion attacks
    pub fn validate_token(&self, token: &str) -> Result<Claims, JwtError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 60; // 60 second clock skew tolerance

        decode::<Claims>(token, &self.decoding_key, &validation)
            .map(|data| data.claims)
            .map_err(|e| match e.kind() {
                jsonwebtoken::errors::ErrorKind::ExpiredSignature => JwtError::Expired,
                jsonwebtoken::errors::ErrorKind::InvalidToken => JwtError::Invalid,
                jsonwebtoken::errors::ErrorKind::InvalidAlgorithm => JwtError::Invalid,
                _ => JwtError::Validation(e.to_string()),
            })
    }

    /// Validate an access token specifically
    pub fn validate_access_token(&self, token: &str) -> Result<Claims, JwtError> {
        let claims = self.validate_token(token)?;
        if claims.token_type != TokenType::Access {
            return Err(JwtError::WrongTokenType);
        }
        Ok(claims)
    }

    /// Validate a refresh token specifically
    pub fn validate_refresh_token(&self, token: &str) -> Result<Claims, JwtError> {
        let claims = self.validate_token(token)?;
        if claims.token_type != TokenType::Refresh {
            return Err(JwtError::WrongTokenType);
        }
        Ok(claims)
    }

    /// Get access token expiry in seconds
    pub fn access_token_expiry_seconds(&self) -> i64 {
        self.access_token_expiry_hours * 3600
    }
}

#[derive(Debug, thiserror::Error)]
pub enum JwtError {
    #[error("Token has expired")]
    Expired,
    #[error("Invalid token")]
    Invalid,
    #[error("Wrong token type")]
    WrongTokenType,
    #[error("Token encoding failed: {0}")]
    Encoding(String),
    #[error("Token validation failed: {0}")]
    Validation(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_generation_and_validation() {
        let jwt = JwtManager::new("test-secret-key-at-least-32-chars!", 24);
        let user_id = UserId::new();

        let (access_token, access_jti) = jwt
            .generate_access_token(user_id)
            .expect("Failed to generate token");

        let claims = jwt
            .validate_access_token(&access_token)
            .expect("Invalid access token");
        assert_eq!(claims.sub, user_id.0);
        assert_eq!(claims.user_id(), user_id);
        assert_eq!(claims.token_type, TokenType::Access);
        assert_eq!(claims.jti, access_jti);
        assert!(!claims.jti.is_empty());
    }

    #[test]
    fn test_wrong_token_type() {
        let jwt = JwtManager::new("test-secret-key-at-least-32-chars!", 24);
        let user_id = UserId::new();

        let (access_token, _jti) = jwt
            .generate_access_token(user_id)
            .expect("Failed to generate token");

        // Using access token as refresh should fail
        let result = jwt.validate_refresh_token(&access_token);
        assert!(matches!(result, Err(JwtError::WrongTokenType)));
    }

    #[test]
    fn test_garbage_token_rejected() {
        let jwt = JwtManager::new("test-secret-key-at-least-32-chars!", 24);
        let result = jwt.validate_access_token("not-a-token");
        assert!(result.is_err());
    }

    #[test]
    fn test_token_from_other_secret_rejected() {
        let issuer = JwtManager::new("first-secret-key-at-least-32-chars!!", 24);
        let validator = JwtManager::new("other-secret-key-at-least-32-chars!", 24);

        let (token, _jti) = issuer
            .generate_access_token(UserId::new())
            .expect("Failed to generate token");

        assert!(validator.validate_access_token(&token).is_err());
    }
}
