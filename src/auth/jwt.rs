use chrono::{Duration, Utc};
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::AuthConfig;
use crate::error::AppError;
use crate::models::user::{Role, User};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TokenType {
    Access,
    Refresh,
}

/// Token payload. Carries enough of the user to authorize a request
/// without a store lookup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: Uuid,
    pub name: String,
    pub email: String,
    pub role: Role,
    pub is_active: bool,
    pub iat: i64,
    pub exp: i64,
    pub token_type: TokenType,
}

impl Claims {
    pub fn user_id(&self) -> Uuid {
        self.sub
    }
}

#[derive(Debug, Clone)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
}

/// Signing and verification keys. Access and refresh tokens use separate
/// secrets so a leaked access secret cannot mint refresh tokens.
#[derive(Clone)]
pub struct JwtKeys {
    access_encoding: EncodingKey,
    access_decoding: DecodingKey,
    refresh_encoding: EncodingKey,
    refresh_decoding: DecodingKey,
    access_ttl: Duration,
    refresh_ttl: Duration,
    validation: Validation,
}

impl std::fmt::Debug for JwtKeys {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JwtKeys")
            .field("access_ttl", &self.access_ttl)
            .field("refresh_ttl", &self.refresh_ttl)
            .finish()
    }
}

impl JwtKeys {
    pub fn new(config: &AuthConfig) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = true;
        validation.leeway = 5;

        Self {
            access_encoding: EncodingKey::from_secret(config.access_token_secret.as_bytes()),
            access_decoding: DecodingKey::from_secret(config.access_token_secret.as_bytes()),
            refresh_encoding: EncodingKey::from_secret(config.refresh_token_secret.as_bytes()),
            refresh_decoding: DecodingKey::from_secret(config.refresh_token_secret.as_bytes()),
            access_ttl: Duration::minutes(config.access_token_ttl_minutes),
            refresh_ttl: Duration::hours(config.refresh_token_ttl_hours),
            validation,
        }
    }

    pub fn issue_pair(&self, user: &User) -> Result<TokenPair, AppError> {
        let claims = Claims {
            sub: user.id,
            name: user.name.clone(),
            email: user.email.clone(),
            role: user.role,
            is_active: user.is_active,
            iat: 0,
            exp: 0,
            token_type: TokenType::Access,
        };
        self.reissue_pair(&claims)
    }

    /// Signs a fresh pair carrying the identity from `claims`.
    pub fn reissue_pair(&self, claims: &Claims) -> Result<TokenPair, AppError> {
        Ok(TokenPair {
            access_token: self.sign(claims, TokenType::Access)?,
            refresh_token: self.sign(claims, TokenType::Refresh)?,
        })
    }

    fn sign(&self, identity: &Claims, token_type: TokenType) -> Result<String, AppError> {
        let now = Utc::now();
        let (ttl, key) = match token_type {
            TokenType::Access => (self.access_ttl, &self.access_encoding),
            TokenType::Refresh => (self.refresh_ttl, &self.refresh_encoding),
        };

        let claims = Claims {
            iat: now.timestamp(),
            exp: (now + ttl).timestamp(),
            token_type,
            ..identity.clone()
        };

        encode(&Header::default(), &claims, key)
            .map_err(|err| AppError::Internal(format!("failed to sign token: {err}")))
    }

    pub fn verify_access(&self, token: &str) -> Result<Claims, AppError> {
        self.verify(token, &self.access_decoding, TokenType::Access)
    }

    pub fn verify_refresh(&self, token: &str) -> Result<Claims, AppError> {
        self.verify(token, &self.refresh_decoding, TokenType::Refresh)
    }

    fn verify(&self, token: &str, key: &DecodingKey, expected: TokenType) -> Result<Claims, AppError> {
        let data = decode::<Claims>(token, key, &self.validation).map_err(|err| {
            let reason = match err.kind() {
                ErrorKind::ExpiredSignature => "Token expired",
                _ => "Invalid token",
            };
            AppError::Authentication(reason.to_string())
        })?;

        if data.claims.token_type != expected {
            return Err(AppError::Authentication("Invalid token".to_string()));
        }
        Ok(data.claims)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;

    fn user() -> User {
        let now = Utc::now();
        User {
            id: Uuid::from_u128(5),
            name: "Nadia".to_string(),
            email: "nadia@example.com".to_string(),
            phone: None,
            address: None,
            role: Role::Admin,
            is_active: true,
            password_hash: String::new(),
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn access_token_round_trips_identity() {
        let keys = JwtKeys::new(&Config::for_tests().auth);
        let pair = keys.issue_pair(&user()).unwrap();

        let claims = keys.verify_access(&pair.access_token).unwrap();
        assert_eq!(claims.user_id(), Uuid::from_u128(5));
        assert_eq!(claims.role, Role::Admin);
        assert_eq!(claims.token_type, TokenType::Access);
        assert!(claims.exp > claims.iat);
    }

    #[test]
    fn tokens_are_not_interchangeable() {
        let keys = JwtKeys::new(&Config::for_tests().auth);
        let pair = keys.issue_pair(&user()).unwrap();

        assert!(keys.verify_access(&pair.refresh_token).is_err());
        assert!(keys.verify_refresh(&pair.access_token).is_err());
        assert!(keys.verify_refresh(&pair.refresh_token).is_ok());
    }

    #[test]
    fn garbage_is_an_authentication_error() {
        let keys = JwtKeys::new(&Config::for_tests().auth);
        let err = keys.verify_access("not-a-token").unwrap_err();
        assert!(matches!(err, AppError::Authentication(_)));
    }
}
