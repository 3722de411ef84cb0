use std::time::{Duration, SystemTime};

use anyhow::{anyhow, Result};
use argon2::Argon2;
use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation};
use password_hash::rand_core::OsRng;
use password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use serde::{Deserialize, Serialize};

use crate::api::user::{Role, User};

#[derive(Clone, Debug)]
pub struct Auth {
    pub(crate) argon: Argon2<'static>,
}

impl Default for Auth {
    #[tracing::instrument(level = "trace")]
    fn default() -> Self {
        let argon = Argon2::default();
        Self { argon }
    }
}

impl Auth {
    /// Hashes `password` with a fresh salt into a PHC string.
    #[tracing::instrument(level = "info", skip_all)]
    pub fn hash_password(&self, password: &str) -> Result<String> {
        let salt = SaltString::generate(&mut OsRng);
        let hash = self
            .argon
            .hash_password(password.as_bytes(), &salt)
            .map_err(|e| anyhow!(e))?;
        Ok(hash.to_string())
    }

    #[tracing::instrument(level = "info", skip_all)]
    pub fn verify_password(&self, password: &str, hash: &str) -> Result<bool> {
        let hash = PasswordHash::new(hash).map_err(|e| anyhow!(e))?;
        Ok(self
            .argon
            .verify_password(password.as_bytes(), &hash)
            .is_ok())
    }
}

/// Identity carried inside a session token.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Claims {
    pub id: String,
    pub email: String,
    pub role: Role,
    pub iat: u64,
    pub exp: u64,
}

/// Signs and verifies HS256 session tokens with a shared secret.
#[derive(Clone)]
pub struct SessionKeys {
    encoding: EncodingKey,
    decoding: DecodingKey,
    ttl: Duration,
}

impl SessionKeys {
    pub fn new(secret: &str, ttl: Duration) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
            ttl,
        }
    }

    #[tracing::instrument(level = "info", skip_all, fields(user = %user.id))]
    pub fn issue(&self, user: &User) -> Result<String> {
        let now = SystemTime::now()
            .duration_since(SystemTime::UNIX_EPOCH)?
            .as_secs();
        let claims = Claims {
            id: user.id.clone(),
            email: user.email.clone(),
            role: user.role,
            iat: now,
            exp: now + self.ttl.as_secs(),
        };
        Ok(jsonwebtoken::encode(
            &Header::default(),
            &claims,
            &self.encoding,
        )?)
    }

    /// Checks signature and expiry, returning the embedded identity.
    pub fn verify(&self, token: &str) -> Result<Claims> {
        let data = jsonwebtoken::decode::<Claims>(token, &self.decoding, &Validation::default())?;
        Ok(data.claims)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user() -> User {
        User {
            id: "u1".into(),
            name: "Demo User".into(),
            email: "demo@example.com".into(),
            password: String::new(),
            role: Role::Admin,
            created_at: 0,
        }
    }

    #[test]
    fn password_round_trip() {
        let auth = Auth::default();
        let hash = auth.hash_password("password").unwrap();
        assert!(hash.starts_with("$argon2"));
        assert!(auth.verify_password("password", &hash).unwrap());
        assert!(!auth.verify_password("Password", &hash).unwrap());
    }

    #[test]
    fn malformed_hash_is_an_error() {
        assert!(Auth::default().verify_password("x", "not-a-hash").is_err());
    }

    #[test]
    fn issued_token_verifies_with_same_secret() {
        let keys = SessionKeys::new("secret", Duration::from_secs(3600));
        let token = keys.issue(&user()).unwrap();
        let claims = keys.verify(&token).unwrap();
        assert_eq!(claims.id, "u1");
        assert_eq!(claims.role, Role::Admin);
        assert_eq!(claims.exp - claims.iat, 3600);
    }

    #[test]
    fn foreign_signature_is_rejected() {
        let token = SessionKeys::new("other", Duration::from_secs(3600))
            .issue(&user())
            .unwrap();
        let keys = SessionKeys::new("secret", Duration::from_secs(3600));
        assert!(keys.verify(&token).is_err());
        assert!(keys.verify("not.a.token").is_err());
    }

    #[test]
    fn expired_token_is_rejected() {
        let keys = SessionKeys::new("secret", Duration::from_secs(3600));
        let claims = Claims {
            id: "u1".into(),
            email: "demo@example.com".into(),
            role: Role::Viewer,
            iat: 1_000,
            exp: 2_000,
        };
        let token =
            jsonwebtoken::encode(&Header::default(), &claims, &EncodingKey::from_secret(b"secret"))
                .unwrap();
        assert!(keys.verify(&token).is_err());
    }
}
