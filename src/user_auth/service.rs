//! User authentication service: argon2 password hashing + HS256 JWTs.

use argon2::{
    Argon2,
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString, rand_core::OsRng},
};
use chrono::{Duration, Utc};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use utoipa::ToSchema;
use validator::Validate;

use crate::error::{EngineError, with_retry};
use crate::models::User;
use crate::store::{StoreError, UserRepository};

/// JWT Claims structure
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Claims {
    pub sub: String,   // Subject (user id)
    pub email: String, // Convenience copy for logging/support
    pub exp: usize,    // Expiration time (as UTC timestamp)
    pub iat: usize,    // Issued at
}

/// User Registration Request
#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct RegisterRequest {
    #[validate(length(min = 2, max = 100))]
    #[schema(example = "Ada Lovelace")]
    pub name: String,
    #[validate(email)]
    #[schema(example = "ada@example.com")]
    pub email: String,
    #[validate(length(min = 8, max = 128))]
    #[schema(example = "password123")]
    pub password: String,
}

/// User Login Request
#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct LoginRequest {
    #[validate(email)]
    #[schema(example = "ada@example.com")]
    pub email: String,
    #[schema(example = "password123")]
    pub password: String,
}

/// Auth Response (JWT)
#[derive(Debug, Serialize, ToSchema)]
pub struct AuthResponse {
    pub token: String,
    pub user_id: uuid::Uuid,
    pub name: String,
    pub email: String,
}

pub struct UserAuthService {
    users: Arc<dyn UserRepository>,
    jwt_secret: String,
    token_ttl: Duration,
}

impl UserAuthService {
    pub fn new(users: Arc<dyn UserRepository>, jwt_secret: String, token_ttl_hours: i64) -> Self {
        Self {
            users,
            jwt_secret,
            token_ttl: Duration::hours(token_ttl_hours.max(1)),
        }
    }

    /// Register a new user and issue a token.
    pub async fn register(&self, req: RegisterRequest) -> Result<AuthResponse, EngineError> {
        let salt = SaltString::generate(&mut OsRng);
        let argon2 = Argon2::default();
        let password_hash = argon2
            .hash_password(req.password.as_bytes(), &salt)
            .map_err(|e| EngineError::Internal(format!("hashing failed: {e}")))?
            .to_string();

        let user = User::new(req.email.trim().to_lowercase(), req.name, password_hash);
        match with_retry(|| self.users.insert(&user)).await {
            Ok(()) => {}
            Err(StoreError::Conflict(_)) => {
                return Err(EngineError::InvalidState("email already registered".into()));
            }
            Err(e) => return Err(e.into()),
        }
        tracing::info!(user = %user.id, "User registered");

        let token = self.issue_token(&user)?;
        Ok(AuthResponse {
            token,
            user_id: user.id,
            name: user.name,
            email: user.email,
        })
    }

    /// Verify credentials and issue a token.
    pub async fn login(&self, req: LoginRequest) -> Result<AuthResponse, EngineError> {
        let email = req.email.trim().to_lowercase();
        let user = with_retry(|| self.users.find_by_email(&email))
            .await?
            .filter(|u| u.active)
            .ok_or(EngineError::Unauthorized)?;

        let parsed_hash = PasswordHash::new(&user.password_hash)
            .map_err(|e| EngineError::Internal(format!("invalid hash format: {e}")))?;
        Argon2::default()
            .verify_password(req.password.as_bytes(), &parsed_hash)
            .map_err(|_| EngineError::Unauthorized)?;

        let token = self.issue_token(&user)?;
        Ok(AuthResponse {
            token,
            user_id: user.id,
            name: user.name,
            email: user.email,
        })
    }

    /// Sign a bearer token for `user`.
    pub fn issue_token(&self, user: &User) -> Result<String, EngineError> {
        let now = Utc::now();
        let expiration = now
            .checked_add_signed(self.token_ttl)
            .unwrap_or(now)
            .timestamp();

        let claims = Claims {
            sub: user.id.to_string(),
            email: user.email.clone(),
            exp: expiration as usize,
            iat: now.timestamp() as usize,
        };

        encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(self.jwt_secret.as_bytes()),
        )
        .map_err(|e| EngineError::Internal(format!("token signing failed: {e}")))
    }

    /// Verify a bearer token's signature and expiry.
    pub fn verify_token(&self, token: &str) -> Result<Claims, EngineError> {
        let decoding_key = DecodingKey::from_secret(self.jwt_secret.as_bytes());
        let validation = Validation::new(Algorithm::HS256);
        let token_data =
            decode::<Claims>(token, &decoding_key, &validation).map_err(|_| EngineError::Unauthorized)?;
        Ok(token_data.claims)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    fn service() -> UserAuthService {
        UserAuthService::new(Arc::new(MemoryStore::new()), "test-secret".into(), 24)
    }

    #[tokio::test]
    async fn test_register_login_verify_round_trip() {
        let auth = service();
        let registered = auth
            .register(RegisterRequest {
                name: "Ada".into(),
                email: "Ada@Example.com".into(),
                password: "password123".into(),
            })
            .await
            .unwrap();
        assert_eq!(registered.email, "ada@example.com");

        let logged_in = auth
            .login(LoginRequest {
                email: "ada@example.com".into(),
                password: "password123".into(),
            })
            .await
            .unwrap();
        assert_eq!(logged_in.user_id, registered.user_id);

        let claims = auth.verify_token(&logged_in.token).unwrap();
        assert_eq!(claims.sub, registered.user_id.to_string());
    }

    #[tokio::test]
    async fn test_duplicate_email_rejected() {
        let auth = service();
        let req = || RegisterRequest {
            name: "Ada".into(),
            email: "ada@example.com".into(),
            password: "password123".into(),
        };
        auth.register(req()).await.unwrap();
        assert!(matches!(
            auth.register(req()).await,
            Err(EngineError::InvalidState(_))
        ));
    }

    #[tokio::test]
    async fn test_wrong_password_and_bad_token() {
        let auth = service();
        auth.register(RegisterRequest {
            name: "Ada".into(),
            email: "ada@example.com".into(),
            password: "password123".into(),
        })
        .await
        .unwrap();

        assert!(matches!(
            auth.login(LoginRequest {
                email: "ada@example.com".into(),
                password: "wrong-password".into(),
            })
            .await,
            Err(EngineError::Unauthorized)
        ));
        assert!(matches!(
            auth.verify_token("not.a.token"),
            Err(EngineError::Unauthorized)
        ));
    }
}
