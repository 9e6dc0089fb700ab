//! Registration, password login and JWT access/refresh tokens.

use argon2::password_hash::rand_core::OsRng;
use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::Argon2;
use async_trait::async_trait;
use axum::extract::FromRequestParts;
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;
use chrono::{Duration, Utc};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, OnceLock};
use tracing::{info, warn};

use crate::error::{AppError, AppResult};
use crate::models::{NewUser, User};
use crate::server::AppState;
use crate::store::UserRepository;

static USERNAME_REGEX: OnceLock<Regex> = OnceLock::new();
static EMAIL_REGEX: OnceLock<Regex> = OnceLock::new();
static DUMMY_HASH: OnceLock<String> = OnceLock::new();

const PASSWORD_MIN_CHARS: usize = 8;
const PASSWORD_MAX_CHARS: usize = 100;

/// Hash a plain password with argon2id and a random salt.
pub fn hash_password(password: &str) -> AppResult<String> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| AppError::Internal(anyhow::anyhow!("password hashing failed: {}", e)))
}

/// Verified against when the username is unknown, keeping login timing uniform.
fn dummy_hash() -> &'static str {
    DUMMY_HASH.get_or_init(|| hash_password("not-a-real-password").unwrap_or_default())
}

/// Verify a password against a PHC hash string. Malformed hashes never match.
pub fn verify_password(password: &str, hash: &str) -> bool {
    match PasswordHash::new(hash) {
        Ok(parsed) => Argon2::default()
            .verify_password(password.as_bytes(), &parsed)
            .is_ok(),
        Err(_) => false,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenType {
    Access,
    Refresh,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Claims {
    /// Username
    pub sub: String,
    pub iat: i64,
    pub exp: i64,
    pub typ: TokenType,
}

#[derive(Debug, Clone, Serialize)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
    pub token_type: &'static str,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RegisterRequest {
    pub username: String,
    pub email: String,
    pub password: String,
}

impl RegisterRequest {
    pub fn validate(&self) -> AppResult<()> {
        let username_regex =
            USERNAME_REGEX.get_or_init(|| Regex::new(r"^[a-zA-Z0-9_-]+$").unwrap());
        let email_regex =
            EMAIL_REGEX.get_or_init(|| Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").unwrap());

        let username_len = self.username.chars().count();
        if !(3..=50).contains(&username_len) {
            return Err(AppError::validation(
                "username must be between 3 and 50 characters",
            ));
        }
        if !username_regex.is_match(&self.username) {
            return Err(AppError::validation(
                "username may only contain letters, digits, '_' and '-'",
            ));
        }
        if !email_regex.is_match(&self.email) {
            return Err(AppError::validation("email is not a valid address"));
        }
        let password_len = self.password.chars().count();
        if !(PASSWORD_MIN_CHARS..=PASSWORD_MAX_CHARS).contains(&password_len) {
            return Err(AppError::validation(format!(
                "password must be between {} and {} characters",
                PASSWORD_MIN_CHARS, PASSWORD_MAX_CHARS
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct AuthConfig {
    pub secret_key: String,
    pub access_ttl: Duration,
    pub refresh_ttl: Duration,
}

#[derive(Clone)]
pub struct AuthService {
    users: Arc<dyn UserRepository>,
    config: AuthConfig,
}

impl AuthService {
    pub fn new(users: Arc<dyn UserRepository>, config: AuthConfig) -> Self {
        Self { users, config }
    }

    pub async fn register(&self, request: RegisterRequest) -> AppResult<User> {
        request.validate()?;

        let password = request.password;
        // CPU-bound
        let password_hash = tokio::task::spawn_blocking(move || hash_password(&password))
            .await
            .map_err(|e| AppError::Internal(anyhow::anyhow!("hashing task failed: {}", e)))??;

        let user = self
            .users
            .create_user(NewUser {
                username: request.username,
                email: request.email,
                password_hash,
            })
            .await?;

        info!(user_id = user.id, username = %user.username, "User registered");
        Ok(user)
    }

    /// Check a username/password pair. Unknown users, wrong passwords and
    /// inactive accounts all fail the same way.
    pub async fn authenticate(&self, username: &str, password: &str) -> AppResult<User> {
        let invalid = || AppError::unauthorized("Incorrect username or password");

        let user = self.users.find_user_by_username(username).await?;

        // Unknown users still pay for a full verify
        let password = password.to_string();
        let hash = user.as_ref().map(|user| user.password_hash.clone());
        let matches = tokio::task::spawn_blocking(move || match hash {
            Some(hash) => verify_password(&password, &hash),
            None => {
                verify_password(&password, dummy_hash());
                false
            }
        })
        .await
        .map_err(|e| AppError::Internal(anyhow::anyhow!("verification task failed: {}", e)))?;

        match user {
            Some(user) if matches && user.is_active => Ok(user),
            _ => {
                warn!(username, "Failed login attempt");
                Err(invalid())
            }
        }
    }

    pub fn issue_tokens(&self, user: &User) -> AppResult<TokenPair> {
        Ok(TokenPair {
            access_token: self.encode(&user.username, TokenType::Access)?,
            refresh_token: self.encode(&user.username, TokenType::Refresh)?,
            token_type: "bearer",
        })
    }

    /// Exchange a refresh token for a new pair.
    pub async fn refresh(&self, refresh_token: &str) -> AppResult<TokenPair> {
        let claims = self.decode(refresh_token, TokenType::Refresh)?;
        let user = self.active_user(&claims.sub).await?;
        self.issue_tokens(&user)
    }

    /// Resolve an access token to its active user.
    pub async fn verify_access(&self, token: &str) -> AppResult<User> {
        let claims = self.decode(token, TokenType::Access)?;
        self.active_user(&claims.sub).await
    }

    async fn active_user(&self, username: &str) -> AppResult<User> {
        self.users
            .find_user_by_username(username)
            .await?
            .filter(|user| user.is_active)
            .ok_or_else(|| AppError::unauthorized("Could not validate credentials"))
    }

    fn encode(&self, username: &str, typ: TokenType) -> AppResult<String> {
        let now = Utc::now();
        let ttl = match typ {
            TokenType::Access => self.config.access_ttl,
            TokenType::Refresh => self.config.refresh_ttl,
        };
        let claims = Claims {
            sub: username.to_string(),
            iat: now.timestamp(),
            exp: (now + ttl).timestamp(),
            typ,
        };

        jsonwebtoken::encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(self.config.secret_key.as_bytes()),
        )
        .map_err(|e| AppError::Internal(anyhow::anyhow!("token signing failed: {}", e)))
    }

    fn decode(&self, token: &str, expected: TokenType) -> AppResult<Claims> {
        let validation = Validation::new(Algorithm::HS256);

        let claims = jsonwebtoken::decode::<Claims>(
            token,
            &DecodingKey::from_secret(self.config.secret_key.as_bytes()),
            &validation,
        )
        .map_err(|_| AppError::unauthorized("Could not validate credentials"))?
        .claims;

        if claims.typ != expected {
            return Err(AppError::unauthorized("Could not validate credentials"));
        }
        Ok(claims)
    }
}

/// The authenticated caller, from an `Authorization: Bearer` access token.
#[derive(Debug, Clone)]
pub struct CurrentUser(pub User);

#[async_trait]
impl FromRequestParts<AppState> for CurrentUser {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let token = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .and_then(bearer_token)
            .ok_or_else(|| AppError::unauthorized("Not authenticated"))?;

        state.auth.verify_access(token).await.map(CurrentUser)
    }
}

fn bearer_token(header: &str) -> Option<&str> {
    let (scheme, token) = header.split_once(' ')?;
    let token = token.trim();
    (scheme.eq_ignore_ascii_case("bearer") && !token.is_empty()).then_some(token)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryStore;

    fn service() -> AuthService {
        AuthService::new(
            Arc::new(MemoryStore::new()),
            AuthConfig {
                secret_key: "test-secret".into(),
                access_ttl: Duration::minutes(30),
                refresh_ttl: Duration::days(7),
            },
        )
    }

    fn request(username: &str, email: &str, password: &str) -> RegisterRequest {
        RegisterRequest {
            username: username.into(),
            email: email.into(),
            password: password.into(),
        }
    }

    // ==================== Password Tests ====================

    #[test]
    fn test_hash_and_verify_password() {
        let hash = hash_password("correct horse").unwrap();

        assert!(hash.starts_with("$argon2id$"));
        assert!(verify_password("correct horse", &hash));
        assert!(!verify_password("wrong horse", &hash));
        assert!(!verify_password("correct horse", "not-a-hash"));
    }

    #[test]
    fn test_dummy_hash_is_a_real_argon2_hash() {
        let hash = dummy_hash();

        assert!(hash.starts_with("$argon2id$"));
        assert!(PasswordHash::new(hash).is_ok());
        assert!(!verify_password("password1", hash));
        assert!(std::ptr::eq(hash, dummy_hash()));
    }

    #[test]
    fn test_hashes_are_salted() {
        assert_ne!(hash_password("same").unwrap(), hash_password("same").unwrap());
    }

    // ==================== Validation Tests ====================

    #[test]
    fn test_register_validation() {
        assert!(request("ivan_p", "ivan@example.com", "password1").validate().is_ok());
        assert!(request("iv", "ivan@example.com", "password1").validate().is_err());
        assert!(request("ivan p", "ivan@example.com", "password1").validate().is_err());
        assert!(request("иван", "ivan@example.com", "password1").validate().is_err());
        assert!(request("ivan", "not-an-email", "password1").validate().is_err());
        assert!(request("ivan", "ivan@example.com", "short").validate().is_err());
        assert!(request(&"a".repeat(51), "ivan@example.com", "password1").validate().is_err());
    }

    // ==================== Flow Tests ====================

    #[tokio::test]
    async fn test_register_login_and_verify() {
        let auth = service();

        let user = auth
            .register(request("ivan", "ivan@example.com", "password1"))
            .await
            .unwrap();
        assert_ne!(user.password_hash, "password1");

        let logged_in = auth.authenticate("ivan", "password1").await.unwrap();
        assert_eq!(logged_in.id, user.id);

        let tokens = auth.issue_tokens(&logged_in).unwrap();
        assert_eq!(tokens.token_type, "bearer");

        let verified = auth.verify_access(&tokens.access_token).await.unwrap();
        assert_eq!(verified.id, user.id);
    }

    #[tokio::test]
    async fn test_duplicate_registration_conflicts() {
        let auth = service();
        auth.register(request("ivan", "ivan@example.com", "password1"))
            .await
            .unwrap();

        let err = auth
            .register(request("ivan", "other@example.com", "password1"))
            .await
            .unwrap_err();

        assert!(matches!(err, AppError::Conflict(_)));
    }

    #[tokio::test]
    async fn test_bad_credentials_are_unauthorized() {
        let auth = service();
        auth.register(request("ivan", "ivan@example.com", "password1"))
            .await
            .unwrap();

        let wrong = auth.authenticate("ivan", "password2").await.unwrap_err();
        let unknown = auth.authenticate("petr", "password1").await.unwrap_err();

        assert!(matches!(wrong, AppError::Unauthorized(_)));
        assert!(matches!(unknown, AppError::Unauthorized(_)));
        assert_eq!(wrong.to_string(), unknown.to_string());
    }

    #[tokio::test]
    async fn test_token_types_are_not_interchangeable() {
        let auth = service();
        let user = auth
            .register(request("ivan", "ivan@example.com", "password1"))
            .await
            .unwrap();
        let tokens = auth.issue_tokens(&user).unwrap();

        assert!(auth.verify_access(&tokens.refresh_token).await.is_err());
        assert!(auth.refresh(&tokens.access_token).await.is_err());

        let renewed = auth.refresh(&tokens.refresh_token).await.unwrap();
        assert!(auth.verify_access(&renewed.access_token).await.is_ok());
    }

    #[tokio::test]
    async fn test_expired_and_foreign_tokens_rejected() {
        let auth = service();
        let user = auth
            .register(request("ivan", "ivan@example.com", "password1"))
            .await
            .unwrap();

        let expired = AuthService {
            config: AuthConfig {
                access_ttl: Duration::hours(-2),
                ..auth.config.clone()
            },
            ..auth.clone()
        }
        .issue_tokens(&user)
        .unwrap();
        assert!(auth.verify_access(&expired.access_token).await.is_err());

        let foreign = AuthService {
            config: AuthConfig {
                secret_key: "other-secret".into(),
                ..auth.config.clone()
            },
            ..auth.clone()
        }
        .issue_tokens(&user)
        .unwrap();
        assert!(auth.verify_access(&foreign.access_token).await.is_err());
        assert!(auth.verify_access("garbage").await.is_err());
    }

    #[test]
    fn test_bearer_token_parsing() {
        assert_eq!(bearer_token("Bearer abc"), Some("abc"));
        assert_eq!(bearer_token("bearer  abc "), Some("abc"));
        assert_eq!(bearer_token("Basic abc"), None);
        assert_eq!(bearer_token("Bearer "), None);
        assert_eq!(bearer_token("abc"), None);
    }
}
