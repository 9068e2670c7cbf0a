use bcrypt::DEFAULT_COST;
use std::time::Instant;

use crate::database::Database;
use crate::errors::{classify_database_error, ApiError};
use crate::models::{LoginRequest, LoginResponse, RegisterRequest, User};
use crate::{log_service_start, log_service_success, log_validation};

const MIN_PASSWORD_CHARS: usize = 8;
const INVALID_CREDENTIALS: &str = "Invalid email or password";

#[derive(Clone)]
pub struct UserService {
    db: Database,
}

impl UserService {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub async fn register(&self, request: RegisterRequest) -> Result<User, ApiError> {
        let started = Instant::now();
        log_service_start!("user_service", "register");

        let email = request.email.trim().to_lowercase();
        validate_registration(&email, &request.password, &request.confirm_password).map_err(|message| {
            log_validation!(failure, "register", error = message);
            ApiError::ValidationError(message)
        })?;

        if self.db.get_user_by_email(&email).await?.is_some() {
            return Err(ApiError::DuplicateResource(format!("Email '{}' is already registered", email)));
        }

        let user = self
            .db
            .create_user(&email, &hash_password(&request.password).await?)
            .await
            .map_err(|e| classify_database_error(&e))?;

        log_service_success!("user_service", "register", user_id = user.id, duration_ms = started.elapsed().as_millis() as u64);
        Ok(user)
    }

    pub async fn login(&self, request: LoginRequest) -> Result<LoginResponse, ApiError> {
        let email = request.email.trim().to_lowercase();

        let user = self
            .db
            .get_user_by_email(&email)
            .await?
            .ok_or_else(|| ApiError::Unauthorized(INVALID_CREDENTIALS.to_string()))?;

        if !verify_password(&request.password, &user.password_hash).await? {
            return Err(ApiError::Unauthorized(INVALID_CREDENTIALS.to_string()));
        }

        log_service_success!("user_service", "login", "user authenticated");
        Ok(LoginResponse {
            user_id: user.id,
            email: user.email,
        })
    }
}

fn validate_registration(email: &str, password: &str, confirm_password: &str) -> Result<(), String> {
    if !email.contains('@') {
        return Err("Email address is not valid".to_string());
    }
    if password.chars().count() < MIN_PASSWORD_CHARS {
        return Err(format!("Password must be at least {} characters", MIN_PASSWORD_CHARS));
    }
    if !password.chars().any(|c| c.is_ascii_digit()) {
        return Err("Password must contain at least one digit".to_string());
    }
    if !password.chars().any(|c| c.is_uppercase()) {
        return Err("Password must contain at least one uppercase letter".to_string());
    }
    if password != confirm_password {
        return Err("Passwords do not match".to_string());
    }
    Ok(())
}

/// bcrypt with the crate's default cost, off the async runtime
pub async fn hash_password(password: &str) -> Result<String, ApiError> {
    let password = password.to_string();
    tokio::task::spawn_blocking(move || bcrypt::hash(password, DEFAULT_COST))
        .await
        .map_err(|e| ApiError::InternalError(format!("Password hashing task failed: {}", e)))?
        .map_err(|e| ApiError::InternalError(format!("Password hashing failed: {}", e)))
}

/// A stored value that is not a bcrypt hash is an internal error, not a mismatch
pub async fn verify_password(password: &str, stored: &str) -> Result<bool, ApiError> {
    let password = password.to_string();
    let stored = stored.to_string();
    tokio::task::spawn_blocking(move || bcrypt::verify(password, &stored))
        .await
        .map_err(|e| ApiError::InternalError(format!("Password check task failed: {}", e)))?
        .map_err(|e| ApiError::InternalError(format!("Password check failed: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_password_hash_is_salted_bcrypt() {
        let first = hash_password("Secret123").await.unwrap();
        let second = hash_password("Secret123").await.unwrap();
        assert_ne!(first, second);
        assert!(first.starts_with("$2b$12$"));
        assert!(verify_password("Secret123", &first).await.unwrap());
        assert!(verify_password("Secret123", &second).await.unwrap());
        assert!(!verify_password("secret123", &first).await.unwrap());
    }

    #[tokio::test]
    async fn test_unreadable_stored_hash_is_internal_error() {
        let err = verify_password("Secret123", "a1b2c3$deadbeef").await.unwrap_err();
        assert!(matches!(err, ApiError::InternalError(_)));
        assert_eq!(err.status_code(), axum::http::StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn test_registration_rules() {
        assert!(validate_registration("a@b.c", "Passw0rdX", "Passw0rdX").is_ok());
        assert!(validate_registration("not-an-email", "Passw0rdX", "Passw0rdX").is_err());
        assert!(validate_registration("a@b.c", "Pa55", "Pa55").is_err());
        assert!(validate_registration("a@b.c", "Password", "Password").is_err());
        assert!(validate_registration("a@b.c", "passw0rd", "passw0rd").is_err());
        assert_eq!(
            validate_registration("a@b.c", "Passw0rdX", "Passw0rdY").unwrap_err(),
            "Passwords do not match"
        );
    }
}
