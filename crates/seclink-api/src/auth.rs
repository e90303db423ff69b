use std::sync::Arc;

use argon2::{Argon2, PasswordHash, PasswordHasher, PasswordVerifier, password_hash::{SaltString, rand_core::OsRng}};
use axum::extract::State;
use jsonwebtoken::{EncodingKey, Header, encode};
use tracing::{error, info};
use uuid::Uuid;

use seclink_db::Database;
use seclink_types::api::{Claims, LoginRequest, LoginResponse, UserSummary};
use seclink_types::models::Role;

use crate::error::{ApiError, ApiResult};
use crate::extract::Json;
use crate::files::ResumeStore;

pub type AppState = Arc<AppStateInner>;

pub struct AppStateInner {
    pub db: Database,
    pub jwt_secret: String,
    pub token_ttl: chrono::Duration,
    pub resumes: ResumeStore,
}

impl AppStateInner {
    /// Run a blocking database call off the async runtime.
    pub async fn with_db<F, T>(self: &Arc<Self>, f: F) -> ApiResult<T>
    where
        F: FnOnce(&Database) -> anyhow::Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let state = self.clone();
        tokio::task::spawn_blocking(move || f(&state.db))
            .await
            .map_err(|e| {
                error!("spawn_blocking join error: {}", e);
                ApiError::Storage(e.into())
            })?
            .map_err(ApiError::Storage)
    }
}

pub async fn login(
    State(state): State<AppState>,
    Json(req): Json<LoginRequest>,
) -> ApiResult<Json<LoginResponse>> {
    let email = normalize_email(&req.email);
    if email.is_empty() || req.password.is_empty() {
        return Err(ApiError::validation("email and password are required"));
    }

    let user = state
        .with_db(move |db| db.get_user_by_email(&email))
        .await?
        .ok_or(ApiError::Unauthorized)?;

    // Verify password
    if !verify_password(&req.password, &user.password)? {
        return Err(ApiError::Unauthorized);
    }

    let user = user.to_user()?;
    let token = create_token(&state, user.id, user.role, user.ref_id)?;

    info!("User {} logged in as {}", user.id, user.role);
    Ok(Json(LoginResponse {
        token,
        user: UserSummary {
            id: user.id,
            email: user.email,
            role: user.role,
            ref_id: user.ref_id,
        },
    }))
}

pub fn create_token(
    state: &AppStateInner,
    user_id: Uuid,
    role: Role,
    ref_id: Option<Uuid>,
) -> anyhow::Result<String> {
    let claims = Claims {
        sub: user_id,
        role,
        ref_id,
        exp: (chrono::Utc::now() + state.token_ttl).timestamp() as usize,
    };

    let token = encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(state.jwt_secret.as_bytes()),
    )?;

    Ok(token)
}

/// Hash a password with Argon2id and a fresh random salt.
pub fn hash_password(password: &str) -> anyhow::Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    let hash = Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| anyhow::anyhow!("password hashing failed: {}", e))?
        .to_string();
    Ok(hash)
}

fn verify_password(password: &str, stored_hash: &str) -> anyhow::Result<bool> {
    let parsed_hash = PasswordHash::new(stored_hash)
        .map_err(|e| anyhow::anyhow!("stored password hash is corrupt: {}", e))?;

    Ok(Argon2::default()
        .verify_password(password.as_bytes(), &parsed_hash)
        .is_ok())
}

pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// Turn a lost race on the unique email index into the same 400 the
/// `email_in_use` pre-check gives.
pub(crate) fn email_taken(err: ApiError) -> ApiError {
    match err {
        ApiError::Storage(e) if seclink_db::is_email_conflict(&e) => {
            ApiError::validation("email already in use")
        }
        other => other,
    }
}

/// Trimmed value, or `None` when absent or blank.
pub(crate) fn present(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn password_roundtrip() {
        let hash = hash_password("correct horse").unwrap();
        assert!(hash.starts_with("$argon2id$"));
        assert!(verify_password("correct horse", &hash).unwrap());
        assert!(!verify_password("battery staple", &hash).unwrap());
    }

    #[test]
    fn emails_are_normalized() {
        assert_eq!(normalize_email("  Ada@Example.ORG "), "ada@example.org");
    }

    #[test]
    fn unique_email_violation_becomes_validation_error() {
        use seclink_db::NewUser;

        let db = Database::open_in_memory().unwrap();
        let user = |id| NewUser {
            id,
            email: "race@example.org".into(),
            password_hash: "hash".into(),
            role: Role::Admin,
        };
        db.create_user(&user(Uuid::new_v4())).unwrap();
        let err = db.create_user(&user(Uuid::new_v4())).unwrap_err();

        assert!(matches!(
            email_taken(ApiError::Storage(err)),
            ApiError::Validation(msg) if msg == "email already in use"
        ));
        assert!(matches!(
            email_taken(ApiError::Storage(anyhow::anyhow!("disk on fire"))),
            ApiError::Storage(_)
        ));
        assert!(matches!(email_taken(ApiError::Forbidden), ApiError::Forbidden));
    }

    #[test]
    fn present_rejects_blank() {
        assert_eq!(present(Some("  x ".into())), Some("x".into()));
        assert_eq!(present(Some("   ".into())), None);
        assert_eq!(present(None), None);
    }
}
