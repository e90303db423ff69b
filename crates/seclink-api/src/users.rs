use axum::{
    Extension,
    extract::State,
    http::StatusCode,
    response::IntoResponse,
};
use tracing::info;
use uuid::Uuid;

use seclink_db::NewUser;
use seclink_types::api::{ChangeRoleRequest, CreateUserRequest, CreateUserResponse, StatusResponse};
use seclink_types::models::{Role, User};

use crate::auth::{AppState, email_taken, hash_password, normalize_email};
use crate::error::{ApiError, ApiResult};
use crate::extract::{Json, Path};
use crate::middleware::AuthUser;

/// GET /auth/users: admin listing. Password hashes never leave the store.
pub async fn list_users(
    State(state): State<AppState>,
    Extension(caller): Extension<AuthUser>,
) -> ApiResult<Json<Vec<User>>> {
    caller.require(&[Role::Admin])?;

    let users = state
        .with_db(|db| db.list_users()?.iter().map(|row| row.to_user()).collect())
        .await?;
    Ok(Json(users))
}

/// POST /auth/users: admin creates a bare account with no profile.
pub async fn create_user(
    State(state): State<AppState>,
    Extension(caller): Extension<AuthUser>,
    Json(req): Json<CreateUserRequest>,
) -> ApiResult<impl IntoResponse> {
    caller.require(&[Role::Admin])?;

    let email = normalize_email(&req.email);
    if email.is_empty() || req.password.is_empty() {
        return Err(ApiError::validation("email and password are required"));
    }

    let lookup = email.clone();
    if state.with_db(move |db| db.email_in_use(&lookup, None)).await? {
        return Err(ApiError::validation("email already in use"));
    }

    let user = NewUser {
        id: Uuid::new_v4(),
        email,
        password_hash: hash_password(&req.password)?,
        role: req.role,
    };
    let user_id = user.id;
    state
        .with_db(move |db| db.create_user(&user))
        .await
        .map_err(email_taken)?;

    info!("Admin {} created {} user {}", caller.id, req.role, user_id);
    Ok((StatusCode::CREATED, Json(CreateUserResponse { user_id })))
}

/// PATCH /auth/users/{user_id}/role
pub async fn change_role(
    State(state): State<AppState>,
    Extension(caller): Extension<AuthUser>,
    Path(user_id): Path<Uuid>,
    Json(req): Json<ChangeRoleRequest>,
) -> ApiResult<Json<User>> {
    caller.require(&[Role::Admin])?;

    let id = user_id.to_string();
    let changed = state
        .with_db(move |db| db.set_user_role(&id, req.new_role))
        .await?
        .ok_or(ApiError::NotFound("user"))?;

    if let Some(url) = &changed.dropped_resume {
        state.resumes.delete(url).await;
    }

    info!("Admin {} set role of {} to {}", caller.id, user_id, req.new_role);
    Ok(Json(changed.user.to_user()?))
}

/// DELETE /auth/users/{user_id}: removes the account and its profile.
/// Messages the user exchanged stay behind as orphans.
pub async fn delete_user(
    State(state): State<AppState>,
    Extension(caller): Extension<AuthUser>,
    Path(user_id): Path<Uuid>,
) -> ApiResult<Json<StatusResponse>> {
    caller.require(&[Role::Admin])?;

    let id = user_id.to_string();
    let deleted = state
        .with_db(move |db| db.delete_user(&id))
        .await?
        .ok_or(ApiError::NotFound("user"))?;

    if let Some(url) = &deleted.resume_url {
        state.resumes.delete(url).await;
    }

    info!("Admin {} deleted user {}", caller.id, user_id);
    Ok(Json(StatusResponse {
        message: "User deleted".into(),
    }))
}
