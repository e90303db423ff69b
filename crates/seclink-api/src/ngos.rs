use axum::{
    Extension,
    extract::State,
    http::StatusCode,
    response::IntoResponse,
};
use tracing::info;
use uuid::Uuid;

use seclink_db::{NewNgo, NewUser, NgoPatch};
use seclink_types::api::{
    NgoAccountResponse, NgoListQuery, RegisterNgoRequest, RegisterNgoResponse, StatusResponse,
    UpdateNgoRequest,
};
use seclink_types::models::{NgoProfile, Role};

use crate::auth::{AppState, email_taken, hash_password, normalize_email, present};
use crate::error::{ApiError, ApiResult};
use crate::extract::{Json, Query};
use crate::middleware::AuthUser;
use crate::volunteers::current_ref_id;

fn clean_tags(tags: Vec<String>) -> Vec<String> {
    tags.into_iter()
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
        .collect()
}

/// POST /ngos: public registration.
pub async fn register(
    State(state): State<AppState>,
    Json(req): Json<RegisterNgoRequest>,
) -> ApiResult<impl IntoResponse> {
    let (Some(organization_name), Some(email), Some(password)) = (
        present(req.organization_name),
        present(req.email).map(|e| normalize_email(&e)),
        present(req.password),
    ) else {
        return Err(ApiError::validation("missing required fields"));
    };

    let lookup = email.clone();
    if state.with_db(move |db| db.email_in_use(&lookup, None)).await? {
        return Err(ApiError::validation("email already in use"));
    }

    let user = NewUser {
        id: Uuid::new_v4(),
        email,
        password_hash: hash_password(&password)?,
        role: Role::Ngo,
    };
    let ngo = NewNgo {
        id: Uuid::new_v4(),
        organization_name,
        areas_of_concern: clean_tags(req.areas_of_concern),
    };
    let (user_id, ngo_id) = (user.id, ngo.id);

    state
        .with_db(move |db| db.register_ngo(&user, &ngo))
        .await
        .map_err(email_taken)?;

    info!("Registered NGO {} (user {})", ngo_id, user_id);
    Ok((StatusCode::CREATED, Json(RegisterNgoResponse { user_id, ngo_id })))
}

/// GET /ngos: volunteers and admins browse organizations.
pub async fn list(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Query(query): Query<NgoListQuery>,
) -> ApiResult<Json<Vec<NgoProfile>>> {
    user.require(&[Role::Volunteer, Role::Admin])?;

    let concern = present(query.concern);
    let ngos = state.with_db(move |db| db.list_ngos(concern.as_deref())).await?;
    Ok(Json(ngos))
}

/// GET /ngos/me
pub async fn get_me(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
) -> ApiResult<Json<NgoAccountResponse>> {
    user.require(&[Role::Ngo])?;

    let ref_id = current_ref_id(&state, user).await?.ok_or(ApiError::NotFound("NGO profile"))?;
    let user_id = user.id.to_string();
    let (ngo, account) = state
        .with_db(move |db| Ok((db.get_ngo(&ref_id)?, db.get_user_by_id(&user_id)?)))
        .await?;

    let ngo = ngo.ok_or(ApiError::NotFound("NGO profile"))?;
    let account = account.ok_or(ApiError::NotFound("user"))?;
    Ok(Json(NgoAccountResponse {
        id: ngo.id,
        organization_name: ngo.organization_name,
        areas_of_concern: ngo.areas_of_concern,
        email: account.email,
    }))
}

/// PATCH /ngos/me
pub async fn update_me(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Json(req): Json<UpdateNgoRequest>,
) -> ApiResult<Json<NgoAccountResponse>> {
    user.require(&[Role::Ngo])?;

    let email = present(req.email).map(|e| normalize_email(&e));
    let patch = NgoPatch {
        organization_name: present(req.organization_name),
        areas_of_concern: req.areas_of_concern.map(clean_tags),
    };

    let user_id = user.id.to_string();
    if let Some(email) = email.clone() {
        let uid = user_id.clone();
        if state.with_db(move |db| db.email_in_use(&email, Some(&uid))).await? {
            return Err(ApiError::validation("email already in use"));
        }
    }

    let ref_id = current_ref_id(&state, user).await?.ok_or(ApiError::NotFound("NGO profile"))?;
    let (ngo, account) = state
        .with_db(move |db| {
            let ngo = db.update_ngo(&ref_id, &patch)?;
            if ngo.is_some() {
                if let Some(email) = &email {
                    db.update_user_email(&user_id, email)?;
                }
            }
            Ok((ngo, db.get_user_by_id(&user_id)?))
        })
        .await
        .map_err(email_taken)?;

    let ngo = ngo.ok_or(ApiError::NotFound("NGO profile"))?;
    let account = account.ok_or(ApiError::NotFound("user"))?;

    info!("NGO profile {} updated", ngo.id);
    Ok(Json(NgoAccountResponse {
        id: ngo.id,
        organization_name: ngo.organization_name,
        areas_of_concern: ngo.areas_of_concern,
        email: account.email,
    }))
}

/// DELETE /ngos/me: remove profile and account.
pub async fn delete_me(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
) -> ApiResult<Json<StatusResponse>> {
    user.require(&[Role::Ngo])?;

    let user_id = user.id.to_string();
    state
        .with_db(move |db| db.delete_user(&user_id))
        .await?
        .ok_or(ApiError::NotFound("NGO account"))?;

    info!("NGO account {} deleted", user.id);
    Ok(Json(StatusResponse {
        message: "NGO account and user deleted".into(),
    }))
}
