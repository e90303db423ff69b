use axum::{
    Extension,
    extract::{Multipart, State, multipart::MultipartError},
    http::StatusCode,
    response::IntoResponse,
};
use tracing::{info, warn};
use uuid::Uuid;

use seclink_db::{NewUser, NewVolunteer, VolunteerPatch};
use seclink_types::api::{RegisterVolunteerResponse, StatusResponse, VolunteerListQuery};
use seclink_types::models::{Role, VolunteerProfile};

use crate::auth::{AppState, email_taken, hash_password, normalize_email, present};
use crate::error::{ApiError, ApiResult};
use crate::extract::{self, Json, Query};
use crate::files::UploadedFile;
use crate::middleware::AuthUser;

/// Fields of the volunteer registration / edit form. Everything is optional
/// here; each handler decides what it requires.
#[derive(Default)]
pub struct VolunteerForm {
    pub full_name: Option<String>,
    pub email: Option<String>,
    pub password: Option<String>,
    pub weekly_availability: Option<String>,
    pub areas_of_expertise: Vec<String>,
    pub background_check: Option<String>,
    pub resume: Option<UploadedFile>,
}

impl VolunteerForm {
    pub async fn from_multipart(mut multipart: Multipart) -> ApiResult<Self> {
        let mut form = Self::default();

        while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
            let name = field.name().unwrap_or_default().to_string();
            match name.as_str() {
                "resume" => {
                    let file_name = field.file_name().unwrap_or_default().to_string();
                    let content_type = field.content_type().map(str::to_string);
                    let bytes = field.bytes().await.map_err(multipart_error)?;
                    if !file_name.is_empty() || !bytes.is_empty() {
                        form.resume = Some(UploadedFile { file_name, content_type, bytes });
                    }
                }
                "areasOfExpertise" => {
                    let text = field.text().await.map_err(multipart_error)?;
                    form.areas_of_expertise.extend(split_tags(&text));
                }
                _ => {
                    let text = field.text().await.map_err(multipart_error)?;
                    let slot = match name.as_str() {
                        "fullName" => &mut form.full_name,
                        "email" => &mut form.email,
                        "password" => &mut form.password,
                        "weeklyAvailability" => &mut form.weekly_availability,
                        "backgroundCheck" => &mut form.background_check,
                        other => {
                            warn!("Ignoring unknown volunteer form field '{}'", other);
                            continue;
                        }
                    };
                    *slot = present(Some(text));
                }
            }
        }

        Ok(form)
    }

    fn availability(&self) -> ApiResult<Option<u32>> {
        self.weekly_availability
            .as_deref()
            .map(|raw| {
                raw.parse::<u32>()
                    .ok()
                    .filter(|h| *h > 0)
                    .ok_or_else(|| ApiError::validation("weeklyAvailability must be a positive number of hours"))
            })
            .transpose()
    }
}

fn multipart_error(e: MultipartError) -> ApiError {
    if e.status() == StatusCode::PAYLOAD_TOO_LARGE {
        ApiError::PayloadTooLarge
    } else {
        ApiError::validation(format!("invalid multipart body: {}", e.body_text()))
    }
}

/// Tags arrive either as repeated fields or as one comma-separated value.
fn split_tags(raw: &str) -> impl Iterator<Item = String> + '_ {
    raw.split(',')
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_string)
}

/// POST /volunteers: public registration with a resume upload.
pub async fn register(
    State(state): State<AppState>,
    extract::Multipart(multipart): extract::Multipart,
) -> ApiResult<impl IntoResponse> {
    let form = VolunteerForm::from_multipart(multipart).await?;

    let (Some(full_name), Some(email), Some(password), Some(resume)) =
        (form.full_name.clone(), form.email.as_deref().map(normalize_email), form.password.clone(), form.resume.as_ref())
    else {
        return Err(ApiError::validation("missing required fields"));
    };
    let weekly_availability = form
        .availability()?
        .ok_or_else(|| ApiError::validation("missing required fields"))?;
    if form.areas_of_expertise.is_empty() {
        return Err(ApiError::validation("missing required fields"));
    }
    if form.background_check.as_deref() != Some("true") {
        return Err(ApiError::validation("background check attestation is required"));
    }
    state.resumes.validate(resume)?;

    let lookup = email.clone();
    if state.with_db(move |db| db.email_in_use(&lookup, None)).await? {
        return Err(ApiError::validation("email already in use"));
    }

    let password_hash = hash_password(&password)?;
    let resume_url = state.resumes.save(resume).await?;

    let user = NewUser {
        id: Uuid::new_v4(),
        email,
        password_hash,
        role: Role::Volunteer,
    };
    let volunteer = NewVolunteer {
        id: Uuid::new_v4(),
        full_name,
        weekly_availability,
        areas_of_expertise: form.areas_of_expertise,
        resume_url: Some(resume_url.clone()),
        background_check: true,
    };
    let (user_id, volunteer_id) = (user.id, volunteer.id);

    if let Err(e) = state.with_db(move |db| db.register_volunteer(&user, &volunteer)).await {
        // Don't leave the blob behind for an account that was never created.
        state.resumes.delete(&resume_url).await;
        return Err(email_taken(e));
    }

    info!("Registered volunteer {} (user {})", volunteer_id, user_id);
    Ok((
        StatusCode::CREATED,
        Json(RegisterVolunteerResponse { user_id, volunteer_id }),
    ))
}

/// GET /volunteers: NGOs and admins browse volunteers.
pub async fn list(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Query(query): Query<VolunteerListQuery>,
) -> ApiResult<Json<Vec<VolunteerProfile>>> {
    user.require(&[Role::Ngo, Role::Admin])?;

    let expertise = present(query.expertise);
    let volunteers = state
        .with_db(move |db| db.list_volunteers(query.min_hours, expertise.as_deref()))
        .await?;
    Ok(Json(volunteers))
}

/// GET /volunteers/me
pub async fn get_me(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
) -> ApiResult<Json<VolunteerProfile>> {
    user.require(&[Role::Volunteer])?;

    let ref_id = current_ref_id(&state, user).await?.ok_or(ApiError::NotFound("volunteer profile"))?;
    let profile = state
        .with_db(move |db| db.get_volunteer(&ref_id))
        .await?
        .ok_or(ApiError::NotFound("volunteer profile"))?;
    Ok(Json(profile))
}

/// PATCH /volunteers/me: edit the caller's profile, creating it when the
/// account has none yet.
pub async fn update_me(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    extract::Multipart(multipart): extract::Multipart,
) -> ApiResult<Json<VolunteerProfile>> {
    user.require(&[Role::Volunteer])?;

    let form = VolunteerForm::from_multipart(multipart).await?;
    let weekly_availability = form.availability()?;
    let email = form.email.as_deref().map(normalize_email);
    if let Some(resume) = &form.resume {
        state.resumes.validate(resume)?;
    }

    let user_id = user.id.to_string();
    if let Some(email) = email.clone() {
        let uid = user_id.clone();
        if state.with_db(move |db| db.email_in_use(&email, Some(&uid))).await? {
            return Err(ApiError::validation("email already in use"));
        }
    }

    let ref_id = current_ref_id(&state, user).await?;
    if ref_id.is_none() && (form.full_name.is_none() || weekly_availability.is_none()) {
        return Err(ApiError::validation("fullName and weeklyAvailability are required to create a profile"));
    }

    let resume_url = match &form.resume {
        Some(resume) => Some(state.resumes.save(resume).await?),
        None => None,
    };
    let tags = (!form.areas_of_expertise.is_empty()).then_some(form.areas_of_expertise);

    let outcome = match ref_id {
        Some(ref_id) => {
            let patch = VolunteerPatch {
                full_name: form.full_name,
                weekly_availability,
                areas_of_expertise: tags,
                resume_url: resume_url.clone(),
            };
            state
                .with_db(move |db| db.update_volunteer(&ref_id, &patch))
                .await
                .and_then(|updated| updated.ok_or(ApiError::NotFound("volunteer profile")))
                .map(|update| (update.profile, update.replaced_resume))
        }
        None => {
            let volunteer = NewVolunteer {
                id: Uuid::new_v4(),
                full_name: form.full_name.unwrap_or_default(),
                weekly_availability: weekly_availability.unwrap_or_default(),
                areas_of_expertise: tags.unwrap_or_default(),
                resume_url: resume_url.clone(),
                background_check: true,
            };
            let uid = user_id.clone();
            let vid = volunteer.id.to_string();
            state
                .with_db(move |db| {
                    db.create_volunteer_for_user(&uid, &volunteer)?;
                    db.get_volunteer(&vid)
                })
                .await
                .and_then(|created| created.ok_or(ApiError::NotFound("volunteer profile")))
                .map(|profile| (profile, None))
        }
    };

    let (profile, replaced_resume) = match outcome {
        Ok(done) => done,
        Err(e) => {
            if let Some(url) = &resume_url {
                state.resumes.delete(url).await;
            }
            return Err(e);
        }
    };
    if let Some(old) = replaced_resume {
        state.resumes.delete(&old).await;
    }

    if let Some(email) = email {
        state
            .with_db(move |db| db.update_user_email(&user_id, &email))
            .await
            .map_err(email_taken)?;
    }

    info!("Volunteer profile {} updated", profile.id);
    Ok(Json(profile))
}

/// DELETE /volunteers/me: removes the account, its profile and its resume.
pub async fn delete_me(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
) -> ApiResult<Json<StatusResponse>> {
    user.require(&[Role::Volunteer])?;

    let user_id = user.id.to_string();
    let deleted = state
        .with_db(move |db| db.delete_user(&user_id))
        .await?
        .ok_or(ApiError::NotFound("volunteer account"))?;

    if let Some(url) = deleted.resume_url {
        state.resumes.delete(&url).await;
    }

    info!("Volunteer account {} deleted", user.id);
    Ok(Json(StatusResponse {
        message: "Volunteer account and profile deleted".into(),
    }))
}

/// Profile id currently linked to the caller. Read from the store rather
/// than the token, which may predate profile creation.
pub(crate) async fn current_ref_id(state: &AppState, user: AuthUser) -> ApiResult<Option<String>> {
    let user_id = user.id.to_string();
    let row = state
        .with_db(move |db| db.get_user_by_id(&user_id))
        .await?
        .ok_or(ApiError::NotFound("user"))?;
    Ok(row.ref_id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tags_split_on_commas() {
        let tags: Vec<_> = split_tags(" pentest, ,forensics ,").collect();
        assert_eq!(tags, vec!["pentest".to_string(), "forensics".to_string()]);
    }

    #[test]
    fn availability_must_be_positive() {
        let mut form = VolunteerForm::default();
        assert_eq!(form.availability().unwrap(), None);

        form.weekly_availability = Some("12".into());
        assert_eq!(form.availability().unwrap(), Some(12));

        form.weekly_availability = Some("0".into());
        assert!(form.availability().is_err());

        form.weekly_availability = Some("lots".into());
        assert!(form.availability().is_err());
    }
}
