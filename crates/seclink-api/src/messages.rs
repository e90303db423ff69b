use axum::{
    Extension,
    extract::State,
    http::StatusCode,
    response::IntoResponse,
};
use tracing::{debug, info, warn};
use uuid::Uuid;

use seclink_db::InboxThread;
use seclink_types::api::{
    ConversationSummary, MarkReadResponse, Participant, ProfileOwnerResponse, SendMessageRequest,
    UnreadCountResponse,
};
use seclink_types::models::Message;

use crate::auth::{AppState, present};
use crate::error::{ApiError, ApiResult};
use crate::extract::{Json, Path};
use crate::middleware::AuthUser;

/// POST /messages/send
pub async fn send_message(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Json(req): Json<SendMessageRequest>,
) -> ApiResult<impl IntoResponse> {
    let (Some(recipient), Some(content)) = (present(req.recipient), present(req.content)) else {
        return Err(ApiError::validation("recipient and content are required"));
    };
    let recipient: Uuid = recipient
        .parse()
        .map_err(|_| ApiError::validation("recipient must be a user id"))?;
    if recipient == user.id {
        return Err(ApiError::validation("cannot send a message to yourself"));
    }

    let message_id = Uuid::new_v4().to_string();
    let sender_id = user.id.to_string();
    let recipient_id = recipient.to_string();
    let row = state
        .with_db(move |db| {
            // Tokens can outlive a deleted account.
            if db.get_user_by_id(&sender_id)?.is_none() {
                return Ok(Err(ApiError::Unauthorized));
            }
            if db.get_user_by_id(&recipient_id)?.is_none() {
                return Ok(Err(ApiError::NotFound("recipient")));
            }
            db.insert_message(&message_id, &sender_id, &recipient_id, &content)
                .map(Ok)
        })
        .await??;

    let message = Message::try_from(row)?;
    debug!("Message {} sent {} -> {}", message.id, message.sender, message.recipient);
    Ok((StatusCode::CREATED, Json(message)))
}

/// GET /messages/inbox: one summary per live thread, most recent first.
///
/// Threads whose other participant has been deleted are dropped from the
/// result and purged in the background.
pub async fn get_inbox(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
) -> ApiResult<Json<Vec<ConversationSummary>>> {
    let user_id = user.id.to_string();
    let scan = state.with_db(move |db| db.inbox(&user_id)).await?;

    if !scan.orphaned.is_empty() {
        spawn_orphan_purge(state.clone(), scan.orphaned);
    }

    let summaries = scan
        .threads
        .into_iter()
        .map(summarize)
        .collect::<anyhow::Result<Vec<_>>>()?;
    Ok(Json(summaries))
}

fn summarize(thread: InboxThread) -> anyhow::Result<ConversationSummary> {
    let user = Participant {
        id: thread.other_user_id.parse()?,
        email: thread.other_email.clone(),
        role: thread.other_role.parse()?,
        display_name: thread.display_name().to_string(),
    };
    Ok(ConversationSummary {
        user,
        last_message: Message::try_from(thread.last_message)?,
        unread_count: thread.unread_count,
    })
}

/// Delete orphaned messages without holding up the request that found them.
fn spawn_orphan_purge(state: AppState, conversations: Vec<String>) {
    tokio::spawn(async move {
        let threads = conversations.len();
        match state
            .with_db(move |db| db.purge_orphaned_messages(&conversations))
            .await
        {
            Ok(0) => {}
            Ok(removed) => info!("Purged {} orphaned messages from {} threads", removed, threads),
            Err(e) => warn!("Orphan purge failed: {}", e),
        }
    });
}

/// GET /messages/conversation/{other_user_id}
pub async fn get_conversation(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(other_user_id): Path<Uuid>,
) -> ApiResult<Json<Vec<Message>>> {
    let user_id = user.id.to_string();
    let other_id = other_user_id.to_string();
    let rows = state
        .with_db(move |db| db.conversation_history(&user_id, &other_id))
        .await?;

    let messages = rows
        .into_iter()
        .map(Message::try_from)
        .collect::<anyhow::Result<Vec<_>>>()?;
    Ok(Json(messages))
}

/// GET /messages/unread-count
pub async fn unread_count(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
) -> ApiResult<Json<UnreadCountResponse>> {
    let user_id = user.id.to_string();
    let unread_count = state.with_db(move |db| db.unread_count(&user_id)).await?;
    Ok(Json(UnreadCountResponse { unread_count }))
}

/// PATCH /messages/mark-read/{other_user_id}
pub async fn mark_read(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(other_user_id): Path<Uuid>,
) -> ApiResult<Json<MarkReadResponse>> {
    let user_id = user.id.to_string();
    let other_id = other_user_id.to_string();
    let modified_count = state
        .with_db(move |db| db.mark_conversation_read(&user_id, &other_id))
        .await?;

    if modified_count > 0 {
        debug!("User {} read {} messages from {}", user.id, modified_count, other_user_id);
    }
    Ok(Json(MarkReadResponse { modified_count }))
}

/// GET /messages/user-id/{profile_id}: find the account behind a volunteer
/// or NGO profile so a conversation can be started from a listing.
pub async fn user_id_for_profile(
    State(state): State<AppState>,
    Extension(_user): Extension<AuthUser>,
    Path(profile_id): Path<Uuid>,
) -> ApiResult<Json<ProfileOwnerResponse>> {
    let ref_id = profile_id.to_string();
    let (owner, profile) = state
        .with_db(move |db| {
            let Some(owner) = db.get_user_by_ref_id(&ref_id)? else {
                return Ok(None);
            };
            let profile = db.find_profile(owner.role()?, &ref_id)?;
            Ok(Some((owner, profile)))
        })
        .await?
        .ok_or(ApiError::NotFound("profile"))?;

    let owner = owner.to_user()?;
    let display_name = profile
        .as_ref()
        .map(|p| p.display_name().to_string())
        .unwrap_or_else(|| owner.email.clone());

    Ok(Json(ProfileOwnerResponse {
        user_id: owner.id,
        email: owner.email,
        role: owner.role,
        display_name,
    }))
}
