use axum::{
    Router,
    extract::DefaultBodyLimit,
    middleware,
    routing::{delete, get, patch, post},
};
use tower_http::services::ServeDir;

use crate::auth::{self, AppState};
use crate::middleware::require_auth;
use crate::{messages, ngos, users, volunteers};

/// Headroom for the non-file multipart fields sent alongside a resume.
const FORM_OVERHEAD_BYTES: usize = 1024 * 1024;

/// Build the full HTTP surface. CORS and tracing layers are left to the
/// binary.
pub fn router(state: AppState) -> Router {
    let public_routes = Router::new()
        .route("/", get(health))
        .route("/auth/login", post(auth::login))
        .route("/volunteers", post(volunteers::register))
        .route("/ngos", post(ngos::register));

    let protected_routes = Router::new()
        .route("/auth/users", get(users::list_users))
        .route("/auth/users", post(users::create_user))
        .route("/auth/users/{user_id}/role", patch(users::change_role))
        .route("/auth/users/{user_id}", delete(users::delete_user))
        .route("/volunteers", get(volunteers::list))
        .route(
            "/volunteers/me",
            get(volunteers::get_me)
                .patch(volunteers::update_me)
                .delete(volunteers::delete_me),
        )
        .route("/ngos", get(ngos::list))
        .route(
            "/ngos/me",
            get(ngos::get_me).patch(ngos::update_me).delete(ngos::delete_me),
        )
        .route("/messages/send", post(messages::send_message))
        .route("/messages/inbox", get(messages::get_inbox))
        .route("/messages/conversation/{other_user_id}", get(messages::get_conversation))
        .route("/messages/unread-count", get(messages::unread_count))
        .route("/messages/mark-read/{other_user_id}", patch(messages::mark_read))
        .route("/messages/user-id/{profile_id}", get(messages::user_id_for_profile))
        .layer(middleware::from_fn_with_state(state.clone(), require_auth));

    let body_limit = state.resumes.max_bytes() + FORM_OVERHEAD_BYTES;

    Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .nest_service("/uploads", ServeDir::new(state.resumes.root()))
        .layer(DefaultBodyLimit::max(body_limit))
        .with_state(state)
}

async fn health() -> &'static str {
    "SecLink API"
}
