use axum::{
    extract::State,
    routing::{get, put},
    Json, Router,
};
use serde::Serialize;
use tracing::{info, instrument};

use crate::{
    auth::extractors::AuthUser, error::ApiResult, state::AppState, users::dto::Affected,
};
use repo_types::Notification;

pub mod repo_types;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/notifications", get(list))
        .route("/notifications/mark-seen", put(mark_seen))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationFeed {
    pub notifications: Vec<Notification>,
    pub unseen_count: usize,
}

#[instrument(skip(state, _user))]
pub async fn list(State(state): State<AppState>, _user: AuthUser) -> ApiResult<Json<NotificationFeed>> {
    let notifications = state.notifications.list().await?;
    let unseen_count = notifications.iter().filter(|n| !n.seen).count();
    Ok(Json(NotificationFeed {
        notifications,
        unseen_count,
    }))
}

#[instrument(skip(state, user), fields(user_id = user.id))]
pub async fn mark_seen(State(state): State<AppState>, user: AuthUser) -> ApiResult<Json<Affected>> {
    let affected = state.notifications.mark_all_seen().await?;
    info!(affected, "notifications marked seen");
    Ok(Json(Affected { affected }))
}
