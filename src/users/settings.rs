use axum::{
    extract::{Path, State},
    routing::{get, patch},
    Json, Router,
};
use serde_json::{Map, Value};
use tracing::instrument;

use super::{
    dto::{ChangePasswordRequest, MessageResponse},
    repo_types::UserView,
    services::{change_password, update_user},
};
use crate::{
    activity::RequestMeta,
    auth::extractors::AuthUser,
    error::{ApiError, ApiResult},
    schema::EditScope,
    state::AppState,
};

/// `/settings/:id` for the RDS and ETS offices.
pub fn settings_routes() -> Router<AppState> {
    Router::new()
        .route("/settings/:id", get(get_account).patch(update_account))
        .route("/settings/:id/password", patch(set_password))
}

pub fn profile_routes() -> Router<AppState> {
    Router::new().route(
        "/user/profile/:id",
        get(get_account).put(update_account).patch(update_account),
    )
}

#[instrument(skip(state, user), fields(caller = user.id))]
pub async fn get_account(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<i64>,
) -> ApiResult<Json<UserView>> {
    user.ensure_self_or_admin(&state, id)?;
    let view = state.users.fetch(id).await?.ok_or_else(ApiError::not_found)?;
    Ok(Json(view))
}

#[instrument(skip(state, user, req, body), fields(caller = user.id))]
pub async fn update_account(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<i64>,
    req: RequestMeta,
    Json(body): Json<Map<String, Value>>,
) -> ApiResult<Json<UserView>> {
    user.ensure_self_or_admin(&state, id)?;
    let view = update_user(&state, user.id, id, EditScope::Profile, &body, &req).await?;
    Ok(Json(view))
}

#[instrument(skip(state, user, req, payload), fields(caller = user.id))]
pub async fn set_password(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<i64>,
    req: RequestMeta,
    Json(payload): Json<ChangePasswordRequest>,
) -> ApiResult<Json<MessageResponse>> {
    user.ensure_self_or_admin(&state, id)?;
    change_password(&state, user.id, id, &payload, &req).await?;
    Ok(Json(MessageResponse {
        message: "Password updated.",
    }))
}
