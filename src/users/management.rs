use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, patch},
    Json, Router,
};
use serde_json::{json, Map, Value};
use tracing::{info, instrument};

use super::{
    dto::{
        Affected, ChangePasswordRequest, CreatedUser, MessageResponse, NewUserRequest, Paging,
        UserListQuery, UserPage,
    },
    repo_types::{Role, UserFilter, UserOrder, UserView},
    services::{change_password, create_user, update_user, validate_new_user},
};
use crate::{
    activity::{self, repo_types::Action, RequestMeta},
    auth::extractors::AdminUser,
    error::{ApiError, ApiResult},
    schema::EditScope,
    state::AppState,
};

/// Administrative user endpoints, mounted under `/users-management`.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/roles", get(list_roles))
        .route("/users", get(list_users).post(create))
        .route("/users/:id", get(get_user).patch(update))
        .route("/users/:id/password", patch(set_password))
        .route("/users/:id/archive", patch(archive))
        .route("/users/:id/recover", patch(recover))
}

#[instrument(skip(state, _admin))]
pub async fn list_roles(State(state): State<AppState>, _admin: AdminUser) -> ApiResult<Json<Vec<Role>>> {
    Ok(Json(state.users.active_roles().await?))
}

#[instrument(skip(state, _admin))]
pub async fn list_users(
    State(state): State<AppState>,
    _admin: AdminUser,
    Query(q): Query<UserListQuery>,
) -> ApiResult<Json<UserPage>> {
    let paging = Paging::parse(q.page.as_deref(), q.limit.as_deref(), 20);
    let search = q.search.trim();
    let filter = UserFilter {
        search: (!search.is_empty()).then(|| search.to_string()),
        status: q.status,
        order: UserOrder::Newest,
        limit: paging.limit,
        offset: paging.offset(),
        ..Default::default()
    };
    let page = state.users.list(&filter).await?;
    Ok(Json(UserPage {
        data: page.data,
        page: paging.page,
        limit: paging.limit,
        total: page.total,
    }))
}

#[instrument(skip(state, _admin))]
pub async fn get_user(
    State(state): State<AppState>,
    _admin: AdminUser,
    Path(id): Path<i64>,
) -> ApiResult<Json<UserView>> {
    let user = state.users.fetch(id).await?.ok_or_else(ApiError::not_found)?;
    Ok(Json(user))
}

#[instrument(skip(state, admin, req, payload), fields(admin_id = admin.0.id))]
pub async fn create(
    State(state): State<AppState>,
    admin: AdminUser,
    req: RequestMeta,
    Json(payload): Json<NewUserRequest>,
) -> ApiResult<(StatusCode, Json<CreatedUser>)> {
    let user = validate_new_user(&payload)?;
    let id = create_user(&state, &user).await?;

    activity::record(
        &state,
        Action::UserCreated,
        Some(admin.0.id),
        &req,
        Some(json!({ "target_id": id, "email": user.email, "role_id": user.role_id })),
    )
    .await;

    Ok((StatusCode::CREATED, Json(CreatedUser {
            id,
            message: "User created.",
        })))
}

#[instrument(skip(state, admin, req, body), fields(admin_id = admin.0.id))]
pub async fn update(
    State(state): State<AppState>,
    admin: AdminUser,
    Path(id): Path<i64>,
    req: RequestMeta,
    Json(body): Json<Map<String, Value>>,
) -> ApiResult<Json<UserView>> {
    let view = update_user(&state, admin.0.id, id, EditScope::Account, &body, &req).await?;
    Ok(Json(view))
}

#[instrument(skip(state, admin, req, payload), fields(admin_id = admin.0.id))]
pub async fn set_password(
    State(state): State<AppState>,
    admin: AdminUser,
    Path(id): Path<i64>,
    req: RequestMeta,
    Json(payload): Json<ChangePasswordRequest>,
) -> ApiResult<Json<MessageResponse>> {
    change_password(&state, admin.0.id, id, &payload, &req).await?;
    Ok(Json(MessageResponse {
        message: "Password updated.",
    }))
}

async fn set_active(
    state: &AppState,
    admin: &AdminUser,
    id: i64,
    active: bool,
    req: &RequestMeta,
) -> ApiResult<Json<Affected>> {
    let affected = state.users.set_active(id, active).await?;
    let action = if active {
        Action::UserRecovered
    } else {
        Action::UserArchived
    };
    if affected > 0 {
        activity::record(state, action, Some(admin.0.id), req, Some(json!({ "target_id": id })))
            .await;
    }
    info!(user_id = id, active, affected, "user status changed");
    Ok(Json(Affected { affected }))
}

#[instrument(skip(state, admin, req), fields(admin_id = admin.0.id))]
pub async fn archive(
    State(state): State<AppState>,
    admin: AdminUser,
    Path(id): Path<i64>,
    req: RequestMeta,
) -> ApiResult<Json<Affected>> {
    set_active(&state, &admin, id, false, &req).await
}

#[instrument(skip(state, admin, req), fields(admin_id = admin.0.id))]
pub async fn recover(
    State(state): State<AppState>,
    admin: AdminUser,
    Path(id): Path<i64>,
    req: RequestMeta,
) -> ApiResult<Json<Affected>> {
    set_active(&state, &admin, id, true, &req).await
}
