use axum::{
    extract::{Path, Query, State},
    routing::get,
    Json, Router,
};
use tracing::instrument;

use super::{
    dto::{DirectoryQuery, Paging, UserPage},
    repo_types::{UserFilter, UserOrder, UserView},
};
use crate::{
    auth::extractors::AuthUser,
    error::{ApiError, ApiResult},
    state::AppState,
};

/// Faculty directory shared by the RDS and ETS offices.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/faculty", get(list_faculty))
        .route("/faculty/:id", get(get_faculty))
}

fn is_admin_role(view: &UserView) -> bool {
    view.role_name
        .as_deref()
        .is_some_and(|n| n.eq_ignore_ascii_case("admin"))
}

#[instrument(skip(state, _user))]
pub async fn list_faculty(
    State(state): State<AppState>,
    _user: AuthUser,
    Query(q): Query<DirectoryQuery>,
) -> ApiResult<Json<UserPage>> {
    let paging = Paging::parse(q.page.as_deref(), q.limit.as_deref(), 15);
    let search = q.search.trim();
    let filter = UserFilter {
        search: (!search.is_empty()).then(|| search.to_string()),
        role_id: q.role_id.as_deref().and_then(|r| r.trim().parse().ok()),
        exclude_admins: true,
        order: UserOrder::Name,
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

#[instrument(skip(state, _user))]
pub async fn get_faculty(
    State(state): State<AppState>,
    _user: AuthUser,
    Path(id): Path<i64>,
) -> ApiResult<Json<UserView>> {
    match state.users.fetch(id).await? {
        Some(view) if view.active && !is_admin_role(&view) => Ok(Json(view)),
        _ => Err(ApiError::not_found()),
    }
}
