use axum::{
    extract::{Query, State},
    Json,
};
use serde::{Deserialize, Serialize};
use time::{macros::format_description, Date};
use tracing::instrument;

use super::repo_types::{ActivityFilter, ActivityLogEntry};
use crate::{
    auth::extractors::AdminUser,
    error::{ApiError, ApiResult},
    state::AppState,
    users::dto::Paging,
};

#[derive(Debug, Deserialize)]
pub struct LogQuery {
    #[serde(default)]
    pub search: String,
    #[serde(default)]
    pub date_from: String,
    #[serde(default)]
    pub date_to: String,
    pub page: Option<String>,
    pub limit: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct LogPage {
    pub data: Vec<ActivityLogEntry>,
    pub total: i64,
    pub page: i64,
    pub limit: i64,
}

fn parse_day(field: &str, raw: &str) -> ApiResult<Option<Date>> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Ok(None);
    }
    Date::parse(raw, format_description!("[year]-[month]-[day]"))
        .map(Some)
        .map_err(|_| ApiError::bad_request(format!("{field} must be YYYY-MM-DD.")))
}

/// GET /activity-logs?search=&date_from=&date_to=&page=&limit=
#[instrument(skip(state, _admin))]
pub async fn list_logs(
    State(state): State<AppState>,
    _admin: AdminUser,
    Query(q): Query<LogQuery>,
) -> ApiResult<Json<LogPage>> {
    let paging = Paging::parse(q.page.as_deref(), q.limit.as_deref(), 20);
    let search = q.search.trim();
    let filter = ActivityFilter {
        search: (!search.is_empty()).then(|| search.to_string()),
        date_from: parse_day("date_from", &q.date_from)?,
        date_to: parse_day("date_to", &q.date_to)?,
        limit: paging.limit,
        offset: paging.offset(),
    };

    let page = state.activity.list(&filter).await?;
    Ok(Json(LogPage {
        data: page.data,
        total: page.total,
        page: paging.page,
        limit: paging.limit,
    }))
}
