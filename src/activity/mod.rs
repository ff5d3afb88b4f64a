use std::{convert::Infallible, net::SocketAddr};

use axum::{
    async_trait,
    extract::{ConnectInfo, FromRequestParts},
    http::{header::USER_AGENT, request::Parts},
    routing::get,
    Router,
};
use tracing::warn;

use crate::state::AppState;
use repo_types::{Action, NewActivity};

pub mod handlers;
pub mod repo_types;

pub fn router() -> Router<AppState> {
    Router::new().route("/activity-logs", get(handlers::list_logs))
}

/// Client address and user agent of the current request.
#[derive(Debug, Clone, Default)]
pub struct RequestMeta {
    pub ip: Option<String>,
    pub user_agent: Option<String>,
}

#[async_trait]
impl<S: Send + Sync> FromRequestParts<S> for RequestMeta {
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let forwarded = parts
            .headers
            .get("x-forwarded-for")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.split(',').next())
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty());
        let peer = parts
            .extensions
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| addr.ip().to_string());
        let user_agent = parts
            .headers
            .get(USER_AGENT)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        Ok(RequestMeta {
            ip: forwarded.or(peer),
            user_agent,
        })
    }
}

/// Appends to the activity log. Failures are logged and swallowed.
pub async fn record(
    state: &AppState,
    action: Action,
    user_id: Option<i64>,
    req: &RequestMeta,
    meta: Option<serde_json::Value>,
) {
    let entry = NewActivity {
        user_id,
        action,
        ip: req.ip.clone(),
        user_agent: req.user_agent.clone(),
        meta,
    };
    if let Err(e) = state.activity.append(&entry).await {
        warn!(error = %e, action = action.as_str(), "activity log write failed");
    }
}
