use serde::Serialize;
use sqlx::FromRow;
use time::{Date, OffsetDateTime};

/// Security-relevant actions recorded in `activity_logs`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    RegisterSuccess,
    LoginSuccess,
    LoginFailNoUser,
    LoginFailBadPassword,
    ResetRequest,
    ResetSuccess,
    PasswordChanged,
    ProfileUpdated,
    UserCreated,
    UserArchived,
    UserRecovered,
}

impl Action {
    pub fn as_str(self) -> &'static str {
        match self {
            Action::RegisterSuccess => "REGISTER_SUCCESS",
            Action::LoginSuccess => "LOGIN_SUCCESS",
            Action::LoginFailNoUser => "LOGIN_FAIL_NOUSER",
            Action::LoginFailBadPassword => "LOGIN_FAIL_BADPWD",
            Action::ResetRequest => "RESET_REQUEST",
            Action::ResetSuccess => "RESET_SUCCESS",
            Action::PasswordChanged => "PASSWORD_CHANGED",
            Action::ProfileUpdated => "PROFILE_UPDATED",
            Action::UserCreated => "USER_CREATED",
            Action::UserArchived => "USER_ARCHIVED",
            Action::UserRecovered => "USER_RECOVERED",
        }
    }
}

#[derive(Debug, Clone)]
pub struct NewActivity {
    pub user_id: Option<i64>,
    pub action: Action,
    pub ip: Option<String>,
    pub user_agent: Option<String>,
    pub meta: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct ActivityLogEntry {
    pub id: i64,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    pub username: Option<String>,
    pub action: String,
    pub ip: Option<String>,
    pub user_agent: Option<String>,
    pub meta: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Default)]
pub struct ActivityFilter {
    pub search: Option<String>,
    /// Inclusive calendar days.
    pub date_from: Option<Date>,
    pub date_to: Option<Date>,
    pub limit: i64,
    pub offset: i64,
}
