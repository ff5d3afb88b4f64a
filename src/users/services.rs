use lazy_static::lazy_static;
use regex::Regex;
use serde_json::{json, Map, Value};
use tracing::{info, warn};

use super::{
    dto::{ChangePasswordRequest, NewUserRequest},
    patch::parse_patch,
    repo_types::{NewUser, UserView},
};
use crate::{
    activity::{self, repo_types::Action, RequestMeta},
    auth::password::{hash_password, verify_password},
    error::{ApiError, ApiResult},
    schema::EditScope,
    state::AppState,
};

pub(crate) fn is_valid_email(email: &str) -> bool {
    lazy_static! {
        static ref EMAIL_RE: Regex = Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").unwrap();
    }
    EMAIL_RE.is_match(email)
}

fn trimmed(v: &Option<String>) -> Option<String> {
    v.as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_owned)
}

fn is_unique_violation(err: &anyhow::Error) -> bool {
    err.downcast_ref::<sqlx::Error>()
        .and_then(|e| e.as_database_error())
        .is_some_and(|db| db.is_unique_violation())
}

/// Validates a registration/creation body into a row ready to insert.
pub fn validate_new_user(req: &NewUserRequest) -> ApiResult<NewUser> {
    let (Some(username), Some(email), Some(first_name), Some(last_name), Some(role_id)) = (
        trimmed(&req.username),
        trimmed(&req.email),
        trimmed(&req.first_name),
        trimmed(&req.last_name),
        req.role_id,
    ) else {
        return Err(ApiError::bad_request("Missing required fields."));
    };
    let password = req
        .password
        .as_deref()
        .filter(|p| !p.is_empty())
        .ok_or_else(|| ApiError::bad_request("Missing required fields."))?;

    let email = email.to_lowercase();
    if !is_valid_email(&email) {
        warn!(email = %email, "invalid email");
        return Err(ApiError::bad_request("Invalid email address."));
    }

    Ok(NewUser {
        username,
        email,
        password_hash: hash_password(password)?,
        first_name,
        middle_name: trimmed(&req.middle_name),
        last_name,
        phone: trimmed(&req.phone),
        role_id,
        rank_id: req.rank_id,
        department_id: req.department_id,
        address: req.address_input(),
    })
}

/// Inserts a user after the duplicate check. Returns the new id.
pub async fn create_user(state: &AppState, user: &NewUser) -> ApiResult<i64> {
    if state.users.identity_taken(&user.username, &user.email).await? {
        warn!(email = %user.email, username = %user.username, "identity already registered");
        return Err(ApiError::Conflict(
            "Email or username already registered.".into(),
        ));
    }

    match state.users.insert(user).await {
        Ok(id) => {
            info!(user_id = id, email = %user.email, "user created");
            Ok(id)
        }
        // lost the race against a concurrent insert
        Err(e) if is_unique_violation(&e) => Err(ApiError::Conflict(
            "Email or username already registered.".into(),
        )),
        Err(e) => Err(e.into()),
    }
}

/// Verifies the current password of `user_id` and stores the new one.
pub async fn change_password(
    state: &AppState,
    actor_id: i64,
    user_id: i64,
    req: &ChangePasswordRequest,
    meta: &RequestMeta,
) -> ApiResult<()> {
    let (Some(current), Some(new)) = (
        req.current_password.as_deref().filter(|p| !p.is_empty()),
        req.new_password.as_deref().filter(|p| !p.is_empty()),
    ) else {
        return Err(ApiError::bad_request(
            "current_password and new_password are required.",
        ));
    };

    let creds = state
        .users
        .credentials(user_id)
        .await?
        .ok_or_else(ApiError::not_found)?;

    if !verify_password(current, &creds.password_hash)?.is_valid() {
        warn!(user_id, "current password mismatch");
        return Err(ApiError::bad_request("Current password is incorrect."));
    }

    let hash = hash_password(new)?;
    state.users.set_password_hash(user_id, &hash).await?;
    activity::record(
        state,
        Action::PasswordChanged,
        Some(actor_id),
        meta,
        Some(json!({ "target_id": user_id })),
    )
    .await;
    info!(user_id, "password changed");
    Ok(())
}

/// Applies a partial update within `scope` and returns the fresh row.
pub async fn update_user(
    state: &AppState,
    actor_id: i64,
    user_id: i64,
    scope: EditScope,
    body: &Map<String, Value>,
    meta: &RequestMeta,
) -> ApiResult<UserView> {
    if state.users.fetch(user_id).await?.is_none() {
        return Err(ApiError::not_found());
    }

    let fields = parse_patch(&state.schema, scope, body)?;

    if let Some((_, Some(email))) = fields.iter().find(|(col, _)| *col == "email") {
        if state.users.email_taken_by_other(email, user_id).await? {
            warn!(user_id, email = %email, "email owned by another user");
            return Err(ApiError::Conflict("Email already in use.".into()));
        }
    }

    state.users.update_fields(user_id, &fields).await?;

    let changes: Map<String, Value> = fields
        .iter()
        .map(|(col, v)| (col.to_string(), json!(v)))
        .collect();
    activity::record(
        state,
        Action::ProfileUpdated,
        Some(actor_id),
        meta,
        Some(json!({ "target_id": user_id, "changes": changes })),
    )
    .await;

    info!(user_id, fields = fields.len(), "user updated");
    state
        .users
        .fetch(user_id)
        .await?
        .ok_or_else(ApiError::not_found)
}
