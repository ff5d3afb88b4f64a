use axum::{
    extract::{FromRef, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde_json::json;
use time::OffsetDateTime;
use tracing::{info, instrument, warn};

use crate::{
    activity::{self, repo_types::Action, RequestMeta},
    auth::{
        dto::{ForgotPasswordRequest, LoginRequest, LoginResponse, LoginUser, ResetPasswordRequest},
        extractors::AuthUser,
        jwt::{JwtKeys, TokenSubject},
        password::{dummy_verify, hash_password, verify_password, PasswordCheck},
        reset::{dummy_issue, CodeCheck, PendingReset},
    },
    error::{ApiError, ApiResult},
    mailer::{self, OutgoingMail},
    state::AppState,
    users::{
        dto::{CreatedUser, MessageResponse, NewUserRequest},
        repo_types::UserView,
        services::{create_user, validate_new_user},
    },
};

const FORGOT_REPLY: &str = "If that email exists, a code has been sent.";
const INVALID_OR_EXPIRED: &str = "Invalid or expired code.";

pub fn auth_routes() -> Router<AppState> {
    Router::new()
        .route("/registration", post(register))
        .route("/users/register", post(register))
        .route("/users/login", post(login))
        .route("/users/forgot-password", post(forgot_password))
        .route("/users/reset-password", post(reset_password))
}

pub fn me_routes() -> Router<AppState> {
    Router::new().route("/users/me", get(get_me))
}

#[instrument(skip(state, req, payload))]
pub async fn register(
    State(state): State<AppState>,
    req: RequestMeta,
    Json(payload): Json<NewUserRequest>,
) -> ApiResult<(StatusCode, Json<CreatedUser>)> {
    let user = validate_new_user(&payload)?;
    let id = create_user(&state, &user).await?;

    activity::record(
        &state,
        Action::RegisterSuccess,
        Some(id),
        &req,
        Some(json!({
            "email": user.email,
            "role_id": user.role_id,
            "department_name": payload.department_name,
            "program_name": payload.program_name,
            "province_code": payload.province_code,
            "municipality_code": payload.municipality_code,
            "barangay_code": payload.barangay_code,
        })),
    )
    .await;

    mailer::dispatch(
        state.mailer.clone(),
        OutgoingMail::welcome(&user.email, &user.first_name),
    );

    info!(user_id = id, "user registered");
    Ok((
        StatusCode::CREATED,
        Json(CreatedUser {
            id,
            message: "Registered",
        }),
    ))
}

#[instrument(skip(state, req, payload))]
pub async fn login(
    State(state): State<AppState>,
    req: RequestMeta,
    Json(payload): Json<LoginRequest>,
) -> ApiResult<Json<LoginResponse>> {
    let invalid = || ApiError::Unauthorized("Invalid credentials.".into());

    let (Some(identifier), Some(password)) = (
        payload
            .identifier
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty()),
        payload.password.as_deref().filter(|p| !p.is_empty()),
    ) else {
        return Err(ApiError::bad_request("Missing credentials."));
    };

    let Some(user) = state.users.find_active_by_identifier(identifier).await? else {
        dummy_verify(password);
        warn!(identifier = %identifier, "login unknown or inactive user");
        activity::record(
            &state,
            Action::LoginFailNoUser,
            None,
            &req,
            Some(json!({ "identifier": identifier })),
        )
        .await;
        return Err(invalid());
    };

    let check = verify_password(password, &user.password_hash)?;
    if !check.is_valid() {
        warn!(user_id = user.id, "login invalid password");
        activity::record(&state, Action::LoginFailBadPassword, Some(user.id), &req, None).await;
        return Err(invalid());
    }

    if check == PasswordCheck::ValidLegacy {
        match hash_password(password) {
            Ok(hash) => {
                if let Err(e) = state.users.set_password_hash(user.id, &hash).await {
                    warn!(error = %e, user_id = user.id, "legacy hash upgrade failed");
                } else {
                    info!(user_id = user.id, "legacy password hash upgraded");
                }
            }
            Err(e) => warn!(error = %e, user_id = user.id, "legacy hash upgrade failed"),
        }
    }

    let keys = JwtKeys::from_ref(&state);
    let token = keys.sign(TokenSubject {
        user_id: user.id,
        role_id: user.role_id,
        email: &user.email,
    })?;

    activity::record(&state, Action::LoginSuccess, Some(user.id), &req, None).await;
    info!(user_id = user.id, "user logged in");

    Ok(Json(LoginResponse {
        message: "ok",
        token,
        user: LoginUser {
            id: user.id,
            username: user.username,
            email: user.email,
            role_id: user.role_id,
            first_name: user.first_name,
            last_name: user.last_name,
        },
    }))
}

#[instrument(skip(state, user), fields(user_id = user.id))]
pub async fn get_me(State(state): State<AppState>, user: AuthUser) -> ApiResult<Json<UserView>> {
    let view = state
        .users
        .fetch(user.id)
        .await?
        .ok_or_else(ApiError::not_found)?;
    Ok(Json(view))
}

#[instrument(skip(state, req, payload))]
pub async fn forgot_password(
    State(state): State<AppState>,
    req: RequestMeta,
    Json(payload): Json<ForgotPasswordRequest>,
) -> ApiResult<Json<MessageResponse>> {
    let email = payload
        .email
        .as_deref()
        .map(|e| e.trim().to_lowercase())
        .filter(|e| !e.is_empty())
        .ok_or_else(|| ApiError::bad_request("Email required."))?;

    let Some(user) = state.users.find_by_email(&email).await? else {
        dummy_issue();
        info!("reset requested for unknown email");
        return Ok(Json(MessageResponse {
            message: FORGOT_REPLY,
        }));
    };

    let (pending, code) =
        PendingReset::issue(user.id, OffsetDateTime::now_utc(), state.reset_code_ttl());
    state.resets.replace(&pending).await?;

    activity::record(&state, Action::ResetRequest, Some(user.id), &req, None).await;
    mailer::dispatch(
        state.mailer.clone(),
        OutgoingMail::reset_code(&user.email, &code, state.config.reset_code_ttl_minutes),
    );

    info!(user_id = user.id, "reset code issued");
    Ok(Json(MessageResponse {
        message: FORGOT_REPLY,
    }))
}

#[instrument(skip(state, req, payload))]
pub async fn reset_password(
    State(state): State<AppState>,
    req: RequestMeta,
    Json(payload): Json<ResetPasswordRequest>,
) -> ApiResult<Json<MessageResponse>> {
    let non_empty = |v: &Option<String>| {
        v.as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_owned)
    };
    let (Some(email), Some(code), Some(new_password)) = (
        non_empty(&payload.email),
        non_empty(&payload.code),
        payload.new_password.clone().filter(|p| !p.is_empty()),
    ) else {
        return Err(ApiError::bad_request("Missing fields."));
    };

    let Some(user) = state.users.find_by_email(&email).await? else {
        return Err(ApiError::bad_request(INVALID_OR_EXPIRED));
    };
    let now = OffsetDateTime::now_utc();
    let Some(pending) = state.resets.find(user.id).await? else {
        return Err(ApiError::bad_request(INVALID_OR_EXPIRED));
    };
    match pending.check(&code, now) {
        CodeCheck::Expired => {
            warn!(user_id = user.id, "reset code expired");
            return Err(ApiError::bad_request(INVALID_OR_EXPIRED));
        }
        CodeCheck::Superseded => {
            warn!(user_id = user.id, "superseded reset code presented");
            return Err(ApiError::bad_request(INVALID_OR_EXPIRED));
        }
        CodeCheck::Accepted | CodeCheck::Mismatch => {}
    }

    // counting the attempt and re-reading the row happen in one step, so
    // concurrent guesses cannot exceed the cap
    let Some(attempt) = state.resets.claim_attempt(user.id, now).await? else {
        warn!(user_id = user.id, "reset code locked or gone");
        return Err(ApiError::bad_request(INVALID_OR_EXPIRED));
    };

    match attempt.check(&code, now) {
        CodeCheck::Accepted => {
            if !state.resets.take(user.id, &attempt.code_hash).await? {
                warn!(user_id = user.id, "reset code already redeemed");
                return Err(ApiError::bad_request(INVALID_OR_EXPIRED));
            }
            let hash = hash_password(&new_password)?;
            state.users.set_password_hash(user.id, &hash).await?;
            activity::record(&state, Action::ResetSuccess, Some(user.id), &req, None).await;
            info!(user_id = user.id, "password reset");
            Ok(Json(MessageResponse {
                message: "Password updated.",
            }))
        }
        CodeCheck::Mismatch => {
            warn!(user_id = user.id, attempts = attempt.attempts, "reset code mismatch");
            if attempt.is_locked() {
                state.resets.take(user.id, &attempt.code_hash).await?;
                warn!(user_id = user.id, "reset code revoked after too many attempts");
            }
            Err(ApiError::bad_request("Invalid code."))
        }
        CodeCheck::Expired | CodeCheck::Superseded => {
            Err(ApiError::bad_request(INVALID_OR_EXPIRED))
        }
    }
}
