//! Persistence seams. Handlers only see these traits; `postgres` is the real
//! implementation and `memory` backs the HTTP tests.

use async_trait::async_trait;
use time::OffsetDateTime;

use crate::activity::repo_types::{ActivityFilter, ActivityLogEntry, NewActivity};
use crate::auth::reset::PendingReset;
use crate::notifications::repo_types::Notification;
use crate::users::repo_types::{Credentials, FieldUpdate, NewUser, Page, Role, UserFilter, UserView};

pub mod postgres;

#[cfg(test)]
pub mod memory;

#[async_trait]
pub trait UserRepo: Send + Sync {
    /// True when either the username or the email (case-insensitive) is taken.
    async fn identity_taken(&self, username: &str, email: &str) -> anyhow::Result<bool>;
    async fn email_taken_by_other(&self, email: &str, user_id: i64) -> anyhow::Result<bool>;
    async fn insert(&self, user: &NewUser) -> anyhow::Result<i64>;

    /// Active user whose username or email equals `identifier`.
    async fn find_active_by_identifier(&self, identifier: &str)
        -> anyhow::Result<Option<Credentials>>;
    async fn find_by_email(&self, email: &str) -> anyhow::Result<Option<Credentials>>;
    async fn credentials(&self, id: i64) -> anyhow::Result<Option<Credentials>>;

    async fn fetch(&self, id: i64) -> anyhow::Result<Option<UserView>>;
    async fn list(&self, filter: &UserFilter) -> anyhow::Result<Page<UserView>>;

    /// Applies the assignments and bumps `updated_at`. Returns rows affected.
    async fn update_fields(&self, id: i64, fields: &[FieldUpdate]) -> anyhow::Result<u64>;
    async fn set_password_hash(&self, id: i64, hash: &str) -> anyhow::Result<u64>;
    async fn set_active(&self, id: i64, active: bool) -> anyhow::Result<u64>;

    async fn active_roles(&self) -> anyhow::Result<Vec<Role>>;
}

#[async_trait]
pub trait ResetCodeRepo: Send + Sync {
    /// Stores the code. An earlier code for the same user moves to
    /// `superseded` and stops being redeemable.
    async fn replace(&self, reset: &PendingReset) -> anyhow::Result<()>;
    async fn find(&self, user_id: i64) -> anyhow::Result<Option<PendingReset>>;
    /// Atomically counts one attempt against the pending code and returns the
    /// updated row. `None` when there is no code, it expired before `now`, or
    /// its attempts are used up.
    async fn claim_attempt(
        &self,
        user_id: i64,
        now: OffsetDateTime,
    ) -> anyhow::Result<Option<PendingReset>>;
    /// Deletes the pending code only if it is still the one with `code_hash`.
    /// Exactly one concurrent caller gets `true`.
    async fn take(&self, user_id: i64, code_hash: &str) -> anyhow::Result<bool>;
}

#[async_trait]
pub trait ActivityRepo: Send + Sync {
    async fn append(&self, entry: &NewActivity) -> anyhow::Result<()>;
    async fn list(&self, filter: &ActivityFilter) -> anyhow::Result<Page<ActivityLogEntry>>;
}

#[async_trait]
pub trait NotificationRepo: Send + Sync {
    async fn list(&self) -> anyhow::Result<Vec<Notification>>;
    async fn mark_all_seen(&self) -> anyhow::Result<u64>;
}
