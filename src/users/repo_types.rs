use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use time::OffsetDateTime;

use crate::schema::AddressInput;

/// User row as every read endpoint returns it. Fields whose column is missing
/// from the physical table are always present as `null`.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct UserView {
    pub id: i64,
    pub username: String,
    pub email: String,
    pub first_name: String,
    pub middle_name: Option<String>,
    pub last_name: String,
    pub full_name: Option<String>,
    pub phone: Option<String>,
    pub role_id: i64,
    pub role_name: Option<String>,
    pub active: bool,
    pub address: Option<String>,
    pub street: Option<String>,
    pub barangay: Option<String>,
    pub city: Option<String>,
    pub province: Option<String>,
    pub rank_id: Option<i64>,
    pub department_id: Option<i64>,
    pub biography: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

/// Fields needed to authenticate a user.
#[derive(Debug, Clone, FromRow)]
pub struct Credentials {
    pub id: i64,
    pub username: String,
    pub email: String,
    pub password_hash: String, // PHC string, or legacy sha256 hex
    pub role_id: i64,
    pub first_name: String,
    pub last_name: String,
    pub active: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Role {
    pub id: i64,
    pub name: String,
}

/// Validated input for a new user row.
#[derive(Debug, Clone)]
pub struct NewUser {
    pub username: String,
    pub email: String,
    pub password_hash: String,
    pub first_name: String,
    pub middle_name: Option<String>,
    pub last_name: String,
    pub phone: Option<String>,
    pub role_id: i64,
    pub rank_id: Option<i64>,
    pub department_id: Option<i64>,
    pub address: AddressInput,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum StatusFilter {
    #[default]
    Active,
    Archived,
    All,
}

/// Listing criteria shared by user administration and the faculty directory.
#[derive(Debug, Clone, Default)]
pub struct UserFilter {
    pub search: Option<String>,
    pub status: StatusFilter,
    pub role_id: Option<i64>,
    /// Directory listings hide admin accounts.
    pub exclude_admins: bool,
    pub order: UserOrder,
    pub limit: i64,
    pub offset: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UserOrder {
    #[default]
    Newest,
    Name,
}

/// One page of results plus the unpaginated total.
#[derive(Debug, Clone, Serialize)]
pub struct Page<T> {
    pub data: Vec<T>,
    pub total: i64,
}

/// A single column assignment from an update request. `None` stores NULL.
pub type FieldUpdate = (&'static str, Option<String>);
