use serde::{Deserialize, Serialize};

use super::repo_types::{StatusFilter, UserView};
use crate::schema::AddressInput;

pub const MAX_PAGE_SIZE: i64 = 100;

/// Page/limit pair parsed leniently from query strings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Paging {
    pub page: i64,
    pub limit: i64,
}

impl Paging {
    /// Unparseable or non-positive values fall back to page 1 / `default_limit`;
    /// the limit is capped at [`MAX_PAGE_SIZE`].
    pub fn parse(page: Option<&str>, limit: Option<&str>, default_limit: i64) -> Self {
        let num = |v: Option<&str>| {
            v.and_then(|s| s.trim().parse::<i64>().ok())
                .filter(|n| *n != 0)
        };
        Self {
            page: num(page).unwrap_or(1).max(1),
            limit: num(limit)
                .unwrap_or(default_limit)
                .clamp(1, MAX_PAGE_SIZE),
        }
    }

    /// Saturates instead of overflowing; a page past the end is simply empty.
    pub fn offset(&self) -> i64 {
        (self.page - 1).saturating_mul(self.limit)
    }
}

#[derive(Debug, Deserialize)]
pub struct UserListQuery {
    #[serde(default)]
    pub search: String,
    #[serde(default)]
    pub status: StatusFilter,
    pub page: Option<String>,
    pub limit: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct DirectoryQuery {
    #[serde(default)]
    pub search: String,
    pub role_id: Option<String>,
    pub page: Option<String>,
    pub limit: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct UserPage {
    pub data: Vec<UserView>,
    pub page: i64,
    pub limit: i64,
    pub total: i64,
}

/// Body accepted by registration and administrative user creation.
#[derive(Debug, Default, Deserialize)]
pub struct NewUserRequest {
    pub username: Option<String>,
    pub email: Option<String>,
    pub password: Option<String>,
    pub first_name: Option<String>,
    pub middle_name: Option<String>,
    pub last_name: Option<String>,
    pub phone: Option<String>,
    pub role_id: Option<i64>,
    pub rank_id: Option<i64>,
    pub department_id: Option<i64>,

    // either address shape
    pub address: Option<String>,
    pub street: Option<String>,
    pub barangay: Option<String>,
    pub city: Option<String>,
    pub province: Option<String>,

    // informational only; recorded in the activity log
    pub department_name: Option<String>,
    pub program_name: Option<String>,
    pub province_code: Option<String>,
    pub municipality_code: Option<String>,
    pub barangay_code: Option<String>,
}

impl NewUserRequest {
    pub fn address_input(&self) -> AddressInput {
        AddressInput {
            address: self.address.clone(),
            street: self.street.clone(),
            barangay: self.barangay.clone(),
            city: self.city.clone(),
            province: self.province.clone(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct ChangePasswordRequest {
    pub current_password: Option<String>,
    pub new_password: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct CreatedUser {
    pub id: i64,
    pub message: &'static str,
}

#[derive(Debug, Serialize)]
pub struct Affected {
    pub affected: u64,
}

#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub message: &'static str,
}
