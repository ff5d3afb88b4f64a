use std::collections::BTreeMap;

use lazy_static::lazy_static;
use regex::Regex;
use serde_json::{Map, Value};

use super::{repo_types::FieldUpdate, services::is_valid_email};
use crate::{
    error::{ApiError, ApiResult},
    schema::{EditScope, UserSchema},
};

/// Columns that are NOT NULL and therefore reject an empty value.
const REQUIRED: [&str; 3] = ["email", "first_name", "last_name"];

fn is_valid_phone(phone: &str) -> bool {
    lazy_static! {
        static ref PHONE_RE: Regex = Regex::new(r"^\d{1,11}$").unwrap();
    }
    PHONE_RE.is_match(phone)
}

/// Turns a JSON patch body into column assignments restricted to the
/// editable set for `scope`. Unknown keys are ignored.
pub fn parse_patch(
    schema: &UserSchema,
    scope: EditScope,
    body: &Map<String, Value>,
) -> ApiResult<Vec<FieldUpdate>> {
    let allowed = schema.editable_fields(scope);
    let mut out: BTreeMap<&'static str, Option<String>> = BTreeMap::new();

    for (key, value) in body {
        let column = match key.as_str() {
            "biography" | "bio" => schema.biography_column(),
            other => allowed.get(other).copied(),
        };
        let Some(column) = column.filter(|c| allowed.contains(c)) else {
            continue;
        };

        let value = match value {
            Value::Null => None,
            Value::String(s) => Some(s.trim().to_string()).filter(|s| !s.is_empty()),
            _ => return Err(ApiError::bad_request(format!("{key} must be a string."))),
        };

        let value = match (column, value) {
            (c, None) if REQUIRED.contains(&c) => {
                return Err(ApiError::bad_request(format!("{key} cannot be empty.")));
            }
            ("email", Some(email)) => {
                let email = email.to_lowercase();
                if !is_valid_email(&email) {
                    return Err(ApiError::bad_request("Invalid email address."));
                }
                Some(email)
            }
            ("phone", Some(phone)) => {
                if !is_valid_phone(&phone) {
                    return Err(ApiError::bad_request("Phone must be 1 to 11 digits."));
                }
                Some(phone)
            }
            (_, v) => v,
        };
        out.insert(column, value);
    }

    if out.is_empty() {
        return Err(ApiError::bad_request("No editable fields in request."));
    }
    Ok(out.into_iter().collect())
}
