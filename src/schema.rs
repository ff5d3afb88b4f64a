//! Physical layout of the `users` table, probed once at startup.
//!
//! Deployments disagree on how a postal address is stored: a single free-text
//! `address` column, the split `street` / `barangay` / `city` columns, or nothing
//! at all. [`UserSchema`] remembers which columns exist and emits the SQL
//! fragments every user query needs, so handlers never reference a column the
//! table does not have.

use std::collections::BTreeSet;

use serde::Serialize;
use sqlx::{Postgres, QueryBuilder};

pub const ADDRESS: &str = "address";
pub const STREET: &str = "street";
pub const BARANGAY: &str = "barangay";
pub const CITY: &str = "city";
pub const PROVINCE: &str = "province";

const SPLIT_COLUMNS: [&str; 3] = [STREET, BARANGAY, CITY];

/// Columns every deployment has and every editor may change.
pub const ACCOUNT_FIELDS: [&str; 5] = ["email", "first_name", "middle_name", "last_name", "phone"];

/// Which address layout the `users` table carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AddressMode {
    Single,
    Split,
    None,
}

impl AddressMode {
    /// `single` wins over `split` when both shapes are present.
    pub fn detect(columns: &BTreeSet<String>) -> Self {
        if columns.contains(ADDRESS) {
            AddressMode::Single
        } else if SPLIT_COLUMNS.iter().any(|c| columns.contains(*c)) {
            AddressMode::Split
        } else {
            AddressMode::None
        }
    }
}

/// Which set of fields an update endpoint may write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EditScope {
    /// Administrative edits: identity and contact fields only.
    Account,
    /// Self-service settings/profile: account fields plus address and biography.
    Profile,
}

/// Address as submitted by a client, in either shape.
#[derive(Debug, Clone, Default)]
pub struct AddressInput {
    pub address: Option<String>,
    pub street: Option<String>,
    pub barangay: Option<String>,
    pub city: Option<String>,
    pub province: Option<String>,
}

/// Address term of a search disjunction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AddressSearch {
    /// Expression yielding the derived address, compared with `ILIKE`.
    Match(String),
    /// No address columns: contributes nothing to the match.
    Never,
}

impl AddressSearch {
    /// Appends ` OR <term>` to an open disjunction. The bind travels with its
    /// fragment, so the placeholder count always matches.
    pub fn push_disjunct(&self, qb: &mut QueryBuilder<'_, Postgres>, pattern: String) {
        match self {
            AddressSearch::Match(expr) => {
                qb.push(" OR ");
                qb.push(expr.as_str());
                qb.push(" ILIKE ");
                qb.push_bind(pattern);
                qb.push(" ESCAPE '\\'");
            }
            AddressSearch::Never => {
                qb.push(" OR FALSE");
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct UserSchema {
    columns: BTreeSet<String>,
    mode: AddressMode,
}

fn non_empty(v: Option<&str>) -> Option<&str> {
    v.filter(|s| !s.is_empty())
}

/// Joins the non-empty address parts, prefixing the barangay with `Brgy `.
pub fn compose_address(
    street: Option<&str>,
    barangay: Option<&str>,
    city: Option<&str>,
) -> Option<String> {
    let parts: Vec<String> = [
        non_empty(street).map(str::to_owned),
        non_empty(barangay).map(|b| format!("Brgy {b}")),
        non_empty(city).map(str::to_owned),
    ]
    .into_iter()
    .flatten()
    .collect();

    if parts.is_empty() {
        None
    } else {
        Some(parts.join(", "))
    }
}

impl UserSchema {
    pub fn from_columns<I, S>(columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let columns: BTreeSet<String> = columns.into_iter().map(Into::into).collect();
        let mode = AddressMode::detect(&columns);
        Self { columns, mode }
    }

    pub fn mode(&self) -> AddressMode {
        self.mode
    }

    pub fn has(&self, column: &str) -> bool {
        self.columns.contains(column)
    }

    /// Physical column behind the `biography` field (`biography` or legacy `bio`).
    pub fn biography_column(&self) -> Option<&'static str> {
        if self.has("biography") {
            Some("biography")
        } else if self.has("bio") {
            Some("bio")
        } else {
            None
        }
    }

    fn split_present(&self) -> impl Iterator<Item = &'static str> + '_ {
        SPLIT_COLUMNS.into_iter().filter(|c| self.has(c))
    }

    /// Expression for the derived single-line address, without alias.
    fn address_expr(&self) -> String {
        match self.mode {
            AddressMode::Single => "u.address".to_string(),
            AddressMode::Split => {
                let parts: Vec<String> = self
                    .split_present()
                    .map(|c| match c {
                        BARANGAY => "'Brgy ' || NULLIF(u.barangay, '')".to_string(),
                        other => format!("NULLIF(u.{other}, '')"),
                    })
                    .collect();
                format!("NULLIF(CONCAT_WS(', ', {}), '')", parts.join(", "))
            }
            AddressMode::None => "NULL::text".to_string(),
        }
    }

    /// Read fragment aliased `address`.
    pub fn address_select(&self) -> String {
        format!("{} AS address", self.address_expr())
    }

    pub fn address_search(&self) -> AddressSearch {
        match self.mode {
            AddressMode::None => AddressSearch::Never,
            _ => AddressSearch::Match(self.address_expr()),
        }
    }

    /// `u.<col>` when the column exists, a typed `NULL` under the same name otherwise.
    pub fn optional_select(&self, column: &str, sql_type: &str) -> String {
        if self.has(column) {
            format!("u.{column}::{sql_type} AS {column}")
        } else {
            format!("NULL::{sql_type} AS {column}")
        }
    }

    /// Select list matching [`crate::users::repo_types::UserView`]; expects
    /// `users u LEFT JOIN roles r ON r.id = u.role_id`.
    pub fn user_select_list(&self) -> String {
        let biography = match self.biography_column() {
            Some(col) => format!("u.{col}::text AS biography"),
            None => "NULL::text AS biography".to_string(),
        };
        [
            "u.id".to_string(),
            "u.username".to_string(),
            "u.email".to_string(),
            "u.first_name".to_string(),
            "u.middle_name".to_string(),
            "u.last_name".to_string(),
            "NULLIF(CONCAT_WS(' ', u.first_name, NULLIF(u.middle_name, ''), u.last_name), '') AS full_name"
                .to_string(),
            "u.phone".to_string(),
            "u.role_id".to_string(),
            "r.name AS role_name".to_string(),
            "u.active".to_string(),
            self.address_select(),
            self.optional_select(STREET, "text"),
            self.optional_select(BARANGAY, "text"),
            self.optional_select(CITY, "text"),
            self.optional_select(PROVINCE, "text"),
            self.optional_select("rank_id", "bigint"),
            self.optional_select("department_id", "bigint"),
            biography,
            "u.created_at".to_string(),
            "u.updated_at".to_string(),
        ]
        .join(", ")
    }

    /// Columns an update endpoint may write, restricted to what exists.
    pub fn editable_fields(&self, scope: EditScope) -> BTreeSet<&'static str> {
        let mut fields: BTreeSet<&'static str> = ACCOUNT_FIELDS.into_iter().collect();
        if scope == EditScope::Profile {
            for col in [ADDRESS, STREET, BARANGAY, CITY, PROVINCE] {
                if self.has(col) {
                    fields.insert(col);
                }
            }
            if let Some(bio) = self.biography_column() {
                fields.insert(bio);
            }
        }
        fields
    }

    /// Address columns and values to store for a new user.
    pub fn address_values(&self, input: &AddressInput) -> Vec<(&'static str, Option<String>)> {
        let mut out = Vec::new();
        match self.mode {
            AddressMode::Single => {
                let merged = non_empty(input.address.as_deref())
                    .map(str::to_owned)
                    .or_else(|| {
                        compose_address(
                            input.street.as_deref(),
                            input.barangay.as_deref(),
                            input.city.as_deref(),
                        )
                    });
                out.push((ADDRESS, merged));
            }
            AddressMode::Split => {
                for col in self.split_present() {
                    let value = match col {
                        STREET => non_empty(input.street.as_deref())
                            .or_else(|| non_empty(input.address.as_deref())),
                        BARANGAY => non_empty(input.barangay.as_deref()),
                        _ => non_empty(input.city.as_deref()),
                    };
                    out.push((col, value.map(str::to_owned)));
                }
            }
            AddressMode::None => {}
        }
        if self.has(PROVINCE) {
            out.push((PROVINCE, non_empty(input.province.as_deref()).map(str::to_owned)));
        }
        out
    }
}
