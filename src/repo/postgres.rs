use std::sync::Arc;

use anyhow::Context;
use async_trait::async_trait;
use sqlx::{PgPool, Postgres, QueryBuilder};
use time::OffsetDateTime;

use super::{ActivityRepo, NotificationRepo, ResetCodeRepo, UserRepo};
use crate::{
    activity::repo_types::{ActivityFilter, ActivityLogEntry, NewActivity},
    auth::reset::{PendingReset, MAX_RESET_ATTEMPTS, MAX_SUPERSEDED},
    notifications::repo_types::Notification,
    schema::UserSchema,
    users::repo_types::{
        Credentials, FieldUpdate, NewUser, Page, Role, StatusFilter, UserFilter, UserOrder,
        UserView,
    },
};

pub(crate) const LIKE_ESCAPE: &str = " ESCAPE '\\'";

const CREDENTIAL_COLUMNS: &str =
    "id, username, email, password_hash, role_id, first_name, last_name, active";

/// `%term%` with the LIKE metacharacters of `term` escaped.
pub(crate) fn like_pattern(term: &str) -> String {
    let mut out = String::with_capacity(term.len() + 2);
    out.push('%');
    for c in term.chars() {
        if matches!(c, '\\' | '%' | '_') {
            out.push('\\');
        }
        out.push(c);
    }
    out.push('%');
    out
}

/// Postgres-backed repositories. SQL touching `users` is shaped by the probed schema.
#[derive(Clone)]
pub struct PgStore {
    db: PgPool,
    schema: Arc<UserSchema>,
}

impl PgStore {
    pub fn new(db: PgPool, schema: Arc<UserSchema>) -> Self {
        Self { db, schema }
    }
}

fn push_user_where<'a>(
    schema: &UserSchema,
    qb: &mut QueryBuilder<'a, Postgres>,
    filter: &'a UserFilter,
) {
    qb.push(" WHERE TRUE");
    match filter.status {
        StatusFilter::Active => {
            qb.push(" AND u.active = TRUE");
        }
        StatusFilter::Archived => {
            qb.push(" AND u.active = FALSE");
        }
        StatusFilter::All => {}
    }
    if filter.exclude_admins {
        qb.push(" AND (r.name IS NULL OR LOWER(r.name) <> 'admin')");
    }
    if let Some(role_id) = filter.role_id {
        qb.push(" AND u.role_id = ").push_bind(role_id);
    }
    if let Some(search) = filter.search.as_deref() {
        let like = like_pattern(search);
        qb.push(" AND (u.username ILIKE ")
            .push_bind(like.clone())
            .push(LIKE_ESCAPE)
            .push(" OR u.email ILIKE ")
            .push_bind(like.clone())
            .push(LIKE_ESCAPE)
            .push(" OR u.first_name ILIKE ")
            .push_bind(like.clone())
            .push(LIKE_ESCAPE)
            .push(" OR u.last_name ILIKE ")
            .push_bind(like.clone())
            .push(LIKE_ESCAPE)
            .push(" OR r.name ILIKE ")
            .push_bind(like.clone())
            .push(LIKE_ESCAPE);
        schema.address_search().push_disjunct(qb, like);
        qb.push(")");
    }
}

fn user_list_query<'a>(schema: &UserSchema, filter: &'a UserFilter) -> QueryBuilder<'a, Postgres> {
    let mut qb = QueryBuilder::new("SELECT ");
    qb.push(schema.user_select_list());
    qb.push(" FROM users u LEFT JOIN roles r ON r.id = u.role_id");
    push_user_where(schema, &mut qb, filter);
    qb.push(match filter.order {
        UserOrder::Newest => " ORDER BY u.created_at DESC, u.id DESC",
        UserOrder::Name => " ORDER BY u.last_name ASC, u.first_name ASC, u.id ASC",
    });
    qb.push(" LIMIT ").push_bind(filter.limit);
    qb.push(" OFFSET ").push_bind(filter.offset);
    qb
}

fn user_count_query<'a>(schema: &UserSchema, filter: &'a UserFilter) -> QueryBuilder<'a, Postgres> {
    let mut qb =
        QueryBuilder::new("SELECT COUNT(*) FROM users u LEFT JOIN roles r ON r.id = u.role_id");
    push_user_where(schema, &mut qb, filter);
    qb
}

#[async_trait]
impl UserRepo for PgStore {
    async fn identity_taken(&self, username: &str, email: &str) -> anyhow::Result<bool> {
        let taken: bool = sqlx::query_scalar(
            r#"
            SELECT EXISTS(
                SELECT 1 FROM users
                WHERE LOWER(email) = LOWER($1) OR username = $2
            )
            "#,
        )
        .bind(email)
        .bind(username)
        .fetch_one(&self.db)
        .await
        .context("check identity taken")?;
        Ok(taken)
    }

    async fn email_taken_by_other(&self, email: &str, user_id: i64) -> anyhow::Result<bool> {
        let taken: bool = sqlx::query_scalar(
            r#"
            SELECT EXISTS(
                SELECT 1 FROM users WHERE LOWER(email) = LOWER($1) AND id <> $2
            )
            "#,
        )
        .bind(email)
        .bind(user_id)
        .fetch_one(&self.db)
        .await
        .context("check email owner")?;
        Ok(taken)
    }

    async fn insert(&self, user: &NewUser) -> anyhow::Result<i64> {
        let mut text_cols: Vec<FieldUpdate> = vec![
            ("username", Some(user.username.clone())),
            ("email", Some(user.email.clone())),
            ("password_hash", Some(user.password_hash.clone())),
            ("first_name", Some(user.first_name.clone())),
            ("middle_name", user.middle_name.clone()),
            ("last_name", Some(user.last_name.clone())),
            ("phone", user.phone.clone()),
        ];
        text_cols.extend(self.schema.address_values(&user.address));

        let mut int_cols: Vec<(&'static str, Option<i64>)> = vec![("role_id", Some(user.role_id))];
        for (col, value) in [("rank_id", user.rank_id), ("department_id", user.department_id)] {
            if self.schema.has(col) {
                int_cols.push((col, value));
            }
        }

        let columns: Vec<&str> = text_cols
            .iter()
            .map(|(c, _)| *c)
            .chain(int_cols.iter().map(|(c, _)| *c))
            .collect();

        let mut qb: QueryBuilder<'_, Postgres> = QueryBuilder::new("INSERT INTO users (");
        qb.push(columns.join(", "));
        qb.push(", active, created_at, updated_at) VALUES (");
        {
            let mut values = qb.separated(", ");
            for (_, v) in text_cols {
                values.push_bind(v);
            }
            for (_, v) in int_cols {
                values.push_bind(v);
            }
        }
        qb.push(", TRUE, NOW(), NOW()) RETURNING id");

        let id: i64 = qb
            .build_query_scalar()
            .fetch_one(&self.db)
            .await
            .context("insert user")?;
        Ok(id)
    }

    async fn find_active_by_identifier(
        &self,
        identifier: &str,
    ) -> anyhow::Result<Option<Credentials>> {
        let sql = format!(
            "SELECT {CREDENTIAL_COLUMNS} FROM users \
             WHERE (LOWER(email) = LOWER($1) OR username = $1) AND active = TRUE \
             ORDER BY id LIMIT 1"
        );
        let row = sqlx::query_as::<_, Credentials>(&sql)
            .bind(identifier)
            .fetch_optional(&self.db)
            .await
            .context("find user by identifier")?;
        Ok(row)
    }

    async fn find_by_email(&self, email: &str) -> anyhow::Result<Option<Credentials>> {
        let sql = format!(
            "SELECT {CREDENTIAL_COLUMNS} FROM users WHERE LOWER(email) = LOWER($1) LIMIT 1"
        );
        let row = sqlx::query_as::<_, Credentials>(&sql)
            .bind(email)
            .fetch_optional(&self.db)
            .await
            .context("find user by email")?;
        Ok(row)
    }

    async fn credentials(&self, id: i64) -> anyhow::Result<Option<Credentials>> {
        let sql = format!("SELECT {CREDENTIAL_COLUMNS} FROM users WHERE id = $1");
        let row = sqlx::query_as::<_, Credentials>(&sql)
            .bind(id)
            .fetch_optional(&self.db)
            .await
            .context("load credentials")?;
        Ok(row)
    }

    async fn fetch(&self, id: i64) -> anyhow::Result<Option<UserView>> {
        let sql = format!(
            "SELECT {} FROM users u LEFT JOIN roles r ON r.id = u.role_id WHERE u.id = $1",
            self.schema.user_select_list()
        );
        let row = sqlx::query_as::<_, UserView>(&sql)
            .bind(id)
            .fetch_optional(&self.db)
            .await
            .context("fetch user")?;
        Ok(row)
    }

    async fn list(&self, filter: &UserFilter) -> anyhow::Result<Page<UserView>> {
        let data = user_list_query(&self.schema, filter)
            .build_query_as::<UserView>()
            .fetch_all(&self.db)
            .await
            .context("list users")?;
        let total: i64 = user_count_query(&self.schema, filter)
            .build_query_scalar()
            .fetch_one(&self.db)
            .await
            .context("count users")?;
        Ok(Page { data, total })
    }

    async fn update_fields(&self, id: i64, fields: &[FieldUpdate]) -> anyhow::Result<u64> {
        anyhow::ensure!(!fields.is_empty(), "no fields to update");
        let mut qb: QueryBuilder<'_, Postgres> = QueryBuilder::new("UPDATE users SET ");
        {
            let mut sets = qb.separated(", ");
            for (col, value) in fields {
                // column names come from the schema allow-list, never from input
                sets.push(format!("{col} = "));
                sets.push_bind_unseparated(value.clone());
            }
            sets.push("updated_at = NOW()");
        }
        qb.push(" WHERE id = ").push_bind(id);

        let res = qb
            .build()
            .execute(&self.db)
            .await
            .context("update user fields")?;
        Ok(res.rows_affected())
    }

    async fn set_password_hash(&self, id: i64, hash: &str) -> anyhow::Result<u64> {
        let res = sqlx::query("UPDATE users SET password_hash = $1, updated_at = NOW() WHERE id = $2")
            .bind(hash)
            .bind(id)
            .execute(&self.db)
            .await
            .context("update password hash")?;
        Ok(res.rows_affected())
    }

    async fn set_active(&self, id: i64, active: bool) -> anyhow::Result<u64> {
        let res = sqlx::query("UPDATE users SET active = $1, updated_at = NOW() WHERE id = $2")
            .bind(active)
            .bind(id)
            .execute(&self.db)
            .await
            .context("update active flag")?;
        Ok(res.rows_affected())
    }

    async fn active_roles(&self) -> anyhow::Result<Vec<Role>> {
        let rows = sqlx::query_as::<_, Role>(
            "SELECT id, name FROM roles WHERE active = TRUE ORDER BY id",
        )
        .fetch_all(&self.db)
        .await
        .context("list roles")?;
        Ok(rows)
    }
}

const RESET_COLUMNS: &str = "user_id, code_hash, code_salt, attempts, expires_at, superseded";

#[async_trait]
impl ResetCodeRepo for PgStore {
    async fn replace(&self, reset: &PendingReset) -> anyhow::Result<()> {
        // the upsert moves the old digest aside in the same statement
        sqlx::query(
            r#"
            INSERT INTO password_reset_codes
                (user_id, code_hash, code_salt, attempts, expires_at, superseded)
            VALUES ($1, $2, $3, 0, $4, '{}')
            ON CONFLICT (user_id) DO UPDATE SET
                superseded = (
                    array_append(
                        password_reset_codes.superseded,
                        password_reset_codes.code_salt || ':' || password_reset_codes.code_hash
                    )
                )[GREATEST(cardinality(password_reset_codes.superseded) + 2 - $5, 1):],
                code_hash = EXCLUDED.code_hash,
                code_salt = EXCLUDED.code_salt,
                attempts = 0,
                expires_at = EXCLUDED.expires_at,
                created_at = NOW()
            "#,
        )
        .bind(reset.user_id)
        .bind(&reset.code_hash)
        .bind(&reset.code_salt)
        .bind(reset.expires_at)
        .bind(MAX_SUPERSEDED as i32)
        .execute(&self.db)
        .await
        .context("store reset code")?;
        Ok(())
    }

    async fn find(&self, user_id: i64) -> anyhow::Result<Option<PendingReset>> {
        let sql = format!("SELECT {RESET_COLUMNS} FROM password_reset_codes WHERE user_id = $1");
        let row = sqlx::query_as::<_, PendingReset>(&sql)
            .bind(user_id)
            .fetch_optional(&self.db)
            .await
            .context("find reset code")?;
        Ok(row)
    }

    async fn claim_attempt(
        &self,
        user_id: i64,
        now: OffsetDateTime,
    ) -> anyhow::Result<Option<PendingReset>> {
        let sql = format!(
            "UPDATE password_reset_codes SET attempts = attempts + 1 \
             WHERE user_id = $1 AND expires_at >= $2 AND attempts < $3 \
             RETURNING {RESET_COLUMNS}"
        );
        let row = sqlx::query_as::<_, PendingReset>(&sql)
            .bind(user_id)
            .bind(now)
            .bind(MAX_RESET_ATTEMPTS)
            .fetch_optional(&self.db)
            .await
            .context("claim reset attempt")?;
        Ok(row)
    }

    async fn take(&self, user_id: i64, code_hash: &str) -> anyhow::Result<bool> {
        let res = sqlx::query(
            "DELETE FROM password_reset_codes WHERE user_id = $1 AND code_hash = $2",
        )
        .bind(user_id)
        .bind(code_hash)
        .execute(&self.db)
        .await
        .context("delete reset code")?;
        Ok(res.rows_affected() == 1)
    }
}

#[async_trait]
impl ActivityRepo for PgStore {
    async fn append(&self, entry: &NewActivity) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            INSERT INTO activity_logs (user_id, action, ip, user_agent, meta)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(entry.user_id)
        .bind(entry.action.as_str())
        .bind(entry.ip.as_deref())
        .bind(entry.user_agent.as_deref())
        .bind(entry.meta.as_ref().map(sqlx::types::Json))
        .execute(&self.db)
        .await
        .context("insert activity log")?;
        Ok(())
    }

    async fn list(&self, filter: &ActivityFilter) -> anyhow::Result<Page<ActivityLogEntry>> {
        let data = activity_list_query(filter)
            .build_query_as::<ActivityLogEntry>()
            .fetch_all(&self.db)
            .await
            .context("list activity logs")?;
        let total: i64 = activity_count_query(filter)
            .build_query_scalar()
            .fetch_one(&self.db)
            .await
            .context("count activity logs")?;
        Ok(Page { data, total })
    }
}

fn push_activity_where<'a>(qb: &mut QueryBuilder<'a, Postgres>, filter: &'a ActivityFilter) {
    qb.push(" WHERE TRUE");
    if let Some(search) = filter.search.as_deref() {
        let like = like_pattern(search);
        qb.push(" AND (u.username ILIKE ")
            .push_bind(like.clone())
            .push(LIKE_ESCAPE)
            .push(" OR l.action ILIKE ")
            .push_bind(like.clone())
            .push(LIKE_ESCAPE)
            .push(" OR l.ip ILIKE ")
            .push_bind(like.clone())
            .push(LIKE_ESCAPE)
            .push(" OR l.user_agent ILIKE ")
            .push_bind(like.clone())
            .push(LIKE_ESCAPE)
            .push(" OR l.meta::text ILIKE ")
            .push_bind(like)
            .push(LIKE_ESCAPE)
            .push(")");
    }
    if let Some(from) = filter.date_from {
        qb.push(" AND l.created_at >= ").push_bind(from);
    }
    if let Some(to) = filter.date_to {
        // inclusive of the whole day
        qb.push(" AND l.created_at < (").push_bind(to).push(" + 1)");
    }
}

fn activity_list_query(filter: &ActivityFilter) -> QueryBuilder<'_, Postgres> {
    let mut qb = QueryBuilder::new(
        "SELECT l.id, l.created_at, \
         COALESCE(u.username, 'user#' || l.user_id::text) AS username, \
         l.action, l.ip, l.user_agent, l.meta \
         FROM activity_logs l LEFT JOIN users u ON u.id = l.user_id",
    );
    push_activity_where(&mut qb, filter);
    qb.push(" ORDER BY l.created_at DESC, l.id DESC LIMIT ")
        .push_bind(filter.limit)
        .push(" OFFSET ")
        .push_bind(filter.offset);
    qb
}

fn activity_count_query(filter: &ActivityFilter) -> QueryBuilder<'_, Postgres> {
    let mut qb = QueryBuilder::new(
        "SELECT COUNT(*) FROM activity_logs l LEFT JOIN users u ON u.id = l.user_id",
    );
    push_activity_where(&mut qb, filter);
    qb
}

#[async_trait]
impl NotificationRepo for PgStore {
    async fn list(&self) -> anyhow::Result<Vec<Notification>> {
        let rows = sqlx::query_as::<_, Notification>(
            "SELECT id, message, seen, created_at FROM notifications ORDER BY created_at DESC, id DESC",
        )
        .fetch_all(&self.db)
        .await
        .context("list notifications")?;
        Ok(rows)
    }

    async fn mark_all_seen(&self) -> anyhow::Result<u64> {
        let res = sqlx::query("UPDATE notifications SET seen = TRUE WHERE seen = FALSE")
            .execute(&self.db)
            .await
            .context("mark notifications seen")?;
        Ok(res.rows_affected())
    }
}
