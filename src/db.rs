use anyhow::Context;
use sqlx::{postgres::PgPoolOptions, PgPool};
use tracing::info;

use crate::schema::UserSchema;

pub async fn connect(database_url: &str) -> anyhow::Result<PgPool> {
    PgPoolOptions::new()
        .max_connections(10)
        .connect(database_url)
        .await
        .context("connect to database")
}

/// Reads the column set of `users` once; a failure here aborts startup.
pub async fn load_user_schema(db: &PgPool) -> anyhow::Result<UserSchema> {
    let columns: Vec<String> = sqlx::query_scalar(
        r#"
        SELECT column_name::text
        FROM information_schema.columns
        WHERE table_schema = current_schema() AND table_name = 'users'
        "#,
    )
    .fetch_all(db)
    .await
    .context("probe users columns")?;

    anyhow::ensure!(!columns.is_empty(), "table `users` not found in current schema");

    let schema = UserSchema::from_columns(columns);
    info!(address_mode = ?schema.mode(), "users schema probed");
    Ok(schema)
}
