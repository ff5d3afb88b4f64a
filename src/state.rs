use std::sync::Arc;

use sqlx::PgPool;

use crate::{
    config::AppConfig,
    mailer::{self, Mailer},
    repo::{postgres::PgStore, ActivityRepo, NotificationRepo, ResetCodeRepo, UserRepo},
    schema::UserSchema,
};

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub schema: Arc<UserSchema>,
    pub users: Arc<dyn UserRepo>,
    pub resets: Arc<dyn ResetCodeRepo>,
    pub activity: Arc<dyn ActivityRepo>,
    pub notifications: Arc<dyn NotificationRepo>,
    pub mailer: Arc<dyn Mailer>,
}

impl AppState {
    /// Wires the Postgres repositories and the configured mail transport.
    pub fn init(db: PgPool, config: AppConfig, schema: UserSchema) -> anyhow::Result<Self> {
        let config = Arc::new(config);
        let schema = Arc::new(schema);
        let store = Arc::new(PgStore::new(db, schema.clone()));
        let mailer = mailer::from_config(&config.mail)?;
        Ok(Self {
            config,
            schema,
            users: store.clone(),
            resets: store.clone(),
            activity: store.clone(),
            notifications: store,
            mailer,
        })
    }

    pub fn reset_code_ttl(&self) -> time::Duration {
        time::Duration::minutes(self.config.reset_code_ttl_minutes)
    }
}
