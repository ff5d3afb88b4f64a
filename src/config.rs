use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct JwtConfig {
    pub secret: String,
    pub issuer: String,
    pub audience: String,
    pub ttl_minutes: i64,
}

/// SMTP settings. `host` unset means mail is logged and dropped.
#[derive(Debug, Clone, Deserialize)]
pub struct MailConfig {
    pub host: Option<String>,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    pub from: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub database_url: String,
    pub jwt: JwtConfig,
    pub mail: MailConfig,
    pub reset_code_ttl_minutes: i64,
    pub admin_role_id: i64,
    pub frontend_origin: Option<String>,
}

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<T>().ok())
        .unwrap_or(default)
}

fn env_opt(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let database_url = std::env::var("DATABASE_URL")?;
        let jwt = JwtConfig {
            secret: std::env::var("JWT_SECRET")?,
            issuer: std::env::var("JWT_ISSUER").unwrap_or_else(|_| "portal".into()),
            audience: std::env::var("JWT_AUDIENCE").unwrap_or_else(|_| "portal-users".into()),
            ttl_minutes: env_or("JWT_TTL_MINUTES", 60 * 24),
        };
        let mail = MailConfig {
            host: env_opt("SMTP_HOST"),
            port: env_or("SMTP_PORT", 587),
            username: env_opt("SMTP_USERNAME"),
            password: env_opt("SMTP_PASSWORD"),
            from: std::env::var("MAIL_FROM")
                .unwrap_or_else(|_| "Research Portal <no-reply@portal.local>".into()),
        };
        Ok(Self {
            database_url,
            jwt,
            mail,
            reset_code_ttl_minutes: env_or("RESET_CODE_TTL_MINUTES", 10),
            admin_role_id: env_or("ADMIN_ROLE_ID", 7),
            frontend_origin: env_opt("FRONTEND_ORIGIN"),
        })
    }
}
