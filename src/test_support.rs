//! Router-level test harness: the real `build_app` over in-memory
//! repositories and a recording mailer.

use std::{sync::Arc, time::Duration};

use axum::{
    body::{to_bytes, Body},
    http::{header, Method, Request, StatusCode},
    Router,
};
use serde_json::{json, Value};
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver};
use tower::ServiceExt;

use crate::{
    app::build_app,
    config::{AppConfig, JwtConfig, MailConfig},
    mailer::{OutgoingMail, RecordingMailer},
    repo::memory::MemoryStore,
    schema::UserSchema,
    state::AppState,
};

const BASE_COLUMNS: [&str; 15] = [
    "id",
    "username",
    "email",
    "password_hash",
    "first_name",
    "middle_name",
    "last_name",
    "phone",
    "role_id",
    "rank_id",
    "department_id",
    "biography",
    "active",
    "created_at",
    "updated_at",
];

pub fn test_config() -> AppConfig {
    AppConfig {
        database_url: "postgres://unused".into(),
        jwt: JwtConfig {
            secret: "test-secret".into(),
            issuer: "portal".into(),
            audience: "portal-users".into(),
            ttl_minutes: 60 * 24,
        },
        mail: MailConfig {
            host: None,
            port: 587,
            username: None,
            password: None,
            from: "Portal <no-reply@portal.test>".into(),
        },
        reset_code_ttl_minutes: 10,
        admin_role_id: 7,
        frontend_origin: None,
    }
}

pub struct TestApp {
    pub state: AppState,
    pub store: Arc<MemoryStore>,
    router: Router,
    mail: UnboundedReceiver<OutgoingMail>,
}

impl TestApp {
    /// `address_columns` are added to the common `users` columns.
    pub fn with_address_columns(address_columns: &[&str]) -> Self {
        let schema = Arc::new(UserSchema::from_columns(
            BASE_COLUMNS.iter().chain(address_columns.iter()).copied(),
        ));
        let store = Arc::new(MemoryStore::new(schema.clone()));
        let (tx, mail) = unbounded_channel();
        let state = AppState {
            config: Arc::new(test_config()),
            schema,
            users: store.clone(),
            resets: store.clone(),
            activity: store.clone(),
            notifications: store.clone(),
            mailer: Arc::new(RecordingMailer(tx)),
        };
        Self {
            router: build_app(state.clone()),
            state,
            store,
            mail,
        }
    }

    pub fn split() -> Self {
        Self::with_address_columns(&["street", "barangay", "city"])
    }

    pub fn single() -> Self {
        Self::with_address_columns(&["address"])
    }

    pub fn no_address() -> Self {
        Self::with_address_columns(&[])
    }

    pub async fn call(
        &self,
        method: Method,
        uri: &str,
        token: Option<&str>,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        send(self.router.clone(), method, uri, token, body).await
    }

    /// Fires one POST per body in parallel tasks; results keep the input order.
    pub async fn post_concurrently(&self, uri: &str, bodies: Vec<Value>) -> Vec<(StatusCode, Value)> {
        let tasks: Vec<_> = bodies
            .into_iter()
            .map(|body| {
                let router = self.router.clone();
                let uri = uri.to_string();
                tokio::spawn(async move { send(router, Method::POST, &uri, None, Some(body)).await })
            })
            .collect();
        let mut results = Vec::with_capacity(tasks.len());
        for task in tasks {
            results.push(task.await.expect("request task panicked"));
        }
        results
    }

    pub async fn get(&self, uri: &str, token: Option<&str>) -> (StatusCode, Value) {
        self.call(Method::GET, uri, token, None).await
    }

    pub async fn post(&self, uri: &str, body: Value) -> (StatusCode, Value) {
        self.call(Method::POST, uri, None, Some(body)).await
    }

    pub async fn patch(&self, uri: &str, token: &str, body: Value) -> (StatusCode, Value) {
        self.call(Method::PATCH, uri, Some(token), Some(body)).await
    }

    /// Registers `username` with password `Secret1` and returns the new id.
    pub async fn register(&self, username: &str, role_id: i64) -> i64 {
        let (status, body) = self
            .post(
                "/api/registration",
                json!({
                    "username": username,
                    "email": format!("{username}@uni.edu"),
                    "password": "Secret1",
                    "first_name": username,
                    "last_name": "Tester",
                    "role_id": role_id,
                }),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED, "{body}");
        body["id"].as_i64().unwrap()
    }

    pub async fn login(&self, identifier: &str, password: &str) -> (StatusCode, Value) {
        self.post(
            "/api/users/login",
            json!({ "identifier": identifier, "password": password }),
        )
        .await
    }

    pub async fn token(&self, identifier: &str) -> String {
        let (status, body) = self.login(identifier, "Secret1").await;
        assert_eq!(status, StatusCode::OK, "{body}");
        body["token"].as_str().unwrap().to_string()
    }

    /// Registers an admin account and returns its token.
    pub async fn admin_token(&self) -> String {
        self.register("root", 7).await;
        self.token("root").await
    }

    /// Next mail handed to the transport, waiting for background delivery.
    pub async fn next_mail(&mut self) -> OutgoingMail {
        tokio::time::timeout(Duration::from_secs(5), self.mail.recv())
            .await
            .expect("mail was not sent in time")
            .expect("mail channel closed")
    }

    /// Skips other mail until a reset code arrives for `to`.
    pub async fn next_reset_code(&mut self, to: &str) -> String {
        loop {
            let mail = self.next_mail().await;
            if mail.to == to && mail.subject.contains("reset") {
                return code_from(&mail);
            }
        }
    }
}

async fn send(
    router: Router,
    method: Method,
    uri: &str,
    token: Option<&str>,
    body: Option<Value>,
) -> (StatusCode, Value) {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(token) = token {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
    }
    let req = match body {
        Some(v) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(serde_json::to_vec(&v).unwrap()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let resp = router.oneshot(req).await.unwrap();
    let status = resp.status();
    let bytes = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    let json = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes)
            .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&bytes).into_owned()))
    };
    (status, json)
}

/// Extracts the four-digit code from a reset mail body.
pub fn code_from(mail: &OutgoingMail) -> String {
    mail.body
        .split(|c: char| !c.is_ascii_digit())
        .find(|part| part.len() == 4)
        .expect("no code in mail")
        .to_string()
}
