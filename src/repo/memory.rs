//! In-process repositories for router tests. Reads honor the same
//! [`UserSchema`] rules as the SQL implementation.

use std::{
    collections::{BTreeMap, HashMap},
    sync::{Arc, Mutex, MutexGuard},
};

use async_trait::async_trait;
use time::OffsetDateTime;

use super::{ActivityRepo, NotificationRepo, ResetCodeRepo, UserRepo};
use crate::{
    activity::repo_types::{ActivityFilter, ActivityLogEntry, NewActivity},
    auth::reset::PendingReset,
    notifications::repo_types::Notification,
    schema::{
        compose_address, AddressMode, UserSchema, ACCOUNT_FIELDS, ADDRESS, BARANGAY, CITY,
        PROVINCE, STREET,
    },
    users::repo_types::{
        Credentials, FieldUpdate, NewUser, Page, Role, StatusFilter, UserFilter, UserOrder,
        UserView,
    },
};

const ROLES: [(i64, &str); 7] = [
    (1, "Faculty"),
    (2, "Researcher Staff"),
    (3, "Extension Staff"),
    (4, "Chairperson - RDS"),
    (5, "Chairperson - ETS"),
    (6, "Dean"),
    (7, "Admin"),
];

#[derive(Debug, Clone)]
struct UserRow {
    id: i64,
    username: String,
    password_hash: String,
    role_id: i64,
    rank_id: Option<i64>,
    department_id: Option<i64>,
    active: bool,
    /// Writable text columns keyed by physical name.
    text: BTreeMap<&'static str, Option<String>>,
    created_at: OffsetDateTime,
    updated_at: OffsetDateTime,
}

impl UserRow {
    fn get(&self, col: &str) -> Option<&str> {
        self.text.get(col).and_then(|v| v.as_deref())
    }

    fn email(&self) -> &str {
        self.get("email").unwrap_or_default()
    }
}

#[derive(Debug, Clone)]
struct LogRow {
    id: i64,
    user_id: Option<i64>,
    action: &'static str,
    ip: Option<String>,
    user_agent: Option<String>,
    meta: Option<serde_json::Value>,
    created_at: OffsetDateTime,
}

#[derive(Default)]
struct Inner {
    users: Vec<UserRow>,
    resets: HashMap<i64, PendingReset>,
    logs: Vec<LogRow>,
    notifications: Vec<Notification>,
}

pub struct MemoryStore {
    schema: Arc<UserSchema>,
    inner: Mutex<Inner>,
}

fn contains_ci(haystack: Option<&str>, needle: &str) -> bool {
    haystack.is_some_and(|h| h.to_lowercase().contains(&needle.to_lowercase()))
}

impl MemoryStore {
    pub fn new(schema: Arc<UserSchema>) -> Self {
        Self {
            schema,
            inner: Mutex::new(Inner::default()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn role_name(role_id: i64) -> Option<String> {
        ROLES
            .iter()
            .find(|(id, _)| *id == role_id)
            .map(|(_, name)| name.to_string())
    }

    fn view(&self, row: &UserRow) -> UserView {
        let s = &self.schema;
        let col = |c: &str| {
            if s.has(c) {
                row.get(c).map(str::to_owned)
            } else {
                None
            }
        };
        let address = match s.mode() {
            AddressMode::Single => col(ADDRESS),
            AddressMode::Split => compose_address(
                col(STREET).as_deref(),
                col(BARANGAY).as_deref(),
                col(CITY).as_deref(),
            ),
            AddressMode::None => None,
        };
        let first = row.get("first_name").unwrap_or_default().to_string();
        let last = row.get("last_name").unwrap_or_default().to_string();
        let full_name = [Some(first.as_str()), row.get("middle_name"), Some(last.as_str())]
            .into_iter()
            .flatten()
            .filter(|p| !p.is_empty())
            .collect::<Vec<_>>()
            .join(" ");

        UserView {
            id: row.id,
            username: row.username.clone(),
            email: row.email().to_string(),
            first_name: first,
            middle_name: row.get("middle_name").map(str::to_owned),
            last_name: last,
            full_name: (!full_name.is_empty()).then_some(full_name),
            phone: row.get("phone").map(str::to_owned),
            role_id: row.role_id,
            role_name: Self::role_name(row.role_id),
            active: row.active,
            address,
            street: col(STREET),
            barangay: col(BARANGAY),
            city: col(CITY),
            province: col(PROVINCE),
            rank_id: if s.has("rank_id") { row.rank_id } else { None },
            department_id: if s.has("department_id") { row.department_id } else { None },
            biography: s.biography_column().and_then(|c| row.get(c).map(str::to_owned)),
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }

    fn credentials_of(row: &UserRow) -> Credentials {
        Credentials {
            id: row.id,
            username: row.username.clone(),
            email: row.email().to_string(),
            password_hash: row.password_hash.clone(),
            role_id: row.role_id,
            first_name: row.get("first_name").unwrap_or_default().to_string(),
            last_name: row.get("last_name").unwrap_or_default().to_string(),
            active: row.active,
        }
    }

    fn matches(&self, view: &UserView, filter: &UserFilter) -> bool {
        let status_ok = match filter.status {
            StatusFilter::Active => view.active,
            StatusFilter::Archived => !view.active,
            StatusFilter::All => true,
        };
        let admin = view
            .role_name
            .as_deref()
            .is_some_and(|n| n.eq_ignore_ascii_case("admin"));
        let search_ok = filter.search.as_deref().map_or(true, |q| {
            contains_ci(Some(&view.username), q)
                || contains_ci(Some(&view.email), q)
                || contains_ci(Some(&view.first_name), q)
                || contains_ci(Some(&view.last_name), q)
                || contains_ci(view.role_name.as_deref(), q)
                || contains_ci(view.address.as_deref(), q)
        });
        status_ok
            && !(filter.exclude_admins && admin)
            && filter.role_id.map_or(true, |r| view.role_id == r)
            && search_ok
    }

    /// Adds a notification to the feed.
    pub fn push_notification(&self, message: &str, seen: bool) {
        let mut inner = self.lock();
        let id = inner.notifications.len() as i64 + 1;
        inner.notifications.push(Notification {
            id,
            message: message.to_string(),
            seen,
            created_at: OffsetDateTime::now_utc(),
        });
    }

    /// Action tags recorded so far, oldest first.
    pub fn actions(&self) -> Vec<(Option<i64>, &'static str)> {
        self.lock().logs.iter().map(|l| (l.user_id, l.action)).collect()
    }

    pub fn password_hash(&self, id: i64) -> Option<String> {
        self.lock()
            .users
            .iter()
            .find(|u| u.id == id)
            .map(|u| u.password_hash.clone())
    }
}

fn page<T>(mut items: Vec<T>, limit: i64, offset: i64) -> Page<T> {
    let total = items.len() as i64;
    let data = items
        .drain(..)
        .skip(offset.max(0) as usize)
        .take(limit.max(0) as usize)
        .collect();
    Page { data, total }
}

#[async_trait]
impl UserRepo for MemoryStore {
    async fn identity_taken(&self, username: &str, email: &str) -> anyhow::Result<bool> {
        Ok(self
            .lock()
            .users
            .iter()
            .any(|u| u.username == username || u.email().eq_ignore_ascii_case(email)))
    }

    async fn email_taken_by_other(&self, email: &str, user_id: i64) -> anyhow::Result<bool> {
        Ok(self
            .lock()
            .users
            .iter()
            .any(|u| u.id != user_id && u.email().eq_ignore_ascii_case(email)))
    }

    async fn insert(&self, user: &NewUser) -> anyhow::Result<i64> {
        let mut inner = self.lock();
        anyhow::ensure!(
            !inner
                .users
                .iter()
                .any(|u| u.username == user.username || u.email().eq_ignore_ascii_case(&user.email)),
            "duplicate key value violates unique constraint"
        );
        let id = inner.users.iter().map(|u| u.id).max().unwrap_or(0) + 1;

        let mut text: BTreeMap<&'static str, Option<String>> = BTreeMap::new();
        text.insert("email", Some(user.email.clone()));
        text.insert("first_name", Some(user.first_name.clone()));
        text.insert("middle_name", user.middle_name.clone());
        text.insert("last_name", Some(user.last_name.clone()));
        text.insert("phone", user.phone.clone());
        text.extend(self.schema.address_values(&user.address));

        let now = OffsetDateTime::now_utc();
        inner.users.push(UserRow {
            id,
            username: user.username.clone(),
            password_hash: user.password_hash.clone(),
            role_id: user.role_id,
            rank_id: user.rank_id,
            department_id: user.department_id,
            active: true,
            text,
            created_at: now,
            updated_at: now,
        });
        Ok(id)
    }

    async fn find_active_by_identifier(
        &self,
        identifier: &str,
    ) -> anyhow::Result<Option<Credentials>> {
        Ok(self
            .lock()
            .users
            .iter()
            .find(|u| {
                u.active && (u.username == identifier || u.email().eq_ignore_ascii_case(identifier))
            })
            .map(Self::credentials_of))
    }

    async fn find_by_email(&self, email: &str) -> anyhow::Result<Option<Credentials>> {
        Ok(self
            .lock()
            .users
            .iter()
            .find(|u| u.email().eq_ignore_ascii_case(email))
            .map(Self::credentials_of))
    }

    async fn credentials(&self, id: i64) -> anyhow::Result<Option<Credentials>> {
        Ok(self
            .lock()
            .users
            .iter()
            .find(|u| u.id == id)
            .map(Self::credentials_of))
    }

    async fn fetch(&self, id: i64) -> anyhow::Result<Option<UserView>> {
        let inner = self.lock();
        Ok(inner.users.iter().find(|u| u.id == id).map(|u| self.view(u)))
    }

    async fn list(&self, filter: &UserFilter) -> anyhow::Result<Page<UserView>> {
        let inner = self.lock();
        let mut views: Vec<UserView> = inner
            .users
            .iter()
            .map(|u| self.view(u))
            .filter(|v| self.matches(v, filter))
            .collect();
        match filter.order {
            UserOrder::Newest => {
                views.sort_by(|a, b| (b.created_at, b.id).cmp(&(a.created_at, a.id)))
            }
            UserOrder::Name => views.sort_by(|a, b| {
                (&a.last_name, &a.first_name, a.id).cmp(&(&b.last_name, &b.first_name, b.id))
            }),
        }
        Ok(page(views, filter.limit, filter.offset))
    }

    async fn update_fields(&self, id: i64, fields: &[FieldUpdate]) -> anyhow::Result<u64> {
        anyhow::ensure!(!fields.is_empty(), "no fields to update");
        let mut inner = self.lock();
        let Some(row) = inner.users.iter_mut().find(|u| u.id == id) else {
            return Ok(0);
        };
        for &(col, ref value) in fields {
            anyhow::ensure!(
                self.schema.has(col) || ACCOUNT_FIELDS.contains(&col),
                "column {col} does not exist"
            );
            row.text.insert(col, value.clone());
        }
        row.updated_at = OffsetDateTime::now_utc();
        Ok(1)
    }

    async fn set_password_hash(&self, id: i64, hash: &str) -> anyhow::Result<u64> {
        let mut inner = self.lock();
        Ok(match inner.users.iter_mut().find(|u| u.id == id) {
            Some(row) => {
                row.password_hash = hash.to_string();
                row.updated_at = OffsetDateTime::now_utc();
                1
            }
            None => 0,
        })
    }

    async fn set_active(&self, id: i64, active: bool) -> anyhow::Result<u64> {
        let mut inner = self.lock();
        Ok(match inner.users.iter_mut().find(|u| u.id == id) {
            Some(row) => {
                row.active = active;
                row.updated_at = OffsetDateTime::now_utc();
                1
            }
            None => 0,
        })
    }

    async fn active_roles(&self) -> anyhow::Result<Vec<Role>> {
        Ok(ROLES
            .iter()
            .map(|(id, name)| Role {
                id: *id,
                name: name.to_string(),
            })
            .collect())
    }
}

#[async_trait]
impl ResetCodeRepo for MemoryStore {
    async fn replace(&self, reset: &PendingReset) -> anyhow::Result<()> {
        let mut inner = self.lock();
        let mut next = reset.clone();
        if let Some(previous) = inner.resets.get(&reset.user_id) {
            next.supersede(previous);
        }
        inner.resets.insert(reset.user_id, next);
        Ok(())
    }

    async fn find(&self, user_id: i64) -> anyhow::Result<Option<PendingReset>> {
        Ok(self.lock().resets.get(&user_id).cloned())
    }

    async fn claim_attempt(
        &self,
        user_id: i64,
        now: OffsetDateTime,
    ) -> anyhow::Result<Option<PendingReset>> {
        let mut inner = self.lock();
        Ok(match inner.resets.get_mut(&user_id) {
            Some(r) if !r.is_expired_at(now) && !r.is_locked() => {
                r.attempts += 1;
                Some(r.clone())
            }
            _ => None,
        })
    }

    async fn take(&self, user_id: i64, code_hash: &str) -> anyhow::Result<bool> {
        let mut inner = self.lock();
        if inner
            .resets
            .get(&user_id)
            .is_some_and(|r| r.code_hash == code_hash)
        {
            inner.resets.remove(&user_id);
            return Ok(true);
        }
        Ok(false)
    }
}

#[async_trait]
impl ActivityRepo for MemoryStore {
    async fn append(&self, entry: &NewActivity) -> anyhow::Result<()> {
        let mut inner = self.lock();
        let id = inner.logs.len() as i64 + 1;
        inner.logs.push(LogRow {
            id,
            user_id: entry.user_id,
            action: entry.action.as_str(),
            ip: entry.ip.clone(),
            user_agent: entry.user_agent.clone(),
            meta: entry.meta.clone(),
            created_at: OffsetDateTime::now_utc(),
        });
        Ok(())
    }

    async fn list(&self, filter: &ActivityFilter) -> anyhow::Result<Page<ActivityLogEntry>> {
        let inner = self.lock();
        let mut rows: Vec<ActivityLogEntry> = inner
            .logs
            .iter()
            .filter(|l| filter.date_from.map_or(true, |d| l.created_at.date() >= d))
            .filter(|l| filter.date_to.map_or(true, |d| l.created_at.date() <= d))
            .map(|l| ActivityLogEntry {
                id: l.id,
                created_at: l.created_at,
                username: l.user_id.map(|uid| {
                    inner
                        .users
                        .iter()
                        .find(|u| u.id == uid)
                        .map(|u| u.username.clone())
                        .unwrap_or_else(|| format!("user#{uid}"))
                }),
                action: l.action.to_string(),
                ip: l.ip.clone(),
                user_agent: l.user_agent.clone(),
                meta: l.meta.clone(),
            })
            .filter(|e| {
                filter.search.as_deref().map_or(true, |q| {
                    contains_ci(e.username.as_deref(), q)
                        || contains_ci(Some(&e.action), q)
                        || contains_ci(e.ip.as_deref(), q)
                        || contains_ci(e.user_agent.as_deref(), q)
                        || contains_ci(e.meta.as_ref().map(|m| m.to_string()).as_deref(), q)
                })
            })
            .collect();
        rows.sort_by(|a, b| (b.created_at, b.id).cmp(&(a.created_at, a.id)));
        Ok(page(rows, filter.limit, filter.offset))
    }
}

#[async_trait]
impl NotificationRepo for MemoryStore {
    async fn list(&self) -> anyhow::Result<Vec<Notification>> {
        let mut rows = self.lock().notifications.clone();
        rows.sort_by(|a, b| (b.created_at, b.id).cmp(&(a.created_at, a.id)));
        Ok(rows)
    }

    async fn mark_all_seen(&self) -> anyhow::Result<u64> {
        let mut inner = self.lock();
        let mut n = 0;
        for note in inner.notifications.iter_mut().filter(|n| !n.seen) {
            note.seen = true;
            n += 1;
        }
        Ok(n)
    }
}
