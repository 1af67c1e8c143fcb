//! In-process backend with call counting and failure injection.

use std::{
    cmp::Ordering,
    collections::{BTreeMap, HashMap},
    sync::{Mutex, MutexGuard},
};

use async_trait::async_trait;
use bytes::Bytes;
use serde_json::{json, Value};
use time::{format_description::well_known::Rfc3339, OffsetDateTime};
use tokio::sync::broadcast;
use uuid::Uuid;

use super::{
    AuthApi, AuthEvent, AuthSubscription, CurrentUser, Fields, ObjectStore, OrderBy, Record,
    RecordApi, Session, SignUpRequest, Table,
};
use crate::{error::AppError, storage::public_url};

/// Every operation of the capability surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Op {
    GetSession,
    GetCurrentUser,
    SignIn,
    SignUp,
    SignOut,
    RefreshSession,
    SignInWithOAuth,
    ExchangeCode,
    ListRecords,
    InsertRecord,
    UpdateRecord,
    DeleteRecord,
    UploadObject,
    DeleteObject,
}

impl Op {
    fn error(self, msg: String) -> AppError {
        match self {
            Op::ListRecords | Op::InsertRecord | Op::UpdateRecord | Op::DeleteRecord => {
                AppError::Persistence(msg)
            }
            Op::UploadObject | Op::DeleteObject => AppError::Storage(msg),
            _ => AppError::Auth(msg),
        }
    }
}

struct MemUser {
    id: Uuid,
    email: String,
    password: Option<String>,
}

#[derive(Default)]
struct Inner {
    users: Vec<MemUser>,
    sessions: HashMap<String, Session>,
    refresh_tokens: HashMap<String, Uuid>,
    oauth_codes: HashMap<String, String>,
    tables: HashMap<Table, Vec<Fields>>,
    objects: BTreeMap<(String, String), Bytes>,
    calls: HashMap<Op, usize>,
    failures: HashMap<Op, String>,
}

pub struct MemoryBackend {
    inner: Mutex<Inner>,
    events: broadcast::Sender<AuthEvent>,
    public_base: String,
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBackend {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(64);
        Self {
            inner: Mutex::new(Inner::default()),
            events,
            public_base: "https://storage.local".into(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Count the call, then fail it if a failure is armed for `op`.
    fn enter(&self, op: Op) -> Result<MutexGuard<'_, Inner>, AppError> {
        let mut inner = self.lock();
        *inner.calls.entry(op).or_default() += 1;
        if let Some(msg) = inner.failures.get(&op).cloned() {
            return Err(op.error(msg));
        }
        Ok(inner)
    }

    /// Make every subsequent `op` fail with `message`.
    pub fn fail(&self, op: Op, message: &str) {
        self.lock().failures.insert(op, message.to_string());
    }

    pub fn heal(&self, op: Op) {
        self.lock().failures.remove(&op);
    }

    pub fn calls(&self, op: Op) -> usize {
        self.lock().calls.get(&op).copied().unwrap_or(0)
    }

    pub fn total_calls(&self) -> usize {
        self.lock().calls.values().sum()
    }

    pub fn storage_calls(&self) -> usize {
        self.calls(Op::UploadObject) + self.calls(Op::DeleteObject)
    }

    pub fn reset_calls(&self) {
        self.lock().calls.clear();
    }

    pub fn has_object(&self, bucket: &str, path: &str) -> bool {
        self.lock()
            .objects
            .contains_key(&(bucket.to_string(), path.to_string()))
    }

    pub fn object_paths(&self, bucket: &str) -> Vec<String> {
        self.lock()
            .objects
            .keys()
            .filter(|(b, _)| b == bucket)
            .map(|(_, p)| p.clone())
            .collect()
    }

    pub fn records(&self, table: Table) -> Vec<Record> {
        self.lock()
            .tables
            .get(&table)
            .map(|rows| rows.iter().cloned().map(Value::Object).collect())
            .unwrap_or_default()
    }

    pub fn seed_object(&self, bucket: &str, path: &str, bytes: &'static [u8]) {
        self.lock()
            .objects
            .insert((bucket.to_string(), path.to_string()), Bytes::from_static(bytes));
    }

    /// Insert a row directly, bypassing counters.
    pub fn seed_record(&self, table: Table, fields: Value) -> Record {
        let fields = match fields {
            Value::Object(map) => map,
            _ => Fields::new(),
        };
        let mut inner = self.lock();
        insert_row(&mut inner, table, fields)
    }

    pub fn seed_oauth_code(&self, code: &str, email: &str) {
        self.lock()
            .oauth_codes
            .insert(code.to_string(), email.to_string());
    }

    /// Register a user with an empty profile and return a live session for it.
    pub fn seed_user(&self, email: &str, password: &str) -> Session {
        let mut inner = self.lock();
        let id = Uuid::new_v4();
        inner.users.push(MemUser {
            id,
            email: email.to_string(),
            password: Some(password.to_string()),
        });
        insert_row(
            &mut inner,
            Table::Profiles,
            profile_row(id, "", "male", None, None),
        );
        open_session(&mut inner, id, email)
    }

    fn find_user(inner: &Inner, email: &str) -> Option<(Uuid, Option<String>)> {
        inner
            .users
            .iter()
            .find(|u| u.email == email)
            .map(|u| (u.id, u.password.clone()))
    }
}

fn now_rfc3339() -> String {
    OffsetDateTime::now_utc()
        .format(&Rfc3339)
        .unwrap_or_default()
}

fn profile_row(
    id: Uuid,
    full_name: &str,
    gender: &str,
    avatar_path: Option<&str>,
    avatar_url: Option<&str>,
) -> Fields {
    match json!({
        "id": id,
        "full_name": full_name,
        "gender": gender,
        "avatar_path": avatar_path,
        "avatar_url": avatar_url,
        "updated_at": now_rfc3339(),
    }) {
        Value::Object(map) => map,
        _ => Fields::new(),
    }
}

fn insert_row(inner: &mut Inner, table: Table, mut fields: Fields) -> Record {
    fields
        .entry("id")
        .or_insert_with(|| json!(Uuid::new_v4()));
    if table == Table::FoodEntries {
        fields
            .entry("created_at")
            .or_insert_with(|| json!(now_rfc3339()));
        for col in ["image_path", "image_url"] {
            fields.entry(col).or_insert(Value::Null);
        }
    }
    inner.tables.entry(table).or_default().push(fields.clone());
    Value::Object(fields)
}

fn open_session(inner: &mut Inner, user_id: Uuid, email: &str) -> Session {
    let session = Session {
        access_token: Uuid::new_v4().to_string(),
        refresh_token: Some(Uuid::new_v4().to_string()),
        user_id,
        email: email.to_string(),
        expires_at: OffsetDateTime::now_utc().unix_timestamp() + 3600,
    };
    inner
        .sessions
        .insert(session.access_token.clone(), session.clone());
    if let Some(refresh) = &session.refresh_token {
        inner.refresh_tokens.insert(refresh.clone(), user_id);
    }
    session
}

fn id_matches(row: &Fields, col: &str, id: Uuid) -> bool {
    row.get(col).and_then(Value::as_str) == Some(id.to_string().as_str())
}

fn cmp_column(a: &Fields, b: &Fields, col: &str) -> Ordering {
    let key = |row: &Fields| row.get(col).map(|v| v.to_string()).unwrap_or_default();
    key(a).cmp(&key(b))
}

#[async_trait]
impl AuthApi for MemoryBackend {
    async fn get_session(&self, access_token: &str) -> Result<Option<Session>, AppError> {
        let inner = self.enter(Op::GetSession)?;
        Ok(inner.sessions.get(access_token).cloned())
    }

    async fn get_current_user(&self, session: &Session) -> Result<CurrentUser, AppError> {
        let inner = self.enter(Op::GetCurrentUser)?;
        if !inner.sessions.contains_key(&session.access_token) {
            return Err(AppError::auth("Auth session missing!"));
        }
        inner
            .users
            .iter()
            .find(|u| u.id == session.user_id)
            .map(|u| CurrentUser {
                id: u.id,
                email: u.email.clone(),
            })
            .ok_or_else(|| AppError::auth("User not found"))
    }

    async fn sign_in(&self, email: &str, password: &str) -> Result<Session, AppError> {
        let session = {
            let mut inner = self.enter(Op::SignIn)?;
            match Self::find_user(&inner, email) {
                Some((id, Some(pw))) if pw == password => open_session(&mut inner, id, email),
                _ => return Err(AppError::auth("Invalid login credentials")),
            }
        };
        let _ = self.events.send(AuthEvent::SignedIn(session.clone()));
        Ok(session)
    }

    async fn sign_up(&self, req: SignUpRequest) -> Result<CurrentUser, AppError> {
        let mut inner = self.enter(Op::SignUp)?;
        if Self::find_user(&inner, &req.email).is_some() {
            return Err(AppError::auth("User already registered"));
        }
        let id = Uuid::new_v4();
        inner.users.push(MemUser {
            id,
            email: req.email.clone(),
            password: Some(req.password),
        });
        let avatar = req.profile.avatar.as_ref();
        let row = profile_row(
            id,
            &req.profile.full_name,
            &req.profile.gender,
            avatar.map(|a| a.path.as_str()),
            avatar.map(|a| a.public_url.as_str()),
        );
        insert_row(&mut inner, Table::Profiles, row);
        Ok(CurrentUser {
            id,
            email: req.email,
        })
    }

    async fn sign_out(&self, session: &Session) -> Result<(), AppError> {
        {
            let mut inner = self.enter(Op::SignOut)?;
            let user_id = session.user_id;
            inner.sessions.retain(|_, s| s.user_id != user_id);
            inner.refresh_tokens.retain(|_, owner| *owner != user_id);
        }
        let _ = self.events.send(AuthEvent::SignedOut {
            user_id: session.user_id,
        });
        Ok(())
    }

    async fn refresh_session(&self, refresh_token: &str) -> Result<Session, AppError> {
        let session = {
            let mut inner = self.enter(Op::RefreshSession)?;
            let user_id = inner
                .refresh_tokens
                .remove(refresh_token)
                .ok_or_else(|| AppError::auth("Invalid Refresh Token"))?;
            let email = inner
                .users
                .iter()
                .find(|u| u.id == user_id)
                .map(|u| u.email.clone())
                .ok_or_else(|| AppError::auth("User not found"))?;
            open_session(&mut inner, user_id, &email)
        };
        let _ = self.events.send(AuthEvent::TokenRefreshed(session.clone()));
        Ok(session)
    }

    fn sign_in_with_oauth(&self, provider: &str) -> Result<String, AppError> {
        let _inner = self.enter(Op::SignInWithOAuth)?;
        match provider {
            "google" => Ok(format!(
                "https://oauth.local/{}/authorize?state={}",
                provider, provider
            )),
            other => Err(AppError::auth(format!("Unsupported provider: {}", other))),
        }
    }

    async fn exchange_code_for_session(
        &self,
        _provider: &str,
        code: &str,
    ) -> Result<Session, AppError> {
        let session = {
            let mut inner = self.enter(Op::ExchangeCode)?;
            let email = inner
                .oauth_codes
                .remove(code)
                .ok_or_else(|| AppError::auth("invalid code"))?;
            let id = match Self::find_user(&inner, &email) {
                Some((id, _)) => id,
                None => {
                    let id = Uuid::new_v4();
                    inner.users.push(MemUser {
                        id,
                        email: email.clone(),
                        password: None,
                    });
                    insert_row(
                        &mut inner,
                        Table::Profiles,
                        profile_row(id, "", "other", None, None),
                    );
                    id
                }
            };
            open_session(&mut inner, id, &email)
        };
        let _ = self.events.send(AuthEvent::SignedIn(session.clone()));
        Ok(session)
    }

    fn subscribe_auth(&self) -> AuthSubscription {
        AuthSubscription::new(self.events.subscribe())
    }
}

#[async_trait]
impl RecordApi for MemoryBackend {
    async fn list_records(
        &self,
        table: Table,
        owner: Uuid,
        order: OrderBy,
    ) -> Result<Vec<Record>, AppError> {
        let inner = self.enter(Op::ListRecords)?;
        let order = order.check(table)?;
        let mut rows: Vec<Fields> = inner
            .tables
            .get(&table)
            .map(|rows| {
                rows.iter()
                    .filter(|r| id_matches(r, table.owner_column(), owner))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        rows.sort_by(|a, b| {
            let ord = cmp_column(a, b, order.column);
            if order.ascending {
                ord
            } else {
                ord.reverse()
            }
        });
        Ok(rows.into_iter().map(Value::Object).collect())
    }

    async fn insert_record(&self, table: Table, fields: Fields) -> Result<Record, AppError> {
        let mut inner = self.enter(Op::InsertRecord)?;
        table.check_fields(&fields)?;
        Ok(insert_row(&mut inner, table, fields))
    }

    async fn update_record(
        &self,
        table: Table,
        owner: Uuid,
        id: Uuid,
        fields: Fields,
    ) -> Result<(), AppError> {
        let mut inner = self.enter(Op::UpdateRecord)?;
        table.check_fields(&fields)?;
        let row = inner
            .tables
            .get_mut(&table)
            .and_then(|rows| {
                rows.iter_mut()
                    .find(|r| id_matches(r, "id", id) && id_matches(r, table.owner_column(), owner))
            })
            .ok_or_else(|| AppError::Persistence("record not found".into()))?;
        row.extend(fields);
        Ok(())
    }

    async fn delete_record(&self, table: Table, owner: Uuid, id: Uuid) -> Result<(), AppError> {
        let mut inner = self.enter(Op::DeleteRecord)?;
        let rows = inner.tables.entry(table).or_default();
        let before = rows.len();
        rows.retain(|r| !(id_matches(r, "id", id) && id_matches(r, table.owner_column(), owner)));
        if rows.len() == before {
            return Err(AppError::Persistence("record not found".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl ObjectStore for MemoryBackend {
    async fn upload_object(
        &self,
        bucket: &str,
        path: &str,
        bytes: Bytes,
        _content_type: &str,
    ) -> Result<(), AppError> {
        let mut inner = self.enter(Op::UploadObject)?;
        let key = (bucket.to_string(), path.to_string());
        if inner.objects.contains_key(&key) {
            return Err(AppError::Storage("The resource already exists".into()));
        }
        inner.objects.insert(key, bytes);
        Ok(())
    }

    fn get_public_ref(&self, bucket: &str, path: &str) -> String {
        public_url(&self.public_base, bucket, path)
    }

    async fn delete_object(&self, bucket: &str, path: &str) -> Result<(), AppError> {
        let mut inner = self.enter(Op::DeleteObject)?;
        inner
            .objects
            .remove(&(bucket.to_string(), path.to_string()));
        Ok(())
    }
}
