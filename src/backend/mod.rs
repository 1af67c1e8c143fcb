//! Capability surface of the data/auth/storage platform.
//!
//! Workflows only ever talk to an `Arc<dyn Backend>` handed to them through
//! `AppState`; `platform` is the Postgres + S3 implementation and `memory`
//! keeps everything in-process.

use async_trait::async_trait;
use bytes::Bytes;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::{error::AppError, images::StoredImage};

pub mod memory;
pub mod platform;
mod records;

/// A single row as the platform hands it out: a JSON object keyed by column.
pub type Record = Value;
/// Column/value pairs for inserts and updates.
pub type Fields = Map<String, Value>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Table {
    FoodEntries,
    Profiles,
}

impl Table {
    pub fn name(self) -> &'static str {
        match self {
            Table::FoodEntries => "food_entries",
            Table::Profiles => "profiles",
        }
    }

    /// Column holding the owning user's id.
    pub fn owner_column(self) -> &'static str {
        match self {
            Table::FoodEntries => "user_id",
            Table::Profiles => "id",
        }
    }

    /// Columns a caller may write.
    pub fn writable_columns(self) -> &'static [&'static str] {
        match self {
            Table::FoodEntries => &[
                "user_id",
                "name",
                "meal_type",
                "eaten_at",
                "image_path",
                "image_url",
            ],
            Table::Profiles => &[
                "id",
                "full_name",
                "gender",
                "avatar_path",
                "avatar_url",
                "updated_at",
            ],
        }
    }

    pub fn sortable_columns(self) -> &'static [&'static str] {
        match self {
            Table::FoodEntries => &["eaten_at", "created_at", "name"],
            Table::Profiles => &["updated_at", "full_name"],
        }
    }

    pub(crate) fn check_fields(self, fields: &Fields) -> Result<(), AppError> {
        match fields
            .keys()
            .find(|k| !self.writable_columns().contains(&k.as_str()))
        {
            Some(bad) => Err(AppError::Persistence(format!(
                "column \"{}\" of relation \"{}\" is not writable",
                bad,
                self.name()
            ))),
            None if fields.is_empty() => Err(AppError::Persistence(format!(
                "no columns given for \"{}\"",
                self.name()
            ))),
            None => Ok(()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OrderBy {
    pub column: &'static str,
    pub ascending: bool,
}

impl OrderBy {
    pub fn desc(column: &'static str) -> Self {
        Self {
            column,
            ascending: false,
        }
    }

    pub fn asc(column: &'static str) -> Self {
        Self {
            column,
            ascending: true,
        }
    }

    pub(crate) fn check(self, table: Table) -> Result<Self, AppError> {
        if table.sortable_columns().contains(&self.column) {
            Ok(self)
        } else {
            Err(AppError::Persistence(format!(
                "cannot order \"{}\" by \"{}\"",
                table.name(),
                self.column
            )))
        }
    }
}

/// Deserialize a platform row into a typed model.
pub fn decode<T: DeserializeOwned>(record: Record) -> Result<T, AppError> {
    serde_json::from_value(record).map_err(|e| AppError::Persistence(format!("malformed record: {}", e)))
}

/// Proof of authentication issued by the platform.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub access_token: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    pub user_id: Uuid,
    pub email: String,
    /// Unix timestamp (seconds) at which the access token stops being valid.
    pub expires_at: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CurrentUser {
    pub id: Uuid,
    pub email: String,
}

/// Profile data attached to a new account.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProfileSeed {
    pub full_name: String,
    pub gender: String,
    pub avatar: Option<StoredImage>,
}

#[derive(Debug, Clone)]
pub struct SignUpRequest {
    pub email: String,
    pub password: String,
    pub profile: ProfileSeed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthEvent {
    SignedIn(Session),
    TokenRefreshed(Session),
    SignedOut { user_id: Uuid },
}

/// Receiving end of the auth event stream.
///
/// Unsubscribes when dropped, so a view that holds one for its own lifetime
/// can never leak the listener.
pub struct AuthSubscription {
    rx: broadcast::Receiver<AuthEvent>,
}

impl AuthSubscription {
    pub(crate) fn new(rx: broadcast::Receiver<AuthEvent>) -> Self {
        Self { rx }
    }

    /// Next event, skipping over any this subscriber lagged behind on.
    /// Returns `None` once the platform side is gone.
    pub async fn next(&mut self) -> Option<AuthEvent> {
        loop {
            match self.rx.recv().await {
                Ok(ev) => return Some(ev),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "auth subscriber lagged");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Wait for the sign-in of a particular identity.
    pub async fn signed_in(&mut self, email: &str) -> Option<Session> {
        while let Some(ev) = self.next().await {
            if let AuthEvent::SignedIn(session) = ev {
                if session.email == email {
                    return Some(session);
                }
            }
        }
        None
    }
}

#[async_trait]
pub trait AuthApi: Send + Sync {
    /// Resolve an access token to a live session. Invalid or expired tokens
    /// yield `Ok(None)`.
    async fn get_session(&self, access_token: &str) -> Result<Option<Session>, AppError>;
    async fn get_current_user(&self, session: &Session) -> Result<CurrentUser, AppError>;
    async fn sign_in(&self, email: &str, password: &str) -> Result<Session, AppError>;
    async fn sign_up(&self, req: SignUpRequest) -> Result<CurrentUser, AppError>;
    async fn sign_out(&self, session: &Session) -> Result<(), AppError>;
    async fn refresh_session(&self, refresh_token: &str) -> Result<Session, AppError>;
    /// URL of the provider's consent page; the provider redirects back to
    /// `/auth/callback` with a one-time code.
    fn sign_in_with_oauth(&self, provider: &str) -> Result<String, AppError>;
    async fn exchange_code_for_session(&self, provider: &str, code: &str)
        -> Result<Session, AppError>;
    fn subscribe_auth(&self) -> AuthSubscription;
}

#[async_trait]
pub trait RecordApi: Send + Sync {
    async fn list_records(
        &self,
        table: Table,
        owner: Uuid,
        order: OrderBy,
    ) -> Result<Vec<Record>, AppError>;
    async fn insert_record(&self, table: Table, fields: Fields) -> Result<Record, AppError>;
    async fn update_record(
        &self,
        table: Table,
        owner: Uuid,
        id: Uuid,
        fields: Fields,
    ) -> Result<(), AppError>;
    async fn delete_record(&self, table: Table, owner: Uuid, id: Uuid) -> Result<(), AppError>;
}

#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn upload_object(
        &self,
        bucket: &str,
        path: &str,
        bytes: Bytes,
        content_type: &str,
    ) -> Result<(), AppError>;
    fn get_public_ref(&self, bucket: &str, path: &str) -> String;
    async fn delete_object(&self, bucket: &str, path: &str) -> Result<(), AppError>;
}

pub trait Backend: AuthApi + RecordApi + ObjectStore {}

impl<T: AuthApi + RecordApi + ObjectStore> Backend for T {}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn check_fields_rejects_unknown_and_empty() {
        let mut fields = Fields::new();
        assert!(Table::FoodEntries.check_fields(&fields).is_err());

        fields.insert("name".into(), json!("Pad Thai"));
        assert!(Table::FoodEntries.check_fields(&fields).is_ok());

        fields.insert("id; DROP TABLE users".into(), json!(1));
        let err = Table::FoodEntries.check_fields(&fields).unwrap_err();
        assert!(matches!(err, AppError::Persistence(_)));
    }

    #[test]
    fn order_by_must_be_sortable() {
        assert!(OrderBy::desc("eaten_at").check(Table::FoodEntries).is_ok());
        assert!(OrderBy::asc("password_hash").check(Table::FoodEntries).is_err());
    }

    #[tokio::test]
    async fn subscription_filters_by_identity() {
        let (tx, rx) = broadcast::channel(8);
        let mut sub = AuthSubscription::new(rx);
        let session = |email: &str| Session {
            access_token: "t".into(),
            refresh_token: None,
            user_id: Uuid::new_v4(),
            email: email.into(),
            expires_at: 0,
        };
        tx.send(AuthEvent::SignedOut { user_id: Uuid::new_v4() }).unwrap();
        tx.send(AuthEvent::SignedIn(session("other@example.com"))).unwrap();
        tx.send(AuthEvent::SignedIn(session("me@example.com"))).unwrap();
        drop(tx);

        let got = sub.signed_in("me@example.com").await.unwrap();
        assert_eq!(got.email, "me@example.com");
        assert!(sub.next().await.is_none());
    }
}
