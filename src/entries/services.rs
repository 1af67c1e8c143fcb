use async_trait::async_trait;
use serde_json::json;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use super::model::{EntryDraft, FoodEntry};
use crate::{
    backend::{decode, Backend, OrderBy, Table},
    editor::{EditTarget, EditorKind},
    error::AppError,
    images::{self, StoredImage},
    listing::ListState,
};

pub const FETCH_FAILED: &str = "Could not fetch food data.";

/// The caller's entries, newest meal first.
#[instrument(skip(backend))]
pub async fn load_entries(backend: &dyn Backend, owner: Uuid) -> Result<Vec<FoodEntry>, AppError> {
    let rows = backend
        .list_records(Table::FoodEntries, owner, OrderBy::desc("eaten_at"))
        .await
        .map_err(|e| {
            error!(error = %e, %owner, "listing food entries failed");
            AppError::Persistence(FETCH_FAILED.into())
        })?;
    rows.into_iter().map(decode).collect()
}

/// Creates a new entry owned by `owner`.
pub struct NewEntry {
    pub owner: Uuid,
    pub bucket: String,
}

/// Replaces the fields of an existing entry.
pub struct ExistingEntry {
    pub entry: FoodEntry,
    pub current: Option<StoredImage>,
    pub bucket: String,
}

impl ExistingEntry {
    pub fn new(entry: FoodEntry, bucket: String) -> Self {
        let current = entry.image();
        Self {
            entry,
            current,
            bucket,
        }
    }
}

#[async_trait]
impl EditTarget for NewEntry {
    type Draft = EntryDraft;

    fn kind(&self) -> EditorKind {
        EditorKind::Entry
    }

    fn validate(&self, draft: &EntryDraft) -> Result<(), AppError> {
        draft.check().map(|_| ())
    }

    fn bucket(&self) -> &str {
        &self.bucket
    }

    fn upload_prefix(&self) -> String {
        self.owner.to_string()
    }

    fn current_image(&self) -> Option<&StoredImage> {
        None
    }

    async fn persist(
        &self,
        backend: &dyn Backend,
        draft: &EntryDraft,
        image: Option<&StoredImage>,
    ) -> Result<(), AppError> {
        let mut fields = draft.check()?.fields(image);
        fields.insert("user_id".into(), json!(self.owner));
        let row = backend.insert_record(Table::FoodEntries, fields).await?;
        info!(id = %row["id"], owner = %self.owner, "food entry created");
        Ok(())
    }

    fn success_message(&self) -> &'static str {
        "Food entry saved!"
    }

    fn persist_failure(&self) -> &'static str {
        "Failed to save entry"
    }
}

#[async_trait]
impl EditTarget for ExistingEntry {
    type Draft = EntryDraft;

    fn kind(&self) -> EditorKind {
        EditorKind::Entry
    }

    fn validate(&self, draft: &EntryDraft) -> Result<(), AppError> {
        draft.check().map(|_| ())
    }

    fn bucket(&self) -> &str {
        &self.bucket
    }

    fn upload_prefix(&self) -> String {
        self.entry.user_id.to_string()
    }

    fn current_image(&self) -> Option<&StoredImage> {
        self.current.as_ref()
    }

    async fn persist(
        &self,
        backend: &dyn Backend,
        draft: &EntryDraft,
        image: Option<&StoredImage>,
    ) -> Result<(), AppError> {
        let fields = draft.check()?.fields(image);
        backend
            .update_record(Table::FoodEntries, self.entry.user_id, self.entry.id, fields)
            .await
    }

    fn success_message(&self) -> &'static str {
        "Food entry updated!"
    }

    fn persist_failure(&self) -> &'static str {
        "Failed to update entry"
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Deleted {
    pub message: String,
    pub warning: Option<String>,
}

/// Delete one entry from the backend, then its image, then the local copy.
///
/// Nothing is touched unless `confirmed`. If the record delete fails the
/// list is left as it was and the image is kept.
#[instrument(skip(backend, list, bucket), fields(owner = %owner, id = %id))]
pub async fn delete_entry(
    backend: &dyn Backend,
    list: &mut ListState<FoodEntry>,
    owner: Uuid,
    id: Uuid,
    confirmed: bool,
    bucket: &str,
) -> Result<Deleted, AppError> {
    if !confirmed {
        return Err(AppError::validation(
            "Please confirm that you want to delete this entry.",
        ));
    }
    let image = list
        .find(|e| e.id == id)
        .ok_or_else(|| AppError::NotFound("Entry not found".into()))?
        .image();

    backend
        .delete_record(Table::FoodEntries, owner, id)
        .await
        .map_err(|e| {
            error!(error = %e, "deleting food entry failed");
            AppError::Persistence(format!("Failed to delete entry: {}", e))
        })?;

    let mut message = String::from("Entry deleted successfully!");
    let mut warning = None;
    if let Some(img) = image {
        if let Some(msg) = images::remove_best_effort(backend, bucket, &img).await {
            warn!(path = %img.path, "entry deleted but its image was kept");
            message.push_str(&format!(" (Warning: Could not delete image: {})", msg));
            warning = Some(msg);
        }
    }

    list.remove_where(|e| e.id == id);
    Ok(Deleted { message, warning })
}
