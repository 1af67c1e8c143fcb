use async_trait::async_trait;
use time::OffsetDateTime;
use tracing::{error, instrument};
use uuid::Uuid;

use super::model::{Profile, ProfileDraft};
use crate::{
    backend::{decode, Backend, OrderBy, Table},
    editor::{EditTarget, EditorKind},
    error::AppError,
    images::StoredImage,
};

pub const FETCH_FAILED: &str = "Could not fetch profile data.";

#[instrument(skip(backend))]
pub async fn load_profile(backend: &dyn Backend, owner: Uuid) -> Result<Profile, AppError> {
    let row = backend
        .list_records(Table::Profiles, owner, OrderBy::desc("updated_at"))
        .await
        .map_err(|e| {
            error!(error = %e, %owner, "fetching profile failed");
            AppError::Persistence(FETCH_FAILED.into())
        })?
        .into_iter()
        .next()
        .ok_or_else(|| AppError::NotFound(FETCH_FAILED.into()))?;
    decode(row)
}

/// The caller's own profile row.
pub struct ProfileTarget {
    pub owner: Uuid,
    pub current: Option<StoredImage>,
    pub bucket: String,
}

impl ProfileTarget {
    pub fn new(profile: &Profile, bucket: String) -> Self {
        Self {
            owner: profile.id,
            current: profile.avatar(),
            bucket,
        }
    }
}

#[async_trait]
impl EditTarget for ProfileTarget {
    type Draft = ProfileDraft;

    fn kind(&self) -> EditorKind {
        EditorKind::Profile
    }

    fn validate(&self, draft: &ProfileDraft) -> Result<(), AppError> {
        draft.check().map(|_| ())
    }

    fn bucket(&self) -> &str {
        &self.bucket
    }

    fn upload_prefix(&self) -> String {
        format!("profiles/{}", self.owner)
    }

    fn current_image(&self) -> Option<&StoredImage> {
        self.current.as_ref()
    }

    async fn persist(
        &self,
        backend: &dyn Backend,
        draft: &ProfileDraft,
        image: Option<&StoredImage>,
    ) -> Result<(), AppError> {
        let fields = draft.fields(image, OffsetDateTime::now_utc())?;
        backend
            .update_record(Table::Profiles, self.owner, self.owner, fields)
            .await
    }

    fn success_message(&self) -> &'static str {
        "Profile updated successfully!"
    }

    fn persist_failure(&self) -> &'static str {
        "Failed to update profile"
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::{
        backend::memory::{MemoryBackend, Op},
        editor::{RecordEditor, Submission},
        images::ImageUpload,
    };
    use bytes::Bytes;

    fn avatar() -> Option<ImageUpload> {
        Some(ImageUpload {
            file_name: "me.png".into(),
            content_type: "image/png".into(),
            bytes: Bytes::from_static(b"png"),
        })
    }

    #[tokio::test]
    async fn first_avatar_upload_has_nothing_to_clean() {
        let mem = Arc::new(MemoryBackend::new());
        let owner = mem.seed_user("cook@example.com", "password123").user_id;
        let profile = load_profile(mem.as_ref(), owner).await.unwrap();
        assert!(profile.avatar().is_none());
        mem.reset_calls();

        let target = ProfileTarget::new(&profile, "avatars".into());
        let mut editor = RecordEditor::new(mem.clone());
        let saved = editor
            .submit(
                &target,
                Submission {
                    draft: ProfileDraft {
                        full_name: "Somchai".into(),
                        gender: "other".into(),
                    },
                    image: avatar(),
                },
            )
            .await
            .unwrap();

        assert_eq!(saved.message, "Profile updated successfully!");
        assert_eq!(mem.calls(Op::DeleteObject), 0);
        let after = load_profile(mem.as_ref(), owner).await.unwrap();
        assert_eq!(after.gender.as_str(), "other");
        let img = after.avatar().unwrap();
        assert!(img.path.starts_with(&format!("profiles/{}/", owner)));
    }

    #[tokio::test]
    async fn fetch_failure_has_fixed_message() {
        let mem = MemoryBackend::new();
        mem.fail(Op::ListRecords, "boom");
        let err = load_profile(&mem, Uuid::new_v4()).await.unwrap_err();
        assert_eq!(err.to_string(), FETCH_FAILED);

        mem.heal(Op::ListRecords);
        let err = load_profile(&mem, Uuid::new_v4()).await.unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }
}
