//! Stored images: naming, upload and best-effort removal.

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use tracing::{debug, warn};

use crate::{backend::ObjectStore, error::AppError};

/// An image in object storage. The storage path and the public URL are kept
/// side by side so deleting never has to reverse-engineer one from the other.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredImage {
    pub path: String,
    pub public_url: String,
}

/// A file picked in a form, not yet uploaded.
#[derive(Debug, Clone)]
pub struct ImageUpload {
    pub file_name: String,
    pub content_type: String,
    pub bytes: bytes::Bytes,
}

impl ImageUpload {
    pub fn validate(&self) -> Result<(), AppError> {
        if self.bytes.is_empty() {
            return Err(AppError::validation("Selected image is empty"));
        }
        if !self.content_type.starts_with("image/") {
            return Err(AppError::validation(format!(
                "Unsupported file type: {}",
                self.content_type
            )));
        }
        Ok(())
    }
}

pub(crate) fn ext_from_mime(ct: &str) -> Option<&'static str> {
    match ct {
        "image/jpeg" | "image/jpg" => Some("jpg"),
        "image/png" => Some("png"),
        "image/webp" => Some("webp"),
        "image/heic" => Some("heic"),
        "image/gif" => Some("gif"),
        _ => None,
    }
}

/// Keep the last path component and replace anything outside
/// `[A-Za-z0-9._-]`; add an extension from the content type if none is left.
fn storage_file_name(file_name: &str, content_type: &str) -> String {
    let base = file_name.rsplit(['/', '\\']).next().unwrap_or_default();
    let mut name: String = base
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect();
    let name_trimmed = name.trim_matches('.');
    if name_trimmed.is_empty() {
        name = "image".into();
    }
    if !name.contains('.') {
        if let Some(ext) = ext_from_mime(content_type) {
            name = format!("{}.{}", name, ext);
        }
    }
    name
}

/// `{prefix}/{unix millis}_{file name}`.
pub fn object_path(prefix: &str, upload: &ImageUpload, at: OffsetDateTime) -> String {
    let millis = at.unix_timestamp_nanos() / 1_000_000;
    format!(
        "{}/{}_{}",
        prefix.trim_end_matches('/'),
        millis,
        storage_file_name(&upload.file_name, &upload.content_type)
    )
}

pub async fn upload<S: ObjectStore + ?Sized>(
    store: &S,
    bucket: &str,
    prefix: &str,
    upload: ImageUpload,
) -> Result<StoredImage, AppError> {
    let path = object_path(prefix, &upload, OffsetDateTime::now_utc());
    store
        .upload_object(bucket, &path, upload.bytes, &upload.content_type)
        .await?;
    let public_url = store.get_public_ref(bucket, &path);
    debug!(%bucket, %path, "image uploaded");
    Ok(StoredImage { path, public_url })
}

/// Delete `image`, reporting failure as a warning instead of an error.
pub async fn remove_best_effort<S: ObjectStore + ?Sized>(
    store: &S,
    bucket: &str,
    image: &StoredImage,
) -> Option<String> {
    match store.delete_object(bucket, &image.path).await {
        Ok(()) => {
            debug!(%bucket, path = %image.path, "old image deleted");
            None
        }
        Err(e) => {
            warn!(error = %e, %bucket, path = %image.path, "could not delete image; left orphaned");
            Some(e.to_string())
        }
    }
}
