use std::collections::HashMap;

use axum::extract::Multipart;

use crate::{error::AppError, images::ImageUpload};

/// Text fields and at most one picked image from a multipart form.
#[derive(Debug, Default)]
pub struct FormData {
    fields: HashMap<String, String>,
    pub image: Option<ImageUpload>,
}

impl FormData {
    /// Read every part. `file_field` names the part holding the image; an
    /// empty file input counts as "no image selected".
    pub async fn read(mut mp: Multipart, file_field: &str) -> Result<Self, AppError> {
        let mut form = FormData::default();
        while let Some(field) = mp
            .next_field()
            .await
            .map_err(|e| AppError::validation(format!("Malformed form: {}", e)))?
        {
            let Some(name) = field.name().map(str::to_string) else {
                continue;
            };
            if name == file_field {
                let file_name = field.file_name().unwrap_or_default().to_string();
                let content_type = field
                    .content_type()
                    .unwrap_or("application/octet-stream")
                    .to_string();
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|e| AppError::validation(format!("Malformed form: {}", e)))?;
                if !bytes.is_empty() {
                    form.image = Some(ImageUpload {
                        file_name,
                        content_type,
                        bytes,
                    });
                }
            } else {
                let value = field
                    .text()
                    .await
                    .map_err(|e| AppError::validation(format!("Malformed form: {}", e)))?;
                form.fields.insert(name, value);
            }
        }
        Ok(form)
    }

    pub fn text(&self, name: &str) -> &str {
        self.fields.get(name).map(String::as_str).unwrap_or_default()
    }

    #[cfg(test)]
    pub fn with(fields: &[(&str, &str)]) -> Self {
        Self {
            fields: fields
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            image: None,
        }
    }
}
