use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};
use serde_json::json;
use time::{format_description::well_known::Rfc3339, OffsetDateTime};
use uuid::Uuid;

use crate::{backend::Fields, error::AppError, forms::FormData, images::StoredImage};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Gender {
    #[default]
    Male,
    Female,
    Other,
}

impl Gender {
    pub fn as_str(self) -> &'static str {
        match self {
            Gender::Male => "male",
            Gender::Female => "female",
            Gender::Other => "other",
        }
    }
}

impl fmt::Display for Gender {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Gender {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "male" => Ok(Gender::Male),
            "female" => Ok(Gender::Female),
            "other" => Ok(Gender::Other),
            other => Err(AppError::validation(format!("Unknown gender: {}", other))),
        }
    }
}

/// One row of `profiles`, keyed by the owning user's id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Profile {
    pub id: Uuid,
    #[serde(default)]
    pub full_name: String,
    #[serde(default)]
    pub gender: Gender,
    pub avatar_path: Option<String>,
    pub avatar_url: Option<String>,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub updated_at: Option<OffsetDateTime>,
}

impl Profile {
    pub fn avatar(&self) -> Option<StoredImage> {
        match (&self.avatar_path, &self.avatar_url) {
            (Some(path), Some(url)) => Some(StoredImage {
                path: path.clone(),
                public_url: url.clone(),
            }),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfileDraft {
    pub full_name: String,
    pub gender: String,
}

impl ProfileDraft {
    pub fn from_form(form: &FormData) -> Self {
        let gender = form.text("gender");
        Self {
            full_name: form.text("full_name").to_string(),
            gender: if gender.trim().is_empty() {
                Gender::default().to_string()
            } else {
                gender.to_string()
            },
        }
    }

    pub fn check(&self) -> Result<(String, Gender), AppError> {
        let full_name = self.full_name.trim();
        if full_name.is_empty() {
            return Err(AppError::validation("Full name is required"));
        }
        Ok((full_name.to_string(), self.gender.parse()?))
    }

    pub fn fields(&self, avatar: Option<&StoredImage>, now: OffsetDateTime) -> Result<Fields, AppError> {
        let (full_name, gender) = self.check()?;
        let updated_at = now
            .format(&Rfc3339)
            .map_err(|e| AppError::persistence(format!("bad timestamp: {}", e)))?;
        let mut f = Fields::new();
        f.insert("full_name".into(), json!(full_name));
        f.insert("gender".into(), json!(gender));
        f.insert("avatar_path".into(), json!(avatar.map(|a| &a.path)));
        f.insert("avatar_url".into(), json!(avatar.map(|a| &a.public_url)));
        f.insert("updated_at".into(), json!(updated_at));
        Ok(f)
    }
}
