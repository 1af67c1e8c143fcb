use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};
use serde_json::json;
use time::{macros::format_description, Date, OffsetDateTime};
use uuid::Uuid;

use crate::{
    backend::Fields, error::AppError, forms::FormData, images::StoredImage, listing::Named,
};

time::serde::format_description!(iso_date, Date, "[year]-[month]-[day]");

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum MealType {
    #[default]
    Breakfast,
    Lunch,
    Dinner,
    Snack,
}

impl MealType {
    pub fn as_str(self) -> &'static str {
        match self {
            MealType::Breakfast => "Breakfast",
            MealType::Lunch => "Lunch",
            MealType::Dinner => "Dinner",
            MealType::Snack => "Snack",
        }
    }
}

impl fmt::Display for MealType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MealType {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "breakfast" => Ok(MealType::Breakfast),
            "lunch" => Ok(MealType::Lunch),
            "dinner" => Ok(MealType::Dinner),
            "snack" => Ok(MealType::Snack),
            other => Err(AppError::validation(format!("Unknown meal type: {}", other))),
        }
    }
}

/// A logged food record as stored in `food_entries`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FoodEntry {
    pub id: Uuid,
    pub user_id: Uuid,
    pub name: String,
    pub meal_type: MealType,
    #[serde(with = "iso_date")]
    pub eaten_at: Date,
    pub image_path: Option<String>,
    pub image_url: Option<String>,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub created_at: Option<OffsetDateTime>,
}

impl FoodEntry {
    pub fn image(&self) -> Option<StoredImage> {
        match (&self.image_path, &self.image_url) {
            (Some(path), Some(url)) => Some(StoredImage {
                path: path.clone(),
                public_url: url.clone(),
            }),
            _ => None,
        }
    }
}

impl Named for FoodEntry {
    fn display_name(&self) -> &str {
        &self.name
    }
}

/// Entry form values exactly as submitted.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryDraft {
    pub name: String,
    pub meal_type: String,
    pub eaten_at: String,
}

/// Checked form values.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidEntry {
    pub name: String,
    pub meal_type: MealType,
    pub eaten_at: Date,
}

impl EntryDraft {
    pub fn from_form(form: &FormData) -> Self {
        let meal_type = form.text("meal_type");
        Self {
            name: form.text("name").to_string(),
            meal_type: if meal_type.trim().is_empty() {
                MealType::default().to_string()
            } else {
                meal_type.to_string()
            },
            eaten_at: form.text("eaten_at").to_string(),
        }
    }

    pub fn check(&self) -> Result<ValidEntry, AppError> {
        let name = self.name.trim();
        if name.is_empty() {
            return Err(AppError::validation("Food name is required"));
        }
        let date = self.eaten_at.trim();
        if date.is_empty() {
            return Err(AppError::validation("Date is required"));
        }
        let eaten_at = Date::parse(date, format_description!("[year]-[month]-[day]"))
            .map_err(|_| AppError::validation(format!("Invalid date: {}", date)))?;
        Ok(ValidEntry {
            name: name.to_string(),
            meal_type: self.meal_type.parse()?,
            eaten_at,
        })
    }
}

impl ValidEntry {
    /// Mutable columns; a full replace on update.
    pub fn fields(&self, image: Option<&StoredImage>) -> Fields {
        let mut f = Fields::new();
        f.insert("name".into(), json!(self.name));
        f.insert("meal_type".into(), json!(self.meal_type));
        f.insert(
            "eaten_at".into(),
            json!(format!(
                "{:04}-{:02}-{:02}",
                self.eaten_at.year(),
                u8::from(self.eaten_at.month()),
                self.eaten_at.day()
            )),
        );
        f.insert("image_path".into(), json!(image.map(|i| &i.path)));
        f.insert("image_url".into(), json!(image.map(|i| &i.public_url)));
        f
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::date;

    #[test]
    fn meal_type_parses_any_case() {
        assert_eq!("lunch".parse::<MealType>().unwrap(), MealType::Lunch);
        assert_eq!("Dinner".parse::<MealType>().unwrap(), MealType::Dinner);
        assert!("brunch".parse::<MealType>().is_err());
        assert_eq!(serde_json::to_value(MealType::Snack).unwrap(), "Snack");
    }

    #[test]
    fn entry_decodes_from_platform_row() {
        let row = json!({
            "id": "0b8c7f5e-2f3a-4c7e-9a51-3f1d2c4b5a69",
            "user_id": "8d0f1f8e-7b1c-4a57-9d0e-5e2b1c3a4f60",
            "name": "Pad Thai",
            "meal_type": "Lunch",
            "eaten_at": "2025-01-10",
            "image_path": null,
            "image_url": null,
            "created_at": "2025-01-10T12:30:00.123456+00:00"
        });
        let entry: FoodEntry = serde_json::from_value(row).unwrap();
        assert_eq!(entry.eaten_at, date!(2025 - 01 - 10));
        assert_eq!(entry.meal_type, MealType::Lunch);
        assert!(entry.image().is_none());
        assert!(entry.created_at.is_some());
    }

    #[test]
    fn draft_checks_required_fields() {
        let draft = EntryDraft::from_form(&FormData::with(&[("name", "Pad Thai"), ("eaten_at", "2025-01-10")]));
        assert_eq!(draft.meal_type, "Breakfast");
        let ok = draft.check().unwrap();
        assert_eq!(ok.eaten_at, date!(2025 - 01 - 10));

        let no_name = EntryDraft { name: "  ".into(), ..draft.clone() };
        assert!(matches!(no_name.check(), Err(AppError::Validation(_))));
        let no_date = EntryDraft { eaten_at: "".into(), ..draft.clone() };
        assert!(matches!(no_date.check(), Err(AppError::Validation(_))));
        let bad_date = EntryDraft { eaten_at: "10/01/2025".into(), ..draft };
        assert!(matches!(bad_date.check(), Err(AppError::Validation(_))));
    }

    #[test]
    fn fields_carry_both_image_columns() {
        let valid = ValidEntry {
            name: "Som Tum".into(),
            meal_type: MealType::Snack,
            eaten_at: date!(2025 - 03 - 04),
        };
        let img = StoredImage {
            path: "u/1_a.jpg".into(),
            public_url: "https://s/food_images/u/1_a.jpg".into(),
        };
        let f = valid.fields(Some(&img));
        assert_eq!(f["eaten_at"], "2025-03-04");
        assert_eq!(f["meal_type"], "Snack");
        assert_eq!(f["image_path"], "u/1_a.jpg");

        let f = valid.fields(None);
        assert!(f["image_url"].is_null());
    }
}
