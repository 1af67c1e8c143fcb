use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::credentials::{is_valid_email, normalize_email, MIN_PASSWORD_LEN};
use crate::{
    backend::{CurrentUser, Session},
    error::{AppError, Feedback},
    forms::FormData,
    profiles::model::Gender,
};

/// Registration form values; the password is never echoed back.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RegisterForm {
    pub full_name: String,
    pub email: String,
    #[serde(skip_serializing)]
    pub password: String,
    pub gender: String,
}

impl RegisterForm {
    pub fn from_form(form: &FormData) -> Self {
        let gender = form.text("gender").trim().to_ascii_lowercase();
        Self {
            full_name: form.text("full_name").to_string(),
            email: normalize_email(form.text("email")),
            password: form.text("password").to_string(),
            gender: if gender.is_empty() { "male".to_string() } else { gender },
        }
    }

    pub fn check(&self) -> Result<(), AppError> {
        if self.full_name.trim().is_empty() {
            return Err(AppError::validation("Full name is required"));
        }
        if !is_valid_email(&self.email) {
            return Err(AppError::validation("Invalid email"));
        }
        if self.password.chars().count() < MIN_PASSWORD_LEN {
            return Err(AppError::validation(format!(
                "Password should be at least {} characters",
                MIN_PASSWORD_LEN
            )));
        }
        self.gender.parse::<Gender>()?;
        Ok(())
    }
}

/// Request body for login.
#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

/// Request body for token refresh. Falls back to the refresh cookie.
#[derive(Debug, Default, Deserialize)]
pub struct RefreshRequest {
    pub refresh_token: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CallbackQuery {
    pub code: Option<String>,
    /// Provider name, round-tripped through the OAuth `state` parameter.
    #[serde(rename = "state")]
    pub provider: Option<String>,
    pub next: Option<String>,
}

/// Public part of the user returned to the client.
#[derive(Debug, Serialize)]
pub struct PublicUser {
    pub id: Uuid,
    pub email: String,
}

impl From<CurrentUser> for PublicUser {
    fn from(u: CurrentUser) -> Self {
        Self {
            id: u.id,
            email: u.email,
        }
    }
}

/// Response returned after login or refresh.
#[derive(Debug, Serialize)]
pub struct AuthResponse {
    #[serde(flatten)]
    pub feedback: Feedback,
    pub access_token: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    pub expires_at: i64,
    pub user: PublicUser,
}

impl AuthResponse {
    pub fn new(feedback: Feedback, session: Session) -> Self {
        Self {
            feedback,
            access_token: session.access_token,
            refresh_token: session.refresh_token,
            expires_at: session.expires_at,
            user: PublicUser {
                id: session.user_id,
                email: session.email,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn form(full_name: &str, email: &str, password: &str) -> RegisterForm {
        RegisterForm::from_form(&FormData::with(&[
            ("full_name", full_name),
            ("email", email),
            ("password", password),
        ]))
    }

    #[test]
    fn register_form_normalises_and_checks() {
        let f = form("Malee", "  Malee@Example.COM ", "longenough");
        assert_eq!(f.email, "malee@example.com");
        assert_eq!(f.gender, "male");
        assert!(f.check().is_ok());

        assert!(form("", "a@b.co", "longenough").check().is_err());
        assert!(form("Malee", "not-an-email", "longenough").check().is_err());
        assert!(form("Malee", "a@b.co", "short").check().is_err());
    }

    #[test]
    fn register_gender_must_be_known() {
        let with_gender = |g: &str| {
            RegisterForm::from_form(&FormData::with(&[
                ("full_name", "Malee"),
                ("email", "a@b.co"),
                ("password", "longenough"),
                ("gender", g),
            ]))
        };
        let f = with_gender(" Female ");
        assert_eq!(f.gender, "female");
        assert!(f.check().is_ok());

        let err = with_gender("alien").check().unwrap_err();
        assert!(matches!(err, AppError::Validation(ref m) if m == "Unknown gender: alien"));
    }

    #[test]
    fn password_is_not_echoed() {
        let json = serde_json::to_value(form("Malee", "a@b.co", "secret-pass")).unwrap();
        assert!(json.get("password").is_none());
        assert_eq!(json["email"], "a@b.co");
    }
}
