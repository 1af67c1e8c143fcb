use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

/// Failure taxonomy shared by every workflow.
///
/// Validation errors are produced locally before any backend call. The other
/// variants wrap a backend failure and carry its human-readable message.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AppError {
    #[error("{0}")]
    Validation(String),
    #[error("{0}")]
    Auth(String),
    #[error("{0}")]
    Storage(String),
    #[error("{0}")]
    Persistence(String),
    #[error("{0}")]
    NotFound(String),
    #[error("a submission is already in progress")]
    Busy,
}

impl AppError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn auth(e: impl std::fmt::Display) -> Self {
        Self::Auth(e.to_string())
    }

    pub fn storage(e: impl std::fmt::Display) -> Self {
        Self::Storage(e.to_string())
    }

    pub fn persistence(e: impl std::fmt::Display) -> Self {
        Self::Persistence(e.to_string())
    }

    /// The one message shown to the user for this failure.
    pub fn feedback_message(&self) -> String {
        self.to_string()
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation",
            Self::Auth(_) => "auth",
            Self::Storage(_) => "storage",
            Self::Persistence(_) => "persistence",
            Self::NotFound(_) => "not_found",
            Self::Busy => "busy",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            Self::Validation(_) => StatusCode::BAD_REQUEST,
            Self::Auth(_) => StatusCode::UNAUTHORIZED,
            Self::Storage(_) => StatusCode::BAD_GATEWAY,
            Self::Persistence(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Busy => StatusCode::CONFLICT,
        }
    }
}

/// Single user-facing message for a settled operation, plus an optional
/// navigation the client performs after showing it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Feedback {
    #[serde(rename = "type")]
    pub kind: FeedbackKind,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub navigate: Option<Navigation>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FeedbackKind {
    Success,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Navigation {
    pub to: String,
    pub after_ms: u64,
    /// The target view must fetch its data again; nothing else tells it that
    /// the data changed.
    pub refetch: bool,
}

impl Feedback {
    pub fn success(message: impl Into<String>) -> Self {
        Self {
            kind: FeedbackKind::Success,
            message: message.into(),
            navigate: None,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            kind: FeedbackKind::Error,
            message: message.into(),
            navigate: None,
        }
    }

    pub fn then_navigate(mut self, to: impl Into<String>, after_ms: u64, refetch: bool) -> Self {
        self.navigate = Some(Navigation {
            to: to.into(),
            after_ms,
            refetch,
        });
        self
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        (self.status(), Json(Feedback::error(self.feedback_message()))).into_response()
    }
}
