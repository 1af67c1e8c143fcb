//! Create/update workflow shared by food entries and profiles.
//!
//! ```text
//! Idle -> Validating -> [ImageUploading] -> Persisting -> [ImageCleanup] -> Settled
//! ```
//!
//! A validation failure goes back to `Idle` without touching the backend.
//! Upload and persist failures settle as `Failed` and hand the submission
//! back so the form can be shown again. A failed cleanup of the replaced
//! image only adds a warning to an otherwise successful result.

use std::sync::Arc;

use async_trait::async_trait;
use axum::{
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use tracing::{debug, error, info, instrument, warn};

use crate::{
    backend::Backend,
    error::{AppError, Feedback},
    images::{self, ImageUpload, StoredImage},
};

mod inflight;

pub use inflight::{InFlight, InFlightGuard};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EditorKind {
    Entry,
    Profile,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Validating,
    ImageUploading,
    Persisting,
    ImageCleanup,
    Settled(Settled),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Settled {
    Success,
    Failed,
}

impl Phase {
    /// Phases from which a new submit may start. A settled editor passes
    /// back through `Idle` first.
    pub fn accepts_submit(self) -> bool {
        matches!(self, Phase::Idle | Phase::Settled(_))
    }
}

/// What the user filled in, plus the image they picked, if any.
#[derive(Debug, Clone)]
pub struct Submission<D> {
    pub draft: D,
    pub image: Option<ImageUpload>,
}

/// Successful save.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Saved {
    /// Success message with any cleanup warning already appended.
    pub message: String,
    pub warning: Option<String>,
    /// The image the record now references.
    pub image: Option<StoredImage>,
}

/// Failed save; the submission is returned untouched.
#[derive(Debug, Clone)]
pub struct Failed<D> {
    pub error: AppError,
    pub submission: Submission<D>,
}

/// One kind of record the editor can write.
#[async_trait]
pub trait EditTarget: Send + Sync {
    type Draft: Send + Sync + 'static;

    fn kind(&self) -> EditorKind;
    /// Required-field checks. Must not call the backend.
    fn validate(&self, draft: &Self::Draft) -> Result<(), AppError>;
    fn bucket(&self) -> &str;
    /// Storage prefix new images are uploaded under, namespaced by owner.
    fn upload_prefix(&self) -> String;
    /// Image referenced by the record before this edit.
    fn current_image(&self) -> Option<&StoredImage>;
    async fn persist(
        &self,
        backend: &dyn Backend,
        draft: &Self::Draft,
        image: Option<&StoredImage>,
    ) -> Result<(), AppError>;
    fn success_message(&self) -> &'static str;
    /// Prefix for a persist failure message, e.g. "Failed to update profile".
    fn persist_failure(&self) -> &'static str;
}

pub struct RecordEditor {
    backend: Arc<dyn Backend>,
    phase: Phase,
}

impl RecordEditor {
    pub fn new(backend: Arc<dyn Backend>) -> Self {
        Self {
            backend,
            phase: Phase::Idle,
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    fn enter(&mut self, phase: Phase) {
        debug!(from = ?self.phase, to = ?phase, "editor transition");
        self.phase = phase;
    }

    fn settle_failed<D>(&mut self, error: AppError, submission: Submission<D>) -> Failed<D> {
        self.enter(Phase::Settled(Settled::Failed));
        Failed { error, submission }
    }

    #[instrument(skip_all, fields(kind = ?target.kind()))]
    pub async fn submit<T: EditTarget>(
        &mut self,
        target: &T,
        submission: Submission<T::Draft>,
    ) -> Result<Saved, Failed<T::Draft>> {
        if !self.phase.accepts_submit() {
            warn!(phase = ?self.phase, "submit rejected while busy");
            return Err(Failed {
                error: AppError::Busy,
                submission,
            });
        }
        self.enter(Phase::Idle);

        self.enter(Phase::Validating);
        let checked = target.validate(&submission.draft).and_then(|()| {
            submission
                .image
                .as_ref()
                .map(ImageUpload::validate)
                .transpose()
                .map(|_| ())
        });
        if let Err(error) = checked {
            self.enter(Phase::Idle);
            return Err(Failed { error, submission });
        }

        let backend = Arc::clone(&self.backend);
        let previous = target.current_image().cloned();

        let uploaded = match submission.image.clone() {
            Some(file) => {
                self.enter(Phase::ImageUploading);
                let prefix = target.upload_prefix();
                match images::upload(backend.as_ref(), target.bucket(), &prefix, file).await {
                    Ok(img) => Some(img),
                    Err(e) => {
                        let error = AppError::Storage(format!("Failed to upload image: {}", e));
                        return Err(self.settle_failed(error, submission));
                    }
                }
            }
            None => None,
        };

        self.enter(Phase::Persisting);
        let referenced = uploaded.clone().or_else(|| previous.clone());
        if let Err(e) = target
            .persist(backend.as_ref(), &submission.draft, referenced.as_ref())
            .await
        {
            if let Some(orphan) = &uploaded {
                warn!(bucket = %target.bucket(), path = %orphan.path, "record write failed; uploaded image orphaned");
            }
            let error = AppError::Persistence(format!("{}: {}", target.persist_failure(), e));
            return Err(self.settle_failed(error, submission));
        }

        let mut message = target.success_message().to_string();
        let mut warning = None;
        if let (Some(new), Some(old)) = (&uploaded, &previous) {
            if new.path != old.path {
                self.enter(Phase::ImageCleanup);
                if let Some(msg) =
                    images::remove_best_effort(backend.as_ref(), target.bucket(), old).await
                {
                    message.push_str(&format!(" (Warning: Could not delete old image: {})", msg));
                    warning = Some(msg);
                }
            }
        }

        self.enter(Phase::Settled(Settled::Success));
        info!(kind = ?target.kind(), replaced_image = uploaded.is_some(), "record saved");
        Ok(Saved {
            message,
            warning,
            image: referenced,
        })
    }
}

/// Run one submission on its own task so a dropped request cannot abort it
/// halfway. The in-flight slot is released when the task ends.
pub async fn run_detached<T>(
    backend: Arc<dyn Backend>,
    guard: InFlightGuard,
    target: T,
    submission: Submission<T::Draft>,
) -> Result<Saved, Failed<T::Draft>>
where
    T: EditTarget + 'static,
    T::Draft: Clone,
{
    let fallback = submission.clone();
    let task = tokio::spawn(async move {
        let _guard = guard;
        let mut editor = RecordEditor::new(backend);
        editor.submit(&target, submission).await
    });
    match task.await {
        Ok(result) => result,
        Err(e) => {
            error!(error = %e, "editor task aborted");
            Err(Failed {
                error: AppError::persistence("Unexpected error while saving"),
                submission: fallback,
            })
        }
    }
}

/// Error body for a failed save: the feedback plus the form values to
/// show again.
#[derive(Serialize)]
struct FailedBody<'a, D> {
    #[serde(flatten)]
    feedback: Feedback,
    form: &'a D,
}

impl<D: Serialize> IntoResponse for Failed<D> {
    fn into_response(self) -> Response {
        let body = FailedBody {
            feedback: Feedback::error(self.error.feedback_message()),
            form: &self.submission.draft,
        };
        (self.error.status(), Json(body)).into_response()
    }
}
