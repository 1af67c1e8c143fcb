use axum::{
    extract::{DefaultBodyLimit, Multipart, State},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::Serialize;
use tracing::{instrument, warn};
use uuid::Uuid;

use super::{
    model::{Profile, ProfileDraft},
    services::{load_profile, ProfileTarget},
};
use crate::{
    auth::extractors::AuthSession,
    editor::{run_detached, EditorKind, Submission},
    entries::handlers::DASHBOARD_PATH,
    error::{AppError, Feedback},
    forms::FormData,
    state::AppState,
};

pub const PLACEHOLDER_AVATAR: &str = "/images/mock-profile.png";
pub const AVATAR_FIELD: &str = "avatar";

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/profile", get(get_profile).put(update_profile))
        .layer(DefaultBodyLimit::max(10 * 1024 * 1024))
}

#[derive(Debug, Serialize)]
pub struct ProfileView {
    pub id: Uuid,
    pub email: String,
    pub full_name: String,
    pub gender: String,
    pub avatar_url: String,
    pub has_avatar: bool,
}

impl ProfileView {
    fn of(profile: Profile, email: String) -> Self {
        let has_avatar = profile.avatar_url.is_some();
        Self {
            id: profile.id,
            email,
            full_name: profile.full_name,
            gender: profile.gender.to_string(),
            avatar_url: profile
                .avatar_url
                .unwrap_or_else(|| PLACEHOLDER_AVATAR.to_string()),
            has_avatar,
        }
    }
}

#[instrument(skip(state, session), fields(user_id = %session.user_id))]
pub async fn get_profile(
    State(state): State<AppState>,
    AuthSession(session): AuthSession,
) -> Result<Json<ProfileView>, AppError> {
    let profile = load_profile(state.backend.as_ref(), session.user_id).await?;
    Ok(Json(ProfileView::of(profile, session.email)))
}

#[instrument(skip(state, session, mp), fields(user_id = %session.user_id))]
pub async fn update_profile(
    State(state): State<AppState>,
    AuthSession(session): AuthSession,
    mp: Multipart,
) -> Response {
    let form = match FormData::read(mp, AVATAR_FIELD).await {
        Ok(f) => f,
        Err(e) => return e.into_response(),
    };
    let guard = match state.inflight.try_begin(session.user_id, EditorKind::Profile) {
        Ok(g) => g,
        Err(e) => return e.into_response(),
    };
    let user = match state.backend.get_current_user(&session).await {
        Ok(u) => u,
        Err(e) => {
            warn!(error = %e, "current user lookup failed");
            return AppError::Auth("You must be logged in to update your profile.".into())
                .into_response();
        }
    };
    let profile = match load_profile(state.backend.as_ref(), user.id).await {
        Ok(p) => p,
        Err(e) => return e.into_response(),
    };

    let submission = Submission {
        draft: ProfileDraft::from_form(&form),
        image: form.image,
    };
    let target = ProfileTarget::new(&profile, state.config.storage.avatars_bucket.clone());
    match run_detached(state.backend.clone(), guard, target, submission).await {
        Ok(saved) => Json(
            Feedback::success(saved.message).then_navigate(
                DASHBOARD_PATH,
                state.config.redirect_delay_ms,
                true,
            ),
        )
        .into_response(),
        Err(failed) => failed.into_response(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{
        memory::{MemoryBackend, Op},
        Fields, RecordApi, Table,
    };
    use axum::{
        body::{to_bytes, Body},
        http::{header, Request, StatusCode},
    };
    use serde_json::{json, Value};
    use std::sync::Arc;
    use tower::ServiceExt;

    const BOUNDARY: &str = "profileBoundary42";

    fn setup() -> (AppState, Arc<MemoryBackend>, String, Uuid) {
        let (state, mem) = AppState::fake();
        let session = mem.seed_user("cook@example.com", "password123");
        mem.reset_calls();
        (state, mem, session.access_token, session.user_id)
    }

    fn put_form(token: &str, fields: &[(&str, &str)], avatar: Option<(&str, &str, &str)>) -> Request<Body> {
        let mut body = String::new();
        for (k, v) in fields {
            body.push_str(&format!(
                "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"{k}\"\r\n\r\n{v}\r\n"
            ));
        }
        if let Some((name, ct, data)) = avatar {
            body.push_str(&format!(
                "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"avatar\"; filename=\"{name}\"\r\nContent-Type: {ct}\r\n\r\n{data}\r\n"
            ));
        }
        body.push_str(&format!("--{BOUNDARY}--\r\n"));
        Request::builder()
            .method("PUT")
            .uri("/profile")
            .header(header::AUTHORIZATION, format!("Bearer {}", token))
            .header(
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={}", BOUNDARY),
            )
            .body(Body::from(body))
            .unwrap()
    }

    async fn json_body(res: Response) -> Value {
        let bytes = to_bytes(res.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    async fn set_avatar(mem: &MemoryBackend, owner: Uuid, path: &str) {
        mem.seed_object("avatars", path, b"old");
        let mut fields = Fields::new();
        fields.insert("avatar_path".into(), json!(path));
        fields.insert(
            "avatar_url".into(),
            json!(format!("https://storage.local/avatars/{}", path)),
        );
        mem.update_record(Table::Profiles, owner, owner, fields)
            .await
            .unwrap();
        mem.reset_calls();
    }

    #[tokio::test]
    async fn profile_without_avatar_shows_placeholder() {
        let (state, _, token, _) = setup();
        let res = routes()
            .with_state(state)
            .oneshot(
                Request::builder()
                    .uri("/profile")
                    .header(header::AUTHORIZATION, format!("Bearer {}", token))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        let body = json_body(res).await;
        assert_eq!(body["avatar_url"], PLACEHOLDER_AVATAR);
        assert_eq!(body["email"], "cook@example.com");
        assert_eq!(body["has_avatar"], false);
    }

    #[tokio::test]
    async fn replacing_avatar_with_failed_cleanup_warns() {
        let (state, mem, token, owner) = setup();
        set_avatar(&mem, owner, "profiles/old.png").await;
        mem.fail(Op::DeleteObject, "permission denied");

        let res = routes()
            .with_state(state)
            .oneshot(put_form(
                &token,
                &[("full_name", "Somchai"), ("gender", "male")],
                Some(("me.png", "image/png", "png-bytes")),
            ))
            .await
            .unwrap();

        assert_eq!(res.status(), StatusCode::OK);
        let body = json_body(res).await;
        assert_eq!(
            body["message"],
            "Profile updated successfully! (Warning: Could not delete old image: permission denied)"
        );
        assert_eq!(body["navigate"]["to"], "/dashboard");
        let row = mem.records(Table::Profiles).remove(0);
        assert_eq!(row["full_name"], "Somchai");
        let path = row["avatar_path"].as_str().unwrap();
        assert!(path.starts_with(&format!("profiles/{}/", owner)));
        assert!(mem.has_object("avatars", "profiles/old.png"));
    }

    #[tokio::test]
    async fn logged_out_user_cannot_update() {
        let (state, mem, token, _) = setup();
        mem.fail(Op::GetCurrentUser, "JWT expired");

        let res = routes()
            .with_state(state)
            .oneshot(put_form(&token, &[("full_name", "Somchai")], None))
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
        let body = json_body(res).await;
        assert_eq!(body["message"], "You must be logged in to update your profile.");
        assert_eq!(mem.calls(Op::UpdateRecord), 0);
        assert_eq!(mem.storage_calls(), 0);
    }

    #[tokio::test]
    async fn upload_failure_keeps_profile() {
        let (state, mem, token, _) = setup();
        mem.fail(Op::UploadObject, "quota exceeded");

        let res = routes()
            .with_state(state)
            .oneshot(put_form(
                &token,
                &[("full_name", "Somchai")],
                Some(("me.png", "image/png", "png-bytes")),
            ))
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::BAD_GATEWAY);
        let body = json_body(res).await;
        assert_eq!(body["message"], "Failed to upload image: quota exceeded");
        assert_eq!(body["form"]["full_name"], "Somchai");
        assert_eq!(mem.calls(Op::UpdateRecord), 0);
        assert_eq!(mem.records(Table::Profiles)[0]["full_name"], "");
    }
}
