use std::time::Duration;

use axum::{
    extract::{Multipart, Path, Query, State},
    http::{header, HeaderMap},
    response::{AppendHeaders, IntoResponse, Redirect, Response},
    routing::{get, post},
    Json, Router,
};
use time::OffsetDateTime;
use tracing::{error, info, instrument, warn};

use super::{
    cookies::{
        expired_cookie, parse_cookie, serialize_cookie, CookieOptions, ACCESS_COOKIE,
        REFRESH_COOKIE,
    },
    dto::{AuthResponse, CallbackQuery, LoginRequest, PublicUser, RefreshRequest, RegisterForm},
    extractors::{AuthSession, LOGIN_PATH},
    oauth::CALLBACK_PATH,
};
use crate::{
    auth::credentials::{check_credentials, normalize_email},
    backend::{ProfileSeed, Session, SignUpRequest},
    editor::{Failed, Submission},
    entries::handlers::DASHBOARD_PATH,
    error::{AppError, Feedback},
    forms::FormData,
    images,
    state::AppState,
};

pub const REGISTER_REDIRECT_MS: u64 = 5000;
pub const OAUTH_FAILED: &str = "Could not authenticate user";
/// How long login waits for its own sign-in event before answering anyway.
const SIGNED_IN_WAIT: Duration = Duration::from_secs(5);

pub fn auth_routes() -> Router<AppState> {
    Router::new()
        .route("/auth/register", post(register))
        .route("/auth/login", post(login))
        .route("/auth/logout", post(logout))
        .route("/auth/refresh", post(refresh))
        .route("/auth/oauth/:provider", get(oauth_start))
        .route(CALLBACK_PATH, get(oauth_callback))
}

pub fn me_routes() -> Router<AppState> {
    Router::new().route("/auth/me", get(get_me))
}

fn session_cookies(state: &AppState, session: &Session) -> Vec<(header::HeaderName, String)> {
    let access_age = (session.expires_at - OffsetDateTime::now_utc().unix_timestamp()).max(0);
    let mut cookies = vec![(
        header::SET_COOKIE,
        serialize_cookie(
            ACCESS_COOKIE,
            &session.access_token,
            &CookieOptions::session(access_age),
        ),
    )];
    if let Some(refresh) = &session.refresh_token {
        cookies.push((
            header::SET_COOKIE,
            serialize_cookie(
                REFRESH_COOKIE,
                refresh,
                &CookieOptions::session(state.config.jwt.refresh_ttl_minutes * 60),
            ),
        ));
    }
    cookies
}

fn cleared_cookies() -> [(header::HeaderName, String); 2] {
    [
        (header::SET_COOKIE, expired_cookie(ACCESS_COOKIE)),
        (header::SET_COOKIE, expired_cookie(REFRESH_COOKIE)),
    ]
}

fn reject(error: AppError, form: RegisterForm) -> Response {
    Failed {
        error,
        submission: Submission {
            draft: form,
            image: None,
        },
    }
    .into_response()
}

/// Avatar (if any) first, then the account with its profile metadata.
#[instrument(skip(state, mp))]
pub async fn register(State(state): State<AppState>, mp: Multipart) -> Response {
    let data = match FormData::read(mp, "avatar").await {
        Ok(d) => d,
        Err(e) => return e.into_response(),
    };
    let form = RegisterForm::from_form(&data);
    if let Err(e) = form
        .check()
        .and_then(|()| data.image.as_ref().map(|i| i.validate()).transpose().map(|_| ()))
    {
        warn!(email = %form.email, error = %e, "registration rejected");
        return reject(e, form);
    }

    let avatar = match data.image {
        Some(file) => {
            let bucket = &state.config.storage.avatars_bucket;
            match images::upload(state.backend.as_ref(), bucket, "public", file).await {
                Ok(img) => Some(img),
                Err(e) => {
                    error!(error = %e, "avatar upload failed");
                    return reject(e, form);
                }
            }
        }
        None => None,
    };

    let request = SignUpRequest {
        email: form.email.clone(),
        password: form.password.clone(),
        profile: ProfileSeed {
            full_name: form.full_name.trim().to_string(),
            gender: form.gender.clone(),
            avatar: avatar.clone(),
        },
    };
    match state.backend.sign_up(request).await {
        Ok(user) => {
            info!(user_id = %user.id, email = %user.email, "user registered");
            Json(
                Feedback::success("Registration successful! Please log in.").then_navigate(
                    LOGIN_PATH,
                    REGISTER_REDIRECT_MS,
                    false,
                ),
            )
            .into_response()
        }
        Err(e) => {
            if let Some(orphan) = avatar {
                warn!(path = %orphan.path, "sign-up failed; uploaded avatar orphaned");
            }
            warn!(email = %form.email, error = %e, "sign-up failed");
            reject(e, form)
        }
    }
}

/// Subscribes to auth events before signing in and navigates once the
/// sign-in of this identity is observed.
#[instrument(skip(state, payload))]
pub async fn login(
    State(state): State<AppState>,
    Json(payload): Json<LoginRequest>,
) -> Result<Response, AppError> {
    let email = normalize_email(&payload.email);
    check_credentials(&email, &payload.password)?;

    let mut events = state.backend.subscribe_auth();
    let session = state
        .backend
        .sign_in(&email, &payload.password)
        .await
        .map_err(|e| {
            warn!(%email, error = %e, "login failed");
            e
        })?;

    let mut feedback = Feedback::success("Signed in");
    match tokio::time::timeout(SIGNED_IN_WAIT, events.signed_in(&email)).await {
        Ok(Some(_)) => feedback = feedback.then_navigate(DASHBOARD_PATH, 0, true),
        Ok(None) => warn!("auth event stream closed before sign-in was observed"),
        Err(_) => warn!("timed out waiting for sign-in event"),
    }
    drop(events);

    info!(user_id = %session.user_id, "user logged in");
    let cookies = session_cookies(&state, &session);
    Ok((
        AppendHeaders(cookies),
        Json(AuthResponse::new(feedback, session)),
    )
        .into_response())
}

#[instrument(skip(state, session), fields(user_id = %session.user_id))]
pub async fn logout(
    State(state): State<AppState>,
    AuthSession(session): AuthSession,
) -> Result<Response, AppError> {
    state.backend.sign_out(&session).await.map_err(|e| {
        error!(error = %e, "logout failed");
        AppError::Auth(format!("Error logging out: {}", e))
    })?;
    info!("user logged out");
    Ok((
        AppendHeaders(cleared_cookies()),
        Json(Feedback::success("Signed out").then_navigate("/", 0, false)),
    )
        .into_response())
}

#[instrument(skip(state, headers, body))]
pub async fn refresh(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Option<Json<RefreshRequest>>,
) -> Result<Response, AppError> {
    let token = body
        .and_then(|Json(b)| b.refresh_token)
        .or_else(|| {
            headers
                .get_all(header::COOKIE)
                .iter()
                .filter_map(|h| h.to_str().ok())
                .find_map(|h| parse_cookie(h).remove(REFRESH_COOKIE))
        })
        .filter(|t| !t.is_empty())
        .ok_or_else(|| AppError::auth("Refresh token is required"))?;

    let session = state.backend.refresh_session(&token).await?;
    let cookies = session_cookies(&state, &session);
    Ok((
        AppendHeaders(cookies),
        Json(AuthResponse::new(Feedback::success("Session refreshed"), session)),
    )
        .into_response())
}

#[instrument(skip(state))]
pub async fn oauth_start(
    State(state): State<AppState>,
    Path(provider): Path<String>,
) -> Result<Redirect, AppError> {
    let url = state.backend.sign_in_with_oauth(&provider)?;
    Ok(Redirect::to(&url))
}

fn login_with_message(message: &str) -> Redirect {
    Redirect::to(&format!(
        "{}?message={}",
        LOGIN_PATH,
        urlencoding::encode(message)
    ))
}

/// Only same-site paths are allowed as post-login targets.
fn safe_next(next: Option<&str>) -> &str {
    match next {
        Some(n) if n.starts_with('/') && !n.starts_with("//") => n,
        _ => DASHBOARD_PATH,
    }
}

/// Provider redirect target. Any failure lands on the login view with a
/// fixed message.
#[instrument(skip(state, query))]
pub async fn oauth_callback(
    State(state): State<AppState>,
    Query(query): Query<CallbackQuery>,
) -> Response {
    let provider = query.provider.as_deref().unwrap_or("google");
    let Some(code) = query.code.as_deref().filter(|c| !c.is_empty()) else {
        warn!(provider, "oauth callback without code");
        return login_with_message(OAUTH_FAILED).into_response();
    };
    match state.backend.exchange_code_for_session(provider, code).await {
        Ok(session) => {
            info!(user_id = %session.user_id, provider, "oauth sign-in");
            let cookies = session_cookies(&state, &session);
            let next = safe_next(query.next.as_deref());
            (AppendHeaders(cookies), Redirect::to(next)).into_response()
        }
        Err(e) => {
            error!(error = %e, provider, "could not exchange code for session");
            login_with_message(OAUTH_FAILED).into_response()
        }
    }
}

#[instrument(skip(state, session), fields(user_id = %session.user_id))]
pub async fn get_me(
    State(state): State<AppState>,
    AuthSession(session): AuthSession,
) -> Result<Json<PublicUser>, AppError> {
    let user = state.backend.get_current_user(&session).await?;
    Ok(Json(user.into()))
}
