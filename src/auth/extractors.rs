use axum::{
    async_trait,
    extract::FromRequestParts,
    http::{header, request::Parts},
    response::Redirect,
};
use tracing::{debug, warn};

use super::cookies::{parse_cookie, ACCESS_COOKIE};
use crate::{backend::Session, state::AppState};

pub const LOGIN_PATH: &str = "/login";

/// Gate for protected views: resolves the caller's session or redirects to
/// the login view. A failed lookup is treated exactly like no session.
pub struct AuthSession(pub Session);

/// Access token from `Authorization: Bearer ..` or the session cookie.
pub(crate) fn access_token(parts: &Parts) -> Option<String> {
    if let Some(auth) = parts
        .headers
        .get(header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
    {
        if let Some(token) = auth
            .strip_prefix("Bearer ")
            .or_else(|| auth.strip_prefix("bearer "))
        {
            return Some(token.trim().to_string());
        }
    }
    parts
        .headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|h| h.to_str().ok())
        .find_map(|h| parse_cookie(h).remove(ACCESS_COOKIE))
        .filter(|t| !t.is_empty())
}

#[async_trait]
impl FromRequestParts<AppState> for AuthSession {
    type Rejection = Redirect;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let Some(token) = access_token(parts) else {
            debug!("no session token; redirecting to login");
            return Err(Redirect::to(LOGIN_PATH));
        };

        match state.backend.get_session(&token).await {
            Ok(Some(session)) => Ok(AuthSession(session)),
            Ok(None) => {
                debug!("session not found; redirecting to login");
                Err(Redirect::to(LOGIN_PATH))
            }
            Err(e) => {
                warn!(error = %e, "session lookup failed; redirecting to login");
                Err(Redirect::to(LOGIN_PATH))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::memory::Op;
    use axum::{
        http::{Request, StatusCode},
        response::IntoResponse,
    };

    fn parts_with(header_name: header::HeaderName, value: &str) -> Parts {
        let (parts, _) = Request::builder()
            .uri("/dashboard")
            .header(header_name, value)
            .body(())
            .unwrap()
            .into_parts();
        parts
    }

    #[test]
    fn token_from_bearer_or_cookie() {
        let p = parts_with(header::AUTHORIZATION, "Bearer abc");
        assert_eq!(access_token(&p).as_deref(), Some("abc"));

        let p = parts_with(header::COOKIE, "theme=dark; ft-access-token=xyz");
        assert_eq!(access_token(&p).as_deref(), Some("xyz"));

        let p = parts_with(header::COOKIE, "ft-access-token=");
        assert_eq!(access_token(&p), None);
    }

    async fn gate(state: &AppState, token: Option<&str>) -> Result<AuthSession, Redirect> {
        let mut parts = match token {
            Some(t) => parts_with(header::AUTHORIZATION, &format!("Bearer {}", t)),
            None => Request::builder().body(()).unwrap().into_parts().0,
        };
        AuthSession::from_request_parts(&mut parts, state).await
    }

    fn assert_login_redirect(rejection: Redirect) {
        let res = rejection.into_response();
        assert_eq!(res.status(), StatusCode::SEE_OTHER);
        assert_eq!(res.headers()[header::LOCATION], LOGIN_PATH);
    }

    #[tokio::test]
    async fn valid_session_passes() {
        let (state, mem) = AppState::fake();
        let session = mem.seed_user("cook@example.com", "password123");
        let AuthSession(got) = gate(&state, Some(&session.access_token)).await.ok().unwrap();
        assert_eq!(got.user_id, session.user_id);
    }

    #[tokio::test]
    async fn missing_unknown_or_failing_lookup_redirects() {
        let (state, mem) = AppState::fake();
        let session = mem.seed_user("cook@example.com", "password123");

        assert_login_redirect(gate(&state, None).await.err().unwrap());
        assert_login_redirect(gate(&state, Some("nope")).await.err().unwrap());

        mem.fail(Op::GetSession, "backend unreachable");
        assert_login_redirect(gate(&state, Some(&session.access_token)).await.err().unwrap());
    }
}
