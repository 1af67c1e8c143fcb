//! OAuth2 authorization-code flow against an external identity provider.

use anyhow::Context;
use reqwest::Url;
use serde::Deserialize;

use crate::config::OAuthProviderConfig;

pub const CALLBACK_PATH: &str = "/auth/callback";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OAuthIdentity {
    pub email: String,
    pub name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
}

#[derive(Debug, Deserialize)]
struct UserInfo {
    email: Option<String>,
    #[serde(default)]
    email_verified: Option<bool>,
    name: Option<String>,
}

pub fn redirect_uri(site_url: &str) -> String {
    format!("{}{}", site_url.trim_end_matches('/'), CALLBACK_PATH)
}

/// Consent page URL. The provider name rides in `state` so the callback
/// knows which token endpoint to exchange the code with.
pub fn authorize_url(provider: &OAuthProviderConfig, site_url: &str) -> anyhow::Result<String> {
    let url = Url::parse_with_params(
        &provider.authorize_url,
        &[
            ("response_type", "code"),
            ("client_id", provider.client_id.as_str()),
            ("redirect_uri", redirect_uri(site_url).as_str()),
            ("scope", provider.scope.as_str()),
            ("state", provider.name.as_str()),
        ],
    )
    .with_context(|| format!("authorize url for {}", provider.name))?;
    Ok(url.into())
}

pub async fn exchange_code(
    http: &reqwest::Client,
    provider: &OAuthProviderConfig,
    site_url: &str,
    code: &str,
) -> anyhow::Result<OAuthIdentity> {
    let redirect = redirect_uri(site_url);
    let token: TokenResponse = http
        .post(&provider.token_url)
        .form(&[
            ("grant_type", "authorization_code"),
            ("code", code),
            ("redirect_uri", redirect.as_str()),
            ("client_id", provider.client_id.as_str()),
            ("client_secret", provider.client_secret.as_str()),
        ])
        .send()
        .await
        .context("oauth token request")?
        .error_for_status()
        .context("oauth token status")?
        .json()
        .await
        .context("oauth token body")?;

    let info: UserInfo = http
        .get(&provider.userinfo_url)
        .bearer_auth(&token.access_token)
        .send()
        .await
        .context("oauth userinfo request")?
        .error_for_status()
        .context("oauth userinfo status")?
        .json()
        .await
        .context("oauth userinfo body")?;

    identity_from(info)
}

fn identity_from(info: UserInfo) -> anyhow::Result<OAuthIdentity> {
    if info.email_verified == Some(false) {
        anyhow::bail!("provider reports an unverified email");
    }
    let email = info
        .email
        .map(|e| e.trim().to_lowercase())
        .filter(|e| !e.is_empty())
        .context("provider returned no email")?;
    Ok(OAuthIdentity {
        email,
        name: info.name,
    })
}
