use std::collections::HashMap;

use time::{macros::format_description, Duration, OffsetDateTime};

pub const ACCESS_COOKIE: &str = "ft-access-token";
pub const REFRESH_COOKIE: &str = "ft-refresh-token";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SameSite {
    Strict,
    Lax,
    None,
}

impl SameSite {
    fn as_str(self) -> &'static str {
        match self {
            SameSite::Strict => "Strict",
            SameSite::Lax => "Lax",
            SameSite::None => "None",
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct CookieOptions {
    pub path: Option<String>,
    pub domain: Option<String>,
    /// Lifetime in seconds; also drives `Expires`.
    pub max_age: Option<i64>,
    pub secure: bool,
    pub http_only: bool,
    /// Defaults to `Lax` when unset.
    pub same_site: Option<SameSite>,
}

impl CookieOptions {
    /// Options used for the session cookies.
    pub fn session(max_age: i64) -> Self {
        Self {
            path: Some("/".into()),
            max_age: Some(max_age),
            http_only: true,
            ..Default::default()
        }
    }
}

pub fn serialize_cookie(name: &str, value: &str, options: &CookieOptions) -> String {
    serialize_cookie_at(name, value, options, OffsetDateTime::now_utc())
}

fn serialize_cookie_at(
    name: &str,
    value: &str,
    options: &CookieOptions,
    now: OffsetDateTime,
) -> String {
    let mut parts = vec![format!("{}={}", name, urlencoding::encode(value))];
    if let Some(path) = &options.path {
        parts.push(format!("Path={}", path));
    }
    if let Some(domain) = &options.domain {
        parts.push(format!("Domain={}", domain));
    }
    if let Some(max_age) = options.max_age {
        parts.push(format!("Max-Age={}", max_age));
        let expires = now + Duration::seconds(max_age);
        if let Ok(s) = http_date(expires) {
            parts.push(format!("Expires={}", s));
        }
    }
    if options.secure {
        parts.push("Secure".into());
    }
    if options.http_only {
        parts.push("HttpOnly".into());
    }
    parts.push(format!(
        "SameSite={}",
        options.same_site.unwrap_or(SameSite::Lax).as_str()
    ));
    parts.join("; ")
}

/// A `Set-Cookie` value that removes `name`.
pub fn expired_cookie(name: &str) -> String {
    serialize_cookie(
        name,
        "",
        &CookieOptions {
            path: Some("/".into()),
            max_age: Some(0),
            http_only: true,
            ..Default::default()
        },
    )
}

/// Parse a `Cookie` header. Keys and values are trimmed and percent-decoded;
/// pairs without a key are skipped.
pub fn parse_cookie(header: &str) -> HashMap<String, String> {
    header
        .split(';')
        .filter_map(|pair| {
            let (k, v) = pair.split_once('=').unwrap_or((pair, ""));
            let key = decode(k.trim());
            if key.is_empty() {
                return None;
            }
            Some((key, decode(v.trim())))
        })
        .collect()
}

fn decode(s: &str) -> String {
    urlencoding::decode(s)
        .map(|c| c.into_owned())
        .unwrap_or_else(|_| s.to_string())
}

fn http_date(at: OffsetDateTime) -> Result<String, time::error::Format> {
    at.to_offset(time::UtcOffset::UTC).format(format_description!(
        "[weekday repr:short], [day] [month repr:short] [year] [hour]:[minute]:[second] GMT"
    ))
}
