//! Session cookie set.
//!
//! A session is written as five cookies on one response:
//! - `session`: the full session as JSON (HttpOnly)
//! - `accessToken`: bare access token mirror (HttpOnly, 15 minutes)
//! - `refreshToken`: bare refresh token mirror (HttpOnly, 7 days)
//! - `user_info`: public user snapshot as JSON (browser-readable)
//! - `auth_status`: the literal `authenticated` (browser-readable)
//!
//! The set is always written or cleared as a whole.

use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use time::Duration;

use crate::session::Session;

pub const SESSION_COOKIE: &str = "session";
pub const ACCESS_TOKEN_COOKIE: &str = "accessToken";
pub const REFRESH_TOKEN_COOKIE: &str = "refreshToken";
pub const USER_INFO_COOKIE: &str = "user_info";
pub const AUTH_STATUS_COOKIE: &str = "auth_status";

/// Every cookie belonging to the session set.
pub const SESSION_COOKIE_NAMES: [&str; 5] = [
    SESSION_COOKIE,
    ACCESS_TOKEN_COOKIE,
    REFRESH_TOKEN_COOKIE,
    USER_INFO_COOKIE,
    AUTH_STATUS_COOKIE,
];

/// Value of `auth_status` for a signed-in browser.
pub const AUTHENTICATED: &str = "authenticated";

/// Default session lifetime: 7 days
pub const SESSION_MAX_AGE_SECS: i64 = 7 * 24 * 60 * 60;

/// Lifetime of the bare access token mirror: 15 minutes
pub const ACCESS_TOKEN_MAX_AGE_SECS: i64 = 15 * 60;

/// Lifetime of the bare refresh token mirror: 7 days
pub const REFRESH_TOKEN_MAX_AGE_SECS: i64 = 7 * 24 * 60 * 60;

/// Deployment-wide cookie attributes.
#[derive(Debug, Clone, Copy, Default)]
pub struct CookieSettings {
    /// Set the `Secure` flag (production deployments behind HTTPS).
    pub secure: bool,
}

/// Per-write options for [`apply_session`].
#[derive(Debug, Clone, Copy, Default)]
pub struct SessionCookieOptions {
    /// Token lifetime reported by the identity service, in seconds.
    pub expires_in: Option<i64>,
}

impl SessionCookieOptions {
    fn session_max_age(&self) -> Duration {
        let secs = self
            .expires_in
            .filter(|secs| *secs > 0)
            .unwrap_or(SESSION_MAX_AGE_SECS);
        Duration::seconds(secs)
    }
}

/// Write the whole session cookie set to `jar`.
pub fn apply_session(
    jar: CookieJar,
    session: &Session,
    settings: CookieSettings,
    options: SessionCookieOptions,
) -> CookieJar {
    let max_age = options.session_max_age();
    let user_info = serde_json::to_string(&session.user_info()).unwrap_or_else(|_| "{}".into());

    let jar = jar
        .add(build(SESSION_COOKIE, session.to_cookie_value(), true, max_age, settings))
        .add(build(
            ACCESS_TOKEN_COOKIE,
            session.token.clone(),
            true,
            Duration::seconds(ACCESS_TOKEN_MAX_AGE_SECS),
            settings,
        ))
        .add(build(USER_INFO_COOKIE, user_info, false, max_age, settings))
        .add(build(AUTH_STATUS_COOKIE, AUTHENTICATED.to_string(), false, max_age, settings));

    match &session.refresh_token {
        Some(refresh_token) => jar.add(build(
            REFRESH_TOKEN_COOKIE,
            refresh_token.clone(),
            true,
            Duration::seconds(REFRESH_TOKEN_MAX_AGE_SECS),
            settings,
        )),
        None => jar.add(removal(REFRESH_TOKEN_COOKIE)),
    }
}

/// Delete the whole session cookie set, whether or not the request carried it.
pub fn clear_session(jar: CookieJar) -> CookieJar {
    SESSION_COOKIE_NAMES
        .iter()
        .fold(jar, |jar, name| jar.add(removal(name)))
}

fn build(
    name: &'static str,
    value: String,
    http_only: bool,
    max_age: Duration,
    settings: CookieSettings,
) -> Cookie<'static> {
    Cookie::build((name, value))
        .http_only(http_only)
        .secure(settings.secure)
        .same_site(SameSite::Lax)
        .path("/")
        .max_age(max_age)
        .build()
}

fn removal(name: &'static str) -> Cookie<'static> {
    let mut cookie = Cookie::build((name, "")).path("/").build();
    cookie.make_removal();
    cookie
}
