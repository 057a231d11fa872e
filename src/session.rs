//! Cookie-persisted session model and server-side readers.
//!
//! The browser's cookie store holds the only copy of a session. The gateway
//! reads it on every request and rewrites it whole whenever it changes.

use axum_extra::extract::cookie::CookieJar;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::cookies::{ACCESS_TOKEN_COOKIE, SESSION_COOKIE, USER_INFO_COOKIE};
use crate::jwt::Claims;

/// Public identity snapshot, also mirrored to the browser-readable
/// `user_info` cookie.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserInfo {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub role: Option<String>,
}

impl UserInfo {
    /// Snapshot taken from token claims.
    pub fn from_claims(claims: &Claims) -> Self {
        Self {
            id: claims.subject_id.clone(),
            email: claims.email.clone(),
            name: claims.full_name.clone(),
            role: claims.role.clone(),
        }
    }

    /// Fill fields missing from `self` with the ones in `fallback`.
    pub fn or(self, fallback: Option<&UserInfo>) -> Self {
        let Some(fallback) = fallback else {
            return self;
        };
        Self {
            id: self.id.or_else(|| fallback.id.clone()),
            email: self.email.or_else(|| fallback.email.clone()),
            name: self.name.or_else(|| fallback.name.clone()),
            role: self.role.or_else(|| fallback.role.clone()),
        }
    }

    fn is_empty(&self) -> bool {
        self.id.is_none() && self.email.is_none() && self.name.is_none() && self.role.is_none()
    }
}

/// Access/refresh pair handed out by the identity service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenPair {
    pub access_token: String,
    /// Absent when the identity service keeps the current refresh token.
    pub refresh_token: Option<String>,
    pub expires_in: Option<i64>,
}

/// The authentication record for one browser.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<UserInfo>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Errors reading a session back from its cookie.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum SessionError {
    #[error("malformed session: {0}")]
    MalformedSession(String),
    #[error("access token payload could not be decoded")]
    MalformedToken,
}

// Lenient mirror of `Session` used for parsing cookies written by older
// gateway versions, where timestamps may be missing.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct StoredSession {
    #[serde(default)]
    token: Option<String>,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    user: Option<UserInfo>,
    #[serde(default)]
    created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    updated_at: Option<DateTime<Utc>>,
}

impl Session {
    /// Parse the (already percent-decoded) value of the `session` cookie.
    pub fn from_cookie_value(value: &str) -> Result<Self, SessionError> {
        let stored: StoredSession = serde_json::from_str(value)
            .map_err(|e| SessionError::MalformedSession(e.to_string()))?;

        let token = stored
            .token
            .filter(|t| !t.is_empty())
            .ok_or_else(|| SessionError::MalformedSession("missing token".into()))?;

        let now = Utc::now();
        let created_at = stored.created_at.unwrap_or(now);
        Ok(Self {
            token,
            refresh_token: stored.refresh_token.filter(|t| !t.is_empty()),
            user: stored.user,
            created_at,
            updated_at: stored.updated_at.unwrap_or(created_at),
        })
    }

    /// Serialize for the `session` cookie.
    pub fn to_cookie_value(&self) -> String {
        // Serializing plain strings and timestamps cannot fail.
        serde_json::to_string(self).unwrap_or_default()
    }

    /// Start a session from a freshly confirmed token pair.
    ///
    /// Claims from the access token take precedence over the user object
    /// the identity service returned alongside it.
    pub fn established(
        pair: TokenPair,
        claims: &Claims,
        service_user: Option<&UserInfo>,
        now: DateTime<Utc>,
    ) -> Self {
        let user = UserInfo::from_claims(claims).or(service_user);
        Self {
            token: pair.access_token,
            refresh_token: pair.refresh_token,
            user: (!user.is_empty()).then_some(user),
            created_at: now,
            updated_at: now,
        }
    }

    /// Apply a successful refresh in place of the current tokens.
    pub fn refreshed(self, pair: TokenPair, claims: &Claims, now: DateTime<Utc>) -> Self {
        let user = UserInfo::from_claims(claims).or(self.user.as_ref());
        Self {
            token: pair.access_token,
            refresh_token: pair.refresh_token.or(self.refresh_token),
            user: (!user.is_empty()).then_some(user),
            created_at: self.created_at,
            updated_at: now,
        }
    }

    /// Public snapshot for the `user_info` cookie.
    pub fn user_info(&self) -> UserInfo {
        self.user.clone().unwrap_or_default()
    }
}

/// Read the session from the request cookies.
///
/// `Ok(None)` means no session cookie at all.
pub fn read_session(jar: &CookieJar) -> Result<Option<Session>, SessionError> {
    jar.get(SESSION_COOKIE)
        .map(|cookie| Session::from_cookie_value(cookie.value()))
        .transpose()
}

/// The current access token, preferring the session over the bare mirror
/// cookie.
pub fn access_token(jar: &CookieJar) -> Option<String> {
    if let Ok(Some(session)) = read_session(jar) {
        return Some(session.token);
    }
    jar.get(ACCESS_TOKEN_COOKIE)
        .map(|cookie| cookie.value().to_string())
        .filter(|token| !token.is_empty())
}

/// The current user's id from the session, falling back to `user_info`.
pub fn current_user_id(jar: &CookieJar) -> Option<String> {
    match read_session(jar) {
        Ok(Some(session)) => {
            if let Some(id) = session.user.and_then(|user| user.id) {
                return Some(id);
            }
        }
        Ok(None) => {}
        Err(e) => tracing::debug!(error = %e, "Ignoring unreadable session cookie"),
    }

    let cookie = jar.get(USER_INFO_COOKIE)?;
    match serde_json::from_str::<UserInfo>(cookie.value()) {
        Ok(user) => user.id,
        Err(e) => {
            tracing::debug!(error = %e, "Ignoring unreadable user_info cookie");
            None
        }
    }
}
