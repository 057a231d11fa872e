//! Browser-side session helpers.
//!
//! Answers "is this browser signed in, and as whom" from the cookie string
//! the page can see, without a server round trip. Answers are optimistic;
//! the route guard stays authoritative. Outside a browser every helper
//! degrades to `false`/`None`.

use std::future::Future;

use axum_extra::extract::cookie::Cookie;
use url::Url;

use crate::cookies::{AUTH_STATUS_COOKIE, AUTHENTICATED, SESSION_COOKIE, USER_INFO_COOKIE};
use crate::jwt::{self, DEFAULT_EXPIRY_BUFFER_SECS};
use crate::session::{Session, UserInfo};

/// Errors from remote session operations.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("gateway answered with status {0}")]
    Status(u16),
}

/// Remote operation deleting the session cookie set.
pub trait SessionClearer {
    fn clear_session(&self) -> impl Future<Output = Result<(), ClientError>> + Send;
}

/// Calls the gateway's logout endpoint.
#[derive(Clone)]
pub struct GatewayClient {
    http: reqwest::Client,
    logout_url: String,
}

impl GatewayClient {
    pub fn new(http: reqwest::Client, gateway_url: &Url) -> Self {
        Self {
            http,
            logout_url: format!(
                "{}/api/auth/logout",
                gateway_url.as_str().trim_end_matches('/')
            ),
        }
    }
}

impl SessionClearer for GatewayClient {
    async fn clear_session(&self) -> Result<(), ClientError> {
        let response = self.http.post(&self.logout_url).send().await?;
        if response.status().is_success() {
            Ok(())
        } else {
            Err(ClientError::Status(response.status().as_u16()))
        }
    }
}

/// Read-only view of the session as seen from the page.
#[derive(Debug, Clone)]
pub struct ClientAuth {
    /// `document.cookie`, or `None` outside a browser.
    document_cookie: Option<String>,
    login_url: Url,
}

impl ClientAuth {
    /// Helpers backed by the page's `document.cookie` string.
    pub fn browser(document_cookie: impl Into<String>, login_url: Url) -> Self {
        Self {
            document_cookie: Some(document_cookie.into()),
            login_url,
        }
    }

    /// Helpers running outside a browser.
    pub fn detached(login_url: Url) -> Self {
        Self {
            document_cookie: None,
            login_url,
        }
    }

    fn cookie(&self, name: &str) -> Option<String> {
        let cookies = self.document_cookie.as_deref()?;
        Cookie::split_parse_encoded(cookies)
            .filter_map(Result::ok)
            .find(|cookie| cookie.name() == name)
            .map(|cookie| cookie.value().to_string())
    }

    pub fn is_authenticated(&self) -> bool {
        self.cookie(AUTH_STATUS_COOKIE).as_deref() == Some(AUTHENTICATED)
    }

    pub fn get_session_data(&self) -> Option<Session> {
        let value = self.cookie(SESSION_COOKIE)?;
        match Session::from_cookie_value(&value) {
            Ok(session) => Some(session),
            Err(e) => {
                tracing::debug!(error = %e, "Ignoring unreadable session cookie");
                None
            }
        }
    }

    /// Whether the session token outlives the expiry buffer.
    pub fn is_session_valid(&self) -> bool {
        self.get_session_data()
            .is_some_and(|session| !jwt::is_expired(&session.token, DEFAULT_EXPIRY_BUFFER_SECS))
    }

    pub fn get_user_info(&self) -> Option<UserInfo> {
        let value = self.cookie(USER_INFO_COOKIE)?;
        serde_json::from_str(&value).ok()
    }

    pub fn access_token(&self) -> Option<String> {
        self.get_session_data().map(|session| session.token)
    }

    pub fn refresh_token(&self) -> Option<String> {
        self.get_session_data()
            .and_then(|session| session.refresh_token)
    }

    /// Clear the session remotely, then hand back the login page to navigate
    /// to. A failed clear never blocks the navigation.
    ///
    /// Returns `None` outside a browser, without calling `clearer`.
    pub async fn logout<C: SessionClearer>(&self, clearer: &C) -> Option<Url> {
        self.document_cookie.as_ref()?;
        if let Err(e) = clearer.clear_session().await {
            tracing::warn!(error = %e, "Failed to clear session during logout");
        }
        Some(self.login_url.clone())
    }
}
