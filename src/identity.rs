//! Client for the external identity service.
//!
//! Two calls are used: exchanging a one-time auth key for a token pair, and
//! refreshing a token pair. Both return tagged results and never touch
//! cookies; writing the session is the caller's job.

use std::time::Duration;

use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::session::{TokenPair, UserInfo};

const REFRESH_PATH: &str = "api/auth/refresh-token";
const CONFIRM_PATH: &str = "api/auth/confirm-auth";

/// Default timeout for identity service calls.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Errors from [`IdentityClient::refresh`].
#[derive(Debug, thiserror::Error)]
pub enum RefreshError {
    #[error("no refresh token available")]
    MissingToken,
    #[error("refresh rejected with status {status}: {message}")]
    Rejected { status: u16, message: String },
    #[error("network error during token refresh: {0}")]
    Network(String),
    #[error("invalid refresh response (status {status}): {message}")]
    InvalidResponse { status: u16, message: String },
}

impl RefreshError {
    /// HTTP status returned by the identity service, if a response arrived.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Rejected { status, .. } | Self::InvalidResponse { status, .. } => Some(*status),
            Self::MissingToken | Self::Network(_) => None,
        }
    }
}

/// Errors from [`IdentityClient::confirm_auth`].
#[derive(Debug, thiserror::Error)]
pub enum ConfirmError {
    #[error("no auth key provided")]
    MissingAuthKey,
    #[error("auth confirmation rejected with status {status}: {message}")]
    Rejected { status: u16, message: String },
    #[error("network error during auth confirmation: {0}")]
    Network(String),
    #[error("invalid confirmation response (status {status}): {message}")]
    InvalidResponse { status: u16, message: String },
}

impl ConfirmError {
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Rejected { status, .. } | Self::InvalidResponse { status, .. } => Some(*status),
            Self::MissingAuthKey | Self::Network(_) => None,
        }
    }
}

/// Result of a successful auth-key exchange.
#[derive(Debug, Clone)]
pub struct AuthConfirmation {
    pub tokens: TokenPair,
    /// User object returned next to the tokens, if any.
    pub user: Option<UserInfo>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RefreshRequest<'a> {
    refresh_token: &'a str,
}

#[derive(Deserialize)]
struct TokenResponse {
    #[serde(rename = "accessToken", default)]
    access_token: Option<String>,
    #[serde(rename = "refreshToken", default)]
    refresh_token: Option<String>,
    #[serde(default)]
    expires_in: Option<i64>,
    #[serde(default)]
    user: Option<UserInfo>,
}

impl TokenResponse {
    fn into_pair(self) -> Option<(TokenPair, Option<UserInfo>)> {
        let access_token = self.access_token.filter(|t| !t.is_empty())?;
        let pair = TokenPair {
            access_token,
            refresh_token: self.refresh_token.filter(|t| !t.is_empty()),
            expires_in: self.expires_in,
        };
        Some((pair, self.user))
    }
}

/// HTTP client for the identity service.
#[derive(Clone)]
pub struct IdentityClient {
    http: reqwest::Client,
    base_url: String,
}

impl IdentityClient {
    /// Create a client for the identity service at `base_url`.
    pub fn new(base_url: &Url, timeout: Duration) -> Result<Self, reqwest::Error> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            base_url: base_url.as_str().trim_end_matches('/').to_string(),
        })
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path)
    }

    /// Exchange a refresh token for a new token pair.
    ///
    /// Only HTTP 200 counts as success. Makes no network call when the
    /// refresh token is empty.
    pub async fn refresh(&self, refresh_token: &str) -> Result<TokenPair, RefreshError> {
        if refresh_token.is_empty() {
            return Err(RefreshError::MissingToken);
        }

        let response = self
            .http
            .post(self.endpoint(REFRESH_PATH))
            .json(&RefreshRequest { refresh_token })
            .send()
            .await
            .map_err(|e| {
                tracing::warn!(error = %e, "Token refresh request failed");
                RefreshError::Network(e.to_string())
            })?;

        let status = response.status();
        if status != StatusCode::OK {
            let body = response.text().await.unwrap_or_default();
            tracing::warn!(status = status.as_u16(), "Identity service rejected token refresh");
            return Err(RefreshError::Rejected {
                status: status.as_u16(),
                message: rejection_message(status, &body, "Failed to refresh token"),
            });
        }

        let body: TokenResponse =
            response
                .json()
                .await
                .map_err(|e| RefreshError::InvalidResponse {
                    status: status.as_u16(),
                    message: e.to_string(),
                })?;

        let (pair, _) = body
            .into_pair()
            .ok_or_else(|| RefreshError::InvalidResponse {
                status: status.as_u16(),
                message: "response has no access token".into(),
            })?;

        tracing::debug!("Token refresh succeeded");
        Ok(pair)
    }

    /// Exchange a one-time auth key for a token pair.
    pub async fn confirm_auth(&self, auth_key: &str) -> Result<AuthConfirmation, ConfirmError> {
        if auth_key.is_empty() {
            return Err(ConfirmError::MissingAuthKey);
        }

        let response = self
            .http
            .get(self.endpoint(CONFIRM_PATH))
            .query(&[("authKey", auth_key)])
            .send()
            .await
            .map_err(|e| {
                tracing::warn!(error = %e, "Auth confirmation request failed");
                ConfirmError::Network(e.to_string())
            })?;

        let status = response.status();
        if status != StatusCode::OK {
            let body = response.text().await.unwrap_or_default();
            let message = match confirm_failure_message(status) {
                Some(message) => message.to_string(),
                None => rejection_message(status, &body, "Auth confirmation failed"),
            };
            tracing::warn!(status = status.as_u16(), %message, "Auth confirmation rejected");
            return Err(ConfirmError::Rejected {
                status: status.as_u16(),
                message,
            });
        }

        let body: TokenResponse =
            response
                .json()
                .await
                .map_err(|e| ConfirmError::InvalidResponse {
                    status: status.as_u16(),
                    message: e.to_string(),
                })?;

        let (tokens, user) = body
            .into_pair()
            .ok_or_else(|| ConfirmError::InvalidResponse {
                status: status.as_u16(),
                message: "response has no access token".into(),
            })?;

        tracing::debug!("Auth confirmation succeeded");
        Ok(AuthConfirmation { tokens, user })
    }
}

fn confirm_failure_message(status: StatusCode) -> Option<&'static str> {
    match status.as_u16() {
        400 => Some("Invalid auth key provided"),
        401 => Some("Auth key expired or invalid"),
        404 => Some("Auth key not found"),
        500 => Some("Auth confirmation service temporarily unavailable"),
        _ => None,
    }
}

/// Prefer the service's `message`/`error` field, then its raw text.
fn rejection_message(status: StatusCode, body: &str, fallback: &str) -> String {
    if let Ok(value) = serde_json::from_str::<serde_json::Value>(body) {
        if let Some(message) = ["message", "error"]
            .iter()
            .find_map(|key| value.get(*key).and_then(|v| v.as_str()))
        {
            return message.to_string();
        }
    }
    let body = body.trim();
    if body.is_empty() {
        format!("{}: {}", fallback, status.as_u16())
    } else {
        body.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_ignores_trailing_slash() {
        let client =
            IdentityClient::new(&Url::parse("https://id.example.com/").unwrap(), DEFAULT_TIMEOUT)
                .unwrap();
        assert_eq!(
            client.endpoint(REFRESH_PATH),
            "https://id.example.com/api/auth/refresh-token"
        );

        let client = IdentityClient::new(
            &Url::parse("https://example.com/identity").unwrap(),
            DEFAULT_TIMEOUT,
        )
        .unwrap();
        assert_eq!(
            client.endpoint(CONFIRM_PATH),
            "https://example.com/identity/api/auth/confirm-auth"
        );
    }

    #[tokio::test]
    async fn test_refresh_empty_token_skips_network() {
        // Port 9 (discard) would fail if a request were attempted.
        let client =
            IdentityClient::new(&Url::parse("http://127.0.0.1:9").unwrap(), DEFAULT_TIMEOUT)
                .unwrap();
        let err = client.refresh("").await.unwrap_err();
        assert!(matches!(err, RefreshError::MissingToken));
        assert_eq!(err.status(), None);
    }

    #[tokio::test]
    async fn test_confirm_empty_key_skips_network() {
        let client =
            IdentityClient::new(&Url::parse("http://127.0.0.1:9").unwrap(), DEFAULT_TIMEOUT)
                .unwrap();
        assert!(matches!(
            client.confirm_auth("").await,
            Err(ConfirmError::MissingAuthKey)
        ));
    }

    #[test]
    fn test_rejection_message_sources() {
        assert_eq!(
            rejection_message(StatusCode::UNAUTHORIZED, r#"{"message":"expired"}"#, "x"),
            "expired"
        );
        assert_eq!(
            rejection_message(StatusCode::UNAUTHORIZED, r#"{"error":"revoked"}"#, "x"),
            "revoked"
        );
        assert_eq!(
            rejection_message(StatusCode::BAD_GATEWAY, "upstream down", "x"),
            "upstream down"
        );
        assert_eq!(
            rejection_message(StatusCode::UNAUTHORIZED, "", "Failed to refresh token"),
            "Failed to refresh token: 401"
        );
    }

    #[test]
    fn test_confirm_failure_messages() {
        assert_eq!(
            confirm_failure_message(StatusCode::NOT_FOUND),
            Some("Auth key not found")
        );
        assert_eq!(confirm_failure_message(StatusCode::IM_A_TEAPOT), None);
    }

    #[test]
    fn test_token_response_requires_access_token() {
        let body: TokenResponse =
            serde_json::from_str(r#"{"accessToken":"","refreshToken":"R"}"#).unwrap();
        assert!(body.into_pair().is_none());

        let body: TokenResponse =
            serde_json::from_str(r#"{"accessToken":"A","expires_in":900}"#).unwrap();
        let (pair, user) = body.into_pair().unwrap();
        assert_eq!(pair.access_token, "A");
        assert_eq!(pair.refresh_token, None);
        assert_eq!(pair.expires_in, Some(900));
        assert!(user.is_none());
    }
}
