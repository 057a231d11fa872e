//! Session endpoints: auth-key confirmation, logout and a session summary.

use axum::{
    Json, Router,
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
};
use axum_extra::extract::cookie::CookieJar;
use chrono::Utc;
use serde::{Deserialize, Serialize};

use super::error::ApiError;
use crate::cookies::{SessionCookieOptions, apply_session, clear_session};
use crate::identity::ConfirmError;
use crate::jwt;
use crate::session::{self, Session, UserInfo};
use crate::state::AppState;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/confirm", post(confirm))
        .route("/logout", post(logout))
        .route("/session", get(session_summary))
        .with_state(state)
}

/// Failure to turn a one-time auth key into a session.
#[derive(Debug, thiserror::Error)]
pub enum ExchangeError {
    #[error(transparent)]
    Confirm(#[from] ConfirmError),
    #[error("identity service issued an access token that could not be decoded")]
    MalformedToken,
}

impl From<ExchangeError> for ApiError {
    fn from(e: ExchangeError) -> Self {
        match e {
            ExchangeError::Confirm(ConfirmError::MissingAuthKey) => {
                ApiError::bad_request("authKey is required")
            }
            ExchangeError::Confirm(ConfirmError::Rejected { message, .. }) => {
                ApiError::unauthorized(message)
            }
            ExchangeError::Confirm(e @ ConfirmError::Network(_))
            | ExchangeError::Confirm(e @ ConfirmError::InvalidResponse { .. }) => {
                ApiError::bad_gateway(e.to_string())
            }
            e @ ExchangeError::MalformedToken => ApiError::bad_gateway(e.to_string()),
        }
    }
}

/// Exchange `auth_key` for a session and write it over any existing one.
///
/// The existing cookie set is cleared first, so a failed exchange leaves the
/// browser signed out rather than holding a half-replaced session.
pub async fn exchange_auth_key(
    state: &AppState,
    jar: CookieJar,
    auth_key: &str,
) -> (CookieJar, Result<Session, ExchangeError>) {
    let jar = clear_session(jar);

    let confirmation = match state.identity.confirm_auth(auth_key).await {
        Ok(confirmation) => confirmation,
        Err(e) => return (jar, Err(e.into())),
    };

    let Some(claims) = jwt::decode_claims(&confirmation.tokens.access_token) else {
        return (jar, Err(ExchangeError::MalformedToken));
    };

    let expires_in = confirmation.tokens.expires_in;
    let session = Session::established(
        confirmation.tokens,
        &claims,
        confirmation.user.as_ref(),
        Utc::now(),
    );
    let jar = apply_session(
        jar,
        &session,
        state.settings.cookies,
        SessionCookieOptions { expires_in },
    );

    tracing::info!(user_id = ?session.user_info().id, "Session established");
    (jar, Ok(session))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ConfirmRequest {
    #[serde(default)]
    auth_key: String,
}

#[derive(Serialize)]
struct ConfirmResponse {
    user: UserInfo,
}

async fn confirm(
    State(state): State<AppState>,
    jar: CookieJar,
    Json(payload): Json<ConfirmRequest>,
) -> Result<impl IntoResponse, (CookieJar, ApiError)> {
    let (jar, result) = exchange_auth_key(&state, jar, payload.auth_key.trim()).await;
    match result {
        Ok(session) => Ok((
            jar,
            Json(ConfirmResponse {
                user: session.user_info(),
            }),
        )),
        Err(e) => {
            tracing::warn!(error = %e, "Auth key exchange failed");
            Err((jar, e.into()))
        }
    }
}

async fn logout(jar: CookieJar) -> impl IntoResponse {
    tracing::debug!("Clearing session cookies");
    (StatusCode::NO_CONTENT, clear_session(jar))
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SessionSummary {
    authenticated: bool,
    user_id: Option<String>,
    user: Option<UserInfo>,
}

/// `authenticated` holds only while the access token outlives the guard's
/// expiry buffer; the identity fields are reported either way.
async fn session_summary(State(state): State<AppState>, jar: CookieJar) -> Json<SessionSummary> {
    let user = match session::read_session(&jar) {
        Ok(Some(session)) => session.user,
        _ => None,
    };
    let authenticated = session::access_token(&jar)
        .is_some_and(|token| !jwt::is_expired(&token, state.settings.expiry_buffer_secs));
    Json(SessionSummary {
        authenticated,
        user_id: session::current_user_id(&jar),
        user,
    })
}
