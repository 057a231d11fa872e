//! Route guard middleware.
//!
//! Runs in front of every page. Protected paths need a session whose access
//! token is still valid; a token inside the expiry buffer is refreshed once
//! through the identity service. Anything unrecoverable clears the session
//! cookie set and redirects to the external login page.

use axum::{
    extract::{Request, State},
    http::{HeaderValue, StatusCode, Uri, header},
    middleware::Next,
    response::{IntoResponse, Response},
};
use axum_extra::extract::cookie::CookieJar;
use chrono::Utc;
use url::Url;

use crate::cookies::{CookieSettings, SessionCookieOptions, apply_session, clear_session};
use crate::identity::{IdentityClient, RefreshError};
use crate::jwt::{self, Claims, DEFAULT_EXPIRY_BUFFER_SECS};
use crate::session::{Session, SessionError, read_session};

/// Query parameter carrying the one-time auth key.
pub const DEFAULT_AUTH_EXCHANGE_PARAM: &str = "ctx";

/// Path prefixes that are never guarded.
const BYPASS_PREFIXES: &[&str] = &["/_next/", "/static/", "/public/", "/api/"];

/// Guard configuration.
#[derive(Debug, Clone)]
pub struct GuardSettings {
    /// External login page used for every redirect.
    pub login_url: Url,
    /// Paths (and their subpaths) that require a session.
    pub protected_prefixes: Vec<String>,
    /// Paths that are always public, even under a protected prefix.
    pub public_paths: Vec<String>,
    pub auth_exchange_param: String,
    pub expiry_buffer_secs: i64,
    pub cookies: CookieSettings,
}

impl GuardSettings {
    pub fn new(login_url: Url) -> Self {
        Self {
            login_url,
            protected_prefixes: vec!["/trading-view".into()],
            public_paths: vec!["/".into(), "/sign-in".into()],
            auth_exchange_param: DEFAULT_AUTH_EXCHANGE_PARAM.into(),
            expiry_buffer_secs: DEFAULT_EXPIRY_BUFFER_SECS,
            cookies: CookieSettings::default(),
        }
    }
}

/// Trait for state types the guard can run against.
pub trait HasGuardBackend {
    fn identity(&self) -> &IdentityClient;
    fn guard_settings(&self) -> &GuardSettings;
}

/// How a request path is treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathClass {
    /// Static assets and API routes: not guarded at all.
    Bypass,
    Public,
    Protected,
}

/// Why a protected request was sent back to the login page.
#[derive(Debug, thiserror::Error)]
pub enum AuthFailure {
    #[error("no session cookie")]
    NoSession,
    #[error(transparent)]
    Session(#[from] SessionError),
    #[error("access token expired and no refresh token is available")]
    MissingRefreshToken,
    #[error(transparent)]
    Refresh(#[from] RefreshError),
}

/// Outcome of guarding one request.
#[derive(Debug)]
pub enum Decision {
    /// Not guarded, or an auth-key exchange is in flight.
    PassThrough,
    /// Session valid; forward with its token.
    Forward { session: Session, claims: Claims },
    /// Token refreshed; forward with the new token and rewrite the cookies.
    Refreshed {
        session: Session,
        claims: Claims,
        expires_in: Option<i64>,
    },
    Reject(AuthFailure),
}

/// Request extension describing the session a protected request carries.
#[derive(Debug, Clone)]
pub struct AuthenticatedSession {
    pub session: Session,
    pub claims: Claims,
}

/// Classify a request path.
pub fn classify(path: &str, settings: &GuardSettings) -> PathClass {
    if is_bypass(path) {
        return PathClass::Bypass;
    }
    if settings
        .public_paths
        .iter()
        .any(|public| matches_path(path, public))
    {
        return PathClass::Public;
    }
    if settings
        .protected_prefixes
        .iter()
        .any(|prefix| matches_path(path, prefix))
    {
        return PathClass::Protected;
    }
    // Only the explicit allow-list is enforced.
    PathClass::Public
}

fn is_bypass(path: &str) -> bool {
    if path == "/api" || path == "/favicon.ico" {
        return true;
    }
    if BYPASS_PREFIXES.iter().any(|prefix| path.starts_with(prefix)) {
        return true;
    }
    path.rsplit('/').next().is_some_and(|last| last.contains('.'))
}

/// `pattern` matches itself and, unless it is the root, its subpaths.
fn matches_path(path: &str, pattern: &str) -> bool {
    let pattern = normalize(pattern);
    let path = normalize(path);
    if pattern == "/" {
        return path == "/";
    }
    path == pattern
        || path
            .strip_prefix(pattern)
            .is_some_and(|rest| rest.starts_with('/'))
}

fn normalize(path: &str) -> &str {
    match path.trim_end_matches('/') {
        "" => "/",
        trimmed => trimmed,
    }
}

fn has_auth_exchange(query: Option<&str>, param: &str) -> bool {
    query.is_some_and(|query| {
        url::form_urlencoded::parse(query.as_bytes())
            .any(|(key, value)| key == param && !value.is_empty())
    })
}

/// Decide what to do with a request. Calls the identity service at most once.
pub async fn evaluate<S>(uri: &Uri, jar: &CookieJar, state: &S) -> Decision
where
    S: HasGuardBackend + Sync,
{
    let settings = state.guard_settings();
    let path = uri.path();

    match classify(path, settings) {
        PathClass::Bypass | PathClass::Public => return Decision::PassThrough,
        PathClass::Protected => {}
    }

    // The page performs the exchange itself; redirecting now would lose the key.
    if has_auth_exchange(uri.query(), &settings.auth_exchange_param) {
        tracing::debug!(path = %path, "Auth exchange in progress, passing through");
        return Decision::PassThrough;
    }

    let session = match read_session(jar) {
        Ok(Some(session)) => session,
        Ok(None) => return Decision::Reject(AuthFailure::NoSession),
        Err(e) => return Decision::Reject(e.into()),
    };

    if !jwt::is_expired(&session.token, settings.expiry_buffer_secs) {
        let claims = jwt::decode_claims(&session.token).unwrap_or_default();
        return Decision::Forward { session, claims };
    }

    let Some(refresh_token) = session.refresh_token.clone() else {
        return Decision::Reject(AuthFailure::MissingRefreshToken);
    };

    tracing::debug!(path = %path, "Access token expired, refreshing");
    let pair = match state.identity().refresh(&refresh_token).await {
        Ok(pair) => pair,
        Err(e) => return Decision::Reject(e.into()),
    };

    let Some(claims) = jwt::decode_claims(&pair.access_token) else {
        return Decision::Reject(SessionError::MalformedToken.into());
    };

    let expires_in = pair.expires_in;
    let session = session.refreshed(pair, &claims, Utc::now());
    Decision::Refreshed {
        session,
        claims,
        expires_in,
    }
}

/// Axum middleware enforcing the session on protected paths.
pub async fn route_guard<S>(State(state): State<S>, mut request: Request, next: Next) -> Response
where
    S: HasGuardBackend + Send + Sync,
{
    let jar = CookieJar::from_headers(request.headers());
    let settings = state.guard_settings();
    let decision = evaluate(request.uri(), &jar, &state).await;

    match decision {
        Decision::PassThrough => next.run(request).await,
        Decision::Forward { session, claims } => {
            if let Err(failure) = authorize(&mut request, session, claims) {
                return reject(jar, request.uri(), failure, &settings.login_url);
            }
            next.run(request).await
        }
        Decision::Refreshed {
            session,
            claims,
            expires_in,
        } => {
            let jar = apply_session(
                jar,
                &session,
                settings.cookies,
                SessionCookieOptions { expires_in },
            );
            if let Err(failure) = authorize(&mut request, session, claims) {
                return reject(jar, request.uri(), failure, &settings.login_url);
            }
            tracing::info!(path = %request.uri().path(), "Session refreshed");
            let response = next.run(request).await;
            (jar, response).into_response()
        }
        Decision::Reject(failure) => reject(jar, request.uri(), failure, &settings.login_url),
    }
}

fn authorize(request: &mut Request, session: Session, claims: Claims) -> Result<(), AuthFailure> {
    let bearer = HeaderValue::from_str(&format!("Bearer {}", session.token))
        .map_err(|_| AuthFailure::Session(SessionError::MalformedToken))?;
    request.headers_mut().insert(header::AUTHORIZATION, bearer);
    request
        .extensions_mut()
        .insert(AuthenticatedSession { session, claims });
    Ok(())
}

fn reject(jar: CookieJar, uri: &Uri, failure: AuthFailure, login_url: &Url) -> Response {
    match &failure {
        AuthFailure::NoSession => {
            tracing::debug!(path = %uri.path(), "No session, redirecting to login")
        }
        _ => tracing::info!(path = %uri.path(), reason = %failure, "Session rejected, redirecting to login"),
    }
    login_redirect(jar, login_url)
}

/// `302 Found` to the login page with the session cookie set cleared.
pub fn login_redirect(jar: CookieJar, login_url: &Url) -> Response {
    (
        StatusCode::FOUND,
        clear_session(jar),
        [(header::LOCATION, login_url.as_str().to_string())],
    )
        .into_response()
}
