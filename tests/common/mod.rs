#![allow(dead_code)]

use axum::{
    Json, Router,
    body::Body,
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use axum_extra::extract::cookie::Cookie;
use chrono::{DateTime, Utc};
use jsonwebtoken::{EncodingKey, Header};
use serde_json::{Value, json};
use sessiongate::{ServerConfig, create_app, guard::GuardSettings};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use url::Url;

pub const LOGIN_URL: &str = "https://login.example.com/login";

/// Canned reply from the mock identity service.
#[derive(Clone)]
pub struct MockReply {
    pub status: StatusCode,
    pub body: Value,
    /// Sent verbatim instead of `body` when set.
    pub raw_body: Option<String>,
    /// Held back this long before answering.
    pub delay: Option<Duration>,
}

impl MockReply {
    pub fn ok(body: Value) -> Self {
        Self::status(StatusCode::OK, body)
    }

    pub fn status(status: StatusCode, body: Value) -> Self {
        Self {
            status,
            body,
            raw_body: None,
            delay: None,
        }
    }

    pub fn text(status: StatusCode, text: &str) -> Self {
        Self {
            raw_body: Some(text.to_string()),
            ..Self::status(status, Value::Null)
        }
    }

    pub fn delayed(self, delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            ..self
        }
    }

    async fn respond(&self) -> Response {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        match &self.raw_body {
            Some(text) => (self.status, text.clone()).into_response(),
            None => (self.status, Json(self.body.clone())).into_response(),
        }
    }
}

#[derive(Clone)]
struct MockState {
    refresh: MockReply,
    confirm: MockReply,
    refresh_calls: Arc<AtomicUsize>,
    confirm_calls: Arc<AtomicUsize>,
    refresh_bodies: Arc<Mutex<Vec<Value>>>,
    auth_keys: Arc<Mutex<Vec<String>>>,
}

/// Handle to a running mock identity service.
pub struct IdentityMock {
    pub url: Url,
    state: MockState,
}

impl IdentityMock {
    pub fn refresh_calls(&self) -> usize {
        self.state.refresh_calls.load(Ordering::SeqCst)
    }

    pub fn confirm_calls(&self) -> usize {
        self.state.confirm_calls.load(Ordering::SeqCst)
    }

    pub fn refresh_bodies(&self) -> Vec<Value> {
        self.state.refresh_bodies.lock().unwrap().clone()
    }

    pub fn auth_keys(&self) -> Vec<String> {
        self.state.auth_keys.lock().unwrap().clone()
    }
}

async fn refresh_handler(
    State(state): State<MockState>,
    Json(body): Json<Value>,
) -> Response {
    state.refresh_calls.fetch_add(1, Ordering::SeqCst);
    state.refresh_bodies.lock().unwrap().push(body);
    state.refresh.respond().await
}

async fn confirm_handler(
    State(state): State<MockState>,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    state.confirm_calls.fetch_add(1, Ordering::SeqCst);
    if let Some(key) = params.get("authKey") {
        state.auth_keys.lock().unwrap().push(key.clone());
    }
    state.confirm.respond().await
}

/// Start a mock identity service on a random local port.
pub async fn spawn_identity(refresh: MockReply, confirm: MockReply) -> IdentityMock {
    let state = MockState {
        refresh,
        confirm,
        refresh_calls: Arc::new(AtomicUsize::new(0)),
        confirm_calls: Arc::new(AtomicUsize::new(0)),
        refresh_bodies: Arc::new(Mutex::new(Vec::new())),
        auth_keys: Arc::new(Mutex::new(Vec::new())),
    };

    let app = Router::new()
        .route("/api/auth/refresh-token", post(refresh_handler))
        .route("/api/auth/confirm-auth", get(confirm_handler))
        .with_state(state.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind mock identity service");
    let addr: SocketAddr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    IdentityMock {
        url: Url::parse(&format!("http://{}", addr)).unwrap(),
        state,
    }
}

/// Identity service that fails every call with 500.
pub async fn spawn_unused_identity() -> IdentityMock {
    let reply = MockReply::status(
        StatusCode::INTERNAL_SERVER_ERROR,
        json!({"message": "unexpected call"}),
    );
    spawn_identity(reply.clone(), reply).await
}

pub fn test_config(identity_url: &Url) -> ServerConfig {
    ServerConfig {
        identity_url: identity_url.clone(),
        identity_timeout: Duration::from_secs(5),
        guard: GuardSettings::new(Url::parse(LOGIN_URL).unwrap()),
    }
}

pub fn create_test_app(identity: &IdentityMock) -> Router {
    create_app(&test_config(&identity.url)).expect("Failed to create app")
}

/// App whose identity calls give up after `timeout`.
pub fn create_test_app_with_timeout(identity_url: &Url, timeout: Duration) -> Router {
    let config = ServerConfig {
        identity_timeout: timeout,
        ..test_config(identity_url)
    };
    create_app(&config).expect("Failed to create app")
}

/// Parse a Set-Cookie header back into the session it carries.
pub fn decode_session_cookie(set_cookie: &str) -> sessiongate::session::Session {
    let cookie = Cookie::parse_encoded(set_cookie.to_string()).expect("Invalid Set-Cookie");
    sessiongate::session::Session::from_cookie_value(cookie.value()).expect("Invalid session")
}

/// Mint an HS256 access token for `user_id` expiring `expires_in_secs` from now.
pub fn mint_token(user_id: &str, expires_in_secs: i64) -> String {
    let now = Utc::now().timestamp();
    let claims = json!({
        "Uid": user_id,
        "Email": format!("{}@example.com", user_id),
        "FullName": format!("{} Trader", user_id),
        "http://schemas.microsoft.com/ws/2008/06/identity/claims/role": "Trader",
        "iat": now,
        "exp": now + expires_in_secs,
    });
    jsonwebtoken::encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(b"identity-test-secret"),
    )
    .expect("Failed to mint token")
}

/// JSON value of a `session` cookie.
pub fn session_json(token: &str, refresh_token: Option<&str>) -> String {
    let created_at: DateTime<Utc> = Utc::now();
    let mut session = json!({
        "token": token,
        "user": {"id": "u1", "email": "u1@example.com", "name": "u1 Trader", "role": "Trader"},
        "createdAt": created_at.to_rfc3339(),
        "updatedAt": created_at.to_rfc3339(),
    });
    if let Some(refresh_token) = refresh_token {
        session["refreshToken"] = json!(refresh_token);
    }
    session.to_string()
}

/// Cookie request header carrying `session` (percent-encoded like the browser sends it back).
pub fn session_cookie(value: &str) -> String {
    Cookie::new("session", value.to_string())
        .encoded()
        .to_string()
}

pub fn get_request(uri: &str, cookie: Option<&str>) -> axum::http::Request<Body> {
    let mut builder = axum::http::Request::builder().method("GET").uri(uri);
    if let Some(cookie) = cookie {
        builder = builder.header("cookie", cookie);
    }
    builder.body(Body::empty()).unwrap()
}

/// Extract Set-Cookie headers from response
pub fn extract_set_cookies(response: &axum::http::Response<Body>) -> Vec<String> {
    response
        .headers()
        .get_all("set-cookie")
        .iter()
        .filter_map(|v| v.to_str().ok())
        .map(|s| s.to_string())
        .collect()
}

/// The Set-Cookie header for `name`, if any.
pub fn find_cookie<'a>(cookies: &'a [String], name: &str) -> Option<&'a str> {
    let prefix = format!("{}=", name);
    cookies
        .iter()
        .find(|c| c.starts_with(&prefix))
        .map(String::as_str)
}

/// Check that the whole session cookie set is being cleared (Max-Age=0)
pub fn clears_session_set(cookies: &[String]) -> bool {
    sessiongate::cookies::SESSION_COOKIE_NAMES.iter().all(|name| {
        find_cookie(cookies, name).is_some_and(|c| c.contains("Max-Age=0"))
    })
}

pub fn location(response: &axum::http::Response<Body>) -> Option<&str> {
    response
        .headers()
        .get("location")
        .and_then(|v| v.to_str().ok())
}

pub async fn body_text(response: axum::http::Response<Body>) -> String {
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    String::from_utf8(body.to_vec()).unwrap()
}
