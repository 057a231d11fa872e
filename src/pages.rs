//! Gateway pages.
//!
//! The dashboard itself is rendered elsewhere; these pages only anchor the
//! public entry points and the protected trading view.

use axum::{
    Extension, Router,
    extract::{Query, State},
    http::{StatusCode, header},
    response::{Html, IntoResponse, Response},
    routing::get,
};
use axum_extra::extract::cookie::CookieJar;
use serde::Deserialize;

use crate::api::exchange_auth_key;
use crate::guard::{AuthenticatedSession, login_redirect};
use crate::state::AppState;

/// Path of the protected trading view.
pub const TRADING_VIEW_PATH: &str = "/trading-view";

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(home))
        .route("/sign-in", get(sign_in))
        .route(TRADING_VIEW_PATH, get(trading_view))
        .with_state(state)
}

async fn home() -> Html<String> {
    page(
        "Trading Dashboard",
        &format!(r#"<a href="{}">Open trading view</a>"#, TRADING_VIEW_PATH),
    )
}

async fn sign_in(State(state): State<AppState>) -> Html<String> {
    page(
        "Sign in",
        &format!(
            r#"<a href="{}">Continue to login</a>"#,
            escape(state.settings.login_url.as_str())
        ),
    )
}

#[derive(Deserialize)]
struct TradingViewParams {
    ctx: Option<String>,
}

async fn trading_view(
    State(state): State<AppState>,
    Query(params): Query<TradingViewParams>,
    jar: CookieJar,
    session: Option<Extension<AuthenticatedSession>>,
) -> Response {
    if let Some(auth_key) = params.ctx.as_deref().filter(|key| !key.is_empty()) {
        let (jar, result) = exchange_auth_key(&state, jar, auth_key).await;
        return match result {
            // Reload without the key so it never lingers in history.
            Ok(_) => (
                StatusCode::FOUND,
                jar,
                [(header::LOCATION, TRADING_VIEW_PATH)],
            )
                .into_response(),
            Err(e) => {
                tracing::warn!(error = %e, "Auth key exchange failed");
                login_redirect(jar, &state.settings.login_url)
            }
        };
    }

    // Present whenever the guard is in front of this route.
    let Some(Extension(session)) = session else {
        return login_redirect(jar, &state.settings.login_url);
    };

    let user = session.session.user_info();
    let name = user
        .name
        .or(user.email)
        .unwrap_or_else(|| "trader".to_string());
    page(
        "Trading View",
        &format!(r#"<p id="user">Signed in as {}</p>"#, escape(&name)),
    )
    .into_response()
}

fn page(title: &str, body: &str) -> Html<String> {
    Html(format!(
        "<!doctype html><html><head><meta charset=\"utf-8\"><title>{}</title></head><body><h1>{}</h1>{}</body></html>",
        title, title, body
    ))
}

fn escape(text: &str) -> String {
    text.chars()
        .map(|c| match c {
            '&' => "&amp;".to_string(),
            '<' => "&lt;".to_string(),
            '>' => "&gt;".to_string(),
            '"' => "&quot;".to_string(),
            '\'' => "&#39;".to_string(),
            c => c.to_string(),
        })
        .collect()
}
