mod auth;
mod error;

use axum::Router;

use crate::state::AppState;

pub use auth::{ExchangeError, exchange_auth_key};
pub use error::ApiError;

/// Create the API router.
pub fn create_api_router(state: AppState) -> Router {
    Router::new()
        .nest("/auth", auth::router(state))
        .fallback(not_found)
}

async fn not_found() -> ApiError {
    ApiError::not_found("Not found")
}
