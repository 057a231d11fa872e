//! Shared application state.

use std::sync::Arc;

use crate::guard::{GuardSettings, HasGuardBackend};
use crate::identity::IdentityClient;

/// State shared by the guard, the pages and the auth API.
#[derive(Clone)]
pub struct AppState {
    pub identity: IdentityClient,
    pub settings: Arc<GuardSettings>,
}

impl HasGuardBackend for AppState {
    fn identity(&self) -> &IdentityClient {
        &self.identity
    }

    fn guard_settings(&self) -> &GuardSettings {
        &self.settings
    }
}
