//! Shared application state

use sqlx::PgPool;
use std::sync::Arc;

use crate::{
    auth::{AuthState, JwtManager},
    chat::ChatState,
    config::Config,
};

/// Application state shared across all request handlers
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub pool: PgPool,
    pub jwt_manager: JwtManager,
    pub chat: ChatState,
}

impl AppState {
    /// Create application state from configuration and a connected pool
    pub fn new(config: Config, pool: PgPool) -> Self {
        let jwt_manager = JwtManager::new(&config.jwt_secret, config.jwt_expiry_hours);
        Self {
            config: Arc::new(config),
            pool,
            jwt_manager,
            chat: ChatState::new(),
        }
    }

    /// State handed to the auth middleware layer
    pub fn auth_state(&self) -> AuthState {
        AuthState::new(self.jwt_manager.clone())
    }
}
