//! Application state

use std::sync::Arc;

use campuslink_core::{CoreConfig, LoginFlow, SessionStore, TokenService, TunnelCipher};

/// Shared across handlers; built once at startup
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<SessionStore>,
    pub login: Arc<LoginFlow>,
}

impl AppState {
    pub fn from_config(config: &CoreConfig) -> Self {
        let tokens = TokenService::new(&config.token);
        let store = Arc::new(SessionStore::new(&config.session, tokens));
        let tunnel = TunnelCipher::new(&config.tunnel);
        let login = Arc::new(LoginFlow::new(
            Arc::clone(&store),
            tunnel,
            config.provider.clone(),
        ));
        Self { store, login }
    }
}
