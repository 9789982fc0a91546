mod app_state;
mod auth;
mod cleanup;
mod config;
mod csrf;
mod files;
mod logging;
mod rate_limit;
mod server;
mod sessions;
mod templates;
mod users;

use std::net::SocketAddr;
use std::sync::Arc;

use app_state::AppState;
use config::AppConfig;
use logging::init_logging;
use server::router::build_router;
use sessions::{session_layer, SessionMemoryStore};
use thiserror::Error;
use tracing::info;
use users::{bootstrap_admin_user, JsonUserStore, UserStore, UserStoreError};

#[derive(Debug, Error)]
enum AppError {
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),
    #[error("User store error: {0}")]
    Users(#[from] UserStoreError),
    #[error("Session key error: {0}")]
    SessionKey(#[from] tower_sessions::cookie::KeyError),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Address parse error: {0}")]
    AddrParse(#[from] std::net::AddrParseError),
    #[error("Logging error: {0}")]
    Logging(String),
}

#[tokio::main]
async fn main() -> Result<(), AppError> {
    init_logging().map_err(|e| AppError::Logging(e.to_string()))?;

    let config = AppConfig::load()?;
    info!(
        upload_dir = %config.storage.upload_dir.display(),
        users_file = %config.storage.users_file.display(),
        max_upload_bytes = config.storage.max_upload_bytes,
        "configuration loaded"
    );

    let users: Arc<dyn UserStore> = Arc::new(JsonUserStore::new(
        config.storage.users_file.clone(),
        config.security.password_pepper.clone(),
    ));
    bootstrap_admin_user(users.as_ref(), &config).await?;

    let session_store = SessionMemoryStore::default();
    let session_layer = session_layer(&config, &config.session_key_bytes()?, session_store.clone())?;
    cleanup::spawn_session_cleanup(session_store);

    let addr = SocketAddr::new(config.server.bind_addr.parse()?, config.server.port);
    let app = build_router(AppState::new(users, config), session_layer);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("{} listening on http://{}", env!("CARGO_PKG_NAME"), addr);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}
