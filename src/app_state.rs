use crate::{
    config::AppConfig,
    files::FileStore,
    rate_limit::{LoginRateLimiter, RegistrationRateLimiter},
    users::UserStore,
};
use std::sync::Arc;

/// Application state shared across all handlers
#[derive(Clone)]
pub struct AppState {
    /// Account persistence
    pub users: Arc<dyn UserStore>,
    /// Upload directory
    pub files: Arc<FileStore>,
    /// Application configuration
    pub config: Arc<AppConfig>,
    /// Shared login rate limiter
    pub login_rate_limiter: Arc<LoginRateLimiter>,
    /// Registration rate limiter
    pub registration_rate_limiter: Arc<RegistrationRateLimiter>,
}

impl AppState {
    pub fn new(users: Arc<dyn UserStore>, config: AppConfig) -> Self {
        let files = FileStore::new(
            config.storage.upload_dir.clone(),
            config.storage.max_upload_bytes,
        );

        Self {
            users,
            files: Arc::new(files),
            config: Arc::new(config),
            login_rate_limiter: Arc::new(LoginRateLimiter::new()),
            registration_rate_limiter: Arc::new(RegistrationRateLimiter::new()),
        }
    }

    pub fn users(&self) -> &dyn UserStore {
        self.users.as_ref()
    }

    pub fn files(&self) -> &FileStore {
        &self.files
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn login_rate_limiter(&self) -> &LoginRateLimiter {
        &self.login_rate_limiter
    }

    pub fn registration_rate_limiter(&self) -> &RegistrationRateLimiter {
        &self.registration_rate_limiter
    }
}
