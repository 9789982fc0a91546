use base64::engine::general_purpose;
use base64::Engine;
use config::{Config, ConfigError as BaseConfigError, File};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use thiserror::Error;

use crate::server::constants::{
    MAX_MAX_UPLOAD_BYTES, MIN_MAX_UPLOAD_BYTES, MIN_SESSION_KEY_BYTES,
};

const DEFAULT_BOOTSTRAP_USERNAME: &str = "admin";
pub const DEFAULT_BOOTSTRAP_PASSWORD: &str = "admin123";

#[derive(Debug, Deserialize, Clone, Serialize)]
pub struct ServerConfig {
    pub bind_addr: String,
    pub port: u16,
}

#[derive(Debug, Deserialize, Clone, Serialize)]
pub struct StorageConfig {
    pub upload_dir: PathBuf,
    pub users_file: PathBuf,
    pub max_upload_bytes: u64,
}

#[derive(Debug, Deserialize, Clone, Serialize)]
pub struct SecurityConfig {
    pub session_key: String,
    pub cookie_secure: bool,
    pub password_pepper: Option<String>,
}

#[derive(Debug, Deserialize, Clone, Serialize)]
pub struct SessionConfig {
    pub cookie_name: String,
    pub max_age_hours: u64,
}

#[derive(Debug, Deserialize, Clone, Serialize)]
pub struct BootstrapConfig {
    pub admin_username: String,
    pub admin_password: String,
}

#[derive(Debug, Deserialize, Clone, Serialize)]
pub struct UiConfig {
    pub brand_name: String,
}

#[derive(Debug, Deserialize, Clone, Serialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub storage: StorageConfig,
    pub security: SecurityConfig,
    pub session: SessionConfig,
    pub bootstrap: BootstrapConfig,
    pub ui: UiConfig,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Configuration error: {0}")]
    Config(#[from] BaseConfigError),
    #[error("Storage directory error: {0}")]
    StorageDir(String),
    #[error("Invalid configuration: {0}")]
    Validation(String),
}

impl AppConfig {
    pub fn load() -> Result<Self, ConfigError> {
        // Load .env file if it exists
        dotenvy::dotenv().ok();

        let mut settings = Config::builder();

        settings = settings.add_source(config::Config::try_from(&AppConfig::default())?);
        settings = settings.add_source(File::with_name("config").required(false));

        settings = settings
            // Server settings
            .set_override_option("server.bind_addr", env_string("SERVER_BIND_ADDR"))?
            .set_override_option("server.port", env_parsed::<u16>("SERVER_PORT"))?
            // Storage settings
            .set_override_option("storage.upload_dir", env_string("UPLOAD_DIR"))?
            .set_override_option("storage.users_file", env_string("USERS_FILE"))?
            .set_override_option(
                "storage.max_upload_bytes",
                env_parsed::<u64>("MAX_UPLOAD_BYTES"),
            )?
            // Security settings
            .set_override_option("security.session_key", env_string("SESSION_KEY"))?
            .set_override_option("security.cookie_secure", env_parsed::<bool>("COOKIE_SECURE"))?
            .set_override_option("security.password_pepper", env_string("PASSWORD_PEPPER"))?
            // Session settings
            .set_override_option("session.cookie_name", env_string("SESSION_COOKIE_NAME"))?
            .set_override_option(
                "session.max_age_hours",
                env_parsed::<u64>("SESSION_MAX_AGE_HOURS"),
            )?
            // Bootstrap account
            .set_override_option(
                "bootstrap.admin_username",
                env_string("BOOTSTRAP_ADMIN_USERNAME"),
            )?
            .set_override_option(
                "bootstrap.admin_password",
                env_string("BOOTSTRAP_ADMIN_PASSWORD"),
            )?
            // UI settings
            .set_override_option("ui.brand_name", env_string("UI_BRAND_NAME"))?;

        let settings = settings.build()?;

        let mut config: AppConfig = settings.try_deserialize()?;

        config.validate()?;
        config.ensure_storage_dirs()?;

        Ok(config)
    }

    fn validate(&mut self) -> Result<(), ConfigError> {
        if self.server.port == 0 {
            return Err(ConfigError::Validation(
                "Server port cannot be 0".to_string(),
            ));
        }

        if self.storage.max_upload_bytes < MIN_MAX_UPLOAD_BYTES {
            return Err(ConfigError::Validation(
                "MAX_UPLOAD_BYTES must be at least 1KB".to_string(),
            ));
        }
        if self.storage.max_upload_bytes > MAX_MAX_UPLOAD_BYTES {
            return Err(ConfigError::Validation(
                "MAX_UPLOAD_BYTES cannot exceed 5GB".to_string(),
            ));
        }

        if self.session.max_age_hours == 0 || self.session.max_age_hours > 24 * 30 {
            return Err(ConfigError::Validation(
                "SESSION_MAX_AGE_HOURS must be between 1 and 720 (30 days)".to_string(),
            ));
        }

        if self.session.cookie_name.trim().is_empty() {
            return Err(ConfigError::Validation(
                "SESSION_COOKIE_NAME cannot be empty".to_string(),
            ));
        }

        if self.session_key_bytes()?.len() < MIN_SESSION_KEY_BYTES {
            return Err(ConfigError::Validation(format!(
                "SESSION_KEY must be at least {MIN_SESSION_KEY_BYTES} bytes"
            )));
        }

        if self.bootstrap.admin_username.trim().is_empty()
            || self.bootstrap.admin_password.is_empty()
        {
            return Err(ConfigError::Validation(
                "Bootstrap administrator credentials cannot be empty".to_string(),
            ));
        }

        Ok(())
    }

    fn ensure_storage_dirs(&self) -> Result<(), ConfigError> {
        if let Err(e) = fs::create_dir_all(&self.storage.upload_dir) {
            return Err(ConfigError::StorageDir(format!(
                "Cannot create upload directory {}: {}",
                self.storage.upload_dir.display(),
                e
            )));
        }

        if let Some(parent) = self.storage.users_file.parent() {
            if !parent.as_os_str().is_empty() {
                if let Err(e) = fs::create_dir_all(parent) {
                    return Err(ConfigError::StorageDir(format!(
                        "Cannot create user database directory {}: {}",
                        parent.display(),
                        e
                    )));
                }
            }
        }

        Ok(())
    }

    /// Raw signing key material, decoding a `base64:` prefixed value when present.
    pub fn session_key_bytes(&self) -> Result<Vec<u8>, ConfigError> {
        let key = &self.security.session_key;
        match key.strip_prefix("base64:") {
            Some(encoded) => general_purpose::STANDARD.decode(encoded).map_err(|e| {
                ConfigError::Validation(format!("Invalid base64 for SESSION_KEY: {}", e))
            }),
            None => Ok(key.as_bytes().to_vec()),
        }
    }

    /// Whether the bootstrap account still uses the built-in password.
    pub fn uses_default_bootstrap_password(&self) -> bool {
        self.bootstrap.admin_password == DEFAULT_BOOTSTRAP_PASSWORD
    }
}

fn env_string(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|value| !value.is_empty())
}

fn env_parsed<T: std::str::FromStr>(name: &str) -> Option<T> {
    env_string(name).and_then(|value| value.parse().ok())
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                bind_addr: "0.0.0.0".to_string(),
                port: 3000,
            },
            storage: StorageConfig {
                upload_dir: PathBuf::from("./data/uploads"),
                users_file: PathBuf::from("./data/users.json"),
                max_upload_bytes: 10 * 1024 * 1024, // 10MB
            },
            security: SecurityConfig {
                session_key: "".to_string(), // Must be provided by user
                cookie_secure: false,
                password_pepper: None,
            },
            session: SessionConfig {
                cookie_name: "filehost.sid".to_string(),
                max_age_hours: 24,
            },
            bootstrap: BootstrapConfig {
                admin_username: DEFAULT_BOOTSTRAP_USERNAME.to_string(),
                admin_password: DEFAULT_BOOTSTRAP_PASSWORD.to_string(),
            },
            ui: UiConfig {
                brand_name: "FileHost".to_string(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config_with_key(key: &str) -> AppConfig {
        let mut config = AppConfig::default();
        config.security.session_key = key.to_string();
        config
    }

    #[test]
    fn missing_session_key_is_rejected() {
        let mut config = AppConfig::default();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("SESSION_KEY"));
    }

    #[test]
    fn short_session_key_is_rejected() {
        let mut config = config_with_key("too-short");
        assert!(config.validate().is_err());
    }

    #[test]
    fn long_raw_session_key_is_accepted() {
        let mut config = config_with_key(&"k".repeat(64));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn base64_session_key_is_decoded() {
        let encoded = general_purpose::STANDARD.encode([7u8; 64]);
        let config = config_with_key(&format!("base64:{encoded}"));
        assert_eq!(config.session_key_bytes().unwrap(), vec![7u8; 64]);
    }

    #[test]
    fn invalid_base64_session_key_is_rejected() {
        let mut config = config_with_key("base64:not valid base64!!");
        assert!(config.validate().is_err());
    }

    #[test]
    fn upload_limit_bounds_are_enforced() {
        let mut config = config_with_key(&"k".repeat(64));
        config.storage.max_upload_bytes = 10;
        assert!(config.validate().is_err());

        config.storage.max_upload_bytes = MAX_MAX_UPLOAD_BYTES + 1;
        assert!(config.validate().is_err());
    }

    #[test]
    fn defaults_match_documented_values() {
        let config = AppConfig::default();
        assert_eq!(config.server.port, 3000);
        assert_eq!(config.storage.max_upload_bytes, 10 * 1024 * 1024);
        assert!(config.uses_default_bootstrap_password());
    }
}
