use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::{fs, io::AsyncWriteExt, sync::Mutex};
use tracing::{error, info, warn};

use crate::auth::{self, AuthError};
use crate::config::AppConfig;

/// A registered account as persisted in the user collection file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: u64,
    pub username: String,
    pub password_hash: String,
}

#[derive(Debug, Error)]
pub enum UserStoreError {
    #[error("Username '{0}' is already taken")]
    DuplicateUsername(String),
    #[error("Invalid username or password")]
    Authentication,
    #[error("User storage error: {0}")]
    Storage(#[from] std::io::Error),
    #[error("User database is corrupt: {0}")]
    Corrupt(serde_json::Error),
    #[error("Failed to encode user database: {0}")]
    Encode(serde_json::Error),
    #[error("Password hashing failed: {0}")]
    Hashing(#[from] AuthError),
    #[error("Bootstrap credentials are invalid: {0}")]
    Bootstrap(&'static str),
}

/// Persistence boundary for user accounts so route logic never touches the backing file.
#[async_trait]
pub trait UserStore: Send + Sync {
    /// All users in id order.
    async fn list_users(&self) -> Result<Vec<User>, UserStoreError>;

    /// Exact, case-sensitive lookup.
    async fn find_user(&self, username: &str) -> Result<Option<User>, UserStoreError>;

    /// Hash the password and append a new user, failing on a duplicate username.
    async fn add_user(&self, username: &str, password: &str) -> Result<User, UserStoreError>;

    /// Return the user when the password matches its stored hash.
    async fn verify_credentials(
        &self,
        username: &str,
        password: &str,
    ) -> Result<User, UserStoreError>;
}

/// [`UserStore`] backed by a single JSON file that is rewritten on every change.
pub struct JsonUserStore {
    path: PathBuf,
    pepper: Option<String>,
    write_lock: Mutex<()>,
}

impl JsonUserStore {
    pub fn new(path: impl Into<PathBuf>, pepper: Option<String>) -> Self {
        Self {
            path: path.into(),
            pepper,
            write_lock: Mutex::new(()),
        }
    }

    async fn read_all(&self) -> Result<Vec<User>, UserStoreError> {
        let raw = match fs::read(&self.path).await {
            Ok(raw) => raw,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => {
                error!(target: "users", %err, path = %self.path.display(), "failed to read user database");
                return Err(err.into());
            }
        };

        if raw.iter().all(u8::is_ascii_whitespace) {
            return Ok(Vec::new());
        }

        serde_json::from_slice(&raw).map_err(|err| {
            error!(target: "users", %err, path = %self.path.display(), "user database is not valid JSON");
            UserStoreError::Corrupt(err)
        })
    }

    /// Replace the file contents atomically so readers never observe a half-written collection.
    async fn write_all(&self, users: &[User]) -> Result<(), UserStoreError> {
        let payload = serde_json::to_vec_pretty(users).map_err(UserStoreError::Encode)?;
        let temp_path = self.path.with_extension("json.tmp");

        let mut file = fs::File::create(&temp_path).await?;
        if let Err(err) = write_and_sync(&mut file, &payload).await {
            drop(file);
            let _ = fs::remove_file(&temp_path).await;
            return Err(err.into());
        }
        drop(file);

        if let Err(err) = fs::rename(&temp_path, &self.path).await {
            let _ = fs::remove_file(&temp_path).await;
            return Err(err.into());
        }

        sync_parent_dir(&self.path).await?;
        Ok(())
    }
}

/// Persist the rename itself by syncing the directory entry.
#[cfg(unix)]
async fn sync_parent_dir(path: &Path) -> std::io::Result<()> {
    match path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        Some(parent) => fs::File::open(parent).await?.sync_all().await,
        None => fs::File::open(".").await?.sync_all().await,
    }
}

#[cfg(not(unix))]
async fn sync_parent_dir(_path: &Path) -> std::io::Result<()> {
    Ok(())
}

async fn write_and_sync(file: &mut fs::File, payload: &[u8]) -> std::io::Result<()> {
    file.write_all(payload).await?;
    file.flush().await?;
    file.sync_all().await
}

#[async_trait]
impl UserStore for JsonUserStore {
    async fn list_users(&self) -> Result<Vec<User>, UserStoreError> {
        self.read_all().await
    }

    async fn find_user(&self, username: &str) -> Result<Option<User>, UserStoreError> {
        let users = self.read_all().await?;
        Ok(users.into_iter().find(|user| user.username == username))
    }

    async fn add_user(&self, username: &str, password: &str) -> Result<User, UserStoreError> {
        // Cheap rejection before paying for the hash; the authoritative check happens under the lock.
        if self.find_user(username).await?.is_some() {
            return Err(UserStoreError::DuplicateUsername(username.to_string()));
        }

        let password_hash = auth::hash_password(password, self.pepper.as_deref()).await?;

        let _guard = self.write_lock.lock().await;
        let mut users = self.read_all().await?;
        if users.iter().any(|user| user.username == username) {
            return Err(UserStoreError::DuplicateUsername(username.to_string()));
        }

        let user = User {
            id: users.len() as u64 + 1,
            username: username.to_string(),
            password_hash,
        };
        users.push(user.clone());
        self.write_all(&users).await?;

        info!(target: "users", user_id = user.id, username = %user.username, "user created");

        Ok(user)
    }

    async fn verify_credentials(
        &self,
        username: &str,
        password: &str,
    ) -> Result<User, UserStoreError> {
        let Some(user) = self.find_user(username).await? else {
            return Err(UserStoreError::Authentication);
        };

        match auth::verify_password(password, &user.password_hash, self.pepper.as_deref()).await {
            Ok(()) => Ok(user),
            Err(AuthError::InvalidCredentials) => Err(UserStoreError::Authentication),
            Err(err) => Err(err.into()),
        }
    }
}

/// Provision the configured administrator account when the user collection is empty.
pub async fn bootstrap_admin_user(
    store: &dyn UserStore,
    config: &AppConfig,
) -> Result<(), UserStoreError> {
    if !store.list_users().await?.is_empty() {
        return Ok(());
    }

    let username = auth::normalize_username(&config.bootstrap.admin_username)
        .map_err(|_| UserStoreError::Bootstrap("username failed validation"))?;
    auth::validate_password_strength(&config.bootstrap.admin_password)
        .map_err(|_| UserStoreError::Bootstrap("password is too short"))?;

    let user = store
        .add_user(&username, &config.bootstrap.admin_password)
        .await?;

    if config.uses_default_bootstrap_password() {
        warn!(
            target: "users",
            username = %user.username,
            "bootstrap administrator uses the default password; set BOOTSTRAP_ADMIN_PASSWORD"
        );
    }
    info!(target: "users", username = %user.username, "bootstrap administrator account created");

    Ok(())
}
