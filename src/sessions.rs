use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use time::{Duration, OffsetDateTime};
use tokio::sync::Mutex;
use tower_sessions::{
    cookie::{Key, KeyError, SameSite},
    service::SignedCookie,
    session::{Error as SessionError, Id, Record},
    session_store, Expiry, ExpiredDeletion, Session, SessionManagerLayer, SessionStore,
};

use crate::config::AppConfig;
use crate::users::User;

pub const SESSION_USER_KEY: &str = "auth.user";
pub const SESSION_CSRF_KEY: &str = "security.csrf";

/// Session layer as mounted on the router: in-process records behind a signed cookie.
pub type AppSessionLayer = SessionManagerLayer<SessionMemoryStore, SignedCookie>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionUser {
    pub id: u64,
    pub username: String,
}

impl SessionUser {
    pub fn new(id: u64, username: String) -> Self {
        Self { id, username }
    }
}

impl From<&User> for SessionUser {
    fn from(user: &User) -> Self {
        Self::new(user.id, user.username.clone())
    }
}

/// In-process session records. Expired records are invisible to `load` and are dropped by
/// [`SessionMemoryStore::prune_expired`], which the cleanup task runs periodically.
#[derive(Clone, Debug, Default)]
pub struct SessionMemoryStore {
    records: Arc<Mutex<HashMap<Id, Record>>>,
}

impl SessionMemoryStore {
    /// Remove every expired record, returning how many were dropped.
    pub async fn prune_expired(&self) -> usize {
        let now = OffsetDateTime::now_utc();
        let mut records = self.records.lock().await;
        let before = records.len();
        records.retain(|_, record| record.expiry_date > now);
        before - records.len()
    }

    #[cfg(test)]
    pub async fn record_count(&self) -> usize {
        self.records.lock().await.len()
    }
}

#[async_trait]
impl SessionStore for SessionMemoryStore {
    async fn create(&self, record: &mut Record) -> session_store::Result<()> {
        let mut records = self.records.lock().await;
        while records.contains_key(&record.id) {
            record.id = Id::default();
        }
        records.insert(record.id, record.clone());
        Ok(())
    }

    async fn save(&self, record: &Record) -> session_store::Result<()> {
        self.records.lock().await.insert(record.id, record.clone());
        Ok(())
    }

    async fn load(&self, session_id: &Id) -> session_store::Result<Option<Record>> {
        let now = OffsetDateTime::now_utc();
        Ok(self
            .records
            .lock()
            .await
            .get(session_id)
            .filter(|record| record.expiry_date > now)
            .cloned())
    }

    async fn delete(&self, session_id: &Id) -> session_store::Result<()> {
        self.records.lock().await.remove(session_id);
        Ok(())
    }
}

#[async_trait]
impl ExpiredDeletion for SessionMemoryStore {
    async fn delete_expired(&self) -> session_store::Result<()> {
        self.prune_expired().await;
        Ok(())
    }
}

/// Build the signed-cookie session layer over `store`. Records expire after
/// `session.max_age_hours` of inactivity.
pub fn session_layer(
    config: &AppConfig,
    key_material: &[u8],
    store: SessionMemoryStore,
) -> Result<AppSessionLayer, KeyError> {
    let key = Key::try_from(key_material)?;
    let max_age = Duration::hours(config.session.max_age_hours as i64);

    Ok(SessionManagerLayer::new(store)
        .with_name(config.session.cookie_name.clone())
        .with_secure(config.security.cookie_secure)
        .with_http_only(true)
        .with_same_site(SameSite::Lax)
        .with_path("/")
        .with_expiry(Expiry::OnInactivity(max_age))
        .with_signed(key))
}

/// Bind an authenticated user to the session under a fresh session id.
pub async fn start_session(session: &Session, user: &SessionUser) -> Result<(), SessionError> {
    session.cycle_id().await?;
    session.insert(SESSION_USER_KEY, user).await
}

/// Resolve the user bound to the session; unknown or expired sessions resolve to `None`.
pub async fn current_user(session: &Session) -> Result<Option<SessionUser>, SessionError> {
    session.get(SESSION_USER_KEY).await
}

/// Drop all session data and delete the record from the store. Safe to call repeatedly.
pub async fn end_session(session: &Session) -> Result<(), SessionError> {
    session.flush().await
}
