use subtle::ConstantTimeEq;
use tower_sessions::{session::Error as SessionError, Session};
use tracing::{error, warn};

use crate::sessions::SESSION_CSRF_KEY;

const CSRF_TOKEN_LENGTH: usize = 64;

/// Return the form token bound to this session, minting one on first use.
pub async fn ensure_csrf_token(session: &Session) -> Result<String, SessionError> {
    if let Some(token) = session.get::<String>(SESSION_CSRF_KEY).await? {
        return Ok(token);
    }

    let token = nanoid::nanoid!(CSRF_TOKEN_LENGTH);
    session.insert(SESSION_CSRF_KEY, &token).await?;
    Ok(token)
}

pub async fn rotate_csrf_token(session: &Session) -> Result<String, SessionError> {
    let _ = session.remove::<String>(SESSION_CSRF_KEY).await?;
    ensure_csrf_token(session).await
}

/// Constant-time comparison of a submitted token with the session copy.
pub async fn validate_csrf_token(session: &Session, provided: &str) -> Result<bool, SessionError> {
    let Some(expected) = session.get::<String>(SESSION_CSRF_KEY).await? else {
        return Ok(false);
    };

    Ok(expected.as_bytes().ct_eq(provided.as_bytes()).unwrap_u8() == 1)
}

/// Validate a submitted form token, rotating it on mismatch. Session failures count as invalid.
pub async fn check_form_token(session: &Session, provided: &str, action: &str) -> bool {
    match validate_csrf_token(session, provided).await {
        Ok(true) => true,
        Ok(false) => {
            warn!(target: "csrf", action, "invalid CSRF token");
            if let Err(err) = rotate_csrf_token(session).await {
                error!(target: "csrf", %err, action, "failed to rotate CSRF token after mismatch");
            }
            false
        }
        Err(err) => {
            error!(target: "csrf", %err, action, "failed to validate CSRF token");
            false
        }
    }
}

/// Rotate after a successful state change; failures are logged but never block the request.
pub async fn rotate_after(session: &Session, action: &str) {
    if let Err(err) = rotate_csrf_token(session).await {
        error!(target: "csrf", %err, action, "failed to rotate CSRF token");
    }
}
