use axum::{
    extract::Request,
    middleware::Next,
    response::{IntoResponse, Redirect, Response},
};
use serde::Deserialize;
use tower_sessions::Session;
use tracing::{debug, error};

use crate::{
    app_state::AppState,
    sessions::{current_user, SessionUser},
    templates::LayoutContext,
};

/// Status messages echoed back through the query string after a redirect.
#[derive(Debug, Default, Deserialize)]
pub struct FlashQuery {
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub success: Option<String>,
}

/// Form body for actions whose only field is the CSRF token.
#[derive(Debug, Deserialize)]
pub struct CsrfForm {
    #[serde(default)]
    pub csrf_token: String,
}

/// Build a [`LayoutContext`] from the current session, falling back to a state-only context when
/// the session lookup fails.
pub async fn layout_from_session(
    state: &AppState,
    session: &Session,
    title: &str,
) -> LayoutContext {
    match LayoutContext::from_session(state, session, title).await {
        Ok(layout) => layout,
        Err(err) => {
            error!(target: "templates", %err, "failed to build layout context from session");
            LayoutContext::from_state(state, title)
        }
    }
}

/// Resolve the session user, treating session store failures as anonymous.
pub async fn session_user(session: &Session) -> Option<SessionUser> {
    match current_user(session).await {
        Ok(user) => user,
        Err(err) => {
            error!(target: "sessions", %err, "failed to read user from session");
            None
        }
    }
}

/// Auth gate for protected routes: exposes the signed-in [`SessionUser`] as a request extension
/// or redirects anonymous visitors to the login page.
pub async fn require_login(session: Session, mut request: Request, next: Next) -> Response {
    match session_user(&session).await {
        Some(user) => {
            request.extensions_mut().insert(user);
            next.run(request).await
        }
        None => {
            debug!(target: "auth", path = %request.uri().path(), "anonymous request to protected route");
            Redirect::to("/login").into_response()
        }
    }
}

/// Short-circuit for pages that only make sense to anonymous visitors.
pub async fn redirect_if_signed_in(session: &Session) -> Option<Response> {
    session_user(session)
        .await
        .map(|_| Redirect::to("/dashboard").into_response())
}
