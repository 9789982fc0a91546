use axum::{
    extract::State,
    http::{StatusCode, Uri},
    response::{IntoResponse, Response},
};
use tower_sessions::Session;
use tracing::debug;

use crate::{
    app_state::AppState,
    templates::{HomeTemplate, HtmlTemplate, NotFoundTemplate},
};

use super::shared::{layout_from_session, redirect_if_signed_in};

/// GET /: Landing page for visitors; signed-in users go straight to the dashboard.
pub async fn home_handler(State(state): State<AppState>, session: Session) -> Response {
    if let Some(redirect) = redirect_if_signed_in(&session).await {
        return redirect;
    }

    let layout = layout_from_session(&state, &session, "Home").await;
    HtmlTemplate::new(HomeTemplate::new(layout)).into_response()
}

/// Fallback for unmatched routes.
pub async fn not_found_handler(
    State(state): State<AppState>,
    session: Session,
    uri: Uri,
) -> Response {
    debug!(target: "router", path = %uri.path(), "no route matched");
    let layout = layout_from_session(&state, &session, "Not found").await;
    HtmlTemplate::with_status(NotFoundTemplate { layout }, StatusCode::NOT_FOUND).into_response()
}
