use axum::{
    extract::State,
    response::{IntoResponse, Response},
    Extension,
};
use tower_sessions::Session;
use tracing::error;

use crate::{
    app_state::AppState,
    sessions::SessionUser,
    templates::{DashboardTemplate, HtmlTemplate},
};

use crate::server::utils::human_readable_size;

use super::shared::layout_from_session;

/// GET /dashboard
pub async fn dashboard_handler(
    State(state): State<AppState>,
    Extension(user): Extension<SessionUser>,
    session: Session,
) -> Response {
    let (file_count, total_bytes) = match state.files().list_files().await {
        Ok(files) => (
            files.len(),
            files.iter().map(|file| file.size_bytes).sum::<u64>(),
        ),
        Err(err) => {
            error!(target: "files", %err, "failed to summarize upload directory");
            (0, 0)
        }
    };

    let template = DashboardTemplate {
        layout: layout_from_session(&state, &session, "Dashboard").await,
        username: user.username,
        file_count,
        total_size_display: human_readable_size(total_bytes),
    };

    HtmlTemplate::new(template).into_response()
}
