use askama::Template;
use axum::http::StatusCode;
use axum::response::{Html, IntoResponse, Response};
use time::OffsetDateTime;
use tower_sessions::{session::Error as SessionError, Session};
use tracing::error;

use crate::{
    app_state::AppState,
    csrf,
    sessions::{current_user, SessionUser},
};

/// Shared layout context injected into all templates
#[derive(Clone, Debug)]
pub struct LayoutContext {
    pub title: String,
    pub brand_name: String,
    pub current_user: Option<SessionUser>,
    pub csrf: Option<CsrfMeta>,
    pub current_year: i32,
}

/// CSRF metadata exposed to templates
#[derive(Clone, Debug)]
pub struct CsrfMeta {
    pub token: String,
}

impl LayoutContext {
    /// Build a layout context using only configuration, without session data.
    pub fn from_state(state: &AppState, title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            brand_name: state.config().ui.brand_name.clone(),
            current_user: None,
            csrf: None,
            current_year: OffsetDateTime::now_utc().year(),
        }
    }

    /// Build a layout context carrying the signed-in user and a form token.
    pub async fn from_session(
        state: &AppState,
        session: &Session,
        title: impl Into<String>,
    ) -> Result<Self, SessionError> {
        let user = current_user(session).await?;
        let token = csrf::ensure_csrf_token(session).await?;

        Ok(Self::from_state(state, title)
            .with_user(user)
            .with_csrf_token(Some(token)))
    }

    pub fn with_user(mut self, user: Option<SessionUser>) -> Self {
        self.current_user = user;
        self
    }

    /// Attach a CSRF token that will be emitted in forms
    pub fn with_csrf_token(mut self, token: Option<String>) -> Self {
        self.csrf = token.map(|token| CsrfMeta { token });
        self
    }

    pub fn csrf_token(&self) -> &str {
        self.csrf.as_ref().map(|meta| meta.token.as_str()).unwrap_or("")
    }
}

/// Wrapper that converts Askama templates into Axum responses with logging
pub struct HtmlTemplate<T: Template> {
    template: T,
    status: StatusCode,
}

impl<T: Template> HtmlTemplate<T> {
    pub fn new(template: T) -> Self {
        Self {
            template,
            status: StatusCode::OK,
        }
    }

    pub fn with_status(template: T, status: StatusCode) -> Self {
        Self { template, status }
    }
}

impl<T: Template> IntoResponse for HtmlTemplate<T> {
    fn into_response(self) -> Response {
        match self.template.render() {
            Ok(html) => (self.status, Html(html)).into_response(),
            Err(err) => {
                error!(target: "templates", error = %err, "failed to render template");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Template rendering error",
                )
                    .into_response()
            }
        }
    }
}

#[derive(Template)]
#[template(path = "home.html", escape = "html")]
pub struct HomeTemplate {
    pub layout: LayoutContext,
}

impl HomeTemplate {
    pub fn new(layout: LayoutContext) -> Self {
        Self { layout }
    }
}

#[derive(Template)]
#[template(path = "login.html", escape = "html")]
pub struct LoginTemplate {
    pub layout: LayoutContext,
    pub error_message: Option<String>,
}

impl LoginTemplate {
    pub fn new(layout: LayoutContext) -> Self {
        Self {
            layout,
            error_message: None,
        }
    }

    pub fn with_error_message(mut self, message: Option<String>) -> Self {
        self.error_message = message;
        self
    }
}

#[derive(Template)]
#[template(path = "register.html", escape = "html")]
pub struct RegisterTemplate {
    pub layout: LayoutContext,
    pub error_message: Option<String>,
    pub password_min_len: usize,
}

impl RegisterTemplate {
    pub fn new(layout: LayoutContext, password_min_len: usize) -> Self {
        Self {
            layout,
            error_message: None,
            password_min_len,
        }
    }

    pub fn with_error_message(mut self, message: Option<String>) -> Self {
        self.error_message = message;
        self
    }
}

#[derive(Template)]
#[template(path = "dashboard.html", escape = "html")]
pub struct DashboardTemplate {
    pub layout: LayoutContext,
    pub username: String,
    pub file_count: usize,
    pub total_size_display: String,
}

/// Row rendered in the file table.
#[derive(Clone, Debug)]
pub struct FileRow {
    pub name: String,
    /// Percent-encoded name for use in URL paths.
    pub url_name: String,
    pub extension: String,
    pub size_display: String,
    pub modified_display: String,
}

#[derive(Template)]
#[template(path = "files.html", escape = "html")]
pub struct FilesTemplate {
    pub layout: LayoutContext,
    pub files: Vec<FileRow>,
    pub max_upload_display: String,
    pub error_message: Option<String>,
    pub success_message: Option<String>,
}

impl FilesTemplate {
    pub fn new(layout: LayoutContext, files: Vec<FileRow>, max_upload_display: String) -> Self {
        Self {
            layout,
            files,
            max_upload_display,
            error_message: None,
            success_message: None,
        }
    }

    pub fn with_flash(mut self, error: Option<String>, success: Option<String>) -> Self {
        self.error_message = error;
        self.success_message = success;
        self
    }
}

#[derive(Template)]
#[template(path = "not_found.html", escape = "html")]
pub struct NotFoundTemplate {
    pub layout: LayoutContext,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn layout(title: &str) -> LayoutContext {
        LayoutContext {
            title: title.to_string(),
            brand_name: "FileHost".to_string(),
            current_user: Some(SessionUser::new(1, "admin".to_string())),
            csrf: Some(CsrfMeta {
                token: "token-123".to_string(),
            }),
            current_year: 2026,
        }
    }

    #[test]
    fn files_page_escapes_flash_messages() {
        let template = FilesTemplate::new(layout("Files"), Vec::new(), "10 MB".to_string())
            .with_flash(Some("<script>alert(1)</script>".to_string()), None);
        let html = template.render().unwrap();
        assert!(html.contains("&lt;script&gt;"));
        assert!(!html.contains("<script>alert(1)</script>"));
    }

    #[test]
    fn files_page_renders_rows_with_delete_forms() {
        let row = FileRow {
            name: "01abc.png".to_string(),
            url_name: "01abc.png".to_string(),
            extension: "png".to_string(),
            size_display: "4 B".to_string(),
            modified_display: "2026-01-01 00:00 UTC".to_string(),
        };
        let html = FilesTemplate::new(layout("Files"), vec![row], "10 MB".to_string())
            .render()
            .unwrap();
        assert!(html.contains("action=\"/delete/01abc.png\""));
        assert!(html.contains("href=\"/download/01abc.png\""));
        assert!(html.contains("value=\"token-123\""));
    }

    #[test]
    fn login_page_renders_error() {
        let html = LoginTemplate::new(layout("Sign in"))
            .with_error_message(Some("Invalid username or password.".to_string()))
            .render()
            .unwrap();
        assert!(html.contains("Invalid username or password."));
        assert!(html.contains("name=\"csrf_token\""));
    }
}
