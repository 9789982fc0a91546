use axum::{
    body::Body,
    extract::{rejection::FormRejection, Path as AxumPath, Query, State},
    http::{header, HeaderValue},
    response::{IntoResponse, Response},
    Extension, Form,
};
use tokio_util::io::ReaderStream;
use tower_sessions::Session;
use tracing::{error, info, warn};

use crate::{
    app_state::AppState,
    csrf,
    files::{FileStoreError, StoredFile},
    sessions::SessionUser,
    templates::{FileRow, FilesTemplate, HtmlTemplate},
};

use crate::server::utils::{
    attachment_disposition, format_datetime_utc, human_readable_size, redirect_with_error,
    redirect_with_success,
};

use super::shared::{layout_from_session, CsrfForm, FlashQuery};

/// GET /files: List the upload directory with any status echoed from a redirect.
pub async fn files_page_handler(
    State(state): State<AppState>,
    session: Session,
    Query(query): Query<FlashQuery>,
) -> Response {
    let mut error_message = query.error;

    let rows = match state.files().list_files().await {
        Ok(files) => files.into_iter().map(file_row).collect(),
        Err(err) => {
            error!(target: "files", %err, "failed to list upload directory");
            error_message.get_or_insert_with(|| "Unable to list files right now.".to_string());
            Vec::new()
        }
    };

    let layout = layout_from_session(&state, &session, "Files").await;
    let max_upload_display = human_readable_size(state.files().max_upload_bytes());
    let template =
        FilesTemplate::new(layout, rows, max_upload_display).with_flash(error_message, query.success);

    HtmlTemplate::new(template).into_response()
}

/// POST /delete/:filename
pub async fn file_delete_handler(
    State(state): State<AppState>,
    Extension(user): Extension<SessionUser>,
    session: Session,
    AxumPath(filename): AxumPath<String>,
    form: Result<Form<CsrfForm>, FormRejection>,
) -> Response {
    let Ok(Form(form)) = form else {
        warn!(target: "files", user_id = user.id, file = %filename, "rejected malformed delete request");
        return redirect_with_error("/files", "Your session expired. Please try again.");
    };

    if !csrf::check_form_token(&session, &form.csrf_token, "delete").await {
        return redirect_with_error("/files", "Your session expired. Please try again.");
    }

    match state.files().delete_file(&filename).await {
        Ok(()) => {
            csrf::rotate_after(&session, "delete").await;
            info!(
                target: "files",
                user_id = user.id,
                username = %user.username,
                file = %filename,
                "file deleted"
            );
            redirect_with_success("/files", "File deleted successfully.")
        }
        Err(FileStoreError::InvalidName(_)) => {
            warn!(
                target: "files",
                user_id = user.id,
                file = %filename,
                "rejected delete with invalid file name"
            );
            redirect_with_error("/files", "Invalid file name.")
        }
        Err(FileStoreError::NotFound(_)) => redirect_with_error("/files", "File not found."),
        Err(err) => {
            error!(target: "files", %err, file = %filename, "failed to delete file");
            redirect_with_error("/files", "The file could not be deleted. Please try again.")
        }
    }
}

/// GET /download/:filename: Stream a stored file as an attachment.
pub async fn file_download_handler(
    State(state): State<AppState>,
    Extension(user): Extension<SessionUser>,
    AxumPath(filename): AxumPath<String>,
) -> Response {
    let (file, stored) = match state.files().open_file(&filename).await {
        Ok(opened) => opened,
        Err(FileStoreError::InvalidName(_)) => {
            return redirect_with_error("/files", "Invalid file name.");
        }
        Err(FileStoreError::NotFound(_)) => {
            return redirect_with_error("/files", "File not found.");
        }
        Err(err) => {
            error!(target: "files", %err, file = %filename, "failed to open file for download");
            return redirect_with_error("/files", "The file could not be read. Please try again.");
        }
    };

    let content_type = mime_guess::from_path(&stored.name).first_or_octet_stream();

    let mut response = Response::new(Body::from_stream(ReaderStream::new(file)));
    let headers = response.headers_mut();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_str(content_type.essence_str())
            .unwrap_or_else(|_| HeaderValue::from_static("application/octet-stream")),
    );
    headers.insert(
        header::CONTENT_DISPOSITION,
        attachment_disposition(&stored.name),
    );
    headers.insert(
        header::X_CONTENT_TYPE_OPTIONS,
        HeaderValue::from_static("nosniff"),
    );
    headers.insert(header::CONTENT_LENGTH, HeaderValue::from(stored.size_bytes));

    info!(
        target: "files",
        user_id = user.id,
        file = %stored.name,
        size_bytes = stored.size_bytes,
        "serving download"
    );

    response
}

fn file_row(file: StoredFile) -> FileRow {
    FileRow {
        url_name: urlencoding::encode(&file.name).into_owned(),
        extension: file.extension.unwrap_or_else(|| "-".to_string()),
        size_display: human_readable_size(file.size_bytes),
        modified_display: file
            .modified_at
            .map(format_datetime_utc)
            .unwrap_or_else(|| "-".to_string()),
        name: file.name,
    }
}
