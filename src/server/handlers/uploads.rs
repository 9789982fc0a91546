use axum::extract::multipart::{Multipart, MultipartError, MultipartRejection};
use axum::{
    extract::State,
    http::{header, HeaderMap, StatusCode},
    response::Response,
    Extension,
};
use futures_util::TryStreamExt;
use tower_sessions::Session;
use tracing::{debug, error, info, warn};

use crate::{
    app_state::AppState,
    csrf,
    files::{FileStoreError, StoredFile},
    sessions::SessionUser,
};

use crate::server::{
    constants::{MULTIPART_OVERHEAD_BYTES, UPLOAD_FIELD_NAME},
    utils::{human_readable_size, redirect_with_error, redirect_with_success},
};

const SESSION_EXPIRED_MESSAGE: &str = "Your session expired. Please try again.";
const SINGLE_FILE_MESSAGE: &str = "Only one file can be uploaded at a time.";
const UNREADABLE_UPLOAD_MESSAGE: &str = "The file upload could not be read. Please try again.";

/// POST /upload: Accept exactly one multipart file and store it in the upload directory.
pub async fn upload_submit_handler(
    State(state): State<AppState>,
    Extension(user): Extension<SessionUser>,
    session: Session,
    headers: HeaderMap,
    multipart: Result<Multipart, MultipartRejection>,
) -> Response {
    let store = state.files();
    let limit = store.max_upload_bytes();

    if let Some(declared) = declared_content_length(&headers) {
        if declared > limit.saturating_add(MULTIPART_OVERHEAD_BYTES) {
            warn!(
                target: "upload",
                user_id = user.id,
                declared,
                limit,
                "rejected upload before reading body"
            );
            return upload_error_response(FileStoreError::PayloadTooLarge { limit });
        }
    }

    let mut multipart = match multipart {
        Ok(multipart) => multipart,
        Err(rejection) => {
            warn!(target: "upload", user_id = user.id, %rejection, "rejected non-multipart upload request");
            return redirect_with_error("/files", UNREADABLE_UPLOAD_MESSAGE);
        }
    };

    let mut csrf_checked = false;
    let mut uploaded: Option<StoredFile> = None;

    loop {
        let field = match multipart.next_field().await {
            Ok(Some(field)) => field,
            Ok(None) => break,
            Err(err) => {
                discard_upload(&state, uploaded.take()).await;
                return upload_error_response(stream_error(err, limit));
            }
        };

        let field_name = field.name().map(str::to_owned);
        let is_file_part = field.file_name().is_some();
        match field_name.as_deref() {
            Some("csrf_token") if !is_file_part => {
                let provided = match field.text().await {
                    Ok(token) => token,
                    Err(err) => {
                        discard_upload(&state, uploaded.take()).await;
                        return upload_error_response(stream_error(err, limit));
                    }
                };
                if !csrf::check_form_token(&session, &provided, "upload").await {
                    discard_upload(&state, uploaded.take()).await;
                    return redirect_with_error("/files", SESSION_EXPIRED_MESSAGE);
                }
                csrf_checked = true;
            }
            Some(UPLOAD_FIELD_NAME) => {
                // The token field precedes the file in the form, so nothing is written unverified.
                if !csrf_checked {
                    warn!(target: "csrf", user_id = user.id, "upload file field arrived before CSRF token");
                    return redirect_with_error("/files", SESSION_EXPIRED_MESSAGE);
                }

                if uploaded.is_some() {
                    discard_upload(&state, uploaded.take()).await;
                    return redirect_with_error("/files", SINGLE_FILE_MESSAGE);
                }

                let original_name = field.file_name().map(str::to_owned);
                let chunks = field.map_err(move |err| stream_error(err, limit));
                match store.save_stream(original_name.as_deref(), chunks).await {
                    Ok(stored) => uploaded = Some(stored),
                    Err(err) => return upload_error_response(err),
                }
            }
            other if is_file_part => {
                warn!(
                    target: "upload",
                    user_id = user.id,
                    field = other.unwrap_or(""),
                    "rejected upload carrying an extra file part"
                );
                discard_upload(&state, uploaded.take()).await;
                return redirect_with_error("/files", SINGLE_FILE_MESSAGE);
            }
            other => {
                if let Err(err) = field.text().await {
                    debug!(
                        target: "upload",
                        field = other.unwrap_or(""),
                        %err,
                        "discarding unexpected multipart field"
                    );
                }
            }
        }
    }

    let Some(stored) = uploaded else {
        return upload_error_response(FileStoreError::EmptyUpload);
    };

    csrf::rotate_after(&session, "upload").await;

    info!(
        target: "upload",
        user_id = user.id,
        username = %user.username,
        file = %stored.name,
        size_bytes = stored.size_bytes,
        "file uploaded successfully"
    );

    redirect_with_success("/files", &format!("Uploaded {}.", stored.name))
}

fn declared_content_length(headers: &HeaderMap) -> Option<u64> {
    headers
        .get(header::CONTENT_LENGTH)?
        .to_str()
        .ok()?
        .parse()
        .ok()
}

fn stream_error(err: MultipartError, limit: u64) -> FileStoreError {
    if err.status() == StatusCode::PAYLOAD_TOO_LARGE {
        FileStoreError::PayloadTooLarge { limit }
    } else {
        FileStoreError::Stream(err.body_text())
    }
}

async fn discard_upload(state: &AppState, stored: Option<StoredFile>) {
    let Some(stored) = stored else {
        return;
    };

    if let Err(err) = state.files().delete_file(&stored.name).await {
        warn!(target: "upload", %err, file = %stored.name, "failed to remove rejected upload");
    }
}

fn upload_error_response(err: FileStoreError) -> Response {
    let message = match &err {
        FileStoreError::PayloadTooLarge { limit } => {
            format!("Files must be {} or smaller.", human_readable_size(*limit))
        }
        FileStoreError::EmptyUpload => "Select a file before uploading.".to_string(),
        FileStoreError::Stream(reason) => {
            warn!(target: "upload", %reason, "failed to read upload");
            UNREADABLE_UPLOAD_MESSAGE.to_string()
        }
        FileStoreError::Storage(io_err) => {
            error!(target: "upload", err = %io_err, "failed to persist uploaded file");
            "The file could not be saved. Please try again.".to_string()
        }
        FileStoreError::InvalidName(_) | FileStoreError::NotFound(_) => {
            error!(target: "upload", %err, "unexpected upload failure");
            "The file could not be saved. Please try again.".to_string()
        }
    };

    redirect_with_error("/files", &message)
}
