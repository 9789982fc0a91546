use axum::{
    http::HeaderValue,
    response::{IntoResponse, Redirect, Response},
};
use time::OffsetDateTime;

/// Human-friendly byte size formatter used in multiple views.
pub fn human_readable_size(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KB", "MB", "GB", "TB"];
    let mut value = bytes as f64;
    let mut unit_index = 0;

    while value >= 1024.0 && unit_index < UNITS.len() - 1 {
        value /= 1024.0;
        unit_index += 1;
    }

    if unit_index == 0 {
        format!("{} {}", bytes, UNITS[unit_index])
    } else if value >= 100.0 {
        format!("{value:.0} {}", UNITS[unit_index])
    } else if value >= 10.0 {
        format!("{value:.1} {}", UNITS[unit_index])
    } else {
        format!("{value:.2} {}", UNITS[unit_index])
    }
}

/// Format an [`OffsetDateTime`] in the canonical UTC display format.
pub fn format_datetime_utc(dt: OffsetDateTime) -> String {
    let dt = dt.to_offset(time::UtcOffset::UTC);
    format!(
        "{:04}-{:02}-{:02} {:02}:{:02} UTC",
        dt.year(),
        u8::from(dt.month()),
        dt.day(),
        dt.hour(),
        dt.minute()
    )
}

/// Redirect to `path` carrying a human-readable `error` message in the query string.
pub fn redirect_with_error(path: &str, message: &str) -> Response {
    redirect_with_query(path, "error", message)
}

/// Redirect to `path` carrying a human-readable `success` message in the query string.
pub fn redirect_with_success(path: &str, message: &str) -> Response {
    redirect_with_query(path, "success", message)
}

fn redirect_with_query(path: &str, key: &str, message: &str) -> Response {
    let location = format!("{path}?{key}={}", urlencoding::encode(message));
    Redirect::to(&location).into_response()
}

/// Build an attachment `Content-Disposition` header for a stored file name.
pub fn attachment_disposition(filename: &str) -> HeaderValue {
    let safe: String = filename
        .chars()
        .map(|ch| {
            if matches!(ch, ' '..='~') && ch != '"' && ch != '\\' {
                ch
            } else {
                '_'
            }
        })
        .take(255)
        .collect();

    HeaderValue::from_str(&format!("attachment; filename=\"{safe}\""))
        .unwrap_or_else(|_| HeaderValue::from_static("attachment"))
}
