use std::net::SocketAddr;

use axum::{
    extract::{rejection::FormRejection, ConnectInfo, Query, State},
    response::{IntoResponse, Redirect, Response},
    Form,
};
use serde::Deserialize;
use tower_sessions::Session;
use tracing::{error, info, warn};

use crate::{
    app_state::AppState,
    auth::{normalize_username, randomized_backoff, validate_password_strength, PASSWORD_MIN_LEN},
    csrf,
    sessions::{end_session, start_session, SessionUser},
    templates::{HtmlTemplate, LoginTemplate, RegisterTemplate},
    users::{User, UserStoreError},
};

use crate::server::utils::redirect_with_error;

use super::shared::{layout_from_session, redirect_if_signed_in, FlashQuery};

const INVALID_CREDENTIALS_MESSAGE: &str = "Invalid username or password.";
const SESSION_EXPIRED_MESSAGE: &str = "Your session expired. Please try again.";
const TRY_AGAIN_LATER_MESSAGE: &str = "Something went wrong. Please try again later.";

#[derive(Debug, Deserialize)]
pub(crate) struct LoginForm {
    #[serde(default)]
    csrf_token: String,
    #[serde(default)]
    username: String,
    #[serde(default)]
    password: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct RegistrationForm {
    #[serde(default)]
    csrf_token: String,
    #[serde(default)]
    username: String,
    #[serde(default)]
    password: String,
    #[serde(default)]
    password_confirm: String,
}

/// GET /login
pub async fn login_form_handler(
    State(state): State<AppState>,
    session: Session,
    Query(query): Query<FlashQuery>,
) -> Response {
    if let Some(redirect) = redirect_if_signed_in(&session).await {
        return redirect;
    }

    let layout = layout_from_session(&state, &session, "Sign in").await;
    HtmlTemplate::new(LoginTemplate::new(layout).with_error_message(query.error)).into_response()
}

/// POST /login
pub async fn login_submit_handler(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    session: Session,
    form: Result<Form<LoginForm>, FormRejection>,
) -> Response {
    if let Some(redirect) = redirect_if_signed_in(&session).await {
        return redirect;
    }

    let Ok(Form(form)) = form else {
        return redirect_with_error("/login", SESSION_EXPIRED_MESSAGE);
    };

    let client_ip = addr.ip();
    if let Err(err) = state.login_rate_limiter().check_ip(client_ip) {
        warn!(
            target: "auth",
            ip = %client_ip,
            retry_after_secs = err.retry_after().as_secs(),
            "rate limited login by IP"
        );
        return redirect_with_error("/login", err.user_message());
    }

    if !csrf::check_form_token(&session, &form.csrf_token, "login").await {
        randomized_backoff().await;
        return redirect_with_error("/login", SESSION_EXPIRED_MESSAGE);
    }

    let Ok(username) = normalize_username(&form.username) else {
        randomized_backoff().await;
        return redirect_with_error("/login", INVALID_CREDENTIALS_MESSAGE);
    };

    if let Err(err) = state.login_rate_limiter().check_username(&username) {
        warn!(
            target: "auth",
            username = %username,
            retry_after_secs = err.retry_after().as_secs(),
            "rate limited login by username"
        );
        return redirect_with_error("/login", err.user_message());
    }

    let user = match state
        .users()
        .verify_credentials(&username, &form.password)
        .await
    {
        Ok(user) => user,
        Err(UserStoreError::Authentication) => {
            info!(target: "auth", username = %username, ip = %client_ip, "failed login attempt");
            randomized_backoff().await;
            return redirect_with_error("/login", INVALID_CREDENTIALS_MESSAGE);
        }
        Err(err) => {
            error!(target: "auth", %err, "failed to verify credentials");
            return redirect_with_error("/login", TRY_AGAIN_LATER_MESSAGE);
        }
    };

    sign_in(&session, &user, "/login", "login").await
}

/// GET /register
pub async fn register_form_handler(
    State(state): State<AppState>,
    session: Session,
    Query(query): Query<FlashQuery>,
) -> Response {
    if let Some(redirect) = redirect_if_signed_in(&session).await {
        return redirect;
    }

    let layout = layout_from_session(&state, &session, "Register").await;
    let template = RegisterTemplate::new(layout, PASSWORD_MIN_LEN).with_error_message(query.error);
    HtmlTemplate::new(template).into_response()
}

/// POST /register
pub async fn register_submit_handler(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    session: Session,
    form: Result<Form<RegistrationForm>, FormRejection>,
) -> Response {
    if let Some(redirect) = redirect_if_signed_in(&session).await {
        return redirect;
    }

    let Ok(Form(form)) = form else {
        return redirect_with_error("/register", SESSION_EXPIRED_MESSAGE);
    };

    let client_ip = addr.ip();
    if let Err(err) = state.registration_rate_limiter().check_ip(client_ip) {
        warn!(
            target: "auth",
            ip = %client_ip,
            retry_after_secs = err.retry_after().as_secs(),
            "registration request rate-limited"
        );
        return redirect_with_error("/register", err.user_message());
    }

    if !csrf::check_form_token(&session, &form.csrf_token, "register").await {
        return redirect_with_error("/register", SESSION_EXPIRED_MESSAGE);
    }

    let Ok(username) = normalize_username(&form.username) else {
        return redirect_with_error(
            "/register",
            "Enter a username between 3 and 64 characters without spaces.",
        );
    };

    if validate_password_strength(&form.password).is_err() {
        return redirect_with_error(
            "/register",
            &format!("Password must be at least {PASSWORD_MIN_LEN} characters long."),
        );
    }

    if form.password != form.password_confirm {
        return redirect_with_error("/register", "Passwords do not match.");
    }

    let user = match state.users().add_user(&username, &form.password).await {
        Ok(user) => user,
        Err(UserStoreError::DuplicateUsername(_)) => {
            return redirect_with_error("/register", "That username is already taken.");
        }
        Err(err) => {
            error!(target: "auth", %err, "failed to create user during registration");
            return redirect_with_error("/register", TRY_AGAIN_LATER_MESSAGE);
        }
    };

    info!(target: "auth", user_id = user.id, username = %user.username, "user registered successfully");

    sign_in(&session, &user, "/register", "registration").await
}

/// GET /logout: Valid for any visitor; always lands on the home page.
pub async fn logout_handler(session: Session) -> Response {
    if let Err(err) = end_session(&session).await {
        error!(target: "auth", %err, "failed to end session on logout");
    }

    Redirect::to("/").into_response()
}

async fn sign_in(session: &Session, user: &User, failure_path: &str, action: &str) -> Response {
    let session_user = SessionUser::from(user);
    if let Err(err) = start_session(session, &session_user).await {
        error!(target: "auth", %err, action, "failed to persist authenticated user in session");
        return redirect_with_error(failure_path, TRY_AGAIN_LATER_MESSAGE);
    }

    csrf::rotate_after(session, action).await;

    info!(target: "auth", user_id = user.id, username = %user.username, action, "user signed in");

    Redirect::to("/dashboard").into_response()
}
