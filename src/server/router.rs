use axum::extract::DefaultBodyLimit;
use axum::middleware;
use axum::routing::{get, post};
use axum::Router;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;

use crate::app_state::AppState;
use crate::server::constants::MULTIPART_OVERHEAD_BYTES;
use crate::server::handlers;
use crate::sessions::AppSessionLayer;

/// Construct the application's HTTP router with all routes and middleware configured.
pub fn build_router(state: AppState, session_layer: AppSessionLayer) -> Router {
    let upload_body_limit = state
        .files()
        .max_upload_bytes()
        .saturating_add(MULTIPART_OVERHEAD_BYTES);

    let protected_routes = Router::new()
        .route("/dashboard", get(handlers::dashboard::dashboard_handler))
        .route("/files", get(handlers::files::files_page_handler))
        .route(
            "/upload",
            post(handlers::uploads::upload_submit_handler)
                .layer(DefaultBodyLimit::max(upload_body_limit as usize)),
        )
        .route(
            "/delete/:filename",
            post(handlers::files::file_delete_handler),
        )
        .route(
            "/download/:filename",
            get(handlers::files::file_download_handler),
        )
        .route_layer(middleware::from_fn(handlers::shared::require_login));

    Router::new()
        .route("/", get(handlers::home::home_handler))
        .route(
            "/login",
            get(handlers::auth::login_form_handler).post(handlers::auth::login_submit_handler),
        )
        .route(
            "/register",
            get(handlers::auth::register_form_handler)
                .post(handlers::auth::register_submit_handler),
        )
        .route("/logout", get(handlers::auth::logout_handler))
        .merge(protected_routes)
        .fallback(handlers::home::not_found_handler)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(session_layer),
        )
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::SocketAddr;
    use std::sync::Arc;

    use axum::body::Body;
    use axum::extract::connect_info::MockConnectInfo;
    use axum::http::{header, Request, StatusCode};
    use axum::response::Response;
    use http_body_util::BodyExt;
    use tempfile::TempDir;
    use tower::ServiceExt;

    use crate::config::AppConfig;
    use crate::sessions::{session_layer, SessionMemoryStore};
    use crate::users::{bootstrap_admin_user, JsonUserStore};

    const BOUNDARY: &str = "filehost-test-boundary";

    /// Router plus a single-cookie jar, enough to follow one browser session.
    struct TestClient {
        _tmp: TempDir,
        state: AppState,
        router: Router,
        cookie: Option<String>,
    }

    impl TestClient {
        async fn new() -> Self {
            Self::with_upload_limit(10 * 1024 * 1024).await
        }

        async fn with_upload_limit(max_upload_bytes: u64) -> Self {
            let tmp = TempDir::new().unwrap();
            let mut config = AppConfig::default();
            config.storage.upload_dir = tmp.path().join("uploads");
            config.storage.users_file = tmp.path().join("users.json");
            config.storage.max_upload_bytes = max_upload_bytes;
            config.security.session_key = "k".repeat(64);
            std::fs::create_dir_all(&config.storage.upload_dir).unwrap();

            let users = Arc::new(JsonUserStore::new(config.storage.users_file.clone(), None));
            bootstrap_admin_user(users.as_ref(), &config).await.unwrap();

            let layer = session_layer(
                &config,
                &config.session_key_bytes().unwrap(),
                SessionMemoryStore::default(),
            )
            .unwrap();
            let state = AppState::new(users, config);
            let router = build_router(state.clone(), layer)
                .layer(MockConnectInfo(SocketAddr::from(([127, 0, 0, 1], 4000))));

            Self {
                _tmp: tmp,
                state,
                router,
                cookie: None,
            }
        }

        async fn send(&mut self, mut request: Request<Body>) -> Response {
            if let Some(cookie) = &self.cookie {
                request
                    .headers_mut()
                    .insert(header::COOKIE, cookie.parse().unwrap());
            }

            let response = self.router.clone().oneshot(request).await.unwrap();

            if let Some(set_cookie) = response.headers().get(header::SET_COOKIE) {
                let pair = set_cookie
                    .to_str()
                    .unwrap()
                    .split(';')
                    .next()
                    .unwrap()
                    .to_string();
                let has_value = pair.split_once('=').is_some_and(|(_, value)| !value.is_empty());
                self.cookie = has_value.then_some(pair);
            }

            response
        }

        async fn get(&mut self, uri: &str) -> Response {
            self.send(Request::get(uri).body(Body::empty()).unwrap())
                .await
        }

        async fn post_form(&mut self, uri: &str, body: String) -> Response {
            let request = Request::post(uri)
                .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
                .body(Body::from(body))
                .unwrap();
            self.send(request).await
        }

        async fn post_upload(&mut self, body: Vec<u8>) -> Response {
            let request = Request::post("/upload")
                .header(
                    header::CONTENT_TYPE,
                    format!("multipart/form-data; boundary={BOUNDARY}"),
                )
                .body(Body::from(body))
                .unwrap();
            self.send(request).await
        }

        /// Load a page and pull the CSRF token out of its first form.
        async fn csrf_token(&mut self, uri: &str) -> String {
            let response = self.get(uri).await;
            assert_eq!(response.status(), StatusCode::OK);
            let html = body_text(response).await;
            let marker = "name=\"csrf_token\" value=\"";
            let start = html.find(marker).expect("page has a csrf field") + marker.len();
            let end = start + html[start..].find('"').unwrap();
            html[start..end].to_string()
        }

        async fn login(&mut self, username: &str, password: &str) -> Response {
            let token = self.csrf_token("/login").await;
            self.post_form(
                "/login",
                format!("csrf_token={token}&username={username}&password={password}"),
            )
            .await
        }
    }

    async fn body_bytes(response: Response) -> Vec<u8> {
        response
            .into_body()
            .collect()
            .await
            .unwrap()
            .to_bytes()
            .to_vec()
    }

    async fn body_text(response: Response) -> String {
        String::from_utf8(body_bytes(response).await).unwrap()
    }

    fn location(response: &Response) -> &str {
        response
            .headers()
            .get(header::LOCATION)
            .expect("redirect has a location")
            .to_str()
            .unwrap()
    }

    fn text_part(name: &str, value: &str) -> Vec<u8> {
        format!("--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"{name}\"\r\n\r\n{value}\r\n")
            .into_bytes()
    }

    fn file_part(name: &str, filename: &str, contents: &[u8]) -> Vec<u8> {
        let mut part = format!(
            "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"{name}\"; filename=\"{filename}\"\r\nContent-Type: application/octet-stream\r\n\r\n"
        )
        .into_bytes();
        part.extend_from_slice(contents);
        part.extend_from_slice(b"\r\n");
        part
    }

    fn multipart_body(parts: Vec<Vec<u8>>) -> Vec<u8> {
        let mut body = parts.concat();
        body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());
        body
    }

    fn multipart_upload(csrf: &str, filename: &str, contents: &[u8]) -> Vec<u8> {
        multipart_body(vec![
            text_part("csrf_token", csrf),
            file_part("file", filename, contents),
        ])
    }

    async fn signed_in_client() -> TestClient {
        let mut client = TestClient::new().await;
        let response = client.login("admin", "admin123").await;
        assert_eq!(location(&response), "/dashboard");
        client
    }

    #[tokio::test]
    async fn protected_routes_redirect_anonymous_visitors_to_login() {
        let mut client = TestClient::new().await;

        for uri in ["/dashboard", "/files", "/download/anything.txt"] {
            let response = client.get(uri).await;
            assert_eq!(response.status(), StatusCode::SEE_OTHER, "{uri}");
            assert_eq!(location(&response), "/login");
        }

        let response = client.post_form("/delete/anything.txt", String::new()).await;
        assert_eq!(response.status(), StatusCode::SEE_OTHER);
        assert_eq!(location(&response), "/login");
    }

    #[tokio::test]
    async fn unknown_routes_render_not_found_page() {
        let mut client = TestClient::new().await;
        let response = client.get("/definitely/not/here").await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert!(body_text(response).await.contains("Page not found"));
    }

    #[tokio::test]
    async fn login_logout_round_trip() {
        let mut client = TestClient::new().await;

        let home = client.get("/").await;
        assert_eq!(home.status(), StatusCode::OK);

        let response = client.login("admin", "admin123").await;
        assert_eq!(response.status(), StatusCode::SEE_OTHER);
        assert_eq!(location(&response), "/dashboard");

        let dashboard = client.get("/dashboard").await;
        assert_eq!(dashboard.status(), StatusCode::OK);
        assert!(body_text(dashboard).await.contains("Welcome, admin"));

        let home = client.get("/").await;
        assert_eq!(location(&home), "/dashboard");
        let login_page = client.get("/login").await;
        assert_eq!(location(&login_page), "/dashboard");

        let logout = client.get("/logout").await;
        assert_eq!(location(&logout), "/");

        let after = client.get("/dashboard").await;
        assert_eq!(location(&after), "/login");
    }

    #[tokio::test]
    async fn wrong_password_redirects_back_with_error() {
        let mut client = TestClient::new().await;
        let response = client.login("admin", "wrong-password").await;
        assert_eq!(response.status(), StatusCode::SEE_OTHER);
        assert!(location(&response).starts_with("/login?error="));

        let page = client.get(location(&response).to_string().as_str()).await;
        assert!(body_text(page).await.contains("Invalid username or password."));
    }

    #[tokio::test]
    async fn forged_csrf_token_is_rejected() {
        let mut client = TestClient::new().await;
        client.csrf_token("/login").await;
        let response = client
            .post_form(
                "/login",
                "csrf_token=forged&username=admin&password=admin123".to_string(),
            )
            .await;
        assert!(location(&response).starts_with("/login?error="));

        let after = client.get("/dashboard").await;
        assert_eq!(location(&after), "/login");
    }

    #[tokio::test]
    async fn registration_signs_in_and_rejects_duplicates() {
        let mut client = TestClient::new().await;

        let token = client.csrf_token("/register").await;
        let response = client
            .post_form(
                "/register",
                format!(
                    "csrf_token={token}&username=carol&password=password-1&password_confirm=password-1"
                ),
            )
            .await;
        assert_eq!(location(&response), "/dashboard");
        assert!(client.state.users().find_user("carol").await.unwrap().is_some());

        client.get("/logout").await;

        let token = client.csrf_token("/register").await;
        let response = client
            .post_form(
                "/register",
                format!(
                    "csrf_token={token}&username=carol&password=password-2&password_confirm=password-2"
                ),
            )
            .await;
        assert_eq!(
            location(&response),
            "/register?error=That%20username%20is%20already%20taken."
        );
        assert_eq!(client.state.users().list_users().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn upload_list_and_delete() {
        let mut client = TestClient::new().await;
        client.login("admin", "admin123").await;

        let token = client.csrf_token("/files").await;
        let response = client
            .post_upload(multipart_upload(&token, "a.png", b"\x89PNG fake image"))
            .await;
        assert_eq!(response.status(), StatusCode::SEE_OTHER);
        assert!(location(&response).starts_with("/files?success="));

        let stored = client.state.files().list_files().await.unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].extension.as_deref(), Some("png"));
        let name = stored[0].name.clone();

        let page = client.get("/files").await;
        assert!(body_text(page).await.contains(&name));

        let download = client.get(&format!("/download/{name}")).await;
        assert_eq!(download.status(), StatusCode::OK);
        assert_eq!(download.headers()[header::CONTENT_TYPE], "image/png");
        assert_eq!(body_bytes(download).await, b"\x89PNG fake image");

        let token = client.csrf_token("/files").await;
        let response = client
            .post_form(&format!("/delete/{name}"), format!("csrf_token={token}"))
            .await;
        assert_eq!(
            location(&response),
            "/files?success=File%20deleted%20successfully."
        );
        assert!(client.state.files().list_files().await.unwrap().is_empty());

        let token = client.csrf_token("/files").await;
        let response = client
            .post_form(&format!("/delete/{name}"), format!("csrf_token={token}"))
            .await;
        assert_eq!(location(&response), "/files?error=File%20not%20found.");
    }

    #[tokio::test]
    async fn delete_rejects_path_traversal() {
        let mut client = TestClient::new().await;
        client.login("admin", "admin123").await;

        let token = client.csrf_token("/files").await;
        let response = client
            .post_form(
                "/delete/..%2F..%2Fetc%2Fpasswd",
                format!("csrf_token={token}"),
            )
            .await;
        assert_eq!(location(&response), "/files?error=Invalid%20file%20name.");
    }

    #[tokio::test]
    async fn oversize_upload_is_rejected_without_new_entries() {
        let mut client = TestClient::with_upload_limit(1024).await;
        client.login("admin", "admin123").await;

        let token = client.csrf_token("/files").await;
        let response = client
            .post_upload(multipart_upload(&token, "big.bin", &[7u8; 1025]))
            .await;
        assert_eq!(response.status(), StatusCode::SEE_OTHER);
        assert!(location(&response).starts_with("/files?error=Files%20must%20be"));
        assert!(client.state.files().list_files().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn declared_oversize_upload_is_rejected_before_reading() {
        let mut client = TestClient::with_upload_limit(1024).await;
        client.login("admin", "admin123").await;

        let request = Request::post("/upload")
            .header(
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={BOUNDARY}"),
            )
            .header(header::CONTENT_LENGTH, (1024 * 1024).to_string())
            .body(Body::empty())
            .unwrap();
        let response = client.send(request).await;
        assert!(location(&response).starts_with("/files?error=Files%20must%20be"));
        assert!(client.state.files().list_files().await.unwrap().is_empty());
    }

    const SINGLE_FILE_ERROR: &str =
        "/files?error=Only%20one%20file%20can%20be%20uploaded%20at%20a%20time.";
    const SESSION_EXPIRED_ERROR: &str =
        "/files?error=Your%20session%20expired.%20Please%20try%20again.";

    #[tokio::test]
    async fn second_file_field_rejects_whole_upload() {
        let mut client = signed_in_client().await;
        let token = client.csrf_token("/files").await;

        let body = multipart_body(vec![
            text_part("csrf_token", &token),
            file_part("file", "a.png", b"first"),
            file_part("file", "b.png", b"second"),
        ]);
        let response = client.post_upload(body).await;
        assert_eq!(location(&response), SINGLE_FILE_ERROR);
        assert!(client.state.files().list_files().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn file_part_under_another_field_name_rejects_upload() {
        let mut client = signed_in_client().await;
        let token = client.csrf_token("/files").await;

        let body = multipart_body(vec![
            text_part("csrf_token", &token),
            file_part("file", "a.png", b"first"),
            file_part("other", "b.png", b"second"),
        ]);
        let response = client.post_upload(body).await;
        assert_eq!(location(&response), SINGLE_FILE_ERROR);
        assert!(client.state.files().list_files().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn upload_without_csrf_field_writes_nothing() {
        let mut client = signed_in_client().await;
        client.csrf_token("/files").await;

        let body = multipart_body(vec![file_part("file", "a.png", b"data")]);
        let response = client.post_upload(body).await;
        assert_eq!(location(&response), SESSION_EXPIRED_ERROR);
        assert!(client.state.files().list_files().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn csrf_field_after_file_writes_nothing() {
        let mut client = signed_in_client().await;
        let token = client.csrf_token("/files").await;

        let body = multipart_body(vec![
            file_part("file", "a.png", b"data"),
            text_part("csrf_token", &token),
        ]);
        let response = client.post_upload(body).await;
        assert_eq!(location(&response), SESSION_EXPIRED_ERROR);
        assert!(client.state.files().list_files().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn empty_or_missing_file_part_is_rejected() {
        let mut client = signed_in_client().await;

        let token = client.csrf_token("/files").await;
        let response = client
            .post_upload(multipart_upload(&token, "", b""))
            .await;
        assert_eq!(
            location(&response),
            "/files?error=Select%20a%20file%20before%20uploading."
        );

        let token = client.csrf_token("/files").await;
        let response = client
            .post_upload(multipart_body(vec![text_part("csrf_token", &token)]))
            .await;
        assert_eq!(
            location(&response),
            "/files?error=Select%20a%20file%20before%20uploading."
        );
        assert!(client.state.files().list_files().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn malformed_requests_redirect_instead_of_raw_errors() {
        let mut client = signed_in_client().await;

        let response = client
            .send(Request::post("/delete/x.png").body(Body::empty()).unwrap())
            .await;
        assert_eq!(response.status(), StatusCode::SEE_OTHER);
        assert_eq!(location(&response), SESSION_EXPIRED_ERROR);

        let request = Request::post("/upload")
            .header(header::CONTENT_TYPE, "text/plain")
            .body(Body::from("not a form"))
            .unwrap();
        let response = client.send(request).await;
        assert_eq!(response.status(), StatusCode::SEE_OTHER);
        assert_eq!(
            location(&response),
            "/files?error=The%20file%20upload%20could%20not%20be%20read.%20Please%20try%20again."
        );
        assert!(client.state.files().list_files().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn repeated_failed_logins_are_rate_limited() {
        let mut client = TestClient::new().await;
        let token = client.csrf_token("/login").await;
        let attempt = format!("csrf_token={token}&username=admin&password=wrong-password");

        for _ in 0..5 {
            let response = client.post_form("/login", attempt.clone()).await;
            assert!(location(&response).starts_with("/login?error=Invalid"));
        }

        let response = client.post_form("/login", attempt).await;
        assert!(location(&response).starts_with("/login?error=Too%20many"));
    }
}
