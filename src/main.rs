//! Drive relay server binary.
//!
//! Loads the service account, makes sure the shared `users` folder exists,
//! and then serves three JSON endpoints: a short-lived access token for the
//! client app, the shared folder id, and a share operation that grants an
//! email address write access to that folder.

mod config;
mod credentials;
mod drive;
mod error;
mod folder;
mod handlers;
mod http;
mod logging;

use axum::extract::{Extension, connect_info::ConnectInfo};
use axum::http::Request;
use axum::routing::get;
use axum::{Router, middleware};
use axum_server::Handle;
use clap::Parser;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tower_http::trace::{DefaultOnRequest, DefaultOnResponse, TraceLayer};
use tracing::{Level, info, info_span, warn};

use crate::config::{Args, DRIVE_SCOPE, SHUTDOWN_GRACE_SECS, USERS_FOLDER_NAME};
use crate::credentials::{TokenProvider, load_token_provider};
use crate::drive::{DriveClient, StorageApi};
use crate::folder::{FolderState, resolve_folder};
use crate::http::{add_security_headers, build_cors_layer};

/// Starts the relay and blocks until shutdown.
#[tokio::main]
async fn main() -> Result<(), std::io::Error> {
    let env_file = dotenvy::dotenv();
    logging::init_logging();
    if let Ok(path) = env_file {
        info!(path = %path.display(), "loaded environment file");
    }

    let args = Args::parse();
    let http_client = reqwest::Client::new();
    // A bad key keeps the server up; token and share calls report it per request.
    let tokens =
        load_token_provider(&args.credential_source(), DRIVE_SCOPE, http_client.clone()).await;
    let drive: Arc<dyn StorageApi> = Arc::new(DriveClient::new(
        http_client,
        &args.drive_endpoint,
        tokens.clone(),
    ));

    // Resolve before binding so every request sees the final folder state.
    let folder = Arc::new(FolderState::from_resolution(
        resolve_folder(drive.as_ref(), USERS_FOLDER_NAME).await,
    ));

    let app = build_router(tokens, drive, folder, args.cors_origins.as_deref());

    let host = args
        .host
        .parse::<IpAddr>()
        .map_err(|err| std::io::Error::new(std::io::ErrorKind::InvalidInput, err.to_string()))?;
    let addr = SocketAddr::new(host, args.port);
    let handle = Handle::new();

    info!("Server running on http://{}", addr);

    serve(app, addr, handle, termination_signal()).await
}

/// 启动服务器；`shutdown` 完成后在宽限期内排空连接，排空结束才返回。
async fn serve(
    app: Router,
    addr: SocketAddr,
    handle: Handle,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> Result<(), std::io::Error> {
    let server = axum_server::bind(addr)
        .handle(handle.clone())
        .serve(app.into_make_service_with_connect_info::<SocketAddr>());

    tokio::spawn(async move {
        shutdown.await;
        let grace = Duration::from_secs(SHUTDOWN_GRACE_SECS);
        info!(grace_secs = grace.as_secs(), "draining connections before exit");
        handle.graceful_shutdown(Some(grace));
    });
    server.await
}

fn build_router(
    tokens: Arc<dyn TokenProvider>,
    drive: Arc<dyn StorageApi>,
    folder: Arc<FolderState>,
    cors_origins: Option<&str>,
) -> Router {
    Router::new()
        .route("/getAccessToken", get(handlers::get_access_token))
        .route("/getUsersFolderId", get(handlers::get_users_folder_id))
        .route("/shareFolder", get(handlers::share_folder))
        .layer(middleware::from_fn(add_security_headers))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(|request: &Request<_>| {
                    let client_ip = request
                        .extensions()
                        .get::<ConnectInfo<SocketAddr>>()
                        .map(|ConnectInfo(addr)| addr.ip().to_string())
                        .unwrap_or_else(|| "unknown".to_string());

                    info_span!(
                        env!("CARGO_CRATE_NAME"),
                        client_ip,
                        method = ?request.method(),
                        path = ?request.uri().path(),
                    )
                })
                .on_request(DefaultOnRequest::new().level(Level::DEBUG))
                .on_response(DefaultOnResponse::new().level(Level::DEBUG)),
        )
        .layer(Extension(tokens))
        .layer(Extension(drive))
        .layer(Extension(folder))
        .layer(build_cors_layer(cors_origins))
}

/// 等待 SIGINT 或 SIGTERM。
async fn termination_signal() {
    let interrupt = async {
        if let Err(err) = signal::ctrl_c().await {
            warn!(error = %err, "Ctrl+C handler unavailable");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(err) => {
                warn!(error = %err, "SIGTERM handler unavailable");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    let signal_name = tokio::select! {
        _ = interrupt => "SIGINT",
        _ = terminate => "SIGTERM",
    };
    info!(signal = signal_name, "received termination signal");
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::{StatusCode, header};
    use axum::response::Response;
    use tower::ServiceExt;

    use crate::credentials::{AccessToken, CredentialSource, load_token_provider};
    use crate::drive::Permission;
    use crate::error::AuthError;
    use crate::folder::FolderRecord;
    use crate::folder::tests::FakeDrive;

    struct StaticToken;

    #[async_trait]
    impl TokenProvider for StaticToken {
        async fn access_token(&self) -> Result<AccessToken, AuthError> {
            Ok(AccessToken {
                token: "T1".into(),
            })
        }
    }

    fn ready_folder() -> Arc<FolderState> {
        Arc::new(FolderState::Ready(FolderRecord {
            id: "F123".into(),
            name: "users".into(),
        }))
    }

    fn router_with(
        tokens: Arc<dyn TokenProvider>,
        drive: Arc<FakeDrive>,
        folder: Arc<FolderState>,
    ) -> Router {
        build_router(tokens, drive, folder, None)
    }

    fn sharing_drive() -> Arc<FakeDrive> {
        Arc::new(FakeDrive {
            permission: Some(Permission { id: "P1".into() }),
            ..Default::default()
        })
    }

    async fn get(app: Router, uri: &str) -> (Response, serde_json::Value) {
        let request = Request::builder()
            .uri(uri)
            .body(Body::empty())
            .expect("build request");
        let response = app.oneshot(request).await.expect("router response");
        let (parts, body) = response.into_parts();
        let bytes = axum::body::to_bytes(body, usize::MAX)
            .await
            .expect("read body");
        let json = serde_json::from_slice(&bytes).expect("json body");
        (Response::from_parts(parts, Body::empty()), json)
    }

    fn assert_json_with_security_headers(response: &Response) {
        let headers = response.headers();
        assert_eq!(
            headers.get(header::CONTENT_TYPE).expect("content type"),
            "application/json"
        );
        assert_eq!(headers.get(header::X_FRAME_OPTIONS).expect("frame"), "DENY");
        assert_eq!(
            headers.get(header::X_CONTENT_TYPE_OPTIONS).expect("nosniff"),
            "nosniff"
        );
    }

    #[tokio::test]
    async fn access_token_route() {
        let app = router_with(Arc::new(StaticToken), sharing_drive(), ready_folder());
        let (response, body) = get(app, "/getAccessToken").await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_json_with_security_headers(&response);
        assert_eq!(body, serde_json::json!({"accessToken": "T1"}));
    }

    #[tokio::test]
    async fn users_folder_route() {
        let app = router_with(Arc::new(StaticToken), sharing_drive(), ready_folder());
        let (response, body) = get(app, "/getUsersFolderId").await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_json_with_security_headers(&response);
        assert_eq!(body, serde_json::json!({"usersFolderId": "F123"}));
    }

    #[tokio::test]
    async fn share_route_grants_access() {
        let drive = sharing_drive();
        let app = router_with(Arc::new(StaticToken), drive.clone(), ready_folder());
        let (response, body) = get(app, "/shareFolder?email=foo%40example.com").await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_json_with_security_headers(&response);
        assert_eq!(
            body,
            serde_json::json!({
                "message": "Folder shared with foo@example.com",
                "permissionId": "P1"
            })
        );
        assert_eq!(drive.calls(), ["share F123".to_string()]);
    }

    #[tokio::test]
    async fn share_route_without_email_is_json_400() {
        let drive = sharing_drive();
        let app = router_with(Arc::new(StaticToken), drive.clone(), ready_folder());
        let (response, body) = get(app, "/shareFolder").await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_json_with_security_headers(&response);
        assert_eq!(body, serde_json::json!({"error": "Email address is required"}));
        assert!(drive.calls().is_empty());
    }

    #[tokio::test]
    async fn share_route_with_repeated_email_uses_first() {
        let drive = sharing_drive();
        let app = router_with(Arc::new(StaticToken), drive.clone(), ready_folder());
        let (response, body) = get(app, "/shareFolder?email=a@x.com&email=b@x.com").await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_json_with_security_headers(&response);
        assert_eq!(body["message"], "Folder shared with a@x.com");
        let grants = drive.grants.lock().expect("grants lock").clone();
        assert_eq!(grants.len(), 1);
        assert_eq!(grants[0].1.email_address, "a@x.com");
    }

    #[tokio::test]
    async fn serve_returns_once_connections_drain() {
        let handle = Handle::new();
        let (trigger, triggered) = tokio::sync::oneshot::channel::<()>();
        let app = router_with(Arc::new(StaticToken), sharing_drive(), ready_folder());
        let addr: SocketAddr = "127.0.0.1:0".parse().expect("loopback addr");
        let server = tokio::spawn(serve(app, addr, handle.clone(), async move {
            let _ = triggered.await;
        }));

        let bound = handle.listening().await.expect("server listening");
        let response = reqwest::get(format!("http://{bound}/getUsersFolderId"))
            .await
            .expect("request before shutdown");
        assert_eq!(response.status(), StatusCode::OK);
        drop(response);

        trigger.send(()).expect("trigger shutdown");
        let result = tokio::time::timeout(Duration::from_secs(SHUTDOWN_GRACE_SECS + 5), server)
            .await
            .expect("server drained within grace period")
            .expect("server task");
        assert!(result.is_ok());
        assert_eq!(handle.connection_count(), 0);
    }

    #[tokio::test]
    async fn missing_key_keeps_serving_json_errors() {
        let temp = tempfile::tempdir().expect("tempdir");
        let source = CredentialSource::KeyFile(temp.path().join("missing.json"));
        let tokens = load_token_provider(&source, DRIVE_SCOPE, reqwest::Client::new()).await;
        let folder = Arc::new(FolderState::Unavailable("service account unavailable".into()));
        let app = router_with(tokens, sharing_drive(), folder);

        let (response, body) = get(app.clone(), "/getAccessToken").await;
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_json_with_security_headers(&response);
        assert_eq!(body, serde_json::json!({"error": "Token generation failed"}));

        let (response, body) = get(app, "/getUsersFolderId").await;
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body, serde_json::json!({"error": "Users folder not available"}));
    }
}
