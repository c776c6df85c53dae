//! 统一的错误类型：凭据错误、远端存储错误与 HTTP 响应错误。

use axum::http::StatusCode;
use axum::response::{IntoResponse, Json as JsonResponse, Response};
use serde::Serialize;

/// 凭据加载或令牌签发失败。
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("failed to read credentials: {0}")]
    Io(#[from] std::io::Error),
    #[error("service account unavailable: {0}")]
    Unavailable(String),
    #[error("invalid service account key: {0}")]
    InvalidKey(String),
    #[error("token request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("token endpoint returned {status}: {body}")]
    Rejected { status: u16, body: String },
}

/// 远端存储 API 调用失败。
#[derive(Debug, thiserror::Error)]
pub enum DriveError {
    #[error("authorization failed: {0}")]
    Auth(#[from] AuthError),
    #[error("drive request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("drive returned {status}: {body}")]
    Status { status: u16, body: String },
}

/// 返回给调用方的错误，始终序列化为 `{"error": ...}`。
#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    Unavailable(String),
    Internal(String),
}

#[derive(Serialize)]
struct ErrorBody<'a> {
    error: &'a str,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, msg) = match &self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Unavailable(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };
        (status, JsonResponse(ErrorBody { error: msg })).into_response()
    }
}
