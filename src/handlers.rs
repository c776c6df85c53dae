//! 令牌、文件夹 ID 与共享接口处理器。

use axum::extract::rejection::QueryRejection;
use axum::extract::{Extension, Query};
use axum::response::Json as JsonResponse;
use serde::Serialize;
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::config::{SHARE_GRANTEE_TYPE, SHARE_ROLE};
use crate::credentials::TokenProvider;
use crate::drive::{PermissionGrant, StorageApi};
use crate::error::ApiError;
use crate::folder::FolderState;

const PERMISSION_FIELDS: &str = "id";

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct AccessTokenResponse {
    access_token: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct UsersFolderResponse {
    users_folder_id: String,
}

/// Raw query pairs; keeps repeated keys instead of rejecting them.
pub(crate) type QueryPairs = Vec<(String, String)>;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ShareResponse {
    message: String,
    permission_id: String,
}

/// 为服务账号签发新的访问令牌。
pub async fn get_access_token(
    Extension(tokens): Extension<Arc<dyn TokenProvider>>,
) -> Result<JsonResponse<AccessTokenResponse>, ApiError> {
    let token = tokens.access_token().await.map_err(|err| {
        error!(error = %err, "token generation failed");
        ApiError::Internal("Token generation failed".into())
    })?;
    Ok(JsonResponse(AccessTokenResponse {
        access_token: token.token,
    }))
}

/// 返回启动时解析得到的共享文件夹 ID。
pub async fn get_users_folder_id(
    Extension(folder): Extension<Arc<FolderState>>,
) -> Result<JsonResponse<UsersFolderResponse>, ApiError> {
    match folder.as_ref() {
        FolderState::Ready(record) => Ok(JsonResponse(UsersFolderResponse {
            users_folder_id: record.id.clone(),
        })),
        FolderState::Unavailable(reason) => {
            warn!(reason = %reason, "users folder requested before resolution succeeded");
            Err(ApiError::Unavailable("Users folder not available".into()))
        }
    }
}

/// 将共享文件夹的写入权限授予指定邮箱。
///
/// An unresolved folder is not checked here; the grant goes out with an
/// empty file id and the remote rejection is reported.
pub async fn share_folder(
    query: Result<Query<QueryPairs>, QueryRejection>,
    Extension(drive): Extension<Arc<dyn StorageApi>>,
    Extension(folder): Extension<Arc<FolderState>>,
) -> Result<JsonResponse<ShareResponse>, ApiError> {
    let Query(pairs) = query.map_err(|rejection| {
        warn!(error = %rejection.body_text(), "rejected share query");
        ApiError::BadRequest(rejection.body_text())
    })?;
    let Some(email) = first_email(pairs) else {
        return Err(ApiError::BadRequest("Email address is required".into()));
    };

    let grant = PermissionGrant {
        role: SHARE_ROLE.to_string(),
        grantee_type: SHARE_GRANTEE_TYPE.to_string(),
        email_address: email.clone(),
    };
    let file_id = folder.folder_id().unwrap_or_default();
    let permission = drive
        .create_permission(file_id, &grant, PERMISSION_FIELDS)
        .await
        .map_err(|err| {
            error!(error = %err, email = %email, "failed to share folder");
            ApiError::Internal("Failed to share folder".into())
        })?;

    info!(email = %email, permission_id = %permission.id, "folder shared");
    Ok(JsonResponse(ShareResponse {
        message: format!("Folder shared with {email}"),
        permission_id: permission.id,
    }))
}

/// 取第一个 `email` 参数；空值视为缺失。
fn first_email(pairs: QueryPairs) -> Option<String> {
    pairs
        .into_iter()
        .find(|(key, _)| key == "email")
        .map(|(_, value)| value)
        .filter(|email| !email.is_empty())
}
