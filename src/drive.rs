//! Google Drive v3 客户端：文件检索、文件夹创建与权限授予。

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::config::FOLDER_MIME_TYPE;
use crate::credentials::TokenProvider;
use crate::error::DriveError;

/// A file entry as returned by the Drive API.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct DriveFile {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FileList {
    #[serde(default)]
    files: Vec<DriveFile>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct FolderMetadata<'a> {
    name: &'a str,
    mime_type: &'static str,
}

/// 权限授予请求：角色、授予对象类型与邮箱。
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PermissionGrant {
    pub role: String,
    #[serde(rename = "type")]
    pub grantee_type: String,
    pub email_address: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Permission {
    pub id: String,
}

/// Remote storage operations the relay depends on.
#[async_trait]
pub trait StorageApi: Send + Sync {
    async fn list_files(&self, query: &str, fields: &str) -> Result<Vec<DriveFile>, DriveError>;

    async fn create_folder(&self, name: &str, fields: &str) -> Result<DriveFile, DriveError>;

    async fn create_permission(
        &self,
        file_id: &str,
        grant: &PermissionGrant,
        fields: &str,
    ) -> Result<Permission, DriveError>;
}

/// 基于 reqwest 的 Drive REST 客户端。
pub struct DriveClient {
    http: reqwest::Client,
    endpoint: String,
    tokens: Arc<dyn TokenProvider>,
}

impl DriveClient {
    pub fn new(http: reqwest::Client, endpoint: &str, tokens: Arc<dyn TokenProvider>) -> Self {
        Self {
            http,
            endpoint: endpoint.trim_end_matches('/').to_string(),
            tokens,
        }
    }

    fn files_url(&self) -> String {
        format!("{}/drive/v3/files", self.endpoint)
    }

    /// 附加 Bearer 令牌发送请求，并解析成功响应。
    async fn send<T: DeserializeOwned>(
        &self,
        request: reqwest::RequestBuilder,
    ) -> Result<T, DriveError> {
        let token = self.tokens.access_token().await?;
        let response = request.bearer_auth(&token.token).send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(DriveError::Status {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response.json().await?)
    }
}

#[async_trait]
impl StorageApi for DriveClient {
    async fn list_files(&self, query: &str, fields: &str) -> Result<Vec<DriveFile>, DriveError> {
        let request = self
            .http
            .get(self.files_url())
            .query(&[("q", query), ("fields", fields)]);
        let list: FileList = self.send(request).await?;
        Ok(list.files)
    }

    async fn create_folder(&self, name: &str, fields: &str) -> Result<DriveFile, DriveError> {
        let request = self
            .http
            .post(self.files_url())
            .query(&[("fields", fields)])
            .json(&FolderMetadata {
                name,
                mime_type: FOLDER_MIME_TYPE,
            });
        self.send(request).await
    }

    async fn create_permission(
        &self,
        file_id: &str,
        grant: &PermissionGrant,
        fields: &str,
    ) -> Result<Permission, DriveError> {
        let url = format!("{}/{}/permissions", self.files_url(), file_id);
        let request = self.http.post(url).query(&[("fields", fields)]).json(grant);
        self.send(request).await
    }
}

/// 构造按名称检索未删除文件夹的查询语句。
pub fn folder_query(name: &str) -> String {
    let escaped = name.replace('\\', "\\\\").replace('\'', "\\'");
    format!("name = '{escaped}' and mimeType = '{FOLDER_MIME_TYPE}' and trashed = false")
}
