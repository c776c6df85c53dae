//! 共享文件夹解析：查找或创建固定名称的文件夹，并记录就绪状态。

use tracing::{error, info};

use crate::drive::{StorageApi, folder_query};
use crate::error::DriveError;

const LIST_FIELDS: &str = "files(id, name)";
const CREATE_FIELDS: &str = "id";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FolderRecord {
    pub id: String,
    pub name: String,
}

/// Readiness of the shared folder, fixed once at startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FolderState {
    Ready(FolderRecord),
    Unavailable(String),
}

impl FolderState {
    /// 由解析结果构建状态；失败只记录日志，不中断启动。
    pub fn from_resolution(result: Result<FolderRecord, DriveError>) -> Self {
        match result {
            Ok(folder) => {
                info!(folder_id = %folder.id, name = %folder.name, "shared folder ready");
                FolderState::Ready(folder)
            }
            Err(err) => {
                error!(error = %err, "failed to ensure shared folder");
                FolderState::Unavailable(err.to_string())
            }
        }
    }

    pub fn folder_id(&self) -> Option<&str> {
        match self {
            FolderState::Ready(folder) => Some(&folder.id),
            FolderState::Unavailable(_) => None,
        }
    }
}

/// 查找未删除的同名文件夹；不存在时创建一次。
///
/// When several folders share the name, the first one in the listing wins.
pub async fn resolve_folder(api: &dyn StorageApi, name: &str) -> Result<FolderRecord, DriveError> {
    let files = api.list_files(&folder_query(name), LIST_FIELDS).await?;
    if let Some(existing) = files.into_iter().next() {
        info!(folder_id = %existing.id, name, "found existing folder");
        return Ok(FolderRecord {
            id: existing.id,
            name: existing.name.unwrap_or_else(|| name.to_string()),
        });
    }

    let created = api.create_folder(name, CREATE_FIELDS).await?;
    info!(folder_id = %created.id, name, "created new folder");
    Ok(FolderRecord {
        id: created.id,
        name: name.to_string(),
    })
}
