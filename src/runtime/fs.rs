//! FsManager - text file access scoped to a workspace root.
//!
//! Backs the `fs/read_text_file` and `fs/write_text_file` capabilities.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

use crate::api::types::{ApiError, ReadTextFileRequest, WriteTextFileRequest};
use crate::protocols::host::FileSystemProvider;
use crate::runtime::path::{
    canonicalize_workspace_root, resolve_path_in_workspace, resolve_write_target_in_workspace,
};

const MAX_READ_BYTES: u64 = 1024 * 1024;

/// Per-workspace file system provider.
pub struct FsManager {
    workspace_root: PathBuf,
}

impl FsManager {
    /// Create a new FsManager scoped to an existing workspace directory.
    pub fn new(workspace_root: &Path) -> Result<Self, ApiError> {
        Ok(Self {
            workspace_root: canonicalize_workspace_root(workspace_root)?,
        })
    }

    pub fn workspace_root(&self) -> &Path {
        &self.workspace_root
    }

    async fn read_whole_file(&self, path: &str) -> Result<String, ApiError> {
        let resolved = resolve_path_in_workspace(&self.workspace_root, path)?;

        let metadata = fs::metadata(&resolved)
            .await
            .map_err(|e| ApiError::io(&format!("Failed to read metadata for '{path}'"), e))?;

        if !metadata.is_file() {
            return Err(ApiError::invalid(format!("Path is not a file: {path}")));
        }

        if metadata.len() > MAX_READ_BYTES {
            return Err(ApiError::invalid(format!(
                "File too large to read: {path} (max {MAX_READ_BYTES} bytes)"
            )));
        }

        fs::read_to_string(&resolved)
            .await
            .map_err(|e| ApiError::io(&format!("Failed to read file '{path}'"), e))
    }
}

/// Slice `content` to `limit` lines starting at 1-based `line`.
fn select_lines(content: String, line: Option<u32>, limit: Option<u32>) -> String {
    if line.is_none() && limit.is_none() {
        return content;
    }

    let skip = line.map(|line| line.saturating_sub(1) as usize).unwrap_or(0);
    let take = limit.map(|limit| limit as usize).unwrap_or(usize::MAX);

    content
        .split_inclusive('\n')
        .skip(skip)
        .take(take)
        .collect()
}

#[async_trait]
impl FileSystemProvider for FsManager {
    async fn read_text_file(&self, request: ReadTextFileRequest) -> Result<String, ApiError> {
        log::debug!(
            "fs read: path={}, line={:?}, limit={:?}",
            request.path,
            request.line,
            request.limit
        );
        let content = self.read_whole_file(&request.path).await?;
        Ok(select_lines(content, request.line, request.limit))
    }

    /// Write via a temp file in the same directory, then rename over the target.
    async fn write_text_file(&self, request: WriteTextFileRequest) -> Result<(), ApiError> {
        let WriteTextFileRequest { path, content, .. } = request;
        let resolved = resolve_write_target_in_workspace(&self.workspace_root, &path)?;

        match fs::symlink_metadata(&resolved).await {
            Ok(metadata) if metadata.file_type().is_symlink() => {
                return Err(ApiError::invalid(format!("Path is a symlink: {path}")));
            }
            Ok(metadata) if metadata.is_dir() => {
                return Err(ApiError::invalid(format!("Path is a directory: {path}")));
            }
            Ok(_) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                return Err(ApiError::io(&format!("Failed to read metadata for '{path}'"), e));
            }
        }

        let parent = resolved
            .parent()
            .ok_or_else(|| ApiError::invalid(format!("Path must include a parent directory: {path}")))?;
        let temp_path = parent.join(format!(".tmp_write_{}", Uuid::new_v4()));

        if let Err(e) = write_temp_file(&temp_path, content.as_bytes()).await {
            let _ = fs::remove_file(&temp_path).await;
            return Err(ApiError::io(&format!("Failed to write temp file for '{path}'"), e));
        }

        if let Err(e) = fs::rename(&temp_path, &resolved).await {
            let _ = fs::remove_file(&temp_path).await;
            return Err(ApiError::io(&format!("Failed to replace file '{path}'"), e));
        }

        log::debug!("fs write: path={path}, bytes={}", content.len());
        Ok(())
    }
}

async fn write_temp_file(temp_path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let mut file = fs::OpenOptions::new()
        .create_new(true)
        .write(true)
        .open(temp_path)
        .await?;
    file.write_all(bytes).await?;
    file.flush().await?;
    file.sync_all().await
}
