use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::debug;

use taskmaster_core::traits::ArtifactStore;
use taskmaster_core::{SchedulerError, SchedulerResult};

/// 共享目录制品存储实现
///
/// 远端路径都是相对root_dir的目录名，适配NFS等挂载型共享存储。
pub struct LocalArtifactStore {
    root_dir: PathBuf,
}

impl LocalArtifactStore {
    pub fn new(root_dir: impl Into<PathBuf>) -> Self {
        Self {
            root_dir: root_dir.into(),
        }
    }

    fn remote_path(&self, remote_dir: &str, remote_name: &str) -> PathBuf {
        self.root_dir.join(remote_dir).join(remote_name)
    }

    fn map_io_error(err: std::io::Error, path: &Path) -> SchedulerError {
        let path = path.display().to_string();
        match err.kind() {
            ErrorKind::NotFound => SchedulerError::ArtifactNotFound(path),
            ErrorKind::PermissionDenied => SchedulerError::ArtifactPermissionDenied(path),
            ErrorKind::AlreadyExists => SchedulerError::ArtifactAlreadyExists(path),
            _ => SchedulerError::ArtifactStore(format!("{path}: {err}")),
        }
    }
}

#[async_trait]
impl ArtifactStore for LocalArtifactStore {
    async fn download(
        &self,
        local: &Path,
        remote_dir: &str,
        remote_name: &str,
    ) -> SchedulerResult<()> {
        let remote = self.remote_path(remote_dir, remote_name);
        debug!("下载制品 {} -> {}", remote.display(), local.display());
        if let Some(parent) = local.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| Self::map_io_error(e, parent))?;
        }
        tokio::fs::copy(&remote, local)
            .await
            .map_err(|e| Self::map_io_error(e, &remote))?;
        Ok(())
    }

    async fn upload(
        &self,
        local: &Path,
        remote_dir: &str,
        remote_name: &str,
    ) -> SchedulerResult<()> {
        let dir = self.root_dir.join(remote_dir);
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| Self::map_io_error(e, &dir))?;
        let remote = dir.join(remote_name);
        debug!("上传制品 {} -> {}", local.display(), remote.display());
        tokio::fs::copy(local, &remote)
            .await
            .map_err(|e| Self::map_io_error(e, local))?;
        Ok(())
    }

    async fn mkdir_if_not_exist(&self, path: &str) -> SchedulerResult<()> {
        let dir = self.root_dir.join(path);
        match tokio::fs::create_dir_all(&dir).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::AlreadyExists => Ok(()),
            Err(e) => Err(Self::map_io_error(e, &dir)),
        }
    }

    async fn isfile(&self, path: &str) -> SchedulerResult<bool> {
        let full = self.root_dir.join(path);
        match tokio::fs::metadata(&full).await {
            Ok(meta) => Ok(meta.is_file()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(Self::map_io_error(e, &full)),
        }
    }

    async fn isdir(&self, path: &str) -> SchedulerResult<bool> {
        let full = self.root_dir.join(path);
        match tokio::fs::metadata(&full).await {
            Ok(meta) => Ok(meta.is_dir()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(Self::map_io_error(e, &full)),
        }
    }

    async fn isexist(&self, path: &str) -> SchedulerResult<bool> {
        let full = self.root_dir.join(path);
        match tokio::fs::metadata(&full).await {
            Ok(_) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(Self::map_io_error(e, &full)),
        }
    }
}
