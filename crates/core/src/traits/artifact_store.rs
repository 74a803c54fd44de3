use std::path::Path;

use async_trait::async_trait;

use crate::errors::SchedulerResult;

/// 制品存储端口: 任务脚本与执行日志的共享存储
///
/// 错误以类型化条件上抛: 权限不足、已存在、未找到；其余错误附带上下文透传。
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    /// 从远端目录拉取制品到本地路径
    async fn download(
        &self,
        local: &Path,
        remote_dir: &str,
        remote_name: &str,
    ) -> SchedulerResult<()>;

    /// 上传本地文件到远端目录
    async fn upload(
        &self,
        local: &Path,
        remote_dir: &str,
        remote_name: &str,
    ) -> SchedulerResult<()>;

    async fn mkdir_if_not_exist(&self, path: &str) -> SchedulerResult<()>;

    async fn isfile(&self, path: &str) -> SchedulerResult<bool>;

    async fn isdir(&self, path: &str) -> SchedulerResult<bool>;

    async fn isexist(&self, path: &str) -> SchedulerResult<bool>;
}
