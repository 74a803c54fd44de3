//! 基础设施层: 存储与协调服务的具体实现

pub mod local_artifact_store;
pub mod memory_coordination;
pub mod memory_job_store;
pub mod sqlite_job_store;

pub use local_artifact_store::LocalArtifactStore;
pub use memory_coordination::{MemoryConnector, MemoryCoordination};
pub use memory_job_store::MemoryJobStore;
pub use sqlite_job_store::SqliteJobStore;
