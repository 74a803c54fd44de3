mod artifact_store;
mod coordination;
mod job_store;

pub use artifact_store::ArtifactStore;
pub use coordination::{
    ClusterStatus, CoordinationConnector, CoordinationService, LeaseId, LockGuard, WatchEvent,
};
pub use job_store::JobStore;
