mod job_group;
mod messages;
mod task;
mod worker;

pub use job_group::{JobGroup, TaskGroupView};
pub use messages::{
    HeartbeatRequest, LoginRequest, PullResponse, RegisterRequest, ShutdownWorkersRequest,
    TaskAssignment, TaskCallbackRequest, WorkerCommand,
};
pub use task::{Task, TaskState};
pub use worker::{ResourceSnapshot, Worker, WorkerCredential};
