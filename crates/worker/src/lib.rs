//! Worker side: master client, task execution and heartbeat reporting.

pub mod executor;
pub mod heartbeat;
pub mod master_client;

pub use executor::{TaskExecutor, TaskListener};
pub use heartbeat::HeartbeatReporter;
pub use master_client::{MasterClient, ResultSink};
