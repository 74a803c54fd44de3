//! Shared test helpers: entity builders and port mocks.

pub mod builders;
pub mod mocks;

pub use builders::{JobGroupBuilder, TaskBuilder, WorkerBuilder};
pub use mocks::{MockArtifactStore, MockJobStore};
