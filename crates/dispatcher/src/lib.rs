//! 调度层: 任务分配、Worker机群管理与主备协调

pub mod fleet;
pub mod ha;
pub mod scheduler;
pub mod strategies;

pub use fleet::{WorkerFleetManager, WorkerRemovalListener};
pub use ha::{FatalHandler, HaCoordinator, ProcessExitHandler};
pub use scheduler::Scheduler;
pub use strategies::{create_rule, LeastLoadedRule, RandomRule, ScheduleRule};
