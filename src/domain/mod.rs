//! Entity model shared by the persistence layer, routing engine, and
//! control-plane facade.

pub mod agent;
pub mod execution;
pub mod ids;
pub mod routing;
pub mod task;
pub mod workspace;

pub use agent::Agent;
pub use execution::{Execution, ExecutionLog, ExecutionResult, ExecutionStatus};
pub use routing::{RoutingStatus, TaskRouting, LOCK_STALE_AFTER_MS, MAX_RETRIES};
pub use task::{Attachment, AuthorType, Comment, Task, TaskStatus};
pub use workspace::{Workspace, WorkspaceSetting};
