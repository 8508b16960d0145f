//! Dependency-ordered build scheduling for monobuild.

pub mod dag;
pub mod node;
pub mod registry;
pub mod scheduler;
pub mod store;

pub use dag::{DagBuilder, DagError, UnitDag};
pub use node::NodeBuilder;
pub use registry::{ExecutorRegistry, TargetExecutor};
pub use scheduler::{BuildOutcome, BuildSession, FirstError, Scheduler, SchedulerConfig};
pub use store::ResultStore;
