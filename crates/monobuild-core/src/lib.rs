//! monobuild core
//!
//! Domain types, executor ports, and error handling for monobuild.
//! This crate has minimal dependencies and defines the shared vocabulary
//! used by the scheduler, the command runner, and the CLI.

pub mod error;
pub mod graph;
pub mod ids;
pub mod output;
pub mod ports;
pub mod record;

pub use error::{Error, ExecutorError, Result};
pub use graph::{GraphDescriptor, Runtime, UnitConfig};
pub use ids::*;
pub use output::{BuildReport, OutputTree, UnitOutcome};
pub use ports::Artifact;
pub use record::{BuildRecord, Phase, UnitState};
