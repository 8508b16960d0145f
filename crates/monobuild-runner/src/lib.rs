//! Shell command executors for monobuild.
//!
//! Satisfies the executor ports by running configured commands with `sh -c`.
//! The artifact is a [`Workspace`] directory that commands operate on.

pub mod config;
pub mod error;
pub mod executors;
pub mod shell;

pub use config::{CommandSpec, RunnerConfig, RuntimeSpec, TargetKind, TargetSpec};
pub use error::RunnerError;
pub use executors::{
    CommandDeployer, CommandInstaller, CommandTransform, CommandValidate, Workspace,
};
pub use shell::{CommandOutput, Invocation, OutputStream, ShellRunner};
