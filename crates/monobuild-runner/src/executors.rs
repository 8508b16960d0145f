//! Executor port implementations backed by shell commands.

use crate::config::CommandSpec;
use crate::shell::{Invocation, ShellRunner};
use async_trait::async_trait;
use monobuild_core::ExecutorError;
use monobuild_core::ids::TargetName;
use monobuild_core::ports::{
    AggregatedTree, RuntimeDeployer, RuntimeInstaller, TransformExecutor, UnitContext,
    ValidateExecutor, ValidationContext,
};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{Instrument, info_span};

/// Directory a unit's pipeline operates on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Workspace {
    pub path: PathBuf,
}

impl Workspace {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

/// `unit=path` lines for every dependency artifact.
fn dependency_artifacts(tree: &AggregatedTree<Workspace>) -> String {
    tree.iter()
        .map(|(unit, workspace)| format!("{}={}", unit, workspace.path.display()))
        .collect::<Vec<_>>()
        .join("\n")
}

pub struct CommandInstaller {
    runner: Arc<ShellRunner>,
    spec: CommandSpec,
}

impl CommandInstaller {
    pub fn new(runner: Arc<ShellRunner>, spec: CommandSpec) -> Self {
        Self { runner, spec }
    }
}

#[async_trait]
impl RuntimeInstaller<Workspace> for CommandInstaller {
    async fn install(
        &self,
        ctx: &UnitContext,
        tree: &AggregatedTree<Workspace>,
    ) -> Result<Workspace, ExecutorError> {
        let invocation = Invocation::new(ctx, &tree.unit_source)
            .with_env("MONOBUILD_DEPENDENCY_ARTIFACTS", dependency_artifacts(tree));
        let output = self
            .runner
            .run(&self.spec, &invocation, None)
            .instrument(info_span!("install"))
            .await?;
        Ok(Workspace::new(
            output.artifact.unwrap_or_else(|| tree.unit_source.clone()),
        ))
    }
}

pub struct CommandDeployer {
    runner: Arc<ShellRunner>,
    spec: Option<CommandSpec>,
}

impl CommandDeployer {
    pub fn new(runner: Arc<ShellRunner>, spec: Option<CommandSpec>) -> Self {
        Self { runner, spec }
    }
}

#[async_trait]
impl RuntimeDeployer<Workspace> for CommandDeployer {
    async fn deploy(
        &self,
        ctx: &UnitContext,
        tree: &AggregatedTree<Workspace>,
        built: Workspace,
    ) -> Result<Workspace, ExecutorError> {
        let Some(spec) = &self.spec else {
            return Ok(built);
        };
        let invocation = Invocation::new(ctx, &built.path)
            .with_env("MONOBUILD_DEPENDENCY_ARTIFACTS", dependency_artifacts(tree));
        let output = self
            .runner
            .run(spec, &invocation, None)
            .instrument(info_span!("deploy"))
            .await?;
        Ok(output.artifact.map(Workspace::new).unwrap_or(built))
    }
}

/// Runs a transform command in the current workspace.
///
/// By default the command is assumed to rewrite that workspace, so the node
/// builder joins earlier validations before it starts.
pub struct CommandTransform {
    runner: Arc<ShellRunner>,
    target: TargetName,
    spec: CommandSpec,
    in_place: bool,
}

impl CommandTransform {
    pub fn new(runner: Arc<ShellRunner>, target: TargetName, spec: CommandSpec) -> Self {
        Self {
            runner,
            target,
            spec,
            in_place: true,
        }
    }

    pub fn with_in_place(mut self, in_place: bool) -> Self {
        self.in_place = in_place;
        self
    }
}

#[async_trait]
impl TransformExecutor<Workspace> for CommandTransform {
    async fn run(
        &self,
        ctx: &UnitContext,
        artifact: Workspace,
    ) -> Result<Workspace, ExecutorError> {
        let invocation = Invocation::new(ctx, &artifact.path)
            .with_env("MONOBUILD_TARGET", self.target.as_str());
        let output = self
            .runner
            .run(&self.spec, &invocation, None)
            .instrument(info_span!("target", target = %self.target))
            .await?;
        Ok(output.artifact.map(Workspace::new).unwrap_or(artifact))
    }

    fn mutates_in_place(&self) -> bool {
        self.in_place
    }
}

pub struct CommandValidate {
    runner: Arc<ShellRunner>,
    target: TargetName,
    spec: CommandSpec,
}

impl CommandValidate {
    pub fn new(runner: Arc<ShellRunner>, target: TargetName, spec: CommandSpec) -> Self {
        Self {
            runner,
            target,
            spec,
        }
    }
}

#[async_trait]
impl ValidateExecutor<Workspace> for CommandValidate {
    async fn check(
        &self,
        cancel: &ValidationContext,
        ctx: &UnitContext,
        artifact: &Workspace,
    ) -> Result<(), ExecutorError> {
        let invocation = Invocation::new(ctx, &artifact.path)
            .with_env("MONOBUILD_TARGET", self.target.as_str());
        self.runner
            .run(&self.spec, &invocation, Some(cancel))
            .instrument(info_span!("target", target = %self.target))
            .await?;
        Ok(())
    }
}
