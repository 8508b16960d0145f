//! Command configuration for runtimes and targets.

use crate::executors::{
    CommandDeployer, CommandInstaller, CommandTransform, CommandValidate, Workspace,
};
use crate::shell::ShellRunner;
use monobuild_core::graph::Runtime;
use monobuild_core::ids::TargetName;
use monobuild_core::{Error, Result};
use monobuild_scheduler::ExecutorRegistry;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

/// A shell command and how to run it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct CommandSpec {
    pub command: String,
    /// Overrides the runner-wide default timeout.
    #[serde(default)]
    pub timeout_seconds: Option<u64>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
}

impl CommandSpec {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            timeout_seconds: None,
            env: BTreeMap::new(),
        }
    }

    pub fn with_timeout(mut self, seconds: u64) -> Self {
        self.timeout_seconds = Some(seconds);
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum TargetKind {
    /// May replace the workspace; runs in sequence.
    Transform,
    /// Read-only check; runs alongside other checks.
    Validate,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct TargetSpec {
    pub kind: TargetKind,
    /// Transforms only. `false` when the command writes its result to a fresh
    /// directory reported through `artifact=`, so earlier validations may keep
    /// reading the previous workspace while it runs.
    #[serde(default = "default_in_place")]
    pub in_place: bool,
    #[serde(flatten)]
    pub command: CommandSpec,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct RuntimeSpec {
    pub install: CommandSpec,
    /// Without a deploy command the built workspace is passed through.
    #[serde(default)]
    pub deploy: Option<CommandSpec>,
}

/// Commands for every runtime and target the graph uses.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct RunnerConfig {
    #[serde(default = "default_shell")]
    pub shell: String,
    #[serde(default = "default_timeout")]
    pub default_timeout_seconds: Option<u64>,
    #[serde(default)]
    pub runtimes: BTreeMap<Runtime, RuntimeSpec>,
    #[serde(default)]
    pub targets: BTreeMap<TargetName, TargetSpec>,
}

fn default_in_place() -> bool {
    true
}

fn default_shell() -> String {
    "sh".to_string()
}

fn default_timeout() -> Option<u64> {
    Some(3600)
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            shell: default_shell(),
            default_timeout_seconds: default_timeout(),
            runtimes: BTreeMap::new(),
            targets: BTreeMap::new(),
        }
    }
}

impl RunnerConfig {
    pub fn from_yaml_str(content: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.shell.trim().is_empty() {
            return Err(Error::Config("shell must not be empty".to_string()));
        }
        let empty = self
            .runtimes
            .values()
            .flat_map(|rt| std::iter::once(&rt.install).chain(rt.deploy.as_ref()))
            .chain(self.targets.values().map(|t| &t.command))
            .any(|spec| spec.command.trim().is_empty());
        if empty {
            return Err(Error::Config("commands must not be empty".to_string()));
        }
        Ok(())
    }

    /// Executor registry running the configured commands.
    pub fn registry(&self) -> ExecutorRegistry<Workspace> {
        let runner = Arc::new(ShellRunner::new(&self.shell, self.default_timeout_seconds));
        let mut registry = ExecutorRegistry::new();

        for (runtime, spec) in &self.runtimes {
            registry.register_runtime(
                *runtime,
                Arc::new(CommandInstaller::new(Arc::clone(&runner), spec.install.clone())),
                Arc::new(CommandDeployer::new(Arc::clone(&runner), spec.deploy.clone())),
            );
        }

        for (target, spec) in &self.targets {
            match spec.kind {
                TargetKind::Transform => registry.register_transform(
                    target.clone(),
                    Arc::new(
                        CommandTransform::new(
                            Arc::clone(&runner),
                            target.clone(),
                            spec.command.clone(),
                        )
                        .with_in_place(spec.in_place),
                    ),
                ),
                TargetKind::Validate => registry.register_validate(
                    target.clone(),
                    Arc::new(CommandValidate::new(
                        Arc::clone(&runner),
                        target.clone(),
                        spec.command.clone(),
                    )),
                ),
            }
        }

        registry
    }
}
