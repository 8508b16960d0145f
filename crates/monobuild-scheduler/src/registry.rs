//! Executor lookup by target name and runtime tag.

use monobuild_core::Artifact;
use monobuild_core::graph::{GraphDescriptor, Runtime};
use monobuild_core::ids::{TargetName, UnitId};
use monobuild_core::ports::{
    RuntimeDeployer, RuntimeInstaller, TransformExecutor, ValidateExecutor,
};
use std::collections::HashMap;
use std::sync::Arc;

/// A registered target, classified by how it treats the artifact.
pub enum TargetExecutor<A: Artifact> {
    /// Replaces the artifact; runs strictly in sequence.
    Transform(Arc<dyn TransformExecutor<A>>),
    /// Reads the artifact; runs concurrently with sibling validations.
    Validate(Arc<dyn ValidateExecutor<A>>),
}

impl<A: Artifact> Clone for TargetExecutor<A> {
    fn clone(&self) -> Self {
        match self {
            TargetExecutor::Transform(exec) => TargetExecutor::Transform(Arc::clone(exec)),
            TargetExecutor::Validate(exec) => TargetExecutor::Validate(Arc::clone(exec)),
        }
    }
}

impl<A: Artifact> TargetExecutor<A> {
    pub fn is_transform(&self) -> bool {
        matches!(self, TargetExecutor::Transform(_))
    }

    pub fn kind(&self) -> &'static str {
        match self {
            TargetExecutor::Transform(_) => "transform",
            TargetExecutor::Validate(_) => "validate",
        }
    }
}

/// Maps target names and runtime tags to executors.
pub struct ExecutorRegistry<A: Artifact> {
    targets: HashMap<TargetName, TargetExecutor<A>>,
    installers: HashMap<Runtime, Arc<dyn RuntimeInstaller<A>>>,
    deployers: HashMap<Runtime, Arc<dyn RuntimeDeployer<A>>>,
}

impl<A: Artifact> ExecutorRegistry<A> {
    pub fn new() -> Self {
        Self {
            targets: HashMap::new(),
            installers: HashMap::new(),
            deployers: HashMap::new(),
        }
    }

    pub fn register_transform(
        &mut self,
        target: impl Into<TargetName>,
        executor: Arc<dyn TransformExecutor<A>>,
    ) {
        self.targets
            .insert(target.into(), TargetExecutor::Transform(executor));
    }

    pub fn register_validate(
        &mut self,
        target: impl Into<TargetName>,
        executor: Arc<dyn ValidateExecutor<A>>,
    ) {
        self.targets
            .insert(target.into(), TargetExecutor::Validate(executor));
    }

    pub fn register_runtime(
        &mut self,
        runtime: Runtime,
        installer: Arc<dyn RuntimeInstaller<A>>,
        deployer: Arc<dyn RuntimeDeployer<A>>,
    ) {
        self.installers.insert(runtime, installer);
        self.deployers.insert(runtime, deployer);
    }

    pub fn with_transform(
        mut self,
        target: impl Into<TargetName>,
        executor: Arc<dyn TransformExecutor<A>>,
    ) -> Self {
        self.register_transform(target, executor);
        self
    }

    pub fn with_validate(
        mut self,
        target: impl Into<TargetName>,
        executor: Arc<dyn ValidateExecutor<A>>,
    ) -> Self {
        self.register_validate(target, executor);
        self
    }

    pub fn with_runtime(
        mut self,
        runtime: Runtime,
        installer: Arc<dyn RuntimeInstaller<A>>,
        deployer: Arc<dyn RuntimeDeployer<A>>,
    ) -> Self {
        self.register_runtime(runtime, installer, deployer);
        self
    }

    pub fn target(&self, target: &TargetName) -> Option<&TargetExecutor<A>> {
        self.targets.get(target)
    }

    pub fn installer(&self, runtime: Runtime) -> Option<&Arc<dyn RuntimeInstaller<A>>> {
        self.installers.get(&runtime)
    }

    pub fn deployer(&self, runtime: Runtime) -> Option<&Arc<dyn RuntimeDeployer<A>>> {
        self.deployers.get(&runtime)
    }

    /// Targets listed in the graph that have no registered executor.
    pub fn missing_targets(&self, graph: &GraphDescriptor) -> Vec<(UnitId, TargetName)> {
        graph
            .iter()
            .flat_map(|(unit, config)| {
                config
                    .targets
                    .iter()
                    .filter(|target| !self.targets.contains_key(*target))
                    .map(move |target| (unit.clone(), target.clone()))
            })
            .collect()
    }

    /// Runtimes used in the graph that lack an installer or a deployer.
    pub fn missing_runtimes(&self, graph: &GraphDescriptor) -> Vec<Runtime> {
        let mut missing: Vec<Runtime> = graph
            .iter()
            .map(|(_, config)| config.runtime)
            .filter(|rt| !self.installers.contains_key(rt) || !self.deployers.contains_key(rt))
            .collect();
        missing.sort();
        missing.dedup();
        missing
    }
}

impl<A: Artifact> Default for ExecutorRegistry<A> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use monobuild_core::ExecutorError;
    use monobuild_core::graph::UnitConfig;
    use monobuild_core::ports::{UnitContext, ValidationContext};

    struct Noop;

    #[async_trait]
    impl ValidateExecutor<u32> for Noop {
        async fn check(
            &self,
            _cancel: &ValidationContext,
            _ctx: &UnitContext,
            _artifact: &u32,
        ) -> Result<(), ExecutorError> {
            Ok(())
        }
    }

    #[test]
    fn test_missing_targets_and_runtimes() {
        let registry = ExecutorRegistry::<u32>::new().with_validate("biome", Arc::new(Noop));
        let graph = GraphDescriptor::default().with_unit(
            "a",
            UnitConfig::new(Runtime::Node).with_targets(["biome", "tsc"]),
        );

        let missing = registry.missing_targets(&graph);
        assert_eq!(missing.len(), 1);
        assert_eq!(missing[0].1.as_str(), "tsc");
        assert_eq!(registry.missing_runtimes(&graph), vec![Runtime::Node]);

        let biome = registry.target(&TargetName::new("biome")).unwrap();
        assert!(!biome.is_transform());
        assert_eq!(biome.kind(), "validate");
    }
}
