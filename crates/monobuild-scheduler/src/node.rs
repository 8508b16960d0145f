//! Per-unit build pipeline: aggregate, install, targets, deploy.

use crate::registry::{ExecutorRegistry, TargetExecutor};
use monobuild_core::graph::UnitConfig;
use monobuild_core::ids::{TargetName, UnitId};
use monobuild_core::ports::{
    AggregatedTree, CancelHandle, UnitContext, ValidateExecutor, ValidationContext,
};
use monobuild_core::record::Phase;
use monobuild_core::{Artifact, Error, ExecutorError, Result};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::task::{JoinError, JoinSet};
use tracing::{Instrument, debug, info, warn};

/// Produces the final artifact of one unit from its dependencies' artifacts.
pub struct NodeBuilder<A: Artifact> {
    registry: Arc<ExecutorRegistry<A>>,
    source_root: PathBuf,
}

impl<A: Artifact> NodeBuilder<A> {
    pub fn new(registry: Arc<ExecutorRegistry<A>>, source_root: impl Into<PathBuf>) -> Self {
        Self {
            registry,
            source_root: source_root.into(),
        }
    }

    pub fn registry(&self) -> &ExecutorRegistry<A> {
        &self.registry
    }

    pub fn source_root(&self) -> &Path {
        &self.source_root
    }

    pub fn unit_context(&self, unit: &UnitId, config: &UnitConfig) -> UnitContext {
        UnitContext {
            source_root: self.source_root.clone(),
            unit: unit.clone(),
            runtime: config.runtime,
            unit_source: self.source_root.join(unit.as_path()),
            dependencies: config.dependencies.iter().cloned().collect(),
            direct_dependencies: config.direct_dependencies.iter().cloned().collect(),
        }
    }

    /// Run the full pipeline for a unit. Any phase failure aborts the rest.
    pub async fn build(
        &self,
        unit: &UnitId,
        config: &UnitConfig,
        dependencies: BTreeMap<UnitId, A>,
    ) -> Result<A> {
        let ctx = Arc::new(self.unit_context(unit, config));
        let tree = AggregatedTree::new(ctx.unit_source.clone(), dependencies);

        let installer = self.registry.installer(config.runtime).ok_or_else(|| {
            Error::UnsupportedRuntime {
                unit: unit.clone(),
                runtime: config.runtime,
                phase: Phase::Install,
            }
        })?;
        debug!(runtime = %config.runtime, dependencies = tree.len(), "Installing unit");
        let installed = installer
            .install(&ctx, &tree)
            .await
            .map_err(|source| Error::PhaseFailed {
                unit: unit.clone(),
                phase: Phase::Install,
                source,
            })?;

        let built = self.run_targets(&ctx, &config.targets, installed).await?;

        let deployer = self.registry.deployer(config.runtime).ok_or_else(|| {
            Error::UnsupportedRuntime {
                unit: unit.clone(),
                runtime: config.runtime,
                phase: Phase::Deploy,
            }
        })?;
        debug!(runtime = %config.runtime, "Deploying unit");
        deployer
            .deploy(&ctx, &tree, built)
            .await
            .map_err(|source| Error::PhaseFailed {
                unit: unit.clone(),
                phase: Phase::Deploy,
                source,
            })
    }

    async fn run_targets(
        &self,
        ctx: &Arc<UnitContext>,
        targets: &[TargetName],
        mut artifact: A,
    ) -> Result<A> {
        let mut validations = ValidationGroup::new(ctx.unit.clone());

        for target in targets {
            // Surface validations that already failed before doing more work.
            validations.check_finished()?;

            let executor = self
                .registry
                .target(target)
                .ok_or_else(|| Error::UnknownTarget {
                    unit: ctx.unit.clone(),
                    target: target.clone(),
                })?;

            match executor {
                TargetExecutor::Transform(exec) => {
                    if exec.mutates_in_place() {
                        // Earlier validations still read the storage this rewrites.
                        validations.join_running().await?;
                    }
                    debug!(target = %target, "Running transform target");
                    artifact = exec.run(ctx, artifact).await.map_err(|source| {
                        Error::TargetExecution {
                            unit: ctx.unit.clone(),
                            target: target.clone(),
                            source,
                        }
                    })?;
                }
                TargetExecutor::Validate(exec) => {
                    debug!(target = %target, "Launching validate target");
                    let snapshot = artifact.clone();
                    validations.spawn(target.clone(), Arc::clone(exec), Arc::clone(ctx), snapshot);
                }
            }
        }

        validations.wait().await?;
        Ok(artifact)
    }
}

type ValidationResult = (TargetName, std::result::Result<(), ExecutorError>);

/// Concurrent validate targets of a single unit.
///
/// The first failure cancels the rest. Dropping the group cancels and
/// aborts anything still running.
struct ValidationGroup {
    unit: UnitId,
    tasks: JoinSet<ValidationResult>,
    cancel: CancelHandle,
    ctx: ValidationContext,
}

impl ValidationGroup {
    fn new(unit: UnitId) -> Self {
        let (cancel, ctx) = CancelHandle::new();
        Self {
            unit,
            tasks: JoinSet::new(),
            cancel,
            ctx,
        }
    }

    fn spawn<A: Artifact>(
        &mut self,
        target: TargetName,
        executor: Arc<dyn ValidateExecutor<A>>,
        unit_ctx: Arc<UnitContext>,
        snapshot: A,
    ) {
        let cancel = self.ctx.clone();
        self.tasks.spawn(
            async move {
                let result = executor.check(&cancel, &unit_ctx, &snapshot).await;
                (target, result)
            }
            .instrument(tracing::Span::current()),
        );
    }

    fn check_finished(&mut self) -> Result<()> {
        while let Some(joined) = self.tasks.try_join_next() {
            self.settle(joined)?;
        }
        Ok(())
    }

    async fn join_running(&mut self) -> Result<()> {
        while let Some(joined) = self.tasks.join_next().await {
            self.settle(joined)?;
        }
        Ok(())
    }

    async fn wait(mut self) -> Result<()> {
        self.join_running().await
    }

    fn settle(&mut self, joined: std::result::Result<ValidationResult, JoinError>) -> Result<()> {
        match joined {
            Ok((target, Ok(()))) => {
                debug!(target = %target, "Validate target passed");
                Ok(())
            }
            Ok((target, Err(source))) => {
                info!(
                    target = %target,
                    error = %source,
                    "Validate target failed, cancelling siblings"
                );
                self.abort();
                Err(Error::TargetExecution {
                    unit: self.unit.clone(),
                    target,
                    source,
                })
            }
            Err(join_err) if join_err.is_cancelled() => Ok(()),
            Err(join_err) => {
                warn!(error = %join_err, "Validate task panicked");
                self.abort();
                Err(Error::Internal(format!(
                    "Validate task for unit {} panicked: {}",
                    self.unit, join_err
                )))
            }
        }
    }

    fn abort(&mut self) {
        self.cancel.cancel();
        self.tasks.abort_all();
    }
}

impl Drop for ValidationGroup {
    fn drop(&mut self) {
        if !self.tasks.is_empty() {
            self.cancel.cancel();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use monobuild_core::graph::Runtime;
    use monobuild_core::ports::{RuntimeDeployer, RuntimeInstaller, TransformExecutor};
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::time::Duration;

    type Log = Vec<String>;

    struct Install {
        fail: bool,
    }

    #[async_trait]
    impl RuntimeInstaller<Log> for Install {
        async fn install(
            &self,
            ctx: &UnitContext,
            tree: &AggregatedTree<Log>,
        ) -> std::result::Result<Log, ExecutorError> {
            if self.fail {
                return Err(ExecutorError::new("install exploded"));
            }
            Ok(vec![format!("install:{}:{}", ctx.unit, tree.len())])
        }
    }

    struct Deploy;

    #[async_trait]
    impl RuntimeDeployer<Log> for Deploy {
        async fn deploy(
            &self,
            _ctx: &UnitContext,
            _tree: &AggregatedTree<Log>,
            mut built: Log,
        ) -> std::result::Result<Log, ExecutorError> {
            built.push("deploy".to_string());
            Ok(built)
        }
    }

    struct Append(&'static str, Arc<AtomicUsize>);

    #[async_trait]
    impl TransformExecutor<Log> for Append {
        async fn run(
            &self,
            _ctx: &UnitContext,
            mut artifact: Log,
        ) -> std::result::Result<Log, ExecutorError> {
            self.1.fetch_add(1, Ordering::SeqCst);
            artifact.push(self.0.to_string());
            Ok(artifact)
        }
    }

    #[derive(Default)]
    struct Observe {
        seen: Mutex<Vec<(String, Log)>>,
    }

    struct Check {
        name: &'static str,
        observe: Arc<Observe>,
        fail: bool,
    }

    #[async_trait]
    impl ValidateExecutor<Log> for Check {
        async fn check(
            &self,
            _cancel: &ValidationContext,
            _ctx: &UnitContext,
            artifact: &Log,
        ) -> std::result::Result<(), ExecutorError> {
            self.observe
                .seen
                .lock()
                .unwrap()
                .push((self.name.to_string(), artifact.clone()));
            if self.fail {
                Err(ExecutorError::new(format!("{} found problems", self.name)))
            } else {
                Ok(())
            }
        }
    }

    /// Blocks until cancelled. Keeps the context it was handed.
    #[derive(Default)]
    struct Slow {
        handed: Mutex<Option<ValidationContext>>,
    }

    #[async_trait]
    impl ValidateExecutor<Log> for Slow {
        async fn check(
            &self,
            cancel: &ValidationContext,
            _ctx: &UnitContext,
            _artifact: &Log,
        ) -> std::result::Result<(), ExecutorError> {
            *self.handed.lock().unwrap() = Some(cancel.clone());
            tokio::select! {
                _ = cancel.cancelled() => Err(ExecutorError::cancelled()),
                _ = tokio::time::sleep(Duration::from_secs(30)) => Ok(()),
            }
        }
    }

    /// Passes after a delay.
    struct Lint {
        finished: Arc<AtomicBool>,
    }

    #[async_trait]
    impl ValidateExecutor<Log> for Lint {
        async fn check(
            &self,
            _cancel: &ValidationContext,
            _ctx: &UnitContext,
            _artifact: &Log,
        ) -> std::result::Result<(), ExecutorError> {
            tokio::time::sleep(Duration::from_millis(50)).await;
            self.finished.store(true, Ordering::SeqCst);
            Ok(())
        }
    }

    /// Records whether the lint had finished when it started.
    struct Rewrite {
        in_place: bool,
        lint_finished: Arc<AtomicBool>,
        saw_lint_finished: Mutex<Option<bool>>,
    }

    #[async_trait]
    impl TransformExecutor<Log> for Rewrite {
        async fn run(
            &self,
            _ctx: &UnitContext,
            mut artifact: Log,
        ) -> std::result::Result<Log, ExecutorError> {
            *self.saw_lint_finished.lock().unwrap() =
                Some(self.lint_finished.load(Ordering::SeqCst));
            artifact.push("rewrite".to_string());
            Ok(artifact)
        }

        fn mutates_in_place(&self) -> bool {
            self.in_place
        }
    }

    fn registry() -> ExecutorRegistry<Log> {
        ExecutorRegistry::new().with_runtime(
            Runtime::Node,
            Arc::new(Install { fail: false }),
            Arc::new(Deploy),
        )
    }

    fn config(targets: &[&str]) -> UnitConfig {
        UnitConfig::new(Runtime::Node).with_targets(targets.iter().copied())
    }

    #[tokio::test]
    async fn test_transforms_run_in_order_and_validations_see_snapshots() {
        let observe = Arc::new(Observe::default());
        let calls = Arc::new(AtomicUsize::new(0));
        let registry = registry()
            .with_validate(
                "biome",
                Arc::new(Check {
                    name: "biome",
                    observe: Arc::clone(&observe),
                    fail: false,
                }),
            )
            .with_transform("tsc", Arc::new(Append("tsc", Arc::clone(&calls))))
            .with_transform("bundle", Arc::new(Append("bundle", Arc::clone(&calls))))
            .with_validate(
                "mocha-c8",
                Arc::new(Check {
                    name: "mocha-c8",
                    observe: Arc::clone(&observe),
                    fail: false,
                }),
            );

        let builder = NodeBuilder::new(Arc::new(registry), "/repo");
        let artifact = builder
            .build(
                &UnitId::new("tools/haywire"),
                &config(&["biome", "tsc", "bundle", "mocha-c8"]),
                BTreeMap::new(),
            )
            .await
            .unwrap();

        assert_eq!(
            artifact,
            vec!["install:tools/haywire:0", "tsc", "bundle", "deploy"]
        );
        assert_eq!(calls.load(Ordering::SeqCst), 2);

        let mut seen = observe.seen.lock().unwrap().clone();
        seen.sort();
        assert_eq!(seen[0].0, "biome");
        assert_eq!(seen[0].1, vec!["install:tools/haywire:0"]);
        assert_eq!(seen[1].0, "mocha-c8");
        assert_eq!(seen[1].1, vec!["install:tools/haywire:0", "tsc", "bundle"]);
    }

    #[tokio::test]
    async fn test_failing_validation_cancels_siblings() {
        let observe = Arc::new(Observe::default());
        let slow = Arc::new(Slow::default());
        let registry = registry()
            .with_validate("slow", Arc::clone(&slow) as Arc<dyn ValidateExecutor<Log>>)
            .with_validate(
                "biome",
                Arc::new(Check {
                    name: "biome",
                    observe: Arc::clone(&observe),
                    fail: false,
                }),
            )
            .with_validate(
                "eslint",
                Arc::new(Check {
                    name: "eslint",
                    observe: Arc::clone(&observe),
                    fail: true,
                }),
            );

        let builder = NodeBuilder::new(Arc::new(registry), "/repo");
        let started = std::time::Instant::now();
        let err = builder
            .build(
                &UnitId::new("a"),
                &config(&["slow", "biome", "eslint"]),
                BTreeMap::new(),
            )
            .await
            .unwrap_err();

        assert!(started.elapsed() < Duration::from_secs(10));
        match err {
            Error::TargetExecution { unit, target, source } => {
                assert_eq!(unit.as_str(), "a");
                assert_eq!(target.as_str(), "eslint");
                assert_eq!(source.message(), "eslint found problems");
            }
            other => panic!("unexpected error: {other}"),
        }

        let handed = slow.handed.lock().unwrap().clone();
        assert!(handed.expect("slow validation started").is_cancelled());
    }

    async fn rewrite_after_lint(in_place: bool) -> Option<bool> {
        let lint_finished = Arc::new(AtomicBool::new(false));
        let rewrite = Arc::new(Rewrite {
            in_place,
            lint_finished: Arc::clone(&lint_finished),
            saw_lint_finished: Mutex::new(None),
        });
        let registry = registry()
            .with_validate("eslint", Arc::new(Lint { finished: lint_finished }))
            .with_transform("tsc", Arc::clone(&rewrite) as Arc<dyn TransformExecutor<Log>>);

        let builder = NodeBuilder::new(Arc::new(registry), "/repo");
        let artifact = builder
            .build(&UnitId::new("a"), &config(&["eslint", "tsc"]), BTreeMap::new())
            .await
            .unwrap();
        assert_eq!(artifact, vec!["install:a:0", "rewrite", "deploy"]);

        let saw = *rewrite.saw_lint_finished.lock().unwrap();
        saw
    }

    #[tokio::test(start_paused = true)]
    async fn test_in_place_transform_waits_for_earlier_validations() {
        assert_eq!(rewrite_after_lint(true).await, Some(true));
    }

    #[tokio::test(start_paused = true)]
    async fn test_separate_output_transform_runs_alongside_validations() {
        assert_eq!(rewrite_after_lint(false).await, Some(false));
    }

    #[tokio::test]
    async fn test_unknown_target() {
        let builder = NodeBuilder::new(Arc::new(registry()), "/repo");
        let err = builder
            .build(&UnitId::new("a"), &config(&["nope"]), BTreeMap::new())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            Error::UnknownTarget { ref target, .. } if target.as_str() == "nope"
        ));
    }

    #[tokio::test]
    async fn test_unsupported_runtime() {
        let builder = NodeBuilder::new(Arc::new(ExecutorRegistry::<Log>::new()), "/repo");
        let err = builder
            .build(&UnitId::new("a"), &config(&[]), BTreeMap::new())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            Error::UnsupportedRuntime {
                phase: Phase::Install,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_install_failure_skips_targets() {
        let calls = Arc::new(AtomicUsize::new(0));
        let registry = ExecutorRegistry::new()
            .with_runtime(Runtime::Node, Arc::new(Install { fail: true }), Arc::new(Deploy))
            .with_transform("tsc", Arc::new(Append("tsc", Arc::clone(&calls))));

        let builder = NodeBuilder::new(Arc::new(registry), "/repo");
        let err = builder
            .build(&UnitId::new("a"), &config(&["tsc"]), BTreeMap::new())
            .await
            .unwrap_err();

        assert!(matches!(err, Error::PhaseFailed { phase: Phase::Install, .. }));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_unit_context_paths() {
        let builder = NodeBuilder::new(Arc::new(registry()), "/repo");
        let cfg = UnitConfig::new(Runtime::Node)
            .with_dependencies(["leyman/eslint-config", "tools/haywire"])
            .with_direct_dependencies(["tools/haywire"]);
        let ctx = builder.unit_context(&UnitId::new("tools/mocha-chain"), &cfg);

        assert_eq!(ctx.unit_source, PathBuf::from("/repo/tools/mocha-chain"));
        assert_eq!(ctx.dependencies.len(), 2);
        assert_eq!(ctx.direct_dependencies, vec![UnitId::new("tools/haywire")]);
    }
}
