//! Build sessions and whole-graph scheduling.

use crate::dag::{DagBuilder, UnitDag};
use crate::node::NodeBuilder;
use crate::registry::ExecutorRegistry;
use crate::store::ResultStore;
use chrono::{DateTime, Utc};
use futures::FutureExt;
use futures::future::{BoxFuture, join_all};
use monobuild_core::graph::GraphDescriptor;
use monobuild_core::ids::{BuildId, UnitId};
use monobuild_core::output::{BuildReport, OutputTree};
use monobuild_core::record::{BuildRecord, UnitState};
use monobuild_core::{Artifact, Error, Result};
use std::any::Any;
use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::panic::AssertUnwindSafe;
use std::path::PathBuf;
use std::sync::{Arc, OnceLock};
use std::time::Instant;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{Instrument, debug, info, info_span, warn};

/// Tuning knobs for a [`Scheduler`].
#[derive(Debug, Clone, Default)]
pub struct SchedulerConfig {
    /// Upper bound on units running their pipeline at once. `None` is unbounded.
    pub max_concurrency: Option<usize>,
}

/// The first unit failure of a session. Set at most once; later writers lose.
#[derive(Debug, Default)]
pub struct FirstError {
    cell: OnceLock<Error>,
}

impl FirstError {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` if this call stored the error.
    pub fn set(&self, err: Error) -> bool {
        self.cell.set(err).is_ok()
    }

    pub fn get(&self) -> Option<&Error> {
        self.cell.get()
    }

    pub fn is_set(&self) -> bool {
        self.cell.get().is_some()
    }
}

/// Result of a build together with its per-unit report.
pub struct BuildOutcome<A> {
    pub result: Result<OutputTree<A>>,
    pub report: BuildReport,
}

/// One build of a set of units. Every unit in scope is built at most once.
pub struct BuildSession<A: Artifact> {
    id: BuildId,
    graph: Arc<GraphDescriptor>,
    dag: UnitDag,
    scope: BTreeSet<UnitId>,
    store: ResultStore<A>,
    node_builder: Arc<NodeBuilder<A>>,
    first_error: FirstError,
    permits: Option<Semaphore>,
    started_at: DateTime<Utc>,
    clock: Instant,
}

impl<A: Artifact> BuildSession<A> {
    async fn open(
        graph: Arc<GraphDescriptor>,
        dag: UnitDag,
        scope: BTreeSet<UnitId>,
        node_builder: Arc<NodeBuilder<A>>,
        config: &SchedulerConfig,
    ) -> Arc<Self> {
        let store = ResultStore::new();
        for unit in &scope {
            store.register(unit.clone()).await;
        }

        Arc::new(Self {
            id: BuildId::new(),
            graph,
            dag,
            scope,
            store,
            node_builder,
            first_error: FirstError::new(),
            permits: config.max_concurrency.map(|n| Semaphore::new(n.max(1))),
            started_at: Utc::now(),
            clock: Instant::now(),
        })
    }

    pub fn id(&self) -> BuildId {
        self.id
    }

    pub fn scope(&self) -> &BTreeSet<UnitId> {
        &self.scope
    }

    pub fn store(&self) -> &ResultStore<A> {
        &self.store
    }

    pub fn first_error(&self) -> &FirstError {
        &self.first_error
    }

    /// Build `unit` unless another caller already claimed it, then wait for
    /// its terminal record. Dependencies are built on demand.
    pub fn ensure_built(
        self: &Arc<Self>,
        unit: UnitId,
    ) -> BoxFuture<'static, Result<Arc<BuildRecord<A>>>> {
        let session = Arc::clone(self);
        async move {
            if !session.store.claim(&unit).await? {
                return session.store.get(&unit).await;
            }

            let span = info_span!("unit", unit = %unit, build_id = %session.id);
            session.run_claimed(&unit).instrument(span).await?;
            session.store.get(&unit).await
        }
        .boxed()
    }

    async fn run_claimed(self: &Arc<Self>, unit: &UnitId) -> Result<()> {
        let outcome = AssertUnwindSafe(self.build_claimed(unit))
            .catch_unwind()
            .await
            .unwrap_or_else(|panic| {
                Err(Error::Internal(format!(
                    "Panic while building unit {}: {}",
                    unit,
                    panic_message(&*panic)
                )))
            });

        let stored = match outcome {
            Ok(artifact) => {
                info!("Unit built");
                self.store.complete(unit, artifact).await
            }
            Err(err) => {
                if err.is_skipped() {
                    debug!(error = %err, "Unit skipped");
                } else {
                    warn!(error = %err, "Unit failed");
                    self.first_error.set(err.clone());
                }
                self.store.fail(unit, err).await
            }
        };

        if let Err(err) = &stored {
            self.first_error.set(err.clone());
        }
        stored
    }

    async fn build_claimed(self: &Arc<Self>, unit: &UnitId) -> Result<A> {
        let graph = Arc::clone(&self.graph);
        let config = graph.config_for(unit)?;

        let records = join_all(
            config
                .dependencies
                .iter()
                .map(|dep| self.ensure_built(dep.clone())),
        )
        .await;

        let mut artifacts = BTreeMap::new();
        for (dep, record) in config.dependencies.iter().zip(records) {
            let record = record?;
            match record.artifact() {
                Some(artifact) => {
                    artifacts.insert(dep.clone(), artifact.clone());
                }
                None => {
                    let cause = record.error().cloned().unwrap_or_else(|| {
                        Error::Internal(format!("Unit {} failed without an error", dep))
                    });
                    return Err(Error::DependencyFailed {
                        unit: unit.clone(),
                        dependency: dep.clone(),
                        cause: Arc::new(cause),
                    });
                }
            }
        }

        let _permit = match &self.permits {
            Some(permits) => Some(
                permits
                    .acquire()
                    .await
                    .map_err(|_| Error::Internal("Concurrency limiter closed".to_string()))?,
            ),
            None => None,
        };

        // Another unit already failed; the build result is decided.
        if let Some(first) = self.first_error.get() {
            return Err(Error::BuildAborted {
                unit: unit.clone(),
                cause: Arc::new(first.clone()),
            });
        }

        debug!(dependencies = artifacts.len(), "Running unit pipeline");
        self.node_builder.build(unit, config, artifacts).await
    }

    /// Build every unit in scope, dispatching each one as soon as all of its
    /// dependencies are terminal.
    pub async fn run(self: &Arc<Self>) -> Result<OutputTree<A>> {
        let span = info_span!("build", build_id = %self.id, units = self.scope.len());
        async {
            info!("Build started");
            self.dispatch().await?;
            let output = self.output().await;
            match &output {
                Ok(tree) => info!(units = tree.len(), "Build succeeded"),
                Err(err) => warn!(error = %err, "Build failed"),
            }
            output
        }
        .instrument(span)
        .await
    }

    async fn dispatch(self: &Arc<Self>) -> Result<()> {
        // The scope is dependency-closed, so every dependency edge of a unit
        // in scope stays inside it.
        let mut remaining: HashMap<&UnitId, usize> = self
            .scope
            .iter()
            .map(|unit| (unit, self.dag.dependencies(unit).len()))
            .collect();
        let mut ready: VecDeque<UnitId> = self
            .scope
            .iter()
            .filter(|unit| self.dag.dependencies(unit).is_empty())
            .cloned()
            .collect();

        let mut tasks = JoinSet::new();
        loop {
            while let Some(unit) = ready.pop_front() {
                let build = self.ensure_built(unit.clone());
                tasks.spawn(async move { (unit, build.await) }.in_current_span());
            }

            let Some(joined) = tasks.join_next().await else {
                break;
            };
            let (unit, record) =
                joined.map_err(|e| Error::Internal(format!("Unit task failed: {}", e)))?;
            record?;

            for dependent in self.dag.dependents(&unit) {
                if let Some(count) = remaining.get_mut(dependent) {
                    *count -= 1;
                    if *count == 0 {
                        ready.push_back(dependent.clone());
                    }
                }
            }
        }

        Ok(())
    }

    /// The output tree, or the first error if any unit failed.
    pub async fn output(&self) -> Result<OutputTree<A>> {
        if let Some(err) = self.first_error.get() {
            return Err(err.clone());
        }

        let mut artifacts = BTreeMap::new();
        for unit in &self.scope {
            let record = self.store.try_get(unit).await?.ok_or_else(|| {
                Error::Internal(format!("Unit {} did not finish", unit))
            })?;
            match record.artifact() {
                Some(artifact) => {
                    artifacts.insert(unit.clone(), artifact.clone());
                }
                None => {
                    return Err(record.error().cloned().unwrap_or_else(|| {
                        Error::Internal(format!("Unit {} failed without an error", unit))
                    }));
                }
            }
        }
        Ok(OutputTree::new(artifacts))
    }

    pub async fn report(&self) -> BuildReport {
        let units = self.store.outcomes().await;
        let all_done = units.iter().all(|u| u.state == UnitState::Done);
        BuildReport {
            build_id: self.id,
            started_at: self.started_at,
            duration_ms: u64::try_from(self.clock.elapsed().as_millis()).unwrap_or(u64::MAX),
            success: all_done && !self.first_error.is_set(),
            error: self.first_error.get().map(|e| e.to_string()),
            units,
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    panic
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}

/// Builds a unit graph with a fixed set of executors.
pub struct Scheduler<A: Artifact> {
    graph: Arc<GraphDescriptor>,
    node_builder: Arc<NodeBuilder<A>>,
    config: SchedulerConfig,
}

impl<A: Artifact> Scheduler<A> {
    pub fn new(
        graph: GraphDescriptor,
        registry: ExecutorRegistry<A>,
        source_root: impl Into<PathBuf>,
    ) -> Self {
        Self {
            graph: Arc::new(graph),
            node_builder: Arc::new(NodeBuilder::new(Arc::new(registry), source_root)),
            config: SchedulerConfig::default(),
        }
    }

    pub fn with_config(mut self, config: SchedulerConfig) -> Self {
        self.config = config;
        self
    }

    pub fn graph(&self) -> &GraphDescriptor {
        &self.graph
    }

    pub fn registry(&self) -> &ExecutorRegistry<A> {
        self.node_builder.registry()
    }

    /// Open a fresh session over the whole graph, or over the dependency
    /// closure of `units`. The graph is validated first.
    pub async fn session(&self, units: Option<&[UnitId]>) -> Result<Arc<BuildSession<A>>> {
        let dag = DagBuilder::new().build(&self.graph)?;

        let scope = match units {
            Some(units) => self.graph.dependency_closure(units)?,
            None => self.graph.list_units(None),
        };

        Ok(BuildSession::open(
            Arc::clone(&self.graph),
            dag,
            scope,
            Arc::clone(&self.node_builder),
            &self.config,
        )
        .await)
    }

    /// Build every unit. Either every artifact or the first error.
    pub async fn build_graph(&self) -> Result<OutputTree<A>> {
        self.session(None).await?.run().await
    }

    pub async fn build_graph_with_report(&self) -> Result<BuildOutcome<A>> {
        let session = self.session(None).await?;
        Ok(Self::run_with_report(&session).await)
    }

    /// Build only `units` and their dependencies.
    pub async fn build_units(&self, units: &[UnitId]) -> Result<OutputTree<A>> {
        self.session(Some(units)).await?.run().await
    }

    pub async fn build_units_with_report(&self, units: &[UnitId]) -> Result<BuildOutcome<A>> {
        let session = self.session(Some(units)).await?;
        Ok(Self::run_with_report(&session).await)
    }

    async fn run_with_report(session: &Arc<BuildSession<A>>) -> BuildOutcome<A> {
        let result = session.run().await;
        let report = session.report().await;
        BuildOutcome { result, report }
    }
}
