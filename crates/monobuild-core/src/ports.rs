//! Port traits (hexagonal architecture).
//!
//! These traits define the contract between the scheduler and the tool
//! adapters that actually install, transform, validate, and deploy a unit.
//! The scheduler treats artifacts as opaque handles.

use crate::error::ExecutorError;
use crate::graph::Runtime;
use crate::ids::UnitId;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::path::PathBuf;
use tokio::sync::watch;

/// Opaque artifact handle passed between pipeline phases.
pub trait Artifact: Clone + Send + Sync + 'static {}

impl<T> Artifact for T where T: Clone + Send + Sync + 'static {}

/// Everything an executor may need to know about the unit it runs for.
#[derive(Debug, Clone)]
pub struct UnitContext {
    /// Root of the monorepo source tree.
    pub source_root: PathBuf,
    pub unit: UnitId,
    pub runtime: Runtime,
    /// The unit's own source subtree.
    pub unit_source: PathBuf,
    pub dependencies: Vec<UnitId>,
    pub direct_dependencies: Vec<UnitId>,
}

/// The unit's source plus the finished artifact of each dependency.
#[derive(Debug, Clone)]
pub struct AggregatedTree<A> {
    pub unit_source: PathBuf,
    pub dependencies: BTreeMap<UnitId, A>,
}

impl<A> AggregatedTree<A> {
    pub fn new(unit_source: PathBuf, dependencies: BTreeMap<UnitId, A>) -> Self {
        Self {
            unit_source,
            dependencies,
        }
    }

    pub fn get(&self, unit: &UnitId) -> Option<&A> {
        self.dependencies.get(unit)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&UnitId, &A)> {
        self.dependencies.iter()
    }

    pub fn len(&self) -> usize {
        self.dependencies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dependencies.is_empty()
    }
}

/// Cancellation signal handed to validate executors.
#[derive(Debug, Clone)]
pub struct ValidationContext {
    cancelled: watch::Receiver<bool>,
}

/// Owning side of a [`ValidationContext`].
#[derive(Debug)]
pub struct CancelHandle {
    tx: watch::Sender<bool>,
}

impl CancelHandle {
    pub fn new() -> (Self, ValidationContext) {
        let (tx, rx) = watch::channel(false);
        (Self { tx }, ValidationContext { cancelled: rx })
    }

    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.tx.borrow()
    }
}

impl ValidationContext {
    /// A context that is never cancelled.
    pub fn background() -> Self {
        let (handle, ctx) = CancelHandle::new();
        // Dropping the sender leaves the flag at `false` forever.
        drop(handle);
        ctx
    }

    pub fn is_cancelled(&self) -> bool {
        *self.cancelled.borrow()
    }

    /// Resolves once cancellation is requested. Never resolves for a
    /// context whose handle was dropped without cancelling.
    pub async fn cancelled(&self) {
        let mut rx = self.cancelled.clone();
        let closed = rx.wait_for(|cancelled| *cancelled).await.is_err();
        if closed {
            std::future::pending::<()>().await;
        }
    }
}

/// Target that consumes the current artifact and produces its replacement.
#[async_trait]
pub trait TransformExecutor<A: Artifact>: Send + Sync {
    async fn run(&self, ctx: &UnitContext, artifact: A) -> Result<A, ExecutorError>;

    /// Whether `run` writes into the storage behind the incoming artifact
    /// instead of producing a separate one. Validations launched earlier still
    /// read that storage, so they are joined before such a transform starts.
    fn mutates_in_place(&self) -> bool {
        false
    }
}

/// Read-only target that checks an artifact.
#[async_trait]
pub trait ValidateExecutor<A: Artifact>: Send + Sync {
    async fn check(
        &self,
        cancel: &ValidationContext,
        ctx: &UnitContext,
        artifact: &A,
    ) -> Result<(), ExecutorError>;
}

/// Runtime-specific preparation of a unit's build environment.
#[async_trait]
pub trait RuntimeInstaller<A: Artifact>: Send + Sync {
    async fn install(&self, ctx: &UnitContext, tree: &AggregatedTree<A>)
    -> Result<A, ExecutorError>;
}

/// Runtime-specific production of the artifact dependents consume.
#[async_trait]
pub trait RuntimeDeployer<A: Artifact>: Send + Sync {
    async fn deploy(
        &self,
        ctx: &UnitContext,
        tree: &AggregatedTree<A>,
        built: A,
    ) -> Result<A, ExecutorError>;
}
