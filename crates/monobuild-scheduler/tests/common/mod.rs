//! Recording executors and graph fixtures shared by the scheduler tests.

#![allow(dead_code)]

use async_trait::async_trait;
use monobuild_core::graph::{GraphDescriptor, Runtime, UnitConfig};
use monobuild_core::ports::{
    AggregatedTree, RuntimeDeployer, RuntimeInstaller, TransformExecutor, UnitContext,
    ValidateExecutor, ValidationContext,
};
use monobuild_core::ExecutorError;
use monobuild_scheduler::ExecutorRegistry;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Artifacts in these tests are strings describing how they were produced.
pub type Built = String;

/// Ordered log of everything the executors did.
#[derive(Default)]
pub struct Journal {
    entries: Mutex<Vec<String>>,
}

impl Journal {
    pub fn record(&self, entry: impl Into<String>) {
        self.entries.lock().unwrap().push(entry.into());
    }

    pub fn entries(&self) -> Vec<String> {
        self.entries.lock().unwrap().clone()
    }

    pub fn count(&self, entry: &str) -> usize {
        self.entries().iter().filter(|e| *e == entry).count()
    }

    pub fn position(&self, entry: &str) -> Option<usize> {
        self.entries().iter().position(|e| e == entry)
    }
}

/// Tracks how many pipelines are inside the installer at once.
#[derive(Default)]
pub struct Gauge {
    active: AtomicUsize,
    peak: AtomicUsize,
}

impl Gauge {
    fn enter(&self) {
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
    }

    fn leave(&self) {
        self.active.fetch_sub(1, Ordering::SeqCst);
    }

    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

pub struct RecordingInstaller {
    pub journal: Arc<Journal>,
    pub gauge: Arc<Gauge>,
    pub delays: HashMap<String, Duration>,
}

#[async_trait]
impl RuntimeInstaller<Built> for RecordingInstaller {
    async fn install(
        &self,
        ctx: &UnitContext,
        tree: &AggregatedTree<Built>,
    ) -> Result<Built, ExecutorError> {
        self.journal.record(format!("install:{}", ctx.unit));
        for dep in &ctx.dependencies {
            if tree.get(dep).is_none() {
                self.journal.record(format!("missing:{}:{}", ctx.unit, dep));
            }
        }

        self.gauge.enter();
        if let Some(delay) = self.delays.get(ctx.unit.as_str()) {
            tokio::time::sleep(*delay).await;
        }
        self.gauge.leave();

        Ok(ctx.unit.to_string())
    }
}

pub struct RecordingDeployer {
    pub journal: Arc<Journal>,
}

#[async_trait]
impl RuntimeDeployer<Built> for RecordingDeployer {
    async fn deploy(
        &self,
        ctx: &UnitContext,
        _tree: &AggregatedTree<Built>,
        built: Built,
    ) -> Result<Built, ExecutorError> {
        self.journal.record(format!("deploy:{}", ctx.unit));
        Ok(format!("{}@deployed", built))
    }
}

pub struct Compile {
    pub journal: Arc<Journal>,
    pub panic_on: HashSet<String>,
}

#[async_trait]
impl TransformExecutor<Built> for Compile {
    async fn run(&self, ctx: &UnitContext, artifact: Built) -> Result<Built, ExecutorError> {
        if self.panic_on.contains(ctx.unit.as_str()) {
            panic!("compiler crashed on {}", ctx.unit);
        }
        self.journal.record(format!("tsc:{}", ctx.unit));
        Ok(format!("{}|tsc", artifact))
    }
}

pub struct Lint {
    pub name: &'static str,
    pub journal: Arc<Journal>,
    pub fail_on: HashSet<String>,
}

#[async_trait]
impl ValidateExecutor<Built> for Lint {
    async fn check(
        &self,
        _cancel: &ValidationContext,
        ctx: &UnitContext,
        _artifact: &Built,
    ) -> Result<(), ExecutorError> {
        self.journal.record(format!("{}:{}", self.name, ctx.unit));
        if self.fail_on.contains(ctx.unit.as_str()) {
            return Err(ExecutorError::new(format!(
                "{} reported errors in {}",
                self.name, ctx.unit
            )));
        }
        Ok(())
    }
}

/// Registry knobs for a test run.
#[derive(Default)]
pub struct Setup {
    pub delays: HashMap<String, Duration>,
    pub fail_biome: HashSet<String>,
    pub fail_mocha: HashSet<String>,
    pub panic_tsc: HashSet<String>,
}

pub struct Harness {
    pub journal: Arc<Journal>,
    pub gauge: Arc<Gauge>,
}

impl Harness {
    pub fn new() -> Self {
        Self {
            journal: Arc::new(Journal::default()),
            gauge: Arc::new(Gauge::default()),
        }
    }

    pub fn registry(&self, setup: Setup) -> ExecutorRegistry<Built> {
        let Setup {
            delays,
            fail_biome,
            fail_mocha,
            panic_tsc,
        } = setup;

        ExecutorRegistry::new()
            .with_runtime(
                Runtime::Node,
                Arc::new(RecordingInstaller {
                    journal: Arc::clone(&self.journal),
                    gauge: Arc::clone(&self.gauge),
                    delays,
                }),
                Arc::new(RecordingDeployer {
                    journal: Arc::clone(&self.journal),
                }),
            )
            .with_transform(
                "tsc",
                Arc::new(Compile {
                    journal: Arc::clone(&self.journal),
                    panic_on: panic_tsc,
                }),
            )
            .with_validate(
                "biome",
                Arc::new(Lint {
                    name: "biome",
                    journal: Arc::clone(&self.journal),
                    fail_on: fail_biome,
                }),
            )
            .with_validate(
                "eslint",
                Arc::new(Lint {
                    name: "eslint",
                    journal: Arc::clone(&self.journal),
                    fail_on: HashSet::new(),
                }),
            )
            .with_validate(
                "mocha",
                Arc::new(Lint {
                    name: "mocha",
                    journal: Arc::clone(&self.journal),
                    fail_on: fail_mocha,
                }),
            )
    }
}

pub fn unit(deps: &[&str], direct: &[&str], targets: &[&str]) -> UnitConfig {
    UnitConfig::new(Runtime::Node)
        .with_dependencies(deps.iter().copied())
        .with_direct_dependencies(direct.iter().copied())
        .with_targets(targets.iter().copied())
}

/// A: [biome]; B depends on A; C depends on A and B, directly on B.
pub fn abc() -> GraphDescriptor {
    GraphDescriptor::default()
        .with_unit("a", unit(&[], &[], &["biome"]))
        .with_unit("b", unit(&["a"], &["a"], &["tsc"]))
        .with_unit("c", unit(&["a", "b"], &["b"], &["tsc", "eslint"]))
}

/// A wider graph shaped like a small monorepo.
pub fn monorepo() -> GraphDescriptor {
    GraphDescriptor::default()
        .with_unit("leyman/eslint-config", unit(&[], &[], &[]))
        .with_unit(
            "tools/haywire",
            unit(&["leyman/eslint-config"], &["leyman/eslint-config"], &["tsc", "biome"]),
        )
        .with_unit(
            "tools/cli-block",
            unit(&["leyman/eslint-config"], &["leyman/eslint-config"], &["biome", "tsc"]),
        )
        .with_unit(
            "tools/haywire-launcher",
            unit(
                &["leyman/eslint-config", "tools/cli-block", "tools/haywire"],
                &["tools/cli-block", "tools/haywire"],
                &["tsc", "mocha"],
            ),
        )
        .with_unit(
            "apps/lib-server",
            unit(
                &[
                    "leyman/eslint-config",
                    "tools/cli-block",
                    "tools/haywire",
                    "tools/haywire-launcher",
                ],
                &["tools/haywire-launcher"],
                &["tsc", "eslint", "mocha"],
            ),
        )
        .with_unit("apps/standalone", unit(&[], &[], &["biome"]))
}
