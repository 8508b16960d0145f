//! Graph descriptor types.
//!
//! These types represent the statically supplied description of every build
//! unit in the monorepo. The descriptor is read-only once constructed and can
//! be shared freely between tasks.

use crate::error::{Error, Result};
use crate::ids::{TargetName, UnitId};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::Path;

/// Runtime tag selecting the install/deploy strategy for a unit.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, JsonSchema,
)]
#[serde(rename_all = "snake_case")]
pub enum Runtime {
    Node,
}

impl Runtime {
    pub fn as_str(&self) -> &'static str {
        match self {
            Runtime::Node => "node",
        }
    }
}

impl fmt::Display for Runtime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Runtime {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "node" => Ok(Runtime::Node),
            other => Err(Error::Config(format!("Unknown runtime: {}", other))),
        }
    }
}

/// Configuration of a single unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct UnitConfig {
    pub runtime: Runtime,
    /// Every unit this one requires at build time, transitively.
    #[serde(default)]
    pub dependencies: BTreeSet<UnitId>,
    /// Units this one references immediately.
    #[serde(default, alias = "directDependencies")]
    pub direct_dependencies: BTreeSet<UnitId>,
    /// Targets to run, in order.
    #[serde(default)]
    pub targets: Vec<TargetName>,
}

impl UnitConfig {
    pub fn new(runtime: Runtime) -> Self {
        Self {
            runtime,
            dependencies: BTreeSet::new(),
            direct_dependencies: BTreeSet::new(),
            targets: Vec::new(),
        }
    }

    pub fn with_dependencies<I, U>(mut self, dependencies: I) -> Self
    where
        I: IntoIterator<Item = U>,
        U: Into<UnitId>,
    {
        self.dependencies = dependencies.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_direct_dependencies<I, U>(mut self, dependencies: I) -> Self
    where
        I: IntoIterator<Item = U>,
        U: Into<UnitId>,
    {
        self.direct_dependencies = dependencies.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_targets<I, T>(mut self, targets: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<TargetName>,
    {
        self.targets = targets.into_iter().map(Into::into).collect();
        self
    }
}

/// Immutable description of every unit in the monorepo.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct GraphDescriptor {
    pub units: BTreeMap<UnitId, UnitConfig>,
}

impl GraphDescriptor {
    pub fn new(units: BTreeMap<UnitId, UnitConfig>) -> Self {
        Self { units }
    }

    /// Add a unit, replacing any previous configuration under the same id.
    pub fn with_unit(mut self, unit: impl Into<UnitId>, config: UnitConfig) -> Self {
        self.units.insert(unit.into(), config);
        self
    }

    /// Parse a descriptor from YAML.
    pub fn from_yaml_str(content: &str) -> Result<Self> {
        Ok(serde_yaml::from_str::<Self>(content)?.close_over_dependencies())
    }

    /// Parse a descriptor from JSON.
    pub fn from_json_str(content: &str) -> Result<Self> {
        Ok(serde_json::from_str::<Self>(content)?.close_over_dependencies())
    }

    /// Load a descriptor from a `.json`, `.yaml` or `.yml` file.
    pub fn from_path(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        match path.extension().and_then(|ext| ext.to_str()) {
            Some("json") => Self::from_json_str(&content),
            Some("yaml") | Some("yml") => Self::from_yaml_str(&content),
            _ => Err(Error::Config(format!(
                "Unsupported graph file extension: {}",
                path.display()
            ))),
        }
    }

    /// All units, or only those with the given runtime.
    pub fn list_units(&self, runtime: Option<Runtime>) -> BTreeSet<UnitId> {
        self.units
            .iter()
            .filter(|(_, config)| runtime.is_none_or(|rt| config.runtime == rt))
            .map(|(unit, _)| unit.clone())
            .collect()
    }

    /// Configuration for a unit.
    pub fn config_for(&self, unit: &UnitId) -> Result<&UnitConfig> {
        self.units
            .get(unit)
            .ok_or_else(|| Error::UnknownUnit(unit.clone()))
    }

    pub fn contains(&self, unit: &UnitId) -> bool {
        self.units.contains_key(unit)
    }

    pub fn len(&self) -> usize {
        self.units.len()
    }

    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&UnitId, &UnitConfig)> {
        self.units.iter()
    }

    /// The requested units plus everything they depend on.
    pub fn dependency_closure(&self, requested: &[UnitId]) -> Result<BTreeSet<UnitId>> {
        let mut closure = BTreeSet::new();
        for unit in requested {
            let config = self.config_for(unit)?;
            closure.insert(unit.clone());
            closure.extend(config.dependencies.iter().cloned());
        }
        Ok(closure)
    }

    /// Fold direct dependencies into `dependencies` and extend every
    /// dependency set to its transitive closure.
    ///
    /// Dangling references are kept as-is so validation can report them.
    /// Cycles terminate because each unit is visited once per walk.
    pub fn close_over_dependencies(mut self) -> Self {
        for config in self.units.values_mut() {
            let direct = config.direct_dependencies.clone();
            config.dependencies.extend(direct);
        }

        let mut closed = BTreeMap::new();
        for (unit, config) in &self.units {
            let mut seen = BTreeSet::new();
            let mut stack: Vec<&UnitId> = config.dependencies.iter().collect();
            while let Some(next) = stack.pop() {
                if !seen.insert(next.clone()) {
                    continue;
                }
                if let Some(next_config) = self.units.get(next) {
                    stack.extend(next_config.dependencies.iter());
                }
            }
            closed.insert(unit.clone(), seen);
        }

        for (unit, dependencies) in closed {
            if let Some(config) = self.units.get_mut(&unit) {
                config.dependencies = dependencies;
            }
        }
        self
    }
}
