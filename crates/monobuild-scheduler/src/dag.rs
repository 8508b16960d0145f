//! DAG validation and ordering for unit graphs.

use monobuild_core::graph::GraphDescriptor;
use monobuild_core::ids::UnitId;
use petgraph::Direction;
use petgraph::algo::toposort;
use petgraph::graph::{DiGraph, NodeIndex};
use std::collections::{BTreeSet, HashMap};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DagError {
    #[error("Cycle detected in unit dependencies (involving {0})")]
    CycleDetected(UnitId),
    #[error("Unit {unit} depends on unknown unit {dependency}")]
    UnknownDependency { unit: UnitId, dependency: UnitId },
    #[error("Unit {unit} lists {dependency} as a direct dependency but not as a dependency")]
    DirectNotDependency { unit: UnitId, dependency: UnitId },
    #[error("Unit {unit} depends on {dependency} but is missing its dependency {missing}")]
    NotClosed {
        unit: UnitId,
        dependency: UnitId,
        missing: UnitId,
    },
}

impl From<DagError> for monobuild_core::Error {
    fn from(err: DagError) -> Self {
        monobuild_core::Error::MalformedGraph(err.to_string())
    }
}

/// Directed acyclic graph of units; edges point from a dependency to its dependents.
#[derive(Debug)]
pub struct UnitDag {
    graph: DiGraph<UnitId, ()>,
    name_to_index: HashMap<UnitId, NodeIndex>,
}

impl UnitDag {
    /// Units with no dependencies.
    pub fn roots(&self) -> Vec<&UnitId> {
        self.graph
            .node_indices()
            .filter(|&idx| {
                self.graph
                    .neighbors_directed(idx, Direction::Incoming)
                    .count()
                    == 0
            })
            .filter_map(|idx| self.graph.node_weight(idx))
            .collect()
    }

    /// Units that depend on the given unit.
    pub fn dependents(&self, unit: &UnitId) -> Vec<&UnitId> {
        self.neighbors(unit, Direction::Outgoing)
    }

    /// Units the given unit depends on.
    pub fn dependencies(&self, unit: &UnitId) -> Vec<&UnitId> {
        self.neighbors(unit, Direction::Incoming)
    }

    fn neighbors(&self, unit: &UnitId, direction: Direction) -> Vec<&UnitId> {
        self.name_to_index
            .get(unit)
            .map(|&idx| {
                self.graph
                    .neighbors_directed(idx, direction)
                    .filter_map(|n| self.graph.node_weight(n))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Units in dependency order.
    pub fn topological_order(&self) -> Result<Vec<&UnitId>, DagError> {
        toposort(&self.graph, None)
            .map(|indices| {
                indices
                    .iter()
                    .filter_map(|&idx| self.graph.node_weight(idx))
                    .collect()
            })
            .map_err(|cycle| DagError::CycleDetected(self.graph[cycle.node_id()].clone()))
    }

    /// Units grouped into layers; every unit's dependencies sit in earlier layers,
    /// so the units of one layer may all build concurrently.
    pub fn layers(&self) -> Result<Vec<Vec<&UnitId>>, DagError> {
        let order = toposort(&self.graph, None)
            .map_err(|cycle| DagError::CycleDetected(self.graph[cycle.node_id()].clone()))?;

        let mut depth: HashMap<NodeIndex, usize> = HashMap::new();
        let mut layers: Vec<Vec<&UnitId>> = Vec::new();
        for idx in order {
            let level = self
                .graph
                .neighbors_directed(idx, Direction::Incoming)
                .filter_map(|pred| depth.get(&pred))
                .map(|d| d + 1)
                .max()
                .unwrap_or(0);
            depth.insert(idx, level);
            if layers.len() <= level {
                layers.resize_with(level + 1, Vec::new);
            }
            layers[level].push(&self.graph[idx]);
        }
        for layer in &mut layers {
            layer.sort();
        }
        Ok(layers)
    }

    pub fn len(&self) -> usize {
        self.graph.node_count()
    }

    pub fn is_empty(&self) -> bool {
        self.graph.node_count() == 0
    }
}

/// Builder for validated unit DAGs.
pub struct DagBuilder;

impl DagBuilder {
    pub fn new() -> Self {
        Self
    }

    /// Build a DAG from a graph descriptor, checking that every reference
    /// resolves, direct dependencies are a subset of dependencies, the
    /// dependency sets are transitively closed, and there are no cycles.
    pub fn build(&self, descriptor: &GraphDescriptor) -> Result<UnitDag, DagError> {
        let mut graph = DiGraph::new();
        let mut name_to_index = HashMap::new();

        for (unit, _) in descriptor.iter() {
            let idx = graph.add_node(unit.clone());
            name_to_index.insert(unit.clone(), idx);
        }

        for (unit, config) in descriptor.iter() {
            let unit_idx = name_to_index[unit];

            for direct in &config.direct_dependencies {
                if !config.dependencies.contains(direct) {
                    return Err(DagError::DirectNotDependency {
                        unit: unit.clone(),
                        dependency: direct.clone(),
                    });
                }
            }

            for dep in &config.dependencies {
                let dep_idx =
                    name_to_index
                        .get(dep)
                        .ok_or_else(|| DagError::UnknownDependency {
                            unit: unit.clone(),
                            dependency: dep.clone(),
                        })?;
                graph.add_edge(*dep_idx, unit_idx, ());
            }
        }

        let dag = UnitDag {
            graph,
            name_to_index,
        };

        // Verify no cycles
        dag.topological_order()?;

        Self::check_closed(descriptor)?;

        Ok(dag)
    }

    fn check_closed(descriptor: &GraphDescriptor) -> Result<(), DagError> {
        for (unit, config) in descriptor.iter() {
            for dep in &config.dependencies {
                let Some(dep_config) = descriptor.units.get(dep) else {
                    continue;
                };
                let missing: BTreeSet<_> = dep_config
                    .dependencies
                    .difference(&config.dependencies)
                    .collect();
                if let Some(missing) = missing.into_iter().next() {
                    return Err(DagError::NotClosed {
                        unit: unit.clone(),
                        dependency: dep.clone(),
                        missing: missing.clone(),
                    });
                }
            }
        }
        Ok(())
    }
}

impl Default for DagBuilder {
    fn default() -> Self {
        Self::new()
    }
}
