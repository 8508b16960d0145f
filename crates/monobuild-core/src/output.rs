//! Build output and reporting types.

use crate::ids::{BuildId, UnitId};
use crate::record::{BuildRecord, UnitState};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Final artifact of every unit in a successful build.
#[derive(Debug, Clone)]
pub struct OutputTree<A> {
    artifacts: BTreeMap<UnitId, A>,
}

impl<A> OutputTree<A> {
    pub fn new(artifacts: BTreeMap<UnitId, A>) -> Self {
        Self { artifacts }
    }

    pub fn get(&self, unit: &UnitId) -> Option<&A> {
        self.artifacts.get(unit)
    }

    pub fn contains(&self, unit: &UnitId) -> bool {
        self.artifacts.contains_key(unit)
    }

    pub fn units(&self) -> impl Iterator<Item = &UnitId> {
        self.artifacts.keys()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&UnitId, &A)> {
        self.artifacts.iter()
    }

    pub fn len(&self) -> usize {
        self.artifacts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.artifacts.is_empty()
    }

}

impl<A> IntoIterator for OutputTree<A> {
    type Item = (UnitId, A);
    type IntoIter = std::collections::btree_map::IntoIter<UnitId, A>;

    fn into_iter(self) -> Self::IntoIter {
        self.artifacts.into_iter()
    }
}

/// Outcome of one unit, without its artifact.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnitOutcome {
    pub unit: UnitId,
    pub state: UnitState,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub duration_ms: Option<u64>,
    pub error: Option<String>,
    /// Failed only because a dependency (or another unit) failed first.
    #[serde(default)]
    pub skipped: bool,
}

impl<A> From<&BuildRecord<A>> for UnitOutcome {
    fn from(record: &BuildRecord<A>) -> Self {
        Self {
            unit: record.unit.clone(),
            state: record.state,
            started_at: record.started_at,
            finished_at: record.finished_at,
            duration_ms: record.duration_ms(),
            error: record.error.as_ref().map(|e| e.to_string()),
            skipped: record
                .error
                .as_ref()
                .is_some_and(|e| e.is_skipped()),
        }
    }
}

/// Summary of one build session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildReport {
    pub build_id: BuildId,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub success: bool,
    pub error: Option<String>,
    pub units: Vec<UnitOutcome>,
}

impl BuildReport {
    pub fn count(&self, state: UnitState) -> usize {
        self.units.iter().filter(|u| u.state == state).count()
    }

    pub fn outcome(&self, unit: &UnitId) -> Option<&UnitOutcome> {
        self.units.iter().find(|u| &u.unit == unit)
    }

    /// Units that failed on their own account, not because of a dependency.
    pub fn failed_units(&self) -> Vec<&UnitOutcome> {
        self.units
            .iter()
            .filter(|u| u.state == UnitState::Failed && !u.skipped)
            .collect()
    }
}
