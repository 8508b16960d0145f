//! Per-unit build records.

use crate::error::Error;
use crate::ids::UnitId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle of a unit within one build session.
///
/// Transitions only move forward: `Pending -> Running -> {Done, Failed}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnitState {
    Pending,
    Running,
    Done,
    Failed,
}

impl fmt::Display for UnitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            UnitState::Pending => "pending",
            UnitState::Running => "running",
            UnitState::Done => "done",
            UnitState::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Phase of the per-unit pipeline an error originated in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Install,
    Targets,
    Deploy,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::Install => "install",
            Phase::Targets => "targets",
            Phase::Deploy => "deploy",
        };
        f.write_str(name)
    }
}

/// Result entry for one unit.
///
/// `artifact` is only populated in `Done`, `error` only in `Failed`.
#[derive(Debug, Clone)]
pub struct BuildRecord<A> {
    pub unit: UnitId,
    pub state: UnitState,
    pub artifact: Option<A>,
    pub error: Option<Error>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl<A> BuildRecord<A> {
    pub fn pending(unit: UnitId) -> Self {
        Self {
            unit,
            state: UnitState::Pending,
            artifact: None,
            error: None,
            started_at: None,
            finished_at: None,
        }
    }

    pub fn artifact(&self) -> Option<&A> {
        self.artifact.as_ref()
    }

    pub fn error(&self) -> Option<&Error> {
        self.error.as_ref()
    }

    pub fn is_done(&self) -> bool {
        self.state == UnitState::Done
    }

    pub fn is_failed(&self) -> bool {
        self.state == UnitState::Failed
    }

    pub fn duration_ms(&self) -> Option<u64> {
        match (self.started_at, self.finished_at) {
            (Some(start), Some(end)) => Some((end - start).num_milliseconds().max(0) as u64),
            _ => None,
        }
    }
}
