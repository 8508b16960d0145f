//! Shared per-unit result store.

use chrono::{DateTime, Utc};
use monobuild_core::ids::UnitId;
use monobuild_core::output::UnitOutcome;
use monobuild_core::record::{BuildRecord, UnitState};
use monobuild_core::{Artifact, Error, Result};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{RwLock, watch};
use tracing::error;

struct Slot<A> {
    state: UnitState,
    started_at: Option<DateTime<Utc>>,
    // Holds the immutable record once the unit is terminal.
    terminal: watch::Sender<Option<Arc<BuildRecord<A>>>>,
}

/// Completion state and artifact of every unit in a build session.
///
/// Each record is written once (`Pending -> Running -> Done | Failed`) and
/// read many times. Mutations are serialized by a single lock; waiters are
/// woken through a per-unit watch channel and read the terminal record
/// without touching the lock again.
pub struct ResultStore<A> {
    slots: RwLock<HashMap<UnitId, Slot<A>>>,
}

impl<A: Artifact> ResultStore<A> {
    pub fn new() -> Self {
        Self {
            slots: RwLock::new(HashMap::new()),
        }
    }

    /// Create a `Pending` record. Returns `false` if the unit was already registered.
    pub async fn register(&self, unit: UnitId) -> bool {
        let mut slots = self.slots.write().await;
        if slots.contains_key(&unit) {
            return false;
        }
        let (terminal, _) = watch::channel(None);
        slots.insert(
            unit,
            Slot {
                state: UnitState::Pending,
                started_at: None,
                terminal,
            },
        );
        true
    }

    /// Atomically move a `Pending` record to `Running`.
    ///
    /// Returns `false` when another caller already claimed the unit.
    pub async fn claim(&self, unit: &UnitId) -> Result<bool> {
        let mut slots = self.slots.write().await;
        let slot = slots
            .get_mut(unit)
            .ok_or_else(|| Error::UnknownUnit(unit.clone()))?;
        if slot.state != UnitState::Pending {
            return Ok(false);
        }
        slot.state = UnitState::Running;
        slot.started_at = Some(Utc::now());
        Ok(true)
    }

    /// Record a successful build.
    pub async fn complete(&self, unit: &UnitId, artifact: A) -> Result<()> {
        self.finish(unit, UnitState::Done, Some(artifact), None).await
    }

    /// Record a failed build.
    pub async fn fail(&self, unit: &UnitId, err: Error) -> Result<()> {
        self.finish(unit, UnitState::Failed, None, Some(err)).await
    }

    async fn finish(
        &self,
        unit: &UnitId,
        to: UnitState,
        artifact: Option<A>,
        err: Option<Error>,
    ) -> Result<()> {
        let mut slots = self.slots.write().await;
        let slot = slots
            .get_mut(unit)
            .ok_or_else(|| Error::UnknownUnit(unit.clone()))?;

        if slot.state != UnitState::Running {
            error!(unit = %unit, from = %slot.state, to = %to, "Invalid unit state transition");
            return Err(Error::InvalidTransition {
                unit: unit.clone(),
                from: slot.state,
                to,
            });
        }

        slot.state = to;
        let record = BuildRecord {
            unit: unit.clone(),
            state: to,
            artifact,
            error: err,
            started_at: slot.started_at,
            finished_at: Some(Utc::now()),
        };
        slot.terminal.send_replace(Some(Arc::new(record)));
        Ok(())
    }

    /// Wait until the unit is `Done` or `Failed` and return its record.
    pub async fn get(&self, unit: &UnitId) -> Result<Arc<BuildRecord<A>>> {
        let mut rx = {
            let slots = self.slots.read().await;
            slots
                .get(unit)
                .ok_or_else(|| Error::UnknownUnit(unit.clone()))?
                .terminal
                .subscribe()
        };

        let published = rx
            .wait_for(|record| record.is_some())
            .await
            .map_err(|_| {
                Error::Internal(format!("Result store closed while waiting for {}", unit))
            })?
            .clone();

        published.ok_or_else(|| Error::Internal(format!("No terminal record for {}", unit)))
    }

    /// The terminal record if the unit already finished, without waiting.
    pub async fn try_get(&self, unit: &UnitId) -> Result<Option<Arc<BuildRecord<A>>>> {
        let slots = self.slots.read().await;
        let slot = slots
            .get(unit)
            .ok_or_else(|| Error::UnknownUnit(unit.clone()))?;
        Ok(slot.terminal.borrow().clone())
    }

    pub async fn state(&self, unit: &UnitId) -> Result<UnitState> {
        let slots = self.slots.read().await;
        slots
            .get(unit)
            .map(|slot| slot.state)
            .ok_or_else(|| Error::UnknownUnit(unit.clone()))
    }

    /// Snapshot of every registered unit, sorted by unit id.
    pub async fn outcomes(&self) -> Vec<UnitOutcome> {
        let slots = self.slots.read().await;
        let mut outcomes: Vec<UnitOutcome> = slots
            .iter()
            .map(|(unit, slot)| match slot.terminal.borrow().as_ref() {
                Some(record) => UnitOutcome::from(record.as_ref()),
                None => UnitOutcome {
                    unit: unit.clone(),
                    state: slot.state,
                    started_at: slot.started_at,
                    finished_at: None,
                    duration_ms: None,
                    error: None,
                    skipped: false,
                },
            })
            .collect();
        outcomes.sort_by(|a, b| a.unit.cmp(&b.unit));
        outcomes
    }

    pub async fn len(&self) -> usize {
        self.slots.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.slots.read().await.is_empty()
    }
}

impl<A: Artifact> Default for ResultStore<A> {
    fn default() -> Self {
        Self::new()
    }
}
