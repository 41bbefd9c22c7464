//! Process-wide health record and its persistence port.
//!
//! [`HealthState`] is the only state carried forward between cycles besides
//! the circuit breaker's own counters, and the two must stay consistent:
//! `circuit_broken_jobs` is exactly the set of stage names whose circuit is
//! open. The [`HealthMonitor`] is the single writer; everyone else reads
//! snapshots.

use crate::breaker::{Circuit, CircuitBreaker, CircuitState};
use crate::core::{CycleResult, JobResult};
use crate::errors::BookkeepingError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Debug;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Durable record of per-stage failure history and degradation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HealthState {
    /// Failed cycles in a row, per stage (mirrors the breaker's counters).
    #[serde(default)]
    pub consecutive_failures: BTreeMap<String, u32>,
    /// When each stage last produced durable output (success or partial).
    ///
    /// This is the last-known-good record the degradation policy uses to
    /// distinguish `stale` from `absent` upstream data.
    #[serde(default)]
    pub last_success: BTreeMap<String, DateTime<Utc>>,
    /// Stage names whose circuit is currently open.
    #[serde(default)]
    pub circuit_broken_jobs: BTreeSet<String>,
    /// When the last fully healthy cycle finished.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_successful_cycle: Option<DateTime<Utc>>,
    /// True if any stage is currently degraded or circuit-broken.
    #[serde(default)]
    pub degraded: bool,
}

impl HealthState {
    /// Creates an empty health state.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true if the given stage's circuit is recorded as open.
    #[must_use]
    pub fn is_circuit_broken(&self, stage: &str) -> bool {
        self.circuit_broken_jobs.contains(stage)
    }
}

/// Persistence port for [`HealthState`].
///
/// Loaded once at process start, saved after every stage outcome. A save
/// failure is the orchestrator's one fatal error class.
#[async_trait]
pub trait HealthStore: Send + Sync + Debug {
    /// Persists the given state.
    async fn save(&self, state: &HealthState) -> Result<(), BookkeepingError>;

    /// Loads the persisted state, or `None` if nothing was ever saved.
    async fn load(&self) -> Result<Option<HealthState>, BookkeepingError>;

    /// Whether this store survives a process restart.
    ///
    /// Non-durable stores are a materially weaker guarantee; the
    /// orchestrator reports them loudly at startup.
    fn durable(&self) -> bool {
        true
    }
}

/// In-memory store: health state resets on every process restart.
#[derive(Debug, Default)]
pub struct MemoryHealthStore {
    state: RwLock<Option<HealthState>>,
}

impl MemoryHealthStore {
    /// Creates an empty in-memory store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl HealthStore for MemoryHealthStore {
    async fn save(&self, state: &HealthState) -> Result<(), BookkeepingError> {
        *self.state.write() = Some(state.clone());
        Ok(())
    }

    async fn load(&self) -> Result<Option<HealthState>, BookkeepingError> {
        Ok(self.state.read().clone())
    }

    fn durable(&self) -> bool {
        false
    }
}

/// File-backed store: one JSON document, written atomically via rename.
#[derive(Debug, Clone)]
pub struct JsonHealthStore {
    path: PathBuf,
}

impl JsonHealthStore {
    /// Creates a store backed by the given file path.
    #[must_use]
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    /// Returns the backing file path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn tmp_path(&self) -> PathBuf {
        let mut tmp = self.path.as_os_str().to_owned();
        tmp.push(".tmp");
        PathBuf::from(tmp)
    }
}

#[async_trait]
impl HealthStore for JsonHealthStore {
    async fn save(&self, state: &HealthState) -> Result<(), BookkeepingError> {
        let json = serde_json::to_vec_pretty(state)
            .map_err(|e| BookkeepingError::HealthPersist(e.to_string()))?;

        let tmp = self.tmp_path();
        tokio::fs::write(&tmp, &json)
            .await
            .map_err(|e| BookkeepingError::HealthPersist(e.to_string()))?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .map_err(|e| BookkeepingError::HealthPersist(e.to_string()))?;
        Ok(())
    }

    async fn load(&self) -> Result<Option<HealthState>, BookkeepingError> {
        match tokio::fs::read(&self.path).await {
            Ok(bytes) => serde_json::from_slice(&bytes)
                .map(Some)
                .map_err(|e| BookkeepingError::HealthLoad(e.to_string())),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(BookkeepingError::HealthLoad(e.to_string())),
        }
    }
}

/// Single-writer owner of the health state.
///
/// Only the orchestrator mutates health, through this monitor, after each
/// stage outcome is known; cycles are serialized, so a plain lock suffices.
/// External health/metrics collaborators read cloned snapshots.
#[derive(Debug)]
pub struct HealthMonitor {
    state: RwLock<HealthState>,
    store: Arc<dyn HealthStore>,
    breaker: Arc<CircuitBreaker>,
}

impl HealthMonitor {
    /// Creates a monitor over the given store and breaker registry.
    #[must_use]
    pub fn new(store: Arc<dyn HealthStore>, breaker: Arc<CircuitBreaker>) -> Self {
        Self {
            state: RwLock::new(HealthState::new()),
            store,
            breaker,
        }
    }

    /// Loads persisted health state, replacing the in-memory record and
    /// rehydrating the breaker registry to match it.
    ///
    /// Called once at process start, before the first cycle.
    pub async fn load(&self) -> Result<(), BookkeepingError> {
        if let Some(loaded) = self.store.load().await? {
            tracing::info!(
                last_successful_cycle = ?loaded.last_successful_cycle,
                broken = loaded.circuit_broken_jobs.len(),
                "health state restored from store"
            );
            for (stage, failures) in &loaded.consecutive_failures {
                let circuit = if loaded.circuit_broken_jobs.contains(stage) {
                    Circuit::Open
                } else {
                    Circuit::Closed
                };
                self.breaker.restore(
                    stage,
                    CircuitState {
                        circuit,
                        consecutive_failures: *failures,
                        consecutive_successes_since_open: 0,
                    },
                );
            }
            *self.state.write() = loaded;
        }
        Ok(())
    }

    /// Returns a snapshot of the current health state.
    #[must_use]
    pub fn health(&self) -> HealthState {
        self.state.read().clone()
    }

    /// Returns when the given stage last produced durable output.
    #[must_use]
    pub fn last_success(&self, stage: &str) -> Option<DateTime<Utc>> {
        self.state.read().last_success.get(stage).copied()
    }

    /// Whether the store behind this monitor survives restarts.
    #[must_use]
    pub fn durable(&self) -> bool {
        self.store.durable()
    }

    /// Records one stage outcome and persists the updated state.
    ///
    /// Persist failure here is fatal to the run loop.
    pub async fn record_job(&self, job: &JobResult) -> Result<(), BookkeepingError> {
        {
            let mut state = self.state.write();
            if job.status.produced_output() {
                state
                    .last_success
                    .insert(job.job_name.clone(), job.finished_at);
            }
            state.consecutive_failures.insert(
                job.job_name.clone(),
                self.breaker.consecutive_failures(&job.job_name),
            );
            state.circuit_broken_jobs = self.breaker.open_stages();
        }
        self.save().await
    }

    /// Finalizes a cycle's health bookkeeping and persists it.
    pub async fn finish_cycle(&self, cycle: &CycleResult) -> Result<(), BookkeepingError> {
        {
            let mut state = self.state.write();
            if cycle.healthy() {
                state.last_successful_cycle = cycle.finished_at;
            }
            state.degraded = cycle.degraded || !state.circuit_broken_jobs.is_empty();
        }
        self.save().await
    }

    async fn save(&self) -> Result<(), BookkeepingError> {
        let snapshot = self.health();
        self.store.save(&snapshot).await
    }
}
