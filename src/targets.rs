//! Target registry — named test configurations and their latest run.
//!
//! Each target owns at most one run at a time. Starting a run snapshots
//! the target's config and key list; the snapshot is what the jobs use
//! and what the export reports, whatever edits happen meanwhile. A new run
//! replaces the previous state outright; removing a target drops it.

use serde::Serialize;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio::sync::watch;
use tracing::info;

use crate::adapters::Protocol;
use crate::error::RunError;
use crate::export;
use crate::queue::{parse_credentials, RunState, Runner, TargetConfig};
use crate::stats::Stats;

struct TargetRun {
    config: TargetConfig,
    state: watch::Receiver<RunState>,
}

struct Target {
    id: String,
    name: String,
    config: TargetConfig,
    keys_text: String,
    run: Option<TargetRun>,
}

impl Target {
    fn new(name: String, config: TargetConfig, keys_text: String) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            name,
            config,
            keys_text,
            run: None,
        }
    }

    fn is_running(&self) -> bool {
        self.run.as_ref().map_or(false, |r| r.state.borrow().is_running)
    }
}

/// What listings show about a target. Never includes the keys.
#[derive(Debug, Clone, Serialize)]
pub struct TargetSummary {
    pub id: String,
    pub name: String,
    pub config: TargetConfig,
    pub key_count: usize,
    pub is_running: bool,
    pub progress: u8,
    pub last_run_at: Option<chrono::DateTime<chrono::Utc>>,
}

/// Fields to change on a target; `None` leaves a field as it is.
/// `base_url: Some(None)` clears the override.
#[derive(Debug, Clone, Default)]
pub struct TargetUpdate {
    pub name: Option<String>,
    pub protocol: Option<Protocol>,
    pub base_url: Option<Option<String>>,
    pub model: Option<String>,
    pub keys_text: Option<String>,
}

pub struct TargetRegistry {
    runner: Runner,
    targets: Mutex<Vec<Target>>,
}

impl TargetRegistry {
    /// Registry with a single default target.
    pub fn new(runner: Runner) -> Self {
        let registry = Self::empty(runner);
        registry.add(None);
        registry
    }

    fn empty(runner: Runner) -> Self {
        Self {
            runner,
            targets: Mutex::new(Vec::new()),
        }
    }

    /// Registry seeded from `(name, config, keys)` entries; falls back to a
    /// single default target when none are given.
    pub fn with_targets(runner: Runner, seeds: Vec<(String, TargetConfig, String)>) -> Self {
        if seeds.is_empty() {
            return Self::new(runner);
        }
        let registry = Self::empty(runner);
        {
            let mut targets = registry.lock();
            for (name, config, keys) in seeds {
                targets.push(Target::new(name, config, keys));
            }
        }
        registry
    }

    fn lock(&self) -> MutexGuard<'_, Vec<Target>> {
        self.targets.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn with_target<T>(
        &self,
        id: &str,
        f: impl FnOnce(&mut Target) -> Result<T, RunError>,
    ) -> Result<T, RunError> {
        let mut targets = self.lock();
        let target = targets
            .iter_mut()
            .find(|t| t.id == id || t.name == id)
            .ok_or_else(|| RunError::TargetNotFound(id.to_string()))?;
        f(target)
    }

    /// Add a target with the default config. Returns its id.
    pub fn add(&self, name: Option<String>) -> String {
        let mut targets = self.lock();
        let name = name
            .filter(|n| !n.trim().is_empty())
            .unwrap_or_else(|| format!("Test Target {}", targets.len() + 1));
        let target = Target::new(name, TargetConfig::default(), String::new());
        let id = target.id.clone();
        info!(target_id = %id, name = %target.name, "Target added");
        targets.push(target);
        id
    }

    /// Remove a target and its results. The last target cannot be removed.
    pub fn remove(&self, id: &str) -> Result<(), RunError> {
        let mut targets = self.lock();
        let pos = targets
            .iter()
            .position(|t| t.id == id || t.name == id)
            .ok_or_else(|| RunError::TargetNotFound(id.to_string()))?;
        if targets.len() == 1 {
            return Err(RunError::LastTarget);
        }
        let removed = targets.remove(pos);
        info!(target_id = %removed.id, "Target removed");
        Ok(())
    }

    /// Apply a partial update in one step. A run already in flight keeps
    /// its snapshot. Returns the target's id, which stays stable across
    /// renames.
    pub fn update(&self, id: &str, update: TargetUpdate) -> Result<String, RunError> {
        self.with_target(id, |t| {
            if let Some(name) = update.name.filter(|n| !n.trim().is_empty()) {
                t.name = name;
            }
            if update.protocol.is_some() || update.base_url.is_some() || update.model.is_some() {
                let current = &t.config;
                t.config = TargetConfig::new(
                    update.protocol.unwrap_or(current.protocol),
                    update.base_url.unwrap_or_else(|| current.base_url.clone()),
                    update.model.unwrap_or_else(|| current.model.clone()),
                );
            }
            if let Some(keys_text) = update.keys_text {
                t.keys_text = keys_text;
            }
            Ok(t.id.clone())
        })
    }

    pub fn list(&self) -> Vec<TargetSummary> {
        self.lock()
            .iter()
            .map(|t| {
                let state = t.run.as_ref().map(|r| r.state.borrow().clone()).unwrap_or_default();
                TargetSummary {
                    id: t.id.clone(),
                    name: t.name.clone(),
                    config: t.config.clone(),
                    key_count: parse_credentials(&t.keys_text).len(),
                    is_running: state.is_running,
                    progress: state.progress(),
                    last_run_at: state.last_run_at,
                }
            })
            .collect()
    }

    /// Start a run over the target's current config and keys.
    ///
    /// Refused while the target's previous run is still going, or when the
    /// key list is blank (in which case nothing changes).
    pub fn start_run(&self, id: &str) -> Result<watch::Receiver<RunState>, RunError> {
        let runner = &self.runner;
        self.with_target(id, |t| {
            if t.is_running() {
                return Err(RunError::AlreadyRunning(t.name.clone()));
            }
            let config = t.config.clone();
            let handle = runner.start(&config, &t.keys_text)?;
            let state = handle.subscribe();
            info!(target_id = %t.id, name = %t.name, "Run started");
            t.run = Some(TargetRun {
                config,
                state: state.clone(),
            });
            Ok(state)
        })
    }

    /// Current state of the target's latest run (empty if never run).
    pub fn state(&self, id: &str) -> Result<RunState, RunError> {
        self.with_target(id, |t| {
            Ok(t.run.as_ref().map(|r| r.state.borrow().clone()).unwrap_or_default())
        })
    }

    pub fn stats(&self, id: &str) -> Result<Stats, RunError> {
        self.state(id).map(|s| Stats::from_state(&s))
    }

    /// CSV report of the latest run, against the config that run used.
    /// Returns the suggested file name and the CSV text.
    pub fn export(&self, id: &str) -> Result<(String, String), RunError> {
        self.with_target(id, |t| {
            let file_name = export::report_file_name(&t.name);
            let csv = match &t.run {
                Some(run) => export::to_csv(&run.state.borrow(), &run.config),
                None => export::to_csv(&RunState::default(), &t.config),
            };
            Ok((file_name, csv))
        })
    }
}
