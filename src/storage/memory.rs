//! In-memory implementation of every storage collaborator
//!
//! Backs the CLI (loaded from a JSON dataset) and the integration tests.
//! Snapshot writes are recorded in order so a run's lifecycle can be inspected.

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Mutex;

use super::{
    Benchmark, BenchmarkStore, CheckResult, CheckResultStore, ControlResult, Profile,
    ProfileStore, Remediation, RemediationStore, Rule, RuleControl, RuleStore, Snapshot,
    SnapshotStore,
};

/// Everything a report run reads, in one serializable bundle
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Dataset {
    pub check_results: Vec<CheckResult>,
    pub profiles: Vec<Profile>,
    pub remediations: Vec<Remediation>,
    pub rules: Vec<Rule>,
    pub benchmarks: Vec<Benchmark>,
    pub rule_controls: Vec<RuleControl>,
    pub snapshots: Vec<Snapshot>,
}

impl Dataset {
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read dataset file: {}", path.display()))?;

        let dataset: Dataset = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse dataset file: {}", path.display()))?;

        Ok(dataset)
    }
}

#[derive(Default)]
struct SnapshotState {
    current: HashMap<String, Snapshot>,
    history: Vec<Snapshot>,
}

pub struct MemoryStore {
    data: Dataset,
    snapshots: Mutex<SnapshotState>,
}

impl MemoryStore {
    pub fn new(mut data: Dataset) -> Self {
        let current = data
            .snapshots
            .drain(..)
            .map(|s| (s.report_id.clone(), s))
            .collect();
        Self {
            data,
            snapshots: Mutex::new(SnapshotState {
                current,
                history: Vec::new(),
            }),
        }
    }

    /// Every upserted version of the snapshot, oldest first
    pub fn snapshot_history(&self, report_id: &str) -> Vec<Snapshot> {
        self.lock_snapshots()
            .history
            .iter()
            .filter(|s| s.report_id == report_id)
            .cloned()
            .collect()
    }

    /// Latest stored version of the snapshot
    pub fn current_snapshot(&self, report_id: &str) -> Option<Snapshot> {
        self.lock_snapshots().current.get(report_id).cloned()
    }

    /// Most recently written snapshot of any report
    pub fn latest_snapshot(&self) -> Option<Snapshot> {
        self.lock_snapshots().history.last().cloned()
    }

    fn lock_snapshots(&self) -> std::sync::MutexGuard<'_, SnapshotState> {
        self.snapshots.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl CheckResultStore for MemoryStore {
    async fn search_check_results(
        &self,
        scan_config_id: &str,
        cluster_id: &str,
    ) -> Result<Vec<CheckResult>> {
        Ok(self
            .data
            .check_results
            .iter()
            .filter(|r| r.scan_config_id == scan_config_id && r.cluster_id == cluster_id)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl ProfileStore for MemoryStore {
    async fn search_profiles(&self, scan_ref_id: &str) -> Result<Vec<Profile>> {
        Ok(self
            .data
            .profiles
            .iter()
            .filter(|p| p.scan_ref_id == scan_ref_id)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl RemediationStore for MemoryStore {
    async fn search_remediations(
        &self,
        check_name: &str,
        cluster_id: &str,
    ) -> Result<Vec<Remediation>> {
        Ok(self
            .data
            .remediations
            .iter()
            .filter(|r| r.check_name == check_name && r.cluster_id == cluster_id)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl RuleStore for MemoryStore {
    async fn search_rules(&self, rule_ref_id: &str) -> Result<Vec<Rule>> {
        Ok(self
            .data
            .rules
            .iter()
            .filter(|r| r.rule_ref_id == rule_ref_id)
            .cloned()
            .collect())
    }

    async fn controls_by_rules_and_benchmarks(
        &self,
        rule_names: &[String],
        benchmark_short_names: &[String],
    ) -> Result<Vec<ControlResult>> {
        Ok(self
            .data
            .rule_controls
            .iter()
            .filter(|c| {
                rule_names.contains(&c.rule_name)
                    && benchmark_short_names.contains(&c.benchmark_short_name)
            })
            .map(|c| ControlResult {
                standard: c.standard.clone(),
                control: c.control.clone(),
                rule_name: c.rule_name.clone(),
            })
            .collect())
    }
}

#[async_trait]
impl BenchmarkStore for MemoryStore {
    async fn benchmarks_by_profile_name(&self, profile_name: &str) -> Result<Vec<Benchmark>> {
        Ok(self
            .data
            .benchmarks
            .iter()
            .filter(|b| b.profile_names.iter().any(|p| p == profile_name))
            .cloned()
            .collect())
    }
}

#[async_trait]
impl SnapshotStore for MemoryStore {
    async fn get_snapshot(&self, id: &str) -> Result<Option<Snapshot>> {
        Ok(self.lock_snapshots().current.get(id).cloned())
    }

    async fn upsert_snapshot(&self, snapshot: &Snapshot) -> Result<()> {
        let mut state = self.lock_snapshots();
        state.history.push(snapshot.clone());
        state
            .current
            .insert(snapshot.report_id.clone(), snapshot.clone());
        Ok(())
    }
}
