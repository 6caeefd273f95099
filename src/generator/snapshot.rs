//! Snapshot state transitions
//!
//! [`SnapshotTracker`] is the only writer of a run's snapshot. Every
//! transition updates the in-memory value and persists it before returning.

use anyhow::Result;
use chrono::Utc;
use std::sync::Arc;
use tracing::debug;

use crate::storage::{FailedCluster, RunState, Snapshot, SnapshotStore};

pub struct SnapshotTracker {
    snapshot: Snapshot,
    store: Arc<dyn SnapshotStore>,
}

impl SnapshotTracker {
    pub fn new(snapshot: Snapshot, store: Arc<dyn SnapshotStore>) -> Self {
        Self { snapshot, store }
    }

    pub fn snapshot(&self) -> &Snapshot {
        &self.snapshot
    }

    pub fn report_id(&self) -> &str {
        &self.snapshot.report_id
    }

    pub fn run_state(&self) -> RunState {
        self.snapshot.status.run_state
    }

    pub async fn persist(&self) -> Result<()> {
        debug!(
            report_id = %self.snapshot.report_id,
            run_state = %self.snapshot.status.run_state,
            "Persisting report snapshot"
        );
        self.store.upsert_snapshot(&self.snapshot).await
    }

    /// Record the outcome of archive generation
    pub async fn mark_generated(
        &mut self,
        run_state: RunState,
        error_msg: Option<String>,
        failed_clusters: Vec<FailedCluster>,
    ) -> Result<()> {
        let status = &mut self.snapshot.status;
        status.run_state = run_state;
        if let Some(msg) = error_msg {
            status.error_msg = msg;
        }
        self.snapshot.failed_clusters = failed_clusters;
        self.persist().await
    }

    pub async fn mark_failed(&mut self, error_msg: impl Into<String>) -> Result<()> {
        let status = &mut self.snapshot.status;
        status.run_state = RunState::Failure;
        status.error_msg = error_msg.into();
        status.completed_at = Some(Utc::now());
        self.persist().await
    }

    /// Report saved for download; the run state is left as generated
    pub async fn mark_completed(&mut self) -> Result<()> {
        self.snapshot.status.completed_at = Some(Utc::now());
        self.persist().await
    }

    /// Email sent. Only a fully generated report becomes delivered.
    pub async fn mark_delivered(&mut self) -> Result<()> {
        let status = &mut self.snapshot.status;
        if status.run_state == RunState::Generated {
            status.run_state = RunState::Delivered;
        }
        status.completed_at = Some(Utc::now());
        self.persist().await
    }
}
