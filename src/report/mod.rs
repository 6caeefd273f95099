//! Report request and result types shared by every stage of a report run

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

pub use crate::storage::{FailedCluster, NotificationMethod, RequestType, SlimUser};

/// Notifier to deliver an emailed report through
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NotifierConfig {
    pub notifier_id: String,
    pub mailing_lists: Vec<String>,
    /// Replaces the rendered subject when non-empty
    pub custom_subject: String,
    /// Replaces the rendered body when non-empty
    pub custom_body: String,
}

/// One report run. Built by the caller and never mutated afterwards.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Request {
    pub scan_config_id: String,
    pub scan_config_name: String,
    /// Existing snapshot to track the run in; a new one is created when absent
    pub snapshot_id: Option<String>,
    pub cluster_ids: Vec<String>,
    pub profiles: Vec<String>,
    pub notifiers: Vec<NotifierConfig>,
    pub notification_method: NotificationMethod,
    pub request_type: RequestType,
    pub requester: Option<SlimUser>,
    /// Clusters known to have failed; they are skipped by aggregation
    pub failed_clusters: HashMap<String, FailedCluster>,
}

impl Request {
    /// Number of requested clusters that are already known to have failed
    pub fn num_failed_clusters(&self) -> usize {
        self.cluster_ids
            .iter()
            .filter(|id| self.failed_clusters.contains_key(*id))
            .count()
    }

    pub fn report_name(&self) -> &str {
        if self.scan_config_name.is_empty() {
            &self.scan_config_id
        } else {
            &self.scan_config_name
        }
    }
}

/// A check result rendered for the report
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResultRow {
    pub cluster_name: String,
    pub check_name: String,
    pub profile: String,
    pub control_ref: String,
    pub description: String,
    pub status: String,
    pub remediation: String,
    pub rationale: String,
    pub instructions: String,
}

/// Aggregated report data of one run
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Results {
    /// Rows keyed by cluster id
    pub result_csvs: BTreeMap<String, Vec<ResultRow>>,
    pub total_pass: usize,
    pub total_fail: usize,
    pub total_mixed: usize,
    /// Number of requested clusters, failed ones included
    pub clusters: usize,
    pub profiles: Vec<String>,
}
