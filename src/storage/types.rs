use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Outcome of a single compliance check on a cluster
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CheckStatus {
    #[default]
    Unset,
    Pass,
    Fail,
    Error,
    Info,
    Manual,
    NotApplicable,
    Inconsistent,
}

impl CheckStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CheckStatus::Unset => "UNSET",
            CheckStatus::Pass => "PASS",
            CheckStatus::Fail => "FAIL",
            CheckStatus::Error => "ERROR",
            CheckStatus::Info => "INFO",
            CheckStatus::Manual => "MANUAL",
            CheckStatus::NotApplicable => "NOT_APPLICABLE",
            CheckStatus::Inconsistent => "INCONSISTENT",
        }
    }
}

impl fmt::Display for CheckStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A stored check result as produced by a compliance scan
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CheckResult {
    pub id: String,
    pub check_id: String,
    pub check_name: String,
    pub cluster_id: String,
    pub cluster_name: String,
    pub status: CheckStatus,
    pub description: String,
    pub instructions: String,
    pub rationale: String,
    pub scan_config_id: String,
    /// Reference to the scan that produced the result; profiles are keyed by it
    pub scan_ref_id: String,
    pub rule_ref_id: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Profile {
    pub name: String,
    pub profile_version: String,
    pub scan_ref_id: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Remediation {
    pub name: String,
    pub check_name: String,
    pub cluster_id: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Rule {
    pub name: String,
    pub rule_ref_id: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Benchmark {
    pub name: String,
    pub short_name: String,
    pub profile_names: Vec<String>,
}

/// A control a rule maps to within a benchmark
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControlResult {
    pub standard: String,
    pub control: String,
    pub rule_name: String,
}

/// Stored association between a rule, a benchmark and a control
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuleControl {
    pub rule_name: String,
    pub benchmark_short_name: String,
    pub standard: String,
    pub control: String,
}

/// A cluster whose scans failed before the report was requested
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FailedCluster {
    pub cluster_id: String,
    pub cluster_name: String,
    pub reasons: Vec<String>,
    pub operator_version: String,
    pub scan_names: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunState {
    #[default]
    Preparing,
    Generated,
    PartialError,
    Failure,
    Delivered,
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RunState::Preparing => "PREPARING",
            RunState::Generated => "GENERATED",
            RunState::PartialError => "PARTIAL_ERROR",
            RunState::Failure => "FAILURE",
            RunState::Delivered => "DELIVERED",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NotificationMethod {
    #[default]
    Email,
    Download,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RequestType {
    #[default]
    OnDemand,
    Scheduled,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReportStatus {
    pub run_state: RunState,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error_msg: String,
    pub report_request_type: RequestType,
    pub report_notification_method: NotificationMethod,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SlimUser {
    pub id: String,
    pub name: String,
}

/// Persisted lifecycle record of one report run
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Snapshot {
    pub report_id: String,
    pub scan_config_id: String,
    pub name: String,
    pub status: ReportStatus,
    pub user: Option<SlimUser>,
    pub failed_clusters: Vec<FailedCluster>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlobDescriptor {
    pub name: String,
    pub length: u64,
    pub modified_at: DateTime<Utc>,
}
