//! Storage collaborators consumed by report generation
//!
//! The report pipeline never talks to a database directly. Everything it
//! needs is expressed as a narrow async trait so that the relational store,
//! an in-memory dataset, or a test fake can stand behind it.

use anyhow::Result;
use async_trait::async_trait;

pub mod blob;
pub mod memory;
pub mod types;

pub use blob::FsBlobStore;
pub use memory::{Dataset, MemoryStore};
pub use types::*;

#[async_trait]
pub trait CheckResultStore: Send + Sync {
    /// All check results of a scan configuration on one cluster
    async fn search_check_results(
        &self,
        scan_config_id: &str,
        cluster_id: &str,
    ) -> Result<Vec<CheckResult>>;
}

#[async_trait]
pub trait ProfileStore: Send + Sync {
    async fn search_profiles(&self, scan_ref_id: &str) -> Result<Vec<Profile>>;
}

#[async_trait]
pub trait RemediationStore: Send + Sync {
    async fn search_remediations(&self, check_name: &str, cluster_id: &str)
    -> Result<Vec<Remediation>>;
}

#[async_trait]
pub trait RuleStore: Send + Sync {
    async fn search_rules(&self, rule_ref_id: &str) -> Result<Vec<Rule>>;

    async fn controls_by_rules_and_benchmarks(
        &self,
        rule_names: &[String],
        benchmark_short_names: &[String],
    ) -> Result<Vec<ControlResult>>;
}

#[async_trait]
pub trait BenchmarkStore: Send + Sync {
    async fn benchmarks_by_profile_name(&self, profile_name: &str) -> Result<Vec<Benchmark>>;
}

#[async_trait]
pub trait SnapshotStore: Send + Sync {
    /// Returns `Ok(None)` when no snapshot exists under `id`
    async fn get_snapshot(&self, id: &str) -> Result<Option<Snapshot>>;

    async fn upsert_snapshot(&self, snapshot: &Snapshot) -> Result<()>;
}

#[async_trait]
pub trait BlobStore: Send + Sync {
    async fn upsert(&self, blob: &BlobDescriptor, data: &[u8]) -> Result<()>;
}
