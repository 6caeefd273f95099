//! Aggregation of stored check results into report rows
//!
//! Every requested cluster that is not already known to have failed is walked
//! once. Each check result becomes a [`ResultRow`] after its profile,
//! remediation and control reference are resolved. Missing lookup data turns
//! into a placeholder; lookup errors abort the walk of that cluster, which is
//! then left out of the report instead of failing the whole run.

use anyhow::{Context, Result};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::report::{Request, ResultRow, Results};
use crate::storage::{
    BenchmarkStore, CheckResult, CheckResultStore, CheckStatus, Profile, ProfileStore,
    RemediationStore, RuleStore,
};


/// Placeholder for profile and control data that could not be resolved
pub const DATA_NOT_AVAILABLE: &str = "Data not available";

/// Placeholder for checks without any remediation
pub const NO_REMEDIATION: &str = "No remediation available";

#[async_trait]
pub trait ResultsAggregator: Send + Sync {
    /// Build the report rows and totals for a request. Never fails; clusters
    /// whose data cannot be read are omitted.
    async fn get_report_data(&self, request: &Request) -> Results;
}

/// Running pass/fail/mixed totals
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CheckStatusCounts {
    pub pass: usize,
    pub fail: usize,
    pub mixed: usize,
}

impl CheckStatusCounts {
    pub fn record(&mut self, status: CheckStatus) {
        match status {
            CheckStatus::Pass => self.pass += 1,
            CheckStatus::Fail => self.fail += 1,
            _ => self.mixed += 1,
        }
    }

    fn add_to(&self, results: &mut Results) {
        results.total_pass += self.pass;
        results.total_fail += self.fail;
        results.total_mixed += self.mixed;
    }
}

pub struct Aggregator {
    check_results: Arc<dyn CheckResultStore>,
    profiles: Arc<dyn ProfileStore>,
    remediations: Arc<dyn RemediationStore>,
    benchmarks: Arc<dyn BenchmarkStore>,
    rules: Arc<dyn RuleStore>,
}

impl Aggregator {
    pub fn new(
        check_results: Arc<dyn CheckResultStore>,
        profiles: Arc<dyn ProfileStore>,
        remediations: Arc<dyn RemediationStore>,
        benchmarks: Arc<dyn BenchmarkStore>,
        rules: Arc<dyn RuleStore>,
    ) -> Self {
        Self {
            check_results,
            profiles,
            remediations,
            benchmarks,
            rules,
        }
    }

    /// Build an aggregator whose lookups are all served by one store
    pub fn from_store<S>(store: Arc<S>) -> Self
    where
        S: CheckResultStore + ProfileStore + RemediationStore + BenchmarkStore + RuleStore + 'static,
    {
        Self::new(
            store.clone(),
            store.clone(),
            store.clone(),
            store.clone(),
            store,
        )
    }

    /// Walk one cluster. Counts are only returned together with the rows, so a
    /// failed walk contributes nothing to the totals.
    pub async fn aggregate_cluster(
        &self,
        scan_config_id: &str,
        cluster_id: &str,
    ) -> Result<(Vec<ResultRow>, CheckStatusCounts)> {
        let checks = self
            .check_results
            .search_check_results(scan_config_id, cluster_id)
            .await
            .with_context(|| format!("Failed to query check results for cluster {cluster_id}"))?;

        let mut rows = Vec::with_capacity(checks.len());
        let mut counts = CheckStatusCounts::default();
        for check in &checks {
            let row = self
                .build_row(cluster_id, check)
                .await
                .with_context(|| format!("Failed to build report row for check {}", check.check_name))?;
            counts.record(check.status);
            rows.push(row);
        }

        Ok((rows, counts))
    }

    /// Render a single check result
    pub async fn build_row(&self, cluster_id: &str, check: &CheckResult) -> Result<ResultRow> {
        let profile = self.profile_for(check).await?;
        let profile_label = match &profile {
            Some(p) => format!("{} {}", p.name, p.profile_version),
            None => {
                warn!(
                    check = %check.check_name,
                    scan_ref_id = %check.scan_ref_id,
                    "No profile found for check result"
                );
                DATA_NOT_AVAILABLE.to_string()
            }
        };

        let remediation = self.remediation_for(check, cluster_id).await?;
        let control_ref = self.control_ref_for(check, profile.as_ref()).await?;

        Ok(ResultRow {
            cluster_name: check.cluster_name.clone(),
            check_name: check.check_name.clone(),
            profile: profile_label,
            control_ref,
            description: check.description.clone(),
            status: check.status.to_string(),
            remediation,
            rationale: check.rationale.clone(),
            instructions: check.instructions.clone(),
        })
    }

    async fn profile_for(&self, check: &CheckResult) -> Result<Option<Profile>> {
        let profiles = self
            .profiles
            .search_profiles(&check.scan_ref_id)
            .await
            .context("Failed to search profiles")?;
        Ok(profiles.into_iter().next())
    }

    async fn remediation_for(&self, check: &CheckResult, cluster_id: &str) -> Result<String> {
        let remediations = self
            .remediations
            .search_remediations(&check.check_name, cluster_id)
            .await
            .context("Failed to search remediations")?;

        if remediations.is_empty() {
            return Ok(NO_REMEDIATION.to_string());
        }

        Ok(remediations
            .iter()
            .map(|r| r.name.as_str())
            .collect::<Vec<_>>()
            .join(","))
    }

    async fn control_ref_for(&self, check: &CheckResult, profile: Option<&Profile>) -> Result<String> {
        let rules = self
            .rules
            .search_rules(&check.rule_ref_id)
            .await
            .context("Failed to search rules")?;

        if rules.len() != 1 {
            debug!(
                check = %check.check_name,
                rule_ref_id = %check.rule_ref_id,
                matches = rules.len(),
                "Expected exactly one rule for check result"
            );
            return Ok(DATA_NOT_AVAILABLE.to_string());
        }

        // Controls are still resolved without a profile; the lookup then runs
        // with an empty profile name.
        let profile_name = profile.map(|p| p.name.as_str()).unwrap_or_default();
        let benchmarks = self
            .benchmarks
            .benchmarks_by_profile_name(profile_name)
            .await
            .context("Failed to search benchmarks")?;

        if benchmarks.is_empty() {
            return Ok(DATA_NOT_AVAILABLE.to_string());
        }

        let rule_names: Vec<String> = rules.into_iter().map(|r| r.name).collect();
        let short_names: Vec<String> = benchmarks.into_iter().map(|b| b.short_name).collect();

        let controls = self
            .rules
            .controls_by_rules_and_benchmarks(&rule_names, &short_names)
            .await
            .context("Failed to search controls")?;

        if controls.is_empty() {
            return Ok(DATA_NOT_AVAILABLE.to_string());
        }

        Ok(controls
            .iter()
            .map(|c| format!("{} {}", c.standard, c.control))
            .collect::<Vec<_>>()
            .join(","))
    }
}

#[async_trait]
impl ResultsAggregator for Aggregator {
    async fn get_report_data(&self, request: &Request) -> Results {
        let mut results = Results {
            clusters: request.cluster_ids.len(),
            profiles: request.profiles.clone(),
            ..Default::default()
        };

        for cluster_id in &request.cluster_ids {
            if request.failed_clusters.contains_key(cluster_id) {
                debug!(cluster_id = %cluster_id, "Skipping failed cluster");
                continue;
            }

            match self
                .aggregate_cluster(&request.scan_config_id, cluster_id)
                .await
            {
                Ok((rows, counts)) => {
                    counts.add_to(&mut results);
                    results.result_csvs.insert(cluster_id.clone(), rows);
                }
                Err(e) => {
                    warn!(
                        cluster_id = %cluster_id,
                        error = %format!("{e:#}"),
                        "Unable to aggregate check results, cluster omitted from report"
                    );
                }
            }
        }

        debug!(
            scan_config_id = %request.scan_config_id,
            clusters = results.result_csvs.len(),
            pass = results.total_pass,
            fail = results.total_fail,
            mixed = results.total_mixed,
            "Aggregated report data"
        );

        results
    }
}
