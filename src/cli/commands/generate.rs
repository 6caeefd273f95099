use anyhow::{Context, Result};
use clap::Args;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use crate::cli::Output;
use crate::config::{NotifierKind, ReportsConfig};
use crate::format::CsvZipFormatter;
use crate::generator::{ReportGenerator, report_blob_name};
use crate::notifier::{NotifierRegistry, OutboxNotifier};
use crate::report::Request;
use crate::results::Aggregator;
use crate::sender::EmailReportSender;
use crate::storage::{Dataset, FsBlobStore, MemoryStore, NotificationMethod, RunState};

#[derive(Args)]
pub struct GenerateArgs {
    /// JSON dataset with check results, profiles, rules, benchmarks and snapshots
    #[arg(long, value_name = "FILE")]
    pub dataset: PathBuf,

    /// JSON report request
    #[arg(long, value_name = "FILE")]
    pub request: PathBuf,

    /// Seconds to wait for email delivery before stopping it
    #[arg(long, default_value = "300", value_name = "SECONDS")]
    pub timeout: u64,

    /// Print the final snapshot as JSON
    #[arg(long)]
    pub json: bool,
}

pub async fn execute(args: GenerateArgs, custom_config: Option<&str>, output: &Output) -> Result<()> {
    let config = ReportsConfig::load(custom_config)?;
    config.validate()?;

    let dataset = Dataset::load_from_file(&args.dataset)?;
    let request = load_request(&args.request)?;
    output.verbose(&format!(
        "Loaded {} check results for {} cluster(s)",
        dataset.check_results.len(),
        request.cluster_ids.len()
    ));

    let store = Arc::new(MemoryStore::new(dataset));
    let generator = build_generator(&config, Arc::clone(&store));

    let processed = generator.process_report_request(&request).await;

    if processed.is_ok() && request.notification_method == NotificationMethod::Email {
        wait_for_delivery(&generator, Duration::from_secs(args.timeout), output).await;
    }

    let snapshot = store.latest_snapshot();
    if args.json {
        if let Some(snapshot) = &snapshot {
            println!(
                "{}",
                serde_json::to_string_pretty(snapshot).context("Failed to serialize snapshot")?
            );
        }
    } else if let Some(snapshot) = &snapshot {
        output.snapshot(snapshot);
    }

    // Reported once, by main
    processed?;

    if args.json {
        return Ok(());
    }
    if let Some(snapshot) = snapshot {
        if request.notification_method == NotificationMethod::Download {
            let path = config
                .storage
                .blob_dir
                .join(report_blob_name(&snapshot.scan_config_id, &snapshot.report_id));
            output.success(&format!("Report saved to {}", path.display()));
        } else if snapshot.status.run_state == RunState::Failure {
            output.error(&format!(
                "Report run finished as {}: {}",
                snapshot.status.run_state, snapshot.status.error_msg
            ));
        } else {
            output.success(&format!("Report run finished as {}", snapshot.status.run_state));
        }
    }
    Ok(())
}

fn load_request(path: &Path) -> Result<Request> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read request file: {}", path.display()))?;
    serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse request file: {}", path.display()))
}

pub fn build_generator(config: &ReportsConfig, store: Arc<MemoryStore>) -> ReportGenerator {
    let mut notifiers = NotifierRegistry::new();
    for entry in &config.notifiers {
        match entry.kind {
            NotifierKind::Outbox => notifiers.register(Arc::new(OutboxNotifier::new(
                entry.id.clone(),
                config.storage.outbox_dir.clone(),
            ))),
        }
    }

    let sender = EmailReportSender::new(
        Arc::new(notifiers),
        config.email.clone(),
        config.delivery.retry_policy(),
    );

    ReportGenerator::new(
        store.clone(),
        Arc::new(FsBlobStore::new(config.storage.blob_dir.clone())),
        Arc::new(Aggregator::from_store(store)),
        Arc::new(CsvZipFormatter::new()),
        Arc::new(sender),
    )
}

async fn wait_for_delivery(generator: &ReportGenerator, timeout: Duration, output: &Output) {
    tokio::select! {
        _ = generator.wait_for_deliveries() => return,
        _ = tokio::time::sleep(timeout) => {
            output.warning("Delivery timed out, stopping it");
        }
        _ = tokio::signal::ctrl_c() => {
            output.warning("Interrupted, stopping delivery");
        }
    }

    generator.stop();
    generator.wait_for_deliveries().await;
}
