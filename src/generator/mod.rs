//! Report generation orchestrator
//!
//! [`ReportGenerator::process_report_request`] drives one run from snapshot
//! lookup through aggregation and formatting to delivery. Download delivery
//! completes before the call returns. Email delivery is handed to the sender
//! and observed by an [`AsyncResponseHandler`] registered under the report id,
//! which moves the snapshot to its final state once the send finishes or
//! [`ReportGenerator::stop`] cuts it short.
//!
//! Every failure after the snapshot is known is written into the snapshot
//! before the error is returned, so the stored status always tells what
//! happened to a run.

use anyhow::{Context, Result, anyhow};
use chrono::Utc;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::format::ReportFormatter;
use crate::report::{Request, Results};
use crate::results::ResultsAggregator;
use crate::sender::{AsyncResponseHandler, DeliveryResult, ReportSender};
use crate::storage::{
    BlobDescriptor, BlobStore, FailedCluster, NotificationMethod, ReportStatus, RunState, Snapshot,
    SnapshotStore,
};

pub mod registry;
pub mod snapshot;

#[cfg(test)]
mod tests;

pub use registry::{HandlerRegistry, Registration, Reservation};
pub use snapshot::SnapshotTracker;

pub const ERR_UNABLE_TO_RETRIEVE_SNAPSHOT: &str = "unable to retrieve the report snapshot";
pub const ERR_UNABLE_TO_FIND_SNAPSHOT: &str = "unable to find the report snapshot";
pub const ERR_UNABLE_TO_CREATE_SNAPSHOT: &str = "unable to create the report snapshot";
pub const ERR_DELIVERY_IN_PROGRESS: &str = "a delivery of this report is already in progress";
pub const ERR_UNABLE_TO_GENERATE_REPORT: &str = "unable to generate the report";
pub const ERR_UNABLE_TO_UPDATE_SNAPSHOT_ON_GENERATION_FAILURE: &str =
    "unable to update the snapshot on generation failure";
pub const ERR_UNABLE_TO_UPDATE_SNAPSHOT_ON_GENERATION_SUCCESS: &str =
    "unable to update the snapshot on generation success";
pub const ERR_UNABLE_TO_SAVE_REPORT: &str = "unable to save the report";
pub const ERR_UNABLE_TO_UPDATE_SNAPSHOT_ON_BLOB_FAILURE: &str =
    "unable to update the snapshot on report save failure";
pub const ERR_UNABLE_TO_UPDATE_SNAPSHOT_ON_BLOB_SUCCESS: &str =
    "unable to update the snapshot on report save success";
pub const ERR_UNABLE_TO_UPDATE_SNAPSHOT_ON_DELIVERY: &str =
    "unable to update the snapshot on report delivery";
pub const ERR_UNABLE_TO_START_DELIVERY: &str = "unable to start the report delivery";
pub const ERR_EMPTY_ARCHIVE: &str = "the report archive is empty";

pub const MSG_ALL_CLUSTERS_FAILED: &str = "report generation failed for every requested cluster";
pub const MSG_DELIVERY_INTERRUPTED: &str = "report delivery was interrupted before it completed";

/// Blob name of a downloadable report
pub fn report_blob_name(scan_config_id: &str, report_id: &str) -> String {
    format!("compliance-reports/{scan_config_id}/{report_id}.zip")
}

/// Run state after generation, decided by how many requested clusters failed
pub fn generation_state(request: &Request) -> (RunState, Option<String>) {
    let failed = request.num_failed_clusters();
    if failed == 0 {
        (RunState::Generated, None)
    } else if failed < request.cluster_ids.len() {
        (RunState::PartialError, None)
    } else {
        (RunState::Failure, Some(MSG_ALL_CLUSTERS_FAILED.to_string()))
    }
}

/// State shared by the two callbacks of one email delivery
struct Delivery {
    tracker: SnapshotTracker,
    failure: Option<String>,
}

pub struct ReportGenerator {
    snapshots: Arc<dyn SnapshotStore>,
    blobs: Arc<dyn BlobStore>,
    aggregator: Arc<dyn ResultsAggregator>,
    formatter: Arc<dyn ReportFormatter>,
    sender: Arc<dyn ReportSender>,
    handlers: Arc<HandlerRegistry>,
}

impl ReportGenerator {
    pub fn new(
        snapshots: Arc<dyn SnapshotStore>,
        blobs: Arc<dyn BlobStore>,
        aggregator: Arc<dyn ResultsAggregator>,
        formatter: Arc<dyn ReportFormatter>,
        sender: Arc<dyn ReportSender>,
    ) -> Self {
        Self {
            snapshots,
            blobs,
            aggregator,
            formatter,
            sender,
            handlers: Arc::new(HandlerRegistry::new()),
        }
    }

    pub async fn process_report_request(&self, request: &Request) -> Result<()> {
        let mut tracker = self.open_snapshot(request).await?;
        let report_id = tracker.report_id().to_string();
        // Held until the delivery handler takes over; every early return
        // releases it.
        let reservation = Reservation::acquire(&self.handlers, &report_id)
            .ok_or_else(|| anyhow!("{ERR_DELIVERY_IN_PROGRESS}: {report_id}"))?;

        info!(
            report_id = %report_id,
            scan_config_id = %request.scan_config_id,
            clusters = request.cluster_ids.len(),
            method = ?request.notification_method,
            "Generating compliance report"
        );

        let results = self.aggregator.get_report_data(request).await;

        let archive = match self
            .formatter
            .format_csv_report(&results.result_csvs, &request.failed_clusters)
        {
            Ok(archive) => archive,
            Err(e) => {
                warn!(report_id = %report_id, error = %e, "Report formatting failed");
                tracker
                    .mark_failed(e.to_string())
                    .await
                    .context(ERR_UNABLE_TO_UPDATE_SNAPSHOT_ON_GENERATION_FAILURE)?;
                return Err(anyhow::Error::new(e).context(format!(
                    "{ERR_UNABLE_TO_GENERATE_REPORT} {}",
                    request.report_name()
                )));
            }
        };

        let (run_state, error_msg) = generation_state(request);
        let failed_clusters: Vec<FailedCluster> = request
            .cluster_ids
            .iter()
            .filter_map(|id| request.failed_clusters.get(id).cloned())
            .collect();
        tracker
            .mark_generated(run_state, error_msg, failed_clusters)
            .await
            .context(ERR_UNABLE_TO_UPDATE_SNAPSHOT_ON_GENERATION_SUCCESS)?;
        debug!(report_id = %report_id, run_state = %run_state, bytes = archive.len(), "Report generated");

        match request.notification_method {
            NotificationMethod::Download => self.save_report(&mut tracker, request, archive).await,
            NotificationMethod::Email => {
                self.deliver_report(reservation, tracker, request, archive, &results)
            }
        }
    }

    /// Stop every pending email delivery, including runs still generating.
    /// Each one ends as a failure and its send is abandoned.
    pub fn stop(&self) -> usize {
        let stopped = self.handlers.stop_all();
        if stopped > 0 {
            info!(handlers = stopped, "Stopping pending report deliveries");
        }
        stopped
    }

    pub fn pending_deliveries(&self) -> usize {
        self.handlers.len()
    }

    /// Resolve once every pending email delivery has finished
    pub async fn wait_for_deliveries(&self) {
        self.handlers.wait_idle().await;
    }

    async fn open_snapshot(&self, request: &Request) -> Result<SnapshotTracker> {
        if let Some(id) = &request.snapshot_id {
            let snapshot = self
                .snapshots
                .get_snapshot(id)
                .await
                .context(ERR_UNABLE_TO_RETRIEVE_SNAPSHOT)?
                .ok_or_else(|| anyhow!("{ERR_UNABLE_TO_FIND_SNAPSHOT}: {id}"))?;
            return Ok(SnapshotTracker::new(snapshot, Arc::clone(&self.snapshots)));
        }

        let snapshot = Snapshot {
            report_id: Uuid::new_v4().to_string(),
            scan_config_id: request.scan_config_id.clone(),
            name: request.scan_config_name.clone(),
            status: ReportStatus {
                run_state: RunState::Preparing,
                started_at: Some(Utc::now()),
                report_request_type: request.request_type,
                report_notification_method: request.notification_method,
                ..Default::default()
            },
            user: request.requester.clone(),
            failed_clusters: Vec::new(),
        };
        let tracker = SnapshotTracker::new(snapshot, Arc::clone(&self.snapshots));
        tracker.persist().await.context(ERR_UNABLE_TO_CREATE_SNAPSHOT)?;
        debug!(report_id = %tracker.report_id(), "Created report snapshot");
        Ok(tracker)
    }

    async fn save_report(
        &self,
        tracker: &mut SnapshotTracker,
        request: &Request,
        archive: Vec<u8>,
    ) -> Result<()> {
        let blob = BlobDescriptor {
            name: report_blob_name(&request.scan_config_id, tracker.report_id()),
            length: archive.len() as u64,
            modified_at: Utc::now(),
        };

        let saved = if archive.is_empty() {
            Err(anyhow!(ERR_EMPTY_ARCHIVE))
        } else {
            self.blobs.upsert(&blob, &archive).await
        };

        if let Err(e) = saved {
            warn!(report_id = %tracker.report_id(), error = %format!("{e:#}"), "Unable to save report");
            tracker
                .mark_failed(format!("{ERR_UNABLE_TO_SAVE_REPORT}: {e}"))
                .await
                .context(ERR_UNABLE_TO_UPDATE_SNAPSHOT_ON_BLOB_FAILURE)?;
            return Err(e.context(ERR_UNABLE_TO_SAVE_REPORT));
        }

        tracker
            .mark_completed()
            .await
            .context(ERR_UNABLE_TO_UPDATE_SNAPSHOT_ON_BLOB_SUCCESS)?;
        info!(report_id = %tracker.report_id(), blob = %blob.name, "Report saved for download");
        Ok(())
    }

    fn deliver_report(
        &self,
        reservation: Reservation<'_>,
        tracker: SnapshotTracker,
        request: &Request,
        archive: Vec<u8>,
        results: &Results,
    ) -> Result<()> {
        let report_id = tracker.report_id().to_string();
        let registration = reservation
            .registration()
            .ok_or_else(|| anyhow!("{ERR_UNABLE_TO_START_DELIVERY}: {report_id}"))?;
        // Shared by the send and its handler so a stop also aborts the send.
        let cancel = CancellationToken::new();
        let response = self.sender.send_email(
            cancel.clone(),
            request.report_name(),
            Arc::new(archive),
            results,
            request.notifiers.clone(),
        );

        let delivery = Arc::new(Mutex::new(Delivery {
            tracker,
            failure: None,
        }));
        let on_success = {
            let delivery = Arc::clone(&delivery);
            let handlers = Arc::clone(&self.handlers);
            let report_id = report_id.clone();
            move |outcome: DeliveryResult| async move {
                let mut delivery = delivery.lock().await;
                if let Err(e) = outcome {
                    delivery.failure = Some(e.to_string());
                    return Err(anyhow::Error::new(e));
                }

                if let Err(e) = delivery.tracker.mark_delivered().await {
                    delivery.failure = Some(format!("{ERR_UNABLE_TO_UPDATE_SNAPSHOT_ON_DELIVERY}: {e}"));
                    return Err(e.context(ERR_UNABLE_TO_UPDATE_SNAPSHOT_ON_DELIVERY));
                }
                info!(report_id = %report_id, run_state = %delivery.tracker.run_state(), "Report delivered");
                drop(delivery);

                handlers.remove(&report_id, registration);
                Ok(())
            }
        };

        let on_error = {
            let delivery = Arc::clone(&delivery);
            let handlers = Arc::clone(&self.handlers);
            let report_id = report_id.clone();
            move || async move {
                let mut delivery = delivery.lock().await;
                let reason = delivery
                    .failure
                    .take()
                    .unwrap_or_else(|| MSG_DELIVERY_INTERRUPTED.to_string());
                warn!(report_id = %report_id, reason = %reason, "Report delivery failed");
                if let Err(e) = delivery.tracker.mark_failed(reason).await {
                    warn!(
                        report_id = %report_id,
                        error = %format!("{e:#}"),
                        "Unable to record delivery failure in snapshot"
                    );
                }
                drop(delivery);

                handlers.remove(&report_id, registration);
            }
        };

        let handler = AsyncResponseHandler::builder()
            .on_success(on_success)
            .on_error(on_error)
            .response(response)
            .stop_token(cancel.clone())
            .build();
        let handler = match handler {
            Ok(handler) => Arc::new(handler),
            Err(e) => {
                cancel.cancel();
                return Err(anyhow::Error::new(e).context(ERR_UNABLE_TO_START_DELIVERY));
            }
        };

        if !reservation.attach(handler.clone()) {
            cancel.cancel();
            return Err(anyhow!("{ERR_UNABLE_TO_START_DELIVERY}: {report_id}"));
        }
        handler.start();

        debug!(report_id = %report_id, "Report delivery started");
        Ok(())
    }
}
