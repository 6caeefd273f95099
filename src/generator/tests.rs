use super::*;
use crate::format::FormatError;
use crate::notifier::NotifierError;
use crate::report::NotifierConfig;
use crate::sender::{DeliveryError, NotifierFailure};
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::io;
use std::sync::Mutex as StdMutex;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

#[derive(Default)]
struct FakeSnapshots {
    stored: Option<Snapshot>,
    lookup_fails: bool,
    /// Zero-based indices of upsert calls that fail
    failing_upserts: HashSet<usize>,
    upserts: StdMutex<Vec<Snapshot>>,
}

impl FakeSnapshots {
    fn with_snapshot() -> Self {
        Self {
            stored: Some(Snapshot {
                report_id: "snapshot-1".to_string(),
                scan_config_id: "scan-config-1".to_string(),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    fn failing_upserts(mut self, indices: &[usize]) -> Self {
        self.failing_upserts = indices.iter().copied().collect();
        self
    }

    fn upserts(&self) -> Vec<Snapshot> {
        self.upserts.lock().unwrap().clone()
    }

    fn states(&self) -> Vec<RunState> {
        self.upserts().iter().map(|s| s.status.run_state).collect()
    }

    fn last(&self) -> Snapshot {
        self.upserts().last().cloned().unwrap()
    }
}

#[async_trait]
impl SnapshotStore for FakeSnapshots {
    async fn get_snapshot(&self, _id: &str) -> Result<Option<Snapshot>> {
        if self.lookup_fails {
            anyhow::bail!("some error");
        }
        Ok(self.stored.clone())
    }

    async fn upsert_snapshot(&self, snapshot: &Snapshot) -> Result<()> {
        let mut upserts = self.upserts.lock().unwrap();
        let index = upserts.len();
        upserts.push(snapshot.clone());
        if self.failing_upserts.contains(&index) {
            anyhow::bail!("some error");
        }
        Ok(())
    }
}

#[derive(Default)]
struct FakeBlobs {
    fails: bool,
    saved: StdMutex<Vec<(BlobDescriptor, usize)>>,
}

#[async_trait]
impl BlobStore for FakeBlobs {
    async fn upsert(&self, blob: &BlobDescriptor, data: &[u8]) -> Result<()> {
        if self.fails {
            anyhow::bail!("some error");
        }
        self.saved.lock().unwrap().push((blob.clone(), data.len()));
        Ok(())
    }
}

struct FakeAggregator;

#[async_trait]
impl ResultsAggregator for FakeAggregator {
    async fn get_report_data(&self, request: &Request) -> Results {
        Results {
            clusters: request.cluster_ids.len(),
            profiles: request.profiles.clone(),
            ..Default::default()
        }
    }
}

/// Takes a while before returning, leaving room for a concurrent request
struct SlowAggregator(Duration);

#[async_trait]
impl ResultsAggregator for SlowAggregator {
    async fn get_report_data(&self, request: &Request) -> Results {
        tokio::time::sleep(self.0).await;
        FakeAggregator.get_report_data(request).await
    }
}

struct FakeFormatter {
    result: fn() -> Result<Vec<u8>, FormatError>,
}

impl FakeFormatter {
    fn ok() -> Self {
        Self {
            result: || Ok(b"archive".to_vec()),
        }
    }

    fn failing() -> Self {
        Self {
            result: || Err(FormatError::Finalize(io::Error::other("some error"))),
        }
    }

    fn empty() -> Self {
        Self {
            result: || Ok(Vec::new()),
        }
    }
}

impl ReportFormatter for FakeFormatter {
    fn format_csv_report(
        &self,
        _results: &BTreeMap<String, Vec<crate::report::ResultRow>>,
        _failed: &HashMap<String, FailedCluster>,
    ) -> Result<Vec<u8>, FormatError> {
        (self.result)()
    }
}

#[derive(Clone, Copy)]
enum SendBehavior {
    Succeed,
    Fail,
    Hang,
    Close,
}

struct FakeSender {
    behavior: SendBehavior,
    calls: StdMutex<usize>,
    held: StdMutex<Vec<oneshot::Sender<DeliveryResult>>>,
    tokens: StdMutex<Vec<CancellationToken>>,
}

impl FakeSender {
    fn new(behavior: SendBehavior) -> Self {
        Self {
            behavior,
            calls: StdMutex::new(0),
            held: StdMutex::new(Vec::new()),
            tokens: StdMutex::new(Vec::new()),
        }
    }
}

impl ReportSender for FakeSender {
    fn send_email(
        &self,
        cancel: CancellationToken,
        _report_name: &str,
        _archive: Arc<Vec<u8>>,
        _results: &Results,
        _notifiers: Vec<NotifierConfig>,
    ) -> oneshot::Receiver<DeliveryResult> {
        *self.calls.lock().unwrap() += 1;
        self.tokens.lock().unwrap().push(cancel);
        let (tx, rx) = oneshot::channel();
        match self.behavior {
            SendBehavior::Succeed => {
                let _ = tx.send(Ok(()));
            }
            SendBehavior::Fail => {
                let _ = tx.send(Err(DeliveryError {
                    failures: vec![NotifierFailure {
                        notifier_id: "notifier-1".to_string(),
                        source: NotifierError::Transient("smtp timeout".to_string()),
                    }],
                }));
            }
            SendBehavior::Hang => self.held.lock().unwrap().push(tx),
            SendBehavior::Close => drop(tx),
        }
        rx
    }
}

struct Harness {
    snapshots: Arc<FakeSnapshots>,
    blobs: Arc<FakeBlobs>,
    sender: Arc<FakeSender>,
    generator: ReportGenerator,
}

fn harness(snapshots: FakeSnapshots, blobs: FakeBlobs, formatter: FakeFormatter, send: SendBehavior) -> Harness {
    harness_with_aggregator(snapshots, blobs, formatter, send, Arc::new(FakeAggregator))
}

fn harness_with_aggregator(
    snapshots: FakeSnapshots,
    blobs: FakeBlobs,
    formatter: FakeFormatter,
    send: SendBehavior,
    aggregator: Arc<dyn ResultsAggregator>,
) -> Harness {
    let snapshots = Arc::new(snapshots);
    let blobs = Arc::new(blobs);
    let sender = Arc::new(FakeSender::new(send));
    let generator = ReportGenerator::new(
        snapshots.clone(),
        blobs.clone(),
        aggregator,
        Arc::new(formatter),
        sender.clone(),
    );
    Harness {
        snapshots,
        blobs,
        sender,
        generator,
    }
}

fn email_request() -> Request {
    Request {
        scan_config_id: "scan-config-1".to_string(),
        scan_config_name: "weekly".to_string(),
        snapshot_id: Some("snapshot-1".to_string()),
        cluster_ids: vec!["cluster-1".to_string(), "cluster-2".to_string()],
        profiles: vec!["profile-1".to_string()],
        notifiers: vec![NotifierConfig {
            notifier_id: "notifier-1".to_string(),
            mailing_lists: vec!["secops@example.com".to_string()],
            ..Default::default()
        }],
        notification_method: NotificationMethod::Email,
        ..Default::default()
    }
}

fn download_request() -> Request {
    Request {
        notification_method: NotificationMethod::Download,
        notifiers: Vec::new(),
        ..email_request()
    }
}

fn with_failed_clusters(mut request: Request, ids: &[&str]) -> Request {
    for id in ids {
        request.failed_clusters.insert(
            id.to_string(),
            FailedCluster {
                cluster_id: id.to_string(),
                reasons: vec!["scan failed".to_string()],
                ..Default::default()
            },
        );
    }
    request
}

async fn wait_for_deliveries(generator: &ReportGenerator) {
    tokio::time::timeout(Duration::from_secs(5), generator.wait_for_deliveries())
        .await
        .unwrap();
}

#[tokio::test]
async fn test_snapshot_lookup_error() {
    let snapshots = FakeSnapshots {
        lookup_fails: true,
        ..Default::default()
    };
    let h = harness(snapshots, FakeBlobs::default(), FakeFormatter::ok(), SendBehavior::Succeed);

    let err = h.generator.process_report_request(&email_request()).await.unwrap_err();

    assert!(err.to_string().contains(ERR_UNABLE_TO_RETRIEVE_SNAPSHOT));
    assert!(h.snapshots.upserts().is_empty());
}

#[tokio::test]
async fn test_snapshot_not_found() {
    let h = harness(
        FakeSnapshots::default(),
        FakeBlobs::default(),
        FakeFormatter::ok(),
        SendBehavior::Succeed,
    );

    let err = h.generator.process_report_request(&email_request()).await.unwrap_err();

    assert!(err.to_string().contains(ERR_UNABLE_TO_FIND_SNAPSHOT));
    assert!(h.snapshots.upserts().is_empty());
}

#[tokio::test]
async fn test_snapshot_created_when_no_id_given() {
    let h = harness(
        FakeSnapshots::default(),
        FakeBlobs::default(),
        FakeFormatter::ok(),
        SendBehavior::Succeed,
    );
    let request = Request {
        snapshot_id: None,
        requester: Some(crate::storage::SlimUser {
            id: "user-1".to_string(),
            name: "Jo".to_string(),
        }),
        ..download_request()
    };

    h.generator.process_report_request(&request).await.unwrap();

    let upserts = h.snapshots.upserts();
    assert_eq!(upserts[0].status.run_state, RunState::Preparing);
    assert!(Uuid::parse_str(&upserts[0].report_id).is_ok());
    assert!(upserts[0].status.started_at.is_some());
    assert_eq!(upserts[0].status.report_notification_method, NotificationMethod::Download);
    assert_eq!(upserts[0].user.as_ref().unwrap().id, "user-1");
    assert!(upserts.iter().all(|s| s.report_id == upserts[0].report_id));
}

#[tokio::test]
async fn test_format_error_marks_failure() {
    let h = harness(
        FakeSnapshots::with_snapshot(),
        FakeBlobs::default(),
        FakeFormatter::failing(),
        SendBehavior::Succeed,
    );

    let err = h.generator.process_report_request(&email_request()).await.unwrap_err();

    assert!(err.to_string().contains(&format!("{ERR_UNABLE_TO_GENERATE_REPORT} weekly")));
    assert_eq!(h.snapshots.states(), vec![RunState::Failure]);
    let last = h.snapshots.last();
    assert!(!last.status.error_msg.is_empty());
    assert!(last.status.completed_at.is_some());
    assert_eq!(*h.sender.calls.lock().unwrap(), 0);
}

#[tokio::test]
async fn test_format_error_and_snapshot_update_error() {
    let h = harness(
        FakeSnapshots::with_snapshot().failing_upserts(&[0]),
        FakeBlobs::default(),
        FakeFormatter::failing(),
        SendBehavior::Succeed,
    );

    let err = h.generator.process_report_request(&email_request()).await.unwrap_err();

    assert!(err.to_string().contains(ERR_UNABLE_TO_UPDATE_SNAPSHOT_ON_GENERATION_FAILURE));
}

#[tokio::test]
async fn test_generation_success_update_error() {
    for request in [
        email_request(),
        with_failed_clusters(email_request(), &["cluster-1"]),
        with_failed_clusters(download_request(), &["cluster-1"]),
        download_request(),
    ] {
        let h = harness(
            FakeSnapshots::with_snapshot().failing_upserts(&[0]),
            FakeBlobs::default(),
            FakeFormatter::ok(),
            SendBehavior::Succeed,
        );

        let err = h.generator.process_report_request(&request).await.unwrap_err();

        assert!(err.to_string().contains(ERR_UNABLE_TO_UPDATE_SNAPSHOT_ON_GENERATION_SUCCESS));
        assert_eq!(*h.sender.calls.lock().unwrap(), 0);
        assert!(h.blobs.saved.lock().unwrap().is_empty());
    }
}

#[tokio::test]
async fn test_download_success() {
    let h = harness(
        FakeSnapshots::with_snapshot(),
        FakeBlobs::default(),
        FakeFormatter::ok(),
        SendBehavior::Succeed,
    );

    h.generator.process_report_request(&download_request()).await.unwrap();

    assert_eq!(h.snapshots.states(), vec![RunState::Generated, RunState::Generated]);
    let last = h.snapshots.last();
    assert!(last.status.completed_at.is_some());
    assert!(last.status.error_msg.is_empty());

    let saved = h.blobs.saved.lock().unwrap().clone();
    assert_eq!(saved.len(), 1);
    assert_eq!(saved[0].0.name, "compliance-reports/scan-config-1/snapshot-1.zip");
    assert_eq!(saved[0].0.length, 7);
    assert_eq!(saved[0].1, 7);
}

#[tokio::test]
async fn test_download_empty_archive() {
    let h = harness(
        FakeSnapshots::with_snapshot(),
        FakeBlobs::default(),
        FakeFormatter::empty(),
        SendBehavior::Succeed,
    );

    let err = h.generator.process_report_request(&download_request()).await.unwrap_err();

    assert!(err.to_string().contains(ERR_UNABLE_TO_SAVE_REPORT));
    assert_eq!(h.snapshots.states(), vec![RunState::Generated, RunState::Failure]);
    assert!(h.blobs.saved.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_download_blob_error() {
    let blobs = FakeBlobs {
        fails: true,
        ..Default::default()
    };
    let h = harness(FakeSnapshots::with_snapshot(), blobs, FakeFormatter::ok(), SendBehavior::Succeed);

    let err = h.generator.process_report_request(&download_request()).await.unwrap_err();

    assert!(err.to_string().contains(ERR_UNABLE_TO_SAVE_REPORT));
    assert_eq!(h.snapshots.states(), vec![RunState::Generated, RunState::Failure]);
    assert!(h.snapshots.last().status.error_msg.starts_with(ERR_UNABLE_TO_SAVE_REPORT));
}

#[tokio::test]
async fn test_download_blob_error_and_snapshot_update_error() {
    let blobs = FakeBlobs {
        fails: true,
        ..Default::default()
    };
    let h = harness(
        FakeSnapshots::with_snapshot().failing_upserts(&[1]),
        blobs,
        FakeFormatter::ok(),
        SendBehavior::Succeed,
    );

    let err = h.generator.process_report_request(&download_request()).await.unwrap_err();

    assert!(err.to_string().contains(ERR_UNABLE_TO_UPDATE_SNAPSHOT_ON_BLOB_FAILURE));
}

#[tokio::test]
async fn test_download_saved_but_snapshot_update_error() {
    let h = harness(
        FakeSnapshots::with_snapshot().failing_upserts(&[1]),
        FakeBlobs::default(),
        FakeFormatter::ok(),
        SendBehavior::Succeed,
    );

    let err = h.generator.process_report_request(&download_request()).await.unwrap_err();

    assert!(err.to_string().contains(ERR_UNABLE_TO_UPDATE_SNAPSHOT_ON_BLOB_SUCCESS));
    assert_eq!(h.blobs.saved.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn test_failed_clusters_decide_run_state() {
    let cases = [
        (Vec::new(), RunState::Generated),
        (vec!["cluster-2"], RunState::PartialError),
        (vec!["cluster-1", "cluster-2"], RunState::Failure),
    ];

    for (failed, expected) in cases {
        let h = harness(
            FakeSnapshots::with_snapshot(),
            FakeBlobs::default(),
            FakeFormatter::ok(),
            SendBehavior::Succeed,
        );
        let request = with_failed_clusters(download_request(), &failed);

        h.generator.process_report_request(&request).await.unwrap();

        let generated = &h.snapshots.upserts()[0];
        assert_eq!(generated.status.run_state, expected);
        assert_eq!(generated.failed_clusters.len(), failed.len());
        if expected == RunState::Failure {
            assert_eq!(generated.status.error_msg, MSG_ALL_CLUSTERS_FAILED);
        }
    }
}

#[test]
fn test_unrequested_failed_clusters_are_ignored() {
    let request = with_failed_clusters(download_request(), &["cluster-9"]);
    assert_eq!(generation_state(&request), (RunState::Generated, None));
}

#[tokio::test]
async fn test_email_success_marks_delivered() {
    let h = harness(
        FakeSnapshots::with_snapshot(),
        FakeBlobs::default(),
        FakeFormatter::ok(),
        SendBehavior::Succeed,
    );

    h.generator.process_report_request(&email_request()).await.unwrap();
    wait_for_deliveries(&h.generator).await;

    assert_eq!(h.generator.pending_deliveries(), 0);
    assert_eq!(h.snapshots.states(), vec![RunState::Generated, RunState::Delivered]);
    assert!(h.snapshots.last().status.completed_at.is_some());
    assert_eq!(*h.sender.calls.lock().unwrap(), 1);
}

#[tokio::test]
async fn test_email_success_keeps_partial_error() {
    let h = harness(
        FakeSnapshots::with_snapshot(),
        FakeBlobs::default(),
        FakeFormatter::ok(),
        SendBehavior::Succeed,
    );
    let request = with_failed_clusters(email_request(), &["cluster-1"]);

    h.generator.process_report_request(&request).await.unwrap();
    wait_for_deliveries(&h.generator).await;

    assert_eq!(
        h.snapshots.states(),
        vec![RunState::PartialError, RunState::PartialError]
    );
    assert!(h.snapshots.last().status.completed_at.is_some());
}

#[tokio::test]
async fn test_email_failure_marks_failure() {
    let h = harness(
        FakeSnapshots::with_snapshot(),
        FakeBlobs::default(),
        FakeFormatter::ok(),
        SendBehavior::Fail,
    );

    h.generator.process_report_request(&email_request()).await.unwrap();
    wait_for_deliveries(&h.generator).await;

    assert_eq!(h.snapshots.states(), vec![RunState::Generated, RunState::Failure]);
    let last = h.snapshots.last();
    assert!(last.status.error_msg.contains("notifier-1"));
    assert!(last.status.completed_at.is_some());
}

#[tokio::test]
async fn test_closed_response_marks_failure() {
    let h = harness(
        FakeSnapshots::with_snapshot(),
        FakeBlobs::default(),
        FakeFormatter::ok(),
        SendBehavior::Close,
    );

    h.generator.process_report_request(&email_request()).await.unwrap();
    wait_for_deliveries(&h.generator).await;

    assert_eq!(h.snapshots.last().status.error_msg, MSG_DELIVERY_INTERRUPTED);
}

#[tokio::test]
async fn test_stop_fails_pending_delivery() {
    let h = harness(
        FakeSnapshots::with_snapshot(),
        FakeBlobs::default(),
        FakeFormatter::ok(),
        SendBehavior::Hang,
    );

    h.generator.process_report_request(&email_request()).await.unwrap();
    assert_eq!(h.generator.pending_deliveries(), 1);

    assert_eq!(h.generator.stop(), 1);
    wait_for_deliveries(&h.generator).await;

    assert_eq!(h.generator.pending_deliveries(), 0);
    assert_eq!(h.snapshots.states(), vec![RunState::Generated, RunState::Failure]);
    assert_eq!(h.snapshots.last().status.error_msg, MSG_DELIVERY_INTERRUPTED);

    assert!(h.sender.tokens.lock().unwrap()[0].is_cancelled());

    // A late result changes nothing.
    let held = h.sender.held.lock().unwrap().pop().unwrap();
    assert!(held.send(Ok(())).is_err());
    assert_eq!(h.generator.stop(), 0);
}

#[tokio::test]
async fn test_second_run_rejected_while_delivery_pending() {
    let h = harness(
        FakeSnapshots::with_snapshot(),
        FakeBlobs::default(),
        FakeFormatter::ok(),
        SendBehavior::Hang,
    );

    h.generator.process_report_request(&email_request()).await.unwrap();
    let err = h.generator.process_report_request(&email_request()).await.unwrap_err();
    assert!(err.to_string().contains(ERR_DELIVERY_IN_PROGRESS));

    h.generator.stop();
    wait_for_deliveries(&h.generator).await;
}

#[tokio::test]
async fn test_concurrent_runs_dispatch_one_delivery() {
    let h = harness_with_aggregator(
        FakeSnapshots::with_snapshot(),
        FakeBlobs::default(),
        FakeFormatter::ok(),
        SendBehavior::Hang,
        Arc::new(SlowAggregator(Duration::from_millis(50))),
    );
    let request = email_request();

    let (first, second) = tokio::join!(
        h.generator.process_report_request(&request),
        h.generator.process_report_request(&request),
    );

    let outcomes = [first, second];
    assert_eq!(outcomes.iter().filter(|o| o.is_ok()).count(), 1);
    let err = outcomes.into_iter().find_map(|o| o.err()).unwrap();
    assert!(err.to_string().contains(ERR_DELIVERY_IN_PROGRESS));
    assert_eq!(*h.sender.calls.lock().unwrap(), 1);
    assert_eq!(h.generator.pending_deliveries(), 1);

    assert_eq!(h.generator.stop(), 1);
    wait_for_deliveries(&h.generator).await;
    assert_eq!(h.snapshots.states(), vec![RunState::Generated, RunState::Failure]);
}

#[tokio::test]
async fn test_stop_during_generation_fails_delivery() {
    let h = harness_with_aggregator(
        FakeSnapshots::with_snapshot(),
        FakeBlobs::default(),
        FakeFormatter::ok(),
        SendBehavior::Hang,
        Arc::new(SlowAggregator(Duration::from_millis(50))),
    );
    let request = email_request();

    let (processed, stopped) = tokio::join!(h.generator.process_report_request(&request), async {
        tokio::time::sleep(Duration::from_millis(10)).await;
        h.generator.stop()
    });

    processed.unwrap();
    assert_eq!(stopped, 1);
    wait_for_deliveries(&h.generator).await;

    assert_eq!(h.snapshots.states(), vec![RunState::Generated, RunState::Failure]);
    assert_eq!(h.snapshots.last().status.error_msg, MSG_DELIVERY_INTERRUPTED);
    assert!(h.sender.tokens.lock().unwrap()[0].is_cancelled());
}

#[tokio::test]
async fn test_failed_run_releases_reservation() {
    let h = harness(
        FakeSnapshots::with_snapshot(),
        FakeBlobs::default(),
        FakeFormatter::failing(),
        SendBehavior::Succeed,
    );

    assert!(h.generator.process_report_request(&email_request()).await.is_err());
    assert_eq!(h.generator.pending_deliveries(), 0);

    let err = h.generator.process_report_request(&email_request()).await.unwrap_err();
    assert!(!err.to_string().contains(ERR_DELIVERY_IN_PROGRESS));
}
