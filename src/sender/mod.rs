//! Emailed report delivery
//!
//! [`EmailReportSender`] hands the archive to every configured notifier from a
//! spawned task and reports the combined outcome through a oneshot channel.
//! A failing notifier never prevents the remaining ones from being tried.
//! Cancelling the token passed to [`ReportSender::send_email`] drops the send
//! in flight and skips every notifier not yet tried.

use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::notifier::{NotifierError, NotifierLookup, ReportEmail};
use crate::report::{NotifierConfig, Results};

pub mod handler;
pub mod retry;
pub mod templates;

pub use handler::{AsyncResponseHandler, HandlerBuilder, HandlerError, Stoppable};
pub use retry::RetryPolicy;
pub use templates::{EmailTemplate, RenderedEmail};

/// Failure of a single notifier
#[derive(Debug, Error)]
#[error("notifier {notifier_id}: {source}")]
pub struct NotifierFailure {
    pub notifier_id: String,
    #[source]
    pub source: NotifierError,
}

/// Every notifier that could not deliver the report
#[derive(Debug, Default)]
pub struct DeliveryError {
    pub failures: Vec<NotifierFailure>,
}

impl DeliveryError {
    pub fn is_empty(&self) -> bool {
        self.failures.is_empty()
    }

    fn push(&mut self, notifier_id: &str, source: NotifierError) {
        self.failures.push(NotifierFailure {
            notifier_id: notifier_id.to_string(),
            source,
        });
    }

    fn into_result(self) -> Result<(), DeliveryError> {
        if self.is_empty() { Ok(()) } else { Err(self) }
    }
}

impl fmt::Display for DeliveryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unable to send the report email")?;
        for failure in &self.failures {
            write!(f, "; {failure}")?;
        }
        Ok(())
    }
}

impl std::error::Error for DeliveryError {}

pub type DeliveryResult = Result<(), DeliveryError>;

pub trait ReportSender: Send + Sync {
    /// Start delivering the report and return immediately. Exactly one
    /// outcome is sent on the returned channel. Once `cancel` fires no further
    /// email is handed to a notifier.
    fn send_email(
        &self,
        cancel: CancellationToken,
        report_name: &str,
        archive: Arc<Vec<u8>>,
        results: &Results,
        notifiers: Vec<NotifierConfig>,
    ) -> oneshot::Receiver<DeliveryResult>;
}

pub struct EmailReportSender {
    notifiers: Arc<dyn NotifierLookup>,
    template: Arc<EmailTemplate>,
    retry: RetryPolicy,
}

impl EmailReportSender {
    pub fn new(notifiers: Arc<dyn NotifierLookup>, template: EmailTemplate, retry: RetryPolicy) -> Self {
        Self {
            notifiers,
            template: Arc::new(template),
            retry,
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn deliver(
        cancel: &CancellationToken,
        lookup: &dyn NotifierLookup,
        template: &EmailTemplate,
        retry: RetryPolicy,
        report_name: &str,
        archive: &[u8],
        results: &Results,
        notifiers: &[NotifierConfig],
    ) -> DeliveryResult {
        let mut errors = DeliveryError::default();

        for config in notifiers {
            let id = config.notifier_id.as_str();
            if cancel.is_cancelled() {
                debug!(notifier_id = id, "Delivery cancelled, notifier skipped");
                errors.push(id, NotifierError::Cancelled);
                continue;
            }
            let Some(notifier) = lookup.get_notifier(id) else {
                warn!(notifier_id = id, "Notifier not found, skipping");
                errors.push(id, NotifierError::NotFound(id.to_string()));
                continue;
            };
            let Some(report_notifier) = notifier.report_notifier() else {
                warn!(notifier_id = id, "Notifier cannot deliver reports, skipping");
                errors.push(id, NotifierError::Unsupported(id.to_string()));
                continue;
            };

            let email = template.render_for(config, report_name, results);
            debug!(
                notifier_id = id,
                recipients = config.mailing_lists.len(),
                subject = %email.subject,
                "Sending report email"
            );

            let sent = retry
                .run(id, cancel, || {
                    report_notifier.report_notify(ReportEmail {
                        archive,
                        recipients: &config.mailing_lists,
                        subject: &email.subject,
                        body: &email.body,
                        report_name,
                    })
                })
                .await;

            if let Err(e) = sent {
                warn!(notifier_id = id, error = %e, "Unable to send report email");
                errors.push(id, e);
            }
        }

        errors.into_result()
    }
}

impl ReportSender for EmailReportSender {
    fn send_email(
        &self,
        cancel: CancellationToken,
        report_name: &str,
        archive: Arc<Vec<u8>>,
        results: &Results,
        notifiers: Vec<NotifierConfig>,
    ) -> oneshot::Receiver<DeliveryResult> {
        let (tx, rx) = oneshot::channel();
        let lookup = Arc::clone(&self.notifiers);
        let template = Arc::clone(&self.template);
        let retry = self.retry;
        let report_name = report_name.to_string();
        let results = results.clone();

        tokio::spawn(async move {
            let outcome = Self::deliver(
                &cancel,
                lookup.as_ref(),
                &template,
                retry,
                &report_name,
                &archive,
                &results,
                &notifiers,
            )
            .await;

            match &outcome {
                _ if cancel.is_cancelled() => {
                    warn!(report = %report_name, "Report email delivery cancelled")
                }
                Ok(()) => info!(report = %report_name, notifiers = notifiers.len(), "Report email delivered"),
                Err(e) => warn!(report = %report_name, failed = e.failures.len(), "Report email delivery incomplete"),
            }

            // The receiver may already be gone once the handler was stopped.
            let _ = tx.send(outcome);
        });

        rx
    }
}
