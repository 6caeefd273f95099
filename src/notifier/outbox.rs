//! Notifier that drops every report email into a local outbox directory
//!
//! Each email becomes its own directory holding `message.txt` (headers and
//! body) and the zipped report. An external mailer or a person can pick them
//! up from there.

use async_trait::async_trait;
use chrono::Utc;
use std::io;
use std::path::{Path, PathBuf};
use uuid::Uuid;

use super::{Notifier, NotifierError, ReportEmail, ReportNotifier};

pub struct OutboxNotifier {
    id: String,
    dir: PathBuf,
}

impl OutboxNotifier {
    pub fn new(id: impl Into<String>, dir: impl Into<PathBuf>) -> Self {
        Self {
            id: id.into(),
            dir: dir.into(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn message(email: &ReportEmail<'_>) -> String {
        format!(
            "To: {}\r\nSubject: {}\r\nX-Report-Name: {}\r\n\r\n{}",
            email.recipients.join(", "),
            email.subject,
            email.report_name,
            email.body
        )
    }
}

fn attachment_name(report_name: &str) -> String {
    let stem: String = report_name
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect();
    if stem.is_empty() {
        "report.zip".to_string()
    } else {
        format!("{stem}.zip")
    }
}

fn classify(e: io::Error) -> NotifierError {
    match e.kind() {
        io::ErrorKind::Interrupted | io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut => {
            NotifierError::Transient(e.to_string())
        }
        _ => NotifierError::Rejected(e.to_string()),
    }
}

impl Notifier for OutboxNotifier {
    fn id(&self) -> &str {
        &self.id
    }

    fn report_notifier(&self) -> Option<&dyn ReportNotifier> {
        Some(self)
    }
}

#[async_trait]
impl ReportNotifier for OutboxNotifier {
    async fn report_notify(&self, email: ReportEmail<'_>) -> Result<(), NotifierError> {
        if email.recipients.is_empty() {
            return Err(NotifierError::Rejected("no recipients configured".to_string()));
        }

        let entry = self.dir.join(format!(
            "{}-{}",
            Utc::now().format("%Y%m%dT%H%M%S"),
            Uuid::new_v4().simple()
        ));
        tokio::fs::create_dir_all(&entry).await.map_err(classify)?;
        tokio::fs::write(entry.join("message.txt"), Self::message(&email))
            .await
            .map_err(classify)?;
        tokio::fs::write(entry.join(attachment_name(email.report_name)), email.archive)
            .await
            .map_err(classify)?;

        tracing::info!(
            notifier_id = %self.id,
            recipients = email.recipients.len(),
            path = %entry.display(),
            "Report email written to outbox"
        );
        Ok(())
    }
}
