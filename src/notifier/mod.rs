//! Notifier transports used to deliver emailed reports
//!
//! A [`Notifier`] is looked up by id. Only notifiers that expose a
//! [`ReportNotifier`] can carry a report attachment; everything else is
//! rejected by the sender before any delivery attempt.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

pub mod outbox;

pub use outbox::OutboxNotifier;

#[derive(Debug, Error)]
pub enum NotifierError {
    #[error("unable to find notifier {0}")]
    NotFound(String),

    #[error("notifier {0} cannot deliver reports")]
    Unsupported(String),

    /// Temporary transport failure; the send may be attempted again
    #[error("transient delivery failure: {0}")]
    Transient(String),

    #[error("delivery rejected: {0}")]
    Rejected(String),

    #[error("delivery cancelled")]
    Cancelled,
}

impl NotifierError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, NotifierError::Transient(_))
    }
}

/// Everything a report notifier needs to send one email
#[derive(Debug, Clone, Copy)]
pub struct ReportEmail<'a> {
    pub archive: &'a [u8],
    pub recipients: &'a [String],
    pub subject: &'a str,
    pub body: &'a str,
    pub report_name: &'a str,
}

pub trait Notifier: Send + Sync {
    fn id(&self) -> &str;

    /// Report delivery capability, if this transport has one
    fn report_notifier(&self) -> Option<&dyn ReportNotifier> {
        None
    }
}

#[async_trait]
pub trait ReportNotifier: Send + Sync {
    async fn report_notify(&self, email: ReportEmail<'_>) -> Result<(), NotifierError>;
}

pub trait NotifierLookup: Send + Sync {
    fn get_notifier(&self, id: &str) -> Option<Arc<dyn Notifier>>;
}

/// Id-keyed set of configured notifiers
#[derive(Default, Clone)]
pub struct NotifierRegistry {
    notifiers: HashMap<String, Arc<dyn Notifier>>,
}

impl NotifierRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a notifier, replacing any previous one with the same id
    pub fn register(&mut self, notifier: Arc<dyn Notifier>) {
        self.notifiers.insert(notifier.id().to_string(), notifier);
    }

    pub fn len(&self) -> usize {
        self.notifiers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.notifiers.is_empty()
    }
}

impl NotifierLookup for NotifierRegistry {
    fn get_notifier(&self, id: &str) -> Option<Arc<dyn Notifier>> {
        self.notifiers.get(id).cloned()
    }
}
