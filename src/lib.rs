//! # compliance-reports
//!
//! Turns stored compliance check results into a zip of per-cluster CSV
//! reports and delivers it by email or saves it for download, tracking every
//! run in a persisted snapshot.
//!
//! The pipeline is split along narrow seams:
//!
//! - [`results::ResultsAggregator`] builds report rows from the storage traits
//! - [`format::ReportFormatter`] packs the rows into an archive
//! - [`sender::ReportSender`] emails the archive through the configured notifiers
//! - [`sender::AsyncResponseHandler`] observes an asynchronous send outcome
//! - [`generator::ReportGenerator`] orchestrates a run and owns its snapshot

pub mod cli;
pub mod config;
pub mod format;
pub mod generator;
pub mod notifier;
pub mod report;
pub mod results;
pub mod sender;
pub mod storage;

pub use cli::{Cli, Output};
pub use config::ReportsConfig;
pub use generator::ReportGenerator;

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const PKG_NAME: &str = env!("CARGO_PKG_NAME");
