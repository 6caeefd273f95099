//! CSV report formatting
//!
//! Serializes the aggregated rows of every cluster into its own CSV file and
//! packs them into a single zip archive. Clusters whose scans failed get a
//! separate file describing why. Entries are written in cluster id order so
//! repeated runs over the same data produce the same archive layout.

use rayon::prelude::*;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::io::{self, Cursor, Write};
use thiserror::Error;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

use crate::report::{FailedCluster, ResultRow};

pub const CSV_HEADER: [&str; 9] = [
    "Control Reference",
    "Check(CCR)",
    "Profile(version)",
    "Check Description",
    "Cluster",
    "Status",
    "Remediation",
    "Rationale",
    "Instructions",
];

pub const FAILED_CLUSTER_HEADER: [&str; 4] = [
    "Cluster ID",
    "Cluster Name",
    "Reason",
    "Compliance Operator Version",
];

/// Sentinel row written for clusters without any check result
pub const EMPTY_VALUE: &str = "Data not found for the cluster";

#[derive(Debug, Error)]
pub enum FormatError {
    #[error("unable to render CSV for {name}")]
    Render {
        name: String,
        #[source]
        source: csv::Error,
    },

    #[error("unable to create archive entry {name}")]
    CreateEntry {
        name: String,
        #[source]
        source: io::Error,
    },

    #[error("unable to write archive entry {name}")]
    WriteEntry {
        name: String,
        #[source]
        source: io::Error,
    },

    #[error("unable to create a zip file of the compliance report")]
    Finalize(#[source] io::Error),
}

/// Low-level archive sink the formatter streams entries into
pub trait ArchiveWriter: Send {
    fn create_entry(&mut self, name: &str) -> io::Result<()>;

    /// Append to the entry most recently created
    fn write_entry(&mut self, data: &[u8]) -> io::Result<()>;

    fn finish(self: Box<Self>) -> io::Result<Vec<u8>>;
}

pub struct ZipArchiveWriter {
    zip: ZipWriter<Cursor<Vec<u8>>>,
}

impl ZipArchiveWriter {
    pub fn new() -> Self {
        Self {
            zip: ZipWriter::new(Cursor::new(Vec::new())),
        }
    }

    pub fn boxed() -> Box<dyn ArchiveWriter> {
        Box::new(Self::new())
    }
}

impl Default for ZipArchiveWriter {
    fn default() -> Self {
        Self::new()
    }
}

impl ArchiveWriter for ZipArchiveWriter {
    fn create_entry(&mut self, name: &str) -> io::Result<()> {
        let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
        self.zip.start_file(name, options).map_err(io::Error::other)
    }

    fn write_entry(&mut self, data: &[u8]) -> io::Result<()> {
        self.zip.write_all(data)
    }

    fn finish(self: Box<Self>) -> io::Result<Vec<u8>> {
        self.zip
            .finish()
            .map(Cursor::into_inner)
            .map_err(io::Error::other)
    }
}

pub trait ReportFormatter: Send + Sync {
    /// Build the report archive. On error nothing is returned.
    fn format_csv_report(
        &self,
        results: &BTreeMap<String, Vec<ResultRow>>,
        failed_clusters: &HashMap<String, FailedCluster>,
    ) -> Result<Vec<u8>, FormatError>;
}

pub struct CsvZipFormatter {
    new_writer: fn() -> Box<dyn ArchiveWriter>,
}

impl Default for CsvZipFormatter {
    fn default() -> Self {
        Self::with_writer(ZipArchiveWriter::boxed)
    }
}

impl CsvZipFormatter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_writer(new_writer: fn() -> Box<dyn ArchiveWriter>) -> Self {
        Self { new_writer }
    }

    fn write_entries(
        writer: &mut dyn ArchiveWriter,
        entries: &[(String, Vec<u8>)],
    ) -> Result<(), FormatError> {
        for (name, content) in entries {
            writer
                .create_entry(name)
                .map_err(|source| FormatError::CreateEntry {
                    name: name.clone(),
                    source,
                })?;
            writer
                .write_entry(content)
                .map_err(|source| FormatError::WriteEntry {
                    name: name.clone(),
                    source,
                })?;
        }
        Ok(())
    }
}

impl ReportFormatter for CsvZipFormatter {
    fn format_csv_report(
        &self,
        results: &BTreeMap<String, Vec<ResultRow>>,
        failed_clusters: &HashMap<String, FailedCluster>,
    ) -> Result<Vec<u8>, FormatError> {
        let mut entries = results
            .par_iter()
            .map(|(cluster_id, rows)| {
                let name = cluster_file_name(cluster_id);
                render_cluster_csv(rows)
                    .map(|content| (name.clone(), content))
                    .map_err(|source| FormatError::Render { name, source })
            })
            .collect::<Result<Vec<_>, _>>()?;
        entries.sort_by(|a, b| a.0.cmp(&b.0));

        let mut failed_ids: Vec<&String> = failed_clusters.keys().collect();
        failed_ids.sort();
        for cluster_id in failed_ids {
            let name = failed_cluster_file_name(cluster_id);
            let content = render_failed_cluster_csv(cluster_id, &failed_clusters[cluster_id])
                .map_err(|source| FormatError::Render {
                    name: name.clone(),
                    source,
                })?;
            entries.push((name, content));
        }
        dedupe_names(&mut entries);

        let mut writer = (self.new_writer)();
        let written = Self::write_entries(writer.as_mut(), &entries);
        // The archive is closed even when writing failed; a close failure only
        // replaces a successful write.
        let finished = writer.finish();

        written?;
        let archive = finished.map_err(FormatError::Finalize)?;
        tracing::debug!(entries = entries.len(), bytes = archive.len(), "Formatted report archive");
        Ok(archive)
    }
}

pub fn cluster_file_name(cluster_id: &str) -> String {
    format!("cluster_{}.csv", entry_stem(cluster_id))
}

pub fn failed_cluster_file_name(cluster_id: &str) -> String {
    format!("failed_cluster_{}.csv", entry_stem(cluster_id))
}

/// Cluster ids are not trusted as archive paths; anything outside
/// `[A-Za-z0-9_-]` becomes `_`.
fn entry_stem(cluster_id: &str) -> String {
    let stem: String = cluster_id
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect();
    if stem.is_empty() { "unknown".to_string() } else { stem }
}

/// Suffix names that collided after sanitizing, keeping entry order
fn dedupe_names(entries: &mut [(String, Vec<u8>)]) {
    let mut seen = HashSet::new();
    for (name, _) in entries.iter_mut() {
        if seen.insert(name.clone()) {
            continue;
        }
        let stem = name.trim_end_matches(".csv").to_string();
        let unique = (2..)
            .map(|n| format!("{stem}_{n}.csv"))
            .find(|candidate| !seen.contains(candidate))
            .unwrap_or_else(|| format!("{stem}_dup.csv"));
        seen.insert(unique.clone());
        *name = unique;
    }
}

fn csv_writer() -> csv::Writer<Vec<u8>> {
    csv::WriterBuilder::new()
        .terminator(csv::Terminator::CRLF)
        .flexible(true)
        .from_writer(Vec::new())
}

fn into_bytes(writer: csv::Writer<Vec<u8>>) -> Result<Vec<u8>, csv::Error> {
    writer
        .into_inner()
        .map_err(|e| csv::Error::from(e.into_error()))
}

fn render_cluster_csv(rows: &[ResultRow]) -> Result<Vec<u8>, csv::Error> {
    let mut writer = csv_writer();
    writer.write_record(CSV_HEADER)?;

    if rows.is_empty() {
        writer.write_record([EMPTY_VALUE])?;
    }

    for row in rows {
        writer.write_record([
            &row.control_ref,
            &row.check_name,
            &row.profile,
            &row.description,
            &row.cluster_name,
            &row.status,
            &row.remediation,
            &row.rationale,
            &row.instructions,
        ])?;
    }

    into_bytes(writer)
}

fn render_failed_cluster_csv(cluster_id: &str, failed: &FailedCluster) -> Result<Vec<u8>, csv::Error> {
    let mut writer = csv_writer();
    writer.write_record(FAILED_CLUSTER_HEADER)?;

    let id = if failed.cluster_id.is_empty() {
        cluster_id
    } else {
        &failed.cluster_id
    };
    writer.write_record([
        id,
        &failed.cluster_name,
        &failed.reasons.join("; "),
        &failed.operator_version,
    ])?;

    into_bytes(writer)
}
