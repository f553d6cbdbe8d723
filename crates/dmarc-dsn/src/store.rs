//! The on-disk layout shared by the extractor and the discard table builder:
//!
//! * `<data_dir>/domains/<report_domain>` holds newline-delimited JSON
//!   [DsnRecord]s; its mtime is the time of the most recent bounce.
//! * `<data_dir>/saved/<queue_id>.<reason>` holds raw messages that
//!   could not be classified.
use crate::config::ConfigError;
use crate::record::{DsnRecord, SaveReason};
use anyhow::Context;
use nix::unistd::{access, AccessFlags};
use std::io::Write;
use std::path::{Path, PathBuf};

pub const DOMAINS_DIR: &str = "domains";
pub const SAVED_DIR: &str = "saved";

#[derive(Debug, Clone)]
pub struct DataDir {
    root: PathBuf,
}

/// What happened to a batch of records handed to [DataDir::append_records]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AppendResult {
    /// Every record was appended; holds the domains that were written
    Written(Vec<String>),
    /// At least one record had no report domain, so nothing was written
    MissingReportDomain,
}

impl DataDir {
    /// Validate the data root and make sure that its sub directories exist.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, ConfigError> {
        let root = root.into();
        if !root.is_dir() {
            return Err(ConfigError::DataDirMissing(root));
        }
        if access(root.as_path(), AccessFlags::W_OK).is_err() {
            return Err(ConfigError::DataDirNotWritable(root));
        }
        tracing::debug!("using {}", root.display());

        for sub in [DOMAINS_DIR, SAVED_DIR] {
            let dir = root.join(sub);
            if let Err(err) = std::fs::create_dir(&dir) {
                if err.kind() != std::io::ErrorKind::AlreadyExists {
                    return Err(ConfigError::CreateDir { dir, source: err });
                }
            }
        }

        Ok(Self { root })
    }

    /// Refers to an existing data root without creating anything.
    /// Used by the read-only discard table builder.
    pub fn existing(root: impl Into<PathBuf>) -> Result<Self, ConfigError> {
        let root = root.into();
        if !root.is_dir() {
            return Err(ConfigError::DataDirMissing(root));
        }
        let domains = root.join(DOMAINS_DIR);
        if !domains.is_dir() {
            return Err(ConfigError::DomainsDirMissing(domains));
        }
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn domains_dir(&self) -> PathBuf {
        self.root.join(DOMAINS_DIR)
    }

    pub fn saved_dir(&self) -> PathBuf {
        self.root.join(SAVED_DIR)
    }

    pub fn domain_log_path(&self, domain: &str) -> PathBuf {
        self.domains_dir().join(domain)
    }

    /// Append each record to the log file for its report domain.
    ///
    /// The batch is all or nothing with respect to report domains:
    /// if any record lacks one, no record is written.
    pub fn append_records(&self, records: &[DsnRecord]) -> anyhow::Result<AppendResult> {
        if let Some(record) = records.iter().find(|r| r.report_domain.is_none()) {
            tracing::error!("no report_domain in {record:?}");
            return Ok(AppendResult::MissingReportDomain);
        }

        let mut domains = vec![];
        for record in records {
            let Some(domain) = record.report_domain.as_deref() else {
                continue;
            };
            tracing::info!("saving dsn details for domain '{domain}'");
            let path = self.domain_log_path(domain);
            let line = record
                .to_json_line()
                .with_context(|| format!("serializing {record:?}"))?;
            append_line(&path, &line)?;
            if !domains.iter().any(|d| d == domain) {
                domains.push(domain.to_string());
            }
        }
        Ok(AppendResult::Written(domains))
    }

    /// Preserve the raw message for later inspection
    pub fn save_message(
        &self,
        queue_id: &str,
        reason: SaveReason,
        raw: &[u8],
    ) -> anyhow::Result<PathBuf> {
        if queue_id.is_empty() || queue_id.contains(std::path::is_separator) || queue_id == ".." {
            return Err(ConfigError::InvalidQueueId(queue_id.to_string()).into());
        }
        let path = self.saved_dir().join(format!("{queue_id}.{reason}"));
        append_line(&path, raw)?;
        tracing::debug!("message saved to '{}'", path.display());
        Ok(path)
    }
}

/// Append `data` with a single write to a file opened in append mode.
/// O_APPEND makes each write land at the end of the file, so concurrent
/// writers produce whole, separate lines rather than interleaved bytes.
fn append_line(path: &Path, data: &[u8]) -> anyhow::Result<()> {
    let mut f = std::fs::OpenOptions::new()
        .append(true)
        .create(true)
        .open(path)
        .with_context(|| format!("open {} for append", path.display()))?;
    f.write_all(data)
        .with_context(|| format!("append to {}", path.display()))?;
    Ok(())
}
