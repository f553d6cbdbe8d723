//! Builds postfix discard table entries from the per-domain log files.
use crate::config::MinAge;
use crate::record::DsnRecord;
use anyhow::Context;
use chrono::{DateTime, Utc};
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

/// One line of the postfix discard table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscardEntry {
    pub orig_rcpt: String,
    pub domain: String,
    pub date: String,
    pub diag_code: Option<String>,
}

impl DiscardEntry {
    fn from_record(domain: &str, record: DsnRecord) -> Self {
        Self {
            orig_rcpt: record.orig_rcpt,
            domain: domain.to_string(),
            date: record.date.unwrap_or_else(|| "unknown".to_string()),
            diag_code: record.diag_code,
        }
    }
}

impl std::fmt::Display for DiscardEntry {
    fn fmt(&self, fmt: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(
            fmt,
            "{} DISCARD: report for {} bounced {} last time",
            self.orig_rcpt, self.domain, self.date
        )?;
        if let Some(diag_code) = &self.diag_code {
            write!(fmt, " # {diag_code}")?;
        }
        Ok(())
    }
}

pub struct DiscardTableBuilder {
    domains_dir: PathBuf,
    min_age: MinAge,
    now: DateTime<Utc>,
}

impl DiscardTableBuilder {
    pub fn new(domains_dir: impl Into<PathBuf>, min_age: MinAge) -> Self {
        Self {
            domains_dir: domains_dir.into(),
            min_age,
            now: Utc::now(),
        }
    }

    /// Evaluate file ages relative to `now` rather than the current time
    pub fn with_now(mut self, now: DateTime<Utc>) -> Self {
        self.now = now;
        self
    }

    /// Produce an entry for every domain whose log file was last written
    /// at least `min_age` days ago, ordered by domain name.
    pub fn build(&self) -> anyhow::Result<Vec<DiscardEntry>> {
        let dir = std::fs::read_dir(&self.domains_dir)
            .with_context(|| format!("reading {}", self.domains_dir.display()))?;

        let mut candidates = vec![];
        for entry in dir {
            let entry =
                entry.with_context(|| format!("reading {}", self.domains_dir.display()))?;
            let Some(name) = entry.file_name().to_str().map(|s| s.to_string()) else {
                continue;
            };
            if name.starts_with('.') {
                continue;
            }
            let meta = entry
                .metadata()
                .with_context(|| format!("stat {}", entry.path().display()))?;
            if !meta.is_file() {
                continue;
            }
            let modified: DateTime<Utc> = meta
                .modified()
                .with_context(|| format!("mtime of {}", entry.path().display()))?
                .into();
            candidates.push((name, entry.path(), modified));
        }
        candidates.sort_by(|a, b| a.0.cmp(&b.0));

        let mut entries = vec![];
        for (domain, path, modified) in candidates {
            let age = (self.now - modified).num_days();
            if age < i64::from(self.min_age.days()) {
                tracing::debug!(
                    "file {domain} is {age} day(s) old, younger than {} day(s)",
                    self.min_age
                );
                continue;
            }

            match last_record(&path) {
                Ok(Some(record)) => {
                    tracing::debug!(
                        "orig_rcpt={}, domain={domain}, date={:?}",
                        record.orig_rcpt,
                        record.date
                    );
                    entries.push(DiscardEntry::from_record(&domain, record));
                }
                Ok(None) => {
                    tracing::warn!("{} is empty, skipping", path.display());
                }
                Err(err) => {
                    tracing::error!("skipping {}: {err:#}", path.display());
                }
            }
        }

        Ok(entries)
    }
}

/// Only the most recent bounce in a domain log is relevant
fn last_record(path: &Path) -> anyhow::Result<Option<DsnRecord>> {
    let f = std::fs::File::open(path).with_context(|| format!("open {}", path.display()))?;
    let mut last = None;
    for line in BufReader::new(f).lines() {
        let line = line.with_context(|| format!("reading {}", path.display()))?;
        if !line.trim().is_empty() {
            last = Some(line);
        }
    }

    match last {
        Some(line) => Ok(Some(
            serde_json::from_str(&line).with_context(|| format!("parsing '{line}'"))?,
        )),
        None => Ok(None),
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use chrono::Duration;

    fn write(dir: &Path, name: &str, content: &str) {
        std::fs::write(dir.join(name), content).unwrap();
    }

    fn entries(dir: &Path, min_age: &str, days_ahead: i64) -> Vec<DiscardEntry> {
        DiscardTableBuilder::new(dir, min_age.parse().unwrap())
            .with_now(Utc::now() + Duration::days(days_ahead))
            .build()
            .unwrap()
    }

    #[test]
    fn old_file_is_listed() {
        let dir = tempfile::tempdir().unwrap();
        write(
            dir.path(),
            "example.org",
            "{\"orig_rcpt\":\"a@b.com\",\"date\":\"20240101\",\"report_domain\":\"example.org\"}\n",
        );

        let result = entries(dir.path(), "30", 31);
        k9::assert_equal!(result.len(), 1);
        k9::assert_equal!(
            result[0].to_string(),
            "a@b.com DISCARD: report for example.org bounced 20240101 last time"
        );
    }

    #[test]
    fn recent_file_is_not_listed() {
        let dir = tempfile::tempdir().unwrap();
        write(
            dir.path(),
            "example.org",
            "{\"orig_rcpt\":\"a@b.com\",\"date\":\"20240101\",\"report_domain\":\"example.org\"}\n",
        );
        assert!(entries(dir.path(), "30", 2).is_empty());
        k9::assert_equal!(entries(dir.path(), "0", 0).len(), 1);
    }

    #[test]
    fn only_last_line_counts() {
        let dir = tempfile::tempdir().unwrap();
        write(
            dir.path(),
            "example.com",
            concat!(
                "{\"orig_rcpt\":\"old@example.com\",\"date\":\"20231201\",\"report_domain\":\"example.com\"}\n",
                "{\"orig_rcpt\":\"new@example.com\",\"date\":null,\"report_domain\":\"example.com\",",
                "\"diag_code\":\"smtp; 550 5.1.1 user unknown\"}\n",
            ),
        );

        let result = entries(dir.path(), "30", 45);
        k9::assert_equal!(
            result,
            vec![DiscardEntry {
                orig_rcpt: "new@example.com".to_string(),
                domain: "example.com".to_string(),
                date: "unknown".to_string(),
                diag_code: Some("smtp; 550 5.1.1 user unknown".to_string()),
            }]
        );
        k9::assert_equal!(
            result[0].to_string(),
            "new@example.com DISCARD: report for example.com bounced unknown last time \
             # smtp; 550 5.1.1 user unknown"
        );
    }

    #[test]
    fn skips_junk() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "empty.example", "");
        write(dir.path(), "broken.example", "not json\n");
        write(dir.path(), ".hidden", "{\"orig_rcpt\":\"x@y.org\"}\n");
        std::fs::create_dir(dir.path().join("sub.example")).unwrap();
        write(
            dir.path(),
            "b.example",
            "{\"orig_rcpt\":\"b@b.example\",\"date\":\"20240102\"}\n",
        );
        write(
            dir.path(),
            "a.example",
            "{\"orig_rcpt\":\"a@a.example\",\"date\":\"20240101\"}\n",
        );

        let domains: Vec<String> = entries(dir.path(), "1", 10)
            .into_iter()
            .map(|e| e.domain)
            .collect();
        k9::assert_equal!(domains, vec!["a.example".to_string(), "b.example".to_string()]);
    }
}
