//! Import ledger — the append-only record of which files each feed has
//! imported.
//!
//! Persisted as one JSON document mapping feed id to a list of
//! `{imported_file, imported_at}` records in append order. Every mutation is a
//! read-modify-write inside [`Ledger::update`], and writes are atomic: the new
//! document goes to a `.tmp` sibling which is then renamed into place, so a
//! crash leaves either the old or the new ledger, never a torn one.
//!
//! There is no locking; the pipeline runs sequentially and is the only
//! writer.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use chrono::{Local, NaiveDateTime, Timelike};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::locator::date_bucket;
use crate::manifest::Manifest;

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("failed to read ledger {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to write ledger {}: {source}", .path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("ledger {} is not valid: {source}", .path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("no filename found for {feed} in record #{index} of the ledger")]
    MissingImportedFile { feed: String, index: usize },

    #[error("ledger serialization failed: {0}")]
    Serialize(#[source] serde_json::Error),
}

/// One successful (or permanently skipped) import.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportRecord {
    #[serde(default)]
    pub imported_file: String,
    pub imported_at: NaiveDateTime,
}

impl ImportRecord {
    pub fn bucket(&self) -> Option<&str> {
        date_bucket(&self.imported_file)
    }
}

/// The whole ledger document.
pub type LedgerDocument = BTreeMap<String, Vec<ImportRecord>>;

/// Handle to the ledger file. Holds no open file between operations.
#[derive(Debug, Clone)]
pub struct Ledger {
    path: PathBuf,
}

impl Ledger {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the whole document. A missing or blank file is an empty ledger.
    pub fn read(&self) -> Result<LedgerDocument, LedgerError> {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(LedgerDocument::new()),
            Err(source) => {
                return Err(LedgerError::Read {
                    path: self.path.clone(),
                    source,
                })
            }
        };

        if content.trim().is_empty() {
            return Ok(LedgerDocument::new());
        }

        serde_json::from_str(&content).map_err(|source| LedgerError::Parse {
            path: self.path.clone(),
            source,
        })
    }

    /// Records for `feed_id` whose file matches `pattern`, oldest first.
    ///
    /// Ties on `imported_at` keep append order.
    pub fn records_for(
        &self,
        feed_id: &str,
        pattern: &Regex,
    ) -> Result<Vec<ImportRecord>, LedgerError> {
        let mut doc = self.read()?;
        let records = doc.remove(feed_id).unwrap_or_default();

        if let Some(index) = records.iter().position(|r| r.imported_file.is_empty()) {
            return Err(LedgerError::MissingImportedFile {
                feed: feed_id.to_string(),
                index,
            });
        }

        let mut matched: Vec<ImportRecord> = records
            .into_iter()
            .filter(|r| pattern.is_match(&r.imported_file))
            .collect();
        matched.sort_by_key(|r| r.imported_at);
        Ok(matched)
    }

    /// The most recent matching record, if anything has been imported.
    pub fn most_recent_record(
        &self,
        feed_id: &str,
        pattern: &Regex,
    ) -> Result<Option<ImportRecord>, LedgerError> {
        Ok(self.records_for(feed_id, pattern)?.pop())
    }

    /// Date buckets of every matching record.
    pub fn imported_buckets(
        &self,
        feed_id: &str,
        pattern: &Regex,
    ) -> Result<BTreeSet<String>, LedgerError> {
        Ok(self
            .records_for(feed_id, pattern)?
            .iter()
            .filter_map(|r| r.bucket().map(str::to_string))
            .collect())
    }

    /// Record `file` as imported for `feed_id`, stamped with the current time.
    pub fn append(&self, feed_id: &str, file: &str) -> Result<ImportRecord, LedgerError> {
        let now = Local::now().naive_local();
        self.append_at(feed_id, file, now)
    }

    /// Record `file` as imported at `at` (truncated to whole seconds).
    ///
    /// The stamp never precedes the feed's latest record, so "most recent"
    /// stays the last appended record even if the clock steps back.
    pub fn append_at(
        &self,
        feed_id: &str,
        file: &str,
        at: NaiveDateTime,
    ) -> Result<ImportRecord, LedgerError> {
        let at = at.with_nanosecond(0).unwrap_or(at);
        self.update(|doc| {
            let records = doc.entry(feed_id.to_string()).or_default();
            let latest = records.iter().map(|r| r.imported_at).max();
            let record = ImportRecord {
                imported_file: file.to_string(),
                imported_at: latest.map_or(at, |l| l.max(at)),
            };
            records.push(record.clone());
            Ok(record)
        })
    }

    /// Run `f` against the current document and persist the result.
    ///
    /// If `f` fails nothing is written.
    pub fn update<F, T>(&self, f: F) -> Result<T, LedgerError>
    where
        F: FnOnce(&mut LedgerDocument) -> Result<T, LedgerError>,
    {
        let mut doc = self.read()?;
        let out = f(&mut doc)?;
        self.write_atomic(&doc)?;
        Ok(out)
    }

    fn write_atomic(&self, doc: &LedgerDocument) -> Result<(), LedgerError> {
        let json = serde_json::to_string_pretty(doc).map_err(LedgerError::Serialize)?;
        let write_err = |source| LedgerError::Write {
            path: self.path.clone(),
            source,
        };

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(write_err)?;
        }

        let tmp_path = tmp_path_for(&self.path);
        let mut file = fs::File::create(&tmp_path).map_err(write_err)?;
        file.write_all(json.as_bytes()).map_err(write_err)?;
        file.write_all(b"\n").map_err(write_err)?;
        file.sync_all().map_err(write_err)?;
        drop(file);

        fs::rename(&tmp_path, &self.path).map_err(|e| {
            let _ = fs::remove_file(&tmp_path);
            write_err(e)
        })
    }

    /// Check the raw document against the manifest: every key must be a
    /// manifest feed and every record must carry exactly `imported_file` and
    /// `imported_at`.
    pub fn validate(&self, manifest: &Manifest) -> Result<LedgerReport, LedgerError> {
        let content = match fs::read_to_string(&self.path) {
            Ok(c) => c,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(LedgerReport::default()),
            Err(source) => {
                return Err(LedgerError::Read {
                    path: self.path.clone(),
                    source,
                })
            }
        };
        if content.trim().is_empty() {
            return Ok(LedgerReport::default());
        }
        let raw: Value = serde_json::from_str(&content).map_err(|source| LedgerError::Parse {
            path: self.path.clone(),
            source,
        })?;

        let mut report = LedgerReport::default();
        let Some(feeds) = raw.as_object() else {
            report.problems.push(LedgerProblem::NotAMapping);
            return Ok(report);
        };

        for (feed_id, records) in feeds {
            if manifest.feed(feed_id).is_none() {
                report.problems.push(LedgerProblem::UnknownFeed(feed_id.clone()));
            }
            let Some(records) = records.as_array() else {
                report.problems.push(LedgerProblem::NotAList(feed_id.clone()));
                continue;
            };
            report.record_counts.insert(feed_id.clone(), records.len());

            for (index, record) in records.iter().enumerate() {
                if !is_well_formed(record) {
                    report.problems.push(LedgerProblem::MalformedRecord {
                        feed: feed_id.clone(),
                        index,
                    });
                }
            }
        }

        Ok(report)
    }
}

fn is_well_formed(record: &Value) -> bool {
    let Some(fields) = record.as_object() else {
        return false;
    };
    let non_empty = |key: &str| {
        fields
            .get(key)
            .and_then(Value::as_str)
            .is_some_and(|s| !s.is_empty())
    };
    fields.len() == 2 && non_empty("imported_file") && non_empty("imported_at")
}

fn tmp_path_for(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".tmp");
    path.with_file_name(name)
}

/// Problems found by [`Ledger::validate`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LedgerProblem {
    NotAMapping,
    UnknownFeed(String),
    NotAList(String),
    MalformedRecord { feed: String, index: usize },
}

impl std::fmt::Display for LedgerProblem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LedgerProblem::NotAMapping => write!(f, "ledger is not a mapping of feed id to records"),
            LedgerProblem::UnknownFeed(id) => write!(f, "{id} is not in the manifest"),
            LedgerProblem::NotAList(id) => write!(f, "records for {id} are not a list"),
            LedgerProblem::MalformedRecord { feed, index } => write!(
                f,
                "record #{index} for {feed} must have exactly imported_file and imported_at"
            ),
        }
    }
}

/// Outcome of [`Ledger::validate`].
#[derive(Debug, Clone, Default)]
pub struct LedgerReport {
    pub record_counts: BTreeMap<String, usize>,
    pub problems: Vec<LedgerProblem>,
}

impl LedgerReport {
    pub fn is_ok(&self) -> bool {
        self.problems.is_empty()
    }
}
