//! Discovery of dated data files.
//!
//! Layout: `{data_root}/{feed data_dir}/{date_bucket}/{file}`
//!
//! Date buckets (`2017_01`, `2017_02`, ...) sort lexicographically in
//! chronological order, so an ascending sort of full paths is oldest first.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::ledger::{Ledger, LedgerError};
use crate::manifest::Feed;

#[derive(Debug, Error)]
pub enum LocateError {
    #[error("no file under {} matches `{pattern}`", .dir.display())]
    NoMatchingFile { dir: PathBuf, pattern: String },

    #[error("failed to scan {}: {source}", .dir.display())]
    Io {
        dir: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error(transparent)]
    Ledger(#[from] LedgerError),
}

/// The date bucket of a `/`-separated path: its parent directory name.
pub fn date_bucket(path: &str) -> Option<&str> {
    let mut parts = path.rsplit('/');
    parts.next()?;
    parts.next().filter(|b| !b.is_empty())
}

/// A data file found in a feed's dated directory tree.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct FileCandidate {
    path: PathBuf,
    bucket: String,
}

impl FileCandidate {
    /// Build a candidate from a path with at least a bucket and a file name.
    pub fn from_path(path: impl Into<PathBuf>) -> Option<Self> {
        let path = path.into();
        let bucket = date_bucket(&path.to_string_lossy())?.to_string();
        Some(Self { path, bucket })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Path as recorded in the ledger and matched against importer regexes.
    pub fn path_str(&self) -> String {
        self.path.to_string_lossy().into_owned()
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }
}

/// Finds candidate files for feeds under a data root.
#[derive(Debug, Clone)]
pub struct FileLocator {
    data_root: PathBuf,
}

impl FileLocator {
    pub fn new(data_root: impl Into<PathBuf>) -> Self {
        Self {
            data_root: data_root.into(),
        }
    }

    pub fn data_root(&self) -> &Path {
        &self.data_root
    }

    /// `{data_root}/{data_dir}` for a feed.
    pub fn feed_dir(&self, feed: &Feed) -> PathBuf {
        self.data_root.join(feed.data_dir())
    }

    /// Every file two levels below the feed directory whose path matches
    /// `pattern`, sorted ascending by path.
    pub fn files_by_date(
        &self,
        feed: &Feed,
        pattern: &Regex,
    ) -> Result<Vec<FileCandidate>, LocateError> {
        let dir = self.feed_dir(feed);
        let mut found = Vec::new();

        for bucket in visible_entries(&dir)? {
            if !bucket.is_dir() {
                continue;
            }
            for file in visible_entries(&bucket)? {
                if !file.is_file() {
                    continue;
                }
                if !pattern.is_match(&file.to_string_lossy()) {
                    continue;
                }
                if let Some(candidate) = FileCandidate::from_path(file) {
                    found.push(candidate);
                }
            }
        }

        if found.is_empty() {
            return Err(LocateError::NoMatchingFile {
                dir,
                pattern: pattern.as_str().to_string(),
            });
        }

        found.sort_by_cached_key(|c| c.path_str());
        Ok(found)
    }

    /// Candidates whose date bucket has no matching ledger record.
    ///
    /// This is a set-membership test over recorded buckets, so an older file
    /// imported out of order is still reported. With `always_import` every
    /// candidate is returned.
    pub fn unimported_files(
        &self,
        feed: &Feed,
        pattern: &Regex,
        ledger: &Ledger,
    ) -> Result<Vec<FileCandidate>, LocateError> {
        let imported = ledger.imported_buckets(&feed.id, pattern)?;
        let candidates = self.files_by_date(feed, pattern)?;

        Ok(candidates
            .into_iter()
            .filter(|c| feed.always_import || !imported.contains(c.bucket()))
            .collect())
    }
}

/// Non-hidden entries of `dir`. A missing directory has no entries.
fn visible_entries(dir: &Path) -> Result<Vec<PathBuf>, LocateError> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(source) => {
            return Err(LocateError::Io {
                dir: dir.to_path_buf(),
                source,
            })
        }
    };

    let mut paths = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|source| LocateError::Io {
            dir: dir.to_path_buf(),
            source,
        })?;
        if entry.file_name().to_string_lossy().starts_with('.') {
            continue;
        }
        paths.push(entry.path());
    }
    Ok(paths)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::Feed;
    use tempfile::TempDir;

    fn touch(root: &Path, rel: &str) {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, b"x").unwrap();
    }

    fn any() -> Regex {
        Regex::new(".*").unwrap()
    }

    #[test]
    fn date_bucket_is_parent_dir() {
        assert_eq!(date_bucket("/data/prescribing/2017_03/T201703.CSV"), Some("2017_03"));
        assert_eq!(date_bucket("2017_03/x.csv"), Some("2017_03"));
        assert_eq!(date_bucket("x.csv"), None);
    }

    #[test]
    fn files_sorted_oldest_first() {
        let tmp = TempDir::new().unwrap();
        touch(tmp.path(), "adqs/2017_03/adqs.csv");
        touch(tmp.path(), "adqs/2016_12/adqs.csv");
        touch(tmp.path(), "adqs/2017_01/adqs.csv");

        let locator = FileLocator::new(tmp.path());
        let files = locator.files_by_date(&Feed::new("adqs"), &any()).unwrap();
        let buckets: Vec<&str> = files.iter().map(|f| f.bucket()).collect();

        assert_eq!(buckets, vec!["2016_12", "2017_01", "2017_03"]);
    }

    #[test]
    fn files_filtered_by_pattern() {
        let tmp = TempDir::new().unwrap();
        touch(tmp.path(), "prescribing/2017_01/T201701PDPI+BNFT.CSV");
        touch(tmp.path(), "prescribing/2017_01/T201701PDPI+BNFT_formatted.CSV");

        let locator = FileLocator::new(tmp.path());
        let pattern = Regex::new(r"_formatted\.CSV$").unwrap();
        let files = locator
            .files_by_date(&Feed::new("prescribing"), &pattern)
            .unwrap();

        assert_eq!(files.len(), 1);
        assert!(files[0].path_str().ends_with("_formatted.CSV"));
    }

    #[test]
    fn data_dir_override_is_scanned() {
        let tmp = TempDir::new().unwrap();
        touch(tmp.path(), "shared/2018_02/ccg.csv");

        let mut feed = Feed::new("ccg_boundaries");
        feed.data_dir = Some("shared".into());
        let files = FileLocator::new(tmp.path()).files_by_date(&feed, &any()).unwrap();

        assert_eq!(files.len(), 1);
    }

    #[test]
    fn hidden_entries_and_top_level_files_are_skipped() {
        let tmp = TempDir::new().unwrap();
        touch(tmp.path(), "adqs/README");
        touch(tmp.path(), "adqs/.cache/adqs.csv");
        touch(tmp.path(), "adqs/2017_01/.partial");
        touch(tmp.path(), "adqs/2017_01/adqs.csv");

        let files = FileLocator::new(tmp.path())
            .files_by_date(&Feed::new("adqs"), &any())
            .unwrap();

        assert_eq!(files.len(), 1);
        assert_eq!(files[0].bucket(), "2017_01");
    }

    #[test]
    fn missing_dir_is_no_matching_file() {
        let tmp = TempDir::new().unwrap();
        let err = FileLocator::new(tmp.path())
            .files_by_date(&Feed::new("nothing_here"), &any())
            .unwrap_err();

        assert!(matches!(err, LocateError::NoMatchingFile { .. }));
    }
}
