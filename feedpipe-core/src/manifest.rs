//! Manifest — the declarative list of upstream data feeds.
//!
//! The manifest is a JSON array of feed objects. It is validated as a whole
//! at load time: structure, unique ids, importer templates and hook names all
//! fail here, before anything is fetched or imported.

use std::collections::{BTreeMap, HashSet};
use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::command::Importer;
use crate::dependency::{resolve_order, DependencyCycleError};
use crate::hook::HookStep;

#[derive(Debug, Error)]
pub enum ManifestError {
    #[error("failed to read manifest {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("manifest is not valid JSON: {0}")]
    Syntax(#[source] serde_json::Error),

    #[error("manifest must be a list of feed objects")]
    NotAList,

    #[error("manifest entry #{index} is not an object")]
    NotAnObject { index: usize },

    #[error("manifest entry #{index} has no `id`")]
    MissingId { index: usize },

    #[error("feed '{id}' is invalid: {source}")]
    InvalidFeed {
        id: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("feed id '{0}' appears more than once")]
    DuplicateId(String),

    #[error("feed '{0}' must have at least one import pass")]
    ZeroImportPasses(String),
}

fn default_import_passes() -> u32 {
    1
}

fn is_default_import_passes(n: &u32) -> bool {
    *n == 1
}

/// One upstream data source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Feed {
    pub id: String,

    /// Feeds whose imports must finish before this one's start.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub depends_on: Vec<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub importers: Vec<Importer>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub before_import: Vec<HookStep>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub after_import: Vec<HookStep>,

    /// Treat every discovered file as unimported.
    #[serde(default)]
    pub always_import: bool,

    /// Storage subdirectory under the data root; defaults to `id`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_dir: Option<String>,

    /// Fetch program, relative to the fetchers root. Feeds without one are
    /// refreshed by hand.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fetcher: Option<String>,

    /// How many import passes to run. A feed whose first import generates
    /// the input of a second importer needs two.
    #[serde(
        default = "default_import_passes",
        skip_serializing_if = "is_default_import_passes"
    )]
    pub import_passes: u32,

    // Documentation for the manual-data walkthrough.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub urls: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub publication_schedule: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub index_url: Option<String>,
}

impl Feed {
    /// A feed with only an id set.
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            depends_on: Vec::new(),
            importers: Vec::new(),
            before_import: Vec::new(),
            after_import: Vec::new(),
            always_import: false,
            data_dir: None,
            fetcher: None,
            import_passes: default_import_passes(),
            tags: Vec::new(),
            notes: None,
            urls: BTreeMap::new(),
            publication_schedule: None,
            index_url: None,
        }
    }

    pub fn data_dir(&self) -> &str {
        self.data_dir.as_deref().unwrap_or(&self.id)
    }

    pub fn has_fetcher(&self) -> bool {
        self.fetcher.is_some()
    }

    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.iter().any(|t| t == tag)
    }
}

/// The loaded, validated manifest.
#[derive(Debug, Clone)]
pub struct Manifest {
    feeds: Vec<Feed>,
}

impl Manifest {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ManifestError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ManifestError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&content)
    }

    pub fn from_json(content: &str) -> Result<Self, ManifestError> {
        let raw: Value = serde_json::from_str(content).map_err(ManifestError::Syntax)?;
        let Value::Array(entries) = raw else {
            return Err(ManifestError::NotAList);
        };

        let mut feeds = Vec::with_capacity(entries.len());
        for (index, entry) in entries.into_iter().enumerate() {
            let id = match &entry {
                Value::Object(fields) => match fields.get("id") {
                    Some(Value::String(id)) if !id.is_empty() => id.clone(),
                    _ => return Err(ManifestError::MissingId { index }),
                },
                _ => return Err(ManifestError::NotAnObject { index }),
            };
            let feed: Feed = serde_json::from_value(entry)
                .map_err(|source| ManifestError::InvalidFeed { id, source })?;
            feeds.push(feed);
        }

        Self::from_feeds(feeds)
    }

    pub fn from_feeds(feeds: Vec<Feed>) -> Result<Self, ManifestError> {
        let mut seen = HashSet::new();
        for feed in &feeds {
            if !seen.insert(feed.id.as_str()) {
                return Err(ManifestError::DuplicateId(feed.id.clone()));
            }
            if feed.import_passes == 0 {
                return Err(ManifestError::ZeroImportPasses(feed.id.clone()));
            }
        }
        Ok(Self { feeds })
    }

    /// Feeds in manifest order.
    pub fn feeds(&self) -> &[Feed] {
        &self.feeds
    }

    pub fn feed(&self, id: &str) -> Option<&Feed> {
        self.feeds.iter().find(|f| f.id == id)
    }

    /// Feeds with a fetch program, in manifest order.
    pub fn with_fetchers(&self) -> Vec<&Feed> {
        self.feeds.iter().filter(|f| f.has_fetcher()).collect()
    }

    /// Feeds refreshed by hand, in manifest order.
    pub fn without_fetchers(&self) -> Vec<&Feed> {
        self.feeds.iter().filter(|f| !f.has_fetcher()).collect()
    }

    /// Feeds ordered so that every feed follows its dependencies.
    pub fn ordered(&self) -> Result<Vec<&Feed>, DependencyCycleError> {
        resolve_order(&self.feeds)
    }
}
