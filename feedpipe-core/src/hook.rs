//! Before/after-import hook steps.
//!
//! A manifest hook string is either an external command, run through the
//! import command wrapper, or `runner:<name>`, naming one of a closed set of
//! pipeline-internal procedures. Names are resolved against a fixed table at
//! manifest load, so an unknown procedure fails before anything runs.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Prefix marking a hook as a pipeline-internal procedure.
pub const INTERNAL_PREFIX: &str = "runner:";

/// Procedures the pipeline can invoke by name from a hook.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum InternalProcedure {
    /// Load freshly imported tables into the data warehouse.
    WarehouseLoad,
    /// Upload every discovered data file to object storage.
    ArchiveData,
    /// Run the smoke-test suite against the latest import.
    SmokeTests,
}

/// Lookup table from manifest name to procedure.
const PROCEDURES: &[(&str, InternalProcedure)] = &[
    ("bigquery_upload", InternalProcedure::WarehouseLoad),
    ("archive_data", InternalProcedure::ArchiveData),
    ("run_smoketests", InternalProcedure::SmokeTests),
];

impl InternalProcedure {
    /// Resolve a manifest name (without the `runner:` prefix).
    pub fn from_name(name: &str) -> Option<Self> {
        PROCEDURES
            .iter()
            .find(|(n, _)| *n == name)
            .map(|(_, p)| *p)
    }

    /// The manifest name of this procedure.
    pub fn name(self) -> &'static str {
        PROCEDURES
            .iter()
            .find(|(_, p)| *p == self)
            .map(|(n, _)| *n)
            .unwrap_or("unknown")
    }

    /// All known procedures, in table order.
    pub fn all() -> impl Iterator<Item = InternalProcedure> {
        PROCEDURES.iter().map(|(_, p)| *p)
    }
}

impl fmt::Display for InternalProcedure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum HookError {
    #[error("unknown internal procedure '{0}' (known: bigquery_upload, archive_data, run_smoketests)")]
    UnknownProcedure(String),

    #[error("empty hook command")]
    Empty,
}

/// One before/after-import step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum HookStep {
    External(String),
    Internal(InternalProcedure),
}

impl HookStep {
    pub fn parse(raw: &str) -> Result<Self, HookError> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(HookError::Empty);
        }
        match raw.strip_prefix(INTERNAL_PREFIX) {
            Some(name) => InternalProcedure::from_name(name.trim())
                .map(HookStep::Internal)
                .ok_or_else(|| HookError::UnknownProcedure(name.trim().to_string())),
            None => Ok(HookStep::External(raw.to_string())),
        }
    }
}

impl TryFrom<String> for HookStep {
    type Error = HookError;

    fn try_from(raw: String) -> Result<Self, Self::Error> {
        HookStep::parse(&raw)
    }
}

impl From<HookStep> for String {
    fn from(step: HookStep) -> String {
        step.to_string()
    }
}

impl fmt::Display for HookStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HookStep::External(cmd) => f.write_str(cmd),
            HookStep::Internal(p) => write!(f, "{INTERNAL_PREFIX}{}", p.name()),
        }
    }
}
