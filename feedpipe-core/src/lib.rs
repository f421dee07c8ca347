//! Feedpipe Core — the data model of a recurring multi-feed import pipeline.
//!
//! This crate holds everything that decides *what* to run, with no process
//! execution or terminal I/O:
//! - Manifest of feeds, validated at load
//! - Import ledger (append-only, atomic writes)
//! - File discovery over dated directory trees
//! - Command synthesis from importer templates
//! - Dependency ordering
//! - Hook steps (external commands and internal procedures)

pub mod command;
pub mod dependency;
pub mod hook;
pub mod ledger;
pub mod locator;
pub mod manifest;

pub use command::{
    filename_arg, substitute, synthesize, ImportCommand, Importer, SynthesisError, TemplateError,
    FILENAME_FLAGS,
};
pub use dependency::{resolve_order, DependencyCycleError, DependencyGraph};
pub use hook::{HookError, HookStep, InternalProcedure, INTERNAL_PREFIX};
pub use ledger::{ImportRecord, Ledger, LedgerDocument, LedgerError, LedgerProblem, LedgerReport};
pub use locator::{date_bucket, FileCandidate, FileLocator, LocateError};
pub use manifest::{Feed, Manifest, ManifestError};
