//! Feedpipe Runner — executes the pipeline described by `feedpipe-core`.
//!
//! This crate builds on `feedpipe-core` to provide:
//! - TOML + environment configuration
//! - External command execution with captured output
//! - The orchestrator: fetch, hooks, import passes, ledger updates
//! - Internal procedures behind a runner port
//! - Manual-data briefs for feeds without a fetcher

pub mod config;
pub mod executor;
pub mod manual;
pub mod operator;
pub mod orchestrator;
pub mod pipeline;
pub mod procedures;

pub use config::{ConfigError, FetchConfig, ImportConfig, PipelineConfig, DEFAULT_CONFIG_FILE};
pub use executor::{
    run_checked, CommandError, CommandExecutor, CommandOutput, CommandSpec, ExecutorError,
    ExternalCommandError, ProcessExecutor,
};
pub use manual::{manual_data_briefs, ManualDataBrief, CORE_DATA_TAG};
pub use operator::{Operator, Unattended};
pub use orchestrator::{
    FeedReport, FeedStage, FetchSummary, ImportSummary, Orchestrator, RunError, RunPhase,
};
pub use pipeline::Pipeline;
pub use procedures::{ConfiguredProcedures, ProcedureError, ProcedureRunner};
