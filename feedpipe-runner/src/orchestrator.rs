//! Orchestrator — drives fetch, hooks and import passes feed by feed.
//!
//! A run moves `Idle → Fetching → PerFeedImport → Done`. Each feed, in
//! dependency order, goes through `BeforeHooks → ImportPass(n) → AfterHooks`.
//! Every step runs to completion before the next starts; the first failure
//! aborts the run. The ledger is appended after each successful import, so a
//! re-run after a failure resumes where this one stopped.

use std::collections::HashSet;
use std::fmt;

use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, info_span, warn};

use feedpipe_core::{
    synthesize, DependencyCycleError, Feed, HookStep, ImportCommand, LedgerError, LocateError,
    ManifestError, SynthesisError,
};

use crate::config::ConfigError;
use crate::executor::{run_checked, CommandError, CommandExecutor, CommandSpec};
use crate::operator::Operator;
use crate::pipeline::Pipeline;
use crate::procedures::{ProcedureError, ProcedureRunner};

/// Errors from a pipeline run.
#[derive(Debug, Error)]
pub enum RunError {
    #[error("config error: {0}")]
    Config(#[from] ConfigError),
    #[error("manifest error: {0}")]
    Manifest(#[from] ManifestError),
    #[error(transparent)]
    Cycle(#[from] DependencyCycleError),
    #[error("ledger error: {0}")]
    Ledger(#[from] LedgerError),
    #[error("file discovery error: {0}")]
    Locate(#[from] LocateError),
    #[error("cannot build import commands: {0}")]
    Synthesis(#[from] SynthesisError),
    #[error(transparent)]
    Command(#[from] CommandError),
    #[error(transparent)]
    Procedure(#[from] ProcedureError),
}

/// Where a run currently is.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunPhase {
    Idle,
    Fetching,
    PerFeedImport { feed: String, stage: FeedStage },
    Done,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedStage {
    BeforeHooks,
    /// 1-based pass number.
    ImportPass(u32),
    AfterHooks,
}

impl fmt::Display for FeedStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FeedStage::BeforeHooks => f.write_str("before_import"),
            FeedStage::ImportPass(n) => write!(f, "import pass {n}"),
            FeedStage::AfterHooks => f.write_str("after_import"),
        }
    }
}

/// Outcome of the fetch phase.
#[derive(Debug, Clone, Default, Serialize)]
pub struct FetchSummary {
    pub fetched: Vec<String>,
}

/// What happened to one feed during an import run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct FeedReport {
    pub feed_id: String,
    /// Passes that synthesized at least one command.
    pub passes_run: u32,
    pub imported: Vec<String>,
    /// Declined this run; offered again next run.
    pub skipped: Vec<String>,
    /// Declined and recorded in the ledger.
    pub permanently_skipped: Vec<String>,
    pub hooks_run: usize,
    pub hooks_skipped: usize,
}

impl FeedReport {
    fn new(feed_id: &str) -> Self {
        Self {
            feed_id: feed_id.to_string(),
            ..Default::default()
        }
    }

    pub fn is_idle(&self) -> bool {
        self.imported.is_empty() && self.skipped.is_empty() && self.permanently_skipped.is_empty()
    }
}

/// Outcome of the import phase, one report per feed in run order.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ImportSummary {
    pub feeds: Vec<FeedReport>,
}

impl ImportSummary {
    pub fn imported_count(&self) -> usize {
        self.feeds.iter().map(|f| f.imported.len()).sum()
    }

    pub fn skipped_count(&self) -> usize {
        self.feeds
            .iter()
            .map(|f| f.skipped.len() + f.permanently_skipped.len())
            .sum()
    }

    pub fn feed(&self, id: &str) -> Option<&FeedReport> {
        self.feeds.iter().find(|f| f.feed_id == id)
    }
}

/// Drives one pipeline through its phases.
pub struct Orchestrator<'a> {
    pipeline: &'a Pipeline,
    executor: &'a dyn CommandExecutor,
    procedures: &'a dyn ProcedureRunner,
    operator: &'a dyn Operator,
    phase: RunPhase,
}

impl<'a> Orchestrator<'a> {
    pub fn new(
        pipeline: &'a Pipeline,
        executor: &'a dyn CommandExecutor,
        procedures: &'a dyn ProcedureRunner,
        operator: &'a dyn Operator,
    ) -> Self {
        Self {
            pipeline,
            executor,
            procedures,
            operator,
            phase: RunPhase::Idle,
        }
    }

    pub fn phase(&self) -> &RunPhase {
        &self.phase
    }

    /// Feeds in the order imports run.
    pub fn resolved_order(&self) -> Result<Vec<&'a Feed>, RunError> {
        Ok(self.pipeline.manifest.ordered()?)
    }

    /// Fetch, then import.
    pub fn run(&mut self) -> Result<(FetchSummary, ImportSummary), RunError> {
        let fetched = self.run_all_fetchers()?;
        let imported = self.run_all_importers()?;
        Ok((fetched, imported))
    }

    /// Run every feed's fetch program, in manifest order.
    pub fn run_all_fetchers(&mut self) -> Result<FetchSummary, RunError> {
        self.phase = RunPhase::Fetching;
        let config = &self.pipeline.config;
        let mut summary = FetchSummary::default();

        for feed in self.pipeline.manifest.with_fetchers() {
            let Some(fetcher) = feed.fetcher.as_deref() else {
                continue;
            };
            let _span = info_span!("fetch", feed = %feed.id).entered();
            let spec = CommandSpec {
                line: config.fetch_command_line(fetcher),
                cwd: config.fetch.root.clone(),
                env: config.fetch.env.clone(),
            };
            run_checked(self.executor, &spec)?;
            summary.fetched.push(feed.id.clone());
        }

        self.phase = RunPhase::Idle;
        info!(feeds = summary.fetched.len(), "fetch complete");
        Ok(summary)
    }

    /// Import every feed in dependency order.
    ///
    /// The order is resolved before anything runs, so a cycle fails the run
    /// without side effects.
    pub fn run_all_importers(&mut self) -> Result<ImportSummary, RunError> {
        let order = self.resolved_order()?;
        let mut summary = ImportSummary::default();

        for feed in order {
            let _span = info_span!("feed", feed = %feed.id).entered();
            summary.feeds.push(self.import_feed(feed)?);
        }

        self.phase = RunPhase::Done;
        info!(
            imported = summary.imported_count(),
            skipped = summary.skipped_count(),
            "import complete"
        );
        Ok(summary)
    }

    /// Record every currently unimported file as imported, without running
    /// anything. Returns the number of records appended.
    ///
    /// `always_import` feeds are left alone; their files are imported
    /// regardless of the ledger.
    pub fn mark_all_imported(&self) -> Result<usize, RunError> {
        let pipeline = self.pipeline;
        let mut appended = 0;

        for feed in self.resolved_order()? {
            if feed.always_import {
                debug!(feed = %feed.id, "always_import; not marking");
                continue;
            }
            for importer in &feed.importers {
                let files = match pipeline.locator.unimported_files(
                    feed,
                    importer.pattern(),
                    &pipeline.ledger,
                ) {
                    Ok(files) => files,
                    Err(LocateError::NoMatchingFile { .. }) => continue,
                    Err(e) => return Err(e.into()),
                };
                for file in files {
                    pipeline.ledger.append(&feed.id, &file.path_str())?;
                    info!(feed = %feed.id, file = %file.path().display(), "marked as imported");
                    appended += 1;
                }
            }
        }

        Ok(appended)
    }

    fn enter(&mut self, feed: &Feed, stage: FeedStage) {
        self.phase = RunPhase::PerFeedImport {
            feed: feed.id.clone(),
            stage,
        };
    }

    fn import_feed(&mut self, feed: &Feed) -> Result<FeedReport, RunError> {
        let mut report = FeedReport::new(&feed.id);

        self.run_hooks(feed, &feed.before_import, FeedStage::BeforeHooks, &mut report)?;

        // Commands already run or declined in an earlier pass of this run.
        let mut handled = HashSet::new();
        for pass in 1..=feed.import_passes {
            self.enter(feed, FeedStage::ImportPass(pass));
            let commands: Vec<ImportCommand> =
                synthesize(feed, &self.pipeline.locator, &self.pipeline.ledger)?
                    .into_iter()
                    .filter(|c| !handled.contains(&c.command))
                    .collect();
            if commands.is_empty() {
                debug!(pass, "nothing to import");
                break;
            }
            report.passes_run = pass;
            for command in commands {
                self.run_import(&command, &mut report)?;
                handled.insert(command.command);
            }
        }

        self.run_hooks(feed, &feed.after_import, FeedStage::AfterHooks, &mut report)?;
        Ok(report)
    }

    fn run_import(
        &mut self,
        command: &ImportCommand,
        report: &mut FeedReport,
    ) -> Result<(), RunError> {
        let file = command.file.path_str();
        let line = self.pipeline.config.import_command_line(&command.command);
        info!(file = %file, "importing");

        if !self.operator.confirm(&format!("Run `{line}`. Continue?")) {
            if self.operator.confirm("Skip permanently?") {
                self.pipeline.ledger.append(&command.feed_id, &file)?;
                warn!(file = %file, "skipped permanently");
                report.permanently_skipped.push(file);
            } else {
                warn!(file = %file, "skipped");
                report.skipped.push(file);
            }
            return Ok(());
        }

        run_checked(self.executor, &self.app_spec(line))?;
        self.pipeline.ledger.append(&command.feed_id, &file)?;
        report.imported.push(file);
        Ok(())
    }

    fn run_hooks(
        &mut self,
        feed: &Feed,
        hooks: &[HookStep],
        stage: FeedStage,
        report: &mut FeedReport,
    ) -> Result<(), RunError> {
        if hooks.is_empty() {
            return Ok(());
        }
        self.enter(feed, stage);

        for hook in hooks {
            if !self.operator.confirm(&format!("Run {stage} step `{hook}`. Continue?")) {
                warn!(%hook, "{stage} step skipped");
                report.hooks_skipped += 1;
                continue;
            }
            info!(%hook, "running {stage} step");
            match hook {
                HookStep::Internal(procedure) => self.procedures.run(*procedure)?,
                HookStep::External(command) => {
                    let line = self.pipeline.config.import_command_line(command);
                    run_checked(self.executor, &self.app_spec(line))?;
                }
            }
            report.hooks_run += 1;
        }
        Ok(())
    }

    /// An import or hook command, run from the application root.
    fn app_spec(&self, line: String) -> CommandSpec {
        let import = &self.pipeline.config.import;
        CommandSpec {
            line,
            cwd: import.app_root.clone(),
            env: import.env.clone(),
        }
    }
}
