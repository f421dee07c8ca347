//! Feedpipe CLI — fetch, import and ledger commands.
//!
//! Commands:
//! - `run` — fetch every feed, then import in dependency order
//! - `fetch` — run every feed's fetch program
//! - `manual` — walk through feeds that must be downloaded by hand
//! - `import` — run hooks and importers in dependency order
//! - `mark-imported` — record every unimported file without running it
//! - `show-order` — print the resolved import order
//! - `validate-ledger` — check the ledger against the manifest
//! - `procedure` — run one internal procedure

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use dialoguer::{Confirm, Input};
use tracing::warn;
use tracing_subscriber::EnvFilter;

use feedpipe_core::{Feed, InternalProcedure};
use feedpipe_runner::{
    manual_data_briefs, ConfiguredProcedures, FetchSummary, ImportSummary, ManualDataBrief,
    Operator, Orchestrator, Pipeline, PipelineConfig, ProcedureRunner, ProcessExecutor,
    Unattended,
};

const WRAP_WIDTH: usize = 70;

#[derive(Parser)]
#[command(name = "feedpipe", about = "Feedpipe — fetch and import recurring data feeds")]
struct Cli {
    /// Path to a TOML config file. Defaults to ./feedpipe.toml if present.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch every feed, then import everything new.
    Run {
        /// Ask before every hook and import command.
        #[arg(long, default_value_t = false)]
        paranoid: bool,
    },
    /// Run every feed's fetch program.
    Fetch,
    /// Walk through the core-data feeds that must be downloaded by hand.
    Manual,
    /// Run hooks and importers for every feed, in dependency order.
    Import {
        /// Ask before every hook and import command.
        #[arg(long, default_value_t = false)]
        paranoid: bool,
    },
    /// Record every unimported file as imported, without running anything.
    MarkImported {
        /// Do not ask for confirmation.
        #[arg(long, default_value_t = false)]
        yes: bool,
    },
    /// Print feeds in the order they are imported.
    ShowOrder {
        /// Emit the ordered feeds as JSON.
        #[arg(long, default_value_t = false)]
        json: bool,
    },
    /// Check that the ledger only names manifest feeds and well-formed records.
    ValidateLedger,
    /// Run one internal procedure: bigquery_upload, archive_data, run_smoketests.
    Procedure { name: String },
}

/// Prompts on the terminal.
struct TerminalOperator;

impl Operator for TerminalOperator {
    fn confirm(&self, question: &str) -> bool {
        match Confirm::new().with_prompt(question).default(false).interact() {
            Ok(answer) => answer,
            Err(e) => {
                warn!(error = %e, "no answer from terminal; treating as no");
                false
            }
        }
    }

    fn acknowledge(&self, message: &str) {
        println!("{message}");
        let ack: Result<String, _> = Input::new()
            .with_prompt("Press return when done")
            .allow_empty(true)
            .interact_text();
        if let Err(e) = ack {
            warn!(error = %e, "no answer from terminal");
        }
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = PipelineConfig::load(cli.config.as_deref()).context("loading config")?;
    let pipeline = Pipeline::load(config).context("loading manifest")?;

    match cli.command {
        Commands::Run { paranoid } => run_pipeline(&pipeline, paranoid),
        Commands::Fetch => run_fetch(&pipeline),
        Commands::Manual => run_manual(&pipeline),
        Commands::Import { paranoid } => run_import(&pipeline, paranoid),
        Commands::MarkImported { yes } => run_mark_imported(&pipeline, yes),
        Commands::ShowOrder { json } => run_show_order(&pipeline, json),
        Commands::ValidateLedger => run_validate_ledger(&pipeline),
        Commands::Procedure { name } => run_procedure(&pipeline, &name),
    }
}

fn operator_for(paranoid: bool) -> &'static dyn Operator {
    if paranoid {
        &TerminalOperator
    } else {
        &Unattended
    }
}

fn run_pipeline(pipeline: &Pipeline, paranoid: bool) -> Result<()> {
    let executor = ProcessExecutor;
    let procedures = ConfiguredProcedures::new(&pipeline.config, &executor);
    let mut orchestrator =
        Orchestrator::new(pipeline, &executor, &procedures, operator_for(paranoid));

    let (fetched, imported) = orchestrator.run()?;
    print_fetch_summary(&fetched);
    print_import_summary(&imported);
    Ok(())
}

fn run_fetch(pipeline: &Pipeline) -> Result<()> {
    let executor = ProcessExecutor;
    let procedures = ConfiguredProcedures::new(&pipeline.config, &executor);
    let mut orchestrator = Orchestrator::new(pipeline, &executor, &procedures, &Unattended);

    let summary = orchestrator.run_all_fetchers()?;
    print_fetch_summary(&summary);
    Ok(())
}

fn run_import(pipeline: &Pipeline, paranoid: bool) -> Result<()> {
    let executor = ProcessExecutor;
    let procedures = ConfiguredProcedures::new(&pipeline.config, &executor);
    let mut orchestrator =
        Orchestrator::new(pipeline, &executor, &procedures, operator_for(paranoid));

    let summary = orchestrator.run_all_importers()?;
    print_import_summary(&summary);
    Ok(())
}

fn run_manual(pipeline: &Pipeline) -> Result<()> {
    let today = chrono::Local::now().date_naive();
    let briefs = manual_data_briefs(pipeline, today)?;
    if briefs.is_empty() {
        println!("No manual core-data feeds.");
        return Ok(());
    }

    let operator = TerminalOperator;
    for brief in &briefs {
        operator.acknowledge(&format_brief(brief));
    }
    Ok(())
}

fn run_mark_imported(pipeline: &Pipeline, yes: bool) -> Result<()> {
    if !yes
        && !TerminalOperator.confirm("Record every unimported file as imported without running it?")
    {
        println!("Nothing recorded.");
        return Ok(());
    }

    let executor = ProcessExecutor;
    let procedures = ConfiguredProcedures::new(&pipeline.config, &executor);
    let orchestrator = Orchestrator::new(pipeline, &executor, &procedures, &Unattended);

    let appended = orchestrator.mark_all_imported()?;
    println!(
        "Recorded {appended} file(s) in {}",
        pipeline.ledger.path().display()
    );
    Ok(())
}

fn run_show_order(pipeline: &Pipeline, json: bool) -> Result<()> {
    let order = pipeline.manifest.ordered()?;

    if json {
        println!("{}", serde_json::to_string_pretty(&order)?);
        return Ok(());
    }

    for (i, feed) in order.iter().enumerate() {
        print_feed(i + 1, feed);
    }
    Ok(())
}

fn run_validate_ledger(pipeline: &Pipeline) -> Result<()> {
    let report = pipeline.ledger.validate(&pipeline.manifest)?;

    for (feed, count) in &report.record_counts {
        println!("  {feed:<30} {count:>6} record(s)");
    }
    if report.is_ok() {
        println!("Ledger OK: {}", pipeline.ledger.path().display());
        return Ok(());
    }

    for problem in &report.problems {
        eprintln!("  problem: {problem}");
    }
    bail!("ledger has {} problem(s)", report.problems.len())
}

fn run_procedure(pipeline: &Pipeline, name: &str) -> Result<()> {
    let Some(procedure) = InternalProcedure::from_name(name) else {
        let known: Vec<&str> = InternalProcedure::all().map(|p| p.name()).collect();
        bail!("unknown procedure '{name}'. Valid: {}", known.join(", "));
    };

    let executor = ProcessExecutor;
    ConfiguredProcedures::new(&pipeline.config, &executor).run(procedure)?;
    println!("Procedure {procedure} complete");
    Ok(())
}

fn print_feed(position: usize, feed: &Feed) {
    println!("{position:>3}. {}", feed.id);
    if !feed.depends_on.is_empty() {
        println!("       depends on: {}", feed.depends_on.join(", "));
    }
    if feed.import_passes > 1 {
        println!("       passes:     {}", feed.import_passes);
    }
    for hook in &feed.before_import {
        println!("       before:     {hook}");
    }
    for importer in &feed.importers {
        println!("       import:     {importer}");
    }
    for hook in &feed.after_import {
        println!("       after:      {hook}");
    }
}

fn print_fetch_summary(summary: &FetchSummary) {
    println!();
    println!("=== Fetch Summary ===");
    println!("Fetched: {} feed(s)", summary.fetched.len());
    for id in &summary.fetched {
        println!("  {id}");
    }
}

fn print_import_summary(summary: &ImportSummary) {
    println!();
    println!("=== Import Summary ===");
    for report in &summary.feeds {
        if report.is_idle() && report.hooks_run == 0 && report.hooks_skipped == 0 {
            continue;
        }
        println!(
            "  {:<30} imported {:>3}  skipped {:>3}  hooks {:>2}",
            report.feed_id,
            report.imported.len(),
            report.skipped.len() + report.permanently_skipped.len(),
            report.hooks_run,
        );
        for file in &report.permanently_skipped {
            println!("      skipped permanently: {file}");
        }
    }
    println!(
        "Imported: {}  Skipped: {}",
        summary.imported_count(),
        summary.skipped_count()
    );
}

fn format_brief(brief: &ManualDataBrief) -> String {
    let mut out = String::new();
    let mut line = |s: String| {
        out.push_str(&s);
        out.push('\n');
    };

    line(format!("=== {} ===", brief.feed_id));
    line(format!(
        "Save the file(s) to {}",
        brief.expected_location.display()
    ));
    if let Some(url) = &brief.index_url {
        line(format!("Index: {url}"));
    }
    for (label, url) in &brief.urls {
        line(format!("Previously ({label}): {url}"));
    }
    if let Some(schedule) = &brief.publication_schedule {
        line(format!("Published: {schedule}"));
    }
    if let Some(notes) = &brief.notes {
        line("Notes:".to_string());
        for wrapped in wrap(notes, WRAP_WIDTH) {
            line(format!("  {wrapped}"));
        }
    }
    for (template, record) in &brief.last_imported {
        match record {
            Some(r) => line(format!(
                "Last imported for `{template}`: {} at {}",
                r.imported_file, r.imported_at
            )),
            None => line(format!("Nothing imported yet for `{template}`")),
        }
    }
    out
}

/// Greedy word wrap; words longer than `width` get their own line.
fn wrap(text: &str, width: usize) -> Vec<String> {
    let mut lines = Vec::new();
    let mut current = String::new();
    for word in text.split_whitespace() {
        if !current.is_empty() && current.len() + 1 + word.len() > width {
            lines.push(std::mem::take(&mut current));
        }
        if !current.is_empty() {
            current.push(' ');
        }
        current.push_str(word);
    }
    if !current.is_empty() {
        lines.push(current);
    }
    lines
}
