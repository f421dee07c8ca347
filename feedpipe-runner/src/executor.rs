//! External command execution.
//!
//! `CommandExecutor` is the seam between orchestration and the operating
//! system: the orchestrator builds a `CommandSpec`, the executor runs it to
//! completion and hands back exit code and captured output. `run_checked`
//! turns a non-zero exit into an `ExternalCommandError`.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::time::Instant;

use thiserror::Error;
use tracing::{debug, info};

/// One command to run to completion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    /// Shell-style command line; tokenized, never passed to a shell.
    pub line: String,
    pub cwd: PathBuf,
    /// Added to the inherited environment.
    pub env: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// `None` when the process was killed by a signal.
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }
}

#[derive(Debug, Error)]
pub enum ExecutorError {
    #[error("cannot tokenize command line `{0}`")]
    Tokenize(String),

    #[error("empty command line")]
    Empty,

    #[error("failed to start `{line}`: {source}")]
    Spawn {
        line: String,
        #[source]
        source: std::io::Error,
    },
}

/// A command that ran and exited unsuccessfully.
#[derive(Debug, Clone, Error)]
#[error(
    "`{line}` failed after {elapsed_secs}s with {}\n--- stdout ---\n{stdout}\n--- stderr ---\n{stderr}",
    exit_description(.exit_code)
)]
pub struct ExternalCommandError {
    pub line: String,
    pub exit_code: Option<i32>,
    pub elapsed_secs: u64,
    pub stdout: String,
    pub stderr: String,
}

fn exit_description(code: &Option<i32>) -> String {
    match code {
        Some(c) => format!("exit code {c}"),
        None => "no exit code (terminated by signal)".to_string(),
    }
}

#[derive(Debug, Error)]
pub enum CommandError {
    #[error(transparent)]
    Executor(#[from] ExecutorError),

    #[error(transparent)]
    Failed(#[from] ExternalCommandError),
}

/// Runs commands synchronously.
pub trait CommandExecutor {
    fn run(&self, spec: &CommandSpec) -> Result<CommandOutput, ExecutorError>;
}

/// Spawns real processes with piped stdout/stderr.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessExecutor;

impl CommandExecutor for ProcessExecutor {
    fn run(&self, spec: &CommandSpec) -> Result<CommandOutput, ExecutorError> {
        let argv =
            shlex::split(&spec.line).ok_or_else(|| ExecutorError::Tokenize(spec.line.clone()))?;
        let (program, args) = argv.split_first().ok_or(ExecutorError::Empty)?;

        debug!(program = %program, cwd = %spec.cwd.display(), "spawning");

        let output = Command::new(program)
            .args(args)
            .current_dir(&spec.cwd)
            .envs(&spec.env)
            .stdin(Stdio::inherit())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .map_err(|source| ExecutorError::Spawn {
                line: spec.line.clone(),
                source,
            })?;

        Ok(CommandOutput {
            exit_code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

/// Run `spec`, logging timing and output; a non-zero exit is an error.
pub fn run_checked(
    executor: &dyn CommandExecutor,
    spec: &CommandSpec,
) -> Result<CommandOutput, CommandError> {
    info!(command = %spec.line, cwd = %spec.cwd.display(), "running");
    let start = Instant::now();
    let output = executor.run(spec)?;
    let elapsed_secs = start.elapsed().as_secs();

    if !output.success() {
        return Err(ExternalCommandError {
            line: spec.line.clone(),
            exit_code: output.exit_code,
            elapsed_secs,
            stdout: output.stdout,
            stderr: output.stderr,
        }
        .into());
    }

    info!(command = %spec.line, elapsed_secs, "completed");
    let stdout = output.stdout.trim_end();
    if !stdout.is_empty() {
        info!("{stdout}");
    }
    Ok(output)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    struct Canned {
        output: CommandOutput,
        seen: RefCell<Vec<String>>,
    }

    impl CommandExecutor for Canned {
        fn run(&self, spec: &CommandSpec) -> Result<CommandOutput, ExecutorError> {
            self.seen.borrow_mut().push(spec.line.clone());
            Ok(self.output.clone())
        }
    }

    fn spec(line: &str) -> CommandSpec {
        CommandSpec {
            line: line.into(),
            cwd: PathBuf::from("."),
            env: BTreeMap::new(),
        }
    }

    #[test]
    fn zero_exit_passes_output_through() {
        let exec = Canned {
            output: CommandOutput {
                exit_code: Some(0),
                stdout: "imported 12 rows\n".into(),
                stderr: String::new(),
            },
            seen: RefCell::new(Vec::new()),
        };
        let out = run_checked(&exec, &spec("import_x --filename a.csv")).unwrap();
        assert_eq!(out.stdout, "imported 12 rows\n");
        assert_eq!(*exec.seen.borrow(), vec!["import_x --filename a.csv"]);
    }

    #[test]
    fn nonzero_exit_carries_captured_output() {
        let exec = Canned {
            output: CommandOutput {
                exit_code: Some(3),
                stdout: "partial".into(),
                stderr: "Traceback".into(),
            },
            seen: RefCell::new(Vec::new()),
        };
        let err = run_checked(&exec, &spec("import_x")).unwrap_err();
        let failed = match err {
            CommandError::Failed(failed) => failed,
            other => panic!("expected a failed command, got {other:?}"),
        };
        assert_eq!(failed.exit_code, Some(3));
        assert_eq!(failed.stdout, "partial");
        assert_eq!(failed.stderr, "Traceback");
        let message = failed.to_string();
        assert!(message.contains("exit code 3"));
        assert!(message.contains("Traceback"));
    }

    #[test]
    fn signal_is_a_failure() {
        let output = CommandOutput {
            exit_code: None,
            ..Default::default()
        };
        assert!(!output.success());
    }

    #[test]
    fn unbalanced_quotes_do_not_spawn() {
        let err = ProcessExecutor.run(&spec("echo 'oops")).unwrap_err();
        assert!(matches!(err, ExecutorError::Tokenize(_)));
    }

    #[test]
    fn blank_line_is_empty() {
        let err = ProcessExecutor.run(&spec("   ")).unwrap_err();
        assert!(matches!(err, ExecutorError::Empty));
    }

    #[cfg(unix)]
    #[test]
    fn process_executor_captures_stdout_and_env() {
        let mut s = spec("sh -c 'printf \"%s\" \"$FEEDPIPE_TEST_VALUE\"; exit 2'");
        s.env.insert("FEEDPIPE_TEST_VALUE".into(), "hello".into());
        let out = ProcessExecutor.run(&s).unwrap();
        assert_eq!(out.exit_code, Some(2));
        assert_eq!(out.stdout, "hello");
    }
}
