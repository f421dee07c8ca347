//! Internal procedures named by `runner:` hook steps.

use thiserror::Error;
use tracing::info;

use feedpipe_core::InternalProcedure;

use crate::config::PipelineConfig;
use crate::executor::{run_checked, CommandError, CommandExecutor, CommandSpec};

#[derive(Debug, Error)]
pub enum ProcedureError {
    #[error("no command configured for procedure '{0}' (add it under [procedures])")]
    NotConfigured(InternalProcedure),

    #[error("procedure '{procedure}' failed: {source}")]
    Failed {
        procedure: InternalProcedure,
        #[source]
        source: CommandError,
    },
}

/// Runs internal procedures.
pub trait ProcedureRunner {
    fn run(&self, procedure: InternalProcedure) -> Result<(), ProcedureError>;
}

/// Runs the command configured for each procedure under `[procedures]`,
/// from the application root with the import environment.
pub struct ConfiguredProcedures<'a> {
    config: &'a PipelineConfig,
    executor: &'a dyn CommandExecutor,
}

impl<'a> ConfiguredProcedures<'a> {
    pub fn new(config: &'a PipelineConfig, executor: &'a dyn CommandExecutor) -> Self {
        Self { config, executor }
    }

    pub fn spec_for(&self, procedure: InternalProcedure) -> Result<CommandSpec, ProcedureError> {
        let line = self
            .config
            .procedure_command(procedure)
            .ok_or(ProcedureError::NotConfigured(procedure))?;
        Ok(CommandSpec {
            line: line.to_string(),
            cwd: self.config.import.app_root.clone(),
            env: self.config.import.env.clone(),
        })
    }
}

impl ProcedureRunner for ConfiguredProcedures<'_> {
    fn run(&self, procedure: InternalProcedure) -> Result<(), ProcedureError> {
        let spec = self.spec_for(procedure)?;
        info!(%procedure, "running internal procedure");
        run_checked(self.executor, &spec)
            .map(|_| ())
            .map_err(|source| ProcedureError::Failed { procedure, source })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::{CommandOutput, ExecutorError};
    use std::cell::RefCell;
    use std::path::PathBuf;

    #[derive(Default)]
    struct Recorder {
        specs: RefCell<Vec<CommandSpec>>,
    }

    impl CommandExecutor for Recorder {
        fn run(&self, spec: &CommandSpec) -> Result<CommandOutput, ExecutorError> {
            self.specs.borrow_mut().push(spec.clone());
            Ok(CommandOutput {
                exit_code: Some(0),
                ..Default::default()
            })
        }
    }

    #[test]
    fn runs_configured_command_from_app_root() {
        let mut config = PipelineConfig::default();
        config.import.app_root = PathBuf::from("/srv/app");
        config
            .procedures
            .insert("archive_data".into(), "archive --older-than 5y".into());
        let exec = Recorder::default();

        ConfiguredProcedures::new(&config, &exec)
            .run(InternalProcedure::ArchiveData)
            .unwrap();

        let specs = exec.specs.borrow();
        assert_eq!(specs.len(), 1);
        assert_eq!(specs[0].line, "archive --older-than 5y");
        assert_eq!(specs[0].cwd, PathBuf::from("/srv/app"));
        assert_eq!(specs[0].env.get("PYTHONIOENCODING").unwrap(), "utf-8");
    }

    #[test]
    fn unconfigured_procedure_is_an_error() {
        let config = PipelineConfig::default();
        let exec = Recorder::default();

        let err = ConfiguredProcedures::new(&config, &exec)
            .run(InternalProcedure::SmokeTests)
            .unwrap_err();

        assert!(matches!(
            err,
            ProcedureError::NotConfigured(InternalProcedure::SmokeTests)
        ));
        assert!(exec.specs.borrow().is_empty());
    }
}
