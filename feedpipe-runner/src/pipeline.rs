//! The loaded state a run operates on.

use feedpipe_core::{FileLocator, Ledger, Manifest};

use crate::config::PipelineConfig;
use crate::orchestrator::RunError;

/// Config, manifest, ledger and data root, loaded once per run.
#[derive(Debug, Clone)]
pub struct Pipeline {
    pub config: PipelineConfig,
    pub manifest: Manifest,
    pub ledger: Ledger,
    pub locator: FileLocator,
}

impl Pipeline {
    /// Read and validate the manifest named by `config`.
    pub fn load(config: PipelineConfig) -> Result<Self, RunError> {
        let manifest = Manifest::load(&config.manifest_path)?;
        Self::new(config, manifest)
    }

    /// Fails only if a relative data root cannot be resolved.
    pub fn new(config: PipelineConfig, manifest: Manifest) -> Result<Self, RunError> {
        let ledger = Ledger::new(config.ledger_path.clone());
        let locator = FileLocator::new(config.absolute_data_root()?);
        Ok(Self {
            config,
            manifest,
            ledger,
            locator,
        })
    }
}
