//! Pipeline configuration: file locations and command wrappers.
//!
//! Loaded from TOML (`feedpipe.toml` or `--config`), then overridden by
//! `FEEDPIPE_*` environment variables. A `.env` file is honoured.

use std::borrow::Cow;
use std::collections::BTreeMap;
use std::path::{Component, Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use feedpipe_core::InternalProcedure;

/// Config file looked up in the working directory when none is given.
pub const DEFAULT_CONFIG_FILE: &str = "feedpipe.toml";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("[procedures] names unknown procedure '{0}'")]
    UnknownProcedure(String),

    #[error("cannot make data root {} absolute: {source}", .path.display())]
    DataRoot {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub manifest_path: PathBuf,
    pub ledger_path: PathBuf,
    /// Root of the `<data_dir>/<YYYY_MM>/<file>` tree.
    pub data_root: PathBuf,
    pub fetch: FetchConfig,
    pub import: ImportConfig,
    /// Internal procedure name -> command line.
    pub procedures: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FetchConfig {
    /// Directory fetch programs live in; also their working directory.
    pub root: PathBuf,
    /// Interpreter prefix, e.g. `python3`. Empty runs the fetcher directly.
    pub program: String,
    /// Extra environment for fetch programs.
    pub env: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ImportConfig {
    /// Working directory of import and hook commands.
    pub app_root: PathBuf,
    /// Prefix of every import and hook command, e.g. `python manage.py`.
    pub program: String,
    /// Appended to every import and hook command, e.g. `-v 2`.
    pub suffix: String,
    /// Extra environment for import and hook commands.
    pub env: BTreeMap<String, String>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            manifest_path: PathBuf::from("manifest.json"),
            ledger_path: PathBuf::from("log.json"),
            data_root: PathBuf::from("data"),
            fetch: FetchConfig::default(),
            import: ImportConfig::default(),
            procedures: BTreeMap::new(),
        }
    }
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("fetchers"),
            program: String::new(),
            env: BTreeMap::from([("PYTHONIOENCODING".to_string(), "utf-8".to_string())]),
        }
    }
}

impl Default for ImportConfig {
    fn default() -> Self {
        Self {
            app_root: PathBuf::from("."),
            program: String::new(),
            suffix: String::new(),
            env: BTreeMap::from([("PYTHONIOENCODING".to_string(), "utf-8".to_string())]),
        }
    }
}

impl PipelineConfig {
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&content)
    }

    /// Resolve the effective config: `path` if given, else
    /// [`DEFAULT_CONFIG_FILE`] if present, else defaults; then `.env` and
    /// environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(p) => Self::from_file(p)?,
            None if Path::new(DEFAULT_CONFIG_FILE).is_file() => {
                Self::from_file(DEFAULT_CONFIG_FILE)?
            }
            None => Self::default(),
        };
        let _ = dotenvy::dotenv();
        config.apply_env_overrides();
        Ok(config)
    }

    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides_from(|key| std::env::var(key).ok());
    }

    /// Apply `FEEDPIPE_*` overrides looked up through `lookup`.
    pub fn apply_overrides_from<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("FEEDPIPE_MANIFEST") {
            self.manifest_path = PathBuf::from(v);
        }
        if let Some(v) = lookup("FEEDPIPE_LEDGER") {
            self.ledger_path = PathBuf::from(v);
        }
        if let Some(v) = lookup("FEEDPIPE_DATA_ROOT") {
            self.data_root = PathBuf::from(v);
        }
        if let Some(v) = lookup("FEEDPIPE_FETCHERS_ROOT") {
            self.fetch.root = PathBuf::from(v);
        }
        if let Some(v) = lookup("FEEDPIPE_FETCH_PROGRAM") {
            self.fetch.program = v;
        }
        if let Some(v) = lookup("FEEDPIPE_APP_ROOT") {
            self.import.app_root = PathBuf::from(v);
        }
        if let Some(v) = lookup("FEEDPIPE_IMPORT_PROGRAM") {
            self.import.program = v;
        }
        if let Some(v) = lookup("FEEDPIPE_IMPORT_SUFFIX") {
            self.import.suffix = v;
        }
    }

    /// Every `[procedures]` key must name an internal procedure.
    pub fn validate(&self) -> Result<(), ConfigError> {
        match self
            .procedures
            .keys()
            .find(|name| InternalProcedure::from_name(name).is_none())
        {
            Some(name) => Err(ConfigError::UnknownProcedure(name.clone())),
            None => Ok(()),
        }
    }

    /// [`Self::data_root`] resolved against the working directory.
    ///
    /// Import commands run from the app root, so the paths they receive and
    /// the paths the ledger records must not be relative.
    pub fn absolute_data_root(&self) -> Result<PathBuf, ConfigError> {
        if self.data_root.is_absolute() {
            return Ok(self.data_root.clone());
        }
        let cwd = std::env::current_dir().map_err(|source| ConfigError::DataRoot {
            path: self.data_root.clone(),
            source,
        })?;
        let relative: PathBuf = self
            .data_root
            .components()
            .filter(|c| !matches!(c, Component::CurDir))
            .collect();
        Ok(cwd.join(relative))
    }

    /// Wrap an import or hook command in the configured program and suffix.
    pub fn import_command_line(&self, command: &str) -> String {
        join_nonempty(&[self.import.program.as_str(), command, self.import.suffix.as_str()])
    }

    /// Command line for a fetcher, run from [`FetchConfig::root`].
    pub fn fetch_command_line(&self, fetcher: &str) -> String {
        let target: Cow<'_, str> = if self.fetch.program.is_empty() {
            Cow::Owned(format!("./{fetcher}"))
        } else {
            Cow::Borrowed(fetcher)
        };
        let quoted = shlex::try_quote(&target).unwrap_or(Cow::Borrowed(&target));
        join_nonempty(&[self.fetch.program.as_str(), quoted.as_ref()])
    }

    pub fn procedure_command(&self, procedure: InternalProcedure) -> Option<&str> {
        self.procedures.get(procedure.name()).map(String::as_str)
    }
}

fn join_nonempty(parts: &[&str]) -> String {
    parts
        .iter()
        .map(|p| p.trim())
        .filter(|p| !p.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
manifest_path = "pipeline/manifest.json"
ledger_path = "pipeline/log.json"
data_root = "/srv/data"

[fetch]
root = "pipeline/fetchers"
program = "python3"

[import]
app_root = "/srv/app"
program = "python manage.py"
suffix = "-v 2 --settings=app.settings"

[procedures]
bigquery_upload = "python manage.py upload_to_warehouse"
"#;

    #[test]
    fn parses_full_file() {
        let config = PipelineConfig::from_toml(SAMPLE).unwrap();
        assert_eq!(config.data_root, PathBuf::from("/srv/data"));
        assert_eq!(config.fetch.program, "python3");
        assert_eq!(config.import.app_root, PathBuf::from("/srv/app"));
        assert_eq!(
            config.procedure_command(InternalProcedure::WarehouseLoad),
            Some("python manage.py upload_to_warehouse")
        );
        assert_eq!(config.procedure_command(InternalProcedure::ArchiveData), None);
    }

    #[test]
    fn missing_sections_use_defaults() {
        let config = PipelineConfig::from_toml("data_root = \"d\"").unwrap();
        assert_eq!(config.manifest_path, PathBuf::from("manifest.json"));
        assert_eq!(config.ledger_path, PathBuf::from("log.json"));
        assert_eq!(config.fetch.root, PathBuf::from("fetchers"));
        assert_eq!(config.import.env.get("PYTHONIOENCODING").unwrap(), "utf-8");
    }

    #[test]
    fn rejects_unknown_procedure() {
        let err = PipelineConfig::from_toml("[procedures]\nbogus = \"x\"").unwrap_err();
        assert!(matches!(err, ConfigError::UnknownProcedure(ref n) if n == "bogus"));
    }

    #[test]
    fn env_overrides_win() {
        let mut config = PipelineConfig::from_toml(SAMPLE).unwrap();
        config.apply_overrides_from(|key| match key {
            "FEEDPIPE_DATA_ROOT" => Some("/mnt/data".into()),
            "FEEDPIPE_IMPORT_SUFFIX" => Some("-v 0".into()),
            _ => None,
        });
        assert_eq!(config.data_root, PathBuf::from("/mnt/data"));
        assert_eq!(config.import.suffix, "-v 0");
        assert_eq!(config.import.program, "python manage.py");
    }

    #[test]
    fn import_command_line_wraps_command() {
        let config = PipelineConfig::from_toml(SAMPLE).unwrap();
        assert_eq!(
            config.import_command_line("import_adqs --filename /srv/data/adqs.csv"),
            "python manage.py import_adqs --filename /srv/data/adqs.csv -v 2 --settings=app.settings"
        );
    }

    #[test]
    fn import_command_line_without_wrapper_is_the_command() {
        let config = PipelineConfig::default();
        assert_eq!(config.import_command_line("refresh_views"), "refresh_views");
    }

    #[test]
    fn fetch_env_is_separate_from_import_env() {
        let config = PipelineConfig::from_toml(
            "[fetch]\nenv = { API_KEY = \"k\" }\n[import]\nenv = { DJANGO_SETTINGS_MODULE = \"app\" }",
        )
        .unwrap();
        assert_eq!(config.fetch.env.get("API_KEY").unwrap(), "k");
        assert!(!config.fetch.env.contains_key("DJANGO_SETTINGS_MODULE"));
        assert!(!config.import.env.contains_key("API_KEY"));
    }

    #[test]
    fn relative_data_root_is_made_absolute() {
        let config = PipelineConfig {
            data_root: PathBuf::from("./reldata"),
            ..Default::default()
        };
        let root = config.absolute_data_root().unwrap();
        assert!(root.is_absolute());
        assert_eq!(root, std::env::current_dir().unwrap().join("reldata"));

        let config = PipelineConfig {
            data_root: PathBuf::from("/srv/data"),
            ..Default::default()
        };
        assert_eq!(config.absolute_data_root().unwrap(), PathBuf::from("/srv/data"));
    }

    #[test]
    fn fetch_command_line() {
        let mut config = PipelineConfig::default();
        assert_eq!(config.fetch_command_line("bnf_codes.py"), "./bnf_codes.py");

        config.fetch.program = "python3".into();
        assert_eq!(config.fetch_command_line("bnf codes.py"), "python3 'bnf codes.py'");
    }
}
