//! Command synthesis from importer templates.
//!
//! An importer template is a command line carrying exactly one
//! filename-bearing flag, e.g. `import_adqs --filename adqs_.*csv`. The token
//! after the flag is a regex placeholder: it selects candidate files under
//! the feed's data directory, and is replaced by a concrete (shell-quoted)
//! path to produce a runnable command.

use std::fmt;
use std::ops::Range;
use std::path::PathBuf;

use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::ledger::Ledger;
use crate::locator::{FileCandidate, FileLocator, LocateError};
use crate::manifest::Feed;

/// Flags whose value names the input file of an import command.
pub const FILENAME_FLAGS: &[&str] = &[
    "filename",
    "ccg",
    "epraccur",
    "chem_file",
    "hscic_address",
    "month_from_prescribing_filename",
];

/// Errors in a single command template.
#[derive(Debug, Error)]
pub enum TemplateError {
    #[error("couldn't find a filename argument in `{0}`")]
    NoFilenameFlag(String),

    #[error("filename flag `--{flag}` has no value in `{template}`")]
    MissingValue { flag: String, template: String },

    #[error("unbalanced quoting in `{0}`")]
    Unparseable(String),

    #[error("filename placeholder `{placeholder}` does not appear verbatim in `{template}`")]
    PlaceholderNotVerbatim { placeholder: String, template: String },

    #[error("filename placeholder `{placeholder}` is not a valid regex: {source}")]
    InvalidPattern {
        placeholder: String,
        #[source]
        source: regex::Error,
    },

    #[error("path {0:?} cannot be shell-quoted")]
    UnquotablePath(String),
}

/// Errors while synthesizing the commands for a feed.
#[derive(Debug, Error)]
pub enum SynthesisError {
    #[error(transparent)]
    Locate(#[from] LocateError),

    #[error(transparent)]
    Template(#[from] TemplateError),
}

/// Extract the value of the last filename-bearing flag in `template`.
///
/// Backslashes are doubled before tokenizing so that regex escapes written in
/// the manifest (`\.csv$`) survive shell-style unescaping.
pub fn filename_arg(template: &str) -> Result<String, TemplateError> {
    filename_flag(template).map(|(_, value)| value)
}

/// The last recognized filename flag (without `--`) and its value.
fn filename_flag(template: &str) -> Result<(String, String), TemplateError> {
    let escaped = template.replace('\\', "\\\\");
    let mut tokens =
        shlex::split(&escaped).ok_or_else(|| TemplateError::Unparseable(template.to_string()))?;

    let flag_idx = tokens
        .iter()
        .rposition(|t| {
            t.strip_prefix("--")
                .is_some_and(|flag| FILENAME_FLAGS.contains(&flag))
        })
        .ok_or_else(|| TemplateError::NoFilenameFlag(template.to_string()))?;
    let flag = tokens[flag_idx].trim_start_matches("--").to_string();

    if flag_idx + 1 >= tokens.len() {
        return Err(TemplateError::MissingValue {
            flag,
            template: template.to_string(),
        });
    }
    let value = tokens.swap_remove(flag_idx + 1);
    Ok((flag, value))
}

fn is_token_start(text: &str, at: usize) -> bool {
    text[..at].chars().next_back().map_or(true, char::is_whitespace)
}

fn is_token_end(text: &str, at: usize) -> bool {
    text[at..].chars().next().map_or(true, char::is_whitespace)
}

/// Byte span of the filename flag's value in `template`, quotes included,
/// and the unquoted placeholder itself.
///
/// The value must appear verbatim right after the flag, bare or wrapped in
/// one pair of quotes.
fn placeholder_span(template: &str) -> Result<(Range<usize>, String), TemplateError> {
    let (flag, placeholder) = filename_flag(template)?;
    let not_verbatim = || TemplateError::PlaceholderNotVerbatim {
        placeholder: placeholder.clone(),
        template: template.to_string(),
    };

    let needle = format!("--{flag}");
    let flag_end = template
        .match_indices(needle.as_str())
        .map(|(at, _)| (at, at + needle.len()))
        .filter(|&(at, end)| is_token_start(template, at) && is_token_end(template, end))
        .last()
        .map(|(_, end)| end)
        .ok_or_else(not_verbatim)?;

    let rest = &template[flag_end..];
    let start = flag_end + (rest.len() - rest.trim_start().len());
    let value = &template[start..];

    let len = if value.starts_with(placeholder.as_str()) {
        placeholder.len()
    } else {
        ['\'', '"']
            .into_iter()
            .find(|&q| {
                value
                    .strip_prefix(q)
                    .and_then(|inner| inner.strip_prefix(placeholder.as_str()))
                    .is_some_and(|tail| tail.starts_with(q))
            })
            .map(|_| placeholder.len() + 2)
            .ok_or_else(not_verbatim)?
    };
    if !is_token_end(template, start + len) {
        return Err(not_verbatim());
    }

    Ok((start..start + len, placeholder))
}

/// Replace the value of the last filename flag in `template` with the
/// shell-quoted `path`. Everything else in the template is left as written.
pub fn substitute(template: &str, path: &str) -> Result<String, TemplateError> {
    let (span, _) = placeholder_span(template)?;
    splice(template, &span, path)
}

fn splice(template: &str, span: &Range<usize>, path: &str) -> Result<String, TemplateError> {
    let quoted =
        shlex::try_quote(path).map_err(|_| TemplateError::UnquotablePath(path.to_string()))?;
    Ok(format!(
        "{}{}{}",
        &template[..span.start],
        quoted,
        &template[span.end..]
    ))
}

/// A validated importer template.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Importer {
    template: String,
    placeholder: String,
    span: Range<usize>,
    pattern: Regex,
}

impl Importer {
    pub fn parse(template: &str) -> Result<Self, TemplateError> {
        let (span, placeholder) = placeholder_span(template)?;
        let pattern = Regex::new(&placeholder).map_err(|source| TemplateError::InvalidPattern {
            placeholder: placeholder.clone(),
            source,
        })?;

        Ok(Self {
            template: template.to_string(),
            placeholder,
            span,
            pattern,
        })
    }

    pub fn template(&self) -> &str {
        &self.template
    }

    pub fn placeholder(&self) -> &str {
        &self.placeholder
    }

    /// Regex selecting this importer's files and ledger records.
    pub fn pattern(&self) -> &Regex {
        &self.pattern
    }

    /// The concrete command importing `file`.
    pub fn command_for(&self, file: &FileCandidate) -> Result<String, TemplateError> {
        splice(&self.template, &self.span, &file.path_str())
    }
}

impl PartialEq for Importer {
    fn eq(&self, other: &Self) -> bool {
        self.template == other.template
    }
}

impl Eq for Importer {}

impl TryFrom<String> for Importer {
    type Error = TemplateError;

    fn try_from(template: String) -> Result<Self, Self::Error> {
        Importer::parse(&template)
    }
}

impl From<Importer> for String {
    fn from(importer: Importer) -> String {
        importer.template
    }
}

impl fmt::Display for Importer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.template)
    }
}

/// A concrete import command for one unimported file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportCommand {
    pub feed_id: String,
    /// The importer template this command was built from.
    pub template: String,
    /// The command with the placeholder replaced.
    pub command: String,
    /// The file the command imports; this is what the ledger records.
    pub file: FileCandidate,
}

impl ImportCommand {
    pub fn file_path(&self) -> PathBuf {
        self.file.path().to_path_buf()
    }
}

/// Build every command still needed for `feed`.
///
/// Importers whose data directory holds no matching file contribute nothing.
pub fn synthesize(
    feed: &Feed,
    locator: &FileLocator,
    ledger: &Ledger,
) -> Result<Vec<ImportCommand>, SynthesisError> {
    let mut commands = Vec::new();

    for importer in &feed.importers {
        let files = match locator.unimported_files(feed, importer.pattern(), ledger) {
            Ok(files) => files,
            Err(LocateError::NoMatchingFile { dir, pattern }) => {
                debug!(feed = %feed.id, dir = %dir.display(), %pattern, "no matching files");
                continue;
            }
            Err(e) => return Err(e.into()),
        };

        for file in files {
            let command = importer.command_for(&file)?;
            debug!(feed = %feed.id, %command, "synthesized import command");
            commands.push(ImportCommand {
                feed_id: feed.id.clone(),
                template: importer.template().to_string(),
                command,
                file,
            });
        }
    }

    Ok(commands)
}
