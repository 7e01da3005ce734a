use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use serde::Deserialize;
use thiserror::Error;

use crate::types::{OperationKind, StrategyKind};

const DEFAULT_JOB_NAME: &str = "Unnamed Job";
const DEFAULT_SCAN_INTERVAL_SECS: u64 = 60;

/// A job that could not be built from its config entry. Only that job is
/// skipped; the rest still start.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("job '{job}' is missing required field `{field}`")]
    MissingField { job: String, field: &'static str },

    #[error("job '{job}': unknown strategy '{value}'")]
    UnknownStrategy { job: String, value: String },

    #[error("job '{job}': unsupported operation '{value}'")]
    UnsupportedOperation { job: String, value: String },

    #[error("job '{job}': scan_interval_secs must be greater than zero")]
    InvalidInterval { job: String },
}

/// One watch-root/destination binding. Immutable once loaded.
#[derive(Debug, Clone)]
pub struct Job {
    pub name: String,
    pub watch_root: PathBuf,
    pub dest_root: PathBuf,
    /// Lowercase extensions without the leading dot. Empty allows everything.
    pub extensions: BTreeSet<String>,
    pub strategy: StrategyKind,
    pub operation: OperationKind,
    pub scan_interval: Duration,
}

impl Job {
    /// Whether the job's allow-list admits this path.
    pub fn accepts(&self, path: &Path) -> bool {
        if self.extensions.is_empty() {
            return true;
        }
        crate::sort::file_extension(path).is_some_and(|ext| self.extensions.contains(&ext))
    }
}

/// On-disk shape of a config file.
#[derive(Debug, Deserialize)]
struct ConfigFile {
    #[serde(default)]
    jobs: Vec<RawJob>,
}

#[derive(Debug, Deserialize)]
struct RawJob {
    #[serde(alias = "job_name")]
    name: Option<String>,
    #[serde(alias = "watch_root")]
    watch_folder: Option<String>,
    #[serde(alias = "dest_root")]
    destination_folder: Option<String>,
    #[serde(default, alias = "extensions")]
    file_types: Vec<String>,
    strategy: Option<String>,
    operation: Option<String>,
    scan_interval_secs: Option<u64>,
}

impl RawJob {
    fn into_job(self) -> Result<Job, ConfigError> {
        let name = self
            .name
            .filter(|n| !n.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_JOB_NAME.to_string());

        let watch_root = self
            .watch_folder
            .filter(|s| !s.is_empty())
            .map(|s| expand_tilde(&s))
            .ok_or_else(|| ConfigError::MissingField {
                job: name.clone(),
                field: "watch_folder",
            })?;
        let dest_root = self
            .destination_folder
            .filter(|s| !s.is_empty())
            .map(|s| expand_tilde(&s))
            .ok_or_else(|| ConfigError::MissingField {
                job: name.clone(),
                field: "destination_folder",
            })?;

        let strategy = match self.strategy {
            Some(value) => StrategyKind::from_name(&value).ok_or_else(|| {
                ConfigError::UnknownStrategy {
                    job: name.clone(),
                    value,
                }
            })?,
            None => StrategyKind::default(),
        };
        let operation = match self.operation {
            Some(value) => OperationKind::from_name(&value).ok_or_else(|| {
                ConfigError::UnsupportedOperation {
                    job: name.clone(),
                    value,
                }
            })?,
            None => OperationKind::default(),
        };

        let interval = self.scan_interval_secs.unwrap_or(DEFAULT_SCAN_INTERVAL_SECS);
        if interval == 0 {
            return Err(ConfigError::InvalidInterval { job: name });
        }

        Ok(Job {
            name,
            watch_root,
            dest_root,
            extensions: self.file_types.iter().filter_map(|e| normalize_extension(e)).collect(),
            strategy,
            operation,
            scan_interval: Duration::from_secs(interval),
        })
    }
}

/// `.JPG`, `jpg` and ` .jpg ` all become `jpg`.
fn normalize_extension(ext: &str) -> Option<String> {
    let trimmed = ext.trim().trim_start_matches('.');
    (!trimmed.is_empty()).then(|| trimmed.to_ascii_lowercase())
}

pub(crate) fn expand_tilde(path: &str) -> PathBuf {
    if let Some(stripped) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(stripped);
        }
    }
    PathBuf::from(path)
}

/// Default config location: `~/.config/photo-sorter/config.toml`.
pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("photo-sorter")
        .join("config.toml")
}

/// Jobs that validated, and the ones that were skipped with why.
#[derive(Debug, Default)]
pub struct LoadedJobs {
    pub jobs: Vec<Job>,
    pub skipped: Vec<ConfigError>,
}

/// Read and validate a TOML or JSON job file.
///
/// File-level problems (unreadable, unparsable) are errors. Per-job problems
/// land in [`LoadedJobs::skipped`].
pub fn load_jobs(path: &Path) -> anyhow::Result<LoadedJobs> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Reading config file {}", path.display()))?;
    let is_json = path
        .extension()
        .is_some_and(|e| e.eq_ignore_ascii_case("json"));
    parse_jobs(&text, is_json).with_context(|| format!("Parsing config file {}", path.display()))
}

fn parse_jobs(text: &str, is_json: bool) -> anyhow::Result<LoadedJobs> {
    let file: ConfigFile = if is_json {
        serde_json::from_str(text)?
    } else {
        toml::from_str(text)?
    };

    let mut loaded = LoadedJobs::default();
    for raw in file.jobs {
        match raw.into_job() {
            Ok(job) => loaded.jobs.push(job),
            Err(e) => loaded.skipped.push(e),
        }
    }
    Ok(loaded)
}
