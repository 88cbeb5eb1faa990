use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_MODEL: &str = "gemini-2.5-flash";
pub const DEFAULT_TIMEOUT_SECS: u64 = 60;

/// Where audit history is kept.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HistoryLocation {
    /// Local-only mode: nothing is persisted.
    Disabled,
    Path(PathBuf),
}

#[derive(Debug, Clone)]
pub struct Config {
    pub gemini_api_key: Option<String>,
    pub openai_api_key: Option<String>,
    pub model: String,
    pub request_timeout: Duration,
    pub history: HistoryLocation,
    pub identity: Option<String>,
    pub data_dir: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        let data_dir = default_data_dir();
        Self {
            gemini_api_key: None,
            openai_api_key: None,
            model: DEFAULT_MODEL.to_string(),
            request_timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            history: HistoryLocation::Path(data_dir.join("history.db")),
            identity: None,
            data_dir,
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok(), default_data_dir())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>, data_dir: PathBuf) -> Result<Self> {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let request_timeout = match non_empty("GHOSTBUSTER_TIMEOUT_SECS") {
            Some(raw) => Duration::from_secs(
                raw.trim()
                    .parse::<u64>()
                    .with_context(|| format!("GHOSTBUSTER_TIMEOUT_SECS must be a whole number of seconds, got '{}'", raw))?,
            ),
            None => Duration::from_secs(DEFAULT_TIMEOUT_SECS),
        };

        let history = match non_empty("GHOSTBUSTER_HISTORY") {
            Some(raw) => parse_history_location(&raw),
            None => HistoryLocation::Path(data_dir.join("history.db")),
        };

        Ok(Self {
            gemini_api_key: non_empty("GEMINI_API_KEY").or_else(|| non_empty("API_KEY")),
            openai_api_key: non_empty("OPENAI_API_KEY"),
            model: non_empty("GHOSTBUSTER_MODEL").unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            request_timeout,
            history,
            identity: non_empty("GHOSTBUSTER_IDENTITY"),
            data_dir,
        })
    }

    pub fn log_path(&self) -> PathBuf {
        self.data_dir.join("ghostbuster.log")
    }

    /// The anonymous identity that namespaces history. Generated on first use
    /// and kept in the data directory so it survives restarts.
    pub fn resolve_identity(&self) -> Result<String> {
        if let Some(identity) = &self.identity {
            return Ok(identity.clone());
        }
        load_or_create_identity(&self.data_dir.join("identity"))
    }
}

pub fn parse_history_location(raw: &str) -> HistoryLocation {
    match raw.trim().to_lowercase().as_str() {
        "off" | "none" | "disabled" | "false" | "0" => HistoryLocation::Disabled,
        _ => HistoryLocation::Path(PathBuf::from(raw.trim())),
    }
}

pub fn default_data_dir() -> PathBuf {
    if let Some(proj_dirs) = directories::ProjectDirs::from("", "", "ghostbuster") {
        proj_dirs.data_dir().to_path_buf()
    } else {
        PathBuf::from(".")
    }
}

fn load_or_create_identity(path: &Path) -> Result<String> {
    if path.exists() {
        let existing = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read identity file: {}", path.display()))?;
        let existing = existing.trim();
        if !existing.is_empty() {
            return Ok(existing.to_string());
        }
    }

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let identity = uuid::Uuid::new_v4().to_string();
    std::fs::write(path, &identity)
        .with_context(|| format!("Failed to write identity file: {}", path.display()))?;
    Ok(identity)
}
