pub mod error;

pub use error::*;

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Environment variable naming the config file directly
pub const CONFIG_PATH_ENV: &str = "STACKFLOW_CONFIG_PATH";

/// File names looked up in the current directory, in priority order
const LOCAL_CANDIDATES: &[&str] = &[".stackflow.yaml", "stackflow.yaml"];

/// Defaults shared by every command; CLI flags override them
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Settings {
    /// Stack to operate on when `--stack` is not given
    pub stack: Option<String>,
    pub region: Option<String>,
    pub profile: Option<String>,

    /// Where destroy writes its bucket deletion script
    pub script_dir: Option<PathBuf>,

    /// Suffix of the companion services stack (`<stack>-<suffix>`)
    pub companion_stack_suffix: Option<String>,
}

impl Settings {
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::parse(&content, path)
    }

    fn parse(content: &str, path: &Path) -> Result<Self> {
        // an empty file is a valid, empty config
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }
}

/// Stackflow's global config directory
pub fn get_config_dir() -> Result<PathBuf> {
    Ok(dirs::config_dir()
        .ok_or(ConfigError::ConfigDirNotFound)?
        .join("stackflow"))
}

/// Find the config file
///
/// Search order:
/// 1. `STACKFLOW_CONFIG_PATH` (must exist when set)
/// 2. current directory: `.stackflow.yaml`, `stackflow.yaml`
/// 3. `<config_dir>/stackflow/config.yaml`
///
/// Returns `None` when no file exists anywhere.
pub fn find_config_file() -> Result<Option<PathBuf>> {
    if let Ok(config_path) = std::env::var(CONFIG_PATH_ENV) {
        let path = PathBuf::from(config_path);
        if path.exists() {
            return Ok(Some(path));
        }
        return Err(ConfigError::ExplicitPathMissing(path));
    }

    let current_dir = std::env::current_dir()?;
    for filename in LOCAL_CANDIDATES {
        let path = current_dir.join(filename);
        if path.exists() {
            return Ok(Some(path));
        }
    }

    if let Ok(config_dir) = get_config_dir() {
        let global_config = config_dir.join("config.yaml");
        if global_config.exists() {
            return Ok(Some(global_config));
        }
    }

    Ok(None)
}

/// Load settings from the discovered file, or defaults if there is none
pub fn load_settings() -> Result<Settings> {
    match find_config_file()? {
        Some(path) => {
            tracing::debug!(path = %path.display(), "loading config");
            Settings::from_file(&path)
        }
        None => {
            tracing::debug!("no config file found, using defaults");
            Ok(Settings::default())
        }
    }
}
