use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::{Error, Result, schema::ManagerConfig};

/// Standard config file names, checked in order.
const CONFIG_FILENAMES: &[&str] = &["iitcm.toml", "iitcm.yaml", "iitcm.yml", "iitcm.json"];

/// Load config from the given path (any supported format).
pub fn load_config(path: &Path) -> Result<ManagerConfig> {
    let raw = std::fs::read_to_string(path)?;
    parse_config(&raw, path)
}

/// Discover and load config from standard locations.
///
/// Search order:
/// 1. `./iitcm.{toml,yaml,yml,json}` (project-local)
/// 2. `<user config dir>/iitcm.{toml,yaml,yml,json}` (user-global)
///
/// Returns `ManagerConfig::default()` if no config file is found or the one
/// found cannot be parsed.
pub fn discover_and_load() -> ManagerConfig {
    let Some(path) = find_config_file() else {
        debug!("no config file found, using defaults");
        return ManagerConfig::default();
    };
    debug!(path = %path.display(), "loading config");
    match load_config(&path) {
        Ok(cfg) => cfg,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "failed to load config, using defaults");
            ManagerConfig::default()
        },
    }
}

fn find_config_file() -> Option<PathBuf> {
    let local = CONFIG_FILENAMES
        .iter()
        .map(PathBuf::from)
        .find(|p| p.exists());
    if local.is_some() {
        return local;
    }

    let dir = config_dir()?;
    CONFIG_FILENAMES
        .iter()
        .map(|name| dir.join(name))
        .find(|p| p.exists())
}

/// Returns the user-global config directory (e.g. `~/.config/iitcm/`).
pub fn config_dir() -> Option<PathBuf> {
    directories::ProjectDirs::from("", "", "iitcm").map(|d| d.config_dir().to_path_buf())
}

/// Returns the user-global data directory, where the default store lives.
pub fn data_dir() -> PathBuf {
    directories::ProjectDirs::from("", "", "iitcm")
        .map(|d| d.data_dir().to_path_buf())
        .unwrap_or_else(|| PathBuf::from(".iitcm"))
}

fn parse_config(raw: &str, path: &Path) -> Result<ManagerConfig> {
    let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("toml");

    match ext {
        "toml" => Ok(toml::from_str(raw)?),
        "yaml" | "yml" => Ok(serde_yaml::from_str(raw)?),
        "json" => Ok(serde_json::from_str(raw)?),
        other => Err(Error::UnsupportedFormat {
            extension: other.to_string(),
        }),
    }
}
