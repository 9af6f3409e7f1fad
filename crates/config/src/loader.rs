use std::path::{Path, PathBuf};

use tracing::debug;

use crate::{env_subst::substitute_env, schema::ClawlinkConfig};

/// Standard config file names, checked in order.
const CONFIG_FILENAMES: &[&str] = &[
    "clawlink.toml",
    "clawlink.yaml",
    "clawlink.yml",
    "clawlink.json",
];

/// Load config from the given path (any supported format).
pub fn load_config(path: &Path) -> anyhow::Result<ClawlinkConfig> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("failed to read {}: {e}", path.display()))?;
    let raw = substitute_env(&raw);
    parse_config(&raw, path)
}

/// Discover and load config from standard locations.
///
/// A missing file yields defaults; a file that fails to parse is an error.
pub fn discover_and_load() -> anyhow::Result<(ClawlinkConfig, Option<PathBuf>)> {
    match find_config_file() {
        Some(path) => {
            debug!(path = %path.display(), "loading config");
            Ok((load_config(&path)?, Some(path)))
        },
        None => {
            debug!("no config file found, using defaults");
            Ok((ClawlinkConfig::default(), None))
        },
    }
}

/// Find the first config file in `./`, then the user config directory.
pub fn find_config_file() -> Option<PathBuf> {
    for name in CONFIG_FILENAMES {
        let p = PathBuf::from(name);
        if p.exists() {
            return Some(p);
        }
    }

    let dir = config_dir()?;
    CONFIG_FILENAMES
        .iter()
        .map(|name| dir.join(name))
        .find(|p| p.exists())
}

/// Returns the user-global config directory (`~/.config/clawlink/`).
pub fn config_dir() -> Option<PathBuf> {
    directories::ProjectDirs::from("", "", "clawlink").map(|d| d.config_dir().to_path_buf())
}

/// Returns the user data directory used as the default state dir.
pub fn data_dir() -> Option<PathBuf> {
    directories::ProjectDirs::from("", "", "clawlink").map(|d| d.data_dir().to_path_buf())
}

fn parse_config(raw: &str, path: &Path) -> anyhow::Result<ClawlinkConfig> {
    let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("toml");

    match ext {
        "toml" => Ok(toml::from_str(raw)?),
        "yaml" | "yml" => Ok(serde_yaml::from_str(raw)?),
        "json" => Ok(serde_json::from_str(raw)?),
        _ => anyhow::bail!("unsupported config format: .{ext}"),
    }
}
