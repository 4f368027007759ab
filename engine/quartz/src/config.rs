//! Optional configuration file.
//!
//! A `quartz.toml` next to the binary (or named by `QUARTZ_CONFIG`) can
//! pre-seed UCI options before the GUI speaks; `QUARTZ_OPT_*`
//! environment variables override both. GUIs still win: anything set
//! here behaves exactly as if a `setoption` arrived first.

use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Locations searched for the config file, in order.
const CONFIG_SEARCH_PATHS: &[&str] = &["quartz.toml", "../quartz.toml"];

#[derive(Debug, Default, Deserialize)]
pub struct FileConfig {
    /// UCI option presets, e.g. `Threads = "4"`.
    #[serde(default)]
    pub options: BTreeMap<String, String>,
}

/// Load presets: explicit path, then `QUARTZ_CONFIG`, then the search
/// list, then built-in defaults. Parse failures warn and fall back to
/// defaults rather than aborting; a missing explicit file is a hard
/// error surfaced by the caller.
pub fn load(explicit: Option<&Path>) -> anyhow::Result<FileConfig> {
    if let Some(path) = explicit {
        let content = std::fs::read_to_string(path)?;
        let config = toml::from_str(&content)?;
        info!(path = %path.display(), "loaded config");
        return Ok(apply_env_overrides(config));
    }

    if let Ok(path) = std::env::var("QUARTZ_CONFIG") {
        let path = PathBuf::from(&path);
        if path.exists() {
            return match std::fs::read_to_string(&path) {
                Ok(content) => match toml::from_str(&content) {
                    Ok(config) => {
                        info!(path = %path.display(), "loaded config");
                        Ok(apply_env_overrides(config))
                    }
                    Err(e) => {
                        warn!(path = %path.display(), error = %e, "bad config, using defaults");
                        Ok(apply_env_overrides(FileConfig::default()))
                    }
                },
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "unreadable config, using defaults");
                    Ok(apply_env_overrides(FileConfig::default()))
                }
            };
        }
        warn!(path = %path.display(), "QUARTZ_CONFIG not found, searching defaults");
    }

    for candidate in CONFIG_SEARCH_PATHS {
        let path = Path::new(candidate);
        if path.exists() {
            if let Ok(content) = std::fs::read_to_string(path) {
                match toml::from_str(&content) {
                    Ok(config) => {
                        info!(path = candidate, "loaded config");
                        return Ok(apply_env_overrides(config));
                    }
                    Err(e) => {
                        warn!(path = candidate, error = %e, "bad config, using defaults")
                    }
                }
            }
        }
    }

    debug!("no config file, using built-in defaults");
    Ok(apply_env_overrides(FileConfig::default()))
}

/// `QUARTZ_OPT_<NAME>=<value>` overrides an option preset; names match
/// case-insensitively, so `QUARTZ_OPT_THREADS=4` sets `Threads`.
fn apply_env_overrides(mut config: FileConfig) -> FileConfig {
    for (key, value) in std::env::vars() {
        if let Some(name) = key.strip_prefix("QUARTZ_OPT_") {
            config.options.insert(name.to_string(), value);
        }
    }
    config
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn explicit_file_parses_options() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("quartz.toml");
        let mut f = std::fs::File::create(&path).unwrap();
        writeln!(f, "[options]\nThreads = \"4\"\nBackend = \"random\"").unwrap();

        let config = load(Some(&path)).unwrap();
        assert_eq!(config.options.get("Threads").map(String::as_str), Some("4"));
        assert_eq!(
            config.options.get("Backend").map(String::as_str),
            Some("random")
        );
    }

    #[test]
    fn missing_explicit_file_is_an_error() {
        assert!(load(Some(Path::new("/no/such/quartz.toml"))).is_err());
    }

    #[test]
    fn bad_explicit_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("quartz.toml");
        std::fs::write(&path, "not [valid toml").unwrap();
        assert!(load(Some(&path)).is_err());
    }
}
