//! Layered configuration: built-in defaults, an optional `.abicheck.toml`
//! discovered by walking up from the working directory, environment
//! variables, then CLI flags — each layer overriding only what it sets.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Deserialize;

pub const CONFIG_FILE: &str = ".abicheck.toml";
pub const ENV_CACHE_DIR: &str = "ABICHECK_CACHE_DIR";
pub const ENV_CASE_DIR: &str = "ABICHECK_CASE_DIR";

/// A sparse configuration overlay: every field absent means "don't override".
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PartialConfig {
    pub cache_dir: Option<PathBuf>,
    pub case_dir: Option<PathBuf>,
    pub max_parallel_processes: Option<usize>,
    pub commits: Option<Vec<String>>,
}

/// The fully resolved configuration the engine consumes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub cache_dir: PathBuf,
    pub case_dir: Option<PathBuf>,
    pub max_parallel_processes: Option<usize>,
    pub commits: Option<Vec<String>>,
}

impl Config {
    pub fn defaults() -> Self {
        Self {
            cache_dir: PathBuf::from(".cache"),
            case_dir: None,
            max_parallel_processes: None,
            commits: None,
        }
    }

    /// Apply an overlay on top of `self`; `other`'s set fields win.
    pub fn apply(mut self, other: PartialConfig) -> Self {
        if let Some(v) = other.cache_dir {
            self.cache_dir = v;
        }
        if let Some(v) = other.case_dir {
            self.case_dir = Some(v);
        }
        if let Some(v) = other.max_parallel_processes {
            self.max_parallel_processes = Some(v);
        }
        if let Some(v) = other.commits {
            self.commits = Some(v);
        }
        self
    }
}

/// Walk up from `start` looking for `.abicheck.toml`.
pub fn discover_config_file(start: &Path) -> Option<PathBuf> {
    let mut dir = Some(start);
    while let Some(d) = dir {
        let candidate = d.join(CONFIG_FILE);
        if candidate.is_file() {
            return Some(candidate);
        }
        dir = d.parent();
    }
    None
}

pub fn load_partial_from_file(path: &Path) -> Result<PartialConfig> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config file {}", path.display()))?;
    toml::from_str(&text).with_context(|| format!("failed to parse config file {}", path.display()))
}

pub fn load_partial_from_env() -> PartialConfig {
    PartialConfig {
        cache_dir: std::env::var(ENV_CACHE_DIR).ok().map(PathBuf::from),
        case_dir: std::env::var(ENV_CASE_DIR).ok().map(PathBuf::from),
        max_parallel_processes: None,
        commits: None,
    }
}

/// Build the fully resolved config: defaults, then a config file (explicit
/// path if given, else discovered by walking up from `start_dir`), then
/// environment variables, then explicit CLI overrides.
pub fn load(start_dir: &Path, explicit_config: Option<&Path>, cli: PartialConfig) -> Result<Config> {
    let mut config = Config::defaults();

    let file = match explicit_config {
        Some(path) => Some(path.to_path_buf()),
        None => discover_config_file(start_dir),
    };
    if let Some(path) = file {
        config = config.apply(load_partial_from_file(&path)?);
    }

    config = config.apply(load_partial_from_env());
    config = config.apply(cli);

    Ok(config)
}
