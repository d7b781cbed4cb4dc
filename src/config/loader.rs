// src/config/loader.rs

use std::fs;
use std::path::{Path, PathBuf};

use crate::config::model::{KernelConfig, RawConfigFile};
use crate::errors::Result;

/// Load a configuration file from a given path and return the raw
/// `RawConfigFile`.
///
/// This only performs TOML deserialization; it does **not** perform semantic
/// validation. Use [`load_and_validate`] for that.
pub fn load_from_path(path: impl AsRef<Path>) -> Result<RawConfigFile> {
    let contents = fs::read_to_string(path.as_ref())?;
    let config: RawConfigFile = toml::from_str(&contents)?;
    Ok(config)
}

/// Load a configuration file from path and validate it.
///
/// This is the recommended entry point for the rest of the application:
///
/// - Reads TOML.
/// - Applies defaults (handled by `serde` + `Default` impls).
/// - Parses durations and checks executors, task references and that the
///   task graph has no cycles.
pub fn load_and_validate(path: impl AsRef<Path>) -> Result<KernelConfig> {
    let raw = load_from_path(path)?;
    KernelConfig::try_from(raw)
}

/// [`load_and_validate`] for a config held in memory.
pub fn parse_and_validate(contents: &str) -> Result<KernelConfig> {
    let raw: RawConfigFile = toml::from_str(contents)?;
    KernelConfig::try_from(raw)
}

/// Config file used when `--config` is not given.
pub fn default_config_path() -> PathBuf {
    PathBuf::from("dagkernel.toml")
}
