// src/config/loader.rs

use std::fs;
use std::path::{Path, PathBuf};

use crate::config::model::{PipelineConfig, RawPipelineConfig};
use crate::errors::Result;

/// Load a configuration file from a given path and return the raw
/// `RawPipelineConfig`.
///
/// This only performs TOML deserialization; it does **not** perform semantic
/// validation (ranges, enumerations, conditional requirements). Use
/// [`load_and_validate`] for that.
pub fn load_from_path(path: impl AsRef<Path>) -> Result<RawPipelineConfig> {
    let path = path.as_ref();
    let contents = fs::read_to_string(path)?;

    let config: RawPipelineConfig = toml::from_str(&contents)?;

    Ok(config)
}

/// Load a configuration file from path and run full validation.
///
/// This is the entry point the rest of the application uses:
///
/// - Reads TOML.
/// - Applies defaults (handled by `serde` + `Default` impls).
/// - Checks ranges, 0/1 switches, enumerated options, and conditional
///   requirements (e.g. `[data]` keys when `READ_MDOC = 0`).
pub fn load_and_validate(path: impl AsRef<Path>) -> Result<PipelineConfig> {
    let raw = load_from_path(&path)?;
    let config = PipelineConfig::try_from(raw)?;
    Ok(config)
}

/// Helper to resolve a default config path.
///
/// Currently this just returns `Cryopipe.toml` in the current working
/// directory; kept as a function so an env var or multi-location lookup can
/// slot in later.
pub fn default_config_path() -> PathBuf {
    PathBuf::from("Cryopipe.toml")
}
