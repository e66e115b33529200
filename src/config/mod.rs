// src/config/mod.rs

//! Configuration loading and validation for cryopipe.
//!
//! Responsibilities:
//! - Define the TOML-backed data model (`model.rs`).
//! - Load a config file from disk (`loader.rs`).
//! - Validate ranges, switches, and enumerated options into the immutable
//!   [`PipelineConfig`] (`validate.rs`).

pub mod loader;
pub mod model;
pub mod validate;

pub use loader::{default_config_path, load_and_validate, load_from_path};
pub use model::{
    AcquisitionSoftware, DuplicatePolicy, OrchestratorConfig, PipelineConfig,
    RawPipelineConfig, ReconstructMethod, TrackMethod,
};
