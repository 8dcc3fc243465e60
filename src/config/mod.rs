// src/config/mod.rs

//! Configuration loading and validation for warden.
//!
//! Responsibilities:
//! - Define the TOML-backed data model (`model.rs`).
//! - Load a config file from disk (`loader.rs`).
//! - Validate threshold ordering and interval sanity (`validate.rs`).
//!
//! Only resolved numbers and booleans reach the core components; where they
//! came from is the loader's business.

pub mod loader;
pub mod model;
pub mod validate;

pub use loader::{default_config_path, load_and_validate, load_from_path, load_or_default};
pub use model::{
    BreakerConfig, CheckpointConfig, ConfigFile, DelayConfig, EngineConfig, HeartbeatConfig,
    RawConfigFile, SchedulerConfig, StorageConfig,
};
