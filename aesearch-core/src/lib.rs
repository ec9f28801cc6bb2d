//! # aesearch-core
//!
//! Configuration and persistence primitives shared by the search library and the CLI.

pub mod config;
pub mod error;
pub mod persistence;

pub use config::{
    ConfigOverrides, DataConfig, Device, ModelClass, ModelType, SearchConfig, SearchStage,
    SessionConfig, StageDefaults, load_config,
};
pub use error::ConfigError;
