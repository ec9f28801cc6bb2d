//! Error types for the aesearch-ml crate.

use aesearch_core::ConfigError;
use std::path::PathBuf;
use thiserror::Error;

/// Top-level error type for model construction and search operations.
#[derive(Debug, Error)]
pub enum MlError {
    /// Malformed descriptor; raised before any tensor work begins.
    #[error("Invalid architecture: {0}")]
    InvalidArchitecture(String),

    /// A later stage could not find what an earlier stage should have produced.
    #[error("Missing upstream artifact at {}: {reason}", path.display())]
    MissingUpstreamArtifact { path: PathBuf, reason: String },

    #[error("No completed runs in {}", dir.display())]
    NoCompletedRuns { dir: PathBuf },

    #[error("Resource limit exceeded: {0}")]
    ResourceLimit(String),

    #[error("Shape error: {0}")]
    Shape(String),

    #[error("Training error: {0}")]
    Training(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

impl MlError {
    pub fn invalid_architecture(msg: impl Into<String>) -> Self {
        Self::InvalidArchitecture(msg.into())
    }

    pub fn missing_upstream(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::MissingUpstreamArtifact {
            path: path.into(),
            reason: reason.into(),
        }
    }

    pub fn shape(msg: impl Into<String>) -> Self {
        Self::Shape(msg.into())
    }

    pub fn training(msg: impl Into<String>) -> Self {
        Self::Training(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }
}

impl From<ndarray::ShapeError> for MlError {
    fn from(err: ndarray::ShapeError) -> Self {
        Self::Shape(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, MlError>;
