//! Error types for configuration loading and validation.

/// Errors raised while resolving or validating a [`SearchConfig`](crate::config::SearchConfig).
///
/// Every variant names the offending field so a failed startup points straight at the
/// option that needs fixing.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid value for '{field}': {message}")]
    Invalid { field: String, message: String },

    #[error("Missing required field: {field}")]
    MissingField { field: String },

    #[error("Unsupported value '{value}' for '{field}'")]
    Unsupported { field: String, value: String },

    #[error("Configuration parse error: {message}")]
    Parse { message: String },
}

impl ConfigError {
    pub fn invalid(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Invalid {
            field: field.into(),
            message: message.into(),
        }
    }

    pub fn missing(field: impl Into<String>) -> Self {
        Self::MissingField {
            field: field.into(),
        }
    }

    pub fn unsupported(field: impl Into<String>, value: impl Into<String>) -> Self {
        Self::Unsupported {
            field: field.into(),
            value: value.into(),
        }
    }
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        Self::Parse {
            message: err.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, ConfigError>;
