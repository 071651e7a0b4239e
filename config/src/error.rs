//! Error types for domain configuration

use std::path::PathBuf;
use thiserror::Error;

/// Configuration errors
///
/// Everything raised while building a [`crate::Domain`] is fatal: there is no
/// partially configured domain.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("Missing file: {0}")]
    MissingFile(PathBuf),

    #[error("Configuration failure: {0}")]
    Failure(String),

    #[error("{path}:{line}: {message}")]
    Malformed {
        path: PathBuf,
        line: usize,
        message: String,
    },

    #[error("Invalid package atom: {0}")]
    InvalidAtom(String),

    #[error("Invalid version: {0}")]
    InvalidVersion(String),

    #[error("Invalid USE flag: {0}")]
    InvalidUseFlag(String),

    #[error("Invalid keyword: {0}")]
    InvalidKeyword(String),

    #[error("Invalid license: {0}")]
    InvalidLicense(String),

    #[error("Profile not found: {0}")]
    ProfileNotFound(String),

    #[error("Circular profile inheritance: {0}")]
    CircularProfile(String),

    #[error("Invalid glob pattern: {0}")]
    InvalidGlob(String),

    #[error("Regex error: {0}")]
    Regex(#[from] regex::Error),
}

impl ConfigError {
    /// Shorthand for a generic configuration failure
    pub fn failure(message: impl Into<String>) -> Self {
        ConfigError::Failure(message.into())
    }

    /// Attach file and line context to a parse error
    ///
    /// I/O errors and errors that already carry a location pass through untouched.
    pub fn at(self, path: impl Into<PathBuf>, line: usize) -> Self {
        match self {
            e @ (ConfigError::Io(_) | ConfigError::MissingFile(_) | ConfigError::Malformed { .. }) => e,
            other => ConfigError::Malformed {
                path: path.into(),
                line,
                message: other.to_string(),
            },
        }
    }
}

/// Result type alias for configuration operations
pub type Result<T> = std::result::Result<T, ConfigError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_at_wraps_parse_errors() {
        let err = ConfigError::InvalidAtom("bogus".to_string()).at("/etc/portage/package.mask", 3);
        match err {
            ConfigError::Malformed { path, line, message } => {
                assert_eq!(path, PathBuf::from("/etc/portage/package.mask"));
                assert_eq!(line, 3);
                assert!(message.contains("bogus"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_at_keeps_missing_file() {
        let err = ConfigError::MissingFile(PathBuf::from("/nope")).at("/other", 1);
        assert!(matches!(err, ConfigError::MissingFile(_)));
    }
}
