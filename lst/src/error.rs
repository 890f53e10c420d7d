//! Error handling for the lst CLI.
//!
//! Structured errors via `thiserror`; commands surface them through the
//! shared [`Result`] alias.

use std::path::PathBuf;

use thiserror::Error;

/// Main error type for the lst CLI.
#[derive(Error, Debug)]
pub enum LstError {
    /// Configuration file problems.
    #[error("configuration error: {0}")]
    Config(String),

    /// The `lsc` compiler binary could not be located.
    #[error("compiler not found: {0}")]
    CompilerNotFound(String),

    /// No sources were found where the command expected them.
    #[error("no LineScript sources found in `{0}`")]
    NoSources(PathBuf),

    /// Error when IO operations fail.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Error when parsing a TOML configuration file fails.
    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),
}

/// Result type alias using LstError.
pub type Result<T> = std::result::Result<T, LstError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = LstError::Config("missing field".to_string());
        assert_eq!(err.to_string(), "configuration error: missing field");
    }

    #[test]
    fn test_io_error_converts() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let err: LstError = io.into();
        assert!(err.to_string().contains("gone"));
    }
}
