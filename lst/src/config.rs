//! Project configuration (`lst.toml`).
//!
//! Everything is optional; command-line arguments win over the file.

use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::{LstError, Result};

/// Parsed `lst.toml`.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Directory scanned for `.lsc` / `.ls` sources (default: `.`)
    pub source_dir: Option<PathBuf>,
    /// Output binary path passed to the compiler as `-o`
    pub output: Option<PathBuf>,
    /// Toolchain driver forwarded as `--cc`
    pub cc: Option<String>,
    /// Build with `-O4`
    pub max_speed: Option<bool>,
    /// Keep the generated C file next to the output
    pub keep_c: Option<bool>,
}

impl Config {
    /// Load a config file. An explicit path must exist; the default
    /// `lst.toml` is optional.
    pub fn load(explicit: Option<&Path>) -> Result<Config> {
        let (path, required) = match explicit {
            Some(path) => (path.to_path_buf(), true),
            None => (PathBuf::from("lst.toml"), false),
        };
        if !path.exists() {
            if required {
                return Err(LstError::Config(format!(
                    "config file `{}` does not exist",
                    path.display()
                )));
            }
            return Ok(Config::default());
        }
        let content = std::fs::read_to_string(&path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }

    pub fn source_dir(&self) -> PathBuf {
        self.source_dir.clone().unwrap_or_else(|| PathBuf::from("."))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_missing_default_config_is_empty() {
        let config = Config::load(None).unwrap();
        let _ = config;
    }

    #[test]
    fn test_missing_explicit_config_errors() {
        let result = Config::load(Some(Path::new("/definitely/not/here/lst.toml")));
        assert!(result.is_err());
    }

    #[test]
    fn test_parse_full_config() {
        let mut file = tempfile::Builder::new()
            .suffix(".toml")
            .tempfile()
            .unwrap();
        writeln!(
            file,
            "source_dir = \"src\"\noutput = \"game\"\ncc = \"clang\"\nmax_speed = true\nkeep_c = false\n"
        )
        .unwrap();
        let config = Config::load(Some(file.path())).unwrap();
        assert_eq!(config.source_dir(), PathBuf::from("src"));
        assert_eq!(config.output, Some(PathBuf::from("game")));
        assert_eq!(config.cc.as_deref(), Some("clang"));
        assert_eq!(config.max_speed, Some(true));
        assert_eq!(config.keep_c, Some(false));
    }

    #[test]
    fn test_unknown_fields_rejected() {
        let mut file = tempfile::Builder::new()
            .suffix(".toml")
            .tempfile()
            .unwrap();
        writeln!(file, "mystery = 1").unwrap();
        assert!(Config::load(Some(file.path())).is_err());
    }
}
