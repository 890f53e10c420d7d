//! `lst clean` - remove build outputs.

use std::path::PathBuf;

use tracing::info;

use crate::commands::traits::{Command, CommandDescription};
use crate::config::Config;
use crate::error::Result;

/// The clean command: delete the output binary and its intermediates.
pub struct CleanCommand {
    output: Option<PathBuf>,
    config: Config,
}

impl CleanCommand {
    /// Attach the loaded project configuration.
    pub fn with_config(mut self, config: Config) -> Self {
        self.config = config;
        self
    }

    fn run(&self) -> Result<i32> {
        let Some(output) = self
            .output
            .clone()
            .or_else(|| self.config.output.clone())
        else {
            info!("nothing to clean: no output configured");
            return Ok(0);
        };
        for path in [
            output.clone(),
            output.with_extension("c"),
            output.with_extension("s"),
            output.with_extension("exe"),
        ] {
            if path.exists() {
                std::fs::remove_file(&path)?;
                info!("removed {}", path.display());
            }
        }
        Ok(0)
    }
}

impl Command for CleanCommand {
    type Args = Option<PathBuf>;
    type Output = i32;

    fn new(args: Self::Args) -> Self {
        Self {
            output: args,
            config: Config::default(),
        }
    }

    fn execute(&self) -> Result<Self::Output> {
        self.run()
    }

    fn name() -> &'static str {
        "clean"
    }
}

impl CommandDescription for CleanCommand {
    fn description() -> &'static str {
        "Remove build outputs"
    }

    fn help() -> &'static str {
        "Deletes the configured output binary and any generated C or \
         assembly intermediates left next to it."
    }
}

/// Run the clean command.
pub fn run_clean(output: Option<PathBuf>, config: &Config) -> Result<i32> {
    CleanCommand::new(output)
        .with_config(config.clone())
        .execute()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clean_removes_binary_and_intermediates() {
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("app");
        std::fs::write(&output, "x").unwrap();
        std::fs::write(output.with_extension("c"), "y").unwrap();
        let code = run_clean(Some(output.clone()), &Config::default()).unwrap();
        assert_eq!(code, 0);
        assert!(!output.exists());
        assert!(!output.with_extension("c").exists());
    }

    #[test]
    fn test_clean_without_output_is_noop() {
        let code = run_clean(None, &Config::default()).unwrap();
        assert_eq!(code, 0);
    }

    #[test]
    fn test_clean_uses_configured_output() {
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("from-config");
        std::fs::write(&output, "x").unwrap();
        let config = Config {
            output: Some(output.clone()),
            ..Config::default()
        };
        let code = run_clean(None, &config).unwrap();
        assert_eq!(code, 0);
        assert!(!output.exists());
    }

    #[test]
    fn test_command_metadata() {
        assert_eq!(CleanCommand::name(), "clean");
        assert!(!CleanCommand::description().is_empty());
    }
}
