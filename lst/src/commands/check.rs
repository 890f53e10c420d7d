//! `lst check` - front-end and optimizer only, no binary.

use crate::commands::build::{compiler_args, BuildArgs};
use crate::commands::common::{find_compiler, run_lsc};
use crate::commands::traits::{Command, CommandDescription};
use crate::config::Config;
use crate::error::Result;

/// The check command: diagnostics without producing a binary.
pub struct CheckCommand {
    args: BuildArgs,
    config: Config,
}

impl CheckCommand {
    /// Attach the loaded project configuration.
    pub fn with_config(mut self, config: Config) -> Self {
        self.config = config;
        self
    }

    fn run(&self) -> Result<i32> {
        let compiler = find_compiler()?;
        let compiler_args = compiler_args("--check", &self.args, &self.config)?;
        run_lsc(&compiler, &compiler_args)
    }
}

impl Command for CheckCommand {
    type Args = BuildArgs;
    type Output = i32;

    fn new(args: Self::Args) -> Self {
        Self {
            args,
            config: Config::default(),
        }
    }

    fn execute(&self) -> Result<Self::Output> {
        self.run()
    }

    fn name() -> &'static str {
        "check"
    }
}

impl CommandDescription for CheckCommand {
    fn description() -> &'static str {
        "Run the compiler front end without producing a binary"
    }

    fn help() -> &'static str {
        "Lexes, parses, analyzes, and optimizes the project sources, \
         reporting diagnostics without invoking a native toolchain."
    }
}

/// Run the check command.
pub fn run_check(args: &BuildArgs, config: &Config) -> Result<i32> {
    CheckCommand::new(args.clone())
        .with_config(config.clone())
        .execute()
}
