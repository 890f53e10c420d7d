//! `lst run` - build and execute, forwarding the program's exit code.

use crate::commands::build::{compiler_args, BuildArgs};
use crate::commands::common::{find_compiler, run_lsc};
use crate::commands::traits::{Command, CommandDescription};
use crate::config::Config;
use crate::error::Result;

/// The run command: build, then execute the resulting binary.
pub struct RunCommand {
    args: BuildArgs,
    config: Config,
}

impl RunCommand {
    /// Attach the loaded project configuration.
    pub fn with_config(mut self, config: Config) -> Self {
        self.config = config;
        self
    }

    fn run(&self) -> Result<i32> {
        let compiler = find_compiler()?;
        let compiler_args = compiler_args("--run", &self.args, &self.config)?;
        run_lsc(&compiler, &compiler_args)
    }
}

impl Command for RunCommand {
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
        "run"
    }
}

impl CommandDescription for RunCommand {
    fn description() -> &'static str {
        "Build and execute, forwarding the program's exit code"
    }

    fn help() -> &'static str {
        "Runs a full build and then launches the produced binary; the \
         program's own exit code becomes lst's exit code."
    }
}

/// Run the run command.
pub fn run_run(args: &BuildArgs, config: &Config) -> Result<i32> {
    RunCommand::new(args.clone())
        .with_config(config.clone())
        .execute()
}
