//! `lst build` - compile the project to a native binary.

use std::path::PathBuf;

use tracing::info;

use crate::commands::common::{collect_sources, find_compiler, run_lsc};
use crate::commands::traits::{Command, CommandDescription};
use crate::config::Config;
use crate::error::Result;

/// Options shared by build-like commands.
#[derive(Debug, Clone, Default)]
pub struct BuildArgs {
    /// Explicit source files; discovered from the source dir when empty
    pub inputs: Vec<PathBuf>,
    pub output: Option<PathBuf>,
    pub cc: Option<String>,
    pub backend: Option<String>,
    pub max_speed: bool,
    pub keep_c: bool,
}

/// Assemble the compiler argument vector for a build-like invocation.
pub fn compiler_args(mode: &str, args: &BuildArgs, config: &Config) -> Result<Vec<String>> {
    let mut out: Vec<String> = Vec::new();

    let inputs = if args.inputs.is_empty() {
        collect_sources(&config.source_dir())?
    } else {
        args.inputs.clone()
    };
    out.extend(inputs.iter().map(|p| p.display().to_string()));
    out.push(mode.to_string());

    if let Some(output) = args.output.as_ref().or(config.output.as_ref()) {
        out.push("-o".to_string());
        out.push(output.display().to_string());
    }
    if let Some(cc) = args.cc.as_ref().or(config.cc.as_ref()) {
        out.push("--cc".to_string());
        out.push(cc.clone());
    }
    if let Some(backend) = &args.backend {
        out.push("--backend".to_string());
        out.push(backend.clone());
    }
    if args.max_speed || config.max_speed.unwrap_or(false) {
        out.push("-O4".to_string());
    }
    if args.keep_c || config.keep_c.unwrap_or(false) {
        out.push("--keep-c".to_string());
    }
    Ok(out)
}

/// The build command: full pipeline to a native binary.
pub struct BuildCommand {
    args: BuildArgs,
    config: Config,
}

impl BuildCommand {
    /// Attach the loaded project configuration.
    pub fn with_config(mut self, config: Config) -> Self {
        self.config = config;
        self
    }

    fn run(&self) -> Result<i32> {
        let compiler = find_compiler()?;
        let compiler_args = compiler_args("--build", &self.args, &self.config)?;
        info!(compiler = %compiler.display(), "starting build");
        run_lsc(&compiler, &compiler_args)
    }
}

impl Command for BuildCommand {
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
        "build"
    }
}

impl CommandDescription for BuildCommand {
    fn description() -> &'static str {
        "Compile the project to a native binary"
    }

    fn help() -> &'static str {
        "Discovers the project's LineScript sources (or takes explicit \
         inputs), locates the lsc compiler, and runs a full build, \
         forwarding the compiler's exit code."
    }
}

/// Run the build command.
pub fn run_build(args: &BuildArgs, config: &Config) -> Result<i32> {
    BuildCommand::new(args.clone())
        .with_config(config.clone())
        .execute()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compiler_args_layout() {
        let args = BuildArgs {
            inputs: vec![PathBuf::from("main.lsc")],
            output: Some(PathBuf::from("app")),
            cc: Some("clang".to_string()),
            backend: Some("c".to_string()),
            max_speed: true,
            keep_c: true,
        };
        let argv = compiler_args("--build", &args, &Config::default()).unwrap();
        assert_eq!(
            argv,
            vec![
                "main.lsc", "--build", "-o", "app", "--cc", "clang", "--backend", "c", "-O4",
                "--keep-c"
            ]
        );
    }

    #[test]
    fn test_config_fills_missing_options() {
        let args = BuildArgs {
            inputs: vec![PathBuf::from("main.lsc")],
            ..BuildArgs::default()
        };
        let config = Config {
            output: Some(PathBuf::from("from-config")),
            cc: Some("gcc".to_string()),
            max_speed: Some(true),
            ..Config::default()
        };
        let argv = compiler_args("--build", &args, &config).unwrap();
        assert!(argv.contains(&"from-config".to_string()));
        assert!(argv.contains(&"gcc".to_string()));
        assert!(argv.contains(&"-O4".to_string()));
    }

    #[test]
    fn test_cli_overrides_config() {
        let args = BuildArgs {
            inputs: vec![PathBuf::from("main.lsc")],
            cc: Some("clang".to_string()),
            ..BuildArgs::default()
        };
        let config = Config {
            cc: Some("gcc".to_string()),
            ..Config::default()
        };
        let argv = compiler_args("--build", &args, &config).unwrap();
        assert!(argv.contains(&"clang".to_string()));
        assert!(!argv.contains(&"gcc".to_string()));
    }

    #[test]
    fn test_command_metadata() {
        assert_eq!(BuildCommand::name(), "build");
        assert!(!BuildCommand::description().is_empty());
        assert!(!BuildCommand::help().is_empty());
    }

    #[test]
    fn test_new_starts_with_default_config() {
        let command = BuildCommand::new(BuildArgs::default());
        assert!(command.config.output.is_none());
        assert!(command.args.inputs.is_empty());
    }
}
