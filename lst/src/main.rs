//! lst - project tool wrapper around the LineScript compiler.
//!
//! Locates sources (optionally via `lst.toml`), finds the `lsc` binary,
//! and dispatches to the matching compiler mode, forwarding exit codes.

mod commands;
mod config;
mod error;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use commands::build::{run_build, BuildArgs};
use commands::check::run_check;
use commands::clean::run_clean;
use commands::run::run_run;
use config::Config;

/// lst - tooling front door for LineScript projects
#[derive(Parser, Debug)]
#[command(name = "lst")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Build, run, and check LineScript projects", long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true, env = "LST_VERBOSE")]
    verbose: bool,

    /// Path to configuration file (default: lst.toml if present)
    #[arg(short, long, global = true, env = "LST_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

/// Available subcommands for the lst CLI.
#[derive(Subcommand, Debug)]
enum Commands {
    /// Compile the project to a native binary
    Build(BuildCommand),

    /// Build and execute, forwarding the program's exit code
    Run(BuildCommand),

    /// Run the compiler front end without producing a binary
    Check(BuildCommand),

    /// Remove build outputs
    Clean {
        /// Output to remove (default: from config)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

/// Arguments shared by build, run, and check.
#[derive(Parser, Debug)]
struct BuildCommand {
    /// Source files (default: discovered in the configured source dir)
    input: Vec<PathBuf>,

    /// Output binary path
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Toolchain driver (clang, gcc, or a path)
    #[arg(long)]
    cc: Option<String>,

    /// Backend selection (auto, c, asm)
    #[arg(long)]
    backend: Option<String>,

    /// Aggressive native optimization (-O4)
    #[arg(long)]
    max_speed: bool,

    /// Keep the generated C file
    #[arg(long)]
    keep_c: bool,
}

impl BuildCommand {
    fn to_args(&self) -> BuildArgs {
        BuildArgs {
            inputs: self.input.clone(),
            output: self.output.clone(),
            cc: self.cc.clone(),
            backend: self.backend.clone(),
            max_speed: self.max_speed,
            keep_c: self.keep_c,
        }
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "warn" };
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(
            EnvFilter::try_from_env("LST_LOG")
                .unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .init();

    let config = match Config::load(cli.config.as_deref()) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("lst: {}", err);
            return ExitCode::from(2);
        }
    };

    let result = match &cli.command {
        Commands::Build(cmd) => run_build(&cmd.to_args(), &config),
        Commands::Run(cmd) => run_run(&cmd.to_args(), &config),
        Commands::Check(cmd) => run_check(&cmd.to_args(), &config),
        Commands::Clean { output } => run_clean(output.clone(), &config),
    };

    match result {
        Ok(code) => ExitCode::from(code.clamp(0, 255) as u8),
        Err(err) => {
            eprintln!("lst: {}", err);
            ExitCode::FAILURE
        }
    }
}
