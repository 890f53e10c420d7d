//! Command traits for the lst CLI.
//!
//! This module defines the standard command traits that all commands
//! implement to ensure consistent structure across the application. The
//! clap-derive layer stays responsible for argument parsing and inline
//! help; these traits shape the execution side.

#![allow(dead_code)]

use crate::error::Result;

/// Standard command trait that all lst commands implement.
///
/// # Type Parameters
/// * `Args` - The arguments type for this command
/// * `Output` - The output type returned by this command
pub trait Command {
    /// The arguments type for this command.
    type Args;

    /// The output type returned by this command.
    type Output;

    /// Create a new command instance with the given arguments.
    ///
    /// The project configuration starts at its default; callers attach a
    /// loaded `lst.toml` through the command's `with_config` builder.
    fn new(args: Self::Args) -> Self;

    /// Execute the command.
    fn execute(&self) -> Result<Self::Output>;

    /// Get the command name.
    fn name() -> &'static str;
}

/// Trait for providing command descriptions and help text.
///
/// This trait allows commands to provide human-readable descriptions
/// and detailed help information for CLI documentation.
pub trait CommandDescription {
    /// Get a short description of the command.
    fn description() -> &'static str;

    /// Get detailed help text for the command.
    fn help() -> &'static str;
}
