//! CLI module for quizpool - command-line interface and subcommands.

pub mod commands;

pub use commands::Cli;
