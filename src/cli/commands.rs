//! CLI command definitions using clap.
//!
//! - run: start the scheduler loop (default)
//! - evaluate: show one user's pool stats and refill decision
//! - plan: plan one user's daily assignments
//! - config: print the effective configuration

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Quizpool - keeps learners' question pools stocked and their days planned
#[derive(Parser, Debug)]
#[command(name = "quizpool")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Optional config file path
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Option<Commands>,
}

impl Cli {
    pub fn is_verbose(&self) -> bool {
        self.verbose
    }
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Commands {
    /// Run the scheduler until interrupted
    Run {
        /// Start with dispatch paused
        #[arg(long)]
        paused: bool,
    },

    /// Show pool stats and the refill decision for a user
    Evaluate {
        /// User id
        #[arg(short, long)]
        user: i64,
    },

    /// Plan daily assignments for a user
    Plan {
        /// User id
        #[arg(short, long)]
        user: i64,

        /// Days to plan, defaults to daily.daily_horizon_days
        #[arg(short, long)]
        days: Option<u32>,
    },

    /// Print the effective configuration as YAML
    Config,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_parse_no_args() {
        let cli = Cli::try_parse_from(["quizpool"]).unwrap();
        assert!(cli.command.is_none());
        assert!(!cli.verbose);
        assert!(cli.config.is_none());
    }

    #[test]
    fn test_cli_global_flags() {
        let cli = Cli::try_parse_from(["quizpool", "-v", "-c", "/etc/quizpool.yml", "config"]).unwrap();
        assert!(cli.is_verbose());
        assert_eq!(cli.config.as_ref(), Some(&PathBuf::from("/etc/quizpool.yml")));
        assert_eq!(cli.command, Some(Commands::Config));
    }

    #[test]
    fn test_run_paused() {
        let cli = Cli::try_parse_from(["quizpool", "run", "--paused"]).unwrap();
        assert_eq!(cli.command, Some(Commands::Run { paused: true }));
    }

    #[test]
    fn test_evaluate_requires_user() {
        assert!(Cli::try_parse_from(["quizpool", "evaluate"]).is_err());
        let cli = Cli::try_parse_from(["quizpool", "evaluate", "--user", "42"]).unwrap();
        assert_eq!(cli.command, Some(Commands::Evaluate { user: 42 }));
    }

    #[test]
    fn test_plan_days_optional() {
        let cli = Cli::try_parse_from(["quizpool", "plan", "-u", "7"]).unwrap();
        assert_eq!(cli.command, Some(Commands::Plan { user: 7, days: None }));

        let cli = Cli::try_parse_from(["quizpool", "plan", "-u", "7", "-d", "3"]).unwrap();
        assert_eq!(cli.command, Some(Commands::Plan { user: 7, days: Some(3) }));
    }

    #[test]
    fn test_help_works() {
        Cli::command().debug_assert();
    }
}
