//! CLI definition and command handling

pub mod commands;
pub mod output;

use clap::{Parser, Subcommand};

use commands::{CacheCommand, GraphCommand, InitCommand, RunCommand};

/// Gantry - Monorepo task runner
#[derive(Debug, Parser)]
#[command(name = "gantry")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Suppress output except errors
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Output format
    #[arg(long, global = true, default_value = "text")]
    pub format: OutputFormat,

    /// Working directory
    #[arg(short = 'C', long, global = true)]
    pub directory: Option<std::path::PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

/// Output format for CLI
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text output
    #[default]
    Text,
    /// JSON output
    Json,
}

/// Available commands
#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Run tasks across the workspaces
    Run(RunCommand),

    /// Show the execution plan for tasks
    Graph(GraphCommand),

    /// Task cache management
    Cache(CacheCommand),

    /// Create a gantry.toml in the current directory
    Init(InitCommand),
}

impl Cli {
    /// Execute the CLI command, returning the process exit code
    pub fn execute(self) -> anyhow::Result<i32> {
        // Change to specified directory if provided
        if let Some(dir) = &self.directory {
            std::env::set_current_dir(dir)?;
        }

        match self.command {
            Commands::Run(ref cmd) => cmd.execute(&self),
            Commands::Graph(ref cmd) => cmd.execute(&self),
            Commands::Cache(ref cmd) => cmd.execute(&self),
            Commands::Init(ref cmd) => cmd.execute(&self),
        }
    }

    /// Whether human-readable progress should be printed
    pub fn is_interactive_text(&self) -> bool {
        !self.quiet && self.format == OutputFormat::Text
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_run() {
        let cli = Cli::try_parse_from([
            "gantry",
            "run",
            "build",
            "test",
            "--concurrency",
            "3",
            "--fail-fast",
            "--filter",
            "web",
            "--format",
            "json",
        ])
        .unwrap();
        assert_eq!(cli.format, OutputFormat::Json);
        let Commands::Run(run) = cli.command else {
            panic!("expected run command");
        };
        assert_eq!(run.tasks, vec!["build", "test"]);
        assert_eq!(run.concurrency, Some(3));
        assert!(run.fail_fast);
        assert_eq!(run.filter, vec!["web"]);
    }

    #[test]
    fn test_run_requires_a_task() {
        assert!(Cli::try_parse_from(["gantry", "run"]).is_err());
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from(["gantry", "graph", "build", "-q", "-C", "/tmp"]).unwrap();
        assert!(cli.quiet);
        assert!(!cli.is_interactive_text());
        assert_eq!(cli.directory.as_deref(), Some(std::path::Path::new("/tmp")));
    }

    #[test]
    fn test_parse_cache_prune() {
        let cli = Cli::try_parse_from(["gantry", "cache", "prune", "--max-age-days", "3"]).unwrap();
        assert!(matches!(cli.command, Commands::Cache(_)));
    }
}
