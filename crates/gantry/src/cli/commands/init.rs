//! Init command

use std::path::{Path, PathBuf};

use clap::Args;
use console::style;
use dialoguer::Confirm;
use tracing::info;

use gantry_core::config::{DEFAULT_CONFIG_TEMPLATE, DEFAULT_CONFIG_TOML};

use crate::cli::output;
use crate::cli::Cli;
use crate::exit_codes;

/// Create a gantry.toml in the current directory
#[derive(Debug, Args)]
pub struct InitCommand {
    /// Force overwrite existing configuration
    #[arg(short, long)]
    pub force: bool,

    /// Use defaults without prompting
    #[arg(short = 'y', long)]
    pub yes: bool,

    /// Output file path
    #[arg(short, long)]
    pub output: Option<PathBuf>,
}

impl InitCommand {
    /// Execute the init command
    pub fn execute(&self, cli: &Cli) -> anyhow::Result<i32> {
        info!(force = self.force, yes = self.yes, "executing init command");
        let cwd = std::env::current_dir()?;
        let config_path = self
            .output
            .clone()
            .unwrap_or_else(|| cwd.join(DEFAULT_CONFIG_TOML));

        if config_path.exists() && !self.force {
            if self.yes {
                anyhow::bail!(
                    "Configuration file already exists at {}. Use --force to overwrite.",
                    config_path.display()
                );
            }

            let overwrite = Confirm::new()
                .with_prompt(format!(
                    "Configuration file already exists at {}. Overwrite?",
                    config_path.display()
                ))
                .default(false)
                .interact()?;

            if !overwrite {
                println!("{}", style("Aborted.").yellow());
                return Ok(exit_codes::SUCCESS);
            }
        }

        write_template(&config_path)?;

        if !cli.quiet {
            output::success(&format!("Created {}", style(config_path.display()).cyan()));
        }
        Ok(exit_codes::SUCCESS)
    }
}

fn write_template(path: &Path) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, DEFAULT_CONFIG_TEMPLATE)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use gantry_core::config::load_config;
    use tempfile::TempDir;

    #[test]
    fn test_template_written_and_loadable() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("gantry.toml");
        write_template(&path).unwrap();

        let config = load_config(&path).unwrap();
        assert!(config.pipeline.contains_key("build"));
    }
}
