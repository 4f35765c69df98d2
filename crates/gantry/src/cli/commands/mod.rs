//! CLI commands

mod cache;
mod graph;
mod init;
mod run;

pub use cache::CacheCommand;
pub use graph::GraphCommand;
pub use init::InitCommand;
pub use run::RunCommand;

use std::path::{Path, PathBuf};

use gantry_core::config::load_config_or_default;
use gantry_core::Config;

/// Configuration and repository root for the current directory.
///
/// The root is the directory holding the config file; without one, the
/// current directory.
fn load_project() -> anyhow::Result<(Config, PathBuf)> {
    let cwd = std::env::current_dir()?;
    let (config, path) = load_config_or_default(&cwd)?;
    let root = project_root(&cwd, path.as_deref());
    Ok((config, root))
}

fn project_root(cwd: &Path, config_path: Option<&Path>) -> PathBuf {
    config_path
        .and_then(Path::parent)
        .map(Path::to_path_buf)
        .unwrap_or_else(|| cwd.to_path_buf())
}
