//! Workspace model

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Name given to the repository root workspace
pub const ROOT_WORKSPACE: &str = "//";

/// A workspace (package/project) in the monorepo
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Workspace {
    /// Unique workspace name
    pub name: String,
    /// Directory containing the workspace manifest
    pub path: PathBuf,
    /// Names of the workspaces this one depends on, in declaration order
    pub dependencies: Vec<String>,
    /// Scripts declared in the manifest, keyed by task name
    pub scripts: BTreeMap<String, String>,
    /// Whether this is the repository root
    pub is_root: bool,
}

impl Workspace {
    /// Create a new (non-root) workspace
    pub fn new(name: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
            dependencies: Vec::new(),
            scripts: BTreeMap::new(),
            is_root: false,
        }
    }

    /// Create the repository root workspace
    pub fn root(path: impl Into<PathBuf>) -> Self {
        Self {
            is_root: true,
            ..Self::new(ROOT_WORKSPACE, path)
        }
    }

    /// Add a workspace dependency
    pub fn with_dependency(mut self, name: impl Into<String>) -> Self {
        let name = name.into();
        if !self.dependencies.contains(&name) {
            self.dependencies.push(name);
        }
        self
    }

    /// Add a script
    pub fn with_script(mut self, task: impl Into<String>, command: impl Into<String>) -> Self {
        self.scripts.insert(task.into(), command.into());
        self
    }

    /// The command this workspace runs for a task, if it declares one
    pub fn script(&self, task: &str) -> Option<&str> {
        self.scripts.get(task).map(String::as_str)
    }

    /// Whether the workspace declares a script for the task
    pub fn implements(&self, task: &str) -> bool {
        self.scripts.contains_key(task)
    }
}

impl fmt::Display for Workspace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_root_workspace() {
        let root = Workspace::root("/repo");
        assert!(root.is_root);
        assert_eq!(root.name, ROOT_WORKSPACE);
    }

    #[test]
    fn test_builder_dedups_dependencies() {
        let ws = Workspace::new("web", "apps/web")
            .with_dependency("shared")
            .with_dependency("ui")
            .with_dependency("shared");
        assert_eq!(ws.dependencies, vec!["shared", "ui"]);
    }

    #[test]
    fn test_scripts() {
        let ws = Workspace::new("web", "apps/web").with_script("build", "vite build");
        assert!(ws.implements("build"));
        assert!(!ws.implements("test"));
        assert_eq!(ws.script("build"), Some("vite build"));
    }
}
