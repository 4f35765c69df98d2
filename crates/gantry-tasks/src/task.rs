//! Task types and definitions

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use gantry_core::config::{is_valid_task_name, PipelineTask, ROOT_TASK_PREFIX};
use gantry_core::ROOT_WORKSPACE;

/// Unique identifier for a task node: a (workspace, task) pair
#[derive(Debug, Clone, Hash, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TaskId {
    /// Workspace name
    pub workspace: String,
    /// Task name (e.g., "build", "test", "lint")
    pub task: String,
}

impl TaskId {
    /// Create a new task ID
    pub fn new(workspace: impl Into<String>, task: impl Into<String>) -> Self {
        Self {
            workspace: workspace.into(),
            task: task.into(),
        }
    }

    /// Task ID of a root-scoped task
    pub fn root(task: impl Into<String>) -> Self {
        Self::new(ROOT_WORKSPACE, task)
    }

    /// Parse a task ID from "workspace#task" format
    pub fn parse(s: &str) -> Option<Self> {
        let (workspace, task) = s.rsplit_once('#')?;
        if workspace.is_empty() || task.is_empty() {
            return None;
        }
        Some(Self::new(workspace, task))
    }

    /// Whether this task runs in the repository root workspace
    pub fn is_root(&self) -> bool {
        self.workspace == ROOT_WORKSPACE
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.workspace, self.task)
    }
}

/// One entry of a task's `depends_on` list
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DependencySpecifier {
    /// `task`: the same task-name in the same workspace
    SameWorkspace(String),
    /// `^task`: the task in every direct dependency workspace
    Topological(String),
    /// `//#task`: the root-scoped task
    RootScoped(String),
}

impl DependencySpecifier {
    /// Parse a dependency reference declared by `task`
    pub fn parse(task: &str, reference: &str) -> Result<Self, DefinitionError> {
        let malformed = |reason: &'static str| DefinitionError::MalformedDependency {
            task: task.to_string(),
            reference: reference.to_string(),
            reason,
        };

        let (spec, name) = if let Some(name) = reference.strip_prefix(ROOT_TASK_PREFIX) {
            (Self::RootScoped(name.to_string()), name)
        } else if let Some(name) = reference.strip_prefix('^') {
            if name.starts_with(ROOT_TASK_PREFIX) {
                return Err(malformed("root tasks cannot be topological"));
            }
            (Self::Topological(name.to_string()), name)
        } else {
            (Self::SameWorkspace(reference.to_string()), reference)
        };

        if name.contains('#') {
            return Err(malformed("workspace-qualified references are not supported"));
        }
        if !is_valid_task_name(name) {
            return Err(malformed("expected a task name"));
        }
        Ok(spec)
    }

    /// The task name referenced
    pub fn task(&self) -> &str {
        match self {
            Self::SameWorkspace(t) | Self::Topological(t) | Self::RootScoped(t) => t,
        }
    }
}

impl fmt::Display for DependencySpecifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SameWorkspace(t) => write!(f, "{}", t),
            Self::Topological(t) => write!(f, "^{}", t),
            Self::RootScoped(t) => write!(f, "{}{}", ROOT_TASK_PREFIX, t),
        }
    }
}

/// Definition of a task in the pipeline
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskDefinition {
    /// Task name (e.g., "build", "test", "lint")
    pub name: String,

    /// Tasks that must complete first
    #[serde(default)]
    pub depends_on: Vec<DependencySpecifier>,

    /// Input glob patterns (empty = the whole workspace)
    #[serde(default)]
    pub inputs: Vec<String>,

    /// Output glob patterns (for caching)
    #[serde(default)]
    pub outputs: Vec<String>,

    /// Environment variables to pass
    #[serde(default)]
    pub env: BTreeMap<String, String>,

    /// Whether results may be cached
    #[serde(default = "default_cache")]
    pub cache: bool,

    /// Whether this is a persistent/long-running task (e.g., dev server)
    #[serde(default)]
    pub persistent: bool,
}

impl TaskDefinition {
    /// Create a new task definition
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            depends_on: Vec::new(),
            inputs: Vec::new(),
            outputs: Vec::new(),
            env: BTreeMap::new(),
            cache: true,
            persistent: false,
        }
    }

    /// Build a definition from its pipeline configuration entry
    pub fn from_pipeline(name: &str, task: &PipelineTask) -> Result<Self, DefinitionError> {
        let depends_on = task
            .depends_on
            .iter()
            .map(|reference| DependencySpecifier::parse(name, reference))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            name: name.to_string(),
            depends_on,
            inputs: task.inputs.clone(),
            outputs: task.outputs.clone(),
            env: task.env.clone(),
            cache: task.cache,
            persistent: task.persistent,
        })
    }

    /// Add a dependency
    pub fn with_depends_on(mut self, dep: DependencySpecifier) -> Self {
        self.depends_on.push(dep);
        self
    }

    /// Set input globs
    pub fn with_inputs(mut self, inputs: Vec<String>) -> Self {
        self.inputs = inputs;
        self
    }

    /// Set output globs
    pub fn with_outputs(mut self, outputs: Vec<String>) -> Self {
        self.outputs = outputs;
        self
    }

    /// Set whether results may be cached
    pub fn with_cache(mut self, cache: bool) -> Self {
        self.cache = cache;
        self
    }

    /// Mark as a persistent task
    pub fn with_persistent(mut self, persistent: bool) -> Self {
        self.persistent = persistent;
        self
    }

    /// Whether outputs of this task may be stored and restored
    pub fn is_cacheable(&self) -> bool {
        self.cache && !self.persistent
    }
}

fn default_cache() -> bool {
    true
}

/// Errors in task definitions
#[derive(Debug, thiserror::Error)]
pub enum DefinitionError {
    /// A `depends_on` entry could not be parsed
    #[error("Malformed dependency '{reference}' in task '{task}': {reason}")]
    MalformedDependency {
        task: String,
        reference: String,
        reason: &'static str,
    },

    /// A pipeline key is neither a task name nor `//#task`
    #[error("Invalid task key '{0}': expected a task name or //#<task>")]
    InvalidTaskKey(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_task_id_display() {
        assert_eq!(TaskId::new("core", "build").to_string(), "core#build");
        assert_eq!(TaskId::root("check").to_string(), "//#check");
    }

    #[test]
    fn test_task_id_parse() {
        let id = TaskId::parse("core#build").unwrap();
        assert_eq!(id.workspace, "core");
        assert_eq!(id.task, "build");

        let root = TaskId::parse("//#check").unwrap();
        assert!(root.is_root());
        assert_eq!(root.task, "check");
    }

    #[test]
    fn test_task_id_parse_invalid() {
        assert!(TaskId::parse("nobuild").is_none());
        assert!(TaskId::parse("#build").is_none());
    }

    #[test]
    fn test_parse_specifiers() {
        assert_eq!(
            DependencySpecifier::parse("test", "build").unwrap(),
            DependencySpecifier::SameWorkspace("build".to_string())
        );
        assert_eq!(
            DependencySpecifier::parse("build", "^build").unwrap(),
            DependencySpecifier::Topological("build".to_string())
        );
        assert_eq!(
            DependencySpecifier::parse("test", "//#codegen").unwrap(),
            DependencySpecifier::RootScoped("codegen".to_string())
        );
    }

    #[test]
    fn test_parse_malformed_specifiers() {
        for reference in ["", "^", "//#", "^//#x", "web#build", "a b"] {
            let result = DependencySpecifier::parse("test", reference);
            assert!(
                matches!(result, Err(DefinitionError::MalformedDependency { .. })),
                "expected '{}' to be rejected",
                reference
            );
        }
    }

    #[test]
    fn test_specifier_display_round_trip() {
        for reference in ["build", "^build", "//#build"] {
            let spec = DependencySpecifier::parse("x", reference).unwrap();
            assert_eq!(spec.to_string(), reference);
        }
    }

    #[test]
    fn test_from_pipeline() {
        let entry = PipelineTask {
            depends_on: vec!["^build".to_string(), "codegen".to_string()],
            outputs: vec!["dist/**".to_string()],
            ..Default::default()
        };
        let def = TaskDefinition::from_pipeline("build", &entry).unwrap();

        assert_eq!(def.name, "build");
        assert_eq!(def.depends_on.len(), 2);
        assert_eq!(def.outputs, vec!["dist/**"]);
        assert!(def.is_cacheable());
    }

    #[test]
    fn test_persistent_not_cacheable() {
        let def = TaskDefinition::new("dev").with_persistent(true);
        assert!(!def.is_cacheable());
        let def = TaskDefinition::new("deploy").with_cache(false);
        assert!(!def.is_cacheable());
    }
}
