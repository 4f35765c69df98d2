//! Task registry: which definition applies to which workspace

use std::collections::BTreeMap;

use tracing::debug;

use gantry_core::config::{is_valid_task_name, PipelineTask, ROOT_TASK_PREFIX};
use gantry_core::Workspace;

use crate::task::{DefinitionError, TaskDefinition};

/// Resolved task definitions for one invocation.
///
/// Generic entries (`build`) apply to every non-root workspace. Root-scoped
/// entries (`//#build`) apply only to the repository root, and the root never
/// falls back to a generic entry of the same name.
#[derive(Debug, Clone, Default)]
pub struct TaskRegistry {
    generic: BTreeMap<String, TaskDefinition>,
    root: BTreeMap<String, TaskDefinition>,
}

impl TaskRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a registry from the pipeline section of the configuration
    pub fn from_pipeline(pipeline: &BTreeMap<String, PipelineTask>) -> Result<Self, DefinitionError> {
        let mut registry = Self::new();
        for (key, entry) in pipeline {
            let (name, is_root) = match key.strip_prefix(ROOT_TASK_PREFIX) {
                Some(name) => (name, true),
                None => (key.as_str(), false),
            };
            if !is_valid_task_name(name) {
                return Err(DefinitionError::InvalidTaskKey(key.clone()));
            }

            let definition = TaskDefinition::from_pipeline(name, entry)?;
            if is_root {
                registry.root.insert(name.to_string(), definition);
            } else {
                registry.generic.insert(name.to_string(), definition);
            }
        }

        debug!(
            generic = registry.generic.len(),
            root = registry.root.len(),
            "task registry built"
        );
        Ok(registry)
    }

    /// Register a generic task definition
    pub fn with_task(mut self, definition: TaskDefinition) -> Self {
        self.generic.insert(definition.name.clone(), definition);
        self
    }

    /// Register a root-scoped task definition
    pub fn with_root_task(mut self, definition: TaskDefinition) -> Self {
        self.root.insert(definition.name.clone(), definition);
        self
    }

    /// The definition that applies to `task` in `workspace`, if any
    pub fn resolve(&self, task: &str, workspace: &Workspace) -> Option<&TaskDefinition> {
        if workspace.is_root {
            self.root.get(task)
        } else {
            self.generic.get(task)
        }
    }

    /// Whether the workspace declares a runnable script for the task
    pub fn implements(&self, task: &str, workspace: &Workspace) -> bool {
        workspace.implements(task)
    }

    /// Whether any definition (generic or root-scoped) exists for the task
    pub fn is_known(&self, task: &str) -> bool {
        self.generic.contains_key(task) || self.root.contains_key(task)
    }

    /// The root-scoped definition for the task, if opted in
    pub fn root_task(&self, task: &str) -> Option<&TaskDefinition> {
        self.root.get(task)
    }

    /// Names of all known tasks, sorted
    pub fn task_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.generic.keys().cloned().collect();
        names.extend(
            self.root
                .keys()
                .map(|name| format!("{}{}", ROOT_TASK_PREFIX, name)),
        );
        names.sort();
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_pipeline() -> BTreeMap<String, PipelineTask> {
        let mut pipeline = BTreeMap::new();
        pipeline.insert(
            "build".to_string(),
            PipelineTask {
                depends_on: vec!["^build".to_string()],
                ..Default::default()
            },
        );
        pipeline.insert("test".to_string(), PipelineTask::default());
        pipeline.insert(
            "//#test".to_string(),
            PipelineTask {
                cache: false,
                ..Default::default()
            },
        );
        pipeline.insert("//#format".to_string(), PipelineTask::default());
        pipeline
    }

    #[test]
    fn test_generic_task_resolves_for_members() {
        let registry = TaskRegistry::from_pipeline(&create_pipeline()).unwrap();
        let web = Workspace::new("web", "apps/web");

        let def = registry.resolve("build", &web).unwrap();
        assert_eq!(def.name, "build");
        assert!(registry.resolve("format", &web).is_none());
    }

    #[test]
    fn test_root_uses_root_scoped_entry_only() {
        let registry = TaskRegistry::from_pipeline(&create_pipeline()).unwrap();
        let root = Workspace::root("/repo");

        // //#test exists: used exclusively, generic test ignored
        let def = registry.resolve("test", &root).unwrap();
        assert!(!def.cache);

        // No //#build: the generic build entry is never inherited by the root
        assert!(registry.resolve("build", &root).is_none());
    }

    #[test]
    fn test_implements_is_independent_of_definitions() {
        let registry = TaskRegistry::from_pipeline(&create_pipeline()).unwrap();
        let docs = Workspace::new("docs", "apps/docs").with_script("lint", "eslint .");

        assert!(registry.resolve("build", &docs).is_some());
        assert!(!registry.implements("build", &docs));
        assert!(registry.implements("lint", &docs));
    }

    #[test]
    fn test_is_known() {
        let registry = TaskRegistry::from_pipeline(&create_pipeline()).unwrap();
        assert!(registry.is_known("build"));
        assert!(registry.is_known("format"));
        assert!(!registry.is_known("deploy"));
    }

    #[test]
    fn test_invalid_key_rejected() {
        let mut pipeline = BTreeMap::new();
        pipeline.insert("web#build".to_string(), PipelineTask::default());
        assert!(matches!(
            TaskRegistry::from_pipeline(&pipeline),
            Err(DefinitionError::InvalidTaskKey(_))
        ));
    }

    #[test]
    fn test_malformed_dependency_rejected() {
        let mut pipeline = BTreeMap::new();
        pipeline.insert(
            "build".to_string(),
            PipelineTask {
                depends_on: vec!["^".to_string()],
                ..Default::default()
            },
        );
        assert!(matches!(
            TaskRegistry::from_pipeline(&pipeline),
            Err(DefinitionError::MalformedDependency { .. })
        ));
    }

    #[test]
    fn test_task_names() {
        let registry = TaskRegistry::from_pipeline(&create_pipeline()).unwrap();
        assert_eq!(
            registry.task_names(),
            vec!["//#format", "//#test", "build", "test"]
        );
    }
}
