//! Exit codes for the CLI

use gantry_core::{ConfigError, GantryError, WorkspaceError};
use gantry_tasks::{RunError, RunStatus};

/// Success
pub const SUCCESS: i32 = 0;

/// A task failed (or any other runtime error)
pub const TASK_FAILURE: i32 = 1;

/// Configuration error
pub const CONFIG_ERROR: i32 = 2;

/// Dependency cycle or illegal root recursion
pub const STRUCTURAL_ERROR: i32 = 3;

/// User cancelled
pub const CANCELLED: i32 = 130;

/// Exit code for a finished run
pub fn for_status(status: RunStatus) -> i32 {
    match status {
        RunStatus::Success => SUCCESS,
        RunStatus::Failure => TASK_FAILURE,
        RunStatus::Cancelled => CANCELLED,
    }
}

/// Exit code for an error that stopped a command before or outside a run
pub fn for_error(err: &anyhow::Error) -> i32 {
    for cause in err.chain() {
        if let Some(run) = cause.downcast_ref::<RunError>() {
            return if run.is_structural() {
                STRUCTURAL_ERROR
            } else {
                match run {
                    RunError::Workspace(core) => for_core_error(core),
                    _ => CONFIG_ERROR,
                }
            };
        }
        if let Some(core) = cause.downcast_ref::<GantryError>() {
            return for_core_error(core);
        }
        if cause.downcast_ref::<ConfigError>().is_some() {
            return CONFIG_ERROR;
        }
    }
    TASK_FAILURE
}

fn for_core_error(err: &GantryError) -> i32 {
    match err {
        GantryError::Config(_) => CONFIG_ERROR,
        GantryError::Workspace(WorkspaceError::CyclicDependency { .. }) => STRUCTURAL_ERROR,
        GantryError::Workspace(_) => CONFIG_ERROR,
        _ => TASK_FAILURE,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gantry_tasks::GraphError;

    #[test]
    fn test_status_codes() {
        assert_eq!(for_status(RunStatus::Success), 0);
        assert_eq!(for_status(RunStatus::Failure), 1);
        assert_eq!(for_status(RunStatus::Cancelled), 130);
    }

    #[test]
    fn test_graph_errors() {
        let unknown = anyhow::Error::new(RunError::Graph(GraphError::UnknownTask("x".into())));
        assert_eq!(for_error(&unknown), CONFIG_ERROR);

        let cycle = anyhow::Error::new(RunError::Graph(GraphError::CyclicDependency {
            cycle: Vec::new(),
        }));
        assert_eq!(for_error(&cycle), STRUCTURAL_ERROR);
    }

    #[test]
    fn test_workspace_errors() {
        let cycle: GantryError = WorkspaceError::CyclicDependency {
            cycle: vec!["a".into(), "a".into()],
        }
        .into();
        assert_eq!(for_error(&anyhow::Error::new(RunError::Workspace(cycle))), STRUCTURAL_ERROR);

        let config: GantryError = ConfigError::NotFound("/repo".into()).into();
        assert_eq!(for_error(&anyhow::Error::new(config)), CONFIG_ERROR);
    }

    #[test]
    fn test_context_is_looked_through() {
        let err = anyhow::Error::new(RunError::UnknownWorkspace("web".into())).context("planning");
        assert_eq!(for_error(&err), CONFIG_ERROR);
        assert_eq!(for_error(&anyhow::anyhow!("boom")), TASK_FAILURE);
    }
}
