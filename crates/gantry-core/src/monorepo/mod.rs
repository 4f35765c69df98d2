//! Monorepo workspace model
//!
//! This module provides the workspace view the task engine consumes:
//! - Workspace records (name, directory, dependencies, scripts)
//! - Discovery from package.json / pnpm-workspace.yaml manifests
//! - Dependency graph analysis with cycle detection and topological sorting

pub mod discovery;
pub mod graph;
pub mod workspace;

pub use discovery::WorkspaceDiscovery;
pub use graph::{WorkspaceGraph, WorkspaceNode};
pub use workspace::{Workspace, ROOT_WORKSPACE};
