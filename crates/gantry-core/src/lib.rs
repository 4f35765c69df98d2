//! Gantry Core - Core library for the Gantry monorepo task runner
//!
//! This crate provides the foundational types, error handling, configuration
//! loading, and workspace model (discovery and dependency graph) that the
//! task engine builds on.

pub mod config;
pub mod error;
pub mod monorepo;

pub use config::{Config, PipelineTask, TasksConfig};
pub use error::{ConfigError, GantryError, Result, WorkspaceError};
pub use monorepo::{Workspace, WorkspaceDiscovery, WorkspaceGraph, ROOT_WORKSPACE};
