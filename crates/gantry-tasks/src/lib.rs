//! Gantry Tasks - Task orchestration engine
//!
//! This crate turns task definitions and the workspace graph into a graph of
//! `(workspace, task)` nodes and executes it with bounded parallelism,
//! skipping workspaces without a script and restoring cached outputs.

pub mod cache;
pub mod graph;
pub mod launcher;
pub mod orchestrator;
pub mod registry;
pub mod report;
pub mod reporter;
pub mod scheduler;
pub mod task;

#[cfg(test)]
mod testing;

pub use cache::{CacheError, CacheGate, CacheLookup, CacheStore, Fingerprint, FsCacheStore, MemoryCacheStore};
pub use graph::{GraphError, TaskGraph, TaskGraphBuilder, TaskNode};
pub use launcher::{LaunchError, LaunchOutcome, LaunchRequest, ProcessLauncher, ShellLauncher};
pub use orchestrator::{Orchestrator, RunError, RunOptions};
pub use registry::TaskRegistry;
pub use report::{CacheStatus, ExecutionReport, NodeReport, NodeState, RunStatus};
pub use reporter::{ChannelReporter, TaskEvent, TaskReporter, TracingReporter};
pub use scheduler::{PersistentTasks, Scheduler, SchedulerOptions};
pub use task::{DefinitionError, DependencySpecifier, TaskDefinition, TaskId};
