//! Execution report returned by a run

use std::time::Duration;

use serde::{Serialize, Serializer};

use crate::cache::Fingerprint;
use crate::scheduler::PersistentTasks;
use crate::task::TaskId;

/// Execution state of a task node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeState {
    /// Waiting on predecessors
    Pending,
    /// All predecessors done, waiting for a worker
    Ready,
    /// Command in flight
    Running,
    /// Ran (or was restored from cache) successfully
    Succeeded,
    /// Ran and failed
    Failed,
    /// Had nothing to run
    Skipped,
    /// A predecessor failed; never ran
    Blocked,
    /// Stopped by fail-fast or interruption
    Cancelled,
}

impl NodeState {
    /// Whether the state is final
    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::Pending | Self::Ready | Self::Running)
    }

    /// Whether dependents may proceed
    pub fn is_satisfied(self) -> bool {
        matches!(self, Self::Succeeded | Self::Skipped)
    }
}

/// How the cache was involved for a node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheStatus {
    /// Outputs restored, command not run
    Hit,
    /// Looked up and not found
    Miss,
    /// Not consulted (caching off, uncacheable task, or node never ran)
    Disabled,
}

/// Overall outcome of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Success,
    Failure,
    Cancelled,
}

/// Outcome of a single node
#[derive(Debug, Clone, Serialize)]
pub struct NodeReport {
    /// Task identifier
    pub id: TaskId,
    /// Final (or, for persistent tasks, current) state
    pub state: NodeState,
    /// Time spent from dispatch to completion
    #[serde(rename = "duration_ms", serialize_with = "as_millis")]
    pub duration: Duration,
    /// Cache involvement
    pub cache: CacheStatus,
    /// Exit code, when the command ran to completion
    pub exit_code: Option<i32>,
    /// Failure reason
    pub error: Option<String>,
    /// Fingerprint, when caching was consulted
    pub fingerprint: Option<Fingerprint>,
}

impl NodeReport {
    pub(crate) fn pending(id: TaskId) -> Self {
        Self {
            id,
            state: NodeState::Pending,
            duration: Duration::ZERO,
            cache: CacheStatus::Disabled,
            exit_code: None,
            error: None,
            fingerprint: None,
        }
    }
}

/// Result of executing a task graph
#[derive(Debug, Serialize)]
pub struct ExecutionReport {
    /// Per-node outcomes, dependencies first
    pub nodes: Vec<NodeReport>,
    /// Total wall-clock time
    #[serde(rename = "duration_ms", serialize_with = "as_millis")]
    pub duration: Duration,
    /// Overall outcome
    pub overall: RunStatus,
    /// Persistent tasks still running when everything else finished
    #[serde(skip)]
    pub persistent: PersistentTasks,
}

impl ExecutionReport {
    /// Report for a task
    pub fn get(&self, id: &TaskId) -> Option<&NodeReport> {
        self.nodes.iter().find(|n| &n.id == id)
    }

    /// State of a task
    pub fn state(&self, id: &TaskId) -> Option<NodeState> {
        self.get(id).map(|n| n.state)
    }

    /// Whether the run succeeded
    pub fn is_success(&self) -> bool {
        self.overall == RunStatus::Success
    }

    /// Number of nodes that succeeded (including cache hits)
    pub fn succeeded(&self) -> usize {
        self.count(|n| n.state == NodeState::Succeeded)
    }

    /// Number of nodes counted as failed (failed or blocked)
    pub fn failed(&self) -> usize {
        self.count(|n| matches!(n.state, NodeState::Failed | NodeState::Blocked))
    }

    /// Number of nodes with nothing to run
    pub fn skipped(&self) -> usize {
        self.count(|n| n.state == NodeState::Skipped)
    }

    /// Number of nodes restored from cache
    pub fn cached(&self) -> usize {
        self.count(|n| n.cache == CacheStatus::Hit)
    }

    /// Number of nodes cancelled
    pub fn cancelled(&self) -> usize {
        self.count(|n| n.state == NodeState::Cancelled)
    }

    fn count(&self, predicate: impl Fn(&NodeReport) -> bool) -> usize {
        self.nodes.iter().filter(|n| predicate(n)).count()
    }
}

fn as_millis<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_u64(duration.as_millis() as u64)
}
