//! Task scheduler: readiness-driven async executor using tokio

use std::cmp::Reverse;
use std::collections::{BinaryHeap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

use gantry_core::config::{default_concurrency, DEFAULT_GRACE_PERIOD_SECS};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::cache::{CacheGate, CacheLookup, CacheRequest, Upstream};
use crate::graph::TaskGraph;
use crate::launcher::{LaunchRequest, ProcessLauncher};
use crate::report::{CacheStatus, ExecutionReport, NodeReport, NodeState, RunStatus};
use crate::reporter::{TaskEvent, TaskReporter};
use crate::task::TaskId;

/// Options for the task scheduler
#[derive(Debug, Clone)]
pub struct SchedulerOptions {
    /// Maximum concurrently running tasks
    pub concurrency: usize,
    /// Cancel all pending tasks once any task fails
    pub fail_fast: bool,
    /// How long in-flight tasks may keep running after cancellation
    pub grace_period: Duration,
}

impl Default for SchedulerOptions {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            fail_fast: false,
            grace_period: Duration::from_secs(DEFAULT_GRACE_PERIOD_SECS),
        }
    }
}

/// What a worker reports back to the scheduling loop
#[derive(Debug)]
struct WorkerOutcome {
    idx: usize,
    id: TaskId,
    state: NodeState,
    cache: CacheStatus,
    upstream: Upstream,
    exit_code: Option<i32>,
    duration: Duration,
    error: Option<String>,
}

impl WorkerOutcome {
    fn failed(idx: usize, id: TaskId, duration: Duration, error: String) -> Self {
        Self {
            idx,
            id,
            state: NodeState::Failed,
            cache: CacheStatus::Disabled,
            upstream: Upstream::Unknown,
            exit_code: None,
            duration,
            error: Some(error),
        }
    }
}

/// Persistent tasks still running after a run finished.
///
/// Dropping this value aborts them (their processes are killed).
#[derive(Debug, Default)]
pub struct PersistentTasks {
    tasks: JoinSet<WorkerOutcome>,
    ids: Vec<TaskId>,
}

impl PersistentTasks {
    /// Tasks handed back
    pub fn ids(&self) -> &[TaskId] {
        &self.ids
    }

    /// Whether there is nothing left running
    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Number of tasks still running
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    /// Wait for every persistent task to exit on its own
    pub async fn wait(&mut self) -> Vec<(TaskId, NodeState)> {
        let mut finished = Vec::new();
        while let Some(joined) = self.tasks.join_next().await {
            if let Ok(outcome) = joined {
                finished.push((outcome.id, outcome.state));
            }
        }
        finished
    }

    /// Stop every persistent task
    pub async fn shutdown(&mut self) {
        self.tasks.abort_all();
        while self.tasks.join_next().await.is_some() {}
    }
}

/// Aborts the wrapped task when dropped
struct AbortOnDrop<T>(JoinHandle<T>);

impl<T> Drop for AbortOnDrop<T> {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// Everything a worker needs, cloned per dispatched node
#[derive(Clone)]
struct Worker {
    launcher: Arc<dyn ProcessLauncher>,
    cache: Option<CacheGate>,
    reporter: Arc<dyn TaskReporter>,
}

impl Worker {
    /// Consult the cache, run the command, store outputs
    async fn run(self, idx: usize, launch: LaunchRequest, cache_request: Option<CacheRequest>) -> WorkerOutcome {
        let start = Instant::now();
        let id = launch.id.clone();
        let mut cache = CacheStatus::Disabled;
        let mut fingerprint = None;

        if let (Some(gate), Some(request)) = (&self.cache, &cache_request) {
            match gate.before_run(request).await {
                CacheLookup::Hit {
                    fingerprint,
                    restored,
                } => {
                    debug!(task = %id, restored, "restored outputs from cache");
                    return WorkerOutcome {
                        idx,
                        id,
                        state: NodeState::Succeeded,
                        cache: CacheStatus::Hit,
                        upstream: Upstream::Fingerprinted(fingerprint),
                        exit_code: None,
                        duration: start.elapsed(),
                        error: None,
                    };
                }
                CacheLookup::Miss(fp) => fingerprint = Some(fp),
                CacheLookup::Bypass => {}
            }
            if request.cacheable {
                cache = CacheStatus::Miss;
            }
        }

        let upstream = fingerprint
            .clone()
            .map(Upstream::Fingerprinted)
            .unwrap_or(Upstream::Unknown);

        match self.launcher.execute(&launch, self.reporter.as_ref()).await {
            Ok(outcome) if outcome.success() => {
                if let (Some(gate), Some(request), Some(fp)) = (&self.cache, &cache_request, &fingerprint) {
                    gate.after_run(request, fp, true).await;
                }
                WorkerOutcome {
                    idx,
                    id,
                    state: NodeState::Succeeded,
                    cache,
                    upstream,
                    exit_code: Some(outcome.exit_code),
                    duration: start.elapsed(),
                    error: None,
                }
            }
            Ok(outcome) => WorkerOutcome {
                idx,
                id,
                state: NodeState::Failed,
                cache,
                upstream,
                exit_code: Some(outcome.exit_code),
                duration: start.elapsed(),
                error: Some(format!("command exited with code {}", outcome.exit_code)),
            },
            Err(e) => WorkerOutcome::failed(idx, id, start.elapsed(), e.to_string()),
        }
    }
}

/// Per-node execution state, owned by the scheduling loop
struct RunState<'g> {
    graph: &'g TaskGraph,
    reporter: Arc<dyn TaskReporter>,
    nodes: Vec<NodeReport>,
    remaining: Vec<usize>,
    upstream: Vec<Upstream>,
    ready: BinaryHeap<(usize, Reverse<usize>)>,
    any_failed: bool,
}

impl<'g> RunState<'g> {
    fn new(graph: &'g TaskGraph, reporter: Arc<dyn TaskReporter>) -> Self {
        let mut state = Self {
            graph,
            reporter,
            nodes: graph
                .nodes()
                .iter()
                .map(|n| NodeReport::pending(n.id.clone()))
                .collect(),
            remaining: graph.nodes().iter().map(|n| n.dependencies.len()).collect(),
            upstream: vec![Upstream::Unknown; graph.len()],
            ready: BinaryHeap::new(),
            any_failed: false,
        };
        // A skipped root may already have released nodes later in the arena
        for idx in 0..graph.len() {
            if state.remaining[idx] == 0 && state.state(idx) == NodeState::Pending {
                state.mark_ready(idx);
            }
        }
        state
    }

    fn state(&self, idx: usize) -> NodeState {
        self.nodes[idx].state
    }

    /// Move a node whose predecessors are all satisfied to Ready.
    ///
    /// Skippable nodes complete on the spot, which may make their dependents
    /// ready in turn.
    fn mark_ready(&mut self, start: usize) {
        let mut stack = vec![start];
        let graph = self.graph;
        while let Some(idx) = stack.pop() {
            let node = graph.node(idx);
            if !node.skippable {
                self.nodes[idx].state = NodeState::Ready;
                self.ready
                    .push((self.graph.downstream_count(idx), Reverse(idx)));
                self.reporter.report(&TaskEvent::Ready { id: node.id.clone() });
                continue;
            }

            self.nodes[idx].state = NodeState::Skipped;
            self.upstream[idx] = Upstream::Skipped;
            self.reporter.report(&TaskEvent::Skipped {
                id: node.id.clone(),
                reason: format!("{} has no '{}' script", node.id.workspace, node.id.task),
            });
            for &dependent in &node.dependents {
                self.remaining[dependent] = self.remaining[dependent].saturating_sub(1);
                if self.remaining[dependent] == 0 && self.state(dependent) == NodeState::Pending {
                    stack.push(dependent);
                }
            }
        }
    }

    /// Next ready node, highest fan-out first
    fn pop_ready(&mut self) -> Option<usize> {
        while let Some((_, Reverse(idx))) = self.ready.pop() {
            if self.state(idx) == NodeState::Ready {
                return Some(idx);
            }
        }
        None
    }

    /// Record a worker's result and update everything downstream
    fn complete(&mut self, outcome: WorkerOutcome) {
        let idx = outcome.idx;
        if self.state(idx) != NodeState::Running {
            warn!(task = %outcome.id, state = ?self.state(idx), "ignoring outcome for node that is not running");
            return;
        }
        let report = &mut self.nodes[idx];
        report.state = outcome.state;
        report.cache = outcome.cache;
        report.exit_code = outcome.exit_code;
        report.duration = outcome.duration;
        report.error = outcome.error.clone();
        if let Upstream::Fingerprinted(fp) = &outcome.upstream {
            report.fingerprint = Some(fp.clone());
        }
        self.upstream[idx] = outcome.upstream;

        match outcome.state {
            NodeState::Succeeded => {
                self.reporter.report(&TaskEvent::Completed {
                    id: outcome.id,
                    duration: outcome.duration,
                    cached: outcome.cache == CacheStatus::Hit,
                });
                let graph = self.graph;
                for &dependent in &graph.node(idx).dependents {
                    self.remaining[dependent] = self.remaining[dependent].saturating_sub(1);
                    if self.remaining[dependent] == 0 && self.state(dependent) == NodeState::Pending {
                        self.mark_ready(dependent);
                    }
                }
            }
            _ => {
                self.any_failed = true;
                self.reporter.report(&TaskEvent::Failed {
                    id: outcome.id.clone(),
                    duration: outcome.duration,
                    error: outcome.error.unwrap_or_default(),
                });
                self.block_dependents(idx, &outcome.id);
            }
        }
    }

    /// Every transitive dependent of a failed node becomes Blocked
    fn block_dependents(&mut self, failed: usize, failed_id: &TaskId) {
        let graph = self.graph;
        let mut queue = VecDeque::from([failed]);
        while let Some(idx) = queue.pop_front() {
            for &dependent in &graph.node(idx).dependents {
                if matches!(self.state(dependent), NodeState::Pending | NodeState::Ready) {
                    self.nodes[dependent].state = NodeState::Blocked;
                    self.reporter.report(&TaskEvent::Blocked {
                        id: self.nodes[dependent].id.clone(),
                        failed_dependency: failed_id.clone(),
                    });
                    queue.push_back(dependent);
                }
            }
        }
    }

    /// Cancel every node that has not started
    fn cancel_pending(&mut self) {
        self.ready.clear();
        self.cancel_where(|state| matches!(state, NodeState::Pending | NodeState::Ready));
    }

    fn cancel_where(&mut self, predicate: impl Fn(NodeState) -> bool) {
        for report in &mut self.nodes {
            if predicate(report.state) {
                report.state = NodeState::Cancelled;
                self.reporter.report(&TaskEvent::Cancelled {
                    id: report.id.clone(),
                });
            }
        }
    }
}

/// Executes a task graph with bounded parallelism
pub struct Scheduler {
    options: SchedulerOptions,
    launcher: Arc<dyn ProcessLauncher>,
    cache: Option<CacheGate>,
    reporter: Arc<dyn TaskReporter>,
    cancel: CancellationToken,
}

impl Scheduler {
    /// Create a new scheduler
    pub fn new(
        options: SchedulerOptions,
        launcher: Arc<dyn ProcessLauncher>,
        cache: Option<CacheGate>,
        reporter: Arc<dyn TaskReporter>,
    ) -> Self {
        Self {
            options,
            launcher,
            cache,
            reporter,
            cancel: CancellationToken::new(),
        }
    }

    /// Stop the run when this token is cancelled
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Execute every node in the graph.
    ///
    /// A node is dispatched once all its predecessors succeeded or were
    /// skipped. Persistent tasks without dependents are handed back still
    /// running in [`ExecutionReport::persistent`].
    pub async fn run(&self, graph: &TaskGraph) -> ExecutionReport {
        let start = Instant::now();
        let semaphore = Arc::new(Semaphore::new(self.options.concurrency.max(1)));
        let worker = Worker {
            launcher: self.launcher.clone(),
            cache: self.cache.clone(),
            reporter: self.reporter.clone(),
        };

        let mut state = RunState::new(graph, self.reporter.clone());
        let mut running: JoinSet<WorkerOutcome> = JoinSet::new();
        let mut persistent: JoinSet<WorkerOutcome> = JoinSet::new();
        let mut halted = false;
        let mut cancelled = false;

        info!(
            tasks = graph.len(),
            concurrency = self.options.concurrency,
            "starting task execution"
        );

        loop {
            if !halted {
                while let Some(permit) = peek_permit(&state, &semaphore) {
                    let Some(idx) = state.pop_ready() else {
                        break;
                    };
                    self.dispatch(&mut state, &worker, idx, permit, &mut running, &mut persistent);
                }
            }

            if running.is_empty() {
                break;
            }

            tokio::select! {
                Some(joined) = running.join_next() => {
                    if let Ok(outcome) = joined {
                        state.complete(outcome);
                    }
                }
                Some(joined) = persistent.join_next(), if !persistent.is_empty() => {
                    if let Ok(outcome) = joined {
                        state.complete(outcome);
                    }
                }
                _ = self.cancel.cancelled(), if !cancelled => {
                    info!("cancellation requested, stopping dispatch");
                    cancelled = true;
                    halted = true;
                    state.cancel_pending();
                    self.drain(&mut state, &mut running, &mut persistent).await;
                }
            }

            if self.options.fail_fast && state.any_failed && !halted {
                info!("fail-fast: cancelling pending tasks");
                halted = true;
                state.cancel_pending();
            }
        }

        // Unreachable unless dispatch starved; never leave a node non-terminal
        if state
            .nodes
            .iter()
            .any(|n| matches!(n.state, NodeState::Pending | NodeState::Ready))
        {
            warn!("tasks left undispatched at end of run");
            state.cancel_pending();
        }

        let overall = if cancelled {
            RunStatus::Cancelled
        } else if state.any_failed
            || state.nodes.iter().any(|n| {
                matches!(
                    n.state,
                    NodeState::Failed | NodeState::Blocked | NodeState::Cancelled
                )
            })
        {
            RunStatus::Failure
        } else {
            RunStatus::Success
        };

        let still_running: Vec<TaskId> = state
            .nodes
            .iter()
            .filter(|n| n.state == NodeState::Running)
            .map(|n| n.id.clone())
            .collect();

        let nodes: Vec<NodeReport> = graph
            .sorted()
            .iter()
            .map(|&idx| state.nodes[idx].clone())
            .collect();
        let report = ExecutionReport {
            duration: start.elapsed(),
            overall,
            persistent: PersistentTasks {
                tasks: persistent,
                ids: still_running,
            },
            nodes,
        };

        self.reporter.report(&TaskEvent::AllCompleted {
            total: report.nodes.len(),
            succeeded: report.succeeded(),
            failed: report.failed(),
            skipped: report.skipped(),
            cached: report.cached(),
            duration: report.duration,
        });
        info!(
            overall = ?report.overall,
            duration_ms = report.duration.as_millis() as u64,
            "task execution finished"
        );
        report
    }

    /// Start a ready node on a worker
    fn dispatch(
        &self,
        state: &mut RunState<'_>,
        worker: &Worker,
        idx: usize,
        permit: OwnedSemaphorePermit,
        running: &mut JoinSet<WorkerOutcome>,
        persistent: &mut JoinSet<WorkerOutcome>,
    ) {
        let graph = state.graph;
        let node = graph.node(idx);
        let command = node.command.clone().unwrap_or_default();

        state.nodes[idx].state = NodeState::Running;
        self.reporter.report(&TaskEvent::Started {
            id: node.id.clone(),
            command: command.clone(),
        });

        let cache_request = self.cache.as_ref().map(|_| CacheRequest {
            id: node.id.clone(),
            command: command.clone(),
            dir: node.dir.clone(),
            inputs: node.definition.inputs.clone(),
            outputs: node.definition.outputs.clone(),
            env: node.definition.env.clone(),
            cacheable: node.definition.is_cacheable(),
            predecessors: node
                .dependencies
                .iter()
                .map(|&dep| (graph.node(dep).id.clone(), state.upstream[dep].clone()))
                .collect(),
        });
        let launch = LaunchRequest {
            id: node.id.clone(),
            dir: node.dir.clone(),
            command,
            env: node.definition.env.clone(),
        };

        let id = node.id.clone();
        let job = worker.clone().run(idx, launch, cache_request);
        let supervised = async move {
            let _permit = permit;
            let started = Instant::now();
            let mut handle = AbortOnDrop(tokio::spawn(job));
            match (&mut handle.0).await {
                Ok(outcome) => outcome,
                Err(e) => WorkerOutcome::failed(idx, id, started.elapsed(), format!("task panicked: {}", e)),
            }
        };

        if node.definition.persistent && node.dependents.is_empty() {
            debug!(task = %node.id, "dispatching persistent task");
            persistent.spawn(supervised);
        } else {
            running.spawn(supervised);
        }
    }

    /// Let in-flight tasks finish within the grace period, then abort them
    async fn drain(
        &self,
        state: &mut RunState<'_>,
        running: &mut JoinSet<WorkerOutcome>,
        persistent: &mut JoinSet<WorkerOutcome>,
    ) {
        let deadline = tokio::time::sleep(self.options.grace_period);
        tokio::pin!(deadline);

        loop {
            if running.is_empty() && persistent.is_empty() {
                break;
            }
            tokio::select! {
                Some(joined) = running.join_next(), if !running.is_empty() => {
                    if let Ok(outcome) = joined {
                        state.complete(outcome);
                    }
                }
                Some(joined) = persistent.join_next(), if !persistent.is_empty() => {
                    if let Ok(outcome) = joined {
                        state.complete(outcome);
                    }
                }
                _ = &mut deadline => {
                    warn!(
                        in_flight = running.len() + persistent.len(),
                        "grace period elapsed, aborting tasks"
                    );
                    running.abort_all();
                    persistent.abort_all();
                    while running.join_next().await.is_some() {}
                    while persistent.join_next().await.is_some() {}
                    break;
                }
            }
        }

        state.cancel_where(|s| matches!(s, NodeState::Running));
    }
}

/// A permit, if a ready node is waiting and a worker slot is free
fn peek_permit(state: &RunState<'_>, semaphore: &Arc<Semaphore>) -> Option<OwnedSemaphorePermit> {
    if state.ready.is_empty() {
        return None;
    }
    semaphore.clone().try_acquire_owned().ok()
}
