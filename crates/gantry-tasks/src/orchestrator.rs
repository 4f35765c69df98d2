//! Orchestrator: configuration and workspaces in, execution report out

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use gantry_core::config::{default_concurrency, TasksConfig, DEFAULT_GRACE_PERIOD_SECS};
use gantry_core::{Config, GantryError, WorkspaceDiscovery, WorkspaceGraph};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument};

use crate::cache::{CacheGate, CacheStore, FsCacheStore};
use crate::graph::{GraphError, TaskGraph, TaskGraphBuilder};
use crate::launcher::{ProcessLauncher, ShellLauncher};
use crate::registry::TaskRegistry;
use crate::report::ExecutionReport;
use crate::reporter::{TaskReporter, TracingReporter};
use crate::scheduler::{Scheduler, SchedulerOptions};
use crate::task::DefinitionError;

/// Options for one invocation of [`Orchestrator::run_tasks`]
#[derive(Debug, Clone)]
pub struct RunOptions {
    /// Maximum concurrently running tasks
    pub concurrency: usize,
    /// Cancel pending tasks after the first failure
    pub fail_fast: bool,
    /// How long in-flight tasks may keep running after cancellation
    pub grace_period: Duration,
    /// Only run tasks in these workspaces (plus what they depend on)
    pub filter: Vec<String>,
    /// Cancelling this token interrupts the run
    pub cancel: CancellationToken,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            fail_fast: false,
            grace_period: Duration::from_secs(DEFAULT_GRACE_PERIOD_SECS),
            filter: Vec::new(),
            cancel: CancellationToken::new(),
        }
    }
}

impl RunOptions {
    /// Options from the `[tasks]` section of the configuration
    pub fn from_config(tasks: &TasksConfig) -> Self {
        Self {
            concurrency: tasks.concurrency,
            fail_fast: tasks.fail_fast,
            grace_period: Duration::from_secs(tasks.grace_period_secs),
            ..Self::default()
        }
    }

    /// Interrupt the run when this token is cancelled
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }
}

/// Ties the workspace model, task registry, scheduler and cache together
pub struct Orchestrator {
    workspaces: WorkspaceGraph,
    registry: TaskRegistry,
    launcher: Arc<dyn ProcessLauncher>,
    cache: Option<CacheGate>,
    reporter: Arc<dyn TaskReporter>,
}

impl Orchestrator {
    /// Orchestrator running commands through the shell, without a cache
    pub fn new(workspaces: WorkspaceGraph, registry: TaskRegistry) -> Self {
        Self {
            workspaces,
            registry,
            launcher: Arc::new(ShellLauncher),
            cache: None,
            reporter: Arc::new(TracingReporter),
        }
    }

    /// Discover the workspaces under `root` and resolve the configured pipeline.
    ///
    /// Caching uses an [`FsCacheStore`] in the configured cache directory when
    /// enabled.
    #[instrument(skip(config), fields(root = %root.display()))]
    pub fn load(root: &Path, config: &Config) -> Result<Self, RunError> {
        let discovered = WorkspaceDiscovery::new(root).discover()?;
        let workspaces = WorkspaceGraph::build(&discovered)?;
        let registry = TaskRegistry::from_pipeline(&config.pipeline)?;

        let mut orchestrator = Self::new(workspaces, registry);
        if config.tasks.cache.enabled {
            let cache_dir = root.join(&config.tasks.cache.dir);
            let store = Arc::new(FsCacheStore::new(cache_dir.clone()));
            orchestrator.cache = Some(cache_gate(store, &cache_dir, &orchestrator.workspaces));
        }
        info!(
            workspaces = orchestrator.workspaces.len(),
            cache = orchestrator.cache.is_some(),
            "orchestrator ready"
        );
        Ok(orchestrator)
    }

    /// Use a different process launcher
    pub fn with_launcher(mut self, launcher: Arc<dyn ProcessLauncher>) -> Self {
        self.launcher = launcher;
        self
    }

    /// Use (or, with `None`, disable) a cache gate
    pub fn with_cache(mut self, cache: Option<CacheGate>) -> Self {
        self.cache = cache;
        self
    }

    /// Send task events to this reporter
    pub fn with_reporter(mut self, reporter: Arc<dyn TaskReporter>) -> Self {
        self.reporter = reporter;
        self
    }

    pub fn workspaces(&self) -> &WorkspaceGraph {
        &self.workspaces
    }

    pub fn registry(&self) -> &TaskRegistry {
        &self.registry
    }

    /// Whether task results are cached
    pub fn is_caching(&self) -> bool {
        self.cache.is_some()
    }

    /// Build the task graph without running anything
    pub fn plan(&self, requested: &[String], filter: &[String]) -> Result<TaskGraph, RunError> {
        let graph = TaskGraphBuilder::new(&self.workspaces, &self.registry).build(requested)?;
        if filter.is_empty() {
            return Ok(graph);
        }

        if let Some(unknown) = filter.iter().find(|ws| self.workspaces.workspace(ws).is_none()) {
            return Err(RunError::UnknownWorkspace(unknown.clone()));
        }
        let filtered = graph.filtered(filter)?;
        debug!(before = graph.len(), after = filtered.len(), "applied workspace filter");
        Ok(filtered)
    }

    /// Build the graph for the requested tasks and execute it
    pub async fn run_tasks(
        &self,
        requested: &[String],
        options: RunOptions,
    ) -> Result<ExecutionReport, RunError> {
        let graph = self.plan(requested, &options.filter)?;
        self.run_graph(&graph, options).await
    }

    /// Execute an already-built graph
    pub async fn run_graph(
        &self,
        graph: &TaskGraph,
        options: RunOptions,
    ) -> Result<ExecutionReport, RunError> {
        let concurrency = options.concurrency.max(1);
        let persistent = graph.persistent_count();
        if persistent > 0 && concurrency <= persistent {
            return Err(RunError::InsufficientConcurrency {
                concurrency,
                persistent,
            });
        }

        let scheduler = Scheduler::new(
            SchedulerOptions {
                concurrency,
                fail_fast: options.fail_fast,
                grace_period: options.grace_period,
            },
            self.launcher.clone(),
            self.cache.clone(),
            self.reporter.clone(),
        )
        .with_cancellation(options.cancel);

        Ok(scheduler.run(graph).await)
    }
}

/// A cache gate that leaves the cache directory and nested workspaces out of
/// every node's input set
pub fn cache_gate(store: Arc<dyn CacheStore>, cache_dir: &Path, workspaces: &WorkspaceGraph) -> CacheGate {
    let mut excluded: Vec<PathBuf> = vec![cache_dir.to_path_buf()];
    excluded.extend(
        workspaces
            .iter()
            .filter(|ws| !ws.is_root)
            .map(|ws| ws.path.clone()),
    );
    CacheGate::new(store).with_excluded_dirs(excluded)
}

/// Errors preparing a run
#[derive(Debug, thiserror::Error)]
pub enum RunError {
    /// The pipeline configuration is invalid
    #[error(transparent)]
    Definition(#[from] DefinitionError),

    /// Workspace discovery or the workspace graph failed
    #[error(transparent)]
    Workspace(#[from] GantryError),

    /// The task graph could not be built
    #[error(transparent)]
    Graph(#[from] GraphError),

    /// A workspace filter names no workspace
    #[error("Unknown workspace '{0}' in filter")]
    UnknownWorkspace(String),

    /// Persistent tasks would occupy every worker slot
    #[error(
        "Concurrency {concurrency} is too low for {persistent} persistent task(s); \
         it must be greater than the number of persistent tasks"
    )]
    InsufficientConcurrency { concurrency: usize, persistent: usize },
}

impl RunError {
    /// Whether the error is a dependency cycle or illegal recursion
    pub fn is_structural(&self) -> bool {
        match self {
            Self::Graph(e) => e.is_structural(),
            Self::Workspace(GantryError::Workspace(e)) => {
                matches!(e, gantry_core::WorkspaceError::CyclicDependency { .. })
            }
            _ => false,
        }
    }
}
