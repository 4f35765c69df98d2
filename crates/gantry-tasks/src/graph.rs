//! Task graph construction and management

use std::collections::{HashMap, HashSet, VecDeque};
use std::path::PathBuf;

use serde::Serialize;
use tracing::{debug, info, instrument, warn};

use gantry_core::config::ROOT_TASK_PREFIX;
use gantry_core::{Workspace, WorkspaceGraph};

use crate::registry::TaskRegistry;
use crate::task::{DependencySpecifier, TaskDefinition, TaskId};

/// Binary name the root recursion guard looks for in root scripts
const ORCHESTRATOR_BIN: &str = "gantry";

/// A node in the task graph: one task in one workspace
#[derive(Debug, Clone, Serialize)]
pub struct TaskNode {
    /// Task identifier
    pub id: TaskId,
    /// The task definition that applies to this workspace
    pub definition: TaskDefinition,
    /// The workspace's script for the task, if it implements it
    pub command: Option<String>,
    /// Directory the command runs in
    pub dir: PathBuf,
    /// Completes immediately as Skipped (the workspace has no script)
    pub skippable: bool,
    /// Arena indices of the nodes that must complete first
    pub dependencies: Vec<usize>,
    /// Arena indices of the nodes waiting on this one
    pub dependents: Vec<usize>,
    /// Execution wave (nodes in the same wave have no edges between them)
    pub wave: usize,
}

/// Directed acyclic graph of tasks to execute.
///
/// Nodes live in a single arena; edges are arena indices. The graph is
/// immutable once built.
#[derive(Debug, Clone)]
pub struct TaskGraph {
    nodes: Vec<TaskNode>,
    index: HashMap<TaskId, usize>,
    sorted_order: Vec<usize>,
    waves: Vec<Vec<usize>>,
    downstream: Vec<usize>,
}

/// Expands requested task names into a [`TaskGraph`]
pub struct TaskGraphBuilder<'a> {
    workspaces: &'a WorkspaceGraph,
    registry: &'a TaskRegistry,
}

#[derive(Default)]
struct Arena {
    nodes: Vec<TaskNode>,
    index: HashMap<TaskId, usize>,
}

impl Arena {
    /// Index of the node for `definition` in `workspace`, creating it if needed
    fn ensure(
        &mut self,
        workspace: &Workspace,
        definition: &TaskDefinition,
    ) -> Result<(usize, bool), GraphError> {
        let id = TaskId::new(&workspace.name, &definition.name);
        if let Some(&idx) = self.index.get(&id) {
            return Ok((idx, false));
        }

        let command = workspace.script(&definition.name).map(str::to_string);
        // The root only ever resolves opted-in tasks, which must have a script
        if workspace.is_root && command.is_none() {
            return Err(GraphError::MissingRootScript(definition.name.clone()));
        }

        let idx = self.nodes.len();
        debug!(task = %id, skippable = command.is_none(), "adding task node");
        self.nodes.push(TaskNode {
            id: id.clone(),
            definition: definition.clone(),
            skippable: command.is_none(),
            command,
            dir: workspace.path.clone(),
            dependencies: Vec::new(),
            dependents: Vec::new(),
            wave: 0,
        });
        self.index.insert(id, idx);
        Ok((idx, true))
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mark {
    Unvisited,
    InProgress,
    Done,
}

impl<'a> TaskGraphBuilder<'a> {
    /// Create a builder over the workspace graph and resolved task registry
    pub fn new(workspaces: &'a WorkspaceGraph, registry: &'a TaskRegistry) -> Self {
        Self {
            workspaces,
            registry,
        }
    }

    /// Build the task graph for the requested task names.
    ///
    /// A requested name is either a task name, which creates a node in every
    /// workspace the task resolves for, or `//#task`, which selects only the
    /// root-scoped task.
    #[instrument(skip_all, fields(requested = ?requested))]
    pub fn build(&self, requested: &[String]) -> Result<TaskGraph, GraphError> {
        let mut arena = Arena::default();
        let mut worklist: VecDeque<usize> = VecDeque::new();

        for name in requested {
            if let Some(task) = name.strip_prefix(ROOT_TASK_PREFIX) {
                let (root, definition) = self
                    .workspaces
                    .root()
                    .zip(self.registry.root_task(task))
                    .ok_or_else(|| GraphError::UnknownTask(name.clone()))?;
                let (idx, created) = arena.ensure(root, definition)?;
                if created {
                    worklist.push_back(idx);
                }
                continue;
            }

            if !self.registry.is_known(name) {
                return Err(GraphError::UnknownTask(name.clone()));
            }
            for workspace in self.workspaces.iter() {
                if let Some(definition) = self.registry.resolve(name, workspace) {
                    let (idx, created) = arena.ensure(workspace, definition)?;
                    if created {
                        worklist.push_back(idx);
                    }
                }
            }
        }

        // Transitive closure over depends_on
        while let Some(idx) = worklist.pop_front() {
            let id = arena.nodes[idx].id.clone();
            let specs = arena.nodes[idx].definition.depends_on.clone();
            let Some(workspace) = self.workspaces.workspace(&id.workspace) else {
                continue;
            };

            let mut dependencies = Vec::new();
            for spec in &specs {
                for (target, definition) in self.expand(spec, workspace, &id)? {
                    let (dep_idx, created) = arena.ensure(target, definition)?;
                    if created {
                        worklist.push_back(dep_idx);
                    }
                    if !dependencies.contains(&dep_idx) {
                        dependencies.push(dep_idx);
                    }
                }
            }
            arena.nodes[idx].dependencies = dependencies;
        }

        let graph = TaskGraph::from_nodes(arena.nodes)?;

        for node in graph.nodes.iter().filter(|n| n.id.is_root()) {
            if let Some(command) = &node.command {
                if invokes_itself(command, &node.id.task) {
                    return Err(GraphError::IllegalRootRecursion {
                        task: node.id.task.clone(),
                        cycle: vec![node.id.clone(), node.id.clone()],
                    });
                }
            }
        }

        for node in &graph.nodes {
            for &dep in &node.dependencies {
                if graph.nodes[dep].definition.persistent {
                    warn!(
                        task = %node.id,
                        dependency = %graph.nodes[dep].id,
                        "task depends on a persistent task, which never completes"
                    );
                }
            }
        }

        info!(
            task_count = graph.len(),
            wave_count = graph.waves.len(),
            "task graph built"
        );
        Ok(graph)
    }

    /// Workspaces and definitions a dependency specifier points at
    fn expand(
        &self,
        spec: &DependencySpecifier,
        workspace: &'a Workspace,
        from: &TaskId,
    ) -> Result<Vec<(&'a Workspace, &'a TaskDefinition)>, GraphError> {
        let targets: Vec<(&'a Workspace, &'a TaskDefinition)> = match spec {
            DependencySpecifier::SameWorkspace(task) => self
                .registry
                .resolve(task, workspace)
                .map(|definition| (workspace, definition))
                .into_iter()
                .collect(),
            DependencySpecifier::Topological(task) => self
                .workspaces
                .dependencies(&workspace.name)
                .iter()
                .filter_map(|name| self.workspaces.workspace(name))
                .filter_map(|dep| self.registry.resolve(task, dep).map(|d| (dep, d)))
                .collect(),
            DependencySpecifier::RootScoped(task) => {
                let missing = || GraphError::MissingRootTask {
                    task: task.clone(),
                    referenced_by: from.clone(),
                };
                let definition = self.registry.root_task(task).ok_or_else(missing)?;
                let root = self.workspaces.root().ok_or_else(missing)?;
                vec![(root, definition)]
            }
        };

        if targets.is_empty() {
            debug!(task = %from, dependency = %spec, "dependency resolves nowhere, dropped");
        }
        Ok(targets)
    }
}

impl TaskGraph {
    /// Wire reverse edges, check for cycles and compute orderings
    fn from_nodes(mut nodes: Vec<TaskNode>) -> Result<Self, GraphError> {
        for node in &mut nodes {
            node.dependents.clear();
        }
        for idx in 0..nodes.len() {
            for dep in nodes[idx].dependencies.clone() {
                nodes[dep].dependents.push(idx);
            }
        }

        if let Some(cycle) = find_cycle(&nodes) {
            let cycle: Vec<TaskId> = cycle.into_iter().map(|i| nodes[i].id.clone()).collect();
            if let Some(root) = cycle.iter().find(|id| id.is_root()) {
                return Err(GraphError::IllegalRootRecursion {
                    task: root.task.clone(),
                    cycle,
                });
            }
            return Err(GraphError::CyclicDependency { cycle });
        }

        let sorted_order = topological_sort(&nodes);
        let waves = compute_waves(&nodes, &sorted_order);
        for (wave_idx, wave) in waves.iter().enumerate() {
            for &idx in wave {
                nodes[idx].wave = wave_idx;
            }
        }
        let downstream = (0..nodes.len())
            .map(|idx| transitive(&nodes, idx, |n| &n.dependents).len())
            .collect();
        let index = nodes
            .iter()
            .enumerate()
            .map(|(idx, node)| (node.id.clone(), idx))
            .collect();

        Ok(Self {
            nodes,
            index,
            sorted_order,
            waves,
            downstream,
        })
    }

    /// Restrict the graph to tasks in the given workspaces, plus everything they need
    pub fn filtered(&self, workspaces: &[String]) -> Result<Self, GraphError> {
        let mut keep: HashSet<usize> = HashSet::new();
        for (idx, node) in self.nodes.iter().enumerate() {
            if workspaces.contains(&node.id.workspace) {
                keep.insert(idx);
                keep.extend(transitive(&self.nodes, idx, |n| &n.dependencies));
            }
        }

        let mut remap: HashMap<usize, usize> = HashMap::new();
        let mut nodes = Vec::with_capacity(keep.len());
        for (idx, node) in self.nodes.iter().enumerate() {
            if keep.contains(&idx) {
                remap.insert(idx, nodes.len());
                nodes.push(node.clone());
            }
        }
        for node in &mut nodes {
            node.dependencies = node
                .dependencies
                .iter()
                .filter_map(|dep| remap.get(dep).copied())
                .collect();
        }

        Self::from_nodes(nodes)
    }

    /// All nodes, in arena order
    pub fn nodes(&self) -> &[TaskNode] {
        &self.nodes
    }

    /// Node at an arena index
    pub fn node(&self, idx: usize) -> &TaskNode {
        &self.nodes[idx]
    }

    /// Get a node by task ID
    pub fn get(&self, id: &TaskId) -> Option<&TaskNode> {
        self.index.get(id).map(|&idx| &self.nodes[idx])
    }

    /// Arena index of a task
    pub fn index_of(&self, id: &TaskId) -> Option<usize> {
        self.index.get(id).copied()
    }

    /// Whether `id` is a (direct or transitive) predecessor of `of`
    pub fn is_predecessor(&self, id: &TaskId, of: &TaskId) -> bool {
        match (self.index_of(id), self.index_of(of)) {
            (Some(a), Some(b)) => transitive(&self.nodes, b, |n| &n.dependencies).contains(&a),
            _ => false,
        }
    }

    /// Number of nodes transitively waiting on a node
    pub fn downstream_count(&self, idx: usize) -> usize {
        self.downstream[idx]
    }

    /// Arena indices in topological order (dependencies first)
    pub fn sorted(&self) -> &[usize] {
        &self.sorted_order
    }

    /// Execution waves of arena indices
    pub fn waves(&self) -> &[Vec<usize>] {
        &self.waves
    }

    /// Number of persistent nodes
    pub fn persistent_count(&self) -> usize {
        self.nodes
            .iter()
            .filter(|n| n.definition.persistent && !n.skippable)
            .count()
    }

    /// Total number of nodes
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Whether the graph has no nodes
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Human-readable summary of the execution plan
    pub fn execution_plan(&self) -> String {
        let mut plan = String::new();
        for (i, wave) in self.waves.iter().enumerate() {
            plan.push_str(&format!("Wave {} ({} tasks):\n", i, wave.len()));
            for &idx in wave {
                let node = &self.nodes[idx];
                let cmd = node.command.as_deref().unwrap_or("<skipped: no script>");
                let deps: Vec<String> = node
                    .dependencies
                    .iter()
                    .map(|&d| self.nodes[d].id.to_string())
                    .collect();
                if deps.is_empty() {
                    plan.push_str(&format!("  {} -> {}\n", node.id, cmd));
                } else {
                    plan.push_str(&format!(
                        "  {} -> {} (after: {})\n",
                        node.id,
                        cmd,
                        deps.join(", ")
                    ));
                }
            }
        }
        plan
    }
}

/// Depth-first search with colouring; returns the closed cycle path
fn find_cycle(nodes: &[TaskNode]) -> Option<Vec<usize>> {
    fn visit(
        idx: usize,
        nodes: &[TaskNode],
        marks: &mut [Mark],
        stack: &mut Vec<usize>,
    ) -> Option<Vec<usize>> {
        marks[idx] = Mark::InProgress;
        stack.push(idx);

        for &dep in &nodes[idx].dependencies {
            match marks[dep] {
                Mark::InProgress => {
                    let start = stack.iter().position(|&n| n == dep).unwrap_or(0);
                    let mut cycle = stack[start..].to_vec();
                    cycle.push(dep);
                    return Some(cycle);
                }
                Mark::Unvisited => {
                    if let Some(cycle) = visit(dep, nodes, marks, stack) {
                        return Some(cycle);
                    }
                }
                Mark::Done => {}
            }
        }

        stack.pop();
        marks[idx] = Mark::Done;
        None
    }

    let mut marks = vec![Mark::Unvisited; nodes.len()];
    let mut stack = Vec::new();
    for idx in 0..nodes.len() {
        if marks[idx] == Mark::Unvisited {
            if let Some(cycle) = visit(idx, nodes, &mut marks, &mut stack) {
                return Some(cycle);
            }
        }
    }
    None
}

/// Kahn's algorithm, seeded in arena order
fn topological_sort(nodes: &[TaskNode]) -> Vec<usize> {
    let mut in_degree: Vec<usize> = nodes.iter().map(|n| n.dependencies.len()).collect();
    let mut queue: VecDeque<usize> = (0..nodes.len()).filter(|&i| in_degree[i] == 0).collect();
    let mut sorted = Vec::with_capacity(nodes.len());

    while let Some(idx) = queue.pop_front() {
        sorted.push(idx);
        for &dependent in &nodes[idx].dependents {
            in_degree[dependent] = in_degree[dependent].saturating_sub(1);
            if in_degree[dependent] == 0 {
                queue.push_back(dependent);
            }
        }
    }

    sorted
}

/// Group nodes into waves: each node sits one past its deepest dependency
fn compute_waves(nodes: &[TaskNode], sorted: &[usize]) -> Vec<Vec<usize>> {
    let mut wave_of = vec![0usize; nodes.len()];
    for &idx in sorted {
        wave_of[idx] = nodes[idx]
            .dependencies
            .iter()
            .map(|&dep| wave_of[dep] + 1)
            .max()
            .unwrap_or(0);
    }

    let max_wave = wave_of.iter().max().copied().unwrap_or(0);
    let mut waves: Vec<Vec<usize>> = vec![Vec::new(); if nodes.is_empty() { 0 } else { max_wave + 1 }];
    for &idx in sorted {
        waves[wave_of[idx]].push(idx);
    }
    waves
}

/// Every node reachable from `start` along `edges`, excluding `start` itself
fn transitive<F>(nodes: &[TaskNode], start: usize, edges: F) -> HashSet<usize>
where
    F: Fn(&TaskNode) -> &Vec<usize>,
{
    let mut seen = HashSet::new();
    let mut queue = VecDeque::from([start]);
    while let Some(idx) = queue.pop_front() {
        for &next in edges(&nodes[idx]) {
            if seen.insert(next) {
                queue.push_back(next);
            }
        }
    }
    seen.remove(&start);
    seen
}

/// Static check for a root script that runs the orchestrator on its own task.
///
/// Only catches a direct `gantry [flags] run ... <task>` invocation in the
/// script text; recursion through other scripts, aliases or shell
/// indirection is not visible here.
fn invokes_itself(command: &str, task: &str) -> bool {
    let root_form = format!("{}{}", ROOT_TASK_PREFIX, task);
    command
        .split(['&', '|', ';', '\n'])
        .any(|segment| {
            let mut words = segment.split_whitespace();
            let found = words
                .by_ref()
                .any(|w| w.rsplit('/').next() == Some(ORCHESTRATOR_BIN));
            if !found {
                return false;
            }
            let mut rest = words.skip_while(|w| w.starts_with('-'));
            if rest.next() != Some("run") {
                return false;
            }
            rest.take_while(|w| *w != "--")
                .any(|w| w == task || w == root_form)
        })
}

fn format_cycle(cycle: &[TaskId]) -> String {
    cycle
        .iter()
        .map(|id| id.to_string())
        .collect::<Vec<_>>()
        .join(" -> ")
}

/// Errors during task graph construction
#[derive(Debug, thiserror::Error)]
pub enum GraphError {
    /// A requested task has no definition anywhere
    #[error("Task '{0}' not found in pipeline configuration")]
    UnknownTask(String),

    /// A `//#task` dependency names a root task that is not defined
    #[error("Task '{referenced_by}' depends on root task '//#{task}', which is not defined")]
    MissingRootTask { task: String, referenced_by: TaskId },

    /// A root task is opted in but the root manifest has no script for it
    #[error("Root task '//#{0}' is defined but the root package has no '{0}' script")]
    MissingRootScript(String),

    /// The task dependency relation contains a cycle
    #[error("Cyclic task dependency: {}", format_cycle(.cycle))]
    CyclicDependency { cycle: Vec<TaskId> },

    /// A root task depends on or invokes itself
    #[error("Root task '//#{task}' recursively depends on itself: {}", format_cycle(.cycle))]
    IllegalRootRecursion { task: String, cycle: Vec<TaskId> },
}

impl GraphError {
    /// Cycles and recursion, as opposed to configuration mistakes
    pub fn is_structural(&self) -> bool {
        matches!(
            self,
            Self::CyclicDependency { .. } | Self::IllegalRootRecursion { .. }
        )
    }
}
