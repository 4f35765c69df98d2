//! Dependency graph for monorepo workspaces

use std::collections::{HashMap, HashSet, VecDeque};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Result, WorkspaceError};

use super::workspace::Workspace;

/// A node in the workspace dependency graph
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkspaceNode {
    /// The workspace itself
    pub workspace: Workspace,
    /// Workspaces this workspace depends on (known workspaces only, declaration order)
    pub dependencies: Vec<String>,
    /// Workspaces that depend on this workspace
    pub dependents: Vec<String>,
    /// Depth in the dependency tree (0 = no dependencies)
    pub depth: usize,
}

/// Dependency graph for workspaces
#[derive(Debug, Clone)]
pub struct WorkspaceGraph {
    /// Nodes indexed by workspace name
    nodes: HashMap<String, WorkspaceNode>,
    /// Workspace names in input order
    order: Vec<String>,
    /// Topologically sorted order (dependencies before dependents)
    sorted_order: Vec<String>,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mark {
    Unvisited,
    InProgress,
    Done,
}

impl WorkspaceGraph {
    /// Build a dependency graph, failing on duplicate names or dependency cycles
    pub fn build(workspaces: &[Workspace]) -> Result<Self> {
        let mut nodes: HashMap<String, WorkspaceNode> = HashMap::new();
        let mut order = Vec::with_capacity(workspaces.len());

        for ws in workspaces {
            if nodes.contains_key(&ws.name) {
                return Err(WorkspaceError::DuplicateName(ws.name.clone()).into());
            }
            order.push(ws.name.clone());
            nodes.insert(
                ws.name.clone(),
                WorkspaceNode {
                    workspace: ws.clone(),
                    dependencies: Vec::new(),
                    dependents: Vec::new(),
                    depth: 0,
                },
            );
        }

        // Resolve declared dependencies against known workspaces
        for ws in workspaces {
            let mut deps = Vec::new();
            for dep in &ws.dependencies {
                if !nodes.contains_key(dep) {
                    debug!(workspace = %ws.name, dependency = %dep, "ignoring non-workspace dependency");
                    continue;
                }
                if !deps.contains(dep) {
                    deps.push(dep.clone());
                }
            }
            for dep in &deps {
                if let Some(dep_node) = nodes.get_mut(dep) {
                    dep_node.dependents.push(ws.name.clone());
                }
            }
            if let Some(node) = nodes.get_mut(&ws.name) {
                node.dependencies = deps;
            }
        }

        if let Some(cycle) = Self::find_cycle(&nodes, &order) {
            return Err(WorkspaceError::CyclicDependency { cycle }.into());
        }

        let sorted_order = Self::topological_sort(&nodes, &order);

        // Calculate depths
        for name in &sorted_order {
            let depth = nodes
                .get(name)
                .map(|node| {
                    node.dependencies
                        .iter()
                        .filter_map(|dep| nodes.get(dep))
                        .map(|n| n.depth + 1)
                        .max()
                        .unwrap_or(0)
                })
                .unwrap_or(0);
            if let Some(node) = nodes.get_mut(name) {
                node.depth = depth;
            }
        }

        debug!(workspaces = order.len(), "workspace graph built");
        Ok(Self {
            nodes,
            order,
            sorted_order,
        })
    }

    /// Depth-first search for a dependency cycle; returns the closed path
    fn find_cycle(nodes: &HashMap<String, WorkspaceNode>, order: &[String]) -> Option<Vec<String>> {
        fn visit(
            name: &str,
            nodes: &HashMap<String, WorkspaceNode>,
            marks: &mut HashMap<String, Mark>,
            stack: &mut Vec<String>,
        ) -> Option<Vec<String>> {
            marks.insert(name.to_string(), Mark::InProgress);
            stack.push(name.to_string());

            if let Some(node) = nodes.get(name) {
                for dep in &node.dependencies {
                    match marks.get(dep).copied().unwrap_or(Mark::Unvisited) {
                        Mark::InProgress => {
                            let start = stack.iter().position(|n| n == dep).unwrap_or(0);
                            let mut cycle = stack[start..].to_vec();
                            cycle.push(dep.clone());
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
            }

            stack.pop();
            marks.insert(name.to_string(), Mark::Done);
            None
        }

        let mut marks: HashMap<String, Mark> = HashMap::new();
        let mut stack = Vec::new();
        for name in order {
            if marks.get(name).copied().unwrap_or(Mark::Unvisited) == Mark::Unvisited {
                if let Some(cycle) = visit(name, nodes, &mut marks, &mut stack) {
                    return Some(cycle);
                }
            }
        }
        None
    }

    /// Topological sort using Kahn's algorithm, seeded in input order
    fn topological_sort(nodes: &HashMap<String, WorkspaceNode>, order: &[String]) -> Vec<String> {
        let mut in_degree: HashMap<&str, usize> = HashMap::new();
        let mut queue: VecDeque<&str> = VecDeque::new();
        let mut sorted: Vec<String> = Vec::with_capacity(order.len());

        for name in order {
            let degree = nodes.get(name).map(|n| n.dependencies.len()).unwrap_or(0);
            in_degree.insert(name.as_str(), degree);
            if degree == 0 {
                queue.push_back(name.as_str());
            }
        }

        while let Some(name) = queue.pop_front() {
            sorted.push(name.to_string());

            if let Some(node) = nodes.get(name) {
                for dependent in &node.dependents {
                    if let Some(degree) = in_degree.get_mut(dependent.as_str()) {
                        *degree = degree.saturating_sub(1);
                        if *degree == 0 {
                            queue.push_back(dependent.as_str());
                        }
                    }
                }
            }
        }

        sorted
    }

    /// Get workspaces in topologically sorted order (dependencies first)
    pub fn sorted(&self) -> &[String] {
        &self.sorted_order
    }

    /// Iterate workspaces in input order
    pub fn iter(&self) -> impl Iterator<Item = &Workspace> {
        self.order
            .iter()
            .filter_map(|name| self.nodes.get(name))
            .map(|node| &node.workspace)
    }

    /// Number of workspaces
    pub fn len(&self) -> usize {
        self.order.len()
    }

    /// Whether the graph has no workspaces
    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Get a workspace node
    pub fn get(&self, name: &str) -> Option<&WorkspaceNode> {
        self.nodes.get(name)
    }

    /// Get a workspace by name
    pub fn workspace(&self, name: &str) -> Option<&Workspace> {
        self.nodes.get(name).map(|node| &node.workspace)
    }

    /// The repository root workspace, if present
    pub fn root(&self) -> Option<&Workspace> {
        self.iter().find(|ws| ws.is_root)
    }

    /// Direct dependencies of a workspace, in declaration order
    pub fn dependencies(&self, name: &str) -> &[String] {
        self.nodes
            .get(name)
            .map(|n| n.dependencies.as_slice())
            .unwrap_or_default()
    }

    /// Direct dependents of a workspace
    pub fn dependents(&self, name: &str) -> &[String] {
        self.nodes
            .get(name)
            .map(|n| n.dependents.as_slice())
            .unwrap_or_default()
    }

    /// All workspaces reachable via dependency edges from the given workspace
    pub fn all_dependencies(&self, name: &str) -> HashSet<String> {
        let mut deps = HashSet::new();
        let mut queue: VecDeque<&str> = VecDeque::new();
        queue.push_back(name);

        while let Some(current) = queue.pop_front() {
            for dep in self.dependencies(current) {
                if deps.insert(dep.clone()) {
                    queue.push_back(dep.as_str());
                }
            }
        }

        deps
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::GantryError;

    fn create_workspaces() -> Vec<Workspace> {
        vec![
            Workspace::root("/repo"),
            Workspace::new("web", "/repo/apps/web").with_dependency("shared"),
            Workspace::new("docs", "/repo/apps/docs")
                .with_dependency("shared")
                .with_dependency("react"),
            Workspace::new("shared", "/repo/packages/shared"),
        ]
    }

    #[test]
    fn test_build_graph() {
        let graph = WorkspaceGraph::build(&create_workspaces()).unwrap();
        assert_eq!(graph.len(), 4);
        assert_eq!(graph.root().unwrap().name, "//");
    }

    #[test]
    fn test_unknown_dependencies_ignored() {
        let graph = WorkspaceGraph::build(&create_workspaces()).unwrap();
        assert_eq!(graph.dependencies("docs"), &["shared".to_string()]);
    }

    #[test]
    fn test_topological_order() {
        let graph = WorkspaceGraph::build(&create_workspaces()).unwrap();
        let sorted = graph.sorted();

        let shared_pos = sorted.iter().position(|n| n == "shared").unwrap();
        let web_pos = sorted.iter().position(|n| n == "web").unwrap();
        let docs_pos = sorted.iter().position(|n| n == "docs").unwrap();

        assert!(shared_pos < web_pos);
        assert!(shared_pos < docs_pos);
        assert_eq!(sorted.len(), 4);
    }

    #[test]
    fn test_dependents_and_reachability() {
        let workspaces = vec![
            Workspace::new("core", "core"),
            Workspace::new("utils", "utils").with_dependency("core"),
            Workspace::new("cli", "cli").with_dependency("utils"),
        ];
        let graph = WorkspaceGraph::build(&workspaces).unwrap();

        assert_eq!(graph.dependents("core"), &["utils".to_string()]);

        let reachable = graph.all_dependencies("cli");
        assert!(reachable.contains("utils"));
        assert!(reachable.contains("core"));
        assert_eq!(reachable.len(), 2);
    }

    #[test]
    fn test_depth_calculation() {
        let workspaces = vec![
            Workspace::new("core", "core"),
            Workspace::new("utils", "utils").with_dependency("core"),
            Workspace::new("cli", "cli")
                .with_dependency("core")
                .with_dependency("utils"),
        ];
        let graph = WorkspaceGraph::build(&workspaces).unwrap();

        assert_eq!(graph.get("core").unwrap().depth, 0);
        assert_eq!(graph.get("utils").unwrap().depth, 1);
        assert_eq!(graph.get("cli").unwrap().depth, 2);
    }

    #[test]
    fn test_cycle_detection_reports_path() {
        let workspaces = vec![
            Workspace::new("a", "a").with_dependency("b"),
            Workspace::new("b", "b").with_dependency("c"),
            Workspace::new("c", "c").with_dependency("a"),
        ];

        match WorkspaceGraph::build(&workspaces) {
            Err(GantryError::Workspace(WorkspaceError::CyclicDependency { cycle })) => {
                assert_eq!(cycle, vec!["a", "b", "c", "a"]);
            }
            other => panic!("expected cycle error, got {:?}", other),
        }
    }

    #[test]
    fn test_self_dependency_is_cycle() {
        let workspaces = vec![Workspace::new("a", "a").with_dependency("a")];
        assert!(WorkspaceGraph::build(&workspaces).is_err());
    }

    #[test]
    fn test_duplicate_name() {
        let workspaces = vec![Workspace::new("a", "a"), Workspace::new("a", "b")];
        assert!(matches!(
            WorkspaceGraph::build(&workspaces),
            Err(GantryError::Workspace(WorkspaceError::DuplicateName(_)))
        ));
    }
}
