//! Graph command: show the execution plan without running anything

use clap::Args;
use tracing::info;

use gantry_tasks::{Orchestrator, TaskGraph};

use crate::cli::output;
use crate::cli::{Cli, OutputFormat};
use crate::exit_codes;

use super::load_project;

/// Show the execution plan for tasks
#[derive(Debug, Args)]
pub struct GraphCommand {
    /// Tasks to plan
    #[arg(required = true)]
    pub tasks: Vec<String>,

    /// Only include tasks in these workspaces and what they depend on
    #[arg(long)]
    pub filter: Vec<String>,
}

impl GraphCommand {
    pub fn execute(&self, cli: &Cli) -> anyhow::Result<i32> {
        info!(tasks = ?self.tasks, "executing graph command");
        let (config, root) = load_project()?;
        let orchestrator = Orchestrator::load(&root, &config)?;
        let graph = orchestrator.plan(&self.tasks, &self.filter)?;

        if cli.format == OutputFormat::Json {
            println!("{}", serde_json::to_string_pretty(&plan_json(&graph))?);
        } else if !cli.quiet {
            println!("{}", output::header("Execution plan"));
            println!();
            if graph.is_empty() {
                output::info("No tasks match.");
            } else {
                print!("{}", graph.execution_plan());
                println!();
                println!(
                    "{}",
                    output::key_value("Tasks", &graph.len().to_string())
                );
                println!(
                    "{}",
                    output::key_value("Waves", &graph.waves().len().to_string())
                );
            }
        }

        Ok(exit_codes::SUCCESS)
    }
}

/// Waves and nodes as JSON
pub(super) fn plan_json(graph: &TaskGraph) -> serde_json::Value {
    let waves: Vec<serde_json::Value> = graph
        .waves()
        .iter()
        .enumerate()
        .map(|(i, wave)| {
            serde_json::json!({
                "wave": i,
                "tasks": wave.iter().map(|&idx| graph.node(idx).id.to_string()).collect::<Vec<_>>(),
            })
        })
        .collect();

    let nodes: Vec<serde_json::Value> = graph
        .sorted()
        .iter()
        .map(|&idx| {
            let node = graph.node(idx);
            serde_json::json!({
                "id": node.id.to_string(),
                "command": node.command,
                "skipped": node.skippable,
                "persistent": node.definition.persistent,
                "dependencies": node
                    .dependencies
                    .iter()
                    .map(|&d| graph.node(d).id.to_string())
                    .collect::<Vec<_>>(),
            })
        })
        .collect();

    serde_json::json!({ "waves": waves, "tasks": nodes })
}

#[cfg(test)]
mod tests {
    use super::*;
    use gantry_core::{Workspace, WorkspaceGraph};
    use gantry_tasks::{DependencySpecifier, TaskDefinition, TaskGraphBuilder, TaskRegistry};

    #[test]
    fn test_plan_json() {
        let workspaces = WorkspaceGraph::build(&[
            Workspace::root("/repo"),
            Workspace::new("web", "/repo/web")
                .with_dependency("ui")
                .with_script("build", "vite build"),
            Workspace::new("ui", "/repo/ui"),
        ])
        .unwrap();
        let registry = TaskRegistry::new().with_task(
            TaskDefinition::new("build").with_depends_on(DependencySpecifier::Topological("build".into())),
        );
        let graph = TaskGraphBuilder::new(&workspaces, &registry)
            .build(&["build".to_string()])
            .unwrap();

        let json = plan_json(&graph);
        assert_eq!(json["waves"][0]["tasks"][0], "ui#build");
        assert_eq!(json["waves"][1]["tasks"][0], "web#build");
        assert_eq!(json["tasks"][0]["skipped"], true);
        assert_eq!(json["tasks"][1]["dependencies"][0], "ui#build");
        assert_eq!(json["tasks"][1]["command"], "vite build");
    }
}
