//! Run command: execute tasks across the workspaces

use std::sync::Arc;

use clap::Args;
use console::style;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use gantry_tasks::{
    ExecutionReport, NodeState, Orchestrator, RunOptions, TaskEvent, TaskReporter, TracingReporter,
};

use crate::cli::output;
use crate::cli::{Cli, OutputFormat};
use crate::exit_codes;

use super::load_project;

/// Run tasks across the workspaces
#[derive(Debug, Args)]
pub struct RunCommand {
    /// Tasks to run (e.g., build test //#check)
    #[arg(required = true)]
    pub tasks: Vec<String>,

    /// Only run tasks in these workspaces and what they depend on (can be repeated)
    #[arg(long)]
    pub filter: Vec<String>,

    /// Maximum concurrent tasks
    #[arg(long)]
    pub concurrency: Option<usize>,

    /// Cancel pending tasks as soon as one fails
    #[arg(long)]
    pub fail_fast: bool,

    /// Show execution plan without running
    #[arg(long)]
    pub dry_run: bool,

    /// Disable task cache
    #[arg(long)]
    pub no_cache: bool,
}

impl RunCommand {
    pub fn execute(&self, cli: &Cli) -> anyhow::Result<i32> {
        let runtime = tokio::runtime::Runtime::new()?;
        runtime.block_on(self.execute_async(cli))
    }

    async fn execute_async(&self, cli: &Cli) -> anyhow::Result<i32> {
        let (mut config, root) = load_project()?;
        if self.no_cache {
            config.tasks.cache.enabled = false;
        }

        let reporter: Arc<dyn TaskReporter> = if cli.is_interactive_text() {
            Arc::new(ConsoleReporter::new(cli.verbose))
        } else {
            Arc::new(TracingReporter)
        };
        let orchestrator = Orchestrator::load(&root, &config)?.with_reporter(reporter);
        let graph = orchestrator.plan(&self.tasks, &self.filter)?;

        if graph.is_empty() {
            if cli.is_interactive_text() {
                output::success("No tasks to run.");
            }
            return Ok(exit_codes::SUCCESS);
        }

        if cli.is_interactive_text() {
            println!();
            output::info(&format!(
                "{} across {}",
                output::plural(graph.len(), "task"),
                output::plural(orchestrator.workspaces().len(), "workspace"),
            ));

            if cli.verbose || self.dry_run {
                println!();
                println!("{}", graph.execution_plan());
            }

            if self.dry_run {
                println!("{}", style("[DRY RUN - no tasks will be executed]").yellow().bold());
                return Ok(exit_codes::SUCCESS);
            }

            println!();
        }

        if self.dry_run {
            if cli.format == OutputFormat::Json {
                println!("{}", serde_json::to_string_pretty(&super::graph::plan_json(&graph))?);
            }
            return Ok(exit_codes::SUCCESS);
        }

        let cancel = CancellationToken::new();
        let interrupt = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("interrupt received");
                interrupt.cancel();
            }
        });

        let mut options = RunOptions::from_config(&config.tasks).with_cancellation(cancel.clone());
        if let Some(concurrency) = self.concurrency {
            options.concurrency = concurrency;
        }
        if self.fail_fast {
            options.fail_fast = true;
        }

        let mut report = orchestrator.run_graph(&graph, options).await?;

        if cli.format == OutputFormat::Json {
            println!("{}", serde_json::to_string_pretty(&report)?);
        } else if !cli.quiet {
            print_failures(&report);
        }

        if !report.persistent.is_empty() {
            wait_for_persistent(&mut report, &cancel, cli).await;
        }

        Ok(exit_codes::for_status(report.overall))
    }
}

/// Block until persistent tasks exit on their own or the user interrupts
async fn wait_for_persistent(report: &mut ExecutionReport, cancel: &CancellationToken, cli: &Cli) {
    if cli.is_interactive_text() {
        let ids: Vec<String> = report.persistent.ids().iter().map(|id| id.to_string()).collect();
        output::info(&format!(
            "{} still running ({}), press Ctrl-C to stop",
            output::plural(ids.len(), "persistent task"),
            ids.join(", ")
        ));
    }

    let interrupted = tokio::select! {
        finished = report.persistent.wait() => {
            for (id, state) in finished {
                if state != NodeState::Succeeded {
                    warn!(task = %id, state = ?state, "persistent task exited");
                }
            }
            false
        }
        _ = cancel.cancelled() => true,
    };

    if interrupted {
        report.persistent.shutdown().await;
        if cli.is_interactive_text() {
            output::warning("Stopped persistent tasks.");
        }
    }
}

fn print_failures(report: &ExecutionReport) {
    let failed: Vec<_> = report
        .nodes
        .iter()
        .filter(|n| n.state == NodeState::Failed)
        .collect();
    if failed.is_empty() {
        return;
    }

    println!();
    println!(
        "  {} {}/{} tasks failed:",
        style("✗").red().bold(),
        failed.len(),
        report.nodes.len()
    );
    for node in failed {
        println!(
            "    {} {}: {}",
            style("✗").red(),
            node.id,
            node.error.as_deref().unwrap_or("failed")
        );
    }
}

/// Console reporter with live output
struct ConsoleReporter {
    verbose: bool,
}

impl ConsoleReporter {
    fn new(verbose: bool) -> Self {
        Self { verbose }
    }
}

impl TaskReporter for ConsoleReporter {
    fn report(&self, event: &TaskEvent) {
        match event {
            TaskEvent::Ready { .. } => {}
            TaskEvent::Started { id, command } => {
                println!(
                    "  {} {} {}",
                    style("▸").dim(),
                    style(id).bold(),
                    if self.verbose {
                        style(format!("({})", command)).dim().to_string()
                    } else {
                        String::new()
                    }
                );
            }
            TaskEvent::Output { id, line, is_stderr } => {
                if *is_stderr {
                    println!("    {} {}", style(format!("[{}]", id)).red().dim(), line);
                } else {
                    println!("    {} {}", style(format!("[{}]", id)).dim(), line);
                }
            }
            TaskEvent::Completed {
                id,
                duration,
                cached,
            } => {
                if *cached {
                    println!(
                        "  {} {} {} {}",
                        style("✓").green(),
                        style(id).green(),
                        style("(cached)").cyan(),
                        style(format!("{:.1}s", duration.as_secs_f64())).dim()
                    );
                } else {
                    println!(
                        "  {} {} {}",
                        style("✓").green(),
                        style(id).green(),
                        style(format!("{:.1}s", duration.as_secs_f64())).dim()
                    );
                }
            }
            TaskEvent::Failed {
                id,
                duration,
                error,
            } => {
                println!(
                    "  {} {} {} {}",
                    style("✗").red(),
                    style(id).red(),
                    style(format!("{:.1}s", duration.as_secs_f64())).dim(),
                    style(error).red().dim()
                );
            }
            TaskEvent::Skipped { id, reason } => {
                if self.verbose {
                    println!(
                        "  {} {} {}",
                        style("○").yellow(),
                        style(id).yellow(),
                        style(format!("({})", reason)).dim()
                    );
                }
            }
            TaskEvent::Blocked {
                id,
                failed_dependency,
            } => {
                println!(
                    "  {} {} {}",
                    style("⊘").red().dim(),
                    style(id).dim(),
                    style(format!("(blocked by {})", failed_dependency)).dim()
                );
            }
            TaskEvent::Cancelled { id } => {
                println!("  {} {} {}", style("⊘").yellow(), style(id).dim(), style("(cancelled)").dim());
            }
            TaskEvent::AllCompleted {
                total,
                succeeded,
                failed,
                skipped,
                cached,
                duration,
            } => {
                println!();
                println!(
                    "  {} {}/{} succeeded, {} failed, {} skipped, {} cached ({:.1}s)",
                    if *failed == 0 {
                        style("✓").green().bold()
                    } else {
                        style("✗").red().bold()
                    },
                    succeeded,
                    total,
                    failed,
                    skipped,
                    cached,
                    duration.as_secs_f64()
                );
            }
        }
    }
}
