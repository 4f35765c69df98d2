//! Task execution reporting

use std::sync::Mutex;
use std::time::Duration;

use tokio::sync::mpsc;

use crate::task::TaskId;

/// Node state transitions emitted by the scheduler
#[derive(Debug, Clone)]
pub enum TaskEvent {
    /// Every predecessor of a task is done; it is waiting for a worker
    Ready {
        id: TaskId,
    },
    /// A task is starting execution
    Started {
        id: TaskId,
        command: String,
    },
    /// A task produced output
    Output {
        id: TaskId,
        line: String,
        is_stderr: bool,
    },
    /// A task completed successfully (or was restored from cache)
    Completed {
        id: TaskId,
        duration: Duration,
        cached: bool,
    },
    /// A task failed
    Failed {
        id: TaskId,
        duration: Duration,
        error: String,
    },
    /// A task had nothing to run
    Skipped {
        id: TaskId,
        reason: String,
    },
    /// A task will never run because a predecessor failed
    Blocked {
        id: TaskId,
        failed_dependency: TaskId,
    },
    /// A task was cancelled before it could finish
    Cancelled {
        id: TaskId,
    },
    /// All tasks reached a terminal state (persistent tasks may still run)
    AllCompleted {
        total: usize,
        succeeded: usize,
        failed: usize,
        skipped: usize,
        cached: usize,
        duration: Duration,
    },
}

impl TaskEvent {
    /// The task an event refers to, if any
    pub fn task_id(&self) -> Option<&TaskId> {
        match self {
            Self::Ready { id }
            | Self::Started { id, .. }
            | Self::Output { id, .. }
            | Self::Completed { id, .. }
            | Self::Failed { id, .. }
            | Self::Skipped { id, .. }
            | Self::Blocked { id, .. }
            | Self::Cancelled { id } => Some(id),
            Self::AllCompleted { .. } => None,
        }
    }
}

/// Trait for reporting task execution progress
pub trait TaskReporter: Send + Sync {
    /// Handle a task event
    fn report(&self, event: &TaskEvent);
}

/// Simple reporter that logs to tracing
#[derive(Debug, Default)]
pub struct TracingReporter;

impl TaskReporter for TracingReporter {
    fn report(&self, event: &TaskEvent) {
        match event {
            TaskEvent::Ready { id } => {
                tracing::debug!("{} ready", id);
            }
            TaskEvent::Started { id, command } => {
                tracing::info!("Starting {}: {}", id, command);
            }
            TaskEvent::Output { id, line, is_stderr } => {
                if *is_stderr {
                    tracing::warn!("[{}] {}", id, line);
                } else {
                    tracing::debug!("[{}] {}", id, line);
                }
            }
            TaskEvent::Completed { id, duration, cached } => {
                if *cached {
                    tracing::info!("{} completed (cached) in {:.1}s", id, duration.as_secs_f64());
                } else {
                    tracing::info!("{} completed in {:.1}s", id, duration.as_secs_f64());
                }
            }
            TaskEvent::Failed { id, duration, error } => {
                tracing::error!("{} failed after {:.1}s: {}", id, duration.as_secs_f64(), error);
            }
            TaskEvent::Skipped { id, reason } => {
                tracing::info!("{} skipped: {}", id, reason);
            }
            TaskEvent::Blocked {
                id,
                failed_dependency,
            } => {
                tracing::warn!("{} blocked by failed {}", id, failed_dependency);
            }
            TaskEvent::Cancelled { id } => {
                tracing::warn!("{} cancelled", id);
            }
            TaskEvent::AllCompleted {
                total,
                succeeded,
                failed,
                skipped,
                cached,
                duration,
            } => {
                tracing::info!(
                    "All tasks complete: {}/{} succeeded, {} failed, {} skipped, {} cached ({:.1}s)",
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

/// Reporter that collects events for later inspection (useful for testing)
#[derive(Debug, Default)]
pub struct CollectingReporter {
    events: Mutex<Vec<TaskEvent>>,
}

impl CollectingReporter {
    /// Get all collected events
    pub fn events(&self) -> Vec<TaskEvent> {
        self.events
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
}

impl TaskReporter for CollectingReporter {
    fn report(&self, event: &TaskEvent) {
        self.events
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(event.clone());
    }
}

/// Reporter that forwards events to an async subscriber
#[derive(Debug, Clone)]
pub struct ChannelReporter {
    sender: mpsc::UnboundedSender<TaskEvent>,
}

impl ChannelReporter {
    /// Create a reporter and the receiving end of its event stream
    pub fn new() -> (Self, mpsc::UnboundedReceiver<TaskEvent>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }
}

impl TaskReporter for ChannelReporter {
    fn report(&self, event: &TaskEvent) {
        // A dropped receiver just means nobody is listening any more
        let _ = self.sender.send(event.clone());
    }
}
