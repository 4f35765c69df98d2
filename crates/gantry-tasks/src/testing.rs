//! Scripted process launcher for scheduler and orchestrator tests

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::launcher::{LaunchError, LaunchOutcome, LaunchRequest, ProcessLauncher};
use crate::reporter::TaskReporter;

/// Launcher that never spawns processes; behaviour is scripted per task ID
#[derive(Debug, Default)]
pub struct FakeLauncher {
    exit_codes: HashMap<String, i32>,
    delays: HashMap<String, Duration>,
    launch_errors: HashSet<String>,
    panics: HashSet<String>,
    outputs: HashMap<String, Vec<(String, String)>>,
    log: Mutex<Vec<String>>,
    active: AtomicUsize,
    max_active: AtomicUsize,
}

impl FakeLauncher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_exit_code(mut self, task: &str, code: i32) -> Self {
        self.exit_codes.insert(task.to_string(), code);
        self
    }

    pub fn with_delay(mut self, task: &str, delay: Duration) -> Self {
        self.delays.insert(task.to_string(), delay);
        self
    }

    pub fn with_launch_error(mut self, task: &str) -> Self {
        self.launch_errors.insert(task.to_string());
        self
    }

    pub fn with_panic(mut self, task: &str) -> Self {
        self.panics.insert(task.to_string());
        self
    }

    /// Write a file (relative to the workspace dir) when the task runs
    pub fn with_output(mut self, task: &str, path: &str, contents: &str) -> Self {
        self.outputs
            .entry(task.to_string())
            .or_default()
            .push((path.to_string(), contents.to_string()));
        self
    }

    /// Ordered "start <id>" / "end <id>" entries
    pub fn log(&self) -> Vec<String> {
        self.log.lock().unwrap().clone()
    }

    /// Index of an entry in the log
    pub fn position(&self, entry: &str) -> Option<usize> {
        self.log().iter().position(|e| e == entry)
    }

    /// How many times a task was launched
    pub fn runs(&self, task: &str) -> usize {
        let entry = format!("start {}", task);
        self.log().iter().filter(|e| **e == entry).count()
    }

    /// Highest number of tasks observed running at once
    pub fn max_concurrent(&self) -> usize {
        self.max_active.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl ProcessLauncher for FakeLauncher {
    async fn execute(
        &self,
        request: &LaunchRequest,
        _reporter: &dyn TaskReporter,
    ) -> Result<LaunchOutcome, LaunchError> {
        let key = request.id.to_string();
        let start = Instant::now();
        self.log.lock().unwrap().push(format!("start {}", key));
        let active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(active, Ordering::SeqCst);

        if self.panics.contains(&key) {
            panic!("scripted panic in {}", key);
        }
        if let Some(delay) = self.delays.get(&key) {
            tokio::time::sleep(*delay).await;
        }
        for (path, contents) in self.outputs.get(&key).into_iter().flatten() {
            let target = request.dir.join(path);
            if let Some(parent) = target.parent() {
                std::fs::create_dir_all(parent).unwrap();
            }
            std::fs::write(target, contents).unwrap();
        }

        self.active.fetch_sub(1, Ordering::SeqCst);
        self.log.lock().unwrap().push(format!("end {}", key));

        if self.launch_errors.contains(&key) {
            return Err(LaunchError::Spawn {
                command: request.command.clone(),
                source: std::io::Error::other("scripted launch failure"),
            });
        }
        Ok(LaunchOutcome {
            exit_code: self.exit_codes.get(&key).copied().unwrap_or(0),
            duration: start.elapsed(),
        })
    }
}
