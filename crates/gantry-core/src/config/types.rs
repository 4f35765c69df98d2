//! Configuration types

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use super::defaults::{default_cache_dir, default_concurrency, DEFAULT_GRACE_PERIOD_SECS};

/// Main configuration for Gantry
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Version of the config schema
    #[serde(rename = "$schema", skip_serializing_if = "Option::is_none")]
    pub schema: Option<String>,

    /// Task execution settings
    pub tasks: TasksConfig,

    /// Task pipeline definitions, keyed by task name or `//#task`
    pub pipeline: BTreeMap<String, PipelineTask>,
}

/// Task execution settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TasksConfig {
    /// Maximum concurrent tasks
    pub concurrency: usize,

    /// Cancel all pending tasks as soon as one fails
    pub fail_fast: bool,

    /// Seconds in-flight tasks get to finish after an interrupt
    pub grace_period_secs: u64,

    /// Cache configuration
    pub cache: CacheConfig,
}

impl Default for TasksConfig {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            fail_fast: false,
            grace_period_secs: DEFAULT_GRACE_PERIOD_SECS,
            cache: CacheConfig::default(),
        }
    }
}

/// A task in the pipeline configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineTask {
    /// Dependency references: `task`, `^task`, or `//#task`
    #[serde(alias = "dependsOn")]
    pub depends_on: Vec<String>,

    /// Input glob patterns (for cache key computation)
    pub inputs: Vec<String>,

    /// Output glob patterns (for caching)
    pub outputs: Vec<String>,

    /// Environment variables
    pub env: BTreeMap<String, String>,

    /// Whether results may be cached
    pub cache: bool,

    /// Whether this is a persistent/long-running task
    pub persistent: bool,
}

impl Default for PipelineTask {
    fn default() -> Self {
        Self {
            depends_on: Vec::new(),
            inputs: Vec::new(),
            outputs: Vec::new(),
            env: BTreeMap::new(),
            cache: true,
            persistent: false,
        }
    }
}

/// Cache configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Whether caching is enabled
    pub enabled: bool,

    /// Cache directory, relative to the repository root
    pub dir: PathBuf,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            dir: default_cache_dir(),
        }
    }
}
