//! Configuration validation

use tracing::debug;

use crate::error::{ConfigError, Result};

use super::types::Config;

/// Prefix marking a pipeline key as scoped to the repository root
pub const ROOT_TASK_PREFIX: &str = "//#";

/// Validate configuration
pub fn validate_config(config: &Config) -> Result<()> {
    debug!("validating configuration");
    validate_tasks(config)?;
    validate_pipeline(config)?;
    debug!("configuration validation passed");
    Ok(())
}

fn validate_tasks(config: &Config) -> Result<()> {
    if config.tasks.concurrency == 0 {
        return Err(ConfigError::InvalidValue {
            field: "tasks.concurrency".to_string(),
            message: "must be at least 1".to_string(),
        }
        .into());
    }

    if config.tasks.cache.dir.as_os_str().is_empty() {
        return Err(ConfigError::InvalidValue {
            field: "tasks.cache.dir".to_string(),
            message: "cache directory cannot be empty".to_string(),
        }
        .into());
    }

    Ok(())
}

fn validate_pipeline(config: &Config) -> Result<()> {
    for key in config.pipeline.keys() {
        let name = key.strip_prefix(ROOT_TASK_PREFIX).unwrap_or(key);
        if !is_valid_task_name(name) {
            return Err(ConfigError::InvalidValue {
                field: format!("pipeline.{}", key),
                message: "task keys must be a task name or //#<task name>".to_string(),
            }
            .into());
        }
    }

    Ok(())
}

/// Whether a string can name a task: non-empty, no whitespace, no `#` or `^`.
pub fn is_valid_task_name(name: &str) -> bool {
    !name.is_empty()
        && !name.starts_with('^')
        && !name.contains('#')
        && !name.chars().any(char::is_whitespace)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PipelineTask;

    #[test]
    fn test_validate_default_config() {
        let config = Config::default();
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn test_validate_zero_concurrency() {
        let mut config = Config::default();
        config.tasks.concurrency = 0;
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_validate_root_task_key() {
        let mut config = Config::default();
        config
            .pipeline
            .insert("//#check".to_string(), PipelineTask::default());
        config
            .pipeline
            .insert("build".to_string(), PipelineTask::default());
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn test_validate_rejects_workspace_qualified_key() {
        let mut config = Config::default();
        config
            .pipeline
            .insert("web#build".to_string(), PipelineTask::default());
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_valid_task_names() {
        assert!(is_valid_task_name("build"));
        assert!(is_valid_task_name("test:unit"));
        assert!(!is_valid_task_name(""));
        assert!(!is_valid_task_name("^build"));
        assert!(!is_valid_task_name("a b"));
        assert!(!is_valid_task_name("//#"));
    }
}
