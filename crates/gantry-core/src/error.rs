//! Error types for Gantry

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias using GantryError
pub type Result<T> = std::result::Result<T, GantryError>;

/// Main error type for Gantry core operations
#[derive(Debug, Error)]
pub enum GantryError {
    /// Configuration-related errors
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Workspace-related errors
    #[error(transparent)]
    Workspace(#[from] WorkspaceError),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON parsing error
    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Configuration-related errors
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Configuration file not found
    #[error("Configuration file not found at {0}")]
    NotFound(PathBuf),

    /// Invalid configuration value
    #[error("Invalid configuration: {field} - {message}")]
    InvalidValue { field: String, message: String },

    /// YAML parsing error
    #[error("YAML parsing error: {0}")]
    YamlError(#[from] serde_yaml::Error),

    /// TOML parsing error
    #[error("TOML parsing error: {0}")]
    TomlError(#[from] toml::de::Error),

    /// JSON parsing error
    #[error("JSON parsing error: {0}")]
    JsonError(#[from] serde_json::Error),

    /// IO error
    #[error("IO error reading config: {0}")]
    Io(#[from] std::io::Error),
}

/// Workspace-related errors
#[derive(Debug, Error)]
pub enum WorkspaceError {
    /// No root manifest in the given directory
    #[error("No package.json found at workspace root {0}")]
    RootManifestNotFound(PathBuf),

    /// A manifest could not be parsed
    #[error("Failed to parse manifest {path}: {reason}")]
    ManifestParseError { path: PathBuf, reason: String },

    /// Invalid workspace glob pattern
    #[error("Invalid workspace pattern '{pattern}': {reason}")]
    InvalidPattern { pattern: String, reason: String },

    /// Two workspaces share a name
    #[error("Duplicate workspace name '{0}'")]
    DuplicateName(String),

    /// The workspace dependency relation contains a cycle
    #[error("Cyclic workspace dependency: {}", cycle.join(" -> "))]
    CyclicDependency { cycle: Vec<String> },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cycle_message_includes_path() {
        let err = WorkspaceError::CyclicDependency {
            cycle: vec!["a".to_string(), "b".to_string(), "a".to_string()],
        };
        assert_eq!(err.to_string(), "Cyclic workspace dependency: a -> b -> a");
    }

    #[test]
    fn test_config_error_converts() {
        let err: GantryError = ConfigError::InvalidValue {
            field: "tasks.concurrency".to_string(),
            message: "must be at least 1".to_string(),
        }
        .into();
        assert!(matches!(err, GantryError::Config(_)));
        assert!(err.to_string().contains("tasks.concurrency"));
    }
}
