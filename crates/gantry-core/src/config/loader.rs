//! Configuration loading

use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use crate::error::{ConfigError, Result};

use super::defaults::config_file_names;
use super::types::Config;
use super::validation::validate_config;

/// Supported configuration file formats
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ConfigFormat {
    Toml,
    Yaml,
    Json,
}

impl ConfigFormat {
    fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some("toml") => Self::Toml,
            Some("json") => Self::Json,
            _ => Self::Yaml,
        }
    }

    fn name(self) -> &'static str {
        match self {
            Self::Toml => "TOML",
            Self::Yaml => "YAML",
            Self::Json => "JSON",
        }
    }
}

/// Load configuration from a file
pub fn load_config(path: &Path) -> Result<Config> {
    let format = ConfigFormat::from_path(path);
    info!(path = %path.display(), format = format.name(), "loading config");

    let content = std::fs::read_to_string(path).map_err(ConfigError::Io)?;

    let config: Config = match format {
        ConfigFormat::Toml => toml::from_str(&content).map_err(ConfigError::TomlError)?,
        ConfigFormat::Yaml => serde_yaml::from_str(&content).map_err(ConfigError::YamlError)?,
        ConfigFormat::Json => serde_json::from_str(&content).map_err(ConfigError::JsonError)?,
    };

    validate_config(&config)?;
    debug!(path = %path.display(), tasks = config.pipeline.len(), "config loaded and validated");
    Ok(config)
}

/// Find configuration file in directory or parent directories.
///
/// File names are tried in the order given by [`config_file_names`]; the
/// first match wins. Parents are walked until the filesystem root.
pub fn find_config(start_dir: &Path) -> Option<PathBuf> {
    debug!(start_dir = %start_dir.display(), "searching for config file");
    let mut current = start_dir.to_path_buf();

    loop {
        for name in config_file_names() {
            let config_path = current.join(name);
            if config_path.exists() {
                info!(path = %config_path.display(), "found config file");
                return Some(config_path);
            }
        }

        if !current.pop() {
            break;
        }
    }

    debug!("no config file found");
    None
}

/// Load configuration from directory (searching parent directories)
pub fn load_config_from_dir(dir: &Path) -> Result<(Config, PathBuf)> {
    let config_path = find_config(dir).ok_or_else(|| ConfigError::NotFound(dir.to_path_buf()))?;

    let config = load_config(&config_path)?;
    Ok((config, config_path))
}

/// Load configuration or use defaults when no file exists.
///
/// A config file that exists but fails to parse or validate is still an
/// error; only a missing file falls back to defaults.
pub fn load_config_or_default(dir: &Path) -> Result<(Config, Option<PathBuf>)> {
    match find_config(dir) {
        Some(path) => {
            let config = load_config(&path)?;
            Ok((config, Some(path)))
        }
        None => {
            warn!(dir = %dir.display(), "no config found, using defaults");
            Ok((Config::default(), None))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_find_config_toml() {
        let temp = TempDir::new().unwrap();
        let config_path = temp.path().join("gantry.toml");
        std::fs::write(&config_path, "[pipeline.build]\n").unwrap();

        let found = find_config(temp.path());
        assert_eq!(found.unwrap(), config_path);
    }

    #[test]
    fn test_find_config_prefers_toml_over_yaml() {
        let temp = TempDir::new().unwrap();
        let toml_path = temp.path().join("gantry.toml");
        let yaml_path = temp.path().join("gantry.yaml");
        std::fs::write(&toml_path, "[pipeline.build]\n").unwrap();
        std::fs::write(&yaml_path, "pipeline:\n  build: {}\n").unwrap();

        let found = find_config(temp.path()).unwrap();
        assert_eq!(found, toml_path);
    }

    #[test]
    fn test_find_config_in_parent_dir() {
        let temp = TempDir::new().unwrap();
        let config_path = temp.path().join("gantry.json");
        std::fs::write(&config_path, "{}").unwrap();
        let nested = temp.path().join("packages").join("web");
        std::fs::create_dir_all(&nested).unwrap();

        let found = find_config(&nested).unwrap();
        assert_eq!(found, config_path);
    }

    #[test]
    fn test_load_config_yaml() {
        let temp = TempDir::new().unwrap();
        let config_path = temp.path().join("gantry.yaml");
        std::fs::write(
            &config_path,
            "tasks:\n  fail_fast: true\npipeline:\n  test:\n    depends_on: [build]\n",
        )
        .unwrap();

        let config = load_config(&config_path).unwrap();
        assert!(config.tasks.fail_fast);
        assert_eq!(config.pipeline["test"].depends_on, vec!["build"]);
    }

    #[test]
    fn test_load_config_json() {
        let temp = TempDir::new().unwrap();
        let config_path = temp.path().join("gantry.json");
        std::fs::write(
            &config_path,
            r#"{ "pipeline": { "build": { "dependsOn": ["^build"], "outputs": ["dist/**"] } } }"#,
        )
        .unwrap();

        let config = load_config(&config_path).unwrap();
        assert_eq!(config.pipeline["build"].outputs, vec!["dist/**"]);
    }

    #[test]
    fn test_load_config_rejects_invalid() {
        let temp = TempDir::new().unwrap();
        let config_path = temp.path().join("gantry.toml");
        std::fs::write(&config_path, "[tasks]\nconcurrency = 0\n").unwrap();

        assert!(load_config(&config_path).is_err());
        assert!(load_config_or_default(temp.path()).is_err());
    }

    #[test]
    fn test_load_config_or_default_without_file() {
        let temp = TempDir::new().unwrap();
        let (config, path) = load_config_or_default(temp.path()).unwrap();
        assert!(path.is_none());
        assert!(config.pipeline.is_empty());
    }
}
