//! Default configuration values

use std::path::PathBuf;

/// Default configuration file name (TOML)
pub const DEFAULT_CONFIG_TOML: &str = "gantry.toml";

/// Default configuration file name (YAML)
pub const DEFAULT_CONFIG_YAML: &str = "gantry.yaml";

/// Default configuration file name (JSON)
pub const DEFAULT_CONFIG_JSON: &str = "gantry.json";

/// Seconds in-flight tasks may keep running after an interrupt
pub const DEFAULT_GRACE_PERIOD_SECS: u64 = 10;

/// Get list of config file names to search for
pub fn config_file_names() -> Vec<&'static str> {
    vec![
        DEFAULT_CONFIG_TOML,
        DEFAULT_CONFIG_YAML,
        "gantry.yml",
        DEFAULT_CONFIG_JSON,
    ]
}

/// Default task concurrency: the machine's available parallelism
pub fn default_concurrency() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
}

/// Default cache directory, relative to the repository root
pub fn default_cache_dir() -> PathBuf {
    PathBuf::from(".gantry").join("cache")
}

/// Default configuration template
pub const DEFAULT_CONFIG_TEMPLATE: &str = r#"# Gantry Configuration

[tasks]
fail_fast = false

[tasks.cache]
enabled = true
dir = ".gantry/cache"

[pipeline.build]
depends_on = ["^build"]
outputs = ["dist/**"]

[pipeline.test]
depends_on = ["build"]

[pipeline.lint]

[pipeline.dev]
cache = false
persistent = true
"#;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;

    #[test]
    fn test_template_parses() {
        let config: Config = toml::from_str(DEFAULT_CONFIG_TEMPLATE).unwrap();
        assert_eq!(config.pipeline.len(), 4);
        assert!(config.pipeline["dev"].persistent);
    }

    #[test]
    fn test_default_concurrency_positive() {
        assert!(default_concurrency() > 0);
    }
}
