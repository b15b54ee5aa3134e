//! Project file parser.
//!
//! This module loads `converge.yaml`, applies environment overrides and
//! loads a `.env` file that sits next to the project file.

use crate::error::{ConfigError, Result};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use super::spec::ProjectFile;

/// Overrides `state.path`.
pub const ENV_STATE_PATH: &str = "CONVERGE_STATE_PATH";
/// Overrides `apply.max_parallel`.
pub const ENV_MAX_PARALLEL: &str = "CONVERGE_MAX_PARALLEL";
/// Overrides `project.environment`.
pub const ENV_ENVIRONMENT: &str = "CONVERGE_ENVIRONMENT";

/// Parser for project files.
#[derive(Debug, Default)]
pub struct ConfigParser {
    base_path: Option<PathBuf>,
}

impl ConfigParser {
    /// Creates a new parser.
    #[must_use]
    pub const fn new() -> Self {
        Self { base_path: None }
    }

    /// Sets the directory `.env` is looked up in.
    #[must_use]
    pub fn with_base_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.base_path = Some(path.into());
        self
    }

    /// Loads a project file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load_file(&self, path: impl AsRef<Path>) -> Result<ProjectFile> {
        let path = path.as_ref();
        info!("Loading configuration from: {}", path.display());

        if !path.exists() {
            return Err(ConfigError::FileNotFound {
                path: path.to_path_buf(),
            }
            .into());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ParseError {
            message: format!("Failed to read file: {e}"),
            location: Some(path.display().to_string()),
        })?;

        self.parse_yaml(&content, Some(path))
    }

    /// Parses a project file from a YAML string.
    ///
    /// # Errors
    ///
    /// Returns an error if the YAML is invalid.
    pub fn parse_yaml(&self, content: &str, source: Option<&Path>) -> Result<ProjectFile> {
        debug!("Parsing YAML configuration");

        let config: ProjectFile = serde_yaml::from_str(content).map_err(|e| ConfigError::ParseError {
            message: format!("YAML parse error: {e}"),
            location: source.map(|p| p.display().to_string()),
        })?;

        debug!("Parsed configuration for project: {}", config.project.name);
        Ok(config)
    }

    /// Loads a project file, then applies `CONVERGE_*` overrides.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed, or an override
    /// is malformed.
    pub fn load_with_env(&self, path: impl AsRef<Path>) -> Result<ProjectFile> {
        let mut config = self.load_file(path)?;
        Self::apply_overrides(&mut config, |name| std::env::var(name).ok())?;
        Ok(config)
    }

    /// Applies overrides read through `lookup`.
    ///
    /// # Errors
    ///
    /// Returns an error if `CONVERGE_MAX_PARALLEL` is not a number.
    pub fn apply_overrides(
        config: &mut ProjectFile,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<()> {
        if let Some(path) = lookup(ENV_STATE_PATH) {
            debug!("Overriding state.path from environment");
            config.state.path = path;
        }

        if let Some(environment) = lookup(ENV_ENVIRONMENT) {
            debug!("Overriding project.environment from environment");
            config.project.environment = environment;
        }

        if let Some(raw) = lookup(ENV_MAX_PARALLEL) {
            debug!("Overriding apply.max_parallel from environment");
            config.apply.max_parallel = raw.trim().parse().map_err(|_| {
                ConfigError::validation(
                    format!("{ENV_MAX_PARALLEL} must be a positive integer, got '{raw}'"),
                    "apply.max_parallel",
                )
            })?;
        }

        Ok(())
    }

    /// Loads the `.env` file if present.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be loaded.
    pub fn load_dotenv(&self) -> Result<()> {
        let env_path = self
            .base_path
            .as_ref()
            .map_or_else(|| PathBuf::from(".env"), |p| p.join(".env"));

        if env_path.exists() {
            info!("Loading environment from: {}", env_path.display());
            dotenvy::from_path(&env_path).map_err(|e| ConfigError::ParseError {
                message: format!("Failed to load .env file: {e}"),
                location: Some(env_path.display().to_string()),
            })?;
        } else {
            debug!(".env file not found at: {}", env_path.display());
        }

        Ok(())
    }
}

/// Project file names searched for, in order.
pub const DEFAULT_CONFIG_FILES: &[&str] = &["converge.yaml", "converge.yml", ".converge.yaml"];

/// Finds the project file in `start_dir` or one of its parents.
///
/// # Errors
///
/// Returns an error if no project file is found.
pub fn find_config_file(start_dir: impl AsRef<Path>) -> Result<PathBuf> {
    let start = start_dir.as_ref();
    let mut current = start.to_path_buf();

    loop {
        for filename in DEFAULT_CONFIG_FILES {
            let config_path = current.join(filename);
            if config_path.exists() {
                info!("Found configuration file: {}", config_path.display());
                return Ok(config_path);
            }
        }

        if !current.pop() {
            break;
        }
    }

    Err(ConfigError::FileNotFound {
        path: start.join(DEFAULT_CONFIG_FILES[0]),
    }
    .into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ConvergeError;
    use std::collections::HashMap;
    use tempfile::TempDir;

    const MINIMAL: &str = r"
project:
  name: test-project
";

    #[test]
    fn test_parse_minimal_config() {
        let config = ConfigParser::new().parse_yaml(MINIMAL, None).expect("parse");
        assert_eq!(config.project.name, "test-project");
        assert_eq!(config.project.environment, "dev");
        assert!(config.resources.is_empty());
    }

    #[test]
    fn test_parse_error_has_location() {
        let err = ConfigParser::new()
            .parse_yaml("project: [", Some(Path::new("converge.yaml")))
            .expect_err("invalid yaml");
        match err {
            ConvergeError::Config(ConfigError::ParseError { location, .. }) => {
                assert_eq!(location.as_deref(), Some("converge.yaml"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_env_overrides() {
        let mut config = ConfigParser::new().parse_yaml(MINIMAL, None).expect("parse");
        let env: HashMap<&str, &str> = [
            (ENV_STATE_PATH, "/var/lib/converge"),
            (ENV_MAX_PARALLEL, "8"),
            (ENV_ENVIRONMENT, "prod"),
        ]
        .into_iter()
        .collect();

        ConfigParser::apply_overrides(&mut config, |name| env.get(name).map(ToString::to_string))
            .expect("overrides");
        assert_eq!(config.state.path, "/var/lib/converge");
        assert_eq!(config.apply.max_parallel, 8);
        assert_eq!(config.project.environment, "prod");
    }

    #[test]
    fn test_malformed_override_rejected() {
        let mut config = ConfigParser::new().parse_yaml(MINIMAL, None).expect("parse");
        let result = ConfigParser::apply_overrides(&mut config, |name| {
            (name == ENV_MAX_PARALLEL).then(|| String::from("many"))
        });
        assert!(result.is_err());
    }

    #[test]
    fn test_find_config_file_searches_parents() {
        let temp_dir = TempDir::new().expect("temp dir");
        std::fs::write(temp_dir.path().join("converge.yaml"), MINIMAL).expect("write");
        let nested = temp_dir.path().join("a").join("b");
        std::fs::create_dir_all(&nested).expect("mkdir");

        let found = find_config_file(&nested).expect("found");
        assert_eq!(found, temp_dir.path().join("converge.yaml"));
    }
}
