//! Configuration loading from disk.

use std::fs;
use std::path::Path;

use crate::config::schema::AppConfiguration;
use crate::config::validation::{validate_config, ValidationError};

/// Error type for configuration loading.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error reading {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("Parse error: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("Parse error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("Validation failed: {}", join(.0))]
    Validation(Vec<ValidationError>),
}

fn join(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Load and validate configuration from a YAML or TOML file.
///
/// `.toml` files are parsed as TOML; everything else is parsed as YAML.
pub fn load_config<C: AppConfiguration>(path: &Path) -> Result<C, ConfigError> {
    let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.display().to_string(),
        source,
    })?;
    parse_config(&content, path)
}

/// Parse and validate configuration text, picking the format from `path`.
pub fn parse_config<C: AppConfiguration>(content: &str, path: &Path) -> Result<C, ConfigError> {
    let is_toml = path
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("toml"));

    let config: C = if is_toml {
        toml::from_str(content)?
    } else {
        serde_yaml::from_str(content)?
    };

    validate_config(config.server()).map_err(ConfigError::Validation)?;

    Ok(config)
}
