//! Layered configuration.
//!
//! Each setting is resolved from four sources, later ones winning:
//! built-in default, the project file `pondnote.json`, `PONDNOTE_*`
//! environment variables, then CLI flags. Every resolved value remembers
//! where it came from.

use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Project configuration file name, looked up in the working directory.
pub const PROJECT_CONFIG_FILE: &str = "pondnote.json";

const ENV_STORE_DIR: &str = "PONDNOTE_STORE_DIR";
const ENV_LINEAGE_COMMAND: &str = "PONDNOTE_LINEAGE_COMMAND";
const ENV_DIALECT: &str = "PONDNOTE_DIALECT";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("invalid config file {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("no data directory available; set PONDNOTE_STORE_DIR or --store-dir")]
    NoStoreDir,
}

// ============================================================================
// Configuration Sources
// ============================================================================

/// Configuration value source (for precedence tracking).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfigSource {
    Default = 0,
    ProjectConfig = 1,
    Environment = 2,
    CliFlag = 3,
}

/// A configuration value with its source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigValue<T> {
    pub value: T,
    pub source: ConfigSource,
}

impl<T> ConfigValue<T> {
    pub fn new(value: T, source: ConfigSource) -> Self {
        ConfigValue { value, source }
    }

    /// Merge with another value, preferring higher precedence.
    pub fn merge(self, other: Self) -> Self {
        if other.source >= self.source {
            other
        } else {
            self
        }
    }

    /// Merge in `value` from `source` when present.
    fn layer(self, value: Option<T>, source: ConfigSource) -> Self {
        match value {
            Some(value) => self.merge(ConfigValue::new(value, source)),
            None => self,
        }
    }
}

// ============================================================================
// Settings
// ============================================================================

/// Shape of `pondnote.json`. Every field is optional.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case", deny_unknown_fields)]
pub struct ProjectConfig {
    pub store_dir: Option<PathBuf>,
    pub lineage_command: Option<String>,
    pub dialect: Option<String>,
}

impl ProjectConfig {
    /// Load `pondnote.json` from `dir`; a missing file is an empty config.
    pub fn load(dir: &Path) -> Result<Self, ConfigError> {
        let path = dir.join(PROJECT_CONFIG_FILE);
        let text = match fs::read_to_string(&path) {
            Ok(text) => text,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(source) => return Err(ConfigError::Read { path, source }),
        };
        serde_json::from_str(&text).map_err(|source| ConfigError::Parse { path, source })
    }
}

/// Values supplied on the command line.
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    pub store_dir: Option<PathBuf>,
    pub lineage_command: Option<String>,
    pub dialect: Option<String>,
}

/// Resolved settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PondnoteConfig {
    /// Where the file store keeps notebooks.
    pub store_dir: ConfigValue<PathBuf>,
    /// External lineage analyzer command; lexical resolution only when unset.
    pub lineage_command: ConfigValue<Option<String>>,
    /// SQL dialect passed to the lineage analyzer.
    pub dialect: ConfigValue<Option<String>>,
}

impl PondnoteConfig {
    /// Resolve from all sources, reading the project file from `project_dir`
    /// and the process environment.
    pub fn resolve(project_dir: &Path, cli: &CliOverrides) -> Result<Self, ConfigError> {
        let project = ProjectConfig::load(project_dir)?;
        let env: HashMap<String, String> = std::env::vars()
            .filter(|(key, _)| key.starts_with("PONDNOTE_"))
            .collect();
        let default_store = dirs::data_dir().map(|dir| dir.join("pondnote"));
        Self::from_layers(default_store, &project, &env, cli)
    }

    /// Resolve from explicit layers.
    pub fn from_layers(
        default_store: Option<PathBuf>,
        project: &ProjectConfig,
        env: &HashMap<String, String>,
        cli: &CliOverrides,
    ) -> Result<Self, ConfigError> {
        let env_value = |key: &str| {
            env.get(key)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };

        let store_dir = ConfigValue::new(default_store, ConfigSource::Default)
            .layer(project.store_dir.clone().map(Some), ConfigSource::ProjectConfig)
            .layer(
                env_value(ENV_STORE_DIR).map(|dir| Some(PathBuf::from(dir))),
                ConfigSource::Environment,
            )
            .layer(cli.store_dir.clone().map(Some), ConfigSource::CliFlag);
        let store_dir = match store_dir.value {
            Some(dir) => ConfigValue::new(dir, store_dir.source),
            None => return Err(ConfigError::NoStoreDir),
        };

        let lineage_command = ConfigValue::new(None, ConfigSource::Default)
            .layer(project.lineage_command.clone().map(Some), ConfigSource::ProjectConfig)
            .layer(env_value(ENV_LINEAGE_COMMAND).map(Some), ConfigSource::Environment)
            .layer(cli.lineage_command.clone().map(Some), ConfigSource::CliFlag);

        let dialect = ConfigValue::new(None, ConfigSource::Default)
            .layer(project.dialect.clone().map(Some), ConfigSource::ProjectConfig)
            .layer(env_value(ENV_DIALECT).map(Some), ConfigSource::Environment)
            .layer(cli.dialect.clone().map(Some), ConfigSource::CliFlag);

        Ok(PondnoteConfig {
            store_dir,
            lineage_command,
            dialect,
        })
    }

    pub fn lineage_enabled(&self) -> bool {
        self.lineage_command.value.is_some()
    }
}

// ============================================================================
// Tests
// ============================================================================
