//! Engine configuration
//!
//! [`EngineConfig`] can be built in code, loaded from a YAML or JSON file, or
//! read from environment variables:
//!
//! ```yaml
//! max_steps: 40
//! node_timeout_ms: 30000
//! checkpoint:
//!   backend: sqlite
//!   path: ./data/threads.db
//!   max_connections: 5
//! ```
//!
//! | Variable                      | Field                         |
//! |-------------------------------|-------------------------------|
//! | `{PREFIX}_MAX_STEPS`          | `max_steps`                   |
//! | `{PREFIX}_NODE_TIMEOUT_MS`    | `node_timeout`                |
//! | `{PREFIX}_CHECKPOINT_BACKEND` | `checkpoint` (`memory`/`sqlite`) |
//! | `{PREFIX}_SQLITE_PATH`        | `checkpoint.path`             |
//!
//! The loading helpers are generic so higher layers can reuse them for their
//! own configuration types.

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::info;
use waypoint_checkpoint::{CheckpointStore, InMemoryCheckpointStore, SqliteCheckpointStore};

use crate::error::{GraphError, Result};

/// Default cap on node executions per run
pub const DEFAULT_MAX_STEPS: usize = 25;

/// Default SQLite pool size
pub const DEFAULT_MAX_CONNECTIONS: u32 = 5;

/// Where checkpoints are kept
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "backend", rename_all = "lowercase")]
pub enum CheckpointBackend {
    /// Process-local; lost on restart
    #[default]
    Memory,
    /// Durable file-backed store
    Sqlite {
        path: PathBuf,
        #[serde(default = "default_max_connections")]
        max_connections: u32,
    },
}

fn default_max_connections() -> u32 {
    DEFAULT_MAX_CONNECTIONS
}

/// Tunables for [`Engine`](crate::engine::Engine)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Node executions allowed per run before the thread fails
    pub max_steps: usize,

    /// Default per-node time budget; nodes may override it
    #[serde(rename = "node_timeout_ms", with = "duration_ms")]
    pub node_timeout: Option<Duration>,

    pub checkpoint: CheckpointBackend,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_steps: DEFAULT_MAX_STEPS,
            node_timeout: None,
            checkpoint: CheckpointBackend::Memory,
        }
    }
}

impl EngineConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_steps(mut self, max_steps: usize) -> Self {
        self.max_steps = max_steps;
        self
    }

    pub fn with_node_timeout(mut self, timeout: Duration) -> Self {
        self.node_timeout = Some(timeout);
        self
    }

    pub fn with_sqlite(mut self, path: impl Into<PathBuf>) -> Self {
        self.checkpoint = CheckpointBackend::Sqlite {
            path: path.into(),
            max_connections: DEFAULT_MAX_CONNECTIONS,
        };
        self
    }

    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self> {
        let config: Self = load_yaml_config(path)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let config: Self = load_json_config(path)?;
        config.validate()?;
        Ok(config)
    }

    /// Load from a file, picking the format from its extension
    pub fn load_file(path: impl AsRef<Path>) -> Result<Self> {
        let config: Self = load_config_file(path)?;
        config.validate()?;
        Ok(config)
    }

    /// Open the configured checkpoint store
    pub async fn open_store(&self) -> Result<Arc<dyn CheckpointStore>> {
        match &self.checkpoint {
            CheckpointBackend::Memory => {
                info!("Using in-memory checkpoint store");
                Ok(Arc::new(InMemoryCheckpointStore::new()))
            }
            CheckpointBackend::Sqlite { path, max_connections } => {
                info!(path = %path.display(), max_connections, "Opening SQLite checkpoint store");
                let store = SqliteCheckpointStore::with_max_connections(path, *max_connections).await?;
                Ok(Arc::new(store))
            }
        }
    }
}

impl FromEnv for EngineConfig {
    fn from_env(prefix: &str) -> Result<Self> {
        let defaults = Self::default();
        let max_steps = get_env_parse_or(&format!("{}_MAX_STEPS", prefix), defaults.max_steps)?;

        let node_timeout = match std::env::var(format!("{}_NODE_TIMEOUT_MS", prefix)) {
            Ok(raw) => Some(Duration::from_millis(parse_env_value(
                &format!("{}_NODE_TIMEOUT_MS", prefix),
                &raw,
            )?)),
            Err(_) => None,
        };

        let backend = std::env::var(format!("{}_CHECKPOINT_BACKEND", prefix))
            .unwrap_or_else(|_| "memory".to_string());
        let checkpoint = match backend.to_lowercase().as_str() {
            "memory" => CheckpointBackend::Memory,
            "sqlite" => {
                let path = std::env::var(format!("{}_SQLITE_PATH", prefix)).map_err(|_| {
                    GraphError::Configuration(format!(
                        "{}_SQLITE_PATH is required for the sqlite backend",
                        prefix
                    ))
                })?;
                CheckpointBackend::Sqlite {
                    path: PathBuf::from(path),
                    max_connections: DEFAULT_MAX_CONNECTIONS,
                }
            }
            other => {
                return Err(GraphError::Configuration(format!(
                    "Unknown checkpoint backend '{}'",
                    other
                )))
            }
        };

        let config = Self {
            max_steps,
            node_timeout,
            checkpoint,
        };
        config.validate()?;
        Ok(config)
    }
}

impl ValidateConfig for EngineConfig {
    fn validate(&self) -> Result<()> {
        if self.max_steps == 0 {
            return Err(GraphError::Configuration(
                "max_steps must be at least 1".to_string(),
            ));
        }
        if self.node_timeout == Some(Duration::ZERO) {
            return Err(GraphError::Configuration(
                "node_timeout must be positive".to_string(),
            ));
        }
        if let CheckpointBackend::Sqlite { path, max_connections } = &self.checkpoint {
            if path.as_os_str().is_empty() {
                return Err(GraphError::Configuration(
                    "sqlite backend requires a path".to_string(),
                ));
            }
            if *max_connections == 0 {
                return Err(GraphError::Configuration(
                    "sqlite max_connections must be at least 1".to_string(),
                ));
            }
        }
        Ok(())
    }
}

/// Types that can be loaded from environment variables
pub trait FromEnv: Sized {
    /// Load configuration from variables named `{prefix}_*`
    fn from_env(prefix: &str) -> Result<Self>;
}

/// Types that can check their own consistency
pub trait ValidateConfig {
    fn validate(&self) -> Result<()>;
}

/// Load configuration from a YAML file.
pub fn load_yaml_config<T: DeserializeOwned>(path: impl AsRef<Path>) -> Result<T> {
    let content = std::fs::read_to_string(path.as_ref())?;
    serde_yaml::from_str(&content).map_err(|e| {
        GraphError::Configuration(format!(
            "Failed to parse YAML config from {:?}: {}",
            path.as_ref(),
            e
        ))
    })
}

/// Load configuration from a JSON file.
pub fn load_json_config<T: DeserializeOwned>(path: impl AsRef<Path>) -> Result<T> {
    let content = std::fs::read_to_string(path.as_ref())?;
    serde_json::from_str(&content).map_err(|e| {
        GraphError::Configuration(format!(
            "Failed to parse JSON config from {:?}: {}",
            path.as_ref(),
            e
        ))
    })
}

/// Load configuration from a file (auto-detect format from extension).
pub fn load_config_file<T: DeserializeOwned>(path: impl AsRef<Path>) -> Result<T> {
    let path = path.as_ref();
    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .ok_or_else(|| {
            GraphError::Configuration(format!("Unable to determine file extension for {:?}", path))
        })?;

    match extension.to_lowercase().as_str() {
        "yaml" | "yml" => load_yaml_config(path),
        "json" => load_json_config(path),
        _ => Err(GraphError::Configuration(format!(
            "Unsupported config file extension: {}",
            extension
        ))),
    }
}

/// Parse an environment variable, falling back to `default` when it is unset.
///
/// A variable that is set but does not parse is an error.
pub fn get_env_parse_or<T: FromStr>(key: &str, default: T) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(raw) => parse_env_value(key, &raw),
        Err(_) => Ok(default),
    }
}

fn parse_env_value<T: FromStr>(key: &str, raw: &str) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    raw.trim().parse::<T>().map_err(|e| {
        GraphError::Configuration(format!(
            "Failed to parse environment variable '{}': {}",
            key, e
        ))
    })
}

/// `Option<Duration>` as whole milliseconds
mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(duration) => serializer.serialize_some(&(duration.as_millis() as u64)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<Duration>, D::Error> {
        Ok(Option::<u64>::deserialize(deserializer)?.map(Duration::from_millis))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.max_steps, 25);
        assert_eq!(config.node_timeout, None);
        assert_eq!(config.checkpoint, CheckpointBackend::Memory);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_load_yaml() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("engine.yaml");
        fs::write(
            &path,
            "max_steps: 40\nnode_timeout_ms: 1500\ncheckpoint:\n  backend: sqlite\n  path: /tmp/threads.db\n",
        )
        .unwrap();

        let config = EngineConfig::load_file(&path).unwrap();
        assert_eq!(config.max_steps, 40);
        assert_eq!(config.node_timeout, Some(Duration::from_millis(1500)));
        assert_eq!(
            config.checkpoint,
            CheckpointBackend::Sqlite {
                path: PathBuf::from("/tmp/threads.db"),
                max_connections: 5
            }
        );
    }

    #[test]
    fn test_load_json_with_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("engine.json");
        fs::write(&path, r#"{"max_steps": 10}"#).unwrap();

        let config = EngineConfig::from_json_file(&path).unwrap();
        assert_eq!(config.max_steps, 10);
        assert_eq!(config.checkpoint, CheckpointBackend::Memory);
    }

    #[test]
    fn test_invalid_values_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("engine.yml");
        fs::write(&path, "max_steps: 0\n").unwrap();
        assert!(matches!(
            EngineConfig::load_file(&path),
            Err(GraphError::Configuration(_))
        ));

        let unsupported = dir.path().join("engine.toml");
        fs::write(&unsupported, "max_steps = 3").unwrap();
        assert!(EngineConfig::load_file(&unsupported).is_err());
    }

    #[test]
    fn test_roundtrip_serialization() {
        let config = EngineConfig::new()
            .with_max_steps(12)
            .with_node_timeout(Duration::from_secs(2))
            .with_sqlite("/var/lib/waypoint.db");
        let yaml = serde_yaml::to_string(&config).unwrap();
        assert!(yaml.contains("node_timeout_ms: 2000"));
        let restored: EngineConfig = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(restored, config);
    }

    #[test]
    fn test_from_env() {
        std::env::set_var("WPTEST_ENV_MAX_STEPS", "7");
        std::env::set_var("WPTEST_ENV_NODE_TIMEOUT_MS", "250");
        std::env::set_var("WPTEST_ENV_CHECKPOINT_BACKEND", "sqlite");
        std::env::set_var("WPTEST_ENV_SQLITE_PATH", "/tmp/env.db");

        let config = EngineConfig::from_env("WPTEST_ENV").unwrap();
        assert_eq!(config.max_steps, 7);
        assert_eq!(config.node_timeout, Some(Duration::from_millis(250)));
        assert!(matches!(config.checkpoint, CheckpointBackend::Sqlite { .. }));
    }

    #[test]
    fn test_from_env_rejects_garbage() {
        std::env::set_var("WPTEST_BAD_MAX_STEPS", "many");
        assert!(EngineConfig::from_env("WPTEST_BAD").is_err());

        std::env::set_var("WPTEST_NOPATH_CHECKPOINT_BACKEND", "sqlite");
        assert!(EngineConfig::from_env("WPTEST_NOPATH").is_err());
    }

    #[test]
    fn test_from_env_defaults() {
        let config = EngineConfig::from_env("WPTEST_UNSET").unwrap();
        assert_eq!(config, EngineConfig::default());
    }
}
