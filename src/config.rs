//! Configuration for the exset orchestrator.
//!
//! Configuration sources (highest priority first):
//! 1. Environment variables (EXSET_HOME, EXSET_BUILDER_IMAGE,
//!    EXSET_BUILDER_TIMEOUT_SECONDS)
//! 2. Config file (.exset/config.yaml)
//! 3. Defaults (~/.exset)
//!
//! Config file discovery:
//! - Searches current directory and parents for .exset/config.yaml
//! - `home` in the config file is relative to the .exset/ directory

use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::core::log_forwarder::parse_level;

/// Global cached configuration (stores Result to handle init errors)
static CONFIG: OnceLock<Result<OrchestratorConfig, String>> = OnceLock::new();

pub const ENV_HOME: &str = "EXSET_HOME";
pub const ENV_BUILDER_IMAGE: &str = "EXSET_BUILDER_IMAGE";
pub const ENV_BUILDER_TIMEOUT: &str = "EXSET_BUILDER_TIMEOUT_SECONDS";

/// Raw config file schema (matches YAML structure)
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConfigFile {
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub home: Option<String>,
    #[serde(default)]
    pub builder: Option<BuilderFileConfig>,
    #[serde(default)]
    pub saga: Option<SagaFileConfig>,
    #[serde(default)]
    pub callback: Option<CallbackFileConfig>,
    #[serde(default)]
    pub max_concurrent_jobs: Option<usize>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct BuilderFileConfig {
    pub image: Option<String>,
    pub runtime_binary: Option<String>,
    pub timeout_seconds: Option<u64>,
    pub poll_interval_seconds: Option<u64>,
    pub start_timeout_seconds: Option<u64>,
    pub storage_address: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SagaFileConfig {
    pub timeout_seconds: Option<u64>,
    pub deduplication_enabled: Option<bool>,
    pub replay_log_level: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CallbackFileConfig {
    pub timeout_seconds: Option<u64>,
}

/// Builder container settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BuilderSettings {
    pub image: String,

    /// `podman` or `docker`
    pub runtime_binary: String,

    /// Upper bound for one builder run
    pub timeout_seconds: u64,

    pub poll_interval_seconds: u64,

    /// Upper bound for the container to be accepted by the runtime
    pub start_timeout_seconds: u64,

    /// Passed to the builder so it can reach job storage
    pub storage_address: String,
}

impl Default for BuilderSettings {
    fn default() -> Self {
        Self {
            image: "exset-builder:latest".to_string(),
            runtime_binary: "podman".to_string(),
            timeout_seconds: 300,
            poll_interval_seconds: 2,
            start_timeout_seconds: 30,
            storage_address: String::new(),
        }
    }
}

impl BuilderSettings {
    /// Upper bound for one builder run
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_seconds)
    }

    pub fn start_timeout(&self) -> Duration {
        Duration::from_secs(self.start_timeout_seconds)
    }
}

/// Completion saga settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SagaSettings {
    /// Deadline for the whole saga; I/O nodes fail once it passes
    pub timeout_seconds: u64,
    pub deduplication_enabled: bool,

    /// Level for replayed builder records without a usable level
    pub replay_log_level: String,
}

impl Default for SagaSettings {
    fn default() -> Self {
        Self {
            timeout_seconds: 120,
            deduplication_enabled: true,
            replay_log_level: "info".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CallbackSettings {
    pub timeout_seconds: u64,
}

impl Default for CallbackSettings {
    fn default() -> Self {
        Self { timeout_seconds: 30 }
    }
}

/// Resolved configuration with absolute paths
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OrchestratorConfig {
    /// State directory (database, local batches)
    pub home: PathBuf,
    pub builder: BuilderSettings,
    pub saga: SagaSettings,
    pub callback: CallbackSettings,
    pub max_concurrent_jobs: usize,

    /// Path to config file (if found)
    pub config_file: Option<PathBuf>,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            home: default_home(),
            builder: BuilderSettings::default(),
            saga: SagaSettings::default(),
            callback: CallbackSettings::default(),
            max_concurrent_jobs: 4,
            config_file: None,
        }
    }
}

impl OrchestratorConfig {
    /// SQLite file holding every table
    pub fn database_path(&self) -> PathBuf {
        self.home.join("exset.db")
    }

    /// Root of the local file-share
    pub fn batches_dir(&self) -> PathBuf {
        self.home.join("batches")
    }

    pub fn saga_timeout(&self) -> Duration {
        Duration::from_secs(self.saga.timeout_seconds)
    }

    pub fn callback_timeout(&self) -> Duration {
        Duration::from_secs(self.callback.timeout_seconds)
    }

    /// Default level for replayed builder logs
    pub fn replay_level(&self) -> tracing::Level {
        parse_level(&self.saga.replay_log_level).unwrap_or(tracing::Level::INFO)
    }
}

fn default_home() -> PathBuf {
    dirs::home_dir()
        .map(|h| h.join(".exset"))
        .unwrap_or_else(|| PathBuf::from(".exset"))
}

/// Find config file by searching `start` and its parents
fn find_config_file(start: &Path) -> Option<PathBuf> {
    let mut current = start.to_path_buf();

    loop {
        let config_path = current.join(".exset").join("config.yaml");
        if config_path.exists() {
            return Some(config_path);
        }

        if !current.pop() {
            break;
        }
    }

    None
}

/// Load and parse config file
fn load_config_file(path: &Path) -> Result<ConfigFile> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    serde_yaml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))
}

/// Resolve a path that may be relative to the config file's parent
fn resolve_path(base: &Path, path_str: &str) -> PathBuf {
    let path = PathBuf::from(path_str);
    if path.is_absolute() {
        path
    } else {
        base.join(path)
            .canonicalize()
            .unwrap_or_else(|_| base.join(path_str))
    }
}

/// Merge a parsed config file and environment lookups over the defaults
fn resolve(
    file: Option<(PathBuf, ConfigFile)>,
    env: impl Fn(&str) -> Option<String>,
) -> Result<OrchestratorConfig> {
    let mut config = OrchestratorConfig::default();

    if let Some((path, file)) = file {
        if let Some(ref home) = file.home {
            let exset_dir = path.parent().unwrap_or(Path::new("."));
            config.home = resolve_path(exset_dir, home);
        }

        if let Some(builder) = file.builder {
            let b = &mut config.builder;
            b.image = builder.image.unwrap_or_else(|| b.image.clone());
            b.runtime_binary = builder
                .runtime_binary
                .unwrap_or_else(|| b.runtime_binary.clone());
            b.timeout_seconds = builder.timeout_seconds.unwrap_or(b.timeout_seconds);
            b.poll_interval_seconds = builder
                .poll_interval_seconds
                .unwrap_or(b.poll_interval_seconds);
            b.start_timeout_seconds = builder
                .start_timeout_seconds
                .unwrap_or(b.start_timeout_seconds);
            b.storage_address = builder
                .storage_address
                .unwrap_or_else(|| b.storage_address.clone());
        }

        if let Some(saga) = file.saga {
            let s = &mut config.saga;
            s.timeout_seconds = saga.timeout_seconds.unwrap_or(s.timeout_seconds);
            s.deduplication_enabled = saga
                .deduplication_enabled
                .unwrap_or(s.deduplication_enabled);
            s.replay_log_level = saga
                .replay_log_level
                .unwrap_or_else(|| s.replay_log_level.clone());
        }

        if let Some(callback) = file.callback {
            config.callback.timeout_seconds = callback
                .timeout_seconds
                .unwrap_or(config.callback.timeout_seconds);
        }

        config.max_concurrent_jobs = file.max_concurrent_jobs.unwrap_or(config.max_concurrent_jobs);
        config.config_file = Some(path);
    }

    // Environment wins over the file
    if let Some(home) = env(ENV_HOME) {
        config.home = PathBuf::from(home);
    }
    if let Some(image) = env(ENV_BUILDER_IMAGE) {
        config.builder.image = image;
    }
    if let Some(timeout) = env(ENV_BUILDER_TIMEOUT) {
        config.builder.timeout_seconds = timeout
            .trim()
            .parse()
            .with_context(|| format!("{} must be a number of seconds, got '{}'", ENV_BUILDER_TIMEOUT, timeout))?;
    }

    if config.max_concurrent_jobs == 0 {
        anyhow::bail!("max_concurrent_jobs must be at least 1");
    }

    Ok(config)
}

/// Load configuration from all sources
fn load_config() -> Result<OrchestratorConfig> {
    let cwd = std::env::current_dir().context("Failed to determine current directory")?;

    let file = match find_config_file(&cwd) {
        Some(path) => {
            let parsed = load_config_file(&path)?;
            Some((path, parsed))
        }
        None => None,
    };

    resolve(file, |key| std::env::var(key).ok())
}

/// Get the global configuration (loads once, then cached)
pub fn config() -> Result<&'static OrchestratorConfig> {
    let result = CONFIG.get_or_init(|| load_config().map_err(|e| format!("{:#}", e)));

    match result {
        Ok(config) => Ok(config),
        Err(e) => anyhow::bail!("{}", e),
    }
}

/// Force reload configuration (useful for testing)
pub fn reload_config() -> Result<OrchestratorConfig> {
    load_config()
}

/// Load configuration from an explicit file, still honouring the environment
pub fn load_from(path: &Path) -> Result<OrchestratorConfig> {
    let parsed = load_config_file(path)?;
    resolve(Some((path.to_path_buf(), parsed)), |key| std::env::var(key).ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    fn no_env(_: &str) -> Option<String> {
        None
    }

    #[test]
    fn test_defaults_without_file() {
        let config = resolve(None, no_env).unwrap();

        assert_eq!(config.builder.timeout_seconds, 300);
        assert_eq!(config.builder.poll_interval_seconds, 2);
        assert_eq!(config.builder.start_timeout_seconds, 30);
        assert_eq!(config.saga.timeout_seconds, 120);
        assert!(config.saga.deduplication_enabled);
        assert_eq!(config.callback.timeout_seconds, 30);
        assert_eq!(config.max_concurrent_jobs, 4);
        assert_eq!(config.replay_level(), tracing::Level::INFO);
        assert!(config.config_file.is_none());
    }

    #[test]
    fn test_config_file_parsing() {
        let temp = TempDir::new().unwrap();
        let exset_dir = temp.path().join(".exset");
        std::fs::create_dir_all(&exset_dir).unwrap();

        let config_path = exset_dir.join("config.yaml");
        let mut file = std::fs::File::create(&config_path).unwrap();
        writeln!(
            file,
            r#"
version: "1.0"
home: ./state
builder:
  image: registry.local/builder:2
  runtime_binary: docker
  timeout_seconds: 45
saga:
  deduplication_enabled: false
  replay_log_level: debug
max_concurrent_jobs: 8
"#
        )
        .unwrap();

        let parsed = load_config_file(&config_path).unwrap();
        let config = resolve(Some((config_path.clone(), parsed)), no_env).unwrap();

        assert_eq!(config.home, exset_dir.join("state"));
        assert_eq!(config.builder.image, "registry.local/builder:2");
        assert_eq!(config.builder.runtime_binary, "docker");
        assert_eq!(config.builder.timeout(), Duration::from_secs(45));
        assert_eq!(config.builder.poll_interval_seconds, 2);
        assert!(!config.saga.deduplication_enabled);
        assert_eq!(config.replay_level(), tracing::Level::DEBUG);
        assert_eq!(config.max_concurrent_jobs, 8);
        assert_eq!(config.config_file, Some(config_path));
    }

    #[test]
    fn test_env_overrides_file() {
        let file = ConfigFile {
            builder: Some(BuilderFileConfig {
                image: Some("from-file".to_string()),
                timeout_seconds: Some(10),
                ..Default::default()
            }),
            ..Default::default()
        };

        let env = |key: &str| match key {
            ENV_HOME => Some("/srv/exset".to_string()),
            ENV_BUILDER_IMAGE => Some("from-env".to_string()),
            ENV_BUILDER_TIMEOUT => Some("90".to_string()),
            _ => None,
        };

        let config = resolve(Some((PathBuf::from("/p/.exset/config.yaml"), file)), env).unwrap();

        assert_eq!(config.home, PathBuf::from("/srv/exset"));
        assert_eq!(config.builder.image, "from-env");
        assert_eq!(config.builder.timeout_seconds, 90);
        assert_eq!(config.database_path(), PathBuf::from("/srv/exset/exset.db"));
        assert_eq!(config.batches_dir(), PathBuf::from("/srv/exset/batches"));
    }

    #[test]
    fn test_invalid_env_timeout_rejected() {
        let env = |key: &str| (key == ENV_BUILDER_TIMEOUT).then(|| "soon".to_string());
        assert!(resolve(None, env).is_err());
    }

    #[test]
    fn test_zero_concurrency_rejected() {
        let file = ConfigFile {
            max_concurrent_jobs: Some(0),
            ..Default::default()
        };
        assert!(resolve(Some((PathBuf::from("/p/.exset/config.yaml"), file)), no_env).is_err());
    }

    #[test]
    fn test_find_config_in_parent() {
        let temp = TempDir::new().unwrap();
        let exset_dir = temp.path().join(".exset");
        std::fs::create_dir_all(&exset_dir).unwrap();
        std::fs::write(exset_dir.join("config.yaml"), "version: \"1.0\"\n").unwrap();

        let nested = temp.path().join("a").join("b");
        std::fs::create_dir_all(&nested).unwrap();

        assert_eq!(find_config_file(&nested), Some(exset_dir.join("config.yaml")));
    }

    #[test]
    fn test_resolve_relative_path() {
        let base = PathBuf::from("/home/user/project");

        assert_eq!(
            resolve_path(&base, "/absolute/path"),
            PathBuf::from("/absolute/path")
        );
        assert_eq!(
            resolve_path(&base, "./subdir"),
            PathBuf::from("/home/user/project/subdir")
        );
    }
}
