//! Configuration for the netmig CLI.
//!
//! Configuration is loaded from multiple sources and merged:
//! 1. Global config: `~/.config/netmig/config.json`
//! 2. Project config: `netmig.json` in the working directory
//! 3. Environment overrides: `NETMIG_DATA_DIR`, `NETMIG_CONCURRENCY`,
//!    `NETMIG_COMMAND_TIMEOUT_SECS`
//!
//! String values may reference environment variables as `{env:VAR_NAME}`.

use netmig_device::{EnvCredentialResolver, TransportConfig};
use netmig_snapshot::{
    Command, CommandCatalog, CommandSet, CommandSetError, RetryPolicy, RunnerConfig,
};
use netmig_util::log::LogLevel;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use thiserror::Error;

const DATA_DIR_ENV: &str = "NETMIG_DATA_DIR";
const CONCURRENCY_ENV: &str = "NETMIG_CONCURRENCY";
const COMMAND_TIMEOUT_ENV: &str = "NETMIG_COMMAND_TIMEOUT_SECS";

/// Static regex for variable substitution, compiled once.
static VAR_REGEX: OnceLock<Result<regex::Regex, regex::Error>> = OnceLock::new();

fn var_regex() -> Result<&'static regex::Regex, ConfigError> {
    VAR_REGEX
        .get_or_init(|| regex::Regex::new(r"\{env:([^}]+)\}"))
        .as_ref()
        .map_err(|e| ConfigError::Pattern(e.to_string()))
}

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// Invalid JSON syntax or shape.
    #[error("invalid config at {path}: {message}")]
    InvalidJson { path: String, message: String },

    /// Environment variable not found during substitution.
    #[error("environment variable not found: {name}")]
    EnvVarNotFound { name: String },

    /// An environment override could not be parsed.
    #[error("invalid value for {name}: '{value}'")]
    InvalidValue { name: String, value: String },

    #[error("invalid substitution pattern: {0}")]
    Pattern(String),

    #[error("invalid command set for class '{class}': {source}")]
    CommandSet {
        class: String,
        #[source]
        source: CommandSetError,
    },
}

/// Main configuration structure.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Where snapshots are stored.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data_dir: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log_level: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub runner: Option<RunnerSettings>,

    /// External transport used to reach devices.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transport: Option<TransportConfig>,

    /// Names of the environment variables holding credentials.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub credentials: Option<CredentialSettings>,

    /// Command sets keyed by device class.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub command_sets: Option<HashMap<String, Vec<Command>>>,
}

/// Runner settings. Unset fields fall back to the runner defaults.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunnerSettings {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub concurrency: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub command_timeout_secs: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub connect_timeout_secs: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry: Option<RetryPolicy>,
}

impl RunnerSettings {
    fn merge(self, other: Self) -> Self {
        Self {
            concurrency: merge_option(self.concurrency, other.concurrency),
            command_timeout_secs: merge_option(
                self.command_timeout_secs,
                other.command_timeout_secs,
            ),
            connect_timeout_secs: merge_option(
                self.connect_timeout_secs,
                other.connect_timeout_secs,
            ),
            retry: merge_option(self.retry, other.retry),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CredentialSettings {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username_env: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password_env: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub jumphost_env: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub jumphost_username_env: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub jumphost_password_env: Option<String>,
}

impl Config {
    /// Load configuration from all sources.
    ///
    /// Returns the merged config and the files it was read from.
    pub async fn load(project_dir: Option<&Path>) -> Result<(Self, Vec<PathBuf>), ConfigError> {
        let mut config = Config::default();
        let mut sources = Vec::new();

        if let Some(global_dir) = Self::global_config_dir() {
            let path = global_dir.join("config.json");
            if path.exists() {
                config = config.merge(Self::load_file(&path).await?);
                sources.push(path);
            }
        }

        if let Some(dir) = project_dir {
            let path = netmig_util::path::project_config_file(dir);
            if path.exists() {
                config = config.merge(Self::load_file(&path).await?);
                sources.push(path);
            }
        }

        let config = config.apply_env(|name| std::env::var(name).ok())?;
        Ok((config, sources))
    }

    /// Get the global config directory.
    pub fn global_config_dir() -> Option<PathBuf> {
        netmig_util::path::config_dir()
    }

    /// Load configuration from a file.
    pub async fn load_file(path: &Path) -> Result<Self, ConfigError> {
        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|source| ConfigError::Io {
                path: path.display().to_string(),
                source,
            })?;
        let content = Self::substitute_variables(&content, |name| std::env::var(name).ok())?;
        Self::parse(&content, &path.display().to_string())
    }

    /// Parse configuration text.
    pub fn parse(content: &str, source: &str) -> Result<Self, ConfigError> {
        serde_json::from_str(content).map_err(|e| ConfigError::InvalidJson {
            path: source.to_string(),
            message: e.to_string(),
        })
    }

    /// Replace `{env:VAR_NAME}` references using `lookup`.
    fn substitute_variables(
        content: &str,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<String, ConfigError> {
        let re = var_regex()?;
        let mut result = content.to_string();

        for cap in re.captures_iter(content) {
            let (Some(full_match), Some(name)) = (cap.get(0), cap.get(1)) else {
                continue;
            };
            let value = lookup(name.as_str()).ok_or_else(|| ConfigError::EnvVarNotFound {
                name: name.as_str().to_string(),
            })?;
            result = result.replace(full_match.as_str(), &value);
        }

        Ok(result)
    }

    /// Apply `NETMIG_*` overrides.
    fn apply_env(mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        if let Some(dir) = lookup(DATA_DIR_ENV).filter(|d| !d.trim().is_empty()) {
            self.data_dir = Some(PathBuf::from(dir));
        }

        let mut runner = self.runner.take().unwrap_or_default();
        if let Some(value) = lookup(CONCURRENCY_ENV) {
            runner.concurrency = Some(parse_env(CONCURRENCY_ENV, &value)?);
        }
        if let Some(value) = lookup(COMMAND_TIMEOUT_ENV) {
            runner.command_timeout_secs = Some(parse_env(COMMAND_TIMEOUT_ENV, &value)?);
        }
        if runner != RunnerSettings::default() {
            self.runner = Some(runner);
        }

        Ok(self)
    }

    /// Merge another config into this one (other takes precedence).
    pub fn merge(mut self, other: Self) -> Self {
        if other.data_dir.is_some() {
            self.data_dir = other.data_dir;
        }
        if other.log_level.is_some() {
            self.log_level = other.log_level;
        }

        self.runner = match (self.runner, other.runner) {
            (Some(base), Some(other)) => Some(base.merge(other)),
            (base, None) => base,
            (None, other) => other,
        };
        self.transport = merge_option(self.transport, other.transport);
        self.credentials = merge_option(self.credentials, other.credentials);
        self.command_sets = merge_hashmap(self.command_sets, other.command_sets);

        self
    }

    /// Snapshot directory: configured, or the platform data dir.
    pub fn data_dir(&self) -> Option<PathBuf> {
        self.data_dir.clone().or_else(netmig_util::path::data_dir)
    }

    pub fn log_level(&self) -> Option<LogLevel> {
        self.log_level.as_deref().and_then(LogLevel::parse)
    }

    /// Runner settings with defaults filled in.
    pub fn runner_config(&self) -> RunnerConfig {
        let mut config = RunnerConfig::default();
        if let Some(runner) = &self.runner {
            if let Some(concurrency) = runner.concurrency {
                config.concurrency = concurrency;
            }
            if let Some(secs) = runner.command_timeout_secs {
                config.command_timeout_secs = secs;
            }
            if let Some(secs) = runner.connect_timeout_secs {
                config.connect_timeout_secs = secs;
            }
            if let Some(retry) = runner.retry {
                config.retry = retry;
            }
        }
        config
    }

    pub fn transport(&self) -> TransportConfig {
        self.transport.clone().unwrap_or_default()
    }

    /// Credential resolver reading the configured variable names.
    pub fn credential_resolver(&self) -> EnvCredentialResolver {
        let mut resolver = EnvCredentialResolver::default();
        let Some(settings) = &self.credentials else {
            return resolver;
        };
        if let Some(var) = &settings.username_env {
            resolver.username_var = var.clone();
        }
        if let Some(var) = &settings.password_env {
            resolver.password_var = var.clone();
        }
        if let Some(var) = &settings.jumphost_env {
            resolver.jumphost_var = var.clone();
        }
        if let Some(var) = &settings.jumphost_username_env {
            resolver.jumphost_username_var = var.clone();
        }
        if let Some(var) = &settings.jumphost_password_env {
            resolver.jumphost_password_var = var.clone();
        }
        resolver
    }

    /// Build the per-class command catalog from `command_sets`.
    pub fn catalog(&self) -> Result<CommandCatalog, ConfigError> {
        let mut catalog = CommandCatalog::new();
        for (class, commands) in self.command_sets.iter().flatten() {
            let set = CommandSet::new(class.clone(), commands.clone()).map_err(|source| {
                ConfigError::CommandSet {
                    class: class.clone(),
                    source,
                }
            })?;
            catalog.insert(class.clone(), set);
        }
        Ok(catalog)
    }
}

fn parse_env<T: std::str::FromStr>(name: &str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::InvalidValue {
        name: name.to_string(),
        value: value.to_string(),
    })
}

/// Merge two Option values.
fn merge_option<T>(base: Option<T>, other: Option<T>) -> Option<T> {
    match (base, other) {
        (_, Some(o)) => Some(o),
        (b, None) => b,
    }
}

/// Merge two HashMaps.
fn merge_hashmap<K: std::hash::Hash + Eq, V>(
    base: Option<HashMap<K, V>>,
    other: Option<HashMap<K, V>>,
) -> Option<HashMap<K, V>> {
    match (base, other) {
        (Some(mut b), Some(o)) => {
            b.extend(o);
            Some(b)
        }
        (b, None) => b,
        (None, o) => o,
    }
}
