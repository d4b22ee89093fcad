use crate::cli::Cli;
use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Main configuration combining server and persistence settings.
///
/// Can be loaded from files, env vars, or CLI args with precedence order:
/// CLI > File > Environment > Defaults
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub persistence: PersistenceConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Publish `__keyspace@0__` / `__keyevent@0__` notifications.
    #[serde(default)]
    pub notify_keyspace_events: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            notify_keyspace_events: false,
        }
    }
}

impl ServerConfig {
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Snapshot and append-only log settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistenceConfig {
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default = "default_rdb_file")]
    pub rdb_file: PathBuf,
    #[serde(default = "default_aof_file")]
    pub aof_file: PathBuf,
    #[serde(default = "default_sync_period")]
    pub sync_period_secs: u64,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            rdb_file: default_rdb_file(),
            aof_file: default_aof_file(),
            sync_period_secs: default_sync_period(),
        }
    }
}

impl PersistenceConfig {
    pub fn sync_period(&self) -> Duration {
        Duration::from_secs(self.sync_period_secs)
    }
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    6379
}

fn default_enabled() -> bool {
    true
}

fn default_rdb_file() -> PathBuf {
    PathBuf::from("dump.rdb")
}

fn default_aof_file() -> PathBuf {
    PathBuf::from("appendonly.aof")
}

fn default_sync_period() -> u64 {
    60
}

impl Config {
    /// Create config from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Create config from any variable source, defaults for what is unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(host) = lookup("REDIS_HOST") {
            config.server.host = host;
        }
        if let Some(port) = lookup("REDIS_PORT") {
            config.server.port = parse_env("REDIS_PORT", port)?;
        }
        if let Some(path) = lookup("REDIS_RDB_FILE") {
            config.persistence.rdb_file = PathBuf::from(path);
        }
        if let Some(path) = lookup("REDIS_AOF_FILE") {
            config.persistence.aof_file = PathBuf::from(path);
        }
        if let Some(period) = lookup("REDIS_SYNC_PERIOD") {
            config.persistence.sync_period_secs = parse_env("REDIS_SYNC_PERIOD", period)?;
        }
        if let Some(enabled) = lookup("REDIS_PERSISTENCE") {
            config.persistence.enabled = parse_flag("REDIS_PERSISTENCE", enabled)?;
        }
        if let Some(enabled) = lookup("REDIS_NOTIFY_KEYSPACE_EVENTS") {
            config.server.notify_keyspace_events = parse_flag("REDIS_NOTIFY_KEYSPACE_EVENTS", enabled)?;
        }

        Ok(config)
    }

    /// Create config with CLI args taking precedence over environment and file.
    ///
    /// Precedence: CLI > File > Environment > Defaults
    pub fn from_sources(cli: &Cli) -> Result<Self, ConfigError> {
        let env_config = Self::from_env()?;

        let file_config = cli
            .config
            .as_ref()
            .map(Self::load_from_file)
            .transpose()?;

        let config = Self::merge(cli, file_config, env_config);
        config.validate()?;
        Ok(config)
    }

    /// Layers `cli` over `file` (when given) over `env`.
    pub fn merge(cli: &Cli, file: Option<Config>, env: Config) -> Self {
        let base = file.unwrap_or(env);

        let server = ServerConfig {
            host: cli.host.clone().unwrap_or(base.server.host),
            port: cli.port.unwrap_or(base.server.port),
            notify_keyspace_events: cli.notify_keyspace_events || base.server.notify_keyspace_events,
        };

        let persistence = PersistenceConfig {
            enabled: base.persistence.enabled && !cli.no_persistence,
            rdb_file: cli.rdb_file.clone().unwrap_or(base.persistence.rdb_file),
            aof_file: cli.aof_file.clone().unwrap_or(base.persistence.aof_file),
            sync_period_secs: cli
                .sync_period
                .unwrap_or(base.persistence.sync_period_secs),
        };

        Config { server, persistence }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.persistence.enabled {
            if self.persistence.sync_period_secs == 0 {
                return Err(ConfigError::Validation(
                    "sync period must be at least one second".to_string(),
                ));
            }
            if self.persistence.rdb_file == self.persistence.aof_file {
                return Err(ConfigError::Validation(
                    "snapshot and append-only log must be different files".to_string(),
                ));
            }
        }
        Ok(())
    }

    pub fn load_from_file<P: AsRef<std::path::Path>>(path: P) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&contents)?;
        Ok(config)
    }

    pub fn save_to_file<P: AsRef<std::path::Path>>(&self, path: P) -> Result<(), ConfigError> {
        let contents = serde_json::to_string_pretty(self)?;
        std::fs::write(path, contents)?;
        Ok(())
    }
}

fn parse_env<T: std::str::FromStr>(name: &'static str, value: String) -> Result<T, ConfigError> {
    value
        .parse()
        .map_err(|_| ConfigError::InvalidEnv { name, value })
}

fn parse_flag(name: &'static str, value: String) -> Result<bool, ConfigError> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidEnv { name, value }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| vars.get(name).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.server.bind_addr(), "127.0.0.1:6379");
        assert_eq!(config.persistence.rdb_file, PathBuf::from("dump.rdb"));
        assert_eq!(config.persistence.aof_file, PathBuf::from("appendonly.aof"));
        assert_eq!(config.persistence.sync_period(), Duration::from_secs(60));
        assert!(config.persistence.enabled);
        assert!(!config.server.notify_keyspace_events);
    }

    #[test]
    fn test_env_overrides() {
        let config = Config::from_lookup(lookup(&[
            ("REDIS_PORT", "7000"),
            ("REDIS_SYNC_PERIOD", "5"),
            ("REDIS_PERSISTENCE", "off"),
            ("REDIS_NOTIFY_KEYSPACE_EVENTS", "yes"),
        ]))
        .unwrap();
        assert!(config.server.notify_keyspace_events);
        assert_eq!(config.server.port, 7000);
        assert_eq!(config.persistence.sync_period_secs, 5);
        assert!(!config.persistence.enabled);

        assert!(matches!(
            Config::from_lookup(lookup(&[("REDIS_PORT", "http")])),
            Err(ConfigError::InvalidEnv { name: "REDIS_PORT", .. })
        ));
    }

    #[test]
    fn test_precedence() {
        let env = Config::from_lookup(lookup(&[("REDIS_PORT", "7000"), ("REDIS_HOST", "0.0.0.0")])).unwrap();
        let mut file = Config::default();
        file.server.port = 8000;
        let cli = Cli {
            host: Some("localhost".to_string()),
            no_persistence: true,
            ..Cli::default()
        };

        let merged = Config::merge(&cli, Some(file), env.clone());
        assert_eq!(merged.server.host, "localhost");
        assert_eq!(merged.server.port, 8000);
        assert!(!merged.persistence.enabled);

        let merged = Config::merge(&Cli::default(), None, env);
        assert_eq!(merged.server.bind_addr(), "0.0.0.0:7000");
    }

    #[test]
    fn test_validation() {
        let mut config = Config::default();
        assert!(config.validate().is_ok());

        config.persistence.sync_period_secs = 0;
        assert!(matches!(config.validate(), Err(ConfigError::Validation(_))));

        config.persistence.enabled = false;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");

        let mut config = Config::default();
        config.persistence.rdb_file = PathBuf::from("/data/dump.rdb");
        config.save_to_file(&path).unwrap();
        assert_eq!(Config::load_from_file(&path).unwrap(), config);

        std::fs::write(&path, r#"{"server": {"port": 6380}}"#).unwrap();
        let partial = Config::load_from_file(&path).unwrap();
        assert_eq!(partial.server.port, 6380);
        assert_eq!(partial.persistence, PersistenceConfig::default());
    }
}
