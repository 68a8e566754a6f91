//! Layered TOML configuration for Bond.
//!
//! Reads configuration from multiple sources with precedence:
//! CLI flags > env vars > config file > defaults

use bond_mcp::{McpConfig, McpServerConfig};
use bond_types::ConfigError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// The default per-request timeout in milliseconds.
pub const DEFAULT_TIMEOUT_MS: u64 = 30000;

/// Environment variable naming the config directory.
pub const CONFIG_DIR_ENV: &str = "BOND_CONFIG_DIR";

/// Environment variable overriding the request timeout.
pub const TIMEOUT_ENV: &str = "BOND_TIMEOUT_MS";

/// Resolved configuration.
#[derive(Debug, Clone)]
pub struct BondConfig {
    /// Default request timeout for clients without a configured server.
    pub timeout_ms: u64,
    pub mcp: McpConfig,
    pub config_dir: PathBuf,
    /// The settings file that was consulted (it may not exist).
    pub config_file: PathBuf,
}

/// Settings that can be read from a TOML config file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SettingsFile {
    #[serde(default)]
    pub mcp: McpSettings,
}

/// The `[mcp]` section.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct McpSettings {
    pub timeout_ms: Option<u64>,
    #[serde(default)]
    pub servers: HashMap<String, McpServerConfig>,
}

/// CLI overrides that take highest precedence.
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    pub config_path: Option<PathBuf>,
    pub timeout_ms: Option<u64>,
}

impl BondConfig {
    /// Load configuration from all sources, applying precedence rules.
    ///
    /// Precedence (highest to lowest):
    /// 1. CLI flags
    /// 2. Environment variables (`BOND_TIMEOUT_MS`)
    /// 3. Config file (`--config`, else `~/.bond/config.toml`)
    /// 4. Defaults
    ///
    /// An explicit timeout from the CLI or environment applies to every
    /// configured server as well.
    pub fn load(overrides: CliOverrides) -> Result<Self, ConfigError> {
        Self::load_with(overrides, |key| std::env::var(key).ok())
    }

    /// [`load`](Self::load) with a custom environment lookup.
    pub fn load_with(
        overrides: CliOverrides,
        env: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        let config_dir = config_dir_with(&env);
        let config_file = overrides
            .config_path
            .clone()
            .unwrap_or_else(|| config_dir.join("config.toml"));
        let settings = load_settings_file(&config_file);

        let env_timeout = env(TIMEOUT_ENV)
            .map(|raw| {
                raw.trim()
                    .parse::<u64>()
                    .map_err(|e| ConfigError::InvalidValue {
                        key: TIMEOUT_ENV.into(),
                        message: format!("'{raw}': {e}"),
                    })
            })
            .transpose()?;

        // Resolve timeout: CLI > env > config file > default
        let explicit_timeout = overrides.timeout_ms.or(env_timeout);
        let timeout_ms = explicit_timeout
            .or(settings.mcp.timeout_ms)
            .unwrap_or(DEFAULT_TIMEOUT_MS);

        let mut servers = settings.mcp.servers;
        for (name, server) in servers.iter_mut() {
            if server.command.trim().is_empty() {
                return Err(ConfigError::InvalidValue {
                    key: format!("mcp.servers.{name}.command"),
                    message: "must not be empty".into(),
                });
            }
            if let Some(ms) = explicit_timeout {
                server.timeout_ms = ms;
            }
        }

        Ok(BondConfig {
            timeout_ms,
            mcp: McpConfig { servers },
            config_dir,
            config_file,
        })
    }

    /// Look up a configured server.
    pub fn server(&self, name: &str) -> Result<&McpServerConfig, ConfigError> {
        self.mcp
            .servers
            .get(name)
            .ok_or_else(|| ConfigError::MissingKey {
                key: format!("mcp.servers.{name}"),
            })
    }
}

/// Get the Bond config directory path (~/.bond/).
pub fn config_dir() -> PathBuf {
    config_dir_with(|key| std::env::var(key).ok())
}

fn config_dir_with(env: impl Fn(&str) -> Option<String>) -> PathBuf {
    if let Some(dir) = env(CONFIG_DIR_ENV) {
        return PathBuf::from(dir);
    }
    dirs_next::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".bond")
}

/// Load and parse a TOML settings file, returning defaults on any error.
fn load_settings_file(path: &Path) -> SettingsFile {
    match std::fs::read_to_string(path) {
        Ok(content) => toml::from_str(&content).unwrap_or_else(|e| {
            tracing::warn!("Failed to parse {}: {}", path.display(), e);
            SettingsFile::default()
        }),
        Err(_) => SettingsFile::default(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn no_env(_: &str) -> Option<String> {
        None
    }

    fn write_config(dir: &Path, content: &str) -> PathBuf {
        let path = dir.join("config.toml");
        std::fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn test_default_settings() {
        let settings = SettingsFile::default();
        assert!(settings.mcp.timeout_ms.is_none());
        assert!(settings.mcp.servers.is_empty());
    }

    #[test]
    fn test_settings_toml_parse() {
        let toml_str = r#"
[mcp]
timeout_ms = 10000

[mcp.servers.weather]
command = "python3"
args = ["weather_server.py"]
cwd = "/srv/weather"
"#;
        let settings: SettingsFile = toml::from_str(toml_str).unwrap();
        assert_eq!(settings.mcp.timeout_ms, Some(10000));
        let weather = &settings.mcp.servers["weather"];
        assert_eq!(weather.command, "python3");
        assert_eq!(weather.timeout_ms, 30000);
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let dir_str = dir.path().to_string_lossy().into_owned();
        let config = BondConfig::load_with(CliOverrides::default(), |key| {
            (key == CONFIG_DIR_ENV).then(|| dir_str.clone())
        })
        .unwrap();
        assert_eq!(config.timeout_ms, DEFAULT_TIMEOUT_MS);
        assert!(config.mcp.servers.is_empty());
        assert_eq!(config.config_dir, dir.path());
        assert_eq!(config.config_file, dir.path().join("config.toml"));
    }

    #[test]
    fn test_file_timeout_used_when_no_override() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(
            dir.path(),
            r#"
[mcp]
timeout_ms = 1500

[mcp.servers.fs]
command = "npx"
timeout_ms = 9000
"#,
        );
        let overrides = CliOverrides {
            config_path: Some(path),
            timeout_ms: None,
        };
        let config = BondConfig::load_with(overrides, no_env).unwrap();
        assert_eq!(config.timeout_ms, 1500);
        assert_eq!(config.server("fs").unwrap().timeout_ms, 9000);
    }

    #[test]
    fn test_precedence_cli_over_env_over_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(
            dir.path(),
            r#"
[mcp]
timeout_ms = 1500

[mcp.servers.fs]
command = "npx"
"#,
        );
        let env = |key: &str| (key == TIMEOUT_ENV).then(|| "2500".to_string());

        let config = BondConfig::load_with(
            CliOverrides {
                config_path: Some(path.clone()),
                timeout_ms: None,
            },
            env,
        )
        .unwrap();
        assert_eq!(config.timeout_ms, 2500);
        assert_eq!(config.server("fs").unwrap().timeout_ms, 2500);

        let config = BondConfig::load_with(
            CliOverrides {
                config_path: Some(path),
                timeout_ms: Some(700),
            },
            env,
        )
        .unwrap();
        assert_eq!(config.timeout_ms, 700);
        assert_eq!(config.server("fs").unwrap().timeout_ms, 700);
    }

    #[test]
    fn test_invalid_env_timeout() {
        let err = BondConfig::load_with(CliOverrides::default(), |key| {
            (key == TIMEOUT_ENV).then(|| "soon".to_string())
        })
        .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { ref key, .. } if key == TIMEOUT_ENV));
    }

    #[test]
    fn test_unparseable_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(dir.path(), "[mcp\ntimeout_ms = ");
        let config = BondConfig::load_with(
            CliOverrides {
                config_path: Some(path),
                timeout_ms: None,
            },
            no_env,
        )
        .unwrap();
        assert_eq!(config.timeout_ms, DEFAULT_TIMEOUT_MS);
    }

    #[test]
    fn test_empty_command_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(dir.path(), "[mcp.servers.blank]\ncommand = \"  \"\n");
        let err = BondConfig::load_with(
            CliOverrides {
                config_path: Some(path),
                timeout_ms: None,
            },
            no_env,
        )
        .unwrap_err();
        assert_eq!(
            err.to_string(),
            "Invalid configuration value for 'mcp.servers.blank.command': must not be empty"
        );
    }

    #[test]
    fn test_unknown_server_is_missing_key() {
        let config = BondConfig::load_with(
            CliOverrides {
                config_path: Some(PathBuf::from("/nonexistent/bond/config.toml")),
                timeout_ms: None,
            },
            no_env,
        )
        .unwrap();
        assert!(matches!(
            config.server("nope"),
            Err(ConfigError::MissingKey { .. })
        ));
    }
}
