use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::scan::SsidMatch;

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct Config {
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub connect: ConnectConfig,
    #[serde(default)]
    pub commands: CommandsConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct StoreConfig {
    /// SQLite database holding the `networks` table.
    pub database: PathBuf,
    /// ifupdown configuration file holding the profiles.
    pub interfaces_file: PathBuf,
}

impl Default for StoreConfig {
    fn default() -> Self {
        let database = dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("/var/lib"))
            .join("wifi-manager")
            .join("networks.db");
        Self {
            database,
            interfaces_file: PathBuf::from("/etc/network/interfaces"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ConnectConfig {
    /// Delay between two activation attempts.
    pub retry_after_secs: u64,
    /// Wall-clock budget for all attempts, measured from the first one.
    pub timeout_secs: u64,
    /// How a requested SSID is matched against scan results on save.
    pub ssid_match: SsidMatch,
}

impl Default for ConnectConfig {
    fn default() -> Self {
        Self {
            retry_after_secs: 3,
            timeout_secs: 60,
            ssid_match: SsidMatch::Exact,
        }
    }
}

impl ConnectConfig {
    pub fn retry_after(&self) -> Duration {
        Duration::from_secs(self.retry_after_secs)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// External tools, each given as program plus leading arguments.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CommandsConfig {
    pub ifup: Vec<String>,
    pub ifdown: Vec<String>,
    pub iwlist: Vec<String>,
    pub iwgetid: Vec<String>,
    pub ip: Vec<String>,
}

impl Default for CommandsConfig {
    fn default() -> Self {
        Self {
            ifup: argv(&["sudo", "ifup"]),
            ifdown: argv(&["sudo", "ifdown"]),
            iwlist: argv(&["iwlist"]),
            iwgetid: argv(&["iwgetid"]),
            ip: argv(&["ip"]),
        }
    }
}

fn argv(parts: &[&str]) -> Vec<String> {
    parts.iter().map(|p| p.to_string()).collect()
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
    pub port: u16,
    /// Shared secret expected in `X-Api-Key`. Generated at startup if unset.
    pub api_key: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0".to_string(),
            port: 5000,
            api_key: None,
        }
    }
}

impl Config {
    /// Loads the configuration from `path`, or from the default location.
    /// A missing file yields the defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = match path {
            Some(p) => p.to_path_buf(),
            None => config_path()?,
        };
        if !path.exists() {
            return Ok(Config::default());
        }

        let content = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create config directory: {}", parent.display()))?;
        }

        let content = toml::to_string_pretty(self).context("Failed to serialize config")?;

        fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        Ok(())
    }
}

pub fn config_path() -> Result<PathBuf> {
    let config_dir = dirs::config_dir().context("Could not determine config directory")?;
    Ok(config_dir.join("wifi-manager").join("config.toml"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = Config::load(Some(&dir.path().join("absent.toml"))).unwrap();
        assert_eq!(cfg, Config::default());
        assert_eq!(cfg.connect.timeout(), Duration::from_secs(60));
        assert_eq!(cfg.connect.retry_after(), Duration::from_secs(3));
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(
            &path,
            r#"
[connect]
timeout_secs = 20
ssid_match = "case-insensitive"

[commands]
ifup = ["/sbin/ifup"]
"#,
        )
        .unwrap();

        let cfg = Config::load(Some(&path)).unwrap();
        assert_eq!(cfg.connect.timeout_secs, 20);
        assert_eq!(cfg.connect.retry_after_secs, 3);
        assert_eq!(cfg.connect.ssid_match, SsidMatch::CaseInsensitive);
        assert_eq!(cfg.commands.ifup, vec!["/sbin/ifup".to_string()]);
        assert_eq!(cfg.commands.ifdown, vec!["sudo".to_string(), "ifdown".to_string()]);
        assert_eq!(cfg.server.port, 5000);
    }

    #[test]
    fn save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");
        let mut cfg = Config::default();
        cfg.server.api_key = Some("secret".to_string());
        cfg.save(&path).unwrap();

        assert_eq!(Config::load(Some(&path)).unwrap(), cfg);
    }
}
