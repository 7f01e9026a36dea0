use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

pub const CONFIG_FILE_NAME: &str = "mimsy_config.toml";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MimsyConfig {
    #[serde(default = "default_router_url")]
    pub router_url: String,

    #[serde(default = "default_act1_url")]
    pub act1_url: String,

    #[serde(default)]
    pub api_token: Option<String>,

    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    /// SQLite file backing the durable store (act, landing flag).
    #[serde(default = "default_database_path")]
    pub database_path: String,

    /// JSON array of videos; the built-in demo catalog is used when unset.
    #[serde(default)]
    pub catalog_path: Option<String>,

    #[serde(default)]
    pub skip_landing: bool,

    #[serde(default = "default_true")]
    pub idle_enabled: bool,
}

fn default_router_url() -> String {
    "http://localhost:8787/api/router".to_string()
}

fn default_act1_url() -> String {
    "http://localhost:8787/api/act1".to_string()
}

fn default_request_timeout_secs() -> u64 {
    60
}

fn default_database_path() -> String {
    "mimsy_session.db".to_string()
}

fn default_true() -> bool {
    true
}

impl Default for MimsyConfig {
    fn default() -> Self {
        Self {
            router_url: default_router_url(),
            act1_url: default_act1_url(),
            api_token: None,
            request_timeout_secs: default_request_timeout_secs(),
            database_path: default_database_path(),
            catalog_path: None,
            skip_landing: false,
            idle_enabled: true,
        }
    }
}

fn parse_flag(raw: &str) -> bool {
    raw.eq_ignore_ascii_case("1") || raw.eq_ignore_ascii_case("true") || raw.eq_ignore_ascii_case("yes")
}

impl MimsyConfig {
    fn get_base_dir() -> PathBuf {
        match std::env::current_exe() {
            Ok(exe) => exe
                .parent()
                .map(Path::to_path_buf)
                .unwrap_or_else(|| PathBuf::from(".")),
            Err(_) => PathBuf::from("."),
        }
    }

    pub fn config_path() -> PathBuf {
        Self::get_base_dir().join(CONFIG_FILE_NAME)
    }

    /// Load `mimsy_config.toml` next to the executable, falling back to
    /// defaults plus environment variables.
    pub fn load() -> Self {
        let path = Self::config_path();
        match Self::load_from(&path) {
            Ok(Some(config)) => {
                tracing::info!("Loaded config from {:?}", path);
                return config;
            }
            Ok(None) => {}
            Err(e) => tracing::error!("{:#}", e),
        }

        tracing::warn!("No config file found, using defaults + env vars");
        Self::from_env()
    }

    /// `Ok(None)` when the file does not exist.
    pub fn load_from(path: &Path) -> Result<Option<Self>> {
        let contents = match fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(e).with_context(|| format!("Failed to read config {:?}", path));
            }
        };
        let config = toml::from_str::<MimsyConfig>(&contents)
            .with_context(|| format!("Failed to parse {:?}", path))?;
        Ok(Some(config))
    }

    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_path())
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        let toml_string = toml::to_string_pretty(self).context("Failed to serialize config")?;

        fs::write(path, toml_string)
            .with_context(|| format!("Failed to write config to {:?}", path))?;

        tracing::info!("Saved config to {:?}", path);
        Ok(())
    }

    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(url) = lookup("MIMSY_ROUTER_URL") {
            config.router_url = url;
        }

        if let Some(url) = lookup("MIMSY_ACT1_URL") {
            config.act1_url = url;
        }

        if let Some(token) = lookup("MIMSY_API_TOKEN") {
            config.api_token = Some(token);
        }

        if let Some(path) = lookup("MIMSY_DB_PATH") {
            config.database_path = path;
        }

        if let Some(path) = lookup("MIMSY_CATALOG_PATH") {
            config.catalog_path = Some(path);
        }

        if let Some(enabled) = lookup("MIMSY_SKIP_LANDING") {
            config.skip_landing = parse_flag(&enabled);
        }

        if let Some(enabled) = lookup("MIMSY_IDLE_ENABLED") {
            config.idle_enabled = parse_flag(&enabled);
        }

        if let Some(timeout) = lookup("MIMSY_REQUEST_TIMEOUT_SECS") {
            if let Ok(seconds) = timeout.parse() {
                config.request_timeout_secs = seconds;
            }
        }

        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn partial_toml_fills_defaults() {
        let config: MimsyConfig = toml::from_str(
            r#"
router_url = "https://mimsy.example/api/router"
skip_landing = true
"#,
        )
        .unwrap();

        assert_eq!(config.router_url, "https://mimsy.example/api/router");
        assert!(config.skip_landing);
        assert!(config.idle_enabled);
        assert_eq!(config.database_path, "mimsy_session.db");
        assert_eq!(config.request_timeout_secs, 60);
    }

    #[test]
    fn env_overrides_apply() {
        let vars: HashMap<&str, &str> = [
            ("MIMSY_API_TOKEN", "tok"),
            ("MIMSY_SKIP_LANDING", "yes"),
            ("MIMSY_IDLE_ENABLED", "0"),
            ("MIMSY_REQUEST_TIMEOUT_SECS", "nope"),
        ]
        .into_iter()
        .collect();
        let config = MimsyConfig::from_lookup(|key| vars.get(key).map(|v| v.to_string()));

        assert_eq!(config.api_token.as_deref(), Some("tok"));
        assert!(config.skip_landing);
        assert!(!config.idle_enabled);
        assert_eq!(config.request_timeout_secs, 60);
    }

    #[test]
    fn save_then_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE_NAME);
        assert!(MimsyConfig::load_from(&path).unwrap().is_none());

        let config = MimsyConfig {
            catalog_path: Some("videos.json".to_string()),
            ..MimsyConfig::default()
        };
        config.save_to(&path).unwrap();

        assert_eq!(MimsyConfig::load_from(&path).unwrap(), Some(config));
    }

    #[test]
    fn malformed_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE_NAME);
        fs::write(&path, "router_url = [").unwrap();
        assert!(MimsyConfig::load_from(&path).is_err());
    }
}
