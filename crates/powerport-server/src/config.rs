//! Server configuration.

use powerport_core::daemon::{DaemonSettings, DEFAULT_SERVICE_USER};
use powerport_core::SuspendScope;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Server configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Data directory (`POWERPORT_DIR`, default `~/.powerport`)
    pub data_dir: PathBuf,
    /// Path to configuration file
    pub config_path: PathBuf,
    /// Address the HTTP server binds to
    pub bind_address: String,
    pub port: u16,
    /// SQLite state store
    pub database_path: PathBuf,
    /// Bootstrap API key file, written on first start
    pub api_key_file: PathBuf,
    /// Public URL of this panel, used in node configure commands
    pub panel_url: String,
    /// Basic-auth identity presented to daemons
    pub daemon_username: String,
    pub health_check_timeout_secs: u64,
    pub daemon_timeout_secs: u64,
    /// Interval of the background node health poll; 0 disables it
    pub node_poll_interval_secs: u64,
    pub max_stream_sessions: usize,
    /// Leave per-user lists untouched on suspend/unsuspend
    pub legacy_suspend_parity: bool,
}

/// Optional settings read from `config.toml`
#[derive(Debug, Default, Deserialize)]
struct FileConfig {
    bind_address: Option<String>,
    port: Option<u16>,
    database_path: Option<PathBuf>,
    panel_url: Option<String>,
    daemon_username: Option<String>,
    health_check_timeout_secs: Option<u64>,
    daemon_timeout_secs: Option<u64>,
    node_poll_interval_secs: Option<u64>,
    max_stream_sessions: Option<usize>,
    legacy_suspend_parity: Option<bool>,
}

impl Default for Config {
    fn default() -> Self {
        let home = dirs::home_dir().unwrap_or_else(|| PathBuf::from("."));
        Self::with_dir(home.join(".powerport"))
    }
}

impl Config {
    /// Defaults rooted at `data_dir`
    pub fn with_dir(data_dir: PathBuf) -> Self {
        Self {
            config_path: data_dir.join("config.toml"),
            database_path: data_dir.join("powerport.db"),
            api_key_file: data_dir.join("api-key"),
            data_dir,
            bind_address: "0.0.0.0".to_string(),
            port: 3001,
            panel_url: "http://localhost:3001".to_string(),
            daemon_username: DEFAULT_SERVICE_USER.to_string(),
            health_check_timeout_secs: 5,
            daemon_timeout_secs: 30,
            node_poll_interval_secs: 0,
            max_stream_sessions: 256,
            legacy_suspend_parity: false,
        }
    }

    /// Load configuration: defaults, then `config.toml`, then environment.
    ///
    /// Directory structure:
    /// ```text
    /// ~/.powerport/
    /// ├── config.toml           # Optional overrides
    /// ├── powerport.db          # State store
    /// └── api-key               # Bootstrap API key (0600)
    /// ```
    pub fn load() -> anyhow::Result<Self> {
        let home = dirs::home_dir().unwrap_or_else(|| PathBuf::from("."));

        // Use POWERPORT_DIR env var if set, otherwise ~/.powerport
        let data_dir = std::env::var("POWERPORT_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| home.join(".powerport"));

        Self::load_from(&data_dir, |key| std::env::var(key).ok())
    }

    /// Load from `data_dir`, reading overrides through `env`.
    pub fn load_from(data_dir: &Path, env: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        std::fs::create_dir_all(data_dir)?;

        let mut config = Self::with_dir(data_dir.to_path_buf());
        if config.config_path.exists() {
            let text = std::fs::read_to_string(&config.config_path)?;
            let file: FileConfig = toml::from_str(&text)?;
            config.apply_file(file);
        }
        config.apply_env(env)?;

        if let Some(parent) = config.database_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        Ok(config)
    }

    fn apply_file(&mut self, file: FileConfig) {
        if let Some(v) = file.bind_address {
            self.bind_address = v;
        }
        if let Some(v) = file.port {
            self.port = v;
        }
        if let Some(v) = file.database_path {
            self.database_path = self.resolve(v);
        }
        if let Some(v) = file.panel_url {
            self.panel_url = v;
        }
        if let Some(v) = file.daemon_username {
            self.daemon_username = v;
        }
        if let Some(v) = file.health_check_timeout_secs {
            self.health_check_timeout_secs = v;
        }
        if let Some(v) = file.daemon_timeout_secs {
            self.daemon_timeout_secs = v;
        }
        if let Some(v) = file.node_poll_interval_secs {
            self.node_poll_interval_secs = v;
        }
        if let Some(v) = file.max_stream_sessions {
            self.max_stream_sessions = v;
        }
        if let Some(v) = file.legacy_suspend_parity {
            self.legacy_suspend_parity = v;
        }
    }

    fn apply_env(&mut self, env: impl Fn(&str) -> Option<String>) -> anyhow::Result<()> {
        if let Some(v) = env("POWERPORT_BIND") {
            self.bind_address = v;
        }
        if let Some(v) = env("POWERPORT_PORT") {
            self.port = v
                .parse()
                .map_err(|e| anyhow::anyhow!("Invalid POWERPORT_PORT {:?}: {}", v, e))?;
        }
        if let Some(v) = env("POWERPORT_DATABASE_PATH") {
            self.database_path = self.resolve(PathBuf::from(v));
        }
        if let Some(v) = env("POWERPORT_PANEL_URL") {
            self.panel_url = v;
        }
        Ok(())
    }

    /// Relative paths are taken relative to the data directory
    fn resolve(&self, path: PathBuf) -> PathBuf {
        if path.is_absolute() {
            path
        } else {
            self.data_dir.join(path)
        }
    }

    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.bind_address, self.port)
    }

    pub fn daemon_settings(&self) -> DaemonSettings {
        DaemonSettings {
            username: self.daemon_username.clone(),
            health_timeout: Duration::from_secs(self.health_check_timeout_secs),
            request_timeout: Duration::from_secs(self.daemon_timeout_secs),
        }
    }

    pub fn suspend_scope(&self) -> SuspendScope {
        if self.legacy_suspend_parity {
            SuspendScope::RecordAndGlobal
        } else {
            SuspendScope::AllViews
        }
    }

    pub fn node_poll_interval(&self) -> Option<Duration> {
        (self.node_poll_interval_secs > 0).then(|| Duration::from_secs(self.node_poll_interval_secs))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::env;

    fn no_env(_: &str) -> Option<String> {
        None
    }

    #[test]
    fn test_default_config() {
        let config = Config::default();

        assert!(config.config_path.ends_with("config.toml"));
        assert!(config.database_path.ends_with("powerport.db"));
        assert_eq!(config.daemon_username, "Skyport");
        assert_eq!(config.health_check_timeout_secs, 5);
        assert_eq!(config.max_stream_sessions, 256);
        assert!(!config.legacy_suspend_parity);
        assert!(config.node_poll_interval().is_none());
    }

    #[test]
    fn test_load_creates_directory() {
        let temp_dir = tempfile::tempdir().unwrap();
        let data_dir = temp_dir.path().join("nested");

        let config = Config::load_from(&data_dir, no_env).unwrap();

        assert!(data_dir.exists());
        assert!(config.database_path.starts_with(&data_dir));
    }

    #[test]
    fn test_file_overrides_defaults() {
        let temp_dir = tempfile::tempdir().unwrap();
        std::fs::write(
            temp_dir.path().join("config.toml"),
            r#"
port = 8080
database_path = "state/panel.db"
node_poll_interval_secs = 60
legacy_suspend_parity = true
"#,
        )
        .unwrap();

        let config = Config::load_from(temp_dir.path(), no_env).unwrap();

        assert_eq!(config.port, 8080);
        assert_eq!(config.database_path, temp_dir.path().join("state/panel.db"));
        assert!(temp_dir.path().join("state").exists());
        assert_eq!(config.node_poll_interval(), Some(Duration::from_secs(60)));
        assert_eq!(config.suspend_scope(), SuspendScope::RecordAndGlobal);
        assert_eq!(config.bind_address, "0.0.0.0");
    }

    #[test]
    fn test_env_overrides_file() {
        let temp_dir = tempfile::tempdir().unwrap();
        std::fs::write(temp_dir.path().join("config.toml"), "port = 8080\n").unwrap();

        let vars: HashMap<&str, &str> = [
            ("POWERPORT_PORT", "9090"),
            ("POWERPORT_BIND", "127.0.0.1"),
            ("POWERPORT_PANEL_URL", "https://panel.example.com"),
        ]
        .into_iter()
        .collect();
        let config = Config::load_from(temp_dir.path(), |k| vars.get(k).map(|v| v.to_string())).unwrap();

        assert_eq!(config.listen_addr(), "127.0.0.1:9090");
        assert_eq!(config.panel_url, "https://panel.example.com");
    }

    #[test]
    fn test_invalid_port_env_is_error() {
        let temp_dir = tempfile::tempdir().unwrap();
        let result = Config::load_from(temp_dir.path(), |k| {
            (k == "POWERPORT_PORT").then(|| "not-a-port".to_string())
        });
        assert!(result.is_err());
    }

    #[test]
    fn test_malformed_file_is_error() {
        let temp_dir = tempfile::tempdir().unwrap();
        std::fs::write(temp_dir.path().join("config.toml"), "port = \"high\"\n").unwrap();

        assert!(Config::load_from(temp_dir.path(), no_env).is_err());
    }

    #[test]
    fn test_config_load_with_custom_dir() {
        let temp_dir = tempfile::tempdir().unwrap();
        let custom_path = temp_dir.path().to_path_buf();

        // Save current value to restore later
        let old_val = env::var("POWERPORT_DIR").ok();
        // SAFETY: This test runs in isolation and we restore the env var afterward
        unsafe { env::set_var("POWERPORT_DIR", &custom_path) };

        let config = Config::load().unwrap();

        assert!(config.config_path.starts_with(&custom_path));
        assert!(config.api_key_file.starts_with(&custom_path));

        // SAFETY: Restoring environment to previous state
        unsafe {
            if let Some(val) = old_val {
                env::set_var("POWERPORT_DIR", val);
            } else {
                env::remove_var("POWERPORT_DIR");
            }
        }
    }

    #[test]
    fn test_daemon_settings() {
        let mut config = Config::default();
        config.daemon_timeout_secs = 12;

        let settings = config.daemon_settings();
        assert_eq!(settings.request_timeout, Duration::from_secs(12));
        assert_eq!(settings.health_timeout, Duration::from_secs(5));
    }
}
