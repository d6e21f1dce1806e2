use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_PORT: u16 = 5000;

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Reject `/download` requests that do not name a session.
    pub require_session_id: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: DEFAULT_PORT,
            require_session_id: false,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct DownloadConfig {
    /// Root for per-request staging directories. Defaults to the system temp dir.
    pub staging_dir: Option<PathBuf>,
    pub fetch_timeout_secs: u64,
    /// Staging directories older than this are treated as orphans at startup.
    pub stale_after_secs: u64,
    pub ytdlp_path: String,
    /// Arguments placed before yt-dlp's own, e.g. `["-m", "yt_dlp"]` with `python3`.
    pub ytdlp_args: Vec<String>,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            staging_dir: None,
            fetch_timeout_secs: 30 * 60,
            stale_after_secs: 6 * 60 * 60,
            ytdlp_path: "yt-dlp".to_string(),
            ytdlp_args: Vec::new(),
        }
    }
}

impl DownloadConfig {
    pub fn staging_root(&self) -> PathBuf {
        self.staging_dir.clone().unwrap_or_else(std::env::temp_dir)
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }

    pub fn stale_after(&self) -> Duration {
        Duration::from_secs(self.stale_after_secs)
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct LoggingConfig {
    /// `json` or `text`.
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            format: "json".to_string(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub download: DownloadConfig,
    pub logging: LoggingConfig,
}

impl Config {
    pub fn from_file(path: &str) -> Result<Self> {
        let data = std::fs::read_to_string(Path::new(path))
            .with_context(|| format!("Failed to read config file {}", path))?;
        Self::from_toml(&data).with_context(|| format!("Failed to parse config file {}", path))
    }

    pub fn from_toml(data: &str) -> Result<Self> {
        let config: Self = toml::from_str(data)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.download.fetch_timeout_secs == 0 {
            anyhow::bail!("download.fetch_timeout_secs must be greater than 0");
        }
        Ok(())
    }

    pub fn get_logging_format(&self) -> &str {
        &self.logging.format
    }

    /// Apply environment overrides. `PORT` wins over the config file.
    pub fn apply_env(&mut self, port: Option<String>) -> Result<()> {
        if let Some(port) = port {
            self.server.port = port
                .trim()
                .parse()
                .with_context(|| format!("Invalid PORT value: {}", port))?;
        }
        Ok(())
    }

    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.server.port, 5000);
        assert_eq!(config.listen_addr(), "0.0.0.0:5000");
        assert!(!config.server.require_session_id);
        assert_eq!(config.download.ytdlp_path, "yt-dlp");
        assert_eq!(config.download.staging_root(), std::env::temp_dir());
        assert_eq!(config.get_logging_format(), "json");
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = Config::from_toml(
            r#"
            [server]
            port = 8080

            [download]
            staging_dir = "/var/tmp/grabby"
            fetch_timeout_secs = 60
            "#,
        )
        .unwrap();
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.download.staging_root(), PathBuf::from("/var/tmp/grabby"));
        assert_eq!(config.download.fetch_timeout(), Duration::from_secs(60));
        assert_eq!(config.download.stale_after(), Duration::from_secs(6 * 60 * 60));
        assert_eq!(config.get_logging_format(), "json");
    }

    #[test]
    fn test_zero_fetch_timeout_is_rejected() {
        let err = Config::from_toml("[download]\nfetch_timeout_secs = 0\n").unwrap_err();
        assert!(err.to_string().contains("fetch_timeout_secs"));
    }

    #[test]
    fn test_empty_toml() {
        let config = Config::from_toml("").unwrap();
        assert_eq!(config.server.port, DEFAULT_PORT);
    }

    #[test]
    fn test_port_env_override() {
        let mut config = Config::from_toml("[server]\nport = 8080\n").unwrap();
        config.apply_env(Some("9000".to_string())).unwrap();
        assert_eq!(config.server.port, 9000);

        config.apply_env(None).unwrap();
        assert_eq!(config.server.port, 9000);

        assert!(config.apply_env(Some("not-a-port".to_string())).is_err());
    }

    #[test]
    fn test_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            "[logging]\nformat = \"text\"\n[server]\nrequire_session_id = true\n",
        )
        .unwrap();

        let config = Config::from_file(path.to_str().unwrap()).unwrap();
        assert_eq!(config.get_logging_format(), "text");
        assert!(config.server.require_session_id);

        assert!(Config::from_file(dir.path().join("missing.toml").to_str().unwrap()).is_err());
    }
}
