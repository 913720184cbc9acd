//! Server configuration
//!
//! Loaded from `flowdeck.toml` (or `$FLOWDECK_CONFIG`) with environment
//! overrides for the deployment knobs. A missing file falls back to
//! defaults so a bare `flowdeck-server` starts locally.

use std::path::PathBuf;

use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Bind address
    pub host: String,
    /// Bind port
    pub port: u16,
    /// Root directory of the project store
    pub data_dir: PathBuf,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 4400,
            data_dir: PathBuf::from("flowdeck_data"),
        }
    }
}

impl ServerConfig {
    /// Load the config file, then apply `FLOWDECK_HOST`, `FLOWDECK_PORT`,
    /// and `FLOWDECK_DATA_DIR` overrides.
    pub fn load() -> anyhow::Result<Self> {
        let path = std::env::var("FLOWDECK_CONFIG").unwrap_or_else(|_| "flowdeck.toml".to_string());
        let mut config = match std::fs::read_to_string(&path) {
            Ok(raw) => toml::from_str(&raw)?,
            Err(_) => Self::default(),
        };

        if let Ok(host) = std::env::var("FLOWDECK_HOST") {
            config.host = host;
        }
        if let Ok(port) = std::env::var("FLOWDECK_PORT") {
            config.port = port.parse()?;
        }
        if let Ok(data_dir) = std::env::var("FLOWDECK_DATA_DIR") {
            config.data_dir = PathBuf::from(data_dir);
        }
        Ok(config)
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ServerConfig::default();
        assert_eq!(config.bind_addr(), "127.0.0.1:4400");
    }

    #[test]
    fn test_partial_toml_fills_defaults() {
        let config: ServerConfig = toml::from_str("port = 9000").unwrap();
        assert_eq!(config.port, 9000);
        assert_eq!(config.host, "127.0.0.1");
    }
}
