//! Configuration module
//!
//! Handles loading and saving FrameLink configuration.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::network::NetworkConfig as NetConfig;
use crate::protocol::{FrameFormat, LengthWidth, DEFAULT_HOST, DEFAULT_PORT};

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Serialize error: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("Config file not found: {0}")]
    NotFound(PathBuf),
}

pub type ConfigResult<T> = Result<T, ConfigError>;

/// Main application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// General settings
    #[serde(default)]
    pub general: GeneralConfig,

    /// Network settings
    #[serde(default)]
    pub network: NetworkConfig,

    /// Wire protocol settings
    #[serde(default)]
    pub protocol: ProtocolConfig,
}

/// General configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GeneralConfig {
    /// Enable verbose logging
    #[serde(default)]
    pub verbose: bool,
}

/// Network configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    /// Port to listen on or connect to
    #[serde(default = "default_port")]
    pub port: u16,
    /// Host the client connects to
    #[serde(default = "default_host")]
    pub host: String,
    /// Interface the server binds to
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    /// Connection timeout in ms
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_ms: u64,
    /// Read timeout in ms (unset = wait indefinitely)
    pub read_timeout_ms: Option<u64>,
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_host() -> String {
    DEFAULT_HOST.to_string()
}

fn default_bind_address() -> String {
    "0.0.0.0".to_string()
}

fn default_connect_timeout() -> u64 {
    5000
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            host: default_host(),
            bind_address: default_bind_address(),
            connect_timeout_ms: default_connect_timeout(),
            read_timeout_ms: None,
        }
    }
}

/// Wire protocol configuration
///
/// Both peers must agree on these values.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProtocolConfig {
    /// Width of the length field in bytes (1, 2 or 4)
    #[serde(default)]
    pub length_width: LengthWidth,
    /// Payload limit below what the length field allows
    pub max_payload: Option<usize>,
}

impl ProtocolConfig {
    pub fn frame_format(&self) -> FrameFormat {
        let format = FrameFormat::new(self.length_width);
        match self.max_payload {
            Some(max) => format.with_max_payload(max),
            None => format,
        }
    }
}

impl Config {
    /// Load configuration from a file
    pub fn load(path: &Path) -> ConfigResult<Self> {
        if !path.exists() {
            return Err(ConfigError::NotFound(path.to_path_buf()));
        }

        let contents = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Load configuration from the default location
    pub fn load_default() -> ConfigResult<Self> {
        let config_paths = [
            dirs::config_dir().map(|p| p.join("framelink/config.toml")),
            Some(PathBuf::from("./framelink.toml")),
            Some(PathBuf::from("./config.toml")),
        ];

        for path in config_paths.iter().flatten() {
            if path.exists() {
                return Self::load(path);
            }
        }

        // Return default config if no file found
        Ok(Self::default())
    }

    /// Save configuration to a file
    pub fn save(&self, path: &Path) -> ConfigResult<()> {
        let contents = toml::to_string_pretty(self)?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        std::fs::write(path, contents)?;
        Ok(())
    }

    /// Network settings for the runtime, with an optional port override
    pub fn network_config(&self, port: Option<u16>) -> NetConfig {
        NetConfig::new(port.unwrap_or(self.network.port))
            .with_bind_address(self.network.bind_address.clone())
            .with_connect_timeout(self.network.connect_timeout_ms)
            .with_read_timeout(self.network.read_timeout_ms)
            .with_frame_format(self.protocol.frame_format())
    }
}

/// Sample configuration with every section filled in
pub fn sample_config() -> Config {
    Config {
        network: NetworkConfig {
            read_timeout_ms: Some(30_000),
            ..Default::default()
        },
        protocol: ProtocolConfig {
            length_width: LengthWidth::U8,
            max_payload: Some(255),
        },
        ..Default::default()
    }
}

/// Generate a sample configuration file
pub fn generate_sample_config() -> ConfigResult<String> {
    Ok(toml::to_string_pretty(&sample_config())?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.network.port, DEFAULT_PORT);
        assert_eq!(config.network.host, "localhost");
        assert_eq!(config.protocol.length_width, LengthWidth::U8);
        assert_eq!(config.protocol.frame_format().max_payload(), 255);
    }

    #[test]
    fn test_save_and_load() {
        let mut config = Config::default();
        config.network.port = 9090;
        config.protocol.length_width = LengthWidth::U32;
        let file = NamedTempFile::new().unwrap();

        config.save(file.path()).unwrap();

        let loaded = Config::load(file.path()).unwrap();
        assert_eq!(loaded.network.port, 9090);
        assert_eq!(loaded.protocol.length_width, LengthWidth::U32);
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "[protocol]\nlength_width = 2\nmax_payload = 1024").unwrap();

        let config = Config::load(file.path()).unwrap();
        assert_eq!(config.network.port, DEFAULT_PORT);
        assert_eq!(config.protocol.length_width, LengthWidth::U16);

        let net = config.network_config(Some(7000));
        assert_eq!(net.port, 7000);
        assert_eq!(net.bind_address, "0.0.0.0");
        assert_eq!(net.connect_timeout_ms, 5000);
        assert!(net.read_timeout().is_none());
        assert_eq!(net.frame_format.max_payload(), 1024);
    }

    #[test]
    fn test_invalid_length_width() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "[protocol]\nlength_width = 3").unwrap();

        assert!(matches!(
            Config::load(file.path()),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn test_missing_file() {
        let result = Config::load(Path::new("/nonexistent/framelink.toml"));
        assert!(matches!(result, Err(ConfigError::NotFound(_))));
    }

    #[test]
    fn test_sample_config_saved_to_nested_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/framelink.toml");

        sample_config().save(&path).unwrap();

        let loaded = Config::load(&path).unwrap();
        assert_eq!(loaded.network.read_timeout_ms, Some(30_000));
        let net = loaded.network_config(None);
        assert_eq!(net.read_timeout(), Some(std::time::Duration::from_secs(30)));
        assert_eq!(net.frame_format.max_payload(), 255);
    }

    #[test]
    fn test_sample_config() {
        let sample = generate_sample_config().unwrap();
        let parsed: Config = toml::from_str(&sample).unwrap();
        assert_eq!(parsed.network.read_timeout_ms, Some(30_000));
        assert_eq!(parsed.protocol.max_payload, Some(255));
    }
}
