//! Configuration system for sealdrop CLI.

use sealdrop_core::{DEFAULT_CHUNK_SIZE, MAX_CHUNK_SIZE, SessionConfig};
use sealdrop_crypto::KdfParams;
use serde::{Deserialize, Serialize};
use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// sealdrop configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// Network configuration
    #[serde(default)]
    pub network: NetworkConfig,
    /// Transfer configuration
    #[serde(default)]
    pub transfer: TransferConfig,
    /// Key derivation parameters; must match on both peers
    #[serde(default)]
    pub kdf: KdfParams,
    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Network configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    /// Address `serve` listens on
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,
    /// Address `send` connects to
    #[serde(default = "default_server_addr")]
    pub server_addr: String,
    /// Per-operation timeout in seconds
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Extra connection attempts for `send` when setup fails
    #[serde(default)]
    pub connect_retries: u32,
}

/// Transfer configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferConfig {
    /// Chunk size in bytes when sending
    #[serde(default = "default_chunk_size")]
    pub chunk_size: u32,
    /// Largest chunk accepted when receiving
    #[serde(default = "default_max_chunk_size")]
    pub max_chunk_size: u32,
    /// Directory received files are written to
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
    /// Replace existing files when receiving
    #[serde(default)]
    pub overwrite: bool,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,
}

// Default values

fn default_listen_addr() -> String {
    "0.0.0.0:41000".to_string()
}

fn default_server_addr() -> String {
    "127.0.0.1:41000".to_string()
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_chunk_size() -> u32 {
    DEFAULT_CHUNK_SIZE
}

fn default_max_chunk_size() -> u32 {
    MAX_CHUNK_SIZE
}

fn default_output_dir() -> PathBuf {
    PathBuf::from(".")
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            server_addr: default_server_addr(),
            timeout_secs: default_timeout_secs(),
            connect_retries: 0,
        }
    }
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            max_chunk_size: default_max_chunk_size(),
            output_dir: default_output_dir(),
            overwrite: false,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl Config {
    /// Load configuration from file
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let contents = fs::read_to_string(path)?;
        let config: Self = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Save configuration to file
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> anyhow::Result<()> {
        let contents = toml::to_string_pretty(self)?;

        if let Some(parent) = path.as_ref().parent() {
            fs::create_dir_all(parent)?;
        }

        fs::write(path, contents)?;
        Ok(())
    }

    /// Get default config path
    #[must_use]
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("/tmp"))
            .join("sealdrop/config.toml")
    }

    /// Load config from `path`, or defaults if it is the default path and
    /// does not exist yet.
    ///
    /// # Errors
    ///
    /// Returns an error if an existing or explicitly named file cannot be
    /// read or parsed.
    pub fn load_or_default(path: Option<&Path>) -> anyhow::Result<Self> {
        match path {
            Some(path) => Self::load(path),
            None => {
                let path = Self::default_path();
                if path.exists() {
                    Self::load(&path)
                } else {
                    Ok(Self::default())
                }
            }
        }
    }

    /// Per-operation timeout.
    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.network.timeout_secs)
    }

    /// Build the protocol configuration for one session.
    #[must_use]
    pub fn session_config(&self, passphrase: &[u8]) -> SessionConfig {
        SessionConfig::new(passphrase)
            .with_timeout(self.timeout())
            .with_chunk_size(self.transfer.chunk_size)
            .with_max_chunk_size(self.transfer.max_chunk_size)
            .with_kdf(self.kdf)
    }

    /// Validate configuration
    ///
    /// # Errors
    ///
    /// Returns an error if configuration is invalid.
    pub fn validate(&self) -> anyhow::Result<()> {
        self.network
            .listen_addr
            .parse::<SocketAddr>()
            .map_err(|e| anyhow::anyhow!("Invalid listen address '{}': {e}", self.network.listen_addr))?;

        validate_host_port(&self.network.server_addr, "Server address")?;

        if self.network.timeout_secs == 0 {
            anyhow::bail!("Timeout must be at least 1 second");
        }

        if self.network.connect_retries > 100 {
            anyhow::bail!("Connect retries must be at most 100");
        }

        if self.transfer.max_chunk_size == 0 || self.transfer.max_chunk_size > MAX_CHUNK_SIZE {
            anyhow::bail!("Max chunk size must be between 1 and {MAX_CHUNK_SIZE}");
        }

        if self.transfer.chunk_size == 0 || self.transfer.chunk_size > self.transfer.max_chunk_size
        {
            anyhow::bail!(
                "Chunk size must be between 1 and max chunk size ({})",
                self.transfer.max_chunk_size
            );
        }

        self.kdf
            .validate()
            .map_err(|e| anyhow::anyhow!("Invalid KDF parameters: {e}"))?;

        let valid_log_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_log_levels.contains(&self.logging.level.to_lowercase().as_str()) {
            anyhow::bail!(
                "Invalid log level: {}. Must be one of: {}",
                self.logging.level,
                valid_log_levels.join(", ")
            );
        }

        Ok(())
    }
}

/// Validate host:port format
fn validate_host_port(addr: &str, name: &str) -> anyhow::Result<()> {
    let Some((host, port_str)) = addr.rsplit_once(':') else {
        anyhow::bail!("{name} '{addr}' missing port (expected format: host:port)");
    };

    let port: u16 = port_str
        .parse()
        .map_err(|_| anyhow::anyhow!("{name} '{addr}' has invalid port: {port_str}"))?;

    if port == 0 {
        anyhow::bail!("{name} '{addr}' has invalid port: 0");
    }

    if host.is_empty() {
        anyhow::bail!("{name} '{addr}' has empty hostname");
    }

    if host.contains('/') || host.contains('\\') {
        anyhow::bail!("{name} '{addr}' contains invalid characters");
    }

    Ok(())
}
