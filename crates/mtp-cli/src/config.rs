//! Configuration system for the mtp CLI.

use mtp_core::{EngineConfig, ObjectHandle, PhaseTimeouts, RootPolicy, SessionConfig};
use mtp_transport::usb::DeviceSelector;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// mtp configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// Device selection
    #[serde(default)]
    pub device: DeviceConfig,
    /// Transfer configuration
    #[serde(default)]
    pub transfer: TransferConfig,
    /// Path resolution
    #[serde(default)]
    pub resolver: ResolverConfig,
    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Device selection
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceConfig {
    /// USB vendor id
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vendor_id: Option<u16>,
    /// USB product id
    #[serde(skip_serializing_if = "Option::is_none")]
    pub product_id: Option<u16>,
    /// Serial number
    #[serde(skip_serializing_if = "Option::is_none")]
    pub serial: Option<String>,
    /// Session id passed to OpenSession
    #[serde(default = "default_session_id")]
    pub session_id: u32,
}

/// Transfer configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferConfig {
    /// Bytes per bulk transfer
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    /// Command phase timeout in milliseconds
    #[serde(default = "default_command_timeout_ms")]
    pub command_timeout_ms: u64,
    /// Data phase timeout in milliseconds
    #[serde(default = "default_data_timeout_ms")]
    pub data_timeout_ms: u64,
    /// Response phase timeout in milliseconds
    #[serde(default = "default_data_timeout_ms")]
    pub response_timeout_ms: u64,
    /// Cancel request timeout in milliseconds
    #[serde(default = "default_abort_timeout_ms")]
    pub abort_timeout_ms: u64,
}

/// Path resolution
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolverConfig {
    /// Handle treated as the root of the object tree
    #[serde(default = "default_root_handle")]
    pub root_handle: u32,
    /// ParentObject values meaning "no parent"
    #[serde(default = "default_no_parent_handles")]
    pub no_parent_handles: Vec<u32>,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level or `EnvFilter` directive
    #[serde(default = "default_log_level")]
    pub level: String,
}

// Default values

fn default_session_id() -> u32 {
    mtp_core::DEFAULT_SESSION_ID
}

fn default_chunk_size() -> usize {
    256 * 1024 // 256 KB
}

fn default_command_timeout_ms() -> u64 {
    5_000
}

fn default_data_timeout_ms() -> u64 {
    30_000
}

fn default_abort_timeout_ms() -> u64 {
    1_000
}

fn default_root_handle() -> u32 {
    ObjectHandle::ROOT.0
}

fn default_no_parent_handles() -> Vec<u32> {
    vec![0, ObjectHandle::ROOT.0]
}

fn default_log_level() -> String {
    "warn".to_string()
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            vendor_id: None,
            product_id: None,
            serial: None,
            session_id: default_session_id(),
        }
    }
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            command_timeout_ms: default_command_timeout_ms(),
            data_timeout_ms: default_data_timeout_ms(),
            response_timeout_ms: default_data_timeout_ms(),
            abort_timeout_ms: default_abort_timeout_ms(),
        }
    }
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            root_handle: default_root_handle(),
            no_parent_handles: default_no_parent_handles(),
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
            .join("mtp/config.toml")
    }

    /// Load config from the default path, falling back to defaults
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be parsed.
    pub fn load_or_default() -> anyhow::Result<Self> {
        let path = Self::default_path();

        if path.exists() {
            Self::load(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Validate configuration
    ///
    /// # Errors
    ///
    /// Returns an error if configuration is invalid.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.device.session_id == 0 {
            anyhow::bail!("Session id must not be 0");
        }

        if self.transfer.chunk_size == 0 || self.transfer.chunk_size > 16 * 1024 * 1024 {
            anyhow::bail!("Chunk size must be between 1 and 16MB");
        }

        let timeouts = [
            ("command_timeout_ms", self.transfer.command_timeout_ms),
            ("data_timeout_ms", self.transfer.data_timeout_ms),
            ("response_timeout_ms", self.transfer.response_timeout_ms),
            ("abort_timeout_ms", self.transfer.abort_timeout_ms),
        ];
        for (name, value) in timeouts {
            if value == 0 {
                anyhow::bail!("Timeout {} must not be 0", name);
            }
        }

        if self.resolver.no_parent_handles.is_empty() {
            anyhow::bail!("At least one no-parent handle is required");
        }

        let valid_log_levels = ["trace", "debug", "info", "warn", "error"];
        let level = self.logging.level.to_lowercase();
        if !level.contains('=') && !valid_log_levels.contains(&level.as_str()) {
            anyhow::bail!(
                "Invalid log level: {}. Must be one of: {}",
                self.logging.level,
                valid_log_levels.join(", ")
            );
        }

        Ok(())
    }

    /// Device selector for the USB transport
    #[must_use]
    pub fn selector(&self) -> DeviceSelector {
        DeviceSelector {
            vendor_id: self.device.vendor_id,
            product_id: self.device.product_id,
            serial: self.device.serial.clone(),
        }
    }

    /// Session settings derived from the transfer section
    #[must_use]
    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            engine: EngineConfig {
                chunk_size: self.transfer.chunk_size,
                timeouts: PhaseTimeouts {
                    command: Duration::from_millis(self.transfer.command_timeout_ms),
                    data: Duration::from_millis(self.transfer.data_timeout_ms),
                    response: Duration::from_millis(self.transfer.response_timeout_ms),
                },
                ..EngineConfig::default()
            },
            abort_timeout: Duration::from_millis(self.transfer.abort_timeout_ms),
            close_on_drop: true,
        }
    }

    /// Root policy for the path resolver
    #[must_use]
    pub fn root_policy(&self) -> RootPolicy {
        RootPolicy {
            root: ObjectHandle(self.resolver.root_handle),
            no_parent: self.resolver.no_parent_handles.clone(),
        }
    }
}
