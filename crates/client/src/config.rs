//! Client configuration management

use crate::transport::shm::{DEFAULT_SHM_KEY, DEFAULT_SHM_SIZE};
use crate::transport::{HandleWidth, ShmConnector};
use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Environment variable naming a configuration file
pub const CONFIG_ENV: &str = "USBNET_CONFIG";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    pub client: ClientSettings,
    #[serde(default)]
    pub transport: TransportSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientSettings {
    pub log_level: String,
}

/// Where to find the control channel handoff
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportSettings {
    /// SysV shared memory key, hex (e.g., "0x5553424e")
    pub shm_key: String,
    /// Segment size in bytes
    pub shm_size: usize,
    /// Bytes of the segment holding the descriptor number (4 or 8)
    pub handle_width: u8,
}

impl Default for TransportSettings {
    fn default() -> Self {
        Self {
            shm_key: format!("0x{:08x}", DEFAULT_SHM_KEY),
            shm_size: DEFAULT_SHM_SIZE,
            handle_width: 4,
        }
    }
}

impl TransportSettings {
    /// Parsed segment key
    pub fn key(&self) -> Result<i32> {
        parse_hex_key(&self.shm_key)
    }

    /// Connector for these settings
    pub fn connector(&self) -> Result<ShmConnector> {
        let width = HandleWidth::from_bytes(self.handle_width)
            .ok_or_else(|| anyhow!("Invalid handle_width {}, must be 4 or 8", self.handle_width))?;
        Ok(ShmConnector::new(self.key()?, self.shm_size, width))
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            client: ClientSettings {
                log_level: "info".to_string(),
            },
            transport: TransportSettings::default(),
        }
    }
}

impl ClientConfig {
    /// Load configuration from the specified path
    pub fn load(path: Option<PathBuf>) -> Result<Self> {
        let config_path = if let Some(p) = path {
            p
        } else {
            // Try standard locations in order
            let mut candidates = Vec::new();
            if let Ok(env_path) = std::env::var(CONFIG_ENV) {
                candidates.push(PathBuf::from(shellexpand::tilde(&env_path).as_ref()));
            }
            candidates.push(Self::default_path());
            candidates.push(PathBuf::from("/etc/rust-usbnet/client.toml"));

            candidates
                .into_iter()
                .find(|p| p.exists())
                .ok_or_else(|| anyhow!("No configuration file found, using defaults"))?
        };

        let content = fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read config file: {}", config_path.display()))?;

        let config: ClientConfig = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", config_path.display()))?;

        config.validate()?;

        tracing::info!("Loaded configuration from: {}", config_path.display());
        tracing::debug!(
            "Config: shm_key={}, shm_size={}, handle_width={}",
            config.transport.shm_key,
            config.transport.shm_size,
            config.transport.handle_width
        );
        Ok(config)
    }

    /// Load configuration or return defaults if not found
    pub fn load_or_default() -> Self {
        match Self::load(None) {
            Ok(config) => config,
            Err(e) => {
                // Print to stderr since logging might not be initialized yet
                eprintln!("Config: {:#}", e);
                Self::default()
            }
        }
    }

    /// Save configuration to the specified path
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self).context("Failed to serialize configuration")?;

        // Create parent directories if they don't exist
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }

        fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        tracing::info!("Saved configuration to: {}", path.display());
        Ok(())
    }

    /// Get the default configuration file path
    pub fn default_path() -> PathBuf {
        if let Some(config_dir) = dirs::config_dir() {
            config_dir.join("rust-usbnet").join("client.toml")
        } else {
            PathBuf::from(".config/rust-usbnet/client.toml")
        }
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        // Validate log level
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.client.log_level.as_str()) {
            return Err(anyhow!(
                "Invalid log level '{}', must be one of: {}",
                self.client.log_level,
                valid_levels.join(", ")
            ));
        }

        self.transport
            .key()
            .with_context(|| format!("Invalid shm_key '{}'", self.transport.shm_key))?;

        let width = HandleWidth::from_bytes(self.transport.handle_width).ok_or_else(|| {
            anyhow!(
                "Invalid handle_width {}, must be 4 or 8",
                self.transport.handle_width
            )
        })?;

        if self.transport.shm_size < width.bytes() {
            return Err(anyhow!(
                "shm_size {} is smaller than handle_width {}",
                self.transport.shm_size,
                width.bytes()
            ));
        }

        Ok(())
    }
}

/// Parse a hex key such as "0x5553424e"
fn parse_hex_key(key: &str) -> Result<i32> {
    let digits = key
        .strip_prefix("0x")
        .or_else(|| key.strip_prefix("0X"))
        .ok_or_else(|| anyhow!("Key must start with 0x"))?;

    if digits.is_empty() || digits.len() > 8 {
        return Err(anyhow!("Key must have 1 to 8 hex digits"));
    }

    let value = u32::from_str_radix(digits, 16).context("Key is not valid hex")?;
    Ok(value as i32)
}
