//! Configuration file support for ninaflash.
//!
//! Configuration is loaded from multiple sources with the following priority (highest first):
//! 1. Command-line arguments
//! 2. Environment variables (NINAFLASH_*)
//! 3. Local config file (./ninaflash.toml)
//! 4. Global config file (~/.config/ninaflash/config.toml)

use {
    directories::ProjectDirs,
    log::{debug, warn},
    ninaflash::BootRomConfig,
    serde::{Deserialize, Serialize},
    std::{
        fs,
        path::{Path, PathBuf},
        time::Duration,
    },
};

/// Name of the per-project configuration file.
const LOCAL_CONFIG: &str = "ninaflash.toml";

/// USB device identification for port matching.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct UsbDevice {
    /// USB Vendor ID.
    pub vid: u16,
    /// USB Product ID.
    pub pid: u16,
}

impl UsbDevice {
    /// Check if this device matches the given USB info.
    pub fn matches(&self, vid: u16, pid: u16) -> bool {
        self.vid == vid && self.pid == pid
    }
}

/// Connection configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConnectionConfig {
    /// Preferred serial port (e.g., "/dev/ttyACM0" or "COM3").
    pub serial: Option<String>,
    /// Baud rate used after the handshake.
    pub baud: Option<u32>,
}

/// Port-specific configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PortConfig {
    /// Connection settings.
    #[serde(default)]
    pub connection: ConnectionConfig,
    /// Extra USB devices treated as known during auto-detection.
    #[serde(default)]
    pub usb_device: Vec<UsbDevice>,
}

/// Flash configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FlashConfig {
    /// FLASH_DATA block size.
    pub chunk_size: Option<u32>,
    /// Skip MD5 verification by default.
    #[serde(default)]
    pub skip_verify: bool,
    /// Stay in the ROM loader after flashing.
    #[serde(default)]
    pub no_reboot: bool,
}

/// Boot ROM timing overrides.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TimingConfig {
    /// Number of SYNC probes.
    pub sync_attempts: Option<u32>,
    /// Response timeout for ordinary commands, in milliseconds.
    pub command_timeout_ms: Option<u64>,
    /// Response timeout for FLASH_BEGIN (erase), in milliseconds.
    pub erase_timeout_ms: Option<u64>,
    /// Flash capacity in bytes, used to reject out of range regions.
    pub flash_size: Option<u32>,
}

/// Main configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Port configuration.
    #[serde(default)]
    pub port: PortConfig,
    /// Flash configuration.
    #[serde(default)]
    pub flash: FlashConfig,
    /// Timing configuration.
    #[serde(default)]
    pub timing: TimingConfig,
}

impl Config {
    /// Load configuration from all available sources.
    pub fn load() -> Self {
        let mut config = Self::default();

        if let Some(global_path) = Self::global_config_path() {
            if let Some(global_config) = Self::load_from_file(&global_path) {
                debug!("Loaded global config from {}", global_path.display());
                config.merge(global_config);
            }
        }

        if let Some(local_config) = Self::load_from_file(Path::new(LOCAL_CONFIG)) {
            debug!("Loaded local config from {LOCAL_CONFIG}");
            config.merge(local_config);
        }

        config
    }

    /// Load configuration from a specific file path (--config flag).
    pub fn load_from_path(path: &Path) -> Self {
        if let Some(config) = Self::load_from_file(path) {
            debug!("Loaded config from {}", path.display());
            config
        } else {
            warn!(
                "Could not load config from {}, using defaults",
                path.display()
            );
            Self::default()
        }
    }

    /// Load configuration from a specific file.
    fn load_from_file(path: &Path) -> Option<Self> {
        if !path.exists() {
            return None;
        }

        match fs::read_to_string(path) {
            Ok(content) => match toml::from_str(&content) {
                Ok(config) => Some(config),
                Err(e) => {
                    warn!("Failed to parse config file {}: {}", path.display(), e);
                    None
                },
            },
            Err(e) => {
                warn!("Failed to read config file {}: {}", path.display(), e);
                None
            },
        }
    }

    /// Get the global configuration directory.
    pub fn global_config_dir() -> Option<PathBuf> {
        ProjectDirs::from("", "", "ninaflash").map(|dirs| {
            dirs.config_dir()
                .to_path_buf()
        })
    }

    /// Get the global configuration file path.
    pub fn global_config_path() -> Option<PathBuf> {
        Self::global_config_dir().map(|dir| dir.join("config.toml"))
    }

    /// Merge another config into this one.
    fn merge(&mut self, other: Self) {
        if other
            .port
            .connection
            .serial
            .is_some()
        {
            self.port
                .connection
                .serial = other
                .port
                .connection
                .serial;
        }
        if other
            .port
            .connection
            .baud
            .is_some()
        {
            self.port
                .connection
                .baud = other
                .port
                .connection
                .baud;
        }
        self.port
            .usb_device
            .extend(
                other
                    .port
                    .usb_device,
            );

        if other
            .flash
            .chunk_size
            .is_some()
        {
            self.flash
                .chunk_size = other
                .flash
                .chunk_size;
        }
        self.flash
            .skip_verify |= other
            .flash
            .skip_verify;
        self.flash
            .no_reboot |= other
            .flash
            .no_reboot;

        let timing = other.timing;
        self.timing.sync_attempts = timing
            .sync_attempts
            .or(self.timing.sync_attempts);
        self.timing.command_timeout_ms = timing
            .command_timeout_ms
            .or(self.timing.command_timeout_ms);
        self.timing.erase_timeout_ms = timing
            .erase_timeout_ms
            .or(self.timing.erase_timeout_ms);
        self.timing.flash_size = timing
            .flash_size
            .or(self.timing.flash_size);
    }

    /// Build the driver configuration from the `[timing]` section.
    pub fn bootrom_config(&self, no_reset: bool) -> BootRomConfig {
        let mut rom = BootRomConfig::default()
            .with_no_reset(no_reset)
            .with_flash_size(self.timing.flash_size);
        if let Some(attempts) = self.timing.sync_attempts {
            rom = rom.with_sync_attempts(attempts);
        }
        if let Some(ms) = self.timing.command_timeout_ms {
            rom = rom.with_command_timeout(Duration::from_millis(ms));
        }
        if let Some(ms) = self.timing.erase_timeout_ms {
            rom = rom.with_erase_timeout(Duration::from_millis(ms));
        }
        rom
    }
}
