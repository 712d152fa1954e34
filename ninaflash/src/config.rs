//! Timing and behaviour knobs for the boot ROM driver.

use std::time::Duration;

/// Baud rate the ESP32 ROM loader autobauds to after reset.
pub const ROM_BAUD: u32 = 115_200;

/// Default number of sync probes before giving up.
pub const DEFAULT_SYNC_ATTEMPTS: u32 = 10;

/// Default flash block size (`FLASH_WRITE_SIZE` of the ROM loader).
pub const DEFAULT_CHUNK_SIZE: u32 = 0x400;

const MIB: u64 = 1024 * 1024;

/// MD5 hashing speed budget of the ROM loader.
const MD5_TIMEOUT_PER_MIB: Duration = Duration::from_secs(8);

/// Configuration of a [`BootRom`](crate::BootRom) driver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BootRomConfig {
    /// Baud rate used for reset and sync.
    pub rom_baud: u32,
    /// Number of sync probes.
    pub sync_attempts: u32,
    /// Pause between sync probes.
    pub sync_backoff: Duration,
    /// Wait for each sync response.
    pub sync_timeout: Duration,
    /// Wait for ordinary command responses.
    pub command_timeout: Duration,
    /// Wait for FLASH_BEGIN, which erases the region first.
    pub erase_timeout: Duration,
    /// How long the reset line is held low.
    pub reset_hold: Duration,
    /// Delay after releasing reset before GPIO0 is released.
    pub boot_settle: Duration,
    /// Delay between the baud rate ack and switching the host side.
    pub baud_switch_delay: Duration,
    /// Leave the boot and reset lines untouched.
    pub no_reset: bool,
    /// Close the transport in `end()`.
    pub close_on_end: bool,
    /// Pad a short final chunk with 0xFF up to the chunk size.
    pub pad_final_chunk: bool,
    /// Flash capacity in bytes, when known.
    pub flash_size: Option<u32>,
}

impl Default for BootRomConfig {
    fn default() -> Self {
        Self {
            rom_baud: ROM_BAUD,
            sync_attempts: DEFAULT_SYNC_ATTEMPTS,
            sync_backoff: Duration::from_millis(50),
            sync_timeout: Duration::from_millis(100),
            command_timeout: Duration::from_secs(3),
            erase_timeout: Duration::from_secs(120),
            reset_hold: Duration::from_millis(10),
            boot_settle: Duration::from_millis(100),
            baud_switch_delay: Duration::from_millis(100),
            no_reset: false,
            close_on_end: false,
            pad_final_chunk: false,
            flash_size: None,
        }
    }
}

impl BootRomConfig {
    /// Set the number of sync probes.
    #[must_use]
    pub fn with_sync_attempts(mut self, attempts: u32) -> Self {
        self.sync_attempts = attempts.max(1);
        self
    }

    /// Set the pause between sync probes.
    #[must_use]
    pub fn with_sync_backoff(mut self, backoff: Duration) -> Self {
        self.sync_backoff = backoff;
        self
    }

    /// Set the response timeout for ordinary commands.
    #[must_use]
    pub fn with_command_timeout(mut self, timeout: Duration) -> Self {
        self.command_timeout = timeout;
        self
    }

    /// Set the FLASH_BEGIN (erase) timeout.
    #[must_use]
    pub fn with_erase_timeout(mut self, timeout: Duration) -> Self {
        self.erase_timeout = timeout;
        self
    }

    /// Skip the reset sequence in `begin()`.
    #[must_use]
    pub fn with_no_reset(mut self, no_reset: bool) -> Self {
        self.no_reset = no_reset;
        self
    }

    /// Close the transport when the session ends.
    #[must_use]
    pub fn with_close_on_end(mut self, close: bool) -> Self {
        self.close_on_end = close;
        self
    }

    /// Pad the final chunk to the full chunk size.
    #[must_use]
    pub fn with_pad_final_chunk(mut self, pad: bool) -> Self {
        self.pad_final_chunk = pad;
        self
    }

    /// Declare the flash capacity used to validate regions.
    #[must_use]
    pub fn with_flash_size(mut self, size: Option<u32>) -> Self {
        self.flash_size = size;
        self
    }

    /// Response timeout for an MD5 over `size` bytes.
    pub fn md5_timeout_for(&self, size: u32) -> Duration {
        let scaled = MD5_TIMEOUT_PER_MIB
            .saturating_mul(u32::try_from(u64::from(size).div_ceil(MIB)).unwrap_or(u32::MAX));
        scaled.max(self.command_timeout)
    }
}
