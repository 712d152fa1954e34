//! # ninaflash
//!
//! A library for flashing ESP32 based modules, such as the u-blox NINA-W10x
//! found on Arduino boards, through the ESP32 serial boot ROM.
//!
//! The crate provides:
//!
//! - SLIP framing and the ROM loader command set ([`protocol`])
//! - A command/response engine over any byte transport ([`Connection`])
//! - Reset, sync and baud negotiation plus flash sessions with MD5
//!   verification ([`BootRom`])
//! - Serial port discovery for common USB bridges ([`device`])
//!
//! The transport is the [`Port`] trait; boot and reset lines are
//! [`embedded_hal`] output pins, so the driver runs on a desktop host
//! (using the serial adapter's DTR/RTS lines) as well as on a
//! microcontroller driving the module's GPIO0 and RESETN directly.
//!
//! ## Features
//!
//! - `native` (default): serial port support via the `serialport` crate
//! - `serde`: serialization of discovery results and session state
//!
//! ## Example
//!
//! ```rust,no_run
//! use ninaflash::{BootRom, BootRomConfig, NativePort, gpio::StdDelay};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let port = NativePort::open_simple("/dev/ttyACM0", 115_200)?;
//!     let (boot, reset) = port.control_lines()?;
//!     let mut rom = BootRom::new(port, boot, reset, StdDelay, BootRomConfig::default());
//!
//!     rom.begin(921_600)?;
//!     let digest = rom.md5_flash(0x0, 0x1000)?;
//!     println!("{digest:02x?}");
//!     rom.end();
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

use std::sync::{Arc, OnceLock};

pub mod bootrom;
pub mod config;
pub mod connection;
pub mod device;
pub mod error;
pub mod gpio;
pub mod port;
pub mod protocol;
pub mod session;

#[cfg(test)]
pub(crate) mod testing;

static INTERRUPT_CHECKER: OnceLock<Arc<dyn Fn() -> bool + Send + Sync>> = OnceLock::new();

/// Register a global interruption checker used by long-running library loops.
///
/// The checker should return `true` when the current operation should stop
/// (for example after receiving Ctrl-C in CLI applications).
pub fn set_interrupt_checker<F>(checker: F)
where
    F: Fn() -> bool + Send + Sync + 'static,
{
    let _ = INTERRUPT_CHECKER.set(Arc::new(checker));
}

/// Returns whether interruption was requested by the embedding application.
#[must_use]
pub fn is_interrupted_requested() -> bool {
    INTERRUPT_CHECKER
        .get()
        .is_some_and(|checker| checker())
}

/// Request an interruption for operations running on the current thread.
#[cfg(test)]
pub(crate) fn test_set_interrupted(value: bool) {
    use std::cell::Cell;

    thread_local! {
        static TEST_INTERRUPTED: Cell<bool> = const { Cell::new(false) };
    }

    set_interrupt_checker(|| TEST_INTERRUPTED.with(Cell::get));
    TEST_INTERRUPTED.with(|flag| flag.set(value));
}

// Re-exports for convenience
#[cfg(feature = "native")]
pub use port::{NativePort, NativePortEnumerator, SerialControlLine};
pub use {
    bootrom::BootRom,
    config::BootRomConfig,
    connection::Connection,
    device::{
        DetectedPort, DeviceKind, TransportKind, auto_detect_port, detect_esp_ports, detect_ports,
    },
    error::{Error, FrameError, Result, RomError},
    port::{Port, PortEnumerator, PortInfo, SerialConfig},
    protocol::{CommandFrame, Opcode, ResponseFrame},
    session::{FlashSession, SessionState},
};
