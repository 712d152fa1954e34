//! Boot and reset line primitives.
//!
//! The driver only sequences pin transitions; it relies on
//! [`embedded_hal`] traits so that a microcontroller host can pass its own
//! GPIO pins, while a desktop host passes the serial adapter's modem lines
//! (see `NativePort::control_lines`).

use std::{thread, time::Duration};

pub use embedded_hal::{
    delay::DelayNs,
    digital::{ErrorType, OutputPin},
};

/// Blocking delay backed by [`thread::sleep`].
#[derive(Debug, Clone, Copy, Default)]
pub struct StdDelay;

impl DelayNs for StdDelay {
    fn delay_ns(&mut self, ns: u32) {
        thread::sleep(Duration::from_nanos(u64::from(ns)));
    }

    fn delay_us(&mut self, us: u32) {
        thread::sleep(Duration::from_micros(u64::from(us)));
    }

    fn delay_ms(&mut self, ms: u32) {
        thread::sleep(Duration::from_millis(u64::from(ms)));
    }
}

/// Wait for `duration` on an embedded-hal delay provider.
pub(crate) fn delay_for<D: DelayNs>(delay: &mut D, duration: Duration) {
    let ms = u32::try_from(duration.as_millis()).unwrap_or(u32::MAX);
    if ms > 0 {
        delay.delay_ms(ms);
    }
}
