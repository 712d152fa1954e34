//! ESP32 boot ROM driver.
//!
//! [`BootRom`] owns the transport, the GPIO0 (boot) and RESETN (reset)
//! lines and a delay provider. It resets the chip into the ROM loader,
//! synchronises, negotiates the baud rate and then runs flash sessions:
//!
//! ```text
//! Disconnected --begin--> Idle --attach--> Attached --begin_flash--> FlashOpen
//!      ^                   ^                                            |
//!      +------end----------+-------------------end_flash----------------+
//! ```
//!
//! ## Example
//!
//! ```rust,no_run
//! use ninaflash::{BootRom, BootRomConfig, NativePort, gpio::StdDelay};
//!
//! fn main() -> ninaflash::Result<()> {
//!     let port = NativePort::open_simple("/dev/ttyACM0", 115_200)?;
//!     let (boot, reset) = port.control_lines()?;
//!     let mut rom = BootRom::new(port, boot, reset, StdDelay, BootRomConfig::default());
//!
//!     let image = std::fs::read("firmware.bin")?;
//!     rom.begin(921_600)?;
//!     rom.flash_region(0x0, &image, 0x400, |done, total| println!("{done}/{total}"))?;
//!     rom.verify_region(0x0, &image)?;
//!     rom.end_flash(true)?;
//!     rom.end();
//!     Ok(())
//! }
//! ```

use {
    crate::{
        config::BootRomConfig,
        connection::Connection,
        error::{Error, FrameError, Result},
        gpio::{DelayNs, OutputPin, delay_for},
        port::Port,
        protocol::command::{CommandFrame, Opcode},
        session::{FlashSession, SessionState},
    },
    log::{debug, info, trace, warn},
    md5::{Digest, Md5},
    std::fmt,
};

/// Duplicate SYNC replies the ROM sends after the first one.
const SYNC_EXTRA_REPLIES: usize = 7;

/// Length of a digest sent as ASCII hex by the ROM loader.
const MD5_HEX_LEN: usize = 32;

fn pin_error<E: fmt::Debug>(pin: &'static str) -> impl FnOnce(E) -> Error {
    move |e| Error::ControlLine(format!("{pin} line: {e:?}"))
}

/// Host side driver for the ESP32 boot ROM serial protocol.
pub struct BootRom<P: Port, B: OutputPin, R: OutputPin, D: DelayNs> {
    connection: Connection<P>,
    boot: B,
    reset: R,
    delay: D,
    config: BootRomConfig,
    state: SessionState,
    session: Option<FlashSession>,
    active: bool,
    lines_driven: bool,
}

impl<P: Port, B: OutputPin, R: OutputPin, D: DelayNs> BootRom<P, B, R, D> {
    /// Create a driver. Nothing is sent until [`begin`](Self::begin).
    pub fn new(port: P, boot: B, reset: R, delay: D, config: BootRomConfig) -> Self {
        Self {
            connection: Connection::new(port),
            boot,
            reset,
            delay,
            config,
            state: SessionState::Disconnected,
            session: None,
            active: false,
            lines_driven: false,
        }
    }

    /// Reset into the ROM loader, synchronise and switch to `baud`.
    pub fn begin(&mut self, baud: u32) -> Result<()> {
        if baud == 0 {
            return Err(Error::Parameter("baud rate must be non-zero".into()));
        }
        if self.state != SessionState::Disconnected {
            return Err(Error::Sequence(format!(
                "begin() called while {}",
                self.state
            )));
        }

        self.active = true;
        if self
            .config
            .no_reset
        {
            debug!("Skipping reset, expecting the ROM loader to be running");
        } else {
            self.enter_bootloader()?;
        }

        self.connection
            .set_baud_rate(
                self.config
                    .rom_baud,
            )?;
        self.connection
            .clear()?;
        self.sync()?;
        self.state = SessionState::Idle;
        info!(
            "Connected to boot ROM on {}",
            self.connection
                .port()
                .name()
        );

        if baud
            != self
                .config
                .rom_baud
        {
            self.change_baud(baud)?;
        }
        Ok(())
    }

    /// Tear the connection down.
    ///
    /// Safe to call any number of times. Control lines are only released
    /// when they were driven since the previous call; failures are logged.
    pub fn end(&mut self) {
        if let Some(session) = self
            .session
            .take()
        {
            warn!(
                "Abandoning flash session at 0x{:08X} after {} of {} blocks",
                session.offset(),
                session.sequence(),
                session.blocks()
            );
        }
        self.state = SessionState::Disconnected;

        if !std::mem::take(&mut self.active) {
            return;
        }

        if std::mem::take(&mut self.lines_driven) {
            if let Err(e) = self
                .boot
                .set_high()
                .map_err(pin_error("boot"))
            {
                warn!("Failed to release boot line: {e}");
            }
            if let Err(e) = self
                .reset
                .set_high()
                .map_err(pin_error("reset"))
            {
                warn!("Failed to release reset line: {e}");
            }
        }

        if self
            .config
            .close_on_end
        {
            if let Err(e) = self
                .connection
                .port_mut()
                .close()
            {
                warn!("Failed to close port: {e}");
            }
        }
        debug!("Disconnected");
    }

    /// Erase a region and open a flash session for it.
    ///
    /// Calling this while a session is open restarts it.
    pub fn begin_flash(&mut self, offset: u32, size: u32, chunk_size: u32) -> Result<()> {
        let session = FlashSession::new(
            offset,
            size,
            chunk_size,
            self.config
                .flash_size,
        )?;
        if let Some(previous) = self
            .session
            .take()
        {
            warn!(
                "Restarting flash session at 0x{:08X} after {} of {} blocks",
                previous.offset(),
                previous.sequence(),
                previous.blocks()
            );
            self.state = SessionState::Attached;
        }
        self.ensure_attached()?;

        debug!(
            "FLASH_BEGIN 0x{offset:08X}: {size} bytes in {} blocks of {chunk_size}",
            session.blocks()
        );
        self.connection
            .transact(
                &CommandFrame::flash_begin(size, session.blocks(), chunk_size, offset),
                self.config
                    .erase_timeout,
            )?;

        self.session = Some(session);
        self.state = SessionState::FlashOpen;
        Ok(())
    }

    /// Send `data` as one or more FLASH_DATA blocks.
    pub fn data_flash(&mut self, data: &[u8]) -> Result<()> {
        let state = self.state;
        let session = match (state, self.session.as_mut()) {
            (SessionState::FlashOpen, Some(session)) => session,
            _ => {
                return Err(Error::Sequence(format!(
                    "data_flash() called while {state}"
                )));
            },
        };
        if data.is_empty() {
            return Err(Error::Parameter("no data to flash".into()));
        }

        session.check_data(data.len())?;

        let chunk_size = session.chunk_size() as usize;
        let padded_len = self
            .config
            .pad_final_chunk
            .then_some(chunk_size);
        for chunk in data.chunks(chunk_size) {
            trace!("FLASH_DATA seq {} ({} bytes)", session.sequence(), chunk.len());
            let frame = CommandFrame::flash_data(session.sequence(), chunk, padded_len);
            self.connection
                .transact(
                    &frame,
                    self.config
                        .command_timeout,
                )?;
            session.advance(chunk.len());
        }
        Ok(())
    }

    /// Close the flash session, rebooting into the new firmware if `reboot`.
    pub fn end_flash(&mut self, reboot: bool) -> Result<()> {
        let session = match (self.state, self.session.as_ref()) {
            (SessionState::FlashOpen, Some(session)) => session,
            (state, _) => {
                return Err(Error::Sequence(format!(
                    "end_flash() called while {state}"
                )));
            },
        };
        if !session.is_complete() {
            return Err(Error::Sequence(format!(
                "end_flash() after {} of {} blocks",
                session.sequence(),
                session.blocks()
            )));
        }

        self.connection
            .transact(
                &CommandFrame::flash_end(reboot),
                self.config
                    .command_timeout,
            )?;
        debug!("Flash session closed (reboot: {reboot})");
        self.session = None;
        self.state = SessionState::Idle;
        Ok(())
    }

    /// MD5 digest of `size` bytes of flash at `offset`, computed on the chip.
    pub fn md5_flash(&mut self, offset: u32, size: u32) -> Result<[u8; 16]> {
        self.ensure_attached()?;
        let response = self
            .connection
            .transact(
                &CommandFrame::spi_flash_md5(offset, size),
                self.config
                    .md5_timeout_for(size),
            )?;
        parse_digest(&response.data)
    }

    /// Open a session for `data` at `offset` and send all of it.
    ///
    /// `progress` receives the bytes written so far and the total. The
    /// session is left open so that the caller can verify before
    /// [`end_flash`](Self::end_flash).
    pub fn flash_region<F>(
        &mut self,
        offset: u32,
        data: &[u8],
        chunk_size: u32,
        mut progress: F,
    ) -> Result<()>
    where
        F: FnMut(usize, usize),
    {
        let size = u32::try_from(data.len()).map_err(|_| {
            Error::Parameter(format!(
                "{} bytes do not fit a flash region",
                data.len()
            ))
        })?;
        self.begin_flash(offset, size, chunk_size)?;

        let total = data.len();
        let mut written = 0;
        progress(written, total);
        for chunk in data.chunks(chunk_size as usize) {
            if crate::is_interrupted_requested() {
                warn!("Flashing interrupted at 0x{:08X}", offset as usize + written);
                return Err(Error::Interrupted);
            }
            self.data_flash(chunk)?;
            written += chunk.len();
            progress(written, total);
        }
        info!("Wrote {total} bytes at 0x{offset:08X}");
        Ok(())
    }

    /// Compare the chip's MD5 of a region against `data`.
    pub fn verify_region(&mut self, offset: u32, data: &[u8]) -> Result<()> {
        let size = u32::try_from(data.len()).map_err(|_| {
            Error::Parameter(format!(
                "{} bytes do not fit a flash region",
                data.len()
            ))
        })?;
        let expected = Md5::digest(data);
        let actual = self.md5_flash(offset, size)?;
        if expected.as_slice() != actual {
            return Err(Error::VerifyFailed {
                expected: hex::encode(expected),
                actual: hex::encode(actual),
            });
        }
        info!("Verified {size} bytes at 0x{offset:08X}");
        Ok(())
    }

    /// Current lifecycle state.
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Open flash session, if any.
    pub fn session(&self) -> Option<&FlashSession> {
        self.session
            .as_ref()
    }

    /// Driver configuration.
    pub fn config(&self) -> &BootRomConfig {
        &self.config
    }

    /// Underlying transport.
    pub fn port(&self) -> &P {
        self.connection
            .port()
    }

    /// Underlying transport, mutably.
    pub fn port_mut(&mut self) -> &mut P {
        self.connection
            .port_mut()
    }

    /// Give back the transport, pins and delay provider.
    pub fn into_parts(self) -> (P, B, R, D) {
        (
            self.connection
                .into_port(),
            self.boot,
            self.reset,
            self.delay,
        )
    }

    fn enter_bootloader(&mut self) -> Result<()> {
        debug!("Resetting into the ROM loader");
        self.lines_driven = true;
        self.boot
            .set_low()
            .map_err(pin_error("boot"))?;
        self.reset
            .set_low()
            .map_err(pin_error("reset"))?;
        delay_for(
            &mut self.delay,
            self.config
                .reset_hold,
        );
        self.reset
            .set_high()
            .map_err(pin_error("reset"))?;
        delay_for(
            &mut self.delay,
            self.config
                .boot_settle,
        );
        self.boot
            .set_high()
            .map_err(pin_error("boot"))
    }

    fn sync(&mut self) -> Result<()> {
        let attempts = self
            .config
            .sync_attempts
            .max(1);
        for attempt in 1..=attempts {
            match self
                .connection
                .transact(
                    &CommandFrame::sync(),
                    self.config
                        .sync_timeout,
                ) {
                Ok(_) => {
                    self.drain_sync_replies();
                    debug!("Synchronised on attempt {attempt}/{attempts}");
                    return Ok(());
                },
                Err(e @ (Error::Timeout(_) | Error::Frame(_))) => {
                    debug!("Sync attempt {attempt}/{attempts} failed: {e}");
                    self.connection
                        .clear()?;
                    delay_for(
                        &mut self.delay,
                        self.config
                            .sync_backoff,
                    );
                },
                Err(e) => return Err(e),
            }
        }

        Err(Error::Timeout(format!(
            "boot ROM did not answer SYNC after {attempts} attempts"
        )))
    }

    fn drain_sync_replies(&mut self) {
        for _ in 0..SYNC_EXTRA_REPLIES {
            if self
                .connection
                .response(
                    Opcode::Sync,
                    self.config
                        .sync_timeout,
                )
                .is_err()
            {
                break;
            }
        }
    }

    fn change_baud(&mut self, baud: u32) -> Result<()> {
        info!("Changing baud rate to {baud}");
        // The ack still arrives at the old rate.
        self.connection
            .transact(
                &CommandFrame::change_baudrate(baud, 0),
                self.config
                    .command_timeout,
            )?;
        delay_for(
            &mut self.delay,
            self.config
                .baud_switch_delay,
        );
        self.connection
            .set_baud_rate(baud)?;
        self.connection
            .clear()
    }

    fn ensure_attached(&mut self) -> Result<()> {
        match self.state {
            SessionState::Disconnected => Err(Error::Sequence(
                "not connected, call begin() first".into(),
            )),
            SessionState::Idle => {
                self.connection
                    .transact(
                        &CommandFrame::spi_attach(),
                        self.config
                            .command_timeout,
                    )?;
                debug!("SPI flash attached");
                self.state = SessionState::Attached;
                Ok(())
            },
            SessionState::Attached | SessionState::FlashOpen => Ok(()),
        }
    }
}

/// Decode the ROM's MD5 body: 32 ASCII hex characters before the status bytes.
fn parse_digest(body: &[u8]) -> Result<[u8; 16]> {
    if body.len() != MD5_HEX_LEN {
        return Err(FrameError::BodyLength {
            expected: MD5_HEX_LEN,
            actual: body.len(),
        }
        .into());
    }
    let mut digest = [0u8; 16];
    hex::decode_to_slice(body, &mut digest).map_err(|_| FrameError::InvalidDigest)?;
    Ok(digest)
}

#[cfg(test)]
mod tests {
    use {
        super::*,
        crate::{
            error::RomError,
            testing::{EventLog, NoDelay, RecordingPin, SimDevice, init_logger},
        },
        std::sync::{Arc, Mutex},
    };

    type SimRom = BootRom<SimDevice, RecordingPin, RecordingPin, NoDelay>;

    fn sim_rom(
        device: impl FnOnce(EventLog) -> SimDevice,
        config: BootRomConfig,
    ) -> (SimRom, EventLog) {
        init_logger();
        let log: EventLog = Arc::new(Mutex::new(Vec::new()));
        let rom = BootRom::new(
            device(Arc::clone(&log)),
            RecordingPin::new("boot", Arc::clone(&log)),
            RecordingPin::new("reset", Arc::clone(&log)),
            NoDelay::default(),
            config,
        );
        (rom, log)
    }

    fn connected() -> (SimRom, EventLog) {
        let (mut rom, log) = sim_rom(SimDevice::new, BootRomConfig::default());
        rom.begin(115_200)
            .unwrap();
        (rom, log)
    }

    fn events(log: &EventLog) -> Vec<String> {
        log.lock()
            .unwrap()
            .clone()
    }

    fn pin_events(log: &EventLog) -> Vec<String> {
        events(log)
            .into_iter()
            .filter(|e| e.starts_with("boot ") || e.starts_with("reset "))
            .collect()
    }

    fn image(len: usize) -> Vec<u8> {
        (0..len)
            .map(|i| (i * 7 + i / 256) as u8)
            .collect()
    }

    #[test]
    fn test_begin_resets_then_syncs() {
        let (rom, log) = connected();
        assert_eq!(rom.state(), SessionState::Idle);

        let events = events(&log);
        assert_eq!(
            &events[..6],
            &[
                "boot low",
                "reset low",
                "reset high",
                "boot high",
                "baud 115200",
                "cmd SYNC"
            ]
        );
        let (_, _, _, delay) = rom.into_parts();
        assert!(delay.total_ns >= 110_000_000);
    }

    #[test]
    fn test_begin_syncs_on_third_attempt() {
        let (mut rom, _) = sim_rom(
            |log| SimDevice::new(log).ack_sync_from(Some(3)),
            BootRomConfig::default(),
        );
        rom.begin(115_200)
            .unwrap();
        assert_eq!(
            rom.port()
                .sync_attempts(),
            3
        );
        assert_eq!(rom.state(), SessionState::Idle);
    }

    #[test]
    fn test_begin_gives_up_after_sync_attempts() {
        let (mut rom, _) = sim_rom(
            |log| SimDevice::new(log).ack_sync_from(None),
            BootRomConfig::default(),
        );
        let err = rom
            .begin(115_200)
            .unwrap_err();
        assert!(matches!(err, Error::Timeout(_)), "{err:?}");
        assert_eq!(
            rom.port()
                .sync_attempts(),
            10
        );
        assert_eq!(rom.state(), SessionState::Disconnected);
    }

    #[test]
    fn test_begin_without_reset_leaves_lines_alone() {
        let (mut rom, log) = sim_rom(
            SimDevice::new,
            BootRomConfig::default().with_no_reset(true),
        );
        rom.begin(115_200)
            .unwrap();
        rom.end();
        assert!(pin_events(&log).is_empty());
    }

    #[test]
    fn test_begin_rejects_zero_baud_and_reentry() {
        let (mut rom, _) = sim_rom(SimDevice::new, BootRomConfig::default());
        assert!(matches!(rom.begin(0), Err(Error::Parameter(_))));

        rom.begin(115_200)
            .unwrap();
        assert!(matches!(rom.begin(115_200), Err(Error::Sequence(_))));
    }

    #[test]
    fn test_begin_changes_baud_after_ack() {
        let (mut rom, log) = sim_rom(SimDevice::new, BootRomConfig::default());
        rom.begin(921_600)
            .unwrap();

        assert_eq!(
            rom.port()
                .baud_requests,
            vec![(921_600, 115_200)]
        );
        assert_eq!(
            rom.port()
                .baud_rate(),
            921_600
        );

        let events = events(&log);
        let position = |needle: &str| {
            events
                .iter()
                .position(|e| e == needle)
                .unwrap()
        };
        assert!(position("cmd CHANGE_BAUDRATE") < position("baud 921600"));
    }

    #[test]
    fn test_flash_sequences_and_end() {
        let (mut rom, _) = connected();
        let data = image(4096);

        rom.begin_flash(0x10000, 4096, 1024)
            .unwrap();
        for chunk in data.chunks(1024) {
            rom.data_flash(chunk)
                .unwrap();
        }
        assert!(
            rom.session()
                .unwrap()
                .is_complete()
        );
        rom.end_flash(true)
            .unwrap();

        let device = rom.port();
        assert_eq!(device.sequences, vec![0, 1, 2, 3]);
        assert_eq!(device.rebooted, Some(true));
        assert_eq!(device.flash(0x10000, 4096), data.as_slice());
        assert_eq!(rom.state(), SessionState::Idle);
        assert!(rom.session().is_none());
    }

    #[test]
    fn test_attach_is_repeated_after_end_flash() {
        let (mut rom, _) = connected();
        rom.begin_flash(0x0, 1024, 1024)
            .unwrap();
        rom.data_flash(&image(1024))
            .unwrap();
        rom.md5_flash(0x0, 1024)
            .unwrap();
        rom.end_flash(false)
            .unwrap();
        rom.begin_flash(0x1000, 1024, 1024)
            .unwrap();

        let attaches = rom
            .port()
            .commands
            .iter()
            .filter(|&&op| op == Opcode::SpiAttach)
            .count();
        assert_eq!(attaches, 2);
        assert_eq!(
            rom.port()
                .rebooted,
            Some(false)
        );
    }

    #[test]
    fn test_extra_chunk_is_sequence_error() {
        let (mut rom, _) = connected();
        rom.begin_flash(0x10000, 2048, 1024)
            .unwrap();
        rom.data_flash(&image(2048))
            .unwrap();

        let writes = rom
            .port()
            .writes;
        assert!(matches!(
            rom.data_flash(&image(1)),
            Err(Error::Sequence(_))
        ));
        assert_eq!(
            rom.port()
                .writes,
            writes
        );
        assert_eq!(
            rom.session()
                .unwrap()
                .sequence(),
            2
        );
    }

    #[test]
    fn test_data_past_region_is_rejected_before_writing() {
        let (mut rom, _) = connected();
        rom.begin_flash(0x10000, 1, 0x2000)
            .unwrap();
        let writes = rom
            .port()
            .writes;

        assert!(matches!(
            rom.data_flash(&[0xAB; 0x2000]),
            Err(Error::Parameter(_))
        ));
        assert_eq!(
            rom.port()
                .writes,
            writes
        );
        assert!(matches!(rom.end_flash(true), Err(Error::Sequence(_))));

        rom.data_flash(&[0xAB])
            .unwrap();
        rom.end_flash(true)
            .unwrap();
        assert_eq!(
            rom.port()
                .flash(0x10000, 2),
            &[0xAB_u8, 0xFF]
        );
    }

    #[test]
    fn test_short_block_before_region_end_is_rejected() {
        let (mut rom, _) = connected();
        rom.begin_flash(0x0, 2048, 1024)
            .unwrap();
        assert!(matches!(
            rom.data_flash(&image(100)),
            Err(Error::Parameter(_))
        ));
        assert_eq!(
            rom.session()
                .unwrap()
                .sequence(),
            0
        );
        rom.data_flash(&image(2048))
            .unwrap();
        rom.end_flash(true)
            .unwrap();
    }

    #[test]
    fn test_data_before_begin_flash_writes_nothing() {
        let (mut rom, _) = sim_rom(SimDevice::new, BootRomConfig::default());
        assert!(matches!(
            rom.data_flash(&[1, 2, 3]),
            Err(Error::Sequence(_))
        ));
        assert_eq!(
            rom.port()
                .writes,
            0
        );

        rom.begin(115_200)
            .unwrap();
        let writes = rom
            .port()
            .writes;
        assert!(matches!(
            rom.data_flash(&[1, 2, 3]),
            Err(Error::Sequence(_))
        ));
        assert_eq!(
            rom.port()
                .writes,
            writes
        );
    }

    #[test]
    fn test_empty_data_is_parameter_error() {
        let (mut rom, _) = connected();
        rom.begin_flash(0x0, 1024, 1024)
            .unwrap();
        assert!(matches!(rom.data_flash(&[]), Err(Error::Parameter(_))));
    }

    #[test]
    fn test_corrupted_block_is_checksum_mismatch() {
        let (mut rom, _) = connected();
        rom.begin_flash(0x10000, 2048, 1024)
            .unwrap();
        rom.port_mut()
            .corrupt_next_data();

        let err = rom
            .data_flash(&image(1024))
            .unwrap_err();
        assert!(
            matches!(err, Error::ChecksumMismatch { opcode: 0x03 }),
            "{err:?}"
        );
        assert_eq!(rom.state(), SessionState::FlashOpen);
        assert_eq!(
            rom.session()
                .unwrap()
                .sequence(),
            0
        );
    }

    #[test]
    fn test_md5_matches_programmed_data() {
        let (mut rom, _) = connected();
        let data = image(4096);
        rom.flash_region(0x10000, &data, 1024, |_, _| {})
            .unwrap();

        let digest = rom
            .md5_flash(0x10000, 4096)
            .unwrap();
        assert_eq!(digest.as_slice(), Md5::digest(&data).as_slice());
        assert_eq!(rom.state(), SessionState::FlashOpen);
    }

    #[test]
    fn test_md5_of_erased_flash_attaches() {
        let (mut rom, _) = connected();
        let digest = rom
            .md5_flash(0x0, 64)
            .unwrap();
        assert_eq!(digest.as_slice(), Md5::digest([0xFF_u8; 64]).as_slice());
        assert_eq!(rom.state(), SessionState::Attached);
    }

    #[test]
    fn test_parse_digest_rejects_other_lengths() {
        assert!(matches!(
            parse_digest(&[0xAB; 16]),
            Err(Error::Frame(FrameError::BodyLength {
                expected: 32,
                actual: 16
            }))
        ));
        assert!(matches!(
            parse_digest(&[0; 20]),
            Err(Error::Frame(FrameError::BodyLength {
                expected: 32,
                actual: 20
            }))
        ));
        assert!(matches!(
            parse_digest(&[b'z'; 32]),
            Err(Error::Frame(FrameError::InvalidDigest))
        ));
    }

    #[test]
    fn test_end_twice_releases_lines_once() {
        let (mut rom, log) = connected();
        assert_eq!(pin_events(&log).len(), 4);

        rom.end();
        assert_eq!(&pin_events(&log)[4..], &["boot high", "reset high"]);
        rom.end();
        assert_eq!(pin_events(&log).len(), 6);
        assert_eq!(rom.state(), SessionState::Disconnected);
    }

    #[test]
    fn test_end_closes_port_when_configured() {
        let (mut rom, log) = sim_rom(
            SimDevice::new,
            BootRomConfig::default().with_close_on_end(true),
        );
        rom.begin(115_200)
            .unwrap();
        rom.end();
        rom.end();
        assert!(
            rom.port()
                .is_closed()
        );
        let closes = events(&log)
            .iter()
            .filter(|e| *e == "close")
            .count();
        assert_eq!(closes, 1);
    }

    #[test]
    fn test_end_drops_open_session() {
        let (mut rom, _) = connected();
        rom.begin_flash(0x0, 2048, 1024)
            .unwrap();
        rom.end();
        assert!(rom.session().is_none());
        assert!(matches!(rom.data_flash(&[0]), Err(Error::Sequence(_))));
    }

    #[test]
    fn test_end_flash_requires_all_blocks() {
        let (mut rom, _) = connected();
        assert!(matches!(rom.end_flash(true), Err(Error::Sequence(_))));

        rom.begin_flash(0x0, 2048, 1024)
            .unwrap();
        rom.data_flash(&image(1024))
            .unwrap();
        assert!(matches!(rom.end_flash(true), Err(Error::Sequence(_))));
        assert_eq!(rom.state(), SessionState::FlashOpen);
    }

    #[test]
    fn test_operations_require_begin() {
        let (mut rom, _) = sim_rom(SimDevice::new, BootRomConfig::default());
        assert!(matches!(
            rom.begin_flash(0x0, 1024, 1024),
            Err(Error::Sequence(_))
        ));
        assert!(matches!(rom.md5_flash(0x0, 1024), Err(Error::Sequence(_))));
        assert_eq!(
            rom.port()
                .writes,
            0
        );
    }

    #[test]
    fn test_begin_flash_validates_region() {
        let (mut rom, _) = sim_rom(
            SimDevice::new,
            BootRomConfig::default().with_flash_size(Some(0x40_0000)),
        );
        rom.begin(115_200)
            .unwrap();
        assert!(matches!(
            rom.begin_flash(0x3F_F000, 0x2000, 1024),
            Err(Error::Parameter(_))
        ));
        assert!(matches!(
            rom.begin_flash(0x0, 0, 1024),
            Err(Error::Parameter(_))
        ));
        assert_eq!(rom.state(), SessionState::Idle);
    }

    #[test]
    fn test_rejected_begin_flash_leaves_attached() {
        let (mut rom, _) = connected();
        let err = rom
            .begin_flash(0x1F_F000, 0x2000, 1024)
            .unwrap_err();
        assert!(matches!(
            err,
            Error::Rejected {
                opcode: 0x02,
                error: RomError::FailedToAct
            }
        ));
        assert_eq!(rom.state(), SessionState::Attached);
    }

    #[test]
    fn test_begin_flash_restarts_open_session() {
        let (mut rom, _) = connected();
        rom.begin_flash(0x0, 2048, 1024)
            .unwrap();
        rom.data_flash(&image(1024))
            .unwrap();
        rom.begin_flash(0x0, 1024, 1024)
            .unwrap();
        assert_eq!(
            rom.session()
                .unwrap()
                .sequence(),
            0
        );
        rom.data_flash(&image(1024))
            .unwrap();
        rom.end_flash(true)
            .unwrap();
    }

    #[test]
    fn test_flash_region_short_final_chunk_and_verify() {
        let (mut rom, _) = connected();
        let data = image(2500);
        let mut reports = Vec::new();
        rom.flash_region(0x8000, &data, 1024, |done, total| reports.push((done, total)))
            .unwrap();

        assert_eq!(
            reports,
            vec![(0, 2500), (1024, 2500), (2048, 2500), (2500, 2500)]
        );
        rom.verify_region(0x8000, &data)
            .unwrap();
        rom.end_flash(true)
            .unwrap();
        assert_eq!(
            rom.port()
                .flash(0x8000, 2500),
            data.as_slice()
        );
    }

    #[test]
    fn test_flash_region_with_padding() {
        let (mut rom, _) = sim_rom(
            SimDevice::new,
            BootRomConfig::default().with_pad_final_chunk(true),
        );
        rom.begin(115_200)
            .unwrap();
        let data = image(1500);
        rom.flash_region(0x0, &data, 1024, |_, _| {})
            .unwrap();
        rom.end_flash(true)
            .unwrap();
        assert_eq!(
            rom.port()
                .flash(0x0, 1500),
            data.as_slice()
        );
        assert_eq!(
            rom.port()
                .sequences,
            vec![0, 1]
        );
    }

    #[test]
    fn test_verify_region_mismatch() {
        let (mut rom, _) = connected();
        rom.flash_region(0x0, &image(1024), 1024, |_, _| {})
            .unwrap();
        let err = rom
            .verify_region(0x0, &[0u8; 1024])
            .unwrap_err();
        assert!(matches!(err, Error::VerifyFailed { .. }), "{err:?}");
    }

    #[test]
    fn test_flash_region_interrupted() {
        let (mut rom, _) = connected();
        crate::test_set_interrupted(true);
        let result = rom.flash_region(0x0, &image(2048), 1024, |_, _| {});
        crate::test_set_interrupted(false);

        assert!(matches!(result, Err(Error::Interrupted)));
        assert!(
            rom.port()
                .sequences
                .is_empty()
        );
    }
}
