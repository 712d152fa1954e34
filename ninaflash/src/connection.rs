//! Command/response engine on top of a [`Port`].
//!
//! A [`Connection`] writes SLIP-encoded command frames and reads exactly one
//! response frame per call. It never retries; callers decide what a timeout
//! or rejection means.

use {
    crate::{
        error::{Error, FrameError, Result, RomError},
        port::Port,
        protocol::{
            command::{CommandFrame, Opcode},
            response::ResponseFrame,
            slip::SlipDecoder,
        },
    },
    log::{debug, trace},
    std::{
        collections::VecDeque,
        time::{Duration, Instant},
    },
};

/// Size of a single port read.
const READ_CHUNK: usize = 256;

/// Framed connection to the boot ROM.
pub struct Connection<P: Port> {
    port: P,
    decoder: SlipDecoder,
    pending: VecDeque<u8>,
}

impl<P: Port> Connection<P> {
    /// Wrap an opened port.
    pub fn new(port: P) -> Self {
        Self {
            port,
            decoder: SlipDecoder::new(),
            pending: VecDeque::new(),
        }
    }

    /// Get a reference to the underlying port.
    pub fn port(&self) -> &P {
        &self.port
    }

    /// Get a mutable reference to the underlying port.
    pub fn port_mut(&mut self) -> &mut P {
        &mut self.port
    }

    /// Consume the connection and return the underlying port.
    pub fn into_port(self) -> P {
        self.port
    }

    /// Send one command frame.
    pub fn command(&mut self, frame: &CommandFrame) -> Result<()> {
        let encoded = frame.encode()?;
        trace!(
            "Sending {} ({} payload bytes, checksum 0x{:08X}): {} bytes on the wire",
            frame.opcode(),
            frame
                .payload()
                .len(),
            frame.checksum(),
            encoded.len()
        );
        self.port
            .write_all_bytes(&encoded)
    }

    /// Wait up to `timeout` for the response to `opcode`.
    ///
    /// Fails with [`Error::Timeout`] when no complete frame arrives,
    /// [`Error::Frame`] for malformed frames or a response to another
    /// command, [`Error::ChecksumMismatch`] when the device rejected the
    /// payload checksum and [`Error::Rejected`] for any other failure status.
    pub fn response(&mut self, opcode: Opcode, timeout: Duration) -> Result<ResponseFrame> {
        let raw = self.read_frame(timeout)?;
        trace!("Received frame: {raw:02X?}");

        let frame = ResponseFrame::parse(&raw)?;
        if frame.opcode != opcode.code() {
            return Err(FrameError::UnexpectedOpcode {
                expected: opcode.code(),
                actual: frame.opcode,
            }
            .into());
        }

        match frame.rom_error() {
            None => Ok(frame),
            Some(RomError::InvalidCrc) => Err(Error::ChecksumMismatch {
                opcode: opcode.code(),
            }),
            Some(error) => {
                debug!("{opcode} failed with status {}: {error}", frame.status);
                Err(Error::Rejected {
                    opcode: opcode.code(),
                    error,
                })
            },
        }
    }

    /// Send a command and wait for its response.
    pub fn transact(&mut self, frame: &CommandFrame, timeout: Duration) -> Result<ResponseFrame> {
        self.command(frame)?;
        self.response(frame.opcode(), timeout)
    }

    /// Change the host side baud rate.
    pub fn set_baud_rate(&mut self, baud: u32) -> Result<()> {
        self.port
            .set_baud_rate(baud)
    }

    /// Discard buffered input on both sides of the decoder.
    pub fn clear(&mut self) -> Result<()> {
        self.pending
            .clear();
        self.decoder
            .reset();
        self.port
            .clear_buffers()
    }

    fn read_frame(&mut self, timeout: Duration) -> Result<Vec<u8>> {
        let deadline = Instant::now() + timeout;
        let mut buf = [0u8; READ_CHUNK];

        loop {
            while let Some(byte) = self
                .pending
                .pop_front()
            {
                if let Some(frame) = self
                    .decoder
                    .push(byte)?
                {
                    return Ok(frame);
                }
            }

            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(Error::Timeout(format!(
                    "no response within {} ms",
                    timeout.as_millis()
                )));
            }

            let n = self
                .port
                .read_with_timeout(&mut buf, remaining)?;
            if n == 0 {
                return Err(Error::Timeout(format!(
                    "no response within {} ms",
                    timeout.as_millis()
                )));
            }
            self.pending
                .extend(&buf[..n]);
        }
    }
}
