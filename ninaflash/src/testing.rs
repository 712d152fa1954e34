//! In-memory doubles for the transport, control lines and delay.

use {
    crate::{
        error::{Result, RomError},
        port::Port,
        protocol::{
            command::{self, DATA_HEADER_LEN, HEADER_LEN, Opcode},
            response::ResponseFrame,
            slip::{self, SlipDecoder},
        },
    },
    byteorder::{ByteOrder, LittleEndian},
    embedded_hal::{
        delay::DelayNs,
        digital::{ErrorType, OutputPin},
    },
    md5::{Digest, Md5},
    std::{
        collections::VecDeque,
        convert::Infallible,
        io::{self, Read, Write},
        sync::{Arc, Mutex},
        time::Duration,
    },
};

/// Shared, ordered record of pin, baud and command events.
pub(crate) type EventLog = Arc<Mutex<Vec<String>>>;

pub(crate) fn init_logger() {
    let _ = env_logger::builder()
        .is_test(true)
        .try_init();
}

fn timed_out() -> io::Error {
    io::Error::new(io::ErrorKind::TimedOut, "no data")
}

/// Port that replays a fixed byte stream and captures writes.
pub(crate) struct ScriptedPort {
    rx: VecDeque<u8>,
    tx: Vec<u8>,
    timeout: Duration,
    baud_rate: u32,
}

impl ScriptedPort {
    pub(crate) fn new(rx: &[u8]) -> Self {
        Self {
            rx: rx
                .iter()
                .copied()
                .collect(),
            tx: Vec::new(),
            timeout: Duration::from_millis(100),
            baud_rate: 115_200,
        }
    }

    pub(crate) fn written(&self) -> &[u8] {
        &self.tx
    }
}

impl Read for ScriptedPort {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self
            .rx
            .is_empty()
        {
            return Err(timed_out());
        }
        // Short reads exercise the decoder across read boundaries.
        let n = buf
            .len()
            .min(5)
            .min(
                self.rx
                    .len(),
            );
        for (slot, byte) in buf
            .iter_mut()
            .zip(
                self.rx
                    .drain(..n),
            )
        {
            *slot = byte;
        }
        Ok(n)
    }
}

impl Write for ScriptedPort {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.tx
            .extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Port for ScriptedPort {
    fn set_timeout(&mut self, timeout: Duration) -> Result<()> {
        self.timeout = timeout;
        Ok(())
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    fn set_baud_rate(&mut self, baud_rate: u32) -> Result<()> {
        self.baud_rate = baud_rate;
        Ok(())
    }

    fn baud_rate(&self) -> u32 {
        self.baud_rate
    }

    fn clear_buffers(&mut self) -> Result<()> {
        self.rx
            .clear();
        Ok(())
    }

    fn name(&self) -> &str {
        "scripted"
    }

    fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Simulated flash capacity of [`SimDevice`].
pub(crate) const SIM_FLASH_SIZE: usize = 0x20_0000;

/// Number of replies the ROM sends for one SYNC.
const SYNC_REPLIES: usize = 8;

/// Simulated ESP32 boot ROM.
pub(crate) struct SimDevice {
    decoder: SlipDecoder,
    rx: VecDeque<u8>,
    log: EventLog,
    timeout: Duration,
    baud_rate: u32,
    closed: bool,

    sync_ack_from: Option<u32>,
    sync_attempts: u32,
    corrupt_next_data: bool,

    flash: Vec<u8>,
    region: Option<(u32, u32, u32)>,
    next_sequence: u32,

    /// Sequence numbers of every FLASH_DATA received.
    pub(crate) sequences: Vec<u32>,
    /// Opcodes of every command received.
    pub(crate) commands: Vec<Opcode>,
    /// Number of `write` calls on the port.
    pub(crate) writes: usize,
    /// Baud rate requested by CHANGE_BAUDRATE and the rate it arrived at.
    pub(crate) baud_requests: Vec<(u32, u32)>,
    /// Reboot flag of the last FLASH_END (true when leaving the loader).
    pub(crate) rebooted: Option<bool>,
}

impl SimDevice {
    pub(crate) fn new(log: EventLog) -> Self {
        Self {
            decoder: SlipDecoder::new(),
            rx: VecDeque::new(),
            log,
            timeout: Duration::from_millis(100),
            baud_rate: 9600,
            closed: false,
            sync_ack_from: Some(1),
            sync_attempts: 0,
            corrupt_next_data: false,
            flash: vec![0xFF; SIM_FLASH_SIZE],
            region: None,
            next_sequence: 0,
            sequences: Vec::new(),
            commands: Vec::new(),
            writes: 0,
            baud_requests: Vec::new(),
            rebooted: None,
        }
    }

    /// Answer SYNC from the given 1-based attempt on, or never.
    pub(crate) fn ack_sync_from(mut self, attempt: Option<u32>) -> Self {
        self.sync_ack_from = attempt;
        self
    }

    /// Flip a bit in the next FLASH_DATA payload before it is checked.
    pub(crate) fn corrupt_next_data(&mut self) {
        self.corrupt_next_data = true;
    }

    pub(crate) fn sync_attempts(&self) -> u32 {
        self.sync_attempts
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed
    }

    pub(crate) fn flash(&self, offset: u32, len: usize) -> &[u8] {
        let start = offset as usize;
        &self.flash[start..start + len]
    }

    fn record(&self, event: String) {
        if let Ok(mut log) = self
            .log
            .lock()
        {
            log.push(event);
        }
    }

    fn reply(&mut self, frame: &ResponseFrame) {
        self.rx
            .extend(slip::encode(&frame.build()));
    }

    fn handle(&mut self, raw: &[u8]) {
        if raw.len() < HEADER_LEN || raw[0] != command::DIRECTION_REQUEST {
            return;
        }
        let op = raw[1];
        let checksum = LittleEndian::read_u32(&raw[4..8]);
        let payload = raw[HEADER_LEN..].to_vec();
        let Some(opcode) = Opcode::from_u8(op) else {
            self.reply(&ResponseFrame::failure(op, RomError::InvalidMessage));
            return;
        };
        self.commands
            .push(opcode);
        self.record(format!("cmd {opcode}"));

        let min_len = match opcode {
            Opcode::FlashEnd => 4,
            Opcode::SpiAttach | Opcode::ChangeBaudrate => 8,
            Opcode::FlashBegin | Opcode::FlashData | Opcode::SpiFlashMd5 => 16,
            Opcode::Sync => 0,
        };
        if payload.len() < min_len {
            self.reply(&ResponseFrame::failure(op, RomError::InvalidMessage));
            return;
        }

        let word = |i: usize| LittleEndian::read_u32(&payload[i * 4..i * 4 + 4]);
        let response = match opcode {
            Opcode::Sync => {
                self.sync_attempts += 1;
                if self
                    .sync_ack_from
                    .is_some_and(|from| self.sync_attempts >= from)
                {
                    for _ in 0..SYNC_REPLIES {
                        self.reply(&ResponseFrame::new(op, 0, Vec::new()));
                    }
                }
                return;
            },
            Opcode::SpiAttach | Opcode::ChangeBaudrate if payload.len() != 8 => {
                ResponseFrame::failure(op, RomError::InvalidMessage)
            },
            Opcode::SpiAttach => ResponseFrame::new(op, 0, Vec::new()),
            Opcode::ChangeBaudrate => {
                self.baud_requests
                    .push((word(0), self.baud_rate));
                ResponseFrame::new(op, 0, Vec::new())
            },
            Opcode::FlashBegin => {
                let (size, blocks, block_size, offset) = (word(0), word(1), word(2), word(3));
                if offset as usize + size as usize > SIM_FLASH_SIZE
                    || blocks != size.div_ceil(block_size)
                {
                    ResponseFrame::failure(op, RomError::FailedToAct)
                } else {
                    self.region = Some((offset, blocks, block_size));
                    self.next_sequence = 0;
                    ResponseFrame::new(op, 0, Vec::new())
                }
            },
            Opcode::FlashData => self.flash_data(&payload, checksum),
            Opcode::FlashEnd => {
                self.rebooted = Some(word(0) == 0);
                self.region = None;
                ResponseFrame::new(op, 0, Vec::new())
            },
            Opcode::SpiFlashMd5 => {
                let (offset, size) = (word(0) as usize, word(1) as usize);
                if offset + size > SIM_FLASH_SIZE {
                    ResponseFrame::failure(op, RomError::FlashRead)
                } else {
                    let digest = Md5::digest(&self.flash[offset..offset + size]);
                    ResponseFrame::new(op, 0, hex::encode(digest).into_bytes())
                }
            },
        };
        self.reply(&response);
    }

    fn flash_data(&mut self, payload: &[u8], checksum: u32) -> ResponseFrame {
        let op = Opcode::FlashData.code();
        let Some((offset, blocks, block_size)) = self.region else {
            return ResponseFrame::failure(op, RomError::FailedToAct);
        };
        if payload.len() < DATA_HEADER_LEN {
            return ResponseFrame::failure(op, RomError::InvalidMessage);
        }
        let len = LittleEndian::read_u32(&payload[0..4]) as usize;
        let sequence = LittleEndian::read_u32(&payload[4..8]);
        let mut data = payload[DATA_HEADER_LEN..].to_vec();
        self.sequences
            .push(sequence);

        if std::mem::take(&mut self.corrupt_next_data) {
            data[0] ^= 0x01;
        }
        if data.len() != len {
            return ResponseFrame::failure(op, RomError::InvalidMessage);
        }
        if command::checksum(&data) != checksum {
            return ResponseFrame::failure(op, RomError::InvalidCrc);
        }
        if sequence != self.next_sequence || sequence >= blocks {
            return ResponseFrame::failure(op, RomError::FailedToAct);
        }

        let start = (offset + sequence * block_size) as usize;
        let end = (start + data.len()).min(SIM_FLASH_SIZE);
        self.flash[start..end].copy_from_slice(&data[..end - start]);
        self.next_sequence += 1;
        ResponseFrame::new(op, 0, Vec::new())
    }
}

impl Read for SimDevice {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self
            .rx
            .is_empty()
        {
            return Err(timed_out());
        }
        let n = buf
            .len()
            .min(
                self.rx
                    .len(),
            );
        for (slot, byte) in buf
            .iter_mut()
            .zip(
                self.rx
                    .drain(..n),
            )
        {
            *slot = byte;
        }
        Ok(n)
    }
}

impl Write for SimDevice {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.writes += 1;
        for &byte in buf {
            if let Ok(Some(frame)) = self
                .decoder
                .push(byte)
            {
                self.handle(&frame);
            }
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Port for SimDevice {
    fn set_timeout(&mut self, timeout: Duration) -> Result<()> {
        self.timeout = timeout;
        Ok(())
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    fn set_baud_rate(&mut self, baud_rate: u32) -> Result<()> {
        self.record(format!("baud {baud_rate}"));
        self.baud_rate = baud_rate;
        Ok(())
    }

    fn baud_rate(&self) -> u32 {
        self.baud_rate
    }

    fn clear_buffers(&mut self) -> Result<()> {
        self.rx
            .clear();
        Ok(())
    }

    fn name(&self) -> &str {
        "sim"
    }

    fn close(&mut self) -> Result<()> {
        self.record("close".to_string());
        self.closed = true;
        Ok(())
    }
}

/// Output pin that records its transitions in an [`EventLog`].
pub(crate) struct RecordingPin {
    name: &'static str,
    log: EventLog,
}

impl RecordingPin {
    pub(crate) fn new(name: &'static str, log: EventLog) -> Self {
        Self { name, log }
    }

    fn record(&self, level: &str) {
        if let Ok(mut log) = self
            .log
            .lock()
        {
            log.push(format!("{} {level}", self.name));
        }
    }
}

impl ErrorType for RecordingPin {
    type Error = Infallible;
}

impl OutputPin for RecordingPin {
    fn set_low(&mut self) -> std::result::Result<(), Infallible> {
        self.record("low");
        Ok(())
    }

    fn set_high(&mut self) -> std::result::Result<(), Infallible> {
        self.record("high");
        Ok(())
    }
}

/// Delay that returns immediately and tracks the requested time.
#[derive(Debug, Default)]
pub(crate) struct NoDelay {
    pub(crate) total_ns: u64,
}

impl DelayNs for NoDelay {
    fn delay_ns(&mut self, ns: u32) {
        self.total_ns += u64::from(ns);
    }
}
