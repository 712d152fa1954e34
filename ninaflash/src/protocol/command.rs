//! ESP32 boot ROM command frames.
//!
//! ## Frame Format
//!
//! ```text
//! +-----------+--------+--------+----------+-----------------+
//! | Direction | Opcode | Length | Checksum |     Payload     |
//! +-----------+--------+--------+----------+-----------------+
//! |  1 byte   | 1 byte | 2 bytes|  4 bytes |  Length bytes   |
//! +-----------+--------+--------+----------+-----------------+
//! |   0x00    |  op    |  LE    |   LE     |                 |
//! +-----------+--------+--------+----------+-----------------+
//! ```
//!
//! The finished frame is SLIP-encoded before it goes on the wire.

use {
    crate::{
        error::{Error, Result},
        protocol::slip,
    },
    byteorder::{LittleEndian, WriteBytesExt},
    std::fmt,
};

/// Direction byte of a request.
pub const DIRECTION_REQUEST: u8 = 0x00;

/// Size of the request header (direction, opcode, length, checksum).
pub const HEADER_LEN: usize = 8;

/// Seed of the payload checksum.
pub const CHECKSUM_SEED: u8 = 0xEF;

/// Length of the `[size, seq, 0, 0]` header in front of FLASH_DATA payloads.
pub const DATA_HEADER_LEN: usize = 16;

/// Byte used to pad a short final chunk when padding is enabled.
pub const FLASH_PAD_BYTE: u8 = 0xFF;

/// Payload of the SYNC command.
pub const SYNC_PAYLOAD: [u8; 36] = {
    let mut payload = [0x55; 36];
    payload[0] = 0x07;
    payload[1] = 0x07;
    payload[2] = 0x12;
    payload[3] = 0x20;
    payload
};

/// Boot ROM commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Opcode {
    /// Erase a region and prepare for FLASH_DATA blocks.
    FlashBegin = 0x02,
    /// One block of flash data.
    FlashData = 0x03,
    /// Finish flashing, optionally leaving the loader.
    FlashEnd = 0x04,
    /// Autobaud synchronisation probe.
    Sync = 0x08,
    /// Attach the SPI flash chip.
    SpiAttach = 0x0D,
    /// Switch the UART to a new baud rate.
    ChangeBaudrate = 0x0F,
    /// MD5 digest of a flash region.
    SpiFlashMd5 = 0x13,
}

impl Opcode {
    /// Decode an opcode byte.
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0x02 => Some(Self::FlashBegin),
            0x03 => Some(Self::FlashData),
            0x04 => Some(Self::FlashEnd),
            0x08 => Some(Self::Sync),
            0x0D => Some(Self::SpiAttach),
            0x0F => Some(Self::ChangeBaudrate),
            0x13 => Some(Self::SpiFlashMd5),
            _ => None,
        }
    }

    /// Wire value of this opcode.
    pub fn code(self) -> u8 {
        self as u8
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::FlashBegin => "FLASH_BEGIN",
            Self::FlashData => "FLASH_DATA",
            Self::FlashEnd => "FLASH_END",
            Self::Sync => "SYNC",
            Self::SpiAttach => "SPI_ATTACH",
            Self::ChangeBaudrate => "CHANGE_BAUDRATE",
            Self::SpiFlashMd5 => "SPI_FLASH_MD5",
        };
        f.write_str(name)
    }
}

/// XOR checksum over `data`, seeded with [`CHECKSUM_SEED`].
pub fn checksum(data: &[u8]) -> u32 {
    u32::from(
        data.iter()
            .fold(CHECKSUM_SEED, |acc, byte| acc ^ byte),
    )
}

/// Command frame builder.
#[derive(Debug, Clone)]
pub struct CommandFrame {
    opcode: Opcode,
    checksum: u32,
    data: Vec<u8>,
}

impl CommandFrame {
    /// Create a command frame with an empty payload.
    pub fn new(opcode: Opcode) -> Self {
        Self {
            opcode,
            checksum: 0,
            data: Vec::new(),
        }
    }

    /// SYNC probe.
    pub fn sync() -> Self {
        let mut frame = Self::new(Opcode::Sync);
        frame
            .data
            .extend_from_slice(&SYNC_PAYLOAD);
        frame
    }

    /// CHANGE_BAUDRATE; the old rate is 0 when talking to the ROM.
    pub fn change_baudrate(new_baud: u32, old_baud: u32) -> Self {
        Self::with_words(Opcode::ChangeBaudrate, &[new_baud, old_baud])
    }

    /// SPI_ATTACH with the default (non-HSPI) pin configuration.
    pub fn spi_attach() -> Self {
        Self::with_words(Opcode::SpiAttach, &[0, 0])
    }

    /// FLASH_BEGIN for `size` bytes at `offset` in `blocks` blocks.
    pub fn flash_begin(size: u32, blocks: u32, block_size: u32, offset: u32) -> Self {
        Self::with_words(Opcode::FlashBegin, &[size, blocks, block_size, offset])
    }

    /// FLASH_DATA carrying one block.
    ///
    /// `padded_len` extends the block with [`FLASH_PAD_BYTE`] up to that
    /// length; the checksum covers the padding.
    #[allow(clippy::cast_possible_truncation)]
    pub fn flash_data(sequence: u32, block: &[u8], padded_len: Option<usize>) -> Self {
        let len = padded_len.map_or(block.len(), |padded| padded.max(block.len()));
        // Block length is bounded by the u16 frame length checked in build().
        let mut frame = Self::with_words(Opcode::FlashData, &[len as u32, sequence, 0, 0]);
        frame
            .data
            .extend_from_slice(block);
        frame
            .data
            .resize(DATA_HEADER_LEN + len, FLASH_PAD_BYTE);
        frame.checksum = checksum(&frame.data[DATA_HEADER_LEN..]);
        frame
    }

    /// FLASH_END; the ROM field means "stay in the loader", so it is the
    /// inverse of `reboot`.
    pub fn flash_end(reboot: bool) -> Self {
        Self::with_words(Opcode::FlashEnd, &[u32::from(!reboot)])
    }

    /// SPI_FLASH_MD5 over `size` bytes at `offset`.
    pub fn spi_flash_md5(offset: u32, size: u32) -> Self {
        Self::with_words(Opcode::SpiFlashMd5, &[offset, size, 0, 0])
    }

    #[allow(clippy::unwrap_used)] // Writing to Vec<u8> cannot fail
    fn with_words(opcode: Opcode, words: &[u32]) -> Self {
        let mut frame = Self::new(opcode);
        for &word in words {
            frame
                .data
                .write_u32::<LittleEndian>(word)
                .unwrap();
        }
        frame
    }

    /// Build the unescaped frame bytes.
    #[allow(clippy::unwrap_used)] // Writing to Vec<u8> cannot fail
    pub fn build(&self) -> Result<Vec<u8>> {
        let len = u16::try_from(
            self.data
                .len(),
        )
        .map_err(|_| {
            Error::Parameter(format!(
                "{} payload of {} bytes exceeds the frame limit",
                self.opcode,
                self.data
                    .len()
            ))
        })?;

        let mut buf = Vec::with_capacity(
            HEADER_LEN
                + self
                    .data
                    .len(),
        );
        buf.push(DIRECTION_REQUEST);
        buf.push(
            self.opcode
                .code(),
        );
        buf.write_u16::<LittleEndian>(len)
            .unwrap();
        buf.write_u32::<LittleEndian>(self.checksum)
            .unwrap();
        buf.extend_from_slice(&self.data);
        Ok(buf)
    }

    /// Build the frame and SLIP-encode it for transmission.
    pub fn encode(&self) -> Result<Vec<u8>> {
        Ok(slip::encode(&self.build()?))
    }

    /// Command opcode.
    pub fn opcode(&self) -> Opcode {
        self.opcode
    }

    /// Checksum field.
    pub fn checksum(&self) -> u32 {
        self.checksum
    }

    /// Command payload.
    pub fn payload(&self) -> &[u8] {
        &self.data
    }
}
