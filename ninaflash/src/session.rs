//! Flash session bookkeeping.

use {
    crate::{
        error::{Error, Result},
        protocol::command::{DATA_HEADER_LEN, HEADER_LEN},
    },
    std::fmt,
};

/// Largest chunk that still fits a FLASH_DATA frame.
pub const MAX_CHUNK_SIZE: u32 = (u16::MAX as u32) - (HEADER_LEN + DATA_HEADER_LEN) as u32;

/// Lifecycle of a [`BootRom`](crate::BootRom) driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub enum SessionState {
    /// No handshake performed, or torn down by `end()`.
    Disconnected,
    /// Synchronised with the boot ROM.
    Idle,
    /// SPI flash attached.
    Attached,
    /// FLASH_BEGIN accepted, data blocks expected.
    FlashOpen,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Disconnected => "disconnected",
            Self::Idle => "idle",
            Self::Attached => "attached",
            Self::FlashOpen => "flash open",
        };
        f.write_str(name)
    }
}

/// A region being programmed block by block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlashSession {
    offset: u32,
    size: u32,
    chunk_size: u32,
    blocks: u32,
    sequence: u32,
    bytes_sent: u64,
}

impl FlashSession {
    /// Validate a region and open a session for it.
    pub fn new(offset: u32, size: u32, chunk_size: u32, flash_size: Option<u32>) -> Result<Self> {
        if size == 0 {
            return Err(Error::Parameter("flash region size is zero".into()));
        }
        if chunk_size == 0 {
            return Err(Error::Parameter("chunk size is zero".into()));
        }
        if chunk_size > MAX_CHUNK_SIZE {
            return Err(Error::Parameter(format!(
                "chunk size {chunk_size} exceeds the frame limit of {MAX_CHUNK_SIZE}"
            )));
        }
        let end = offset
            .checked_add(size)
            .ok_or_else(|| {
                Error::Parameter(format!(
                    "region 0x{offset:08X} + 0x{size:X} overflows the address space"
                ))
            })?;
        if let Some(capacity) = flash_size.filter(|&capacity| end > capacity) {
            return Err(Error::Parameter(format!(
                "region 0x{offset:08X}..0x{end:08X} exceeds flash size 0x{capacity:X}"
            )));
        }

        Ok(Self {
            offset,
            size,
            chunk_size,
            blocks: block_count(size, chunk_size),
            sequence: 0,
            bytes_sent: 0,
        })
    }

    /// Target flash offset.
    pub fn offset(&self) -> u32 {
        self.offset
    }

    /// Declared region size in bytes.
    pub fn size(&self) -> u32 {
        self.size
    }

    /// Block size announced in FLASH_BEGIN.
    pub fn chunk_size(&self) -> u32 {
        self.chunk_size
    }

    /// Number of blocks announced in FLASH_BEGIN.
    pub fn blocks(&self) -> u32 {
        self.blocks
    }

    /// Sequence number of the next block.
    pub fn sequence(&self) -> u32 {
        self.sequence
    }

    /// Data bytes acknowledged so far, excluding padding.
    pub fn bytes_sent(&self) -> u64 {
        self.bytes_sent
    }

    /// Blocks still expected by the device.
    pub fn remaining_blocks(&self) -> u32 {
        self.blocks
            .saturating_sub(self.sequence)
    }

    /// Region bytes not yet sent.
    pub fn remaining_bytes(&self) -> u64 {
        u64::from(self.size).saturating_sub(self.bytes_sent)
    }

    /// Whether every announced block and every region byte has been acknowledged.
    pub fn is_complete(&self) -> bool {
        self.sequence == self.blocks && self.bytes_sent == u64::from(self.size)
    }

    /// Check that `len` more bytes fit the declared region.
    ///
    /// Only the block that finishes the region may be shorter than
    /// `chunk_size`; FLASH_BEGIN erased exactly `size` bytes.
    pub fn check_data(&self, len: usize) -> Result<()> {
        let needed = self.blocks_for(len);
        if needed > u64::from(self.remaining_blocks()) {
            return Err(Error::Sequence(format!(
                "{needed} blocks exceed the {} remaining of {}",
                self.remaining_blocks(),
                self.blocks
            )));
        }
        let len = len as u64;
        let remaining = self.remaining_bytes();
        if len > remaining {
            return Err(Error::Parameter(format!(
                "{len} bytes exceed the {remaining} remaining of the {}-byte region",
                self.size
            )));
        }
        if len % u64::from(self.chunk_size) != 0 && len != remaining {
            return Err(Error::Parameter(format!(
                "short block of {} bytes before the end of the region",
                len % u64::from(self.chunk_size)
            )));
        }
        Ok(())
    }

    /// Number of blocks `len` bytes split into.
    pub fn blocks_for(&self, len: usize) -> u64 {
        (len as u64).div_ceil(u64::from(self.chunk_size))
    }

    /// Record an acknowledged block.
    pub(crate) fn advance(&mut self, len: usize) {
        self.sequence += 1;
        self.bytes_sent += len as u64;
    }
}

/// `ceil(size / chunk_size)`.
pub fn block_count(size: u32, chunk_size: u32) -> u32 {
    size.div_ceil(chunk_size)
}
