//! Error types for ninaflash.

use std::{fmt, io};
use thiserror::Error;

/// Result type for ninaflash operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for ninaflash operations.
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error (serial port, file operations).
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Serial port error.
    #[cfg(feature = "native")]
    #[error("Serial port error: {0}")]
    Serial(#[from] serialport::Error),

    /// No response within the allotted time.
    #[error("Timeout: {0}")]
    Timeout(String),

    /// Malformed byte stream or response frame.
    #[error("Frame error: {0}")]
    Frame(#[from] FrameError),

    /// The device reported a checksum failure for the command payload.
    #[error("Checksum mismatch reported by device for command {opcode:#04x}")]
    ChecksumMismatch {
        /// Opcode of the rejected command.
        opcode: u8,
    },

    /// The device answered with a failure status.
    #[error("Device rejected command {opcode:#04x}: {error}")]
    Rejected {
        /// Opcode of the rejected command.
        opcode: u8,
        /// Error code reported by the boot ROM.
        error: RomError,
    },

    /// Operation invoked outside of its valid session state.
    #[error("Sequence error: {0}")]
    Sequence(String),

    /// Offset, size or chunk size outside of what the device accepts.
    #[error("Invalid parameter: {0}")]
    Parameter(String),

    /// Driving a boot or reset line failed.
    #[error("Control line error: {0}")]
    ControlLine(String),

    /// Flash contents do not match the data that was written.
    #[error("Verification failed: expected MD5 {expected}, device reported {actual}")]
    VerifyFailed {
        /// Digest computed on the host.
        expected: String,
        /// Digest reported by the device.
        actual: String,
    },

    /// No suitable serial port was found.
    #[error("Device not found")]
    DeviceNotFound,

    /// Operation stopped by the embedding application.
    #[error("Operation interrupted")]
    Interrupted,
}

impl Error {
    /// Whether this error means the device did not answer in time.
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        match self {
            Self::Timeout(_) => true,
            Self::Io(e) => matches!(
                e.kind(),
                io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock
            ),
            _ => false,
        }
    }
}

/// Framing and response-decoding errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FrameError {
    /// The frame does not start and end with a delimiter.
    #[error("frame is not delimited by 0xC0")]
    MissingDelimiter,

    /// A delimiter appeared inside the frame body.
    #[error("unexpected delimiter at offset {offset}")]
    UnexpectedDelimiter {
        /// Byte offset of the delimiter within the frame.
        offset: usize,
    },

    /// An escape byte was followed by an invalid successor.
    #[error("invalid escape sequence 0xDB {0:#04x}")]
    InvalidEscape(u8),

    /// The frame ended right after an escape byte.
    #[error("frame ends inside an escape sequence")]
    IncompleteEscape,

    /// The frame exceeded the receive limit.
    #[error("frame exceeds {0} bytes")]
    Oversized(usize),

    /// The decoded frame is shorter than a response header.
    #[error("response too short: {0} bytes")]
    TooShort(usize),

    /// The direction byte is not a response marker.
    #[error("invalid direction byte {0:#04x}")]
    BadDirection(u8),

    /// The declared body length disagrees with the bytes received.
    #[error("body length mismatch: header says {declared}, got {actual}")]
    LengthMismatch {
        /// Length declared in the header.
        declared: usize,
        /// Number of body bytes actually present.
        actual: usize,
    },

    /// The response answers a different command.
    #[error("expected response to {expected:#04x}, got {actual:#04x}")]
    UnexpectedOpcode {
        /// Opcode the host was waiting for.
        expected: u8,
        /// Opcode found in the response.
        actual: u8,
    },

    /// The response body does not have the expected shape.
    #[error("unexpected body length {actual} (expected {expected})")]
    BodyLength {
        /// Expected body length.
        expected: usize,
        /// Actual body length.
        actual: usize,
    },

    /// The response body is not a valid digest.
    #[error("invalid digest encoding")]
    InvalidDigest,
}

/// Error codes reported by the ESP32 boot ROM in the status field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RomError {
    /// Received message is invalid (parameters or length field).
    InvalidMessage,
    /// Failed to act on the received message.
    FailedToAct,
    /// Invalid CRC in the message.
    InvalidCrc,
    /// Flash write error.
    FlashWrite,
    /// Flash read error.
    FlashRead,
    /// Flash read length error.
    FlashReadLength,
    /// Deflate error.
    Deflate,
    /// Code not known to this crate.
    Other(u8),
}

impl RomError {
    /// Raw error code as sent on the wire.
    #[must_use]
    pub fn code(self) -> u8 {
        match self {
            Self::InvalidMessage => 0x05,
            Self::FailedToAct => 0x06,
            Self::InvalidCrc => 0x07,
            Self::FlashWrite => 0x08,
            Self::FlashRead => 0x09,
            Self::FlashReadLength => 0x0A,
            Self::Deflate => 0x0B,
            Self::Other(code) => code,
        }
    }
}

impl From<u8> for RomError {
    fn from(code: u8) -> Self {
        match code {
            0x05 => Self::InvalidMessage,
            0x06 => Self::FailedToAct,
            0x07 => Self::InvalidCrc,
            0x08 => Self::FlashWrite,
            0x09 => Self::FlashRead,
            0x0A => Self::FlashReadLength,
            0x0B => Self::Deflate,
            other => Self::Other(other),
        }
    }
}

impl fmt::Display for RomError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidMessage => f.write_str("invalid message"),
            Self::FailedToAct => f.write_str("failed to act on message"),
            Self::InvalidCrc => f.write_str("invalid CRC"),
            Self::FlashWrite => f.write_str("flash write error"),
            Self::FlashRead => f.write_str("flash read error"),
            Self::FlashReadLength => f.write_str("flash read length error"),
            Self::Deflate => f.write_str("deflate error"),
            Self::Other(code) => write!(f, "unknown error {code:#04x}"),
        }
    }
}
