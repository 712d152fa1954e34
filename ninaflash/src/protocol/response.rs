//! ESP32 boot ROM response frames.
//!
//! ```text
//! +-----------+--------+--------+----------+------------------------------+
//! | Direction | Opcode |  Size  |  Value   |            Body              |
//! +-----------+--------+--------+----------+------------------------------+
//! |   0x01    |  op    | 2 (LE) |  4 (LE)  | data .. status, error, 0, 0  |
//! +-----------+--------+--------+----------+------------------------------+
//! ```
//!
//! The ROM loader always terminates the body with four status bytes.

use {
    crate::error::{FrameError, RomError},
    byteorder::{ByteOrder, LittleEndian, WriteBytesExt},
};

/// Direction byte of a response.
pub const DIRECTION_RESPONSE: u8 = 0x01;

/// Size of the response header (direction, opcode, size, value).
pub const HEADER_LEN: usize = 8;

/// Trailing status bytes appended by the ROM loader.
pub const STATUS_LEN: usize = 4;

/// A decoded response frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseFrame {
    /// Opcode echoed by the device.
    pub opcode: u8,
    /// Value field (register reads; unused by flash commands).
    pub value: u32,
    /// Body without the status bytes.
    pub data: Vec<u8>,
    /// Status byte, zero on success.
    pub status: u8,
    /// Error code, meaningful when `status` is non-zero.
    pub error: u8,
}

impl ResponseFrame {
    /// Successful response with the given body.
    pub fn new(opcode: u8, value: u32, data: Vec<u8>) -> Self {
        Self {
            opcode,
            value,
            data,
            status: 0,
            error: 0,
        }
    }

    /// Failure response carrying a ROM error code.
    pub fn failure(opcode: u8, error: RomError) -> Self {
        Self {
            opcode,
            value: 0,
            data: Vec::new(),
            status: 1,
            error: error.code(),
        }
    }

    /// Parse an unescaped frame.
    pub fn parse(raw: &[u8]) -> Result<Self, FrameError> {
        if raw.len() < HEADER_LEN + STATUS_LEN {
            return Err(FrameError::TooShort(raw.len()));
        }
        if raw[0] != DIRECTION_RESPONSE {
            return Err(FrameError::BadDirection(raw[0]));
        }

        let declared = usize::from(LittleEndian::read_u16(&raw[2..4]));
        let body = &raw[HEADER_LEN..];
        if declared != body.len() || declared < STATUS_LEN {
            return Err(FrameError::LengthMismatch {
                declared,
                actual: body.len(),
            });
        }

        let (data, status) = body.split_at(body.len() - STATUS_LEN);
        Ok(Self {
            opcode: raw[1],
            value: LittleEndian::read_u32(&raw[4..8]),
            data: data.to_vec(),
            status: status[0],
            error: status[1],
        })
    }

    /// Serialize into unescaped frame bytes.
    #[allow(clippy::cast_possible_truncation)]
    #[allow(clippy::unwrap_used)] // Writing to Vec<u8> cannot fail
    pub fn build(&self) -> Vec<u8> {
        let body_len = self
            .data
            .len()
            + STATUS_LEN;
        let mut buf = Vec::with_capacity(HEADER_LEN + body_len);
        buf.push(DIRECTION_RESPONSE);
        buf.push(self.opcode);
        buf.write_u16::<LittleEndian>(body_len as u16)
            .unwrap();
        buf.write_u32::<LittleEndian>(self.value)
            .unwrap();
        buf.extend_from_slice(&self.data);
        buf.extend_from_slice(&[self.status, self.error, 0, 0]);
        buf
    }

    /// Whether the status field reports success.
    pub fn is_success(&self) -> bool {
        self.status == 0
    }

    /// ROM error carried by a failed response.
    pub fn rom_error(&self) -> Option<RomError> {
        (!self.is_success()).then(|| RomError::from(self.error))
    }
}
