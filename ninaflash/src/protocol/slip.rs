//! SLIP framing used by the ESP32 boot ROM.
//!
//! Every command and response travels as one SLIP frame:
//!
//! ```text
//! +------+-----------------------------+------+
//! | 0xC0 |  payload (0xC0/0xDB escaped) | 0xC0 |
//! +------+-----------------------------+------+
//! ```
//!
//! Inside the payload `0xC0` is sent as `0xDB 0xDC` and `0xDB` as `0xDB 0xDD`.

use crate::error::FrameError;
use log::trace;

/// Frame delimiter.
pub const END: u8 = 0xC0;

/// Escape byte.
pub const ESC: u8 = 0xDB;

/// Escaped replacement for [`END`].
pub const ESC_END: u8 = 0xDC;

/// Escaped replacement for [`ESC`].
pub const ESC_ESC: u8 = 0xDD;

/// Largest decoded frame accepted on the receive path.
pub const MAX_FRAME_LEN: usize = 16 * 1024;

/// Encode a raw payload into a delimited SLIP frame.
pub fn encode(data: &[u8]) -> Vec<u8> {
    // Worst case every byte is escaped.
    let mut out = Vec::with_capacity(data.len() * 2 + 2);
    out.push(END);
    for &byte in data {
        match byte {
            END => out.extend_from_slice(&[ESC, ESC_END]),
            ESC => out.extend_from_slice(&[ESC, ESC_ESC]),
            _ => out.push(byte),
        }
    }
    out.push(END);
    out
}

/// Decode one complete SLIP frame, delimiters included.
pub fn decode(frame: &[u8]) -> Result<Vec<u8>, FrameError> {
    let body = match frame {
        [END, body @ .., END] => body,
        _ => return Err(FrameError::MissingDelimiter),
    };

    let mut out = Vec::with_capacity(body.len());
    let mut bytes = body
        .iter()
        .copied()
        .enumerate();

    while let Some((index, byte)) = bytes.next() {
        match byte {
            END => return Err(FrameError::UnexpectedDelimiter { offset: index + 1 }),
            ESC => match bytes.next() {
                Some((_, ESC_END)) => out.push(END),
                Some((_, ESC_ESC)) => out.push(ESC),
                Some((_, other)) => return Err(FrameError::InvalidEscape(other)),
                None => return Err(FrameError::IncompleteEscape),
            },
            _ => out.push(byte),
        }
    }

    Ok(out)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DecoderState {
    /// Waiting for the opening delimiter; everything else is line noise.
    Hunting,
    Receiving,
    Escaping,
}

/// Streaming SLIP decoder for the receive path.
///
/// Bytes are fed one at a time. Output before the first delimiter (such as
/// the ROM boot banner) is discarded, and consecutive delimiters never
/// produce empty frames.
#[derive(Debug)]
pub struct SlipDecoder {
    buffer: Vec<u8>,
    state: DecoderState,
}

impl Default for SlipDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl SlipDecoder {
    /// Create a decoder waiting for the start of a frame.
    pub fn new() -> Self {
        Self {
            buffer: Vec::new(),
            state: DecoderState::Hunting,
        }
    }

    /// Feed one byte, returning a decoded frame when one completes.
    ///
    /// On error the partial frame is dropped and the decoder hunts for the
    /// next delimiter.
    pub fn push(&mut self, byte: u8) -> Result<Option<Vec<u8>>, FrameError> {
        match (self.state, byte) {
            (DecoderState::Hunting, END) => {
                self.buffer
                    .clear();
                self.state = DecoderState::Receiving;
            },
            (DecoderState::Hunting, _) => {
                trace!("Discarding noise byte 0x{byte:02X}");
            },
            (DecoderState::Receiving, END) => {
                if !self
                    .buffer
                    .is_empty()
                {
                    self.state = DecoderState::Hunting;
                    return Ok(Some(std::mem::take(&mut self.buffer)));
                }
            },
            (DecoderState::Receiving, ESC) => {
                self.state = DecoderState::Escaping;
            },
            (DecoderState::Receiving, _) => {
                self.append(byte)?;
            },
            (DecoderState::Escaping, ESC_END) => {
                self.state = DecoderState::Receiving;
                self.append(END)?;
            },
            (DecoderState::Escaping, ESC_ESC) => {
                self.state = DecoderState::Receiving;
                self.append(ESC)?;
            },
            (DecoderState::Escaping, _) => {
                self.reset();
                return Err(FrameError::InvalidEscape(byte));
            },
        }
        Ok(None)
    }

    /// Drop any partial frame.
    pub fn reset(&mut self) {
        self.buffer
            .clear();
        self.state = DecoderState::Hunting;
    }

    /// Whether the decoder is between frames.
    pub fn is_idle(&self) -> bool {
        self.state == DecoderState::Hunting
    }

    fn append(&mut self, byte: u8) -> Result<(), FrameError> {
        if self
            .buffer
            .len()
            >= MAX_FRAME_LEN
        {
            self.reset();
            return Err(FrameError::Oversized(MAX_FRAME_LEN));
        }
        self.buffer
            .push(byte);
        Ok(())
    }
}
