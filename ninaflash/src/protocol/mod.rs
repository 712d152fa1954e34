//! ESP32 boot ROM wire protocol.
//!
//! - [`slip`]: frame delimiting and byte stuffing
//! - [`command`]: request frames and opcodes
//! - [`response`]: response frames and status decoding

pub mod command;
pub mod response;
pub mod slip;

pub use {
    command::{CommandFrame, Opcode},
    response::ResponseFrame,
    slip::SlipDecoder,
};
