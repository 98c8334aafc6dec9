//! Device-communication substrate.
//!
//! Every peripheral rides on the same three-layer stack: a link (framed
//! serial or Modbus RTU over serial), a stateful protocol parser owned
//! by the device, and the device harness itself with its communication
//! watchdog and poll/command scheduling. This crate provides the links
//! and the shared harness pieces; the parsers and devices live in
//! `rampart-devices`.

mod command_gate;
mod config;
mod modbus;
mod serial;
mod watchdog;

pub use command_gate::CommandGate;
pub use config::{LinkConfig, Parity, StopBits};
pub use modbus::{ModbusLink, ModbusReply, RegisterType};
pub use serial::SerialLink;
pub use watchdog::Watchdog;

/// A stateful wire-protocol decoder.
///
/// Implementations own an accumulation buffer: `parse` consumes a raw
/// chunk, extracts every complete frame, leaves trailing bytes buffered
/// and resynchronises by advancing one byte past a bad header or
/// checksum.
pub trait ProtocolParser {
    type Msg;

    fn parse(&mut self, raw: &[u8]) -> Vec<Self::Msg>;
}

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("serial port error: {source}")]
    Serial {
        #[from]
        source: tokio_serial::Error,
    },
    #[error("I/O error: {source}")]
    Io {
        #[from]
        source: std::io::Error,
    },
    #[error("link closed")]
    LinkClosed,
    #[error("reconnect abandoned after {retries} attempts")]
    RetriesExhausted { retries: u32 },
    #[error("modbus reply timeout after {timeout_ms} ms")]
    ReplyTimeout { timeout_ms: u64 },
    #[error("modbus exception: function 0x{function:02x} code 0x{code:02x}")]
    ModbusException { function: u8, code: u8 },
    #[error("malformed modbus reply: {reason}")]
    MalformedReply { reason: &'static str },
}

pub type Result<T> = std::result::Result<T, Error>;
