//! Typed error kinds for the controller emulator.
//!
//! One enum covers every failure mode in the system; call sites propagate with
//! `?` and the binary entry point maps variants to process exit codes.

use std::path::PathBuf;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("HID device unavailable at {path}: {source}")]
    DeviceUnavailable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("emulator already connected")]
    AlreadyConnected,

    #[error("transport I/O error: {0}")]
    TransportIo(#[from] std::io::Error),

    #[error("unrecognized protocol request: {0}")]
    ProtocolUnknown(String),

    #[error("SPI read for unregistered address {addr_hi:#04x}")]
    SpiUnknownAddress { addr_hi: u8 },

    #[error("only one client allowed")]
    ClientBusy,

    #[error("macro is running, stop it first")]
    MacroConflict,

    #[error("invalid macro: {0}")]
    MacroParse(String),

    #[error("macro not found: {0}")]
    MacroNotFound(String),

    #[error("macro storage I/O error: {0}")]
    MacroIo(std::io::Error),

    #[error("invalid message: {0}")]
    InvalidMessage(String),

    #[error("malformed macro json: {0}")]
    MacroJson(#[from] serde_json::Error),
}
