//! SPI-ROM store: the emulated factory-calibration memory the console reads
//! during handshake.
//!
//! Blobs are loaded once at startup and never mutated afterward, so lookups
//! never need to synchronize with the rest of the running emulator.

use std::collections::HashMap;
use std::path::Path;

use tracing::warn;

use crate::error::Result;

const KNOWN_ADDRESSES: &[u8] = &[0x60, 0x80];

/// Immutable `addr_high_byte -> blob` mapping.
pub struct SpiRomStore {
    blobs: HashMap<u8, Vec<u8>>,
}

impl SpiRomStore {
    /// Load every blob named `<hex-address>.bin` under `dir`. Missing
    /// expected files are logged and simply absent from the store rather
    /// than a hard error, so a partially-configured deployment can still
    /// start and fail SPI reads individually.
    pub fn load(dir: &Path) -> Result<Self> {
        let mut blobs = HashMap::new();
        for &addr in KNOWN_ADDRESSES {
            let path = dir.join(format!("{addr:02x}.bin"));
            match std::fs::read(&path) {
                Ok(data) => {
                    blobs.insert(addr, data);
                }
                Err(source) => {
                    warn!(
                        addr = format!("{addr:#04x}"),
                        path = %path.display(),
                        "SPI-ROM blob missing, reads at this address will be rejected: {source}"
                    );
                }
            }
        }
        Ok(Self { blobs })
    }

    /// Read `len` bytes starting at `offset` within the blob for `addr`.
    /// Returns `None` if the address is unregistered or the requested range
    /// runs past the end of the blob — callers are expected to turn that
    /// into a negative ack rather than have the store silently truncate.
    pub fn read(&self, addr: u8, offset: usize, len: usize) -> Option<Vec<u8>> {
        let blob = self.blobs.get(&addr)?;
        let end = offset.checked_add(len)?;
        if end > blob.len() {
            return None;
        }
        Some(blob[offset..end].to_vec())
    }

    pub fn has_address(&self, addr: u8) -> bool {
        self.blobs.contains_key(&addr)
    }
}
