//! The HID gadget endpoint transport: the byte pipe the console talks over.
//!
//! The real endpoint is a character device (`/dev/hidg0` by default) opened
//! for simultaneous read and write, unbuffered, with no special framing
//! beyond the fixed report sizes below. Reads return whatever the host
//! wrote to the gadget (up to 64 bytes, the extra headroom is historical
//! slack carried over from the reference implementation); writes must be
//! padded out to exactly 64 bytes or the kernel driver rejects them.

use std::fs::{File, OpenOptions};
use std::io::{self, Read, Write};
use std::path::Path;
use std::sync::{Arc, Mutex};

use crate::error::{Error, Result};

pub const REPORT_LEN: usize = 64;
pub const READ_BUF_LEN: usize = 128;

/// A source/sink for fixed-size HID reports. Implemented once for the real
/// gadget device and once for an in-memory fake used by tests.
pub trait HidTransport: Send {
    /// Blocking read of up to `READ_BUF_LEN` bytes. Returns the number of
    /// bytes actually read.
    fn read_report(&mut self, buf: &mut [u8; READ_BUF_LEN]) -> io::Result<usize>;

    /// Write exactly one 64-byte report.
    fn write_report(&mut self, report: &[u8; REPORT_LEN]) -> io::Result<()>;
}

/// Transport backed by the real gadget character device.
#[derive(Debug)]
pub struct FileHidTransport {
    file: File,
}

impl FileHidTransport {
    /// Open `path` for simultaneous read/write, matching the reference
    /// implementation's `open(path, "r+b", buffering=0)` contract: no
    /// create, no truncate, no internal buffering.
    pub fn open(path: &Path) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)
            .map_err(|source| Error::DeviceUnavailable {
                path: path.to_path_buf(),
                source,
            })?;
        Ok(Self { file })
    }
}

impl HidTransport for FileHidTransport {
    fn read_report(&mut self, buf: &mut [u8; READ_BUF_LEN]) -> io::Result<usize> {
        self.file.read(buf)
    }

    fn write_report(&mut self, report: &[u8; REPORT_LEN]) -> io::Result<()> {
        self.file.write_all(report)
    }
}

/// Pad `body` out to a full 64-byte report. Truncates silently if `body` is
/// already too long, mirroring how the reference implementation slices.
pub fn pad_report(body: &[u8]) -> [u8; REPORT_LEN] {
    let mut report = [0u8; REPORT_LEN];
    let n = body.len().min(REPORT_LEN);
    report[..n].copy_from_slice(&body[..n]);
    report
}

/// In-memory transport for tests: replays a scripted sequence of inbound
/// reports and records every outbound report for later assertions.
#[derive(Clone, Default)]
pub struct FakeHidTransport {
    inbound: Arc<Mutex<std::collections::VecDeque<[u8; READ_BUF_LEN]>>>,
    outbound: Arc<Mutex<Vec<[u8; REPORT_LEN]>>>,
}

impl FakeHidTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a report the console "sends" on the next read.
    pub fn push_inbound(&self, report: &[u8]) {
        let mut padded = [0u8; READ_BUF_LEN];
        let n = report.len().min(READ_BUF_LEN);
        padded[..n].copy_from_slice(&report[..n]);
        self.inbound.lock().unwrap().push_back(padded);
    }

    pub fn outbound_reports(&self) -> Vec<[u8; REPORT_LEN]> {
        self.outbound.lock().unwrap().clone()
    }
}

impl HidTransport for FakeHidTransport {
    fn read_report(&mut self, buf: &mut [u8; READ_BUF_LEN]) -> io::Result<usize> {
        match self.inbound.lock().unwrap().pop_front() {
            Some(report) => {
                *buf = report;
                Ok(REPORT_LEN)
            }
            None => Ok(0),
        }
    }

    fn write_report(&mut self, report: &[u8; REPORT_LEN]) -> io::Result<()> {
        self.outbound.lock().unwrap().push(*report);
        Ok(())
    }
}
