//! The protocol engine: decodes inbound HID reports from the console and
//! produces outbound reports.
//!
//! Stateless apart from whether the periodic input-report task is active —
//! everything else it needs (tick counter, controller state, SPI-ROM store)
//! is passed in by the caller.

use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::controller::ControllerState;
use crate::spi_rom::SpiRomStore;
use crate::transport::{pad_report, REPORT_LEN};

/// Shared tick counter, incremented every 5 ms by the counter task and read
/// by everything that stamps a report with the current tick.
#[derive(Default)]
pub struct TickCounter(AtomicU8);

impl TickCounter {
    pub fn get(&self) -> u8 {
        self.0.load(Ordering::Relaxed)
    }

    pub fn increment(&self) {
        self.0.fetch_add(1, Ordering::Relaxed);
    }
}

/// Cooperative flag the protocol engine sets/clears on 0x80/0x04 and
/// 0x80/0x05; the input-report emitter polls it every tick.
#[derive(Default)]
pub struct InputReportFlag(AtomicBool);

impl InputReportFlag {
    pub fn enable(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn disable(&self) {
        self.0.store(false, Ordering::Relaxed);
    }

    pub fn is_enabled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

const HANDSHAKE_IDENTITY_REPLY: [u8; 8] = [0x00, 0x03, 0x00, 0x00, 0x5E, 0x00, 0x53, 0x5E];
const DEVICE_INFO_REPLY: [u8; 12] = [
    0x03, 0x48, 0x03, 0x02, 0x5E, 0x53, 0x00, 0x5E, 0x00, 0x00, 0x03, 0x01,
];
const SUBCMD_01_REPLY: [u8; 2] = [0x03, 0x01];
const SUBCMD_21_REPLY: [u8; 8] = [0x01, 0x00, 0xFF, 0x00, 0x03, 0x00, 0x05, 0x01];

/// Decodes one inbound report and returns the outbound reports (zero, one,
/// or — in principle — more) it produces, given shared access to the
/// current controller state and SPI-ROM store.
pub struct ProtocolEngine {
    pub tick: Arc<TickCounter>,
    pub input_report_enabled: Arc<InputReportFlag>,
    pub spi_rom: Arc<SpiRomStore>,
}

impl ProtocolEngine {
    pub fn new(
        tick: Arc<TickCounter>,
        input_report_enabled: Arc<InputReportFlag>,
        spi_rom: Arc<SpiRomStore>,
    ) -> Self {
        Self {
            tick,
            input_report_enabled,
            spi_rom,
        }
    }

    /// Handle one inbound report, given the controller state to embed in
    /// any UART reply. Returns `Some(report)` if a reply should be written.
    pub fn handle_report(&self, report: &[u8], state: &ControllerState) -> Option<[u8; REPORT_LEN]> {
        if report.is_empty() {
            return None;
        }
        match report[0] {
            0x00 | 0x10 => None,
            0x80 => self.handle_usb_subcommand(report, state),
            0x01 => self.handle_uart_subcommand(report, state),
            other => {
                debug!(first_byte = format!("{other:#04x}"), "ignoring unrecognized report");
                None
            }
        }
    }

    fn handle_usb_subcommand(
        &self,
        report: &[u8],
        state: &ControllerState,
    ) -> Option<[u8; REPORT_LEN]> {
        let cmd = *report.get(1)?;
        match cmd {
            0x04 => {
                self.input_report_enabled.enable();
                info!("periodic input reports enabled");
                return None;
            }
            0x05 => {
                self.input_report_enabled.disable();
                info!("periodic input reports disabled");
                return None;
            }
            _ => {}
        }
        let mut body = vec![0x81u8, cmd];
        match cmd {
            0x01 => body.extend_from_slice(&HANDSHAKE_IDENTITY_REPLY),
            0x02 | 0x03 => {}
            other => {
                debug!(cmd = format!("{other:#04x}"), "unknown USB subcommand");
                return None;
            }
        }
        let _ = state;
        Some(pad_report(&body))
    }

    fn handle_uart_subcommand(
        &self,
        report: &[u8],
        state: &ControllerState,
    ) -> Option<[u8; REPORT_LEN]> {
        let sub_cmd = *report.get(10)?;
        match sub_cmd {
            0x01 => Some(self.uart_reply(state, true, sub_cmd, &SUBCMD_01_REPLY)),
            0x02 => Some(self.uart_reply(state, true, sub_cmd, &DEVICE_INFO_REPLY)),
            0x03 | 0x08 | 0x30 | 0x38 | 0x40 | 0x41 | 0x48 | 0x04 => {
                Some(self.uart_reply(state, true, sub_cmd, &[]))
            }
            0x10 => Some(self.handle_spi_read(report, state, sub_cmd)),
            0x21 => Some(self.uart_reply(state, true, sub_cmd, &SUBCMD_21_REPLY)),
            other => {
                debug!(sub_cmd = format!("{other:#04x}"), "unknown UART subcommand");
                None
            }
        }
    }

    fn handle_spi_read(
        &self,
        report: &[u8],
        state: &ControllerState,
        sub_cmd: u8,
    ) -> [u8; REPORT_LEN] {
        let spi_off = report.get(11).copied().unwrap_or(0);
        let spi_addr = report.get(12).copied().unwrap_or(0);
        let spi_len = report.get(15).copied().unwrap_or(0);

        match self.spi_rom.read(spi_addr, spi_off as usize, spi_len as usize) {
            Some(data) => {
                let extra_end = report.len().min(16);
                let mut extra = report[11..extra_end].to_vec();
                extra.extend_from_slice(&data);
                self.uart_reply(state, true, sub_cmd, &extra)
            }
            None => {
                warn!(
                    addr = format!("{spi_addr:#04x}"),
                    offset = spi_off,
                    len = spi_len,
                    "SPI read rejected: unregistered address or out-of-range slice"
                );
                self.uart_reply(state, false, sub_cmd, &[])
            }
        }
    }

    /// Build one UART-tunneled reply: ack=0x21, cmd=tick, payload = input
    /// buffer || [ack_byte, sub_cmd] || extra.
    fn uart_reply(
        &self,
        state: &ControllerState,
        ack: bool,
        sub_cmd: u8,
        extra: &[u8],
    ) -> [u8; REPORT_LEN] {
        let ack_byte = if !ack {
            0x00
        } else if extra.is_empty() {
            0x80
        } else {
            0x80 | sub_cmd
        };

        let mut body = vec![0x21u8, self.tick.get()];
        body.extend_from_slice(&state.encode_body());
        body.push(ack_byte);
        body.push(sub_cmd);
        body.extend_from_slice(extra);
        pad_report(&body)
    }

    /// Build the periodic standard input report (cmd 0x30).
    pub fn build_input_report(&self, state: &ControllerState) -> [u8; REPORT_LEN] {
        let mut body = vec![0x30u8, self.tick.get()];
        body.extend_from_slice(&state.encode_body());
        pad_report(&body)
    }
}
