//! The soft-real-time tasks: tick counter, periodic input-report emitter,
//! and the HID reader loop that drives the protocol engine.
//!
//! Each runs on its own OS thread and polls a shutdown flag cooperatively,
//! the same shape the reference implementation uses for its counter and
//! input-report loops (daemon threads sleeping on a fixed period).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use tracing::{error, info};

use crate::protocol::{ProtocolEngine, TickCounter};
use crate::shared_state::SharedState;
use crate::transport::{HidTransport, READ_BUF_LEN};

const TICK_PERIOD: Duration = Duration::from_millis(5);
const INPUT_REPORT_PERIOD: Duration = Duration::from_millis(30);

/// Every 5 ms, increments the tick counter mod 256 (wrapping add on a u8).
pub fn spawn_tick_counter(tick: Arc<TickCounter>, shutdown: Arc<AtomicBool>) -> JoinHandle<()> {
    std::thread::Builder::new()
        .name("tick-counter".into())
        .spawn(move || {
            while !shutdown.load(Ordering::Relaxed) {
                std::thread::sleep(TICK_PERIOD);
                tick.increment();
            }
        })
        .expect("failed to spawn tick-counter thread")
}

/// Every 30 ms, while enabled, writes a fresh standard input report.
pub fn spawn_input_report_emitter(
    engine: Arc<ProtocolEngine>,
    state: Arc<SharedState>,
    transport: Arc<Mutex<Box<dyn HidTransport>>>,
    shutdown: Arc<AtomicBool>,
) -> JoinHandle<()> {
    std::thread::Builder::new()
        .name("input-report-emitter".into())
        .spawn(move || {
            while !shutdown.load(Ordering::Relaxed) {
                std::thread::sleep(INPUT_REPORT_PERIOD);
                if !engine.input_report_enabled.is_enabled() {
                    continue;
                }
                let report = engine.build_input_report(&state.get());
                if let Err(e) = transport.lock().unwrap().write_report(&report) {
                    error!("input-report emitter write failed: {e}");
                    return;
                }
            }
        })
        .expect("failed to spawn input-report-emitter thread")
}

/// Reads inbound reports and feeds them to the protocol engine, writing
/// back whatever reply it produces. Exits when the transport returns an
/// error (console disconnected or `close()` released the endpoint).
pub fn spawn_hid_reader(
    engine: Arc<ProtocolEngine>,
    state: Arc<SharedState>,
    transport: Arc<Mutex<Box<dyn HidTransport>>>,
    shutdown: Arc<AtomicBool>,
) -> JoinHandle<()> {
    std::thread::Builder::new()
        .name("hid-reader".into())
        .spawn(move || {
            let mut buf = [0u8; READ_BUF_LEN];
            while !shutdown.load(Ordering::Relaxed) {
                let n = match transport.lock().unwrap().read_report(&mut buf) {
                    Ok(n) => n,
                    Err(e) => {
                        error!("HID transport read error, reader exiting: {e}");
                        return;
                    }
                };
                if n == 0 {
                    std::thread::sleep(Duration::from_millis(1));
                    continue;
                }
                if let Some(reply) = engine.handle_report(&buf[..n], &state.get()) {
                    if let Err(e) = transport.lock().unwrap().write_report(&reply) {
                        error!("HID reply write failed: {e}");
                        return;
                    }
                }
            }
            info!("HID reader thread stopped");
        })
        .expect("failed to spawn HID reader thread")
}
