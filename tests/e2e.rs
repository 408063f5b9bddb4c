//! End-to-end scenarios: HID handshake/cadence/input against a fake
//! transport, and network behavior against a real TCP socket.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tempfile::TempDir;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

use ns_procon_emu::controller::{ControllerState, ALL_BUTTONS};
use ns_procon_emu::macro_engine::{MacroRunner, MacroStore};
use ns_procon_emu::net::{serve_on, NetContext};
use ns_procon_emu::protocol::{InputReportFlag, ProtocolEngine, TickCounter};
use ns_procon_emu::scheduler::{spawn_hid_reader, spawn_input_report_emitter, spawn_tick_counter};
use ns_procon_emu::shared_state::SharedState;
use ns_procon_emu::spi_rom::SpiRomStore;
use ns_procon_emu::transport::{FakeHidTransport, HidTransport};

fn write_spi_blob(dir: &Path, addr: u8, data: &[u8]) {
    std::fs::write(dir.join(format!("{addr:02x}.bin")), data).unwrap();
}

fn engine_with_spi_blobs() -> (Arc<ProtocolEngine>, TempDir) {
    let dir = TempDir::new().unwrap();
    write_spi_blob(dir.path(), 0x60, &(0u8..64).collect::<Vec<_>>());
    write_spi_blob(dir.path(), 0x80, &(0u8..64).map(|b| b.wrapping_add(1)).collect::<Vec<_>>());
    let spi_rom = Arc::new(SpiRomStore::load(dir.path()).unwrap());
    let engine = Arc::new(ProtocolEngine::new(
        Arc::new(TickCounter::default()),
        Arc::new(InputReportFlag::default()),
        spi_rom,
    ));
    (engine, dir)
}

/// Scenario 1: handshake sequence produces the fixed replies byte-for-byte.
#[test]
fn scenario_handshake_sequence() {
    let (engine, _dir) = engine_with_spi_blobs();
    let state = ControllerState::neutral();

    let identity = engine.handle_report(&[0x80, 0x01], &state).unwrap();
    assert_eq!(&identity[..2], &[0x81, 0x01]);
    assert_eq!(&identity[2..10], &[0x00, 0x03, 0x00, 0x00, 0x5E, 0x00, 0x53, 0x5E]);

    let mut subcmd_01 = vec![0u8; 11];
    subcmd_01[0] = 0x01;
    subcmd_01[10] = 0x01;
    let reply = engine.handle_report(&subcmd_01, &state).unwrap();
    assert_eq!(reply[0], 0x21);

    let mut device_info = vec![0u8; 11];
    device_info[0] = 0x01;
    device_info[10] = 0x02;
    let reply = engine.handle_report(&device_info, &state).unwrap();
    assert_eq!(reply[0], 0x21);

    for addr in [0x60u8, 0x80u8] {
        let mut spi_req = vec![0u8; 16];
        spi_req[0] = 0x01;
        spi_req[10] = 0x10;
        spi_req[11] = 0x00;
        spi_req[12] = addr;
        spi_req[15] = 0x10;
        let reply = engine.handle_report(&spi_req, &state).unwrap();
        let ack_offset = 2 + 11;
        assert_eq!(reply[ack_offset], 0x90); // positive ack, sub_cmd 0x10
    }

    assert!(engine.handle_report(&[0x80, 0x04], &state).is_none());
    assert!(engine.input_report_enabled.is_enabled());
}

/// Scenario 2: periodic cadence produces reports only while enabled, at
/// roughly the 30 ms period.
#[test]
fn scenario_periodic_cadence() {
    let (engine, _dir) = engine_with_spi_blobs();
    let state = Arc::new(SharedState::new(ControllerState::neutral()));
    let fake = FakeHidTransport::new();
    let transport: Arc<Mutex<Box<dyn HidTransport>>> = Arc::new(Mutex::new(Box::new(fake.clone())));
    let shutdown = Arc::new(AtomicBool::new(false));

    let emitter = spawn_input_report_emitter(engine.clone(), state, transport, shutdown.clone());
    engine.input_report_enabled.enable();
    std::thread::sleep(Duration::from_millis(500));
    engine.input_report_enabled.disable();
    let count_after_enable = fake.outbound_reports().len();
    std::thread::sleep(Duration::from_millis(100));
    shutdown.store(true, Ordering::Relaxed);
    emitter.join().unwrap();

    let reports = fake.outbound_reports();
    assert_eq!(reports.len(), count_after_enable, "no reports after disable");
    assert!(
        (10..=20).contains(&reports.len()),
        "expected roughly 500ms/30ms reports, got {}",
        reports.len()
    );
    assert!(reports.iter().all(|r| r[0] == 0x30));

    let mut ticks: Vec<u8> = reports.iter().map(|r| r[1]).collect();
    ticks.dedup();
    assert!(ticks.len() > 1, "tick byte never advanced across reports");
}

/// Scenario 3: a single INPUT request presses then releases a button, and
/// the periodic stream observes the transient press.
#[tokio::test]
async fn scenario_single_input_via_network() {
    let (engine, _dir) = engine_with_spi_blobs();
    engine.input_report_enabled.enable();
    let shared_state = Arc::new(SharedState::new(ControllerState::neutral()));
    let fake = FakeHidTransport::new();
    let transport: Arc<Mutex<Box<dyn HidTransport>>> = Arc::new(Mutex::new(Box::new(fake.clone())));
    let shutdown = Arc::new(AtomicBool::new(false));
    let emitter = spawn_input_report_emitter(engine, shared_state.clone(), transport, shutdown.clone());

    let macro_dir = TempDir::new().unwrap();
    let ctx = Arc::new(NetContext {
        shared_state: shared_state.clone(),
        macro_runner: Arc::new(MacroRunner::new(shared_state)),
        macro_store: Arc::new(MacroStore::new(macro_dir.path())),
    });
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let net_shutdown = shutdown.clone();
    tokio::spawn(async move {
        let _ = serve_on(listener, ctx, net_shutdown).await;
    });

    let mut client = TcpStream::connect(addr).await.unwrap();
    let a_index = ALL_BUTTONS.iter().position(|b| b.name() == "A").unwrap();
    let mut body = vec![0u8; 52];
    body[a_index] = 1;
    body[36..44].copy_from_slice(&0.1f64.to_be_bytes()); // down
    body[44..52].copy_from_slice(&0.02f64.to_be_bytes()); // up
    let mut request = vec![1u8]; // INPUT tag
    request.extend_from_slice(&body);
    client.write_all(&request).await.unwrap();

    let mut response = [0u8; 2];
    client.read_exact(&mut response).await.unwrap();
    assert_eq!(&response, b"OK");

    std::thread::sleep(Duration::from_millis(250));
    shutdown.store(true, Ordering::Relaxed);
    emitter.join().unwrap();

    let reports = fake.outbound_reports();
    let a_bit_set = reports.iter().any(|r| r[3] & 0x08 != 0); // report[3] = right-side buttons byte
    let a_bit_cleared_later = reports.last().map(|r| r[3] & 0x08 == 0).unwrap_or(false);
    assert!(a_bit_set, "expected at least one report with A pressed");
    assert!(a_bit_cleared_later, "expected A to be released by the end");
}

/// Scenario 4: starting a macro then sending MACRO_STOP mid-run restores
/// neutral state.
#[tokio::test]
async fn scenario_macro_run_and_preempt() {
    let shared_state = Arc::new(SharedState::new(ControllerState::neutral()));
    let macro_dir = TempDir::new().unwrap();
    let ctx = Arc::new(NetContext {
        shared_state: shared_state.clone(),
        macro_runner: Arc::new(MacroRunner::new(shared_state.clone())),
        macro_store: Arc::new(MacroStore::new(macro_dir.path())),
    });
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let shutdown = Arc::new(AtomicBool::new(false));
    let server_shutdown = shutdown.clone();
    tokio::spawn(async move {
        let _ = serve_on(listener, ctx, server_shutdown).await;
    });

    let mut client = TcpStream::connect(addr).await.unwrap();
    let payload = b"LOOP 10\n    A 0.2s\n";
    let mut start_request = vec![3u8]; // MACRO_START tag
    start_request.extend_from_slice(&(payload.len() as u32).to_be_bytes());
    start_request.extend_from_slice(payload);
    client.write_all(&start_request).await.unwrap();
    let mut reply = vec![0u8; b"MACRO_STARTED".len()];
    client.read_exact(&mut reply).await.unwrap();
    assert_eq!(&reply, b"MACRO_STARTED");

    tokio::time::sleep(Duration::from_millis(50)).await;
    client.write_all(&[4u8]).await.unwrap(); // MACRO_STOP tag
    let mut reply = vec![0u8; b"MACRO_STOPPED".len()];
    client.read_exact(&mut reply).await.unwrap();
    assert_eq!(&reply, b"MACRO_STOPPED");

    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(shared_state.get(), ControllerState::neutral());

    shutdown.store(true, Ordering::Relaxed);
}

/// Scenario 5: a second concurrent client is rejected.
#[tokio::test]
async fn scenario_second_client_rejected() {
    let shared_state = Arc::new(SharedState::new(ControllerState::neutral()));
    let macro_dir = TempDir::new().unwrap();
    let ctx = Arc::new(NetContext {
        shared_state: shared_state.clone(),
        macro_runner: Arc::new(MacroRunner::new(shared_state)),
        macro_store: Arc::new(MacroStore::new(macro_dir.path())),
    });
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let shutdown = Arc::new(AtomicBool::new(false));
    let server_shutdown = shutdown.clone();
    tokio::spawn(async move {
        let _ = serve_on(listener, ctx, server_shutdown).await;
    });

    let _first = TcpStream::connect(addr).await.unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;
    let mut second = TcpStream::connect(addr).await.unwrap();
    let mut buf = Vec::new();
    let _ = tokio::time::timeout(Duration::from_millis(300), second.read_to_end(&mut buf)).await;

    shutdown.store(true, Ordering::Relaxed);
    assert!(buf.starts_with(b"ERR:Only one client allowed"));
}

/// Scenario 6: an SPI read for an unregistered address gets a negative ack
/// and the reader keeps serving subsequent requests.
#[test]
fn scenario_spi_unknown_address_then_continues() {
    let (engine, _dir) = engine_with_spi_blobs();
    let state = Arc::new(SharedState::new(ControllerState::neutral()));
    let fake = FakeHidTransport::new();

    let mut unknown_spi = vec![0u8; 16];
    unknown_spi[0] = 0x01;
    unknown_spi[10] = 0x10;
    unknown_spi[12] = 0x70;
    unknown_spi[15] = 0x10;
    fake.push_inbound(&unknown_spi);
    fake.push_inbound(&[0x80, 0x01]);

    let transport: Arc<Mutex<Box<dyn HidTransport>>> = Arc::new(Mutex::new(Box::new(fake.clone())));
    let shutdown = Arc::new(AtomicBool::new(false));
    let reader = spawn_hid_reader(engine, state, transport, shutdown.clone());
    std::thread::sleep(Duration::from_millis(50));
    shutdown.store(true, Ordering::Relaxed);
    drop(reader);

    let reports = fake.outbound_reports();
    assert_eq!(reports.len(), 2);
    let ack_offset = 2 + 11;
    assert_eq!(reports[0][ack_offset], 0x00, "unregistered SPI read must nack");
    assert_eq!(&reports[1][..2], &[0x81, 0x01], "reader kept serving after the nack");
}

/// Background tick-counter thread sanity, used to ground the 5 ms tick claim
/// independent of the emitter cadence assertions above.
#[test]
fn tick_counter_runs_independently() {
    let tick = Arc::new(TickCounter::default());
    let shutdown = Arc::new(AtomicBool::new(false));
    let handle = spawn_tick_counter(tick.clone(), shutdown.clone());
    std::thread::sleep(Duration::from_millis(55));
    shutdown.store(true, Ordering::Relaxed);
    handle.join().unwrap();
    assert!(tick.get() >= 8);
}
