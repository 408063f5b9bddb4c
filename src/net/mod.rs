//! TCP control surface: accepts one client at a time and dispatches its
//! requests against the shared controller state, the macro runner, and
//! macro storage.

pub mod message;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tracing::{info, warn};

use crate::controller::ALL_BUTTONS;
use crate::error::Error;
use crate::macro_engine::{parse_payload, MacroRunner, MacroStore};
use crate::shared_state::SharedState;

use message::Message;

/// Shared dependencies every client session needs.
pub struct NetContext {
    pub shared_state: Arc<SharedState>,
    pub macro_runner: Arc<MacroRunner>,
    pub macro_store: Arc<MacroStore>,
}

/// Run the control-surface listener until `shutdown` is set. Rejects a
/// second concurrent connection with `ERR:Only one client allowed`.
pub async fn serve(
    addr: &str,
    ctx: Arc<NetContext>,
    shutdown: Arc<AtomicBool>,
) -> crate::error::Result<()> {
    let listener = TcpListener::bind(addr).await?;
    info!(addr, "network surface listening");
    serve_on(listener, ctx, shutdown).await
}

/// Same as `serve`, but against an already-bound listener — lets tests grab
/// an ephemeral port without racing a second bind on the same address.
pub async fn serve_on(
    listener: TcpListener,
    ctx: Arc<NetContext>,
    shutdown: Arc<AtomicBool>,
) -> crate::error::Result<()> {
    let busy = Arc::new(AtomicBool::new(false));

    loop {
        if shutdown.load(Ordering::Relaxed) {
            return Ok(());
        }
        let (stream, peer) = tokio::select! {
            accepted = listener.accept() => accepted?,
            _ = tokio::time::sleep(Duration::from_millis(200)) => continue,
        };

        if busy.swap(true, Ordering::AcqRel) {
            tokio::spawn(reject_client(stream));
            continue;
        }

        info!(%peer, "client connected");
        let ctx = ctx.clone();
        let busy = busy.clone();
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            if let Err(e) = handle_client(stream, &ctx, &shutdown).await {
                warn!(%peer, "client session ended: {e}");
            }
            busy.store(false, Ordering::Release);
            info!(%peer, "client disconnected");
        });
    }
}

async fn reject_client(mut stream: TcpStream) {
    let _ = stream.write_all(b"ERR:Only one client allowed").await;
    let _ = stream.shutdown().await;
}

async fn handle_client(
    mut stream: TcpStream,
    ctx: &NetContext,
    shutdown: &AtomicBool,
) -> crate::error::Result<()> {
    loop {
        if shutdown.load(Ordering::Relaxed) {
            return Ok(());
        }
        let message = match Message::read_from(&mut stream).await {
            Ok(m) => m,
            Err(_) => return Ok(()), // client closed the connection
        };
        let response = dispatch(message, ctx).await;
        stream.write_all(response.as_bytes()).await?;
    }
}

async fn dispatch(message: Message, ctx: &NetContext) -> String {
    match message {
        Message::Ping => "PONG".to_string(),
        Message::Input { state, down, up } => handle_input(ctx, state, down, up).await,
        Message::GetState => get_state_json(ctx),
        Message::MacroStart(payload) => handle_macro_start(ctx, &payload),
        Message::MacroStop => {
            ctx.macro_runner.stop_and_wait();
            "MACRO_STOPPED".to_string()
        }
        Message::PauseMacro => {
            if ctx.macro_runner.pause() {
                "MACRO_PAUSED".to_string()
            } else {
                "ERR:No macro running".to_string()
            }
        }
        Message::ResumeMacro => {
            if ctx.macro_runner.resume() {
                "MACRO_RESUMED".to_string()
            } else {
                "ERR:No macro running".to_string()
            }
        }
        Message::ListMacros => match ctx.macro_store.list() {
            Ok(names) => json!(names).to_string(),
            Err(e) => format!("ERR:{e}"),
        },
        Message::LoadMacro(name) => match ctx.macro_store.load(&name) {
            Ok(body) => body,
            Err(Error::MacroNotFound(_)) => "ERR:Macro not found".to_string(),
            Err(e) => format!("ERR:{e}"),
        },
        Message::SaveMacro { name, body } => handle_save_macro(ctx, &name, &body),
        Message::DeleteMacro(name) => match ctx.macro_store.delete(&name) {
            Ok(()) => "MACRO_DELETED".to_string(),
            Err(Error::MacroNotFound(_)) => "ERR:Macro not found".to_string(),
            Err(e) => format!("ERR:{e}"),
        },
        Message::GetMacroStatus => {
            serde_json::to_string(&ctx.macro_runner.status()).unwrap_or_else(|_| "{}".to_string())
        }
    }
}

async fn handle_input(ctx: &NetContext, state: crate::controller::ControllerState, down: f64, up: f64) -> String {
    if ctx.macro_runner.is_running() {
        return "ERR:Macro is running, stop it first".to_string();
    }
    let prev = ctx.shared_state.swap(state);
    tokio::time::sleep(Duration::from_secs_f64(down)).await;
    ctx.shared_state.set(prev);
    tokio::time::sleep(Duration::from_secs_f64(up)).await;
    "OK".to_string()
}

fn get_state_json(ctx: &NetContext) -> String {
    let state = ctx.shared_state.get();
    let buttons: serde_json::Map<String, serde_json::Value> = ALL_BUTTONS
        .iter()
        .map(|b| (b.name().to_string(), json!(state.is_pressed(*b))))
        .collect();
    json!({
        "buttons": buttons,
        "ls": {"x": state.ls.x, "y": state.ls.y},
        "rs": {"x": state.rs.x, "y": state.rs.y},
    })
    .to_string()
}

fn handle_macro_start(ctx: &NetContext, payload: &str) -> String {
    match parse_payload(payload) {
        Ok(parsed) => {
            ctx.macro_runner.start(parsed.steps, parsed.repeat);
            "MACRO_STARTED".to_string()
        }
        Err(e) => format!("ERR:{e}"),
    }
}

fn handle_save_macro(ctx: &NetContext, name: &str, body: &str) -> String {
    match parse_payload(body) {
        Ok(parsed) => match ctx.macro_store.save(name, &parsed) {
            Ok(()) => "MACRO_SAVED".to_string(),
            Err(e) => format!("ERR:{e}"),
        },
        Err(e) => format!("ERR:{e}"),
    }
}
