//! Wire framing for the TCP control surface.
//!
//! One byte selects the message type; payload shapes are fixed per type.
//! All multi-byte lengths are big-endian, except the INPUT message's axis
//! integers and duration floats, which carry the sender's native encodings
//! verbatim.

use tokio::io::{AsyncReadExt, AsyncWriteExt};

use crate::controller::{ControllerState, Stick, ALL_BUTTONS};
use crate::error::{Error, Result};

#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    Ping,
    Input {
        state: ControllerState,
        down: f64,
        up: f64,
    },
    GetState,
    MacroStart(String),
    MacroStop,
    PauseMacro,
    ResumeMacro,
    ListMacros,
    LoadMacro(String),
    SaveMacro { name: String, body: String },
    DeleteMacro(String),
    GetMacroStatus,
}

const TAG_PING: u8 = 0;
const TAG_INPUT: u8 = 1;
const TAG_GET_STATE: u8 = 2;
const TAG_MACRO_START: u8 = 3;
const TAG_MACRO_STOP: u8 = 4;
const TAG_PAUSE_MACRO: u8 = 5;
const TAG_RESUME_MACRO: u8 = 6;
const TAG_LIST_MACROS: u8 = 7;
const TAG_LOAD_MACRO: u8 = 8;
const TAG_SAVE_MACRO: u8 = 9;
const TAG_DELETE_MACRO: u8 = 10;
const TAG_GET_MACRO_STATUS: u8 = 11;

/// INPUT's fixed-width packed body: 18 button flags, 2 stick-press flags
/// (carried but folded into the button set on decode), 4 signed 32-bit axis
/// integers, 2 f64 durations.
const INPUT_BODY_LEN: usize = 18 + 2 + 4 * 4 + 2 * 8;

impl Message {
    pub async fn read_from<R: AsyncReadExt + Unpin>(stream: &mut R) -> Result<Message> {
        let tag = stream.read_u8().await?;
        match tag {
            TAG_PING => Ok(Message::Ping),
            TAG_INPUT => {
                let mut body = [0u8; INPUT_BODY_LEN];
                stream.read_exact(&mut body).await?;
                decode_input_body(&body)
            }
            TAG_GET_STATE => Ok(Message::GetState),
            TAG_MACRO_START => {
                let len = stream.read_u32().await? as usize;
                let payload = read_utf8(stream, len).await?;
                Ok(Message::MacroStart(payload))
            }
            TAG_MACRO_STOP => Ok(Message::MacroStop),
            TAG_PAUSE_MACRO => Ok(Message::PauseMacro),
            TAG_RESUME_MACRO => Ok(Message::ResumeMacro),
            TAG_LIST_MACROS => Ok(Message::ListMacros),
            TAG_LOAD_MACRO => {
                let len = stream.read_u16().await? as usize;
                let name = read_utf8(stream, len).await?;
                Ok(Message::LoadMacro(name))
            }
            TAG_SAVE_MACRO => {
                let name_len = stream.read_u16().await? as usize;
                let name = read_utf8(stream, name_len).await?;
                let body_len = stream.read_u32().await? as usize;
                let body = read_utf8(stream, body_len).await?;
                Ok(Message::SaveMacro { name, body })
            }
            TAG_DELETE_MACRO => {
                let len = stream.read_u16().await? as usize;
                let name = read_utf8(stream, len).await?;
                Ok(Message::DeleteMacro(name))
            }
            TAG_GET_MACRO_STATUS => Ok(Message::GetMacroStatus),
            other => Err(Error::InvalidMessage(format!("unknown message tag {other}"))),
        }
    }
}

async fn read_utf8<R: AsyncReadExt + Unpin>(stream: &mut R, len: usize) -> Result<String> {
    let mut buf = vec![0u8; len];
    stream.read_exact(&mut buf).await?;
    String::from_utf8(buf).map_err(|e| Error::InvalidMessage(format!("non-utf8 payload: {e}")))
}

fn decode_input_body(body: &[u8; INPUT_BODY_LEN]) -> Result<Message> {
    let mut state = ControllerState::neutral();
    for (i, button) in ALL_BUTTONS.iter().enumerate() {
        if body[i] != 0 {
            state.set_pressed(*button, true);
        }
    }
    // bytes 18..20 are LS/RS-pressed flags; LS_PRESS/RS_PRESS already live
    // in the 18-button block above, so these are accepted but not decoded
    // separately — kept for wire-compatibility with senders that always
    // emit all 20 flags.
    let axis_start = 20;
    let read_i32 = |off: usize| {
        i32::from_be_bytes([
            body[off],
            body[off + 1],
            body[off + 2],
            body[off + 3],
        ])
    };
    let ls_x = read_i32(axis_start) as f32 / i32::MAX as f32;
    let ls_y = read_i32(axis_start + 4) as f32 / i32::MAX as f32;
    let rs_x = read_i32(axis_start + 8) as f32 / i32::MAX as f32;
    let rs_y = read_i32(axis_start + 12) as f32 / i32::MAX as f32;
    state.ls = Stick { x: ls_x, y: ls_y };
    state.rs = Stick { x: rs_x, y: rs_y };

    let float_start = axis_start + 16;
    let read_f64 = |off: usize| {
        f64::from_be_bytes(body[off..off + 8].try_into().unwrap())
    };
    let down = read_f64(float_start);
    let up = read_f64(float_start + 8);

    Ok(Message::Input { state, down, up })
}

/// Write a plain-text response (a status token or an `ERR:` line).
pub async fn write_text<W: AsyncWriteExt + Unpin>(stream: &mut W, text: &str) -> Result<()> {
    stream.write_all(text.as_bytes()).await?;
    Ok(())
}
