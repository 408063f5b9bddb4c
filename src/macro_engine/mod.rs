//! Macro authoring, persistence, and playback.

pub mod parser;
pub mod runner;
pub mod storage;

use serde::{Deserialize, Serialize};

pub use parser::{parse_text, MacroStep};
pub use runner::{MacroRunner, MacroStatus};
pub use storage::MacroStore;

use crate::error::Result;

/// The JSON form: `{steps: [...], repeat?: int}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct MacroJson {
    steps: Vec<MacroStep>,
    #[serde(default)]
    repeat: Option<u32>,
}

/// A macro ready to hand to the runner, plus enough provenance to persist it
/// the way it arrived (JSON stays JSON; text keeps its source alongside the
/// expanded steps).
pub struct ParsedMacro {
    pub steps: Vec<MacroStep>,
    pub repeat: Option<u32>,
    pub source_text: Option<String>,
}

/// Parse a macro payload that may be either the JSON form or the text DSL.
/// JSON is tried first since the text grammar never starts with `{`.
pub fn parse_payload(payload: &str) -> Result<ParsedMacro> {
    if payload.trim_start().starts_with('{') {
        let doc: MacroJson = serde_json::from_str(payload)?;
        return Ok(ParsedMacro {
            steps: doc.steps,
            repeat: doc.repeat,
            source_text: None,
        });
    }
    let steps = parse_text(payload)?;
    Ok(ParsedMacro {
        steps,
        repeat: None,
        source_text: Some(payload.to_string()),
    })
}
