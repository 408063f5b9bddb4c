//! Macro persistence: one JSON file per macro under the configured macros
//! directory, named `<name>.json`.
//!
//! Mirrors the corpus's JSON-index CRUD shape (list/load/save/delete over a
//! directory of named files) but drops the separate binary-frame format —
//! everything here is self-describing JSON.

use std::path::{Path, PathBuf};

use serde_json::json;

use crate::error::{Error, Result};
use crate::macro_engine::ParsedMacro;

pub struct MacroStore {
    dir: PathBuf,
}

impl MacroStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn path_for(&self, name: &str) -> PathBuf {
        self.dir.join(format!("{name}.json"))
    }

    /// Stem names of every `.json` file in the macros directory, sorted. A
    /// missing directory is treated as an empty store rather than an error.
    pub fn list(&self) -> Result<Vec<String>> {
        let entries = match std::fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(Error::MacroIo(e)),
        };

        let mut names = Vec::new();
        for entry in entries {
            let entry = entry.map_err(Error::MacroIo)?;
            let path = entry.path();
            if path.extension().and_then(|ext| ext.to_str()) == Some("json") {
                if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                    names.push(stem.to_string());
                }
            }
        }
        names.sort();
        Ok(names)
    }

    /// Raw file contents for `name`, as stored — exactly what LOAD_MACRO
    /// sends back over the wire.
    pub fn load(&self, name: &str) -> Result<String> {
        std::fs::read_to_string(self.path_for(name))
            .map_err(|_| Error::MacroNotFound(name.to_string()))
    }

    pub fn save(&self, name: &str, macro_: &ParsedMacro) -> Result<()> {
        std::fs::create_dir_all(&self.dir).map_err(Error::MacroIo)?;
        let doc = match &macro_.source_text {
            Some(source) => json!({
                "steps": macro_.steps,
                "repeat": macro_.repeat,
                "source": source,
            }),
            None => json!({
                "steps": macro_.steps,
                "repeat": macro_.repeat,
            }),
        };
        let text = serde_json::to_string_pretty(&doc)?;
        std::fs::write(self.path_for(name), text).map_err(Error::MacroIo)
    }

    pub fn delete(&self, name: &str) -> Result<()> {
        std::fs::remove_file(self.path_for(name)).map_err(|_| Error::MacroNotFound(name.to_string()))
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}
