use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::Context;
use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DebugEntry {
    pub title: String,
    pub content: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DebugArtifact {
    pub slide_id: String,
    pub ordinal: usize,
    pub name: String,
    pub image_path: Option<String>,
}

/// Session log for one run. Entries are only ever appended; the session is
/// persisted once, when the run settles.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DebugSession {
    pub run_id: String,
    pub created_at: String,
    pub entries: Vec<DebugEntry>,
    pub artifacts: Vec<DebugArtifact>,
}

impl DebugSession {
    pub fn new(run_id: impl Into<String>) -> Self {
        Self {
            run_id: run_id.into(),
            created_at: Utc::now().to_rfc3339_opts(SecondsFormat::Micros, false),
            entries: Vec::new(),
            artifacts: Vec::new(),
        }
    }

    pub fn log(&mut self, title: impl Into<String>, content: impl Into<String>) {
        self.entries.push(DebugEntry {
            title: title.into(),
            content: content.into(),
        });
    }

    pub fn add_artifact(&mut self, artifact: DebugArtifact) {
        self.artifacts.push(artifact);
    }
}

pub fn debug_session_path(dir: &Path, run_id: &str) -> PathBuf {
    dir.join(format!("{run_id}.json"))
}

/// Writes the session to `<dir>/<run_id>.json`. Refuses to overwrite an
/// existing session file.
pub fn write_debug_session(dir: &Path, session: &DebugSession) -> anyhow::Result<PathBuf> {
    std::fs::create_dir_all(dir)?;
    let path = debug_session_path(dir, &session.run_id);
    let mut file = OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(&path)
        .with_context(|| format!("debug session already recorded at {}", path.display()))?;
    file.write_all(serde_json::to_string_pretty(session)?.as_bytes())?;
    Ok(path)
}
