use std::path::PathBuf;
use std::sync::Mutex;

use anyhow::{bail, Result};
use deckr_contracts::debug::{write_debug_session, DebugArtifact, DebugSession};

/// Optional per-run session log. Recording must never fail a run, so the
/// logging calls are infallible; only `finish` touches the filesystem.
pub trait DebugRecorder: Send + Sync {
    fn log(&self, title: &str, content: &str);
    fn add_artifact(&self, artifact: DebugArtifact);
    /// Persists the session once. Returns `None` when recording is off.
    fn finish(&self) -> Result<Option<PathBuf>>;
}

pub struct NoopRecorder;

impl DebugRecorder for NoopRecorder {
    fn log(&self, _title: &str, _content: &str) {}

    fn add_artifact(&self, _artifact: DebugArtifact) {}

    fn finish(&self) -> Result<Option<PathBuf>> {
        Ok(None)
    }
}

pub struct SessionRecorder {
    dir: PathBuf,
    state: Mutex<RecorderState>,
}

struct RecorderState {
    session: DebugSession,
    written: Option<PathBuf>,
}

impl SessionRecorder {
    pub fn new(dir: impl Into<PathBuf>, run_id: &str) -> Self {
        Self {
            dir: dir.into(),
            state: Mutex::new(RecorderState {
                session: DebugSession::new(run_id),
                written: None,
            }),
        }
    }

    pub fn snapshot(&self) -> Option<DebugSession> {
        self.state.lock().ok().map(|state| state.session.clone())
    }
}

impl DebugRecorder for SessionRecorder {
    fn log(&self, title: &str, content: &str) {
        if let Ok(mut state) = self.state.lock() {
            if state.written.is_none() {
                state.session.log(title, content);
            }
        }
    }

    fn add_artifact(&self, artifact: DebugArtifact) {
        if let Ok(mut state) = self.state.lock() {
            if state.written.is_none() {
                state.session.add_artifact(artifact);
            }
        }
    }

    fn finish(&self) -> Result<Option<PathBuf>> {
        let Ok(mut state) = self.state.lock() else {
            bail!("debug recorder lock poisoned");
        };
        if let Some(path) = state.written.as_ref() {
            return Ok(Some(path.clone()));
        }
        let path = write_debug_session(&self.dir, &state.session)?;
        state.written = Some(path.clone());
        Ok(Some(path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_is_written_once_and_frozen() -> Result<()> {
        let temp = tempfile::tempdir()?;
        let recorder = SessionRecorder::new(temp.path().join("debug"), "deck-7");
        recorder.log("Outline", "Intro\n---\nProblem");
        recorder.add_artifact(DebugArtifact {
            slide_id: "a".to_string(),
            ordinal: 0,
            name: "Intro".to_string(),
            image_path: None,
        });

        let first = recorder.finish()?;
        recorder.log("Late", "ignored");
        let second = recorder.finish()?;
        assert_eq!(first, second);

        let Some(path) = first else {
            panic!("expected a session path");
        };
        let stored: DebugSession = serde_json::from_str(&std::fs::read_to_string(path)?)?;
        assert_eq!(stored.run_id, "deck-7");
        assert_eq!(stored.entries.len(), 1);
        assert_eq!(stored.artifacts.len(), 1);
        Ok(())
    }

    #[test]
    fn noop_recorder_writes_nothing() -> Result<()> {
        assert_eq!(NoopRecorder.finish()?, None);
        Ok(())
    }
}
