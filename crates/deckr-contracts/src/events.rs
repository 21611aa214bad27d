use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use chrono::{SecondsFormat, Utc};
use serde_json::{json, Map, Value};

use crate::deck::ProgressEvent;

pub type EventPayload = Map<String, Value>;

/// Append-only `events.jsonl` log for one deck run.
///
/// Every line carries `type`, `run_id` and `ts`; the caller payload is merged
/// after those keys and wins on collision. Clones share the same file lock so
/// worker threads and the collector can write through one handle.
#[derive(Debug, Clone)]
pub struct EventLog {
    inner: Arc<EventLogInner>,
}

#[derive(Debug)]
struct EventLogInner {
    path: PathBuf,
    run_id: String,
    lock: Mutex<()>,
}

impl EventLog {
    pub fn new(path: impl Into<PathBuf>, run_id: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(EventLogInner {
                path: path.into(),
                run_id: run_id.into(),
                lock: Mutex::new(()),
            }),
        }
    }

    pub fn path(&self) -> &Path {
        &self.inner.path
    }

    pub fn run_id(&self) -> &str {
        &self.inner.run_id
    }

    pub fn emit(&self, event_type: &str, payload: EventPayload) -> anyhow::Result<Value> {
        let mut event = Map::new();
        event.insert("type".to_string(), Value::String(event_type.to_string()));
        event.insert(
            "run_id".to_string(),
            Value::String(self.inner.run_id.clone()),
        );
        event.insert("ts".to_string(), Value::String(now_utc_iso()));
        event.extend(payload);

        if let Some(parent) = self.inner.path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let line = serde_json::to_string(&event)?;
        let _guard = self
            .inner
            .lock
            .lock()
            .map_err(|_| anyhow::anyhow!("event log lock poisoned"))?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.inner.path)?;
        file.write_all(line.as_bytes())?;
        file.write_all(b"\n")?;

        Ok(Value::Object(event))
    }

    /// Mirrors a progress report into the log as `phase_changed` or
    /// `slide_progress` depending on whether it carries counters.
    pub fn emit_progress(&self, progress: &ProgressEvent) -> anyhow::Result<Value> {
        let event_type = if progress.current.is_some() {
            "slide_progress"
        } else {
            "phase_changed"
        };
        let payload = json!({
            "phase": progress.phase.as_str(),
            "message": progress.message,
            "current": progress.current,
            "total": progress.total,
            "percent": progress.percent,
        });
        self.emit(event_type, payload.as_object().cloned().unwrap_or_default())
    }
}

/// Reads an event log back, skipping lines that are not JSON objects.
pub fn read_events(path: &Path) -> anyhow::Result<Vec<Map<String, Value>>> {
    let raw = std::fs::read_to_string(path)?;
    Ok(raw
        .lines()
        .filter_map(|line| serde_json::from_str::<Value>(line).ok())
        .filter_map(|value| value.as_object().cloned())
        .collect())
}

fn now_utc_iso() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, false)
}
