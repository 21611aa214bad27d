use std::path::Path;

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::deck::{RunMetrics, TruncationNotice};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeckSummary {
    pub run_id: String,
    pub started_at: String,
    pub finished_at: String,
    pub status: String,
    pub failed_phase: Option<String>,
    pub error: Option<String>,
    pub requested_slides: u64,
    pub total_slides: u64,
    pub completed_slides: u64,
    pub truncation: Option<TruncationNotice>,
    pub metrics: Option<RunMetrics>,
    pub slides: Vec<Map<String, Value>>,
}

pub fn write_summary(
    path: &Path,
    summary: &DeckSummary,
    extra: Option<&Map<String, Value>>,
) -> anyhow::Result<()> {
    let mut payload = match serde_json::to_value(summary)? {
        Value::Object(map) => map,
        _ => Map::new(),
    };
    payload.insert("ts".to_string(), Value::String(now_utc_iso()));
    if let Some(extra) = extra {
        for (key, value) in extra {
            payload.insert(key.clone(), value.clone());
        }
    }

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, serde_json::to_string_pretty(&Value::Object(payload))?)?;
    Ok(())
}

fn now_utc_iso() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, false)
}
