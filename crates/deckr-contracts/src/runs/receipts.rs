use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::deck::ColorTheme;

pub const RECEIPT_SCHEMA_VERSION: u64 = 1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SlideRequest {
    pub ordinal: usize,
    pub description: String,
    pub prompt: String,
    pub reference_image: Option<String>,
    pub theme: Option<ColorTheme>,
    pub model: Option<String>,
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolvedSlide {
    pub provider: String,
    pub model: String,
    pub width: u32,
    pub height: u32,
    pub output_format: String,
    #[serde(default)]
    pub warnings: Vec<String>,
}

/// Everything needed to explain how one slide image came to be, minus the
/// image payloads themselves.
pub fn build_receipt(
    request: &SlideRequest,
    resolved: &ResolvedSlide,
    provider_request: &Map<String, Value>,
    provider_response: &Map<String, Value>,
    image_path: &Path,
    receipt_path: &Path,
    result_metadata: &Map<String, Value>,
) -> Value {
    let mut root = Map::new();
    root.insert(
        "schema_version".to_string(),
        Value::Number(RECEIPT_SCHEMA_VERSION.into()),
    );
    root.insert(
        "request".to_string(),
        sanitize_payload(&serde_json::to_value(request).unwrap_or(Value::Null)),
    );
    root.insert(
        "resolved".to_string(),
        sanitize_payload(&serde_json::to_value(resolved).unwrap_or(Value::Null)),
    );
    root.insert(
        "provider_request".to_string(),
        sanitize_payload(&Value::Object(provider_request.clone())),
    );
    root.insert(
        "provider_response".to_string(),
        sanitize_payload(&Value::Object(provider_response.clone())),
    );

    let mut artifacts = Map::new();
    artifacts.insert(
        "image_path".to_string(),
        Value::String(image_path.to_string_lossy().to_string()),
    );
    artifacts.insert(
        "receipt_path".to_string(),
        Value::String(receipt_path.to_string_lossy().to_string()),
    );
    root.insert("artifacts".to_string(), Value::Object(artifacts));
    root.insert(
        "result_metadata".to_string(),
        sanitize_payload(&Value::Object(result_metadata.clone())),
    );
    Value::Object(root)
}

pub fn write_receipt(path: &Path, payload: &Value) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, serde_json::to_string_pretty(payload)?)?;
    Ok(())
}

fn sanitize_payload(value: &Value) -> Value {
    match value {
        Value::Null => Value::Null,
        Value::Bool(_) | Value::Number(_) | Value::String(_) => value.clone(),
        Value::Array(rows) => Value::Array(rows.iter().map(sanitize_payload).collect()),
        Value::Object(map) => {
            let mut out = Map::new();
            for (key, row) in map {
                let lowered = key.to_ascii_lowercase();
                if matches!(
                    lowered.as_str(),
                    "data" | "inlinedata" | "inline_data" | "image_bytes" | "bytes"
                ) {
                    out.insert(key.clone(), Value::String("<omitted>".to_string()));
                    continue;
                }
                out.insert(key.clone(), sanitize_payload(row));
            }
            Value::Object(out)
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::{json, Map, Value};

    use super::{build_receipt, write_receipt, ResolvedSlide, SlideRequest, RECEIPT_SCHEMA_VERSION};

    #[test]
    fn receipt_builder_writes_expected_shape() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let receipt_path = temp.path().join("receipt-1.json");
        let image_path = temp.path().join("slide-00.png");
        std::fs::write(&image_path, b"png")?;

        let request = SlideRequest {
            ordinal: 0,
            description: "Intro".to_string(),
            prompt: "Intro slide".to_string(),
            reference_image: Some("brand.png".to_string()),
            theme: None,
            model: Some("dryrun-image-1".to_string()),
            metadata: Map::new(),
        };
        let resolved = ResolvedSlide {
            provider: "dryrun".to_string(),
            model: "dryrun-image-1".to_string(),
            width: 16,
            height: 9,
            output_format: "png".to_string(),
            warnings: vec!["note".to_string()],
        };
        let mut provider_request = Map::new();
        provider_request.insert(
            "parts".to_string(),
            json!([{ "inlineData": { "mimeType": "image/png", "data": "AAAA" } }, { "text": "Intro" }]),
        );
        let mut provider_response = Map::new();
        provider_response.insert("status".to_string(), json!("ok"));
        let mut result_metadata = Map::new();
        result_metadata.insert("elapsed_s".to_string(), json!(0.25));

        let payload = build_receipt(
            &request,
            &resolved,
            &provider_request,
            &provider_response,
            &image_path,
            &receipt_path,
            &result_metadata,
        );
        write_receipt(&receipt_path, &payload)?;

        let parsed: Value = serde_json::from_str(&std::fs::read_to_string(&receipt_path)?)?;
        assert_eq!(parsed["schema_version"], json!(RECEIPT_SCHEMA_VERSION));
        assert_eq!(parsed["request"]["prompt"], json!("Intro slide"));
        assert_eq!(parsed["resolved"]["provider"], json!("dryrun"));
        assert_eq!(
            parsed["provider_request"]["parts"][0]["inlineData"],
            json!("<omitted>")
        );
        assert_eq!(parsed["provider_request"]["parts"][1]["text"], json!("Intro"));
        assert_eq!(
            parsed["artifacts"]["image_path"],
            json!(image_path.to_string_lossy())
        );
        assert_eq!(parsed["result_metadata"]["elapsed_s"], json!(0.25));
        Ok(())
    }
}
