use std::env;
use std::thread;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use deckr_contracts::deck::{GenerationContext, RawImage, ReferenceImage};
use reqwest::blocking::{Client as HttpClient, Response as HttpResponse};
use serde_json::{json, Map, Value};

use crate::enhance::{non_empty, PromptEnhancer};
use crate::error::truncate_text;
use crate::map_object;
use crate::render::{RenderRequest, RenderResponse, SlideRenderer};

const DEFAULT_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";

/// Transport settings for one Gemini call, clamped to sane ranges.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GeminiTransport {
    pub request_timeout_s: f64,
    pub transport_retries: usize,
    pub retry_backoff_s: f64,
}

impl Default for GeminiTransport {
    fn default() -> Self {
        Self {
            request_timeout_s: 90.0,
            transport_retries: 2,
            retry_backoff_s: 1.2,
        }
    }
}

impl GeminiTransport {
    pub fn from_options(options: &Map<String, Value>) -> Self {
        let retries = options
            .get("transport_retries")
            .or_else(|| options.get("request_retries"));
        Self {
            request_timeout_s: value_as_f64(options.get("request_timeout"), 90.0, 15.0, 300.0),
            transport_retries: value_as_f64(retries, 2.0, 0.0, 4.0).round() as usize,
            retry_backoff_s: value_as_f64(options.get("retry_backoff"), 1.2, 0.1, 10.0),
        }
    }
}

/// Shared plumbing for the Gemini `generateContent` endpoint.
#[derive(Debug, Clone)]
pub struct GeminiClient {
    api_base: String,
    api_key: Option<String>,
    http: HttpClient,
    transport: GeminiTransport,
}

impl GeminiClient {
    pub fn from_env() -> Self {
        Self {
            api_base: env::var("GEMINI_API_BASE")
                .ok()
                .map(|value| value.trim().trim_end_matches('/').to_string())
                .filter(|value| !value.is_empty())
                .unwrap_or_else(|| DEFAULT_API_BASE.to_string()),
            api_key: non_empty_env("GEMINI_API_KEY").or_else(|| non_empty_env("GOOGLE_API_KEY")),
            http: HttpClient::new(),
            transport: GeminiTransport::default(),
        }
    }

    pub fn with_transport(mut self, transport: GeminiTransport) -> Self {
        self.transport = transport;
        self
    }

    pub fn transport(&self) -> GeminiTransport {
        self.transport
    }

    pub fn endpoint_for_model(&self, model: &str) -> String {
        let trimmed = model.trim();
        let model_path = if trimmed.starts_with("models/") {
            trimmed.to_string()
        } else {
            format!("models/{trimmed}")
        };
        format!("{}/{}:generateContent", self.api_base, model_path)
    }

    pub fn generate_content(
        &self,
        model: &str,
        payload: &Value,
        warnings: &mut Vec<String>,
    ) -> Result<Value> {
        let Some(api_key) = self.api_key.as_deref() else {
            bail!("GEMINI_API_KEY or GOOGLE_API_KEY not set");
        };
        let endpoint = self.endpoint_for_model(model);
        let response = self.post_with_transport_retries(&endpoint, api_key, payload, warnings)?;
        response_json_or_error(response)
    }

    fn post_with_transport_retries(
        &self,
        endpoint: &str,
        api_key: &str,
        payload: &Value,
        warnings: &mut Vec<String>,
    ) -> Result<HttpResponse> {
        let max_retries = self.transport.transport_retries;
        let mut attempt = 0;
        loop {
            let response = self
                .http
                .post(endpoint)
                .query(&[("key", api_key)])
                .timeout(Duration::from_secs_f64(self.transport.request_timeout_s))
                .json(payload)
                .send();

            match response {
                Ok(ok) => return Ok(ok),
                Err(raw) => {
                    let err = anyhow::Error::new(raw)
                        .context(format!("Gemini request failed ({endpoint})"));
                    if !is_retryable_transport_error(&err) || attempt >= max_retries {
                        return Err(err);
                    }
                    attempt += 1;
                    push_unique_warning(
                        warnings,
                        format!(
                            "Gemini transport retry {attempt}/{max_retries} after transient request failure."
                        ),
                    );
                    let delay_s = self.transport.retry_backoff_s * attempt as f64;
                    thread::sleep(Duration::from_secs_f64(delay_s));
                }
            }
        }
    }
}

pub struct GeminiRenderer {
    client: GeminiClient,
}

impl GeminiRenderer {
    pub fn new(client: GeminiClient) -> Self {
        Self { client }
    }
}

impl SlideRenderer for GeminiRenderer {
    fn name(&self) -> &str {
        "gemini"
    }

    fn render(&self, request: &RenderRequest<'_>) -> Result<RenderResponse> {
        let mut warnings = Vec::new();
        let parts = build_render_parts(request);
        let aspect_ratio = nearest_aspect_ratio(request.size);
        let payload = json!({
            "contents": [{ "role": "user", "parts": parts }],
            "generationConfig": {
                "candidateCount": 1,
                "responseModalities": ["IMAGE"],
                "imageConfig": { "aspectRatio": aspect_ratio },
            },
        });

        let response_payload = self
            .client
            .generate_content(request.model, &payload, &mut warnings)
            .with_context(|| format!("slide {} render failed", request.ordinal + 1))?;
        let Some((bytes, mime_type)) = extract_first_image(&response_payload)? else {
            let reason = finish_reason(&response_payload).unwrap_or("no image returned");
            bail!("Gemini returned no image for slide {} ({reason})", request.ordinal + 1);
        };

        Ok(RenderResponse {
            image: RawImage::Bytes { bytes, mime_type },
            provider_request: map_object(json!({
                "endpoint": self.client.endpoint_for_model(request.model),
                "payload": payload,
            })),
            provider_response: map_object(json!({
                "candidates": response_payload
                    .get("candidates")
                    .and_then(Value::as_array)
                    .map(|rows| rows.len())
                    .unwrap_or(0),
                "usage_metadata": response_payload.get("usageMetadata").cloned().unwrap_or(Value::Null),
            })),
            warnings,
        })
    }
}

pub struct GeminiEnhancer {
    client: GeminiClient,
    model: String,
}

impl GeminiEnhancer {
    pub fn new(client: GeminiClient, model: impl Into<String>) -> Self {
        Self {
            client,
            model: model.into(),
        }
    }
}

impl PromptEnhancer for GeminiEnhancer {
    fn name(&self) -> &str {
        "gemini"
    }

    fn enhance(&self, descriptions: &[String], context: &GenerationContext) -> Result<Vec<String>> {
        let instruction = build_enhance_instruction(descriptions, context);
        let payload = json!({
            "contents": [{ "role": "user", "parts": [{ "text": instruction }] }],
            "generationConfig": { "responseMimeType": "application/json" },
        });
        let mut warnings = Vec::new();
        let response = self
            .client
            .generate_content(&self.model, &payload, &mut warnings)
            .context("prompt enhancement request failed")?;
        let text = extract_text(&response);
        let prompts = parse_prompt_list(&text)?;
        if prompts.len() != descriptions.len() {
            bail!(
                "enhancer returned {} prompts for {} slides",
                prompts.len(),
                descriptions.len()
            );
        }
        Ok(prompts)
    }
}

fn build_render_parts(request: &RenderRequest<'_>) -> Vec<Value> {
    let mut parts = Vec::new();
    if let Some(reference) = request.reference_image {
        parts.push(inline_image_part(reference));
    }
    let mut text = request.prompt.trim().to_string();
    if request.reference_image.is_some() {
        text.push_str("\n\nMatch the visual style, layout language and typography of the attached reference slide.");
    }
    if let Some(theme) = request.theme {
        let palette = theme.palette_text();
        if !palette.is_empty() {
            text.push_str(&format!("\n\nUse the '{}' colour theme: {palette}.", theme.name));
        }
    }
    parts.push(json!({ "text": text }));
    parts
}

fn inline_image_part(reference: &ReferenceImage) -> Value {
    json!({
        "inlineData": {
            "mimeType": reference.mime_type,
            "data": BASE64.encode(&reference.bytes),
        }
    })
}

fn build_enhance_instruction(descriptions: &[String], context: &GenerationContext) -> String {
    let mut out = String::from(
        "Rewrite each slide description below into a detailed prompt for an image model that renders a finished 16:9 presentation slide. \
Keep the slide's headline as the first line of its prompt.\n",
    );
    if let Some(audience) = non_empty(context.audience.as_deref()) {
        out.push_str(&format!("Audience: {audience}\n"));
    }
    if let Some(style) = non_empty(context.style.as_deref()) {
        out.push_str(&format!("Tone and style: {style}\n"));
    }
    if let Some(count) = context.target_slide_count {
        out.push_str(&format!("The full deck has {count} slides.\n"));
    }
    out.push_str(&format!(
        "Return ONLY a JSON array of exactly {} strings, one per slide, in the same order.\n\n",
        descriptions.len()
    ));
    for (idx, description) in descriptions.iter().enumerate() {
        out.push_str(&format!("Slide {}:\n{}\n\n", idx + 1, description.trim()));
    }
    out
}

fn parse_prompt_list(text: &str) -> Result<Vec<String>> {
    let trimmed = strip_code_fence(text.trim());
    let parsed: Value =
        serde_json::from_str(trimmed).context("enhancer response was not valid JSON")?;
    let Some(rows) = parsed.as_array() else {
        bail!("enhancer response was not a JSON array");
    };
    rows.iter()
        .map(|row| {
            row.as_str()
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
                .context("enhancer returned a non-string or empty prompt")
        })
        .collect()
}

fn strip_code_fence(text: &str) -> &str {
    let Some(rest) = text.strip_prefix("```") else {
        return text;
    };
    let body = rest.split_once('\n').map(|(_, body)| body).unwrap_or(rest);
    body.trim_end().strip_suffix("```").unwrap_or(body).trim()
}

fn candidate_parts(response: &Value) -> Vec<Value> {
    response
        .get("candidates")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .filter_map(|candidate| {
            candidate
                .get("content")
                .and_then(|content| content.get("parts"))
                .and_then(Value::as_array)
        })
        .flatten()
        .cloned()
        .collect()
}

fn extract_first_image(response: &Value) -> Result<Option<(Vec<u8>, Option<String>)>> {
    for part in candidate_parts(response) {
        let Some(inline) = part
            .get("inlineData")
            .or_else(|| part.get("inline_data"))
            .and_then(Value::as_object)
        else {
            continue;
        };
        let data = inline.get("data").and_then(Value::as_str).unwrap_or_default();
        if data.is_empty() {
            continue;
        }
        let bytes = BASE64
            .decode(data.as_bytes())
            .context("Gemini image base64 decode failed")?;
        let mime_type = inline
            .get("mimeType")
            .or_else(|| inline.get("mime_type"))
            .and_then(Value::as_str)
            .map(str::to_string);
        return Ok(Some((bytes, mime_type)));
    }
    Ok(None)
}

fn extract_text(response: &Value) -> String {
    candidate_parts(response)
        .iter()
        .filter(|part| !part.get("thought").and_then(Value::as_bool).unwrap_or(false))
        .filter_map(|part| part.get("text").and_then(Value::as_str))
        .collect::<Vec<&str>>()
        .join("")
}

fn finish_reason(response: &Value) -> Option<&str> {
    response
        .get("promptFeedback")
        .and_then(|feedback| feedback.get("blockReason"))
        .or_else(|| {
            response
                .get("candidates")
                .and_then(Value::as_array)
                .and_then(|rows| rows.first())
                .and_then(|candidate| candidate.get("finishReason"))
        })
        .and_then(Value::as_str)
}

fn nearest_aspect_ratio(size: (u32, u32)) -> &'static str {
    let candidates = [
        ("1:1", 1.0f64),
        ("4:3", 4.0 / 3.0),
        ("3:2", 3.0 / 2.0),
        ("16:9", 16.0 / 9.0),
        ("21:9", 21.0 / 9.0),
        ("3:4", 3.0 / 4.0),
        ("9:16", 9.0 / 16.0),
    ];
    let (width, height) = size;
    if width == 0 || height == 0 {
        return "16:9";
    }
    let target = width as f64 / height as f64;
    candidates
        .into_iter()
        .min_by(|(_, left), (_, right)| {
            (left - target)
                .abs()
                .partial_cmp(&(right - target).abs())
                .unwrap_or(std::cmp::Ordering::Equal)
        })
        .map(|(key, _)| key)
        .unwrap_or("16:9")
}

fn response_json_or_error(response: HttpResponse) -> Result<Value> {
    let status = response.status();
    let code = status.as_u16();
    let body = response
        .text()
        .context("Gemini response body read failed")?;
    if !status.is_success() {
        bail!("Gemini request failed ({code}): {}", truncate_text(&body, 512));
    }
    serde_json::from_str(&body).context("Gemini returned invalid JSON payload")
}

fn is_retryable_transport_error(err: &anyhow::Error) -> bool {
    err.chain().any(|cause| {
        cause
            .downcast_ref::<reqwest::Error>()
            .map(|reqwest_err| {
                reqwest_err.is_timeout() || reqwest_err.is_connect() || reqwest_err.is_request()
            })
            .unwrap_or(false)
    })
}

fn push_unique_warning(warnings: &mut Vec<String>, message: String) {
    if message.trim().is_empty() || warnings.iter().any(|existing| existing == &message) {
        return;
    }
    warnings.push(message);
}

fn value_as_f64(value: Option<&Value>, default: f64, min: f64, max: f64) -> f64 {
    let parsed = match value {
        Some(Value::Number(number)) => number.as_f64(),
        Some(Value::String(raw)) => raw.trim().parse::<f64>().ok(),
        _ => None,
    };
    parsed
        .filter(|value| value.is_finite())
        .unwrap_or(default)
        .clamp(min, max)
}

fn non_empty_env(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

#[cfg(test)]
mod tests {
    use deckr_contracts::deck::ColorTheme;

    use super::*;

    #[test]
    fn transport_settings_have_defaults_and_clamps() {
        assert_eq!(
            GeminiTransport::from_options(&Map::new()),
            GeminiTransport::default()
        );
        let options = map_object(json!({
            "request_timeout": 2,
            "request_retries": "9",
            "retry_backoff": 0.5,
        }));
        let transport = GeminiTransport::from_options(&options);
        assert_eq!(transport.request_timeout_s, 15.0);
        assert_eq!(transport.transport_retries, 4);
        assert_eq!(transport.retry_backoff_s, 0.5);

        let client = GeminiClient::from_env().with_transport(transport);
        assert_eq!(client.transport(), transport);
    }

    #[test]
    fn render_parts_put_reference_before_prompt() {
        let reference = ReferenceImage {
            label: "brand.png".to_string(),
            mime_type: "image/png".to_string(),
            bytes: vec![1, 2, 3],
        };
        let theme = ColorTheme {
            name: "ocean".to_string(),
            primary: Some("#003366".to_string()),
            ..ColorTheme::default()
        };
        let request = RenderRequest {
            ordinal: 0,
            prompt: "Intro",
            reference_image: Some(&reference),
            theme: Some(&theme),
            model: "gemini-2.5-flash-image",
            size: (1920, 1080),
        };
        let parts = build_render_parts(&request);
        assert_eq!(parts.len(), 2);
        assert_eq!(parts[0]["inlineData"]["mimeType"], json!("image/png"));
        assert_eq!(parts[0]["inlineData"]["data"], json!(BASE64.encode([1u8, 2, 3])));
        let text = parts[1]["text"].as_str().unwrap_or_default();
        assert!(text.starts_with("Intro"));
        assert!(text.contains("reference slide"));
        assert!(text.contains("primary #003366"));
    }

    #[test]
    fn endpoint_prefixes_model_path() {
        let client = GeminiClient::from_env();
        assert!(client
            .endpoint_for_model("gemini-2.5-flash-image")
            .ends_with("/models/gemini-2.5-flash-image:generateContent"));
        assert!(client
            .endpoint_for_model("models/gemini-2.5-pro")
            .ends_with("/models/gemini-2.5-pro:generateContent"));
    }

    #[test]
    fn image_is_extracted_from_inline_data() -> Result<()> {
        let response = json!({
            "candidates": [{
                "content": { "parts": [
                    { "text": "here you go" },
                    { "inlineData": { "mimeType": "image/png", "data": BASE64.encode(b"png-bytes") } }
                ]}
            }]
        });
        let extracted = extract_first_image(&response)?;
        assert_eq!(
            extracted,
            Some((b"png-bytes".to_vec(), Some("image/png".to_string())))
        );
        assert_eq!(extract_first_image(&json!({ "candidates": [] }))?, None);
        Ok(())
    }

    #[test]
    fn block_reason_is_surfaced() {
        let response = json!({ "promptFeedback": { "blockReason": "SAFETY" } });
        assert_eq!(finish_reason(&response), Some("SAFETY"));
    }

    #[test]
    fn prompt_list_tolerates_code_fences() -> Result<()> {
        let prompts = parse_prompt_list("```json\n[\"Intro slide\", \" Problem slide \"]\n```")?;
        assert_eq!(prompts, vec!["Intro slide", "Problem slide"]);
        assert!(parse_prompt_list("{\"prompts\": []}").is_err());
        assert!(parse_prompt_list("[\"ok\", 3]").is_err());
        Ok(())
    }

    #[test]
    fn enhance_instruction_lists_slides_in_order() {
        let context = GenerationContext {
            audience: Some("CTOs".to_string()),
            target_slide_count: Some(2),
            ..GenerationContext::default()
        };
        let text = build_enhance_instruction(&["Intro".to_string(), "Problem".to_string()], &context);
        let intro = text.find("Slide 1:\nIntro").unwrap_or(usize::MAX);
        let problem = text.find("Slide 2:\nProblem").unwrap_or(0);
        assert!(intro < problem);
        assert!(text.contains("exactly 2 strings"));
        assert!(text.contains("Audience: CTOs"));
    }

    #[test]
    fn aspect_ratio_snaps_to_nearest() {
        assert_eq!(nearest_aspect_ratio((1920, 1080)), "16:9");
        assert_eq!(nearest_aspect_ratio((1024, 1024)), "1:1");
        assert_eq!(nearest_aspect_ratio((1000, 760)), "4:3");
        assert_eq!(nearest_aspect_ratio((0, 10)), "16:9");
    }
}
