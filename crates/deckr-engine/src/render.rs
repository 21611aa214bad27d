use std::collections::BTreeMap;
use std::io::Cursor;

use anyhow::{Context, Result};
use deckr_contracts::deck::{ColorTheme, RawImage, ReferenceImage};
use image::codecs::jpeg::JpegEncoder;
use image::{Rgb, RgbImage};
use serde_json::{json, Map, Value};
use sha2::{Digest, Sha256};

use crate::map_object;

pub const DEFAULT_SLIDE_SIZE: (u32, u32) = (1920, 1080);

#[derive(Debug, Clone)]
pub struct RenderRequest<'a> {
    pub ordinal: usize,
    pub prompt: &'a str,
    pub reference_image: Option<&'a ReferenceImage>,
    pub theme: Option<&'a ColorTheme>,
    pub model: &'a str,
    pub size: (u32, u32),
}

#[derive(Debug, Clone)]
pub struct RenderResponse {
    pub image: RawImage,
    pub provider_request: Map<String, Value>,
    pub provider_response: Map<String, Value>,
    pub warnings: Vec<String>,
}

impl RenderResponse {
    pub fn image_only(image: RawImage) -> Self {
        Self {
            image,
            provider_request: Map::new(),
            provider_response: Map::new(),
            warnings: Vec::new(),
        }
    }
}

/// Single-slide image generation. Any error is a task failure; timeouts and
/// retries are the implementation's business.
pub trait SlideRenderer: Send + Sync {
    fn name(&self) -> &str;
    fn render(&self, request: &RenderRequest<'_>) -> Result<RenderResponse>;
}

#[derive(Default)]
pub struct RendererRegistry {
    renderers: BTreeMap<String, Box<dyn SlideRenderer>>,
}

impl RendererRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<R: SlideRenderer + 'static>(&mut self, renderer: R) {
        self.renderers
            .insert(renderer.name().to_string(), Box::new(renderer));
    }

    pub fn get(&self, name: &str) -> Option<&dyn SlideRenderer> {
        self.renderers.get(name).map(|renderer| renderer.as_ref())
    }

    pub fn names(&self) -> Vec<String> {
        self.renderers.keys().cloned().collect()
    }
}

/// Offline renderer: a solid colour derived from the prompt, encoded as JPEG
/// so the normalizer has something to convert.
#[derive(Debug, Clone, Default)]
pub struct DryrunRenderer {
    size: Option<(u32, u32)>,
}

impl DryrunRenderer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_size(width: u32, height: u32) -> Self {
        Self {
            size: Some((width.max(1), height.max(1))),
        }
    }
}

impl SlideRenderer for DryrunRenderer {
    fn name(&self) -> &str {
        "dryrun"
    }

    fn render(&self, request: &RenderRequest<'_>) -> Result<RenderResponse> {
        let (width, height) = self.size.unwrap_or(request.size);
        let theme_key = request
            .theme
            .map(ColorTheme::palette_text)
            .unwrap_or_default();
        let (r, g, b) = color_from_prompt(request.prompt, &theme_key);
        let mut canvas = RgbImage::new(width.max(1), height.max(1));
        for pixel in canvas.pixels_mut() {
            *pixel = Rgb([r, g, b]);
        }
        let mut bytes = Vec::new();
        JpegEncoder::new_with_quality(Cursor::new(&mut bytes), 85)
            .encode_image(&canvas)
            .context("dryrun slide encode failed")?;

        Ok(RenderResponse {
            image: RawImage::Bytes {
                bytes,
                mime_type: Some("image/jpeg".to_string()),
            },
            provider_request: map_object(json!({
                "endpoint": "dryrun-native",
                "payload": {
                    "ordinal": request.ordinal,
                    "prompt": request.prompt,
                    "model": request.model,
                    "width": width,
                    "height": height,
                    "reference_image": request.reference_image.map(|reference| reference.label.clone()),
                    "theme": request.theme.map(|theme| theme.name.clone()),
                }
            })),
            provider_response: map_object(json!({
                "status": "ok",
                "color": format!("#{r:02x}{g:02x}{b:02x}"),
            })),
            warnings: Vec::new(),
        })
    }
}

fn color_from_prompt(prompt: &str, theme_key: &str) -> (u8, u8, u8) {
    let mut hasher = Sha256::new();
    hasher.update(prompt.as_bytes());
    hasher.update(theme_key.as_bytes());
    let digest = hasher.finalize();
    (digest[0], digest[1], digest[2])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::normalize::normalize_image;

    fn request<'a>(prompt: &'a str) -> RenderRequest<'a> {
        RenderRequest {
            ordinal: 0,
            prompt,
            reference_image: None,
            theme: None,
            model: "dryrun-image-1",
            size: (32, 18),
        }
    }

    #[test]
    fn dryrun_output_normalizes_to_request_size() -> Result<()> {
        let response = DryrunRenderer::new().render(&request("Intro"))?;
        let normalized = normalize_image(&response.image)?;
        assert_eq!((normalized.width, normalized.height), (32, 18));
        assert_eq!(response.provider_response["status"], json!("ok"));
        Ok(())
    }

    #[test]
    fn dryrun_colour_is_stable_per_prompt() -> Result<()> {
        let renderer = DryrunRenderer::with_size(1, 1);
        let first = renderer.render(&request("Intro"))?;
        let again = renderer.render(&request("Intro"))?;
        let other = renderer.render(&request("Problem"))?;
        assert_eq!(
            first.provider_response["color"],
            again.provider_response["color"]
        );
        assert_ne!(
            first.provider_response["color"],
            other.provider_response["color"]
        );
        Ok(())
    }

    #[test]
    fn registry_lists_registered_renderers() {
        let mut registry = RendererRegistry::new();
        registry.register(DryrunRenderer::new());
        assert_eq!(registry.names(), vec!["dryrun".to_string()]);
        assert!(registry.get("dryrun").is_some());
        assert!(registry.get("gemini").is_none());
    }
}
