use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub const SLIDE_NAME_MAX_CHARS: usize = 40;

/// One outline segment destined to become one slide.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlideSpec {
    pub ordinal: usize,
    pub description: String,
    pub title_hint: Option<String>,
}

impl SlideSpec {
    pub fn new(ordinal: usize, description: impl Into<String>) -> Self {
        Self {
            ordinal,
            description: description.into(),
            title_hint: None,
        }
    }

    pub fn with_title_hint(mut self, title: impl Into<String>) -> Self {
        let title = title.into();
        let trimmed = title.trim();
        self.title_hint = (!trimmed.is_empty()).then(|| trimmed.to_string());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct ColorTheme {
    pub name: String,
    #[serde(default)]
    pub primary: Option<String>,
    #[serde(default)]
    pub secondary: Option<String>,
    #[serde(default)]
    pub accent: Option<String>,
    #[serde(default)]
    pub background: Option<String>,
    #[serde(default)]
    pub text: Option<String>,
}

impl ColorTheme {
    /// Palette rendered as `role #hex` pairs, skipping unset roles.
    pub fn palette_text(&self) -> String {
        [
            ("primary", &self.primary),
            ("secondary", &self.secondary),
            ("accent", &self.accent),
            ("background", &self.background),
            ("text", &self.text),
        ]
        .into_iter()
        .filter_map(|(role, value)| {
            value
                .as_deref()
                .map(str::trim)
                .filter(|value| !value.is_empty())
                .map(|value| format!("{role} {value}"))
        })
        .collect::<Vec<String>>()
        .join(", ")
    }
}

/// Opaque style reference handed to the renderer.
#[derive(Clone, PartialEq, Eq)]
pub struct ReferenceImage {
    pub label: String,
    pub mime_type: String,
    pub bytes: Vec<u8>,
}

impl fmt::Debug for ReferenceImage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReferenceImage")
            .field("label", &self.label)
            .field("mime_type", &self.mime_type)
            .field("bytes", &self.bytes.len())
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct GenerationContext {
    pub audience: Option<String>,
    pub target_slide_count: Option<usize>,
    pub style: Option<String>,
    pub theme: Option<ColorTheme>,
    pub test_mode: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct GenerationTask {
    pub position: usize,
    pub spec: SlideSpec,
    pub prompt: String,
}

impl GenerationTask {
    pub fn display_name(&self) -> String {
        slide_display_name(self.spec.title_hint.as_deref(), &self.prompt)
    }
}

#[derive(Clone, PartialEq, Eq)]
pub enum RawImage {
    Bytes {
        bytes: Vec<u8>,
        mime_type: Option<String>,
    },
    DataUri(String),
}

impl fmt::Debug for RawImage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bytes { bytes, mime_type } => f
                .debug_struct("Bytes")
                .field("len", &bytes.len())
                .field("mime_type", mime_type)
                .finish(),
            Self::DataUri(uri) => f.debug_tuple("DataUri").field(&uri.len()).finish(),
        }
    }
}

/// Outcome of one renderer call, before normalization.
#[derive(Debug, Clone, PartialEq)]
pub enum RenderResult {
    Rendered { ordinal: usize, image: RawImage },
    Failed { ordinal: usize, cause: String },
}

impl RenderResult {
    pub fn ordinal(&self) -> usize {
        match self {
            Self::Rendered { ordinal, .. } | Self::Failed { ordinal, .. } => *ordinal,
        }
    }
}

/// Canonical PNG encoding of a decoded raster.
#[derive(Clone, PartialEq, Eq)]
pub struct NormalizedImage {
    pub png: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

impl fmt::Debug for NormalizedImage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NormalizedImage")
            .field("png", &self.png.len())
            .field("width", &self.width)
            .field("height", &self.height)
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Slide {
    pub id: String,
    pub ordinal: usize,
    pub name: String,
    pub prompt: String,
    pub image: NormalizedImage,
    pub history: Vec<NormalizedImage>,
}

impl Slide {
    pub fn new(task: &GenerationTask, image: NormalizedImage) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            ordinal: task.spec.ordinal,
            name: task.display_name(),
            prompt: task.prompt.clone(),
            history: vec![image.clone()],
            image,
        }
    }
}

/// First non-empty line of the title hint or prompt, heading markers
/// stripped, capped at [`SLIDE_NAME_MAX_CHARS`].
pub fn slide_display_name(title_hint: Option<&str>, prompt: &str) -> String {
    let source = title_hint
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .unwrap_or(prompt);
    let first_line = source
        .lines()
        .map(|line| line.trim().trim_start_matches('#').trim())
        .find(|line| !line.is_empty())
        .unwrap_or("Untitled slide");
    first_line.chars().take(SLIDE_NAME_MAX_CHARS).collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Planning,
    Enhancing,
    Generating,
    Complete,
    Error,
}

impl Phase {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Planning => "planning",
            Self::Enhancing => "enhancing",
            Self::Generating => "generating",
            Self::Complete => "complete",
            Self::Error => "error",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Complete | Self::Error)
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressEvent {
    pub phase: Phase,
    pub message: String,
    pub current: Option<usize>,
    pub total: Option<usize>,
    pub percent: Option<u8>,
}

impl ProgressEvent {
    pub fn phase(phase: Phase, message: impl Into<String>) -> Self {
        Self {
            phase,
            message: message.into(),
            current: None,
            total: None,
            percent: None,
        }
    }

    pub fn counted(phase: Phase, message: impl Into<String>, current: usize, total: usize) -> Self {
        let percent = if total == 0 {
            0
        } else {
            ((current as f64 / total as f64) * 100.0).round().clamp(0.0, 100.0) as u8
        };
        Self {
            phase,
            message: message.into(),
            current: Some(current),
            total: Some(total),
            percent: Some(percent),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TruncationReason {
    #[serde(rename = "test-mode")]
    TestMode,
    #[serde(rename = "plan-limit")]
    PlanLimit,
}

impl TruncationReason {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::TestMode => "test-mode",
            Self::PlanLimit => "plan-limit",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TruncationNotice {
    pub reason: TruncationReason,
    pub original: usize,
    pub kept: usize,
    pub warning: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SlideTiming {
    pub ordinal: usize,
    pub elapsed_s: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct RunMetrics {
    pub elapsed_s: f64,
    pub generating_s: f64,
    pub task_time_s: f64,
    pub parallel_speedup: f64,
    pub slide_timings: Vec<SlideTiming>,
}

impl RunMetrics {
    pub fn from_timings(elapsed_s: f64, generating_s: f64, slide_timings: Vec<SlideTiming>) -> Self {
        let task_time_s: f64 = slide_timings.iter().map(|timing| timing.elapsed_s).sum();
        let parallel_speedup = if generating_s > 0.0 {
            task_time_s / generating_s
        } else {
            0.0
        };
        Self {
            elapsed_s,
            generating_s,
            task_time_s,
            parallel_speedup,
            slide_timings,
        }
    }
}
