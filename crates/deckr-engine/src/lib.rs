pub mod caps;
pub mod config;
pub mod enhance;
pub mod error;
pub mod normalize;
pub mod outline;
pub mod pipeline;
pub mod progress;
pub mod providers;
pub mod recorder;
pub mod render;
pub mod scheduler;
pub mod style;

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, bail, Context, Result};
use deckr_contracts::debug::DebugArtifact;
use deckr_contracts::deck::{GenerationContext, Phase, RunMetrics, Slide, TruncationNotice};
use deckr_contracts::events::EventLog;
use deckr_contracts::models::{Capability, ModelSelector, ModelSpec};
use deckr_contracts::runs::receipts::{build_receipt, write_receipt, ResolvedSlide, SlideRequest};
use deckr_contracts::runs::summary::{write_summary, DeckSummary};
use serde_json::{json, Map, Value};
use sha2::{Digest, Sha256};

use crate::config::DeckConfig;
use crate::enhance::{DryrunEnhancer, PassthroughEnhancer, PromptEnhancer};
use crate::error::RunFailure;
use crate::pipeline::{DeckOutcome, DeckPipeline, OutlineInput};
use crate::progress::{FanoutSink, ProgressSink, RunTracker};
use crate::providers::{default_renderers, enhancer_for_model, GeminiClient, GeminiTransport};
use crate::recorder::{DebugRecorder, NoopRecorder, SessionRecorder};
use crate::render::{RendererRegistry, SlideRenderer};
use crate::style::{StyleLibrary, StyleSelection};

pub use crate::error::DeckError;
pub use crate::outline::OutlineFormat;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EnhancerMode {
    #[default]
    Passthrough,
    Dryrun,
    /// Whatever the selected text model's provider offers.
    Model,
}

impl EnhancerMode {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "passthrough" | "none" => Some(Self::Passthrough),
            "dryrun" => Some(Self::Dryrun),
            "model" => Some(Self::Model),
            _ => None,
        }
    }
}

/// A finished deck plus where its files landed.
#[derive(Debug, Clone)]
pub struct DeckRun {
    pub slides: Vec<Slide>,
    pub metrics: RunMetrics,
    pub truncation: Option<TruncationNotice>,
    pub artifacts: Vec<Map<String, Value>>,
    pub image_model: String,
    pub fallback_reason: Option<String>,
}

#[derive(Debug, Clone, Default)]
struct RunRecord {
    status: String,
    failed_phase: Option<String>,
    error: Option<String>,
    requested_slides: u64,
    total_slides: u64,
    completed_slides: u64,
    truncation: Option<TruncationNotice>,
    metrics: Option<RunMetrics>,
    slides: Vec<Map<String, Value>>,
}

/// Owns one run directory: event log, slide images, receipts, summary and
/// the optional debug session.
pub struct DeckEngine {
    run_dir: PathBuf,
    run_id: String,
    events: EventLog,
    summary_path: PathBuf,
    started_at: String,
    config: DeckConfig,
    model_selector: ModelSelector,
    image_model: Option<String>,
    text_model: Option<String>,
    enhancer_mode: EnhancerMode,
    outline_format: OutlineFormat,
    client: GeminiClient,
    renderers: RendererRegistry,
    style: StyleSelection,
    style_library: Option<Box<dyn StyleLibrary>>,
    debug: bool,
    last_fallback_reason: Option<String>,
    last_run: Option<RunRecord>,
}

impl DeckEngine {
    pub fn new(
        run_dir: impl Into<PathBuf>,
        events_path: impl Into<PathBuf>,
        config: DeckConfig,
    ) -> Result<Self> {
        config.validate()?;
        let run_dir = run_dir.into();
        fs::create_dir_all(&run_dir)?;
        let run_id = run_dir
            .file_name()
            .and_then(|value| value.to_str())
            .filter(|value| !value.is_empty())
            .unwrap_or("deck-rs")
            .to_string();
        let events = EventLog::new(events_path.into(), run_id.clone());
        let summary_path = run_dir.join("summary.json");
        let started_at = now_utc_iso();
        let client = GeminiClient::from_env()
            .with_transport(GeminiTransport::from_options(&config.provider_options));
        let transport = client.transport();

        events.emit(
            "run_started",
            map_object(json!({
                "out_dir": run_dir.to_string_lossy().to_string(),
                "batch_size": config.batch_size,
                "plan_cap": config.plan_cap,
                "test_mode_cap": config.test_mode_cap,
                "provider_transport": {
                    "request_timeout_s": transport.request_timeout_s,
                    "transport_retries": transport.transport_retries,
                    "retry_backoff_s": transport.retry_backoff_s,
                },
            })),
        )?;

        Ok(Self {
            renderers: default_renderers(&client),
            run_dir,
            run_id,
            events,
            summary_path,
            started_at,
            config,
            model_selector: ModelSelector::new(None),
            image_model: None,
            text_model: None,
            enhancer_mode: EnhancerMode::default(),
            outline_format: OutlineFormat::Auto,
            client,
            style: StyleSelection::None,
            style_library: None,
            debug: false,
            last_fallback_reason: None,
            last_run: None,
        })
    }

    pub fn run_dir(&self) -> &Path {
        &self.run_dir
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn config(&self) -> &DeckConfig {
        &self.config
    }

    pub fn set_image_model(&mut self, model: Option<String>) {
        self.image_model = model;
    }

    pub fn set_text_model(&mut self, model: Option<String>) {
        self.text_model = model;
    }

    pub fn set_enhancer_mode(&mut self, mode: EnhancerMode) {
        self.enhancer_mode = mode;
    }

    pub fn set_outline_format(&mut self, format: OutlineFormat) {
        self.outline_format = format;
    }

    pub fn set_style(&mut self, style: StyleSelection, library: Option<Box<dyn StyleLibrary>>) {
        self.style = style;
        self.style_library = library;
    }

    pub fn set_debug(&mut self, enabled: bool) {
        self.debug = enabled;
    }

    /// Replaces the renderer registered under the same name.
    pub fn register_renderer<R: SlideRenderer + 'static>(&mut self, renderer: R) {
        self.renderers.register(renderer);
    }

    pub fn last_fallback_reason(&self) -> Option<&str> {
        self.last_fallback_reason.as_deref()
    }

    /// Runs the full pipeline for one outline. Progress goes to `sink` and the
    /// event log; a failed run comes back as an error wrapping [`RunFailure`].
    pub fn generate(
        &mut self,
        outline: &str,
        context: &GenerationContext,
        sink: &dyn ProgressSink,
    ) -> Result<DeckRun> {
        let (image_spec, enhancer, fallback_reason) = match self.select_models() {
            Ok(selected) => selected,
            Err(err) => {
                self.last_run = Some(RunRecord {
                    status: "failed".to_string(),
                    error: Some(format!("{err:#}")),
                    ..RunRecord::default()
                });
                return Err(err);
            }
        };
        self.last_fallback_reason = fallback_reason.clone();

        let (record, result) = self.execute(
            outline,
            context,
            sink,
            &image_spec,
            enhancer.as_ref(),
            fallback_reason,
        );
        self.last_run = Some(record);
        result
    }

    fn select_models(&self) -> Result<(ModelSpec, Box<dyn PromptEnhancer>, Option<String>)> {
        let image_selection = self
            .model_selector
            .select(self.image_model.as_deref(), Capability::Image)
            .map_err(|err| anyhow!(err))?;
        let mut fallback_reason = image_selection.fallback_reason;
        let enhancer = self.resolve_enhancer(&mut fallback_reason)?;
        Ok((image_selection.model, enhancer, fallback_reason))
    }

    fn resolve_enhancer(
        &self,
        fallback_reason: &mut Option<String>,
    ) -> Result<Box<dyn PromptEnhancer>> {
        Ok(match self.enhancer_mode {
            EnhancerMode::Passthrough => Box::new(PassthroughEnhancer),
            EnhancerMode::Dryrun => Box::new(DryrunEnhancer),
            EnhancerMode::Model => {
                let selection = self
                    .model_selector
                    .select(self.text_model.as_deref(), Capability::Text)
                    .map_err(|err| anyhow!(err))?;
                if let Some(reason) = selection.fallback_reason {
                    *fallback_reason = append_fallback_reason(fallback_reason.take(), reason);
                }
                enhancer_for_model(&selection.model, &self.client)
            }
        })
    }

    fn execute(
        &self,
        outline: &str,
        context: &GenerationContext,
        sink: &dyn ProgressSink,
        image_spec: &ModelSpec,
        enhancer: &dyn PromptEnhancer,
        fallback_reason: Option<String>,
    ) -> (RunRecord, Result<DeckRun>) {
        let mut record = RunRecord {
            status: "failed".to_string(),
            ..RunRecord::default()
        };
        let Some(renderer) = self.renderers.get(&image_spec.provider) else {
            let message = format!("no renderer registered for provider '{}'", image_spec.provider);
            record.error = Some(message.clone());
            return (record, Err(anyhow!(message)));
        };

        let recorder: Box<dyn DebugRecorder> = if self.debug {
            Box::new(SessionRecorder::new(self.run_dir.join("debug"), &self.run_id))
        } else {
            Box::new(NoopRecorder)
        };
        let fanout = FanoutSink::new(vec![&self.events as &dyn ProgressSink, sink]);
        let tracker = RunTracker::new(&fanout);
        let pipeline = DeckPipeline::new(&self.config, enhancer, renderer)
            .with_recorder(recorder.as_ref())
            .with_style(self.style.clone(), self.style_library.as_deref())
            .with_format(self.outline_format)
            .with_image_model(image_spec.name.clone());

        let plan = match pipeline.plan(OutlineInput::Text(outline), context, &tracker) {
            Ok(plan) => plan,
            Err(failure) => {
                let result = self.fail_run(&mut record, failure, recorder.as_ref());
                return (record, result);
            }
        };
        record.requested_slides = plan
            .truncation
            .as_ref()
            .map(|notice| notice.original)
            .unwrap_or(plan.specs.len()) as u64;
        record.total_slides = plan.specs.len() as u64;
        record.truncation = plan.truncation.clone();
        let descriptions: Vec<String> = plan.specs.iter().map(|spec| spec.description.clone()).collect();
        let reference_label = plan
            .reference_image
            .as_ref()
            .map(|reference| reference.label.clone());

        if let Err(err) = self.emit_plan(&plan, image_spec, enhancer, fallback_reason.as_deref()) {
            return (record, Err(err));
        }

        let outcome = match pipeline.generate(plan, context, &tracker) {
            Ok(outcome) => outcome,
            Err(failure) => {
                let result = self.fail_run(&mut record, failure, recorder.as_ref());
                return (record, result);
            }
        };

        let artifacts = match self.write_slides(
            &outcome,
            &descriptions,
            reference_label.as_deref(),
            context,
            image_spec,
            recorder.as_ref(),
        ) {
            Ok(artifacts) => artifacts,
            Err(err) => {
                let failure = pipeline.fail(
                    &tracker,
                    Phase::Generating,
                    outcome.slides.len(),
                    DeckError::Output(format!("{err:#}")),
                );
                let result = self.fail_run(&mut record, failure, recorder.as_ref());
                return (record, result);
            }
        };

        let debug_path = match recorder.finish() {
            Ok(path) => path,
            Err(err) => {
                eprintln!("deckr: failed to write debug session: {err:#}");
                None
            }
        };
        record.status = "succeeded".to_string();
        record.completed_slides = outcome.slides.len() as u64;
        record.metrics = Some(outcome.metrics.clone());
        record.slides = artifacts.clone();
        pipeline.complete(&tracker, &outcome);

        if let Err(err) = self.events.emit(
            "deck_complete",
            map_object(json!({
                "total_slides": outcome.slides.len(),
                "elapsed_s": outcome.metrics.elapsed_s,
                "generating_s": outcome.metrics.generating_s,
                "parallel_speedup": outcome.metrics.parallel_speedup,
                "debug_path": debug_path.map(|path| path.to_string_lossy().to_string()),
            })),
        ) {
            return (record, Err(err));
        }

        let DeckOutcome {
            slides,
            metrics,
            truncation,
            ..
        } = outcome;
        (
            record,
            Ok(DeckRun {
                slides,
                metrics,
                truncation,
                artifacts,
                image_model: image_spec.name.clone(),
                fallback_reason,
            }),
        )
    }

    fn emit_plan(
        &self,
        plan: &pipeline::DeckPlan,
        image_spec: &ModelSpec,
        enhancer: &dyn PromptEnhancer,
        fallback_reason: Option<&str>,
    ) -> Result<()> {
        let slides: Vec<Value> = plan
            .specs
            .iter()
            .map(|spec| {
                json!({
                    "ordinal": spec.ordinal,
                    "name": deckr_contracts::deck::slide_display_name(
                        spec.title_hint.as_deref(),
                        &spec.description,
                    ),
                })
            })
            .collect();
        self.events.emit(
            "plan_preview",
            map_object(json!({
                "slides": slides,
                "total": plan.specs.len(),
                "batch_size": self.config.batch_size,
                "model": image_spec.name,
                "provider": image_spec.provider,
                "enhancer": enhancer.name(),
                "reference_image": plan.reference_image.as_ref().map(|reference| reference.label.clone()),
                "fallback_reason": fallback_reason,
            })),
        )?;
        if let Some(notice) = plan.truncation.as_ref() {
            self.events.emit(
                "truncation_notice",
                map_object(json!({
                    "reason": notice.reason.as_str(),
                    "original": notice.original,
                    "kept": notice.kept,
                    "warning": notice.warning,
                })),
            )?;
        }
        Ok(())
    }

    fn write_slides(
        &self,
        outcome: &DeckOutcome,
        descriptions: &[String],
        reference_label: Option<&str>,
        context: &GenerationContext,
        image_spec: &ModelSpec,
        recorder: &dyn DebugRecorder,
    ) -> Result<Vec<Map<String, Value>>> {
        let mut artifacts = Vec::with_capacity(outcome.slides.len());
        for (position, (slide, render)) in outcome.slides.iter().zip(&outcome.records).enumerate() {
            let short_id = slide.id.split('-').next().unwrap_or("slide");
            let image_path = self
                .run_dir
                .join(format!("slide-{:02}-{short_id}.png", slide.ordinal + 1));
            fs::write(&image_path, &slide.image.png)
                .with_context(|| format!("failed writing {}", image_path.display()))?;
            let receipt_path = self.run_dir.join(format!("receipt-{}.json", slide.id));

            let request = SlideRequest {
                ordinal: slide.ordinal,
                description: descriptions.get(position).cloned().unwrap_or_default(),
                prompt: slide.prompt.clone(),
                reference_image: reference_label.map(str::to_string),
                theme: context.theme.clone(),
                model: Some(image_spec.name.clone()),
                metadata: map_object(json!({
                    "audience": context.audience,
                    "style": context.style,
                    "test_mode": context.test_mode,
                })),
            };
            let resolved = ResolvedSlide {
                provider: image_spec.provider.clone(),
                model: image_spec.name.clone(),
                width: slide.image.width,
                height: slide.image.height,
                output_format: "png".to_string(),
                warnings: render.warnings.clone(),
            };
            let result_metadata = map_object(json!({
                "name": slide.name,
                "elapsed_s": render.elapsed_s,
                "image_sha256": sha256_hex(&slide.image.png),
            }));
            let receipt = build_receipt(
                &request,
                &resolved,
                &render.provider_request,
                &render.provider_response,
                &image_path,
                &receipt_path,
                &result_metadata,
            );
            write_receipt(&receipt_path, &receipt)?;

            let artifact = map_object(json!({
                "slide_id": slide.id,
                "ordinal": slide.ordinal,
                "name": slide.name,
                "image_path": image_path.to_string_lossy().to_string(),
                "receipt_path": receipt_path.to_string_lossy().to_string(),
                "width": slide.image.width,
                "height": slide.image.height,
                "elapsed_s": render.elapsed_s,
            }));
            self.events.emit("slide_rendered", artifact.clone())?;
            recorder.add_artifact(DebugArtifact {
                slide_id: slide.id.clone(),
                ordinal: slide.ordinal,
                name: slide.name.clone(),
                image_path: Some(image_path.to_string_lossy().to_string()),
            });
            artifacts.push(artifact);
        }
        Ok(artifacts)
    }

    fn fail_run(
        &self,
        record: &mut RunRecord,
        failure: RunFailure,
        recorder: &dyn DebugRecorder,
    ) -> Result<DeckRun> {
        record.status = "failed".to_string();
        record.failed_phase = Some(failure.phase.as_str().to_string());
        record.error = Some(failure.error.to_string());
        record.completed_slides = failure.completed as u64;
        if let Err(err) = recorder.finish() {
            eprintln!("deckr: failed to write debug session: {err:#}");
        }
        self.events.emit(
            "generation_failed",
            map_object(json!({
                "phase": failure.phase.as_str(),
                "completed": failure.completed,
                "ordinal": failure.failed_ordinal(),
                "error": failure.error.to_string(),
            })),
        )?;
        Err(anyhow::Error::new(failure))
    }

    /// Writes `summary.json` for the last run and closes the event log with
    /// `run_finished`.
    pub fn finish(&mut self) -> Result<()> {
        let Some(record) = self.last_run.clone() else {
            bail!("finish called before any deck was generated");
        };
        let summary = DeckSummary {
            run_id: self.run_id.clone(),
            started_at: self.started_at.clone(),
            finished_at: now_utc_iso(),
            status: record.status,
            failed_phase: record.failed_phase,
            error: record.error,
            requested_slides: record.requested_slides,
            total_slides: record.total_slides,
            completed_slides: record.completed_slides,
            truncation: record.truncation,
            metrics: record.metrics,
            slides: record.slides,
        };
        write_summary(&self.summary_path, &summary, None)?;
        self.events.emit(
            "run_finished",
            map_object(json!({
                "summary_path": self.summary_path.to_string_lossy().to_string(),
            })),
        )?;
        Ok(())
    }
}

fn append_fallback_reason(existing: Option<String>, reason: String) -> Option<String> {
    match existing {
        Some(existing) if !existing.trim().is_empty() => Some(format!("{existing} {reason}")),
        _ => Some(reason),
    }
}

fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

pub(crate) fn map_object(value: Value) -> Map<String, Value> {
    value.as_object().cloned().unwrap_or_default()
}

pub(crate) fn now_utc_iso() -> String {
    chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Micros, false)
}
