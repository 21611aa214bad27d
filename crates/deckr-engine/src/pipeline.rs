use std::time::Instant;

use anyhow::{bail, Result};
use deckr_contracts::deck::{
    GenerationContext, GenerationTask, Phase, ReferenceImage, RenderResult, RunMetrics, Slide,
    SlideSpec, SlideTiming, TruncationNotice,
};
use serde_json::{Map, Value};

use crate::caps::{enforce_session_cap, CapOutcome};
use crate::config::DeckConfig;
use crate::enhance::PromptEnhancer;
use crate::error::{error_chain_text, DeckError, RunFailure};
use crate::normalize::normalize_image;
use crate::outline::{normalize_outline, OutlineFormat};
use crate::progress::RunTracker;
use crate::recorder::{DebugRecorder, NoopRecorder};
use crate::render::{RenderRequest, SlideRenderer, DEFAULT_SLIDE_SIZE};
use crate::scheduler::BatchScheduler;
use crate::style::{StyleLibrary, StyleSelection};

#[derive(Debug, Clone, PartialEq)]
pub enum OutlineInput<'a> {
    Text(&'a str),
    Specs(Vec<SlideSpec>),
}

/// Result of the planning phase: the capped slide list plus the style
/// reference every render will use.
#[derive(Debug, Clone, PartialEq)]
pub struct DeckPlan {
    pub specs: Vec<SlideSpec>,
    pub truncation: Option<TruncationNotice>,
    pub reference_image: Option<ReferenceImage>,
}

/// Boundary metadata for one rendered slide, kept for receipts.
#[derive(Debug, Clone)]
pub struct RenderRecord {
    pub ordinal: usize,
    pub elapsed_s: f64,
    pub provider_request: Map<String, Value>,
    pub provider_response: Map<String, Value>,
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct DeckOutcome {
    pub slides: Vec<Slide>,
    pub records: Vec<RenderRecord>,
    pub metrics: RunMetrics,
    pub truncation: Option<TruncationNotice>,
}

pub struct DeckPipeline<'a> {
    config: &'a DeckConfig,
    enhancer: &'a dyn PromptEnhancer,
    renderer: &'a dyn SlideRenderer,
    recorder: &'a dyn DebugRecorder,
    style: StyleSelection,
    style_library: Option<&'a dyn StyleLibrary>,
    format: OutlineFormat,
    image_model: String,
}

impl<'a> DeckPipeline<'a> {
    pub fn new(
        config: &'a DeckConfig,
        enhancer: &'a dyn PromptEnhancer,
        renderer: &'a dyn SlideRenderer,
    ) -> Self {
        Self {
            config,
            enhancer,
            renderer,
            recorder: &NoopRecorder,
            style: StyleSelection::None,
            style_library: None,
            format: OutlineFormat::Auto,
            image_model: String::new(),
        }
    }

    pub fn with_recorder(mut self, recorder: &'a dyn DebugRecorder) -> Self {
        self.recorder = recorder;
        self
    }

    pub fn with_style(
        mut self,
        style: StyleSelection,
        library: Option<&'a dyn StyleLibrary>,
    ) -> Self {
        self.style = style;
        self.style_library = library;
        self
    }

    pub fn with_format(mut self, format: OutlineFormat) -> Self {
        self.format = format;
        self
    }

    pub fn with_image_model(mut self, model: impl Into<String>) -> Self {
        self.image_model = model.into();
        self
    }

    /// Planning through completion in one call.
    pub fn run(
        &self,
        input: OutlineInput<'_>,
        context: &GenerationContext,
        tracker: &RunTracker<'_>,
    ) -> Result<DeckOutcome, RunFailure> {
        let plan = self.plan(input, context, tracker)?;
        let outcome = self.generate(plan, context, tracker)?;
        self.complete(tracker, &outcome);
        Ok(outcome)
    }

    /// Normalizes the outline, applies session caps and resolves the style
    /// reference. Makes no boundary calls.
    pub fn plan(
        &self,
        input: OutlineInput<'_>,
        context: &GenerationContext,
        tracker: &RunTracker<'_>,
    ) -> Result<DeckPlan, RunFailure> {
        tracker.enter(Phase::Planning, "Planning slides");
        self.plan_inner(input, context)
            .map_err(|error| self.fail(tracker, Phase::Planning, 0, error))
    }

    fn plan_inner(
        &self,
        input: OutlineInput<'_>,
        context: &GenerationContext,
    ) -> Result<DeckPlan, DeckError> {
        let specs = match input {
            OutlineInput::Text(text) => {
                self.recorder.log("Outline", text);
                normalize_outline(text, self.format, &self.config.separator)?
            }
            OutlineInput::Specs(specs) if specs.is_empty() => {
                return Err(DeckError::EmptyOutline);
            }
            OutlineInput::Specs(specs) => specs,
        };

        let capped = enforce_session_cap(
            specs,
            context.test_mode,
            self.config.test_mode_cap,
            self.config.plan_cap,
        );
        if let Some(notice) = capped.truncation.as_ref() {
            self.recorder.log(
                "Session cap",
                &format!(
                    "{}: kept {} of {} slides",
                    notice.reason.as_str(),
                    notice.kept,
                    notice.original
                ),
            );
        }

        Ok(DeckPlan {
            specs: capped.specs,
            truncation: capped.truncation,
            reference_image: self.style.resolve(self.style_library)?,
        })
    }

    /// Enhances prompts, then renders and normalizes every slide under the
    /// batch bound. Does not report `complete`; see [`DeckPipeline::complete`].
    pub fn generate(
        &self,
        plan: DeckPlan,
        context: &GenerationContext,
        tracker: &RunTracker<'_>,
    ) -> Result<DeckOutcome, RunFailure> {
        let started = Instant::now();
        let total = plan.specs.len();
        if total == 0 {
            return Err(self.fail(tracker, Phase::Planning, 0, DeckError::EmptyOutline));
        }
        let scheduler = BatchScheduler::new(self.config.batch_size)
            .map_err(|error| self.fail(tracker, Phase::Planning, 0, error))?;

        tracker.enter(
            Phase::Enhancing,
            format!("Enhancing {total} slide prompt(s) with {}", self.enhancer.name()),
        );
        let tasks = self
            .enhance(plan.specs, context)
            .map_err(|error| self.fail(tracker, Phase::Enhancing, 0, error))?;

        tracker.enter(
            Phase::Generating,
            format!(
                "Generating {total} slide(s), {} at a time",
                scheduler.batch_size()
            ),
        );
        let generating_started = Instant::now();
        let reference = plan.reference_image.as_ref();
        let rendered = scheduler
            .run(&tasks, tracker, |task| self.render_task(task, reference, context))
            .map_err(|failure| {
                let ordinal = tasks
                    .get(failure.index)
                    .map(|task| task.spec.ordinal)
                    .unwrap_or(failure.index);
                let error = DeckError::Task {
                    ordinal,
                    total,
                    message: error_chain_text(&failure.cause, self.config.error_max_chars),
                };
                self.fail(tracker, Phase::Generating, failure.completed, error)
            })?;
        let generating_s = generating_started.elapsed().as_secs_f64();

        let mut slides = Vec::with_capacity(total);
        let mut records = Vec::with_capacity(total);
        for (slide, record) in rendered {
            self.recorder.log(
                &format!("Slide {}: {}", slide.ordinal + 1, slide.name),
                &slide.prompt,
            );
            slides.push(slide);
            records.push(record);
        }
        let timings = records
            .iter()
            .map(|record| SlideTiming {
                ordinal: record.ordinal,
                elapsed_s: record.elapsed_s,
            })
            .collect();

        Ok(DeckOutcome {
            slides,
            records,
            metrics: RunMetrics::from_timings(
                started.elapsed().as_secs_f64(),
                generating_s,
                timings,
            ),
            truncation: plan.truncation,
        })
    }

    /// Reports the run as complete. Call once the outcome has been delivered.
    pub fn complete(&self, tracker: &RunTracker<'_>, outcome: &DeckOutcome) -> bool {
        let total = outcome.slides.len();
        tracker.complete(
            total,
            format!(
                "Deck ready: {total} slide(s) in {:.1}s",
                outcome.metrics.elapsed_s
            ),
        )
    }

    fn enhance(
        &self,
        specs: Vec<SlideSpec>,
        context: &GenerationContext,
    ) -> Result<Vec<GenerationTask>, DeckError> {
        let descriptions: Vec<String> = specs.iter().map(|spec| spec.description.clone()).collect();
        let prompts = self
            .enhancer
            .enhance(&descriptions, context)
            .map_err(|err| DeckError::Enhancement {
                message: error_chain_text(&err, self.config.error_max_chars),
            })?;
        if prompts.len() != descriptions.len() {
            return Err(DeckError::Enhancement {
                message: format!(
                    "enhancer returned {} prompt(s) for {} slide(s)",
                    prompts.len(),
                    descriptions.len()
                ),
            });
        }
        self.recorder.log("Enhanced prompts", &prompts.join("\n---\n"));

        Ok(specs
            .into_iter()
            .zip(prompts)
            .enumerate()
            .map(|(position, (spec, prompt))| GenerationTask {
                position,
                spec,
                prompt,
            })
            .collect())
    }

    fn render_task(
        &self,
        task: &GenerationTask,
        reference: Option<&ReferenceImage>,
        context: &GenerationContext,
    ) -> Result<(Slide, RenderRecord)> {
        let started = Instant::now();
        let (result, mut record) = self.call_renderer(task, reference, context);
        let image = match result {
            RenderResult::Rendered { image, .. } => normalize_image(&image)?,
            RenderResult::Failed { cause, .. } => bail!(cause),
        };
        record.elapsed_s = started.elapsed().as_secs_f64();
        Ok((Slide::new(task, image), record))
    }

    fn call_renderer(
        &self,
        task: &GenerationTask,
        reference: Option<&ReferenceImage>,
        context: &GenerationContext,
    ) -> (RenderResult, RenderRecord) {
        let started = Instant::now();
        let ordinal = task.spec.ordinal;
        let request = RenderRequest {
            ordinal: task.position,
            prompt: &task.prompt,
            reference_image: reference,
            theme: context.theme.as_ref(),
            model: &self.image_model,
            size: DEFAULT_SLIDE_SIZE,
        };
        let mut record = RenderRecord {
            ordinal,
            elapsed_s: 0.0,
            provider_request: Map::new(),
            provider_response: Map::new(),
            warnings: Vec::new(),
        };
        let result = match self.renderer.render(&request) {
            Ok(response) => {
                record.provider_request = response.provider_request;
                record.provider_response = response.provider_response;
                record.warnings = response.warnings;
                RenderResult::Rendered {
                    ordinal,
                    image: response.image,
                }
            }
            Err(err) => {
                let err = err.context(format!("{} render failed", self.renderer.name()));
                RenderResult::Failed {
                    ordinal,
                    cause: error_chain_text(&err, self.config.error_max_chars),
                }
            }
        };
        record.elapsed_s = started.elapsed().as_secs_f64();
        (result, record)
    }

    /// Logs `error`, moves the tracker to `error` and wraps it for the caller.
    pub fn fail(
        &self,
        tracker: &RunTracker<'_>,
        phase: Phase,
        completed: usize,
        error: DeckError,
    ) -> RunFailure {
        let message = error.to_string();
        self.recorder.log(&format!("Failure during {phase}"), &message);
        tracker.fail(phase, message);
        RunFailure::new(phase, completed, error)
    }
}

/// Normalizes and caps an outline without touching any boundary.
pub fn preview_outline(
    text: &str,
    format: OutlineFormat,
    config: &DeckConfig,
    test_mode: bool,
) -> Result<CapOutcome, DeckError> {
    let specs = normalize_outline(text, format, &config.separator)?;
    Ok(enforce_session_cap(
        specs,
        test_mode,
        config.test_mode_cap,
        config.plan_cap,
    ))
}
