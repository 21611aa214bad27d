use std::path::Path;

use anyhow::{bail, Result};
use deckr_contracts::deck::{GenerationContext, Phase, TruncationReason};
use deckr_contracts::events::read_events;
use deckr_engine::config::DeckConfig;
use deckr_engine::error::{DeckError, RunFailure};
use deckr_engine::progress::RecordingSink;
use deckr_engine::render::{DryrunRenderer, RenderRequest, RenderResponse, SlideRenderer};
use deckr_engine::{DeckEngine, EnhancerMode};
use serde_json::Value;

struct RejectingRenderer;

impl SlideRenderer for RejectingRenderer {
    fn name(&self) -> &str {
        "dryrun"
    }

    fn render(&self, request: &RenderRequest<'_>) -> Result<RenderResponse> {
        if request.prompt.starts_with("Problem") {
            bail!("safety filter blocked slide");
        }
        DryrunRenderer::with_size(16, 9).render(request)
    }
}

fn event_types(path: &Path) -> Result<Vec<String>> {
    Ok(read_events(path)?
        .iter()
        .filter_map(|event| event.get("type").and_then(Value::as_str))
        .map(str::to_string)
        .collect())
}

fn read_json(path: &Path) -> Result<Value> {
    Ok(serde_json::from_str(&std::fs::read_to_string(path)?)?)
}

#[test]
fn dryrun_deck_writes_slides_receipts_and_summary() -> Result<()> {
    let temp = tempfile::tempdir()?;
    let run_dir = temp.path().join("deck-1");
    let events_path = run_dir.join("events.jsonl");
    let mut engine = DeckEngine::new(&run_dir, &events_path, DeckConfig::default())?;
    engine.register_renderer(DryrunRenderer::with_size(64, 36));
    engine.set_image_model(Some("dryrun-image-1".to_string()));
    engine.set_enhancer_mode(EnhancerMode::Dryrun);
    engine.set_debug(true);

    let sink = RecordingSink::new();
    let context = GenerationContext {
        audience: Some("investors".to_string()),
        ..GenerationContext::default()
    };
    let deck = engine.generate("Intro\n---\nProblem\n---\nSolution", &context, &sink)?;
    engine.finish()?;

    let names: Vec<&str> = deck.slides.iter().map(|slide| slide.name.as_str()).collect();
    assert_eq!(names, vec!["Intro", "Problem", "Solution"]);
    assert!(deck.slides.iter().all(|slide| slide.image.width == 64));
    assert_eq!(deck.fallback_reason, None);
    assert_eq!(deck.artifacts.len(), 3);
    for artifact in &deck.artifacts {
        let image_path = artifact.get("image_path").and_then(Value::as_str).unwrap_or_default();
        assert!(Path::new(image_path).exists());
        let receipt_path = artifact.get("receipt_path").and_then(Value::as_str).unwrap_or_default();
        let receipt = read_json(Path::new(receipt_path))?;
        assert_eq!(receipt["resolved"]["output_format"], "png");
        assert_eq!(receipt["resolved"]["provider"], "dryrun");
    }

    let last = sink.events().last().map(|event| (event.phase, event.current, event.total));
    assert_eq!(last, Some((Phase::Complete, Some(3), Some(3))));

    let types = event_types(&events_path)?;
    assert_eq!(types.first().map(String::as_str), Some("run_started"));
    assert_eq!(types.last().map(String::as_str), Some("run_finished"));
    for expected in ["plan_preview", "phase_changed", "slide_progress", "deck_complete"] {
        assert!(types.iter().any(|kind| kind == expected), "missing {expected}");
    }
    assert_eq!(types.iter().filter(|kind| *kind == "slide_rendered").count(), 3);
    assert!(!types.iter().any(|kind| kind == "truncation_notice"));

    let summary = read_json(&run_dir.join("summary.json"))?;
    assert_eq!(summary["status"], "succeeded");
    assert_eq!(summary["total_slides"], 3);
    assert_eq!(summary["completed_slides"], 3);
    assert!(run_dir.join("debug").join("deck-1.json").exists());
    Ok(())
}

#[test]
fn render_failure_returns_no_slides() -> Result<()> {
    let temp = tempfile::tempdir()?;
    let run_dir = temp.path().join("deck-2");
    let events_path = run_dir.join("events.jsonl");
    let mut engine = DeckEngine::new(&run_dir, &events_path, DeckConfig::default())?;
    engine.register_renderer(RejectingRenderer);

    let sink = RecordingSink::new();
    let result = engine.generate(
        "Intro\n---\nProblem\n---\nSolution\n---\nAsk",
        &GenerationContext::default(),
        &sink,
    );
    engine.finish()?;

    let Err(err) = result else {
        panic!("rejected slide must fail the deck");
    };
    let Some(failure) = err.downcast_ref::<RunFailure>() else {
        panic!("expected a RunFailure, got {err:#}");
    };
    assert_eq!(failure.phase, Phase::Generating);
    assert_eq!(failure.failed_ordinal(), Some(1));
    assert!(engine.last_fallback_reason().is_some());

    assert!(sink.events().iter().all(|event| event.phase != Phase::Complete));
    let types = event_types(&events_path)?;
    assert!(types.iter().any(|kind| kind == "generation_failed"));
    assert!(!types.iter().any(|kind| kind == "slide_rendered"));
    assert!(!types.iter().any(|kind| kind == "deck_complete"));

    let summary = read_json(&run_dir.join("summary.json"))?;
    assert_eq!(summary["status"], "failed");
    assert_eq!(summary["failed_phase"], "generating");
    let pngs = std::fs::read_dir(&run_dir)?
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.path().extension().and_then(|ext| ext.to_str()) == Some("png"))
        .count();
    assert_eq!(pngs, 0);
    Ok(())
}

#[test]
fn plan_limit_truncation_is_logged() -> Result<()> {
    let temp = tempfile::tempdir()?;
    let run_dir = temp.path().join("deck-3");
    let events_path = run_dir.join("events.jsonl");
    let config = DeckConfig {
        plan_cap: 2,
        ..DeckConfig::default()
    };
    let mut engine = DeckEngine::new(&run_dir, &events_path, config)?;
    engine.register_renderer(DryrunRenderer::with_size(16, 9));

    let deck = engine.generate(
        "One\n---\nTwo\n---\nThree\n---\nFour",
        &GenerationContext::default(),
        &RecordingSink::new(),
    )?;
    engine.finish()?;

    assert_eq!(deck.slides.len(), 2);
    let notice = deck.truncation.as_ref();
    assert_eq!(notice.map(|notice| notice.reason), Some(TruncationReason::PlanLimit));
    assert_eq!(notice.map(|notice| (notice.original, notice.kept)), Some((4, 2)));

    let events = read_events(&events_path)?;
    let truncation = events
        .iter()
        .find(|event| event.get("type").and_then(Value::as_str) == Some("truncation_notice"));
    assert_eq!(
        truncation.and_then(|event| event.get("reason")).and_then(Value::as_str),
        Some("plan-limit")
    );

    let summary = read_json(&run_dir.join("summary.json"))?;
    assert_eq!(summary["requested_slides"], 4);
    assert_eq!(summary["total_slides"], 2);
    Ok(())
}

#[test]
fn unwritable_run_dir_fails_the_deck() -> Result<()> {
    let temp = tempfile::tempdir()?;
    let run_dir = temp.path().join("deck-4");
    let events_path = temp.path().join("events.jsonl");
    let mut engine = DeckEngine::new(&run_dir, &events_path, DeckConfig::default())?;
    engine.register_renderer(DryrunRenderer::with_size(16, 9));
    std::fs::remove_dir_all(&run_dir)?;

    let sink = RecordingSink::new();
    let result = engine.generate("Intro\n---\nProblem", &GenerationContext::default(), &sink);
    engine.finish()?;

    let Err(err) = result else {
        panic!("slides cannot be written without a run dir");
    };
    let Some(failure) = err.downcast_ref::<RunFailure>() else {
        panic!("expected a RunFailure, got {err:#}");
    };
    assert_eq!(failure.phase, Phase::Generating);
    assert!(matches!(failure.error, DeckError::Output(_)));

    let events = sink.events();
    assert!(events.iter().all(|event| event.phase != Phase::Complete));
    assert_eq!(events.last().map(|event| event.phase), Some(Phase::Error));

    let types = event_types(&events_path)?;
    assert!(types.iter().any(|kind| kind == "generation_failed"));
    assert!(!types.iter().any(|kind| kind == "deck_complete"));
    let summary = read_json(&run_dir.join("summary.json"))?;
    assert_eq!(summary["status"], "failed");
    assert_eq!(summary["failed_phase"], "generating");
    Ok(())
}

#[test]
fn provider_options_reach_the_gemini_transport() -> Result<()> {
    let temp = tempfile::tempdir()?;
    let run_dir = temp.path().join("deck-5");
    let events_path = run_dir.join("events.jsonl");
    let config = DeckConfig::from_json(
        r#"{"provider_options": {"request_timeout": 30, "transport_retries": 9}}"#,
    )?;
    DeckEngine::new(&run_dir, &events_path, config)?;

    let events = read_events(&events_path)?;
    let started = events
        .iter()
        .find(|event| event.get("type").and_then(Value::as_str) == Some("run_started"));
    let transport = started.and_then(|event| event.get("provider_transport"));
    assert_eq!(
        transport.and_then(|value| value.get("request_timeout_s")).and_then(Value::as_f64),
        Some(30.0)
    );
    assert_eq!(
        transport.and_then(|value| value.get("transport_retries")).and_then(Value::as_u64),
        Some(4)
    );
    Ok(())
}
