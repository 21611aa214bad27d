use std::fs;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::sync::{mpsc, Mutex};
use std::thread;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use deckr_contracts::deck::{ColorTheme, GenerationContext, ProgressEvent};
use deckr_engine::config::DeckConfig;
use deckr_engine::pipeline::preview_outline;
use deckr_engine::style::{reference_from_path, DirectoryStyleLibrary, StyleLibrary, StyleSelection};
use deckr_engine::{DeckEngine, EnhancerMode, OutlineFormat};
use serde_json::Value;

#[derive(Debug, Parser)]
#[command(name = "deckr-rs", version, about = "Deck generation from slide outlines")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    Generate(GenerateArgs),
    Plan(PlanArgs),
}

#[derive(Debug, Parser)]
struct GenerateArgs {
    /// Outline file, or `-` for stdin.
    #[arg(long)]
    outline: PathBuf,
    #[arg(long)]
    out: PathBuf,
    #[arg(long)]
    events: Option<PathBuf>,
    #[arg(long)]
    config: Option<PathBuf>,
    #[arg(long, default_value = "auto")]
    format: String,
    #[arg(long)]
    test_mode: bool,
    #[arg(long)]
    batch_size: Option<usize>,
    #[arg(long)]
    plan_max: Option<usize>,
    #[arg(long)]
    image_model: Option<String>,
    #[arg(long)]
    text_model: Option<String>,
    #[arg(long, default_value = "passthrough")]
    enhancer: String,
    #[arg(long)]
    reference: Option<PathBuf>,
    #[arg(long)]
    style_library: Option<PathBuf>,
    #[arg(long)]
    style: Option<String>,
    /// Inline JSON or a path to a JSON file.
    #[arg(long)]
    theme: Option<String>,
    #[arg(long)]
    audience: Option<String>,
    #[arg(long)]
    tone: Option<String>,
    #[arg(long)]
    debug: bool,
}

#[derive(Debug, Parser)]
struct PlanArgs {
    #[arg(long)]
    outline: PathBuf,
    #[arg(long)]
    config: Option<PathBuf>,
    #[arg(long, default_value = "auto")]
    format: String,
    #[arg(long)]
    test_mode: bool,
    #[arg(long)]
    plan_max: Option<usize>,
}

fn main() {
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("deckr-rs error: {err:#}");
            std::process::exit(1);
        }
    }
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    match cli.command {
        Command::Generate(args) => run_generate(args),
        Command::Plan(args) => run_plan(args),
    }
}

fn run_generate(args: GenerateArgs) -> Result<i32> {
    let mut config = DeckConfig::resolve(args.config.as_deref())?;
    if let Some(batch_size) = args.batch_size {
        config.batch_size = batch_size;
    }
    if let Some(plan_max) = args.plan_max {
        config.plan_cap = plan_max;
    }
    config.validate()?;

    let outline = read_outline(&args.outline)?;
    let format = parse_format(&args.format)?;
    let Some(enhancer) = EnhancerMode::parse(&args.enhancer) else {
        bail!(
            "unknown enhancer '{}' (expected passthrough, dryrun or model)",
            args.enhancer
        );
    };
    let (style, library) = style_from_args(&args)?;
    let theme = args.theme.as_deref().map(parse_theme).transpose()?;
    let context = GenerationContext {
        audience: args.audience.clone(),
        target_slide_count: None,
        style: args.tone.clone(),
        theme,
        test_mode: args.test_mode,
    };

    let events_path = args
        .events
        .clone()
        .unwrap_or_else(|| args.out.join("events.jsonl"));
    let mut engine = DeckEngine::new(&args.out, &events_path, config)?;
    engine.set_image_model(args.image_model.clone());
    engine.set_text_model(args.text_model.clone());
    engine.set_enhancer_mode(enhancer);
    engine.set_outline_format(format);
    engine.set_style(style, library);
    engine.set_debug(args.debug);

    let (tx, rx) = mpsc::channel::<ProgressEvent>();
    let printer = thread::spawn(move || {
        for event in rx {
            println!("{}", format_progress(&event));
        }
    });
    let sink = Mutex::new(tx);
    let result = engine.generate(&outline, &context, &sink);
    drop(sink);
    if printer.join().is_err() {
        eprintln!("deckr-rs: progress printer panicked");
    }
    let finished = engine.finish();
    let deck = run_outcome(result, finished)?;
    if let Some(reason) = deck.fallback_reason.as_deref() {
        println!("Model: {} ({reason})", deck.image_model);
    }
    if let Some(warning) = deck
        .truncation
        .as_ref()
        .and_then(|notice| notice.warning.as_deref())
    {
        println!("Warning: {warning}");
    }
    for artifact in &deck.artifacts {
        println!(
            "{:>3}  {:<40}  {}",
            artifact
                .get("ordinal")
                .and_then(Value::as_u64)
                .map(|ordinal| ordinal + 1)
                .unwrap_or(0),
            artifact.get("name").and_then(Value::as_str).unwrap_or(""),
            artifact.get("image_path").and_then(Value::as_str).unwrap_or(""),
        );
    }
    println!(
        "Deck ready: {} slide(s) in {:.1}s (parallel speedup {:.2}x)",
        deck.slides.len(),
        deck.metrics.elapsed_s,
        deck.metrics.parallel_speedup
    );
    Ok(0)
}

fn run_plan(args: PlanArgs) -> Result<i32> {
    let mut config = DeckConfig::resolve(args.config.as_deref())?;
    if let Some(plan_max) = args.plan_max {
        config.plan_cap = plan_max;
    }
    config.validate()?;
    let outline = read_outline(&args.outline)?;
    let format = parse_format(&args.format)?;

    let preview = preview_outline(&outline, format, &config, args.test_mode)?;
    println!("Plan: {} slide(s)", preview.specs.len());
    if let Some(notice) = preview.truncation.as_ref() {
        println!(
            "Truncated ({}): keeping {} of {}",
            notice.reason.as_str(),
            notice.kept,
            notice.original
        );
        if let Some(warning) = notice.warning.as_deref() {
            println!("Warning: {warning}");
        }
    }
    for spec in &preview.specs {
        let name = deckr_contracts::deck::slide_display_name(
            spec.title_hint.as_deref(),
            &spec.description,
        );
        println!("{:>3}  {name}", spec.ordinal + 1);
    }
    Ok(0)
}

fn read_outline(path: &Path) -> Result<String> {
    if path.as_os_str() == "-" {
        let mut raw = String::new();
        io::stdin()
            .read_to_string(&mut raw)
            .context("failed reading outline from stdin")?;
        return Ok(raw);
    }
    fs::read_to_string(path).with_context(|| format!("failed reading outline {}", path.display()))
}

fn parse_format(raw: &str) -> Result<OutlineFormat> {
    Ok(match raw.trim().to_ascii_lowercase().as_str() {
        "auto" => OutlineFormat::Auto,
        "separated" => OutlineFormat::Separated,
        "briefs" => OutlineFormat::Briefs,
        other => bail!("unknown outline format '{other}' (expected auto, separated or briefs)"),
    })
}

fn parse_theme(raw: &str) -> Result<ColorTheme> {
    let trimmed = raw.trim();
    let body = if trimmed.starts_with('{') {
        trimmed.to_string()
    } else {
        fs::read_to_string(trimmed).with_context(|| format!("failed reading theme {trimmed}"))?
    };
    serde_json::from_str(&body).context("invalid theme JSON")
}

/// Upload beats library pick when both are given.
fn style_from_args(
    args: &GenerateArgs,
) -> Result<(StyleSelection, Option<Box<dyn StyleLibrary>>)> {
    let library: Option<Box<dyn StyleLibrary>> = args
        .style_library
        .as_ref()
        .map(|dir| Box::new(DirectoryStyleLibrary::new(dir)) as Box<dyn StyleLibrary>);
    let mut selection = StyleSelection::None;
    if let Some(id) = args.style.as_deref() {
        selection.select_library(id);
    }
    if let Some(path) = args.reference.as_deref() {
        selection.select_upload(reference_from_path(path)?);
    }
    Ok((selection, library))
}

/// The run's own error wins; a summary that failed to write only surfaces
/// once the run itself succeeded.
fn run_outcome<T>(result: Result<T>, finished: Result<()>) -> Result<T> {
    match (result, finished) {
        (Err(err), Err(finish_err)) => {
            eprintln!("deckr-rs: failed to write run summary: {finish_err:#}");
            Err(err)
        }
        (Err(err), Ok(())) => Err(err),
        (Ok(value), finished) => finished.map(|()| value),
    }
}

fn format_progress(event: &ProgressEvent) -> String {
    match (event.current, event.total, event.percent) {
        (Some(current), Some(total), Some(percent)) => format!(
            "[{} {current}/{total} {percent}%] {}",
            event.phase, event.message
        ),
        _ => format!("[{}] {}", event.phase, event.message),
    }
}
