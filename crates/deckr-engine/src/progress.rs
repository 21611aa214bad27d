use std::sync::mpsc::Sender;
use std::sync::Mutex;

use deckr_contracts::deck::{Phase, ProgressEvent};
use deckr_contracts::events::EventLog;

/// Receives progress synchronously; implementations must not block for long.
pub trait ProgressSink: Send + Sync {
    fn report(&self, event: &ProgressEvent);
}

pub struct NullSink;

impl ProgressSink for NullSink {
    fn report(&self, _event: &ProgressEvent) {}
}

/// Channel sink: the caller drains the receiver on its own thread. A hung-up
/// receiver is not an error for the run.
impl ProgressSink for Mutex<Sender<ProgressEvent>> {
    fn report(&self, event: &ProgressEvent) {
        if let Ok(sender) = self.lock() {
            let _ = sender.send(event.clone());
        }
    }
}

impl ProgressSink for EventLog {
    fn report(&self, event: &ProgressEvent) {
        if let Err(err) = self.emit_progress(event) {
            eprintln!("deckr: failed to log progress event: {err:#}");
        }
    }
}

/// Keeps every report in memory.
#[derive(Default)]
pub struct RecordingSink {
    events: Mutex<Vec<ProgressEvent>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<ProgressEvent> {
        self.events
            .lock()
            .map(|events| events.clone())
            .unwrap_or_default()
    }
}

impl ProgressSink for RecordingSink {
    fn report(&self, event: &ProgressEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event.clone());
        }
    }
}

/// Forwards to several sinks in order.
pub struct FanoutSink<'a> {
    sinks: Vec<&'a dyn ProgressSink>,
}

impl<'a> FanoutSink<'a> {
    pub fn new(sinks: Vec<&'a dyn ProgressSink>) -> Self {
        Self { sinks }
    }
}

impl ProgressSink for FanoutSink<'_> {
    fn report(&self, event: &ProgressEvent) {
        for sink in &self.sinks {
            sink.report(event);
        }
    }
}

/// Per-run state machine in front of a sink.
///
/// Phases only move forward (`planning → enhancing → generating → complete`,
/// or `error` from any non-terminal phase) and slide counters never go
/// backwards. Once a terminal phase is reached everything else is dropped.
pub struct RunTracker<'a> {
    sink: &'a dyn ProgressSink,
    state: Mutex<TrackerState>,
}

#[derive(Debug, Clone, Copy)]
struct TrackerState {
    phase: Option<Phase>,
    current: usize,
}

impl<'a> RunTracker<'a> {
    pub fn new(sink: &'a dyn ProgressSink) -> Self {
        Self {
            sink,
            state: Mutex::new(TrackerState {
                phase: None,
                current: 0,
            }),
        }
    }

    pub fn phase(&self) -> Option<Phase> {
        self.state.lock().ok().and_then(|state| state.phase)
    }

    pub fn completed(&self) -> usize {
        self.state.lock().map(|state| state.current).unwrap_or(0)
    }

    /// Moves to `phase` and reports it. Returns false when the transition
    /// would go backwards or the run is already settled.
    pub fn enter(&self, phase: Phase, message: impl Into<String>) -> bool {
        self.emit(ProgressEvent::phase(phase, message))
    }

    pub fn slide_done(&self, completed: usize, total: usize, message: impl Into<String>) -> bool {
        self.emit(ProgressEvent::counted(
            Phase::Generating,
            message,
            completed,
            total,
        ))
    }

    pub fn complete(&self, total: usize, message: impl Into<String>) -> bool {
        self.emit(ProgressEvent::counted(Phase::Complete, message, total, total))
    }

    /// Reports `error`, tagged with the phase the run failed in.
    pub fn fail(&self, phase: Phase, message: impl Into<String>) -> bool {
        self.emit(ProgressEvent::phase(
            Phase::Error,
            format!("{phase}: {}", message.into()),
        ))
    }

    pub fn emit(&self, event: ProgressEvent) -> bool {
        let Ok(mut state) = self.state.lock() else {
            return false;
        };
        if !transition_allowed(state.phase, event.phase) {
            return false;
        }
        if let Some(current) = event.current {
            if current < state.current {
                return false;
            }
            state.current = current;
        }
        state.phase = Some(event.phase);
        drop(state);
        self.sink.report(&event);
        true
    }
}

fn transition_allowed(from: Option<Phase>, to: Phase) -> bool {
    match from {
        None => true,
        Some(from) if from.is_terminal() => false,
        Some(_) if to == Phase::Error => true,
        Some(from) => to >= from,
    }
}
