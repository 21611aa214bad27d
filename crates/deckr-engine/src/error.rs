use deckr_contracts::deck::Phase;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DeckError {
    #[error("outline contains no slides")]
    EmptyOutline,

    #[error("prompt enhancement failed: {message}")]
    Enhancement { message: String },

    #[error("slide {} of {total} failed: {message}", .ordinal + 1)]
    Task {
        ordinal: usize,
        total: usize,
        message: String,
    },

    #[error("style reference '{0}' not found in library")]
    StyleNotFound(String),

    #[error("style library lookup failed: {0}")]
    StyleLibrary(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("writing deck output failed: {0}")]
    Output(String),
}

/// Typed failure handed back to the caller: which phase the run died in,
/// how many slides had finished, and why.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("deck generation failed during {phase} after {completed} slide(s): {error}")]
pub struct RunFailure {
    pub phase: Phase,
    pub completed: usize,
    #[source]
    pub error: DeckError,
}

impl RunFailure {
    pub fn new(phase: Phase, completed: usize, error: DeckError) -> Self {
        Self {
            phase,
            completed,
            error,
        }
    }

    pub fn failed_ordinal(&self) -> Option<usize> {
        match &self.error {
            DeckError::Task { ordinal, .. } => Some(*ordinal),
            _ => None,
        }
    }
}

/// Flattens an error chain into `outer | caused by: inner`, dropping repeats,
/// capped at `max_chars`.
pub fn error_chain_text(err: &anyhow::Error, max_chars: usize) -> String {
    let mut parts: Vec<String> = Vec::new();
    for cause in err.chain() {
        let text = cause.to_string();
        let trimmed = text.trim();
        if trimmed.is_empty() {
            continue;
        }
        if parts.last().map(|existing| existing == trimmed).unwrap_or(false) {
            continue;
        }
        parts.push(trimmed.to_string());
    }
    if parts.is_empty() {
        return truncate_text(&err.to_string(), max_chars);
    }
    truncate_text(&parts.join(" | caused by: "), max_chars)
}

pub fn truncate_text(value: &str, max_chars: usize) -> String {
    if value.chars().count() <= max_chars {
        return value.to_string();
    }
    value.chars().take(max_chars).collect::<String>() + "…"
}

#[cfg(test)]
mod tests {
    use anyhow::Context;

    use super::*;

    #[test]
    fn error_chain_text_preserves_nested_contexts() {
        let err = Err::<(), anyhow::Error>(anyhow::anyhow!("connection reset"))
            .context("Gemini request failed")
            .context("slide render failed")
            .err()
            .unwrap_or_else(|| anyhow::anyhow!("missing"));
        assert_eq!(
            error_chain_text(&err, 500),
            "slide render failed | caused by: Gemini request failed | caused by: connection reset"
        );
    }

    #[test]
    fn error_text_is_capped() {
        let err = anyhow::anyhow!("{}", "e".repeat(900));
        let text = error_chain_text(&err, 500);
        assert_eq!(text.chars().count(), 501);
        assert!(text.ends_with('…'));
    }

    #[test]
    fn task_errors_name_one_based_slide() {
        let error = DeckError::Task {
            ordinal: 1,
            total: 3,
            message: "content policy".to_string(),
        };
        assert_eq!(error.to_string(), "slide 2 of 3 failed: content policy");
        let failure = RunFailure::new(Phase::Generating, 1, error);
        assert_eq!(failure.failed_ordinal(), Some(1));
        assert!(failure.to_string().contains("during generating after 1 slide(s)"));
    }
}
