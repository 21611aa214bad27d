use anyhow::Result;
use deckr_contracts::deck::GenerationContext;

/// Turns raw slide descriptions into generation prompts. Implementations
/// must return exactly one prompt per description, in input order; the
/// pipeline treats any other shape as a failed enhancement.
pub trait PromptEnhancer: Send + Sync {
    fn name(&self) -> &str;
    fn enhance(&self, descriptions: &[String], context: &GenerationContext) -> Result<Vec<String>>;
}

/// Uses descriptions as prompts unchanged.
#[derive(Debug, Clone, Copy, Default)]
pub struct PassthroughEnhancer;

impl PromptEnhancer for PassthroughEnhancer {
    fn name(&self) -> &str {
        "passthrough"
    }

    fn enhance(&self, descriptions: &[String], _context: &GenerationContext) -> Result<Vec<String>> {
        Ok(descriptions.to_vec())
    }
}

/// Offline enhancer that folds the context into each prompt with a fixed
/// template. The description stays on the first line so slide names are
/// unaffected.
#[derive(Debug, Clone, Copy, Default)]
pub struct DryrunEnhancer;

impl PromptEnhancer for DryrunEnhancer {
    fn name(&self) -> &str {
        "dryrun"
    }

    fn enhance(&self, descriptions: &[String], context: &GenerationContext) -> Result<Vec<String>> {
        let total = descriptions.len();
        Ok(descriptions
            .iter()
            .enumerate()
            .map(|(idx, description)| {
                let mut lines = vec![description.trim().to_string()];
                lines.push(format!("Slide {} of {total}.", idx + 1));
                if let Some(audience) = non_empty(context.audience.as_deref()) {
                    lines.push(format!("Audience: {audience}."));
                }
                if let Some(style) = non_empty(context.style.as_deref()) {
                    lines.push(format!("Visual tone: {style}."));
                }
                if let Some(theme) = context.theme.as_ref() {
                    let palette = theme.palette_text();
                    if !palette.is_empty() {
                        lines.push(format!("Palette: {palette}."));
                    }
                }
                lines.push("16:9 presentation slide, legible typography, one clear focal point.".to_string());
                lines.join("\n")
            })
            .collect())
    }
}

pub(crate) fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|value| !value.is_empty())
}
