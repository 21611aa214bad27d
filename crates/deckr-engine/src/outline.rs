use deckr_contracts::deck::SlideSpec;

use crate::error::DeckError;

const BRIEF_HEADER_PREFIX: &str = "## SLIDE ";
const BRIEF_HEADER_MARKER: &str = "BRIEF:";
const BRIEF_TERMINATOR: &str = "## NEXT STEPS";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutlineFormat {
    /// Brief parsing when any `## SLIDE <n> BRIEF:` header is present,
    /// separator splitting otherwise.
    #[default]
    Auto,
    Separated,
    Briefs,
}

/// Turns raw outline text into ordered slide specs.
pub fn normalize_outline(
    text: &str,
    format: OutlineFormat,
    separator: &str,
) -> Result<Vec<SlideSpec>, DeckError> {
    let specs = match format {
        OutlineFormat::Separated => split_outline(text, separator),
        OutlineFormat::Briefs => parse_slide_briefs(text),
        OutlineFormat::Auto => {
            if text.lines().any(|line| parse_brief_header(line).is_some()) {
                parse_slide_briefs(text)
            } else {
                split_outline(text, separator)
            }
        }
    };
    if specs.is_empty() {
        return Err(DeckError::EmptyOutline);
    }
    Ok(specs)
}

/// Splits on lines that consist solely of `separator`; empty segments are
/// dropped and ordinals follow source order.
pub fn split_outline(text: &str, separator: &str) -> Vec<SlideSpec> {
    let separator = separator.trim();
    let mut segments: Vec<String> = Vec::new();
    let mut current: Vec<&str> = Vec::new();
    for line in text.lines() {
        if line.trim() == separator {
            segments.push(current.join("\n"));
            current.clear();
        } else {
            current.push(line);
        }
    }
    segments.push(current.join("\n"));

    segments
        .iter()
        .map(|segment| segment.trim())
        .filter(|segment| !segment.is_empty())
        .enumerate()
        .map(|(ordinal, segment)| {
            let spec = SlideSpec::new(ordinal, segment);
            match title_hint(segment) {
                Some(title) => spec.with_title_hint(title),
                None => spec,
            }
        })
        .collect()
}

/// Parses planner output made of `## SLIDE <n> BRIEF: <title>` blocks,
/// ordered by slide number.
pub fn parse_slide_briefs(text: &str) -> Vec<SlideSpec> {
    let mut briefs: Vec<(u32, String, Vec<&str>)> = Vec::new();
    let mut open = false;
    for line in text.lines() {
        if let Some((number, title)) = parse_brief_header(line) {
            briefs.push((number, title, vec![line]));
            open = true;
            continue;
        }
        if line.trim_start().starts_with(BRIEF_TERMINATOR) {
            open = false;
            continue;
        }
        if open {
            if let Some((_, _, lines)) = briefs.last_mut() {
                lines.push(line);
            }
        }
    }

    briefs.sort_by_key(|(number, _, _)| *number);
    briefs
        .into_iter()
        .map(|(_, title, lines)| (title, lines.join("\n").trim().to_string()))
        .filter(|(_, body)| !body.is_empty())
        .enumerate()
        .map(|(ordinal, (title, body))| SlideSpec::new(ordinal, body).with_title_hint(title))
        .collect()
}

fn parse_brief_header(line: &str) -> Option<(u32, String)> {
    let rest = line.trim().strip_prefix(BRIEF_HEADER_PREFIX)?;
    let digits: String = rest.chars().take_while(char::is_ascii_digit).collect();
    if digits.is_empty() {
        return None;
    }
    let number = digits.parse::<u32>().ok()?;
    let title = rest[digits.len()..]
        .trim_start()
        .strip_prefix(BRIEF_HEADER_MARKER)?
        .trim()
        .to_string();
    Some((number, title))
}

fn title_hint(segment: &str) -> Option<String> {
    let first = segment.lines().next()?.trim();
    if let Some(heading) = first.strip_prefix('#') {
        let heading = heading.trim_start_matches('#').trim();
        return (!heading.is_empty()).then(|| heading.to_string());
    }
    let lowered = first.to_ascii_lowercase();
    if lowered.starts_with("title:") {
        let value = first["title:".len()..].trim();
        return (!value.is_empty()).then(|| value.to_string());
    }
    None
}
