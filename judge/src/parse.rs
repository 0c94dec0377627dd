//! Parsing of free-form model output.

use crate::error::{JudgeError, Result};

/// Remove a surrounding markdown code fence (with optional language tag).
fn strip_code_fence(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    // drop the language tag line, if any
    let body = match rest.find('\n') {
        Some(newline) => &rest[newline + 1..],
        None => rest,
    };
    body.trim_end().trim_end_matches("```").trim()
}

/// Normalize generated prose: strip fences, wrapping quotes and a leading
/// label such as `Synthetic:`.
pub fn clean_generated_text(raw: &str) -> String {
    let mut text = strip_code_fence(raw).trim();

    for label in ["Synthetic offering:", "Synthetic:", "Offering:", "→"] {
        if let Some(rest) = text.strip_prefix(label) {
            text = rest.trim();
        }
    }

    let quotes = [('"', '"'), ('\'', '\''), ('“', '”')];
    for (open, close) in quotes {
        if text.len() >= 2 && text.starts_with(open) && text.ends_with(close) {
            text = text[open.len_utf8()..text.len() - close.len_utf8()].trim();
            break;
        }
    }

    text.to_string()
}

/// Parse the judge's ranked answer: a JSON array of candidate indices.
///
/// Tolerates a markdown fence and text around the array. Every element must
/// be a non-negative integer.
pub fn parse_index_list(raw: &str) -> Result<Vec<usize>> {
    let body = strip_code_fence(raw);
    let (Some(start), Some(end)) = (body.find('['), body.rfind(']')) else {
        return Err(JudgeError::MalformedOutput(format!(
            "no JSON array in: {}",
            preview(body)
        )));
    };
    if end < start {
        return Err(JudgeError::MalformedOutput(preview(body)));
    }

    let values: Vec<serde_json::Value> = serde_json::from_str(&body[start..=end])
        .map_err(|e| JudgeError::MalformedOutput(format!("{e}: {}", preview(body))))?;

    values
        .iter()
        .map(|value| {
            value
                .as_u64()
                .and_then(|idx| usize::try_from(idx).ok())
                .ok_or_else(|| JudgeError::MalformedOutput(format!("not an index: {value}")))
        })
        .collect()
}

fn preview(text: &str) -> String {
    text.chars().take(120).collect()
}
