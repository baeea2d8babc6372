//! JSON extraction from LLM response text.
//!
//! Models return raw text that is ideally clean JSON but often arrives
//! wrapped in markdown fences or with trailing commas. Extraction walks
//! a ladder of recovery strategies; when every strategy fails, the
//! caller receives [`AiError::Shape`] and treats the tick as a miss for
//! the affected avatar.

use crate::AiError;

/// Parse an LLM response into a JSON value.
///
/// Recovery ladder:
/// 1. Direct `serde_json` parse.
/// 2. Extract the body of a fenced code block and parse it.
/// 3. Strip trailing commas and retry.
/// 4. Fenced block extraction plus trailing-comma stripping.
///
/// # Errors
///
/// Returns [`AiError::Shape`] when no strategy yields JSON.
pub fn extract_json(raw: &str) -> Result<serde_json::Value, AiError> {
    let trimmed = raw.trim();

    if let Ok(value) = serde_json::from_str(trimmed) {
        return Ok(value);
    }

    if let Some(block) = extract_codeblock(trimmed)
        && let Ok(value) = serde_json::from_str(block)
    {
        return Ok(value);
    }

    let cleaned = strip_trailing_commas(trimmed);
    if let Ok(value) = serde_json::from_str(&cleaned) {
        return Ok(value);
    }

    if let Some(block) = extract_codeblock(trimmed) {
        let cleaned = strip_trailing_commas(block);
        if let Ok(value) = serde_json::from_str(&cleaned) {
            return Ok(value);
        }
    }

    Err(AiError::Shape(truncate_for_log(trimmed)))
}

/// Extract the inside of the first fenced code block, tolerating a
/// language tag after the opening fence.
fn extract_codeblock(s: &str) -> Option<&str> {
    let start = s.find("```")?;
    let after_fence = s.get(start.checked_add(3)?..)?;
    // Skip an optional language tag up to the first newline.
    let body_start = after_fence.find('\n').map_or(0, |i| i.saturating_add(1));
    let body = after_fence.get(body_start..)?;
    let end = body.find("```")?;
    Some(body.get(..end)?.trim())
}

/// Remove commas that directly precede a closing brace or bracket,
/// leaving string contents untouched.
fn strip_trailing_commas(s: &str) -> String {
    let chars: Vec<char> = s.chars().collect();
    let mut out = String::with_capacity(s.len());
    let mut in_string = false;
    let mut escaped = false;

    for (i, &ch) in chars.iter().enumerate() {
        if in_string {
            out.push(ch);
            if escaped {
                escaped = false;
            } else if ch == '\\' {
                escaped = true;
            } else if ch == '"' {
                in_string = false;
            }
            continue;
        }
        match ch {
            '"' => {
                in_string = true;
                out.push(ch);
            }
            ',' => {
                let next_significant = chars
                    .get(i.saturating_add(1)..)
                    .and_then(|rest| rest.iter().find(|c| !c.is_whitespace()));
                // A comma right before a closer is the defect; drop it.
                if !matches!(next_significant, Some('}') | Some(']')) {
                    out.push(ch);
                }
            }
            _ => out.push(ch),
        }
    }
    out
}

/// Bound the error payload so logs stay readable.
fn truncate_for_log(s: &str) -> String {
    const LIMIT: usize = 256;
    if s.len() <= LIMIT {
        return s.to_owned();
    }
    let mut end = LIMIT;
    while end > 0 && !s.is_char_boundary(end) {
        end = end.saturating_sub(1);
    }
    format!("{}…", s.get(..end).unwrap_or_default())
}
