//! JSON payload extraction for structured LLM responses.
//!
//! Structured-output endpoints usually return bare JSON, but models routed
//! through compatibility layers still wrap it in markdown or prose. The
//! strategies are tried in order:
//! 1. ```` ```json ```` code block
//! 2. generic code block
//! 3. content that already starts with `{` or `[`
//! 4. the largest valid object anywhere in the text
//!
//! # Example
//!
//! ```
//! use sql_forge::extraction::extract_json_payload;
//!
//! let response = "Here you go: {\"descriptions\": [\"a bakery\"]}";
//! let json = extract_json_payload(response).unwrap();
//! assert_eq!(json, "{\"descriptions\": [\"a bakery\"]}");
//! ```

use regex::Regex;

use crate::error::ExtractionError;

/// Extracts the JSON object or array carried by an LLM response.
///
/// Returns `ExtractionError::JsonTruncated` when a JSON value starts but
/// never closes (typically a `max_tokens` cut), and
/// `ExtractionError::JsonNotFound` when nothing JSON-like is present.
pub fn extract_json_payload(content: &str) -> Result<String, ExtractionError> {
    let trimmed = content.trim();

    if let Some(json) = from_fenced_block(trimmed, true) {
        return Ok(json);
    }
    if let Some(json) = from_fenced_block(trimmed, false) {
        return Ok(json);
    }

    if trimmed.starts_with('{') || trimmed.starts_with('[') {
        if let Some(end) = find_matching_delimiter(trimmed) {
            let candidate = &trimmed[..=end];
            if is_valid_json(candidate) {
                return Ok(candidate.to_string());
            }
        }
    }

    if let Some(json) = largest_valid_object(trimmed) {
        return Ok(json);
    }

    if let Some(start) = trimmed.find(['{', '[']) {
        let unclosed = count_unclosed(&trimmed[start..]);
        if unclosed > 0 {
            return Err(ExtractionError::JsonTruncated { unclosed });
        }
    }

    let preview_end = trimmed
        .char_indices()
        .nth(50)
        .map(|(i, _)| i)
        .unwrap_or(trimmed.len());
    Err(ExtractionError::JsonNotFound {
        content_preview: trimmed[..preview_end].to_string(),
    })
}

fn from_fenced_block(content: &str, json_tag_only: bool) -> Option<String> {
    let pattern = if json_tag_only {
        r"```json\s*\n?([\s\S]*?)\n?```"
    } else {
        r"```(?:\w+)?\s*\n?([\s\S]*?)\n?```"
    };
    let re = Regex::new(pattern).ok()?;
    let caps = re.captures(content)?;
    let block = caps.get(1)?.as_str().trim();
    let start = block.find(['{', '['])?;
    let end = find_matching_delimiter(&block[start..])?;
    let candidate = &block[start..=start + end];
    is_valid_json(candidate).then(|| candidate.to_string())
}

fn is_valid_json(candidate: &str) -> bool {
    serde_json::from_str::<serde_json::Value>(candidate).is_ok()
}

/// Finds the index of the delimiter closing the one `s` starts with.
///
/// Handles nesting, string literals and escape sequences. `s` must start
/// with `{` or `[`.
pub fn find_matching_delimiter(s: &str) -> Option<usize> {
    let (open, close) = match s.chars().next()? {
        '{' => ('{', '}'),
        '[' => ('[', ']'),
        _ => return None,
    };

    let mut depth = 0usize;
    let mut in_string = false;
    let mut escape_next = false;

    for (i, c) in s.char_indices() {
        if escape_next {
            escape_next = false;
            continue;
        }

        match c {
            '\\' if in_string => escape_next = true,
            '"' => in_string = !in_string,
            c if c == open && !in_string => depth += 1,
            c if c == close && !in_string => {
                depth = depth.saturating_sub(1);
                if depth == 0 {
                    return Some(i);
                }
            }
            _ => {}
        }
    }

    None
}

/// Largest valid JSON object in `content`, preferring later ones on ties.
fn largest_valid_object(content: &str) -> Option<String> {
    content
        .char_indices()
        .filter(|(_, c)| *c == '{')
        .filter_map(|(start, _)| {
            let end = find_matching_delimiter(&content[start..])?;
            let candidate = &content[start..=start + end];
            is_valid_json(candidate).then(|| (start, candidate))
        })
        .max_by(|(pos_a, a), (pos_b, b)| a.len().cmp(&b.len()).then(pos_a.cmp(pos_b)))
        .map(|(_, json)| json.to_string())
}

fn count_unclosed(s: &str) -> usize {
    let mut depth: isize = 0;
    let mut in_string = false;
    let mut escape_next = false;

    for c in s.chars() {
        if escape_next {
            escape_next = false;
            continue;
        }
        match c {
            '\\' if in_string => escape_next = true,
            '"' => in_string = !in_string,
            '{' | '[' if !in_string => depth += 1,
            '}' | ']' if !in_string => depth -= 1,
            _ => {}
        }
    }

    depth.max(0) as usize + usize::from(in_string)
}
