//! Defensive extraction of structured data from LLM text.
//!
//! Model output is an untrusted boundary: responses arrive wrapped in prose,
//! fenced in markdown, or with small syntax errors. These utilities extract
//! and validate JSON without a second paid call; the gateway only re-asks
//! the model when everything here has failed.

use serde_json::Value;

use crate::error::GatewayError;

/// Extract the contents of the first markdown code fence, if any.
///
/// Recognizes ```` ```json ````, ```` ```JSON ````, and bare ```` ``` ```` fences.
pub fn extract_json_block(text: &str) -> Option<String> {
    for marker in ["```json", "```JSON", "```"] {
        if let Some(start) = text.find(marker) {
            let content_start = start + marker.len();
            if let Some(end) = text[content_start..].find("```") {
                return Some(text[content_start..content_start + end].trim().to_string());
            }
        }
    }
    None
}

/// Locate a JSON object or array inside text that may contain surrounding
/// prose: markdown fences first, then the first `{`/`[` with a matching
/// closer.
pub fn extract_json_candidate(text: &str) -> Option<String> {
    let trimmed = text.trim();

    if let Some(block) = extract_json_block(trimmed) {
        return Some(block);
    }

    let idx = trimmed.find('{').into_iter().chain(trimmed.find('[')).min()?;
    let candidate = &trimmed[idx..];
    if serde_json::from_str::<Value>(candidate).is_ok() {
        return Some(candidate.to_string());
    }
    let close = if candidate.as_bytes()[0] == b'{' { '}' } else { ']' };
    if let Some(end) = candidate.rfind(close) {
        let substr = &candidate[..=end];
        if serde_json::from_str::<Value>(substr).is_ok() {
            return Some(substr.to_string());
        }
    }
    None
}

/// Parse model output into a JSON value, trying in order: direct parse,
/// embedded-JSON extraction, then deterministic repair of the best
/// candidate. Fails with [`GatewayError::InvalidResponse`] when no strategy
/// produces valid JSON.
pub fn parse_structured(text: &str) -> Result<Value, GatewayError> {
    let trimmed = text.trim();

    if let Ok(value) = serde_json::from_str::<Value>(trimmed) {
        return Ok(value);
    }

    if let Some(candidate) = extract_json_candidate(trimmed) {
        if let Ok(value) = serde_json::from_str::<Value>(&candidate) {
            return Ok(value);
        }
    }

    // Repair the most promising region: the fenced block if present,
    // otherwise everything from the first brace/bracket.
    let region = extract_json_block(trimmed).unwrap_or_else(|| {
        match trimmed.find('{').into_iter().chain(trimmed.find('[')).min() {
            Some(idx) => trimmed[idx..].to_string(),
            None => trimmed.to_string(),
        }
    });
    if let Some(repaired) = try_repair_json(&region) {
        if let Ok(value) = serde_json::from_str::<Value>(&repaired) {
            return Ok(value);
        }
    }

    Err(GatewayError::InvalidResponse(format!(
        "no valid JSON in model output (truncated): {}",
        &trimmed[..trimmed.len().min(200)]
    )))
}

/// Attempt to fix common model JSON mistakes without another model call:
/// Python literals, trailing commas, single-quoted strings, and missing
/// closing brackets. Returns `None` when the result still fails to parse.
pub fn try_repair_json(broken: &str) -> Option<String> {
    if serde_json::from_str::<Value>(broken).is_ok() {
        return None;
    }
    let mut s = replace_python_literals(broken);
    s = replace_single_quotes(&s);
    s = remove_trailing_commas(&s);
    s = close_missing_brackets(&s);

    if serde_json::from_str::<Value>(&s).is_ok() {
        Some(s)
    } else {
        None
    }
}

/// Replace bare `True`/`False`/`None` outside of strings.
fn replace_python_literals(s: &str) -> String {
    let mut result = String::with_capacity(s.len());
    let chars: Vec<char> = s.chars().collect();
    let mut i = 0;
    let mut in_string = false;

    while i < chars.len() {
        let c = chars[i];
        if in_string {
            result.push(c);
            if c == '\\' && i + 1 < chars.len() {
                result.push(chars[i + 1]);
                i += 1;
            } else if c == '"' {
                in_string = false;
            }
            i += 1;
            continue;
        }
        if c == '"' {
            in_string = true;
            result.push(c);
            i += 1;
            continue;
        }
        let replaced = [("True", "true"), ("False", "false"), ("None", "null")]
            .iter()
            .find(|(lit, _)| {
                chars[i..].starts_with(&lit.chars().collect::<Vec<_>>()[..])
                    && !chars
                        .get(i + lit.len())
                        .is_some_and(|next| next.is_alphanumeric() || *next == '_')
                    && (i == 0 || !(chars[i - 1].is_alphanumeric() || chars[i - 1] == '_'))
            })
            .map(|(lit, json)| {
                result.push_str(json);
                lit.len()
            });
        match replaced {
            Some(len) => i += len,
            None => {
                result.push(c);
                i += 1;
            }
        }
    }
    result
}

/// Convert single-quoted strings to double-quoted, escaping interior quotes.
fn replace_single_quotes(s: &str) -> String {
    let mut result = String::with_capacity(s.len());
    let chars: Vec<char> = s.chars().collect();
    let mut i = 0;
    let mut in_double = false;

    while i < chars.len() {
        let c = chars[i];
        if in_double {
            result.push(c);
            if c == '\\' && i + 1 < chars.len() {
                result.push(chars[i + 1]);
                i += 1;
            } else if c == '"' {
                in_double = false;
            }
            i += 1;
            continue;
        }
        match c {
            '"' => {
                in_double = true;
                result.push(c);
                i += 1;
            }
            '\'' => {
                result.push('"');
                i += 1;
                while i < chars.len() && chars[i] != '\'' {
                    if chars[i] == '"' {
                        result.push('\\');
                    }
                    result.push(chars[i]);
                    i += 1;
                }
                result.push('"');
                i += 1; // closing quote
            }
            _ => {
                result.push(c);
                i += 1;
            }
        }
    }
    result
}

/// Remove commas directly preceding `}` or `]` (whitespace permitted).
fn remove_trailing_commas(s: &str) -> String {
    let mut result = String::with_capacity(s.len());
    let chars: Vec<char> = s.chars().collect();
    let mut in_string = false;

    for (i, &c) in chars.iter().enumerate() {
        if in_string {
            result.push(c);
            if c == '"' && chars.get(i.wrapping_sub(1)) != Some(&'\\') {
                in_string = false;
            }
            continue;
        }
        if c == '"' {
            in_string = true;
            result.push(c);
            continue;
        }
        if c == ',' {
            let next_meaningful = chars[i + 1..].iter().find(|ch| !ch.is_whitespace());
            if matches!(next_meaningful, Some('}') | Some(']')) {
                continue;
            }
        }
        result.push(c);
    }
    result
}

/// Append closing brackets/braces for any left unbalanced outside strings.
fn close_missing_brackets(s: &str) -> String {
    let mut stack = Vec::new();
    let mut in_string = false;
    let mut prev = '\0';

    for c in s.chars() {
        if in_string {
            if c == '"' && prev != '\\' {
                in_string = false;
            }
            prev = c;
            continue;
        }
        match c {
            '"' => in_string = true,
            '{' => stack.push('}'),
            '[' => stack.push(']'),
            '}' | ']' => {
                if stack.last() == Some(&c) {
                    stack.pop();
                }
            }
            _ => {}
        }
        prev = c;
    }

    if stack.is_empty() {
        return s.to_string();
    }
    let mut result = s.trim_end().to_string();
    while let Some(close) = stack.pop() {
        result.push(close);
    }
    result
}
