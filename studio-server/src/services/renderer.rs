//! Contract body rendering
//!
//! A minimal, expression-free templating micro-language:
//! - `{{#if name}}...{{/if}}` and `{{#unless name}}...{{/unless}}` blocks
//!   evaluated on the truthiness of the named variable
//! - `{{name}}` token substitution
//!
//! Implemented as a two-pass scanner: conditional blocks are resolved first
//! (innermost via recursion), then remaining tokens are substituted. Unknown
//! tokens render as the empty string so a missing optional field never blocks
//! contract generation. Rendering cannot fail.

use serde_json::{Map, Value};

/// Render a template body against a variables map
pub fn render_body(body: &str, variables: &Map<String, Value>) -> String {
    let resolved = resolve_conditionals(body, variables);
    substitute_tokens(&resolved, variables)
}

/// Truthiness of a variable for conditional blocks.
///
/// Absent, null, false, 0, "", "false" and "0" are falsy; everything else
/// (including non-empty arrays/objects) is truthy.
fn is_truthy(variables: &Map<String, Value>, name: &str) -> bool {
    match variables.get(name) {
        None | Some(Value::Null) => false,
        Some(Value::Bool(b)) => *b,
        Some(Value::Number(n)) => n.as_f64().map(|f| f != 0.0).unwrap_or(true),
        Some(Value::String(s)) => {
            let s = s.trim();
            !s.is_empty() && s != "false" && s != "0"
        }
        Some(Value::Array(a)) => !a.is_empty(),
        Some(Value::Object(o)) => !o.is_empty(),
    }
}

/// One conditional opener found in the body
struct Opener {
    start: usize,
    inner_start: usize,
    negate: bool,
    name: String,
}

/// Find the first `{{#if name}}` or `{{#unless name}}` at or after `from`
fn find_opener(body: &str, from: usize) -> Option<Opener> {
    let mut pos = from;
    while let Some(rel) = body[pos..].find("{{#") {
        let start = pos + rel;
        let rest = &body[start..];
        let (negate, tag_len) = if rest.starts_with("{{#if ") {
            (false, "{{#if ".len())
        } else if rest.starts_with("{{#unless ") {
            (true, "{{#unless ".len())
        } else {
            pos = start + 3;
            continue;
        };
        let close = rest.find("}}")?;
        if close < tag_len {
            pos = start + 3;
            continue;
        }
        let name = rest[tag_len..close].trim().to_string();
        return Some(Opener {
            start,
            inner_start: start + close + 2,
            negate,
            name,
        });
    }
    None
}

/// Find the close tag matching an opener, accounting for nested blocks.
/// Returns (inner_end, after_close).
fn find_matching_close(body: &str, inner_start: usize) -> Option<(usize, usize)> {
    let mut depth = 1usize;
    let mut pos = inner_start;
    while pos < body.len() {
        let rest = &body[pos..];
        let next_open = rest
            .find("{{#if ")
            .into_iter()
            .chain(rest.find("{{#unless "))
            .min();
        let next_close = rest
            .find("{{/if}}")
            .map(|i| (i, "{{/if}}".len()))
            .into_iter()
            .chain(rest.find("{{/unless}}").map(|i| (i, "{{/unless}}".len())))
            .min_by_key(|(i, _)| *i);

        match (next_open, next_close) {
            (Some(open_at), Some((close_at, _))) if open_at < close_at => {
                depth += 1;
                pos += open_at + 3;
            }
            (_, Some((close_at, close_len))) => {
                depth -= 1;
                if depth == 0 {
                    return Some((pos + close_at, pos + close_at + close_len));
                }
                pos += close_at + close_len;
            }
            _ => return None,
        }
    }
    None
}

/// Pass 1: strip or keep conditional blocks by variable truthiness
fn resolve_conditionals(body: &str, variables: &Map<String, Value>) -> String {
    let mut output = String::with_capacity(body.len());
    let mut pos = 0;

    while let Some(opener) = find_opener(body, pos) {
        output.push_str(&body[pos..opener.start]);

        match find_matching_close(body, opener.inner_start) {
            Some((inner_end, after_close)) => {
                let keep = is_truthy(variables, &opener.name) != opener.negate;
                if keep {
                    let inner = &body[opener.inner_start..inner_end];
                    output.push_str(&resolve_conditionals(inner, variables));
                }
                pos = after_close;
            }
            None => {
                // Unterminated block: render the opener literally
                output.push_str(&body[opener.start..opener.inner_start]);
                pos = opener.inner_start;
            }
        }
    }

    output.push_str(&body[pos..]);
    output
}

/// Render one bound value as text
fn format_value(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        Value::Array(items) => items
            .iter()
            .map(format_value)
            .collect::<Vec<_>>()
            .join(", "),
        Value::Object(_) => value.to_string(),
    }
}

/// Pass 2: substitute remaining `{{name}}` tokens
fn substitute_tokens(body: &str, variables: &Map<String, Value>) -> String {
    let mut output = String::with_capacity(body.len());
    let mut pos = 0;

    while let Some(rel) = body[pos..].find("{{") {
        let start = pos + rel;
        output.push_str(&body[pos..start]);

        match body[start..].find("}}") {
            Some(close) => {
                let name = body[start + 2..start + close].trim();
                // Leftover block markers (e.g. from an unterminated block)
                // are not substitutable names
                if name.starts_with('#') || name.starts_with('/') {
                    output.push_str(&body[start..start + close + 2]);
                } else if let Some(value) = variables.get(name) {
                    output.push_str(&format_value(value));
                }
                // Unknown token: empty string, never an error
                pos = start + close + 2;
            }
            None => {
                // Dangling braces render literally
                output.push_str(&body[start..]);
                return output;
            }
        }
    }

    output.push_str(&body[pos..]);
    output
}
