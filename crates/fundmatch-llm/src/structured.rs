//! Structured-output helper for prompt-and-parse call sites
//!
//! Model responses routinely arrive wrapped in markdown fences or with prose
//! around the JSON payload. Every consumer goes through
//! [`generate_structured`]: fence stripping and JSON-span isolation happen
//! here, the caller supplies only a parser and a conservative fallback.

use tracing::warn;

use crate::{GenerateOptions, TextGenerator};

/// Remove a surrounding ``` / ```json fence if present.
pub fn strip_markdown_fences(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };

    // Drop the info string ("json", "text", ...) on the opening fence line
    let rest = match rest.find('\n') {
        Some(idx) => &rest[idx + 1..],
        None => rest,
    };

    rest.strip_suffix("```").unwrap_or(rest).trim()
}

/// First balanced `{...}` span in the text, honoring string literals.
pub fn extract_json_span(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let bytes = text.as_bytes();

    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, &b) in bytes[start..].iter().enumerate() {
        if in_string {
            if escaped {
                escaped = false;
            } else if b == b'\\' {
                escaped = true;
            } else if b == b'"' {
                in_string = false;
            }
            continue;
        }

        match b {
            b'"' => in_string = true,
            b'{' => depth += 1,
            b'}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..start + offset + 1]);
                }
            }
            _ => {}
        }
    }

    None
}

/// Generate and parse a structured response.
///
/// Call failures and parse failures both resolve to `fallback`; the pipeline
/// never aborts because one model call produced garbage.
pub async fn generate_structured<T, F>(
    generator: &dyn TextGenerator,
    prompt: &str,
    opts: &GenerateOptions,
    parser: F,
    fallback: T,
) -> T
where
    F: Fn(&str) -> Option<T>,
{
    match generator.generate(prompt, opts).await {
        Ok(text) => {
            let cleaned = strip_markdown_fences(&text);
            let span = extract_json_span(cleaned).unwrap_or(cleaned);
            match parser(span) {
                Some(value) => value,
                None => {
                    warn!(response_chars = text.len(), "structured response unparsable, using fallback");
                    fallback
                }
            }
        }
        Err(e) => {
            warn!(error = %e, "generation failed, using fallback");
            fallback
        }
    }
}
