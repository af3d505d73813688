//! Response handling: Analyzer text → validated [`ConversionResult`].
//!
//! Structured-output APIs return bare JSON, but chat-style providers often
//! wrap it anyway: a ```` ```json ```` fence, a BOM, a sentence of preamble.
//! These rules peel that wrapping off before parsing. They never touch the
//! JSON itself, so cell text reaches the serializer exactly as the model
//! produced it.
//!
//! Order matters: trim invisible characters first so the fence regex sees
//! the fence at the start of input, then fall back to the outermost object.

use crate::error::Pdf2CsvError;
use crate::model::ConversionResult;
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::debug;

static RE_OUTER_FENCES: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)^```(?:json|JSON)?[ \t]*\r?\n(.*?)\r?\n?```\s*$").unwrap());

const INVISIBLE: [char; 6] = [
    '\u{200B}', '\u{FEFF}', '\u{00AD}', '\u{200C}', '\u{200D}', '\u{2060}',
];

/// Parse and validate the Analyzer's answer.
///
/// # Errors
/// * [`Pdf2CsvError::MalformedResponse`]: blank text or invalid JSON/shape
/// * [`Pdf2CsvError::EmptyResult`]: valid JSON with no sections
pub fn parse_response(text: &str) -> Result<ConversionResult, Pdf2CsvError> {
    let body = extract_json(text);
    if body.is_empty() {
        return Err(Pdf2CsvError::MalformedResponse {
            detail: "empty response body".into(),
        });
    }

    let result: ConversionResult =
        serde_json::from_str(body).map_err(|e| Pdf2CsvError::MalformedResponse {
            detail: e.to_string(),
        })?;

    if result.is_empty() {
        return Err(Pdf2CsvError::EmptyResult);
    }

    debug!(
        "Parsed {} sections, {} rows",
        result.sections.len(),
        result.row_count()
    );
    Ok(result)
}

/// Strip wrapping around the JSON object.
fn extract_json(text: &str) -> &str {
    let trimmed = trim_invisible(text);

    let unfenced = match RE_OUTER_FENCES.captures(trimmed) {
        Some(caps) => caps.get(1).map_or(trimmed, |m| trim_invisible(m.as_str())),
        None => trimmed,
    };

    if unfenced.starts_with('{') {
        return unfenced;
    }

    // Preamble or trailing commentary: take the outermost object.
    match (unfenced.find('{'), unfenced.rfind('}')) {
        (Some(start), Some(end)) if start < end => &unfenced[start..=end],
        _ => unfenced,
    }
}

fn trim_invisible(s: &str) -> &str {
    s.trim_matches(|c: char| c.is_whitespace() || INVISIBLE.contains(&c))
}
