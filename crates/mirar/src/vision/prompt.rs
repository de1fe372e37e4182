//! Shared comparison prompt and response parsing.
//!
//! All providers send the same instructions and are parsed by the same
//! rules, so swapping providers never changes the contract. Responses that
//! fail to parse degrade to a zero-confidence result instead of erroring;
//! the hybrid engine then decides on pixel evidence alone.

use serde::Deserialize;
use tracing::debug;

use super::{AiDiffResult, VisionChange};

/// Build the comparison prompt sent alongside the two screenshots.
///
/// The first attached image is the baseline, the second the current
/// capture. The prompt pins the change taxonomy and demands bare JSON so
/// the response parses without post-processing.
#[must_use]
pub fn build_compare_prompt(context: Option<&str>) -> String {
    let mut prompt = String::from(
        "You are a visual regression analyst. The first image is the \
         approved baseline screenshot, the second is the current capture of \
         the same page. Decide whether they are meaningfully different to a \
         user. Ignore anti-aliasing, font rendering noise, and sub-pixel \
         shifts.\n\n\
         Respond with ONLY a JSON object, no prose and no code fences:\n\
         {\n\
           \"isDifferent\": boolean,\n\
           \"confidence\": number from 0 to 100,\n\
           \"changes\": [\n\
             {\n\
               \"type\": \"layout\" | \"color\" | \"content\" | \"missing\" | \"added\",\n\
               \"description\": string,\n\
               \"severity\": \"low\" | \"medium\" | \"high\",\n\
               \"region\": {\"x\": int, \"y\": int, \"width\": int, \"height\": int} (optional)\n\
             }\n\
           ],\n\
           \"explanation\": string\n\
         }",
    );
    if let Some(context) = context {
        prompt.push_str("\n\nPage context: ");
        prompt.push_str(context);
    }
    prompt
}

/// Shape the model is asked to produce; timing and token fields are filled
/// in locally
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawVerdict {
    is_different: bool,
    confidence: f64,
    #[serde(default)]
    changes: Vec<VisionChange>,
    #[serde(default)]
    explanation: String,
}

/// Parse a provider response into an [`AiDiffResult`].
///
/// Providers are told not to wrap the JSON, but models wrap anyway, so the
/// parser takes the outermost brace-delimited slice before deserializing.
/// Anything that still fails to parse degrades to
/// [`AiDiffResult::degraded`] with a "parse failed" explanation.
#[must_use]
pub fn parse_response(
    content: &str,
    model: &str,
    tokens_used: u32,
    processing_time_ms: u64,
) -> AiDiffResult {
    let Some(json) = extract_json(content) else {
        debug!("Vision response from {model} contained no JSON object");
        return degraded_with_meta(model, tokens_used, processing_time_ms);
    };

    match serde_json::from_str::<RawVerdict>(json) {
        Ok(verdict) => AiDiffResult {
            is_different: verdict.is_different,
            confidence: verdict.confidence.clamp(0.0, 100.0),
            changes: verdict.changes,
            explanation: verdict.explanation,
            tokens_used,
            processing_time_ms,
            model: Some(model.to_string()),
        },
        Err(e) => {
            debug!("Vision response from {model} did not parse: {e}");
            degraded_with_meta(model, tokens_used, processing_time_ms)
        }
    }
}

fn degraded_with_meta(model: &str, tokens_used: u32, processing_time_ms: u64) -> AiDiffResult {
    let mut result = AiDiffResult::degraded("parse failed");
    result.model = Some(model.to_string());
    result.tokens_used = tokens_used;
    result.processing_time_ms = processing_time_ms;
    result
}

/// Slice out the outermost `{...}` span, tolerating code fences and prose
/// around it
fn extract_json(content: &str) -> Option<&str> {
    let start = content.find('{')?;
    let end = content.rfind('}')?;
    if end < start {
        return None;
    }
    Some(&content[start..=end])
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::vision::{ChangeType, Severity};

    #[test]
    fn prompt_pins_taxonomy_and_bare_json() {
        let prompt = build_compare_prompt(None);
        for word in ["layout", "color", "content", "missing", "added"] {
            assert!(prompt.contains(word), "taxonomy word {word} missing");
        }
        assert!(prompt.contains("ONLY a JSON object"));
        assert!(prompt.contains("isDifferent"));
    }

    #[test]
    fn prompt_appends_context_when_given() {
        let prompt = build_compare_prompt(Some("checkout page, EUR locale"));
        assert!(prompt.contains("checkout page, EUR locale"));
        assert!(!build_compare_prompt(None).contains("Page context"));
    }

    #[test]
    fn parses_bare_json() {
        let raw = r#"{
            "isDifferent": true,
            "confidence": 92,
            "changes": [
                {"type": "missing", "description": "CTA button gone", "severity": "high"}
            ],
            "explanation": "The checkout button is absent."
        }"#;
        let result = parse_response(raw, "gpt-4o", 640, 1200);
        assert!(result.is_different);
        assert!((result.confidence - 92.0).abs() < f64::EPSILON);
        assert_eq!(result.changes.len(), 1);
        assert_eq!(result.changes[0].change_type, ChangeType::Missing);
        assert_eq!(result.changes[0].severity, Severity::High);
        assert_eq!(result.tokens_used, 640);
        assert_eq!(result.model.as_deref(), Some("gpt-4o"));
    }

    #[test]
    fn parses_fenced_json() {
        let raw = "Here is my analysis:\n```json\n{\"isDifferent\": false, \"confidence\": 75, \"changes\": [], \"explanation\": \"same\"}\n```";
        let result = parse_response(raw, "gpt-4o", 0, 0);
        assert!(!result.is_different);
        assert!((result.confidence - 75.0).abs() < f64::EPSILON);
        assert_eq!(result.explanation, "same");
    }

    #[test]
    fn garbage_degrades_instead_of_erroring() {
        let result = parse_response("I cannot compare these images.", "gpt-4o", 12, 300);
        assert!(!result.is_different);
        assert!((result.confidence - 0.0).abs() < f64::EPSILON);
        assert_eq!(result.explanation, "parse failed");
        assert_eq!(result.tokens_used, 12);
        assert_eq!(result.processing_time_ms, 300);
    }

    #[test]
    fn truncated_json_degrades() {
        let result = parse_response("{\"isDifferent\": true, \"confi", "groq", 0, 0);
        assert_eq!(result.explanation, "parse failed");
    }

    #[test]
    fn confidence_is_clamped_to_percent_range() {
        let raw = r#"{"isDifferent": true, "confidence": 250, "changes": [], "explanation": "x"}"#;
        let result = parse_response(raw, "m", 0, 0);
        assert!((result.confidence - 100.0).abs() < f64::EPSILON);
    }

    #[test]
    fn missing_optional_fields_default() {
        let raw = r#"{"isDifferent": false, "confidence": 50}"#;
        let result = parse_response(raw, "m", 0, 0);
        assert!(result.changes.is_empty());
        assert_eq!(result.explanation, "");
    }
}
