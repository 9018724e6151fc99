//! Staged recovery of malformed model responses into valid JSON.
//!
//! The model routinely breaks strict JSON in two ways: LaTeX commands are
//! emitted with single backslashes, and SVG markup attributes use double
//! quotes that terminate the surrounding JSON string. Each stage below is
//! only attempted when the previous stage fails to parse, getting more
//! aggressive about rewriting backslashes as it goes.

use crate::models::question::{QuestionPayload, RagQuestionPayload};
use crate::utils::validation::is_choice_type;
use regex::Regex;
use serde_json::Value as JsonValue;
use std::sync::OnceLock;

/// LaTeX command vocabulary whose single-backslash occurrences are doubled
/// so the command survives JSON unescaping as one logical backslash.
const LATEX_COMMANDS: [&str; 27] = [
    "frac", "sqrt", "text", "mathrm", "times", "cdot", "pi", "alpha", "beta", "gamma", "theta",
    "phi", "lambda", "delta", "omega", "sigma", "mu", "nu", "tau", "left", "right", "bigg",
    "Bigg", "big", "Big", "overline", "underline",
];

/// Characters that may legally follow a backslash inside a JSON string.
const JSON_ESCAPE_CHARS: [u8; 8] = [b'\\', b'"', b'/', b'b', b'f', b'n', b'r', b't'];

#[derive(Debug, thiserror::Error)]
pub enum RepairError {
    #[error("no JSON found in model response")]
    NoJson,
    #[error("JSON unrecoverable after all repair stages (line {line}, column {column})")]
    Unrecoverable { line: usize, column: usize },
    #[error("expected {expected} choices, got {got}")]
    ChoiceCount { expected: usize, got: usize },
    #[error("unexpected response shape: {0}")]
    Shape(String),
}

fn markup_attr_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#"([a-zA-Z-]+)="([^"]*)""#).expect("markup attribute regex"))
}

/// Stage 1: isolate the JSON block from surrounding prose or code fences.
fn extract_json_block(raw: &str) -> Result<String, RepairError> {
    let content = raw.trim();

    if let Some(start) = content.find("```json") {
        let after = &content[start + 7..];
        let inner = match after.find("```") {
            Some(end) => &after[..end],
            None => after,
        };
        return Ok(inner.trim().to_string());
    }
    if content.contains("```") {
        let mut parts = content.splitn(3, "```");
        let _before = parts.next();
        if let Some(inner) = parts.next() {
            return Ok(inner.trim().to_string());
        }
    }
    if content.starts_with('{') || content.starts_with('[') {
        return Ok(content.to_string());
    }

    let start = content.find('{').ok_or(RepairError::NoJson)?;
    let end = content.rfind('}').ok_or(RepairError::NoJson)?;
    if end < start {
        return Err(RepairError::NoJson);
    }
    Ok(content[start..=end].to_string())
}

/// Rewrites `attr="value"` markup attributes to single-quoted form so
/// embedded SVG no longer terminates the enclosing JSON string. Quoted JSON
/// fields themselves never match: the pattern requires the quote to sit
/// directly against `name=`.
fn quote_markup_attributes(content: &str) -> String {
    markup_attr_regex()
        .replace_all(content, "$1='$2'")
        .into_owned()
}

/// True when `rest` begins with a LaTeX command token (word boundary) or a
/// backslash-wrapped delimiter.
fn latex_token_follows(rest: &str) -> bool {
    if let Some(first) = rest.chars().next() {
        if matches!(first, '(' | ')' | '[' | ']' | '{' | '}') {
            return true;
        }
    }
    LATEX_COMMANDS.iter().any(|cmd| {
        rest.starts_with(cmd)
            && !rest[cmd.len()..]
                .chars()
                .next()
                .is_some_and(|c| c.is_ascii_alphanumeric())
    })
}

/// Doubles every backslash that is exactly one deep and introduces a LaTeX
/// command or delimiter. Runs of two or more are left alone so re-running
/// the pass never escalates escaping (`\\frac` stays `\\frac`).
fn double_latex_commands(input: &str) -> String {
    let bytes = input.as_bytes();
    let mut out = String::with_capacity(input.len() + 16);
    let mut flushed = 0;
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] != b'\\' {
            i += 1;
            continue;
        }
        let start = i;
        let mut run = 1;
        while start + run < bytes.len() && bytes[start + run] == b'\\' {
            run += 1;
        }
        if run == 1 && latex_token_follows(&input[start + 1..]) {
            out.push_str(&input[flushed..=start]);
            out.push('\\');
            flushed = start + 1;
        }
        i = start + run;
    }
    out.push_str(&input[flushed..]);
    out
}

/// Doubles any isolated single backslash not followed by a valid JSON
/// escape character. Runs of two or more are already escape sequences and
/// must pass through untouched, so doubling only fires when the run length
/// is exactly 1; re-running the pass is a no-op.
fn double_unescaped_backslashes(input: &str) -> String {
    let bytes = input.as_bytes();
    let mut out = String::with_capacity(input.len() + 16);
    let mut flushed = 0;
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] != b'\\' {
            i += 1;
            continue;
        }
        let start = i;
        let mut run = 1;
        while start + run < bytes.len() && bytes[start + run] == b'\\' {
            run += 1;
        }
        if run == 1 {
            let escaped = bytes
                .get(start + 1)
                .is_some_and(|next| JSON_ESCAPE_CHARS.contains(next));
            if !escaped {
                out.push_str(&input[flushed..=start]);
                out.push('\\');
                flushed = start + 1;
            }
        }
        i = start + run;
    }
    out.push_str(&input[flushed..]);
    out
}

/// Collapses every backslash run of at least `min_run` down to `to`
/// backslashes. Guards against repeated reprocessing producing backslash
/// explosion.
fn collapse_backslash_runs(input: &str, min_run: usize, to: usize) -> String {
    let bytes = input.as_bytes();
    let mut out = String::with_capacity(input.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] != b'\\' {
            // Backslashes are ASCII, so byte scanning is UTF-8 safe; copy
            // everything up to the next backslash verbatim.
            let start = i;
            while i < bytes.len() && bytes[i] != b'\\' {
                i += 1;
            }
            out.push_str(&input[start..i]);
            continue;
        }
        let mut run = 1;
        while i + run < bytes.len() && bytes[i + run] == b'\\' {
            run += 1;
        }
        let keep = if run >= min_run { to } else { run };
        for _ in 0..keep {
            out.push('\\');
        }
        i += run;
    }
    out
}

/// Stage 2: targeted normalization.
fn primary_normalize(block: &str) -> String {
    let content = quote_markup_attributes(block);
    let content = double_latex_commands(&content);
    collapse_backslash_runs(&content, 8, 4)
}

/// Stage 3: broader normalization applied when stage 2 output still fails
/// to parse.
fn backup_normalize(block: &str) -> String {
    let content = quote_markup_attributes(block);
    let content = double_unescaped_backslashes(&content);
    let content = double_latex_commands(&content);
    let content = collapse_backslash_runs(&content, 6, 2);
    // Groups of four collapse to two, left to right.
    content.replace("\\\\\\\\", "\\\\")
}

/// Stage 4: blunt global substitution, quadruple then triple runs to double.
fn final_fallback(block: &str) -> String {
    quote_markup_attributes(block)
        .replace("\\\\\\\\", "\\\\")
        .replace("\\\\\\", "\\\\")
}

/// Runs the full staged pipeline and returns the first successful parse.
/// The error carries the line/column of the stage-2 parse failure, which is
/// the most informative diagnostic for the raw response.
pub fn recover_json(raw: &str) -> Result<JsonValue, RepairError> {
    let block = extract_json_block(raw)?;

    let first_err = match serde_json::from_str(&primary_normalize(&block)) {
        Ok(value) => return Ok(value),
        Err(err) => err,
    };
    tracing::debug!(
        line = first_err.line(),
        column = first_err.column(),
        "primary repair pass failed, trying backup normalization"
    );

    if let Ok(value) = serde_json::from_str::<JsonValue>(&backup_normalize(&block)) {
        return Ok(value);
    }
    tracing::debug!("backup repair pass failed, trying final fallback");

    if let Ok(value) = serde_json::from_str::<JsonValue>(&final_fallback(&block)) {
        return Ok(value);
    }

    Err(RepairError::Unrecoverable {
        line: first_err.line(),
        column: first_err.column(),
    })
}

/// Parses a single-question response. `expected_choice_count` is 5 for the
/// single/bulk flows; a mismatch is a soft validation failure, not a parse
/// error.
pub fn parse_question(
    raw: &str,
    expected_choice_count: usize,
) -> Result<QuestionPayload, RepairError> {
    let value = recover_json(raw)?;
    let payload: QuestionPayload =
        serde_json::from_value(value).map_err(|e| RepairError::Shape(e.to_string()))?;

    if payload
        .question_type
        .as_deref()
        .is_some_and(is_choice_type)
    {
        let got = payload.choices.as_ref().map_or(0, Vec::len);
        if got != expected_choice_count {
            return Err(RepairError::ChoiceCount {
                expected: expected_choice_count,
                got,
            });
        }
    }
    Ok(payload)
}

/// Parses the batch array returned by the RAG flow. Per-row choice checks
/// happen during post-processing so one bad row does not discard the batch.
pub fn parse_question_batch(raw: &str) -> Result<Vec<RagQuestionPayload>, RepairError> {
    let value = recover_json(raw)?;
    let rows = value
        .as_array()
        .ok_or_else(|| RepairError::Shape("model response is not a JSON array".to_string()))?;

    rows.iter()
        .map(|row| {
            serde_json::from_value(row.clone()).map_err(|e| RepairError::Shape(e.to_string()))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn well_formed_json_passes_unchanged() {
        let raw = r#"{"question_text": "Compute \\frac{1}{2}", "question_type": "단답형", "correct_answer": "0.5", "answer_explanation": "half", "svg_code": null}"#;
        let payload = parse_question(raw, 5).unwrap();
        assert_eq!(
            payload.question_text.as_deref(),
            Some("Compute \\frac{1}{2}")
        );
        assert!(payload.svg_content.is_none());
    }

    #[test]
    fn single_backslash_latex_is_recovered() {
        // Model output with raw single backslashes, illegal in strict JSON.
        let raw = "{\"question_text\": \"Find \\frac{1}{2} + \\frac{1}{3}\", \"question_type\": \"단답형\", \"correct_answer\": \"5/6\", \"answer_explanation\": \"공통분모는 6입니다\"}";
        let payload = parse_question(raw, 5).unwrap();
        let text = payload.question_text.unwrap();
        assert!(text.contains("\\frac{1}{2}"));
        assert!(!text.contains("\\\\frac"));
    }

    #[test]
    fn latex_doubling_is_idempotent() {
        let input = "{\"a\": \"\\\\frac{1}{2} and \\\\sqrt{2}\"}";
        let once = double_latex_commands(input);
        let twice = double_latex_commands(&once);
        assert_eq!(input, once);
        assert_eq!(once, twice);
    }

    #[test]
    fn svg_attributes_rewritten_without_touching_json_fields() {
        let raw = "{\"question_type\": \"선택형\", \"svg_code\": \"<svg viewBox='0 0 400 300'><line stroke=\"#000\" stroke-width=\"2\"/></svg>\", \"question_text\": \"그림의 삼각형을 보시오\", \"choices\": [\"① 1\", \"② 2\", \"③ 3\", \"④ 4\", \"⑤ 5\"], \"correct_answer\": \"①\", \"answer_explanation\": \"각을 비교한다\"}";
        let payload = parse_question(raw, 5).unwrap();
        let svg = payload.svg_content.unwrap();
        assert!(svg.contains("stroke='#000'"));
        assert!(svg.contains("stroke-width='2'"));
        assert_eq!(payload.question_type.as_deref(), Some("선택형"));
    }

    #[test]
    fn svg_code_field_renamed_to_svg_content() {
        let raw = r#"{"question_text": "원의 넓이를 구하시오", "question_type": "단답형", "correct_answer": 4, "answer_explanation": "반지름이 2이므로", "svg_code": "<svg viewBox='0 0 300 200'></svg>"}"#;
        let payload = parse_question(raw, 5).unwrap();
        assert!(payload.svg_content.unwrap().starts_with("<svg"));
    }

    #[test]
    fn fenced_response_is_extracted() {
        let raw = "Here is the question:\n```json\n{\"question_text\": \"1 + 1 = ?\", \"question_type\": \"단답형\", \"correct_answer\": 2, \"answer_explanation\": \"더하면 2\"}\n```\nDone.";
        let payload = parse_question(raw, 5).unwrap();
        assert_eq!(payload.question_text.as_deref(), Some("1 + 1 = ?"));
    }

    #[test]
    fn prose_wrapped_braces_are_sliced() {
        let raw = "물론입니다! {\"question_text\": \"2 x 3?\", \"question_type\": \"단답형\", \"correct_answer\": 6, \"answer_explanation\": \"곱하면 6\"} 입니다.";
        assert!(parse_question(raw, 5).is_ok());
    }

    #[test]
    fn missing_braces_fail_without_panicking() {
        let err = recover_json("the model refused to answer").unwrap_err();
        assert!(matches!(err, RepairError::NoJson));
    }

    #[test]
    fn backup_pass_doubles_stray_backslashes() {
        // `\ ` is not fixed by the LaTeX pass but is by the broad pass.
        let raw = "{\"question_text\": \"집합 A \\cup B 에 대하여 답하시오\", \"question_type\": \"단답형\", \"correct_answer\": 1, \"answer_explanation\": \"합집합의 원소를 센다\"}";
        let payload = parse_question(raw, 5).unwrap();
        assert!(payload.question_text.unwrap().contains("\\cup"));
    }

    #[test]
    fn backup_pass_preserves_correct_escapes() {
        // One stray `\q` forces the broad pass; the already-correct
        // `\\sqrt` next to it must come through untouched.
        let raw = "{\"question_text\": \"Simplify \\\\sqrt{2} + \\q\", \"question_type\": \"단답형\", \"correct_answer\": 1, \"answer_explanation\": \"근호를 정리한다\"}";
        let payload = parse_question(raw, 5).unwrap();
        let text = payload.question_text.unwrap();
        assert!(text.contains("\\sqrt{2}"));
        assert!(!text.contains("\\\\sqrt"));
        assert!(text.contains("\\q"));
    }

    #[test]
    fn broad_doubling_only_touches_isolated_backslashes() {
        assert_eq!(double_unescaped_backslashes("a\\qb"), "a\\\\qb");
        assert_eq!(double_unescaped_backslashes("a\\\\sqrt"), "a\\\\sqrt");
        assert_eq!(double_unescaped_backslashes("a\\\\alpha"), "a\\\\alpha");
        let once = double_unescaped_backslashes("a\\qb");
        assert_eq!(double_unescaped_backslashes(&once), once);
    }

    #[test]
    fn excessive_backslash_runs_collapse() {
        assert_eq!(collapse_backslash_runs("a\\\\\\\\\\\\\\\\\\\\b", 8, 4), "a\\\\\\\\b");
        assert_eq!(collapse_backslash_runs("a\\\\b", 8, 4), "a\\\\b");
    }

    #[test]
    fn final_fallback_collapses_triple_and_quadruple_runs() {
        assert_eq!(final_fallback("a\\\\\\\\b"), "a\\\\b");
        assert_eq!(final_fallback("a\\\\\\b"), "a\\\\b");
    }

    #[test]
    fn choice_count_mismatch_is_soft_failure() {
        let raw = r#"{"question_text": "다음 중 일차함수는?", "question_type": "선택형", "choices": ["① y=x", "② y=x^2", "③ y=1/x"], "correct_answer": "①", "answer_explanation": "일차항만 있는 함수"}"#;
        let err = parse_question(raw, 5).unwrap_err();
        assert!(matches!(
            err,
            RepairError::ChoiceCount {
                expected: 5,
                got: 3
            }
        ));
    }

    #[test]
    fn rag_batch_parses_four_choice_rows() {
        let raw = r#"```json
[
  {"assessmentItemID": "A001", "concept_name": "이차방정식", "question_text": "x^2 = 4 의 해는?", "choices": ["① 1", "② 2", "③ 3", "④ 4"], "answer": "②", "explanation": "제곱근을 취한다", "svg_content": null, "skip": false},
  {"assessmentItemID": "A002", "concept_name": "일차함수", "skip": true}
]
```"#;
        let rows = parse_question_batch(raw).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].assessment_item_id.as_deref(), Some("A001"));
        assert!(rows[1].skip);
    }

    #[test]
    fn rag_batch_rejects_non_array() {
        let raw = r#"{"question_text": "single object"}"#;
        assert!(matches!(
            parse_question_batch(raw),
            Err(RepairError::Shape(_))
        ));
    }
}
