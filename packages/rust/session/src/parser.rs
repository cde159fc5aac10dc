//! Response parser.
//!
//! Session replies are rarely clean JSON: answers embed unescaped quotes,
//! arrays carry trailing commas, strings get truncated mid-value, and some
//! replies abandon JSON entirely for hand-written "**Pergunta 1:**" markup.
//! Parsing runs in two stages — a structured pass over brace-delimited
//! fragments with a bounded repair loop, then a labeled-block fallback —
//! and always normalizes to [`ResponseBody`]. Deterministic throughout.

use std::sync::LazyLock;

use regex::{Regex, RegexBuilder};
use tracing::debug;

use qaforge_shared::{QaPair, RawResponse, ResponseBody};

/// Brace-delimited object bodies inside free text (lazy, dot-matches-newline).
static OBJECT_BODY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)\{(.*?)\}").expect("object body regex compiles"));

/// Trailing comma immediately before a closing brace.
static TRAILING_COMMA: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r",\s*\}").expect("trailing comma regex compiles"));

/// Numbered bold labels: `**Pergunta 1:**` / `**Resposta 1:**`.
static NUMBERED_LABEL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\*\*(Pergunta|Resposta) \d+:\*\*").expect("numbered label regex compiles")
});

/// Plain label variants: `pergunta:` / `**Resposta:**` in any casing.
static PLAIN_LABEL: LazyLock<Regex> = LazyLock::new(|| {
    RegexBuilder::new(r"(?:\*\*)?(pergunta|resposta)\s*:(?:\*\*)?")
        .case_insensitive(true)
        .build()
        .expect("plain label regex compiles")
});

/// Repair attempts per fragment before giving up on it.
const MAX_REPAIRS: usize = 4;

/// Parse a full session response into its normalized body.
pub fn parse_response(raw: &RawResponse) -> ResponseBody {
    let pairs = if raw.json_fragments.is_empty() {
        parse(&raw.text)
    } else {
        let structured = structured_pass(raw.json_fragments.iter().map(String::as_str));
        match structured {
            StructuredOutcome::Pairs(pairs) => pairs,
            StructuredOutcome::Mismatch | StructuredOutcome::Nothing => fallback_pass(&raw.text),
        }
    };

    if !pairs.is_empty() {
        ResponseBody::StructuredList(pairs)
    } else if raw.text.trim().is_empty() {
        ResponseBody::Empty
    } else {
        ResponseBody::FreeText(raw.text.clone())
    }
}

/// Parse free text: structured pass over embedded JSON-ish fragments, then
/// the labeled-block fallback on zero pairs or a question/answer mismatch.
pub fn parse(text: &str) -> Vec<QaPair> {
    match structured_pass(std::iter::once(text)) {
        StructuredOutcome::Pairs(pairs) => pairs,
        StructuredOutcome::Mismatch | StructuredOutcome::Nothing => fallback_pass(text),
    }
}

// ---------------------------------------------------------------------------
// Structured pass
// ---------------------------------------------------------------------------

enum StructuredOutcome {
    /// Both keys present in every decoded object.
    Pairs(Vec<QaPair>),
    /// Objects decoded but question/answer counts disagree.
    Mismatch,
    /// No fragment decoded to anything usable.
    Nothing,
}

fn structured_pass<'a>(fragments: impl Iterator<Item = &'a str>) -> StructuredOutcome {
    let mut pairs = Vec::new();
    let mut questions = 0usize;
    let mut answers = 0usize;

    for fragment in fragments {
        for caps in OBJECT_BODY.captures_iter(fragment) {
            let body = &caps[1];
            let Some(value) = decode_with_repair(body) else {
                continue;
            };

            let objects: Vec<serde_json::Value> = match value {
                serde_json::Value::Array(items) => items,
                other => vec![other],
            };

            for object in objects {
                let question = object.get("pergunta").and_then(|v| v.as_str());
                let answer = object.get("resposta").and_then(|v| v.as_str());
                questions += usize::from(question.is_some());
                answers += usize::from(answer.is_some());

                if let (Some(question), Some(answer)) = (question, answer) {
                    pairs.push(QaPair {
                        question: question.to_string(),
                        answer: answer.to_string(),
                    });
                }
            }
        }
    }

    if pairs.is_empty() {
        StructuredOutcome::Nothing
    } else if questions != answers {
        debug!(questions, answers, "structured pass count mismatch");
        StructuredOutcome::Mismatch
    } else {
        StructuredOutcome::Pairs(pairs)
    }
}

/// Decode one object body, repairing the malformations the sessions are
/// known to produce. Returns `None` when the body stays undecodable.
fn decode_with_repair(body: &str) -> Option<serde_json::Value> {
    let mut body = escape_value_quotes(body.trim());

    for _ in 0..MAX_REPAIRS {
        let candidate = format!("{{{body}}}");
        let candidate = TRAILING_COMMA.replace_all(&candidate, "}").into_owned();

        match serde_json::from_str(&candidate) {
            Ok(value) => return Some(value),
            Err(e) => {
                let message = e.to_string();
                if message.contains("EOF while parsing a string") {
                    // Truncated value: close the string and retry.
                    body.push('"');
                } else if message.contains("invalid escape") {
                    body = body.replace('\\', "");
                } else {
                    debug!(error = %message, "fragment not repairable");
                    return None;
                }
            }
        }
    }

    None
}

/// Escape unescaped quotes inside the `pergunta`/`resposta` value spans.
fn escape_value_quotes(body: &str) -> String {
    let mut out = body.to_string();
    for key in ["pergunta", "resposta"] {
        out = escape_one_value(&out, key);
    }
    out
}

fn escape_one_value(body: &str, key: &str) -> String {
    let marker = format!("\"{key}\"");
    let Some(key_pos) = body.find(&marker) else {
        return body.to_string();
    };

    // Walk past `"key"` and `:` to the opening quote of the value.
    let rest = &body[key_pos + marker.len()..];
    let Some(colon) = rest.find(':') else {
        return body.to_string();
    };
    let after_colon = &rest[colon + 1..];
    let trimmed = after_colon.trim_start();
    if !trimmed.starts_with('"') {
        return body.to_string();
    }
    let leading_ws = after_colon.len() - trimmed.len();
    let value_start = key_pos + marker.len() + colon + 1 + leading_ws + 1;

    // The value span ends at the last quote before the next key (or the end
    // of the body for the final value).
    let tail = &body[value_start..];
    let segment_end = ["\"pergunta\"", "\"resposta\""]
        .iter()
        .filter_map(|m| tail.find(*m))
        .min()
        .unwrap_or(tail.len());
    let Some(closing) = tail[..segment_end].rfind('"') else {
        return body.to_string();
    };

    let inner = &tail[..closing];
    if !inner.contains('"') {
        return body.to_string();
    }

    // Normalize first so already-escaped quotes do not get double-escaped.
    let escaped = inner.replace("\\\"", "\"").replace('"', "\\\"");
    format!("{}{}{}", &body[..value_start], escaped, &tail[closing..])
}

// ---------------------------------------------------------------------------
// Fallback pass
// ---------------------------------------------------------------------------

fn fallback_pass(text: &str) -> Vec<QaPair> {
    let pairs = extract_labeled_blocks(text, &NUMBERED_LABEL);
    if !pairs.is_empty() {
        return pairs;
    }
    extract_labeled_blocks(text, &PLAIN_LABEL)
}

/// Slice the text between consecutive label markers and pair questions with
/// answers in encounter order. A count mismatch yields nothing.
fn extract_labeled_blocks(text: &str, label: &Regex) -> Vec<QaPair> {
    let mut questions = Vec::new();
    let mut answers = Vec::new();

    let markers: Vec<(bool, usize, usize)> = label
        .captures_iter(text)
        .map(|caps| {
            let m = caps.get(0).expect("whole match");
            let is_question = caps[1].eq_ignore_ascii_case("pergunta");
            (is_question, m.start(), m.end())
        })
        .collect();

    for (i, &(is_question, _, content_start)) in markers.iter().enumerate() {
        let content_end = markers
            .get(i + 1)
            .map(|&(_, next_start, _)| next_start)
            .unwrap_or(text.len());
        let content = text[content_start..content_end]
            .trim_matches(|c: char| c.is_whitespace() || c == '>')
            .to_string();

        if content.is_empty() {
            continue;
        }
        if is_question {
            questions.push(content);
        } else {
            answers.push(content);
        }
    }

    if questions.is_empty() || questions.len() != answers.len() {
        return Vec::new();
    }

    questions
        .into_iter()
        .zip(answers)
        .map(|(question, answer)| QaPair { question, answer })
        .collect()
}
