//! Turning the engine's message text into candidates.
//!
//! Accepted shapes, tried in order:
//! 1. `{"organizations": [...], "search_summary": "..."}`
//! 2. a bare array of organization objects
//! 3. the older flat single-organization object (`organization_name`,
//!    `key_personnel_*`, `contact_info`, `confidence_score`, ...)
//!
//! Anything else yields a [`ResearchResponse::Fallback`] with whatever could
//! be pulled out of the text.

use std::sync::LazyLock;

use prospector_shared::{Candidate, GeneralContact, PersonnelContact};
use regex::Regex;
use serde_json::{Map, Value};
use tracing::debug;

use crate::ResearchResponse;

/// Confidence given to a structured organization that carries no score.
pub const DEFAULT_STRUCTURED_CONFIDENCE: f64 = 0.7;

const PLACEHOLDERS: &[&str] = &[
    "",
    "-",
    "n/a",
    "na",
    "none",
    "null",
    "unknown",
    "not found",
    "not available",
    "not provided",
    "not specified",
    "no information",
    "tbd",
];

struct Interpreted {
    candidates: Vec<Candidate>,
    summary: Option<String>,
}

/// Parse the assistant message `content`, keeping at most `max_results`
/// candidates in the order the engine returned them.
pub fn parse_response(content: &str, max_results: usize) -> ResearchResponse {
    let body = strip_code_fences(content);

    match serde_json::from_str::<Value>(body) {
        Ok(value) => match interpret(&value) {
            Some(found) => ResearchResponse::Structured {
                candidates: truncate(found.candidates, max_results),
                summary: found.summary,
                raw: content.to_string(),
            },
            None => fallback(
                content,
                body,
                max_results,
                "JSON did not match the organizations shape".into(),
            ),
        },
        Err(e) => fallback(
            content,
            body,
            max_results,
            format!("response was not valid JSON: {e}"),
        ),
    }
}

fn fallback(raw: &str, body: &str, max_results: usize, reason: String) -> ResearchResponse {
    let (candidates, summary) = match embedded_json(body) {
        Some(found) => (found.candidates, found.summary),
        None => (extract_from_text(body).into_iter().collect(), None),
    };
    debug!(%reason, candidates = candidates.len(), "fallback extraction");

    ResearchResponse::Fallback {
        candidates: truncate(candidates, max_results),
        summary,
        reason,
        raw: raw.to_string(),
    }
}

fn truncate(mut candidates: Vec<Candidate>, max_results: usize) -> Vec<Candidate> {
    candidates.truncate(max_results);
    candidates
}

/// Strip a surrounding markdown code fence (```` ```json ... ``` ````).
fn strip_code_fences(content: &str) -> &str {
    static FENCE_RE: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(r"(?s)^```[A-Za-z0-9_-]*[ \t]*\r?\n?(.*?)\r?\n?```$").expect("valid regex")
    });

    let trimmed = content.trim();
    match FENCE_RE.captures(trimmed).and_then(|c| c.get(1)) {
        Some(inner) => inner.as_str().trim(),
        None => trimmed,
    }
}

fn interpret(value: &Value) -> Option<Interpreted> {
    match value {
        Value::Object(map) if map.contains_key("organizations") => {
            let candidates = match map.get("organizations") {
                Some(Value::Array(items)) => items.iter().filter_map(candidate_from_value).collect(),
                Some(Value::Null) => Vec::new(),
                _ => return None,
            };
            Some(Interpreted {
                candidates,
                summary: text_field(map, &["search_summary", "summary"]),
            })
        }
        Value::Array(items) => Some(Interpreted {
            candidates: items.iter().filter_map(candidate_from_value).collect(),
            summary: None,
        }),
        Value::Object(map) if map.contains_key("organization_name") || map.contains_key("name") => {
            Some(Interpreted {
                candidates: candidate_from_object(map).into_iter().collect(),
                summary: text_field(map, &["search_summary", "summary"]),
            })
        }
        _ => None,
    }
}

fn candidate_from_value(value: &Value) -> Option<Candidate> {
    value.as_object().and_then(candidate_from_object)
}

fn candidate_from_object(map: &Map<String, Value>) -> Option<Candidate> {
    let name = text_field(map, &["name", "organization_name", "organization"])?;
    if is_no_organizations(&name) {
        return None;
    }

    let personnel = match map.get("key_personnel").or_else(|| map.get("personnel")) {
        Some(Value::Object(p)) => PersonnelContact {
            name: text_field(p, &["name"]),
            title: text_field(p, &["title", "role"]),
            phone: text_field(p, &["phone"]),
            email: text_field(p, &["email"]),
        },
        _ => PersonnelContact {
            name: text_field(map, &["key_personnel_name"]),
            title: text_field(map, &["key_personnel_title"]),
            phone: text_field(map, &["key_personnel_phone"]),
            email: text_field(map, &["key_personnel_email"]),
        },
    };

    let mut notes = text_field(map, &["notes", "additional_notes"]);
    let contact = match map.get("general_contact").or_else(|| map.get("contact")) {
        Some(Value::Object(c)) => contact_from_object(c),
        _ => match text_field(map, &["contact_info"]) {
            Some(info) => {
                let contact = contact_from_text(&info);
                if contact.is_empty() && notes.is_none() {
                    notes = Some(info);
                }
                contact
            }
            None => contact_from_object(map),
        },
    };

    let confidence = number_field(map, &["confidence", "confidence_score"])
        .map(normalize_confidence)
        .unwrap_or(DEFAULT_STRUCTURED_CONFIDENCE);

    Some(Candidate {
        name,
        description: text_field(map, &["description"]),
        personnel,
        contact,
        address: text_field(map, &["address"]),
        notes,
        confidence,
        source_urls: url_list(map.get("source_urls")),
        raw_evidence: text_field(map, &["ai_response_raw", "raw_evidence", "evidence"]),
    })
}

fn contact_from_object(map: &Map<String, Value>) -> GeneralContact {
    GeneralContact {
        phone: text_field(map, &["phone"]),
        email: text_field(map, &["email"]),
        website: text_field(map, &["website", "url"]),
    }
}

/// `contact_info` was free text, or a JSON-encoded contact object.
fn contact_from_text(info: &str) -> GeneralContact {
    if let Ok(Value::Object(map)) = serde_json::from_str::<Value>(info) {
        return contact_from_object(&map);
    }
    GeneralContact {
        phone: first_match(phone_re(), info),
        email: first_match(email_re(), info),
        website: first_match(url_re(), info),
    }
}

/// Best-effort extraction from prose: one candidate if an organization name
/// line is present.
fn extract_from_text(body: &str) -> Option<Candidate> {
    static NAME_RE: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(r"(?im)^[\s*#>-]*(?:organization(?:\s+name)?|name)\**\s*:\s*\**\s*(.+?)\s*\**\s*$")
            .expect("valid regex")
    });
    static CONFIDENCE_RE: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(r"(?i)confidence(?:\s+score)?\**\s*[:=]\s*\**\s*([0-9]*\.?[0-9]+)")
            .expect("valid regex")
    });

    let name = NAME_RE
        .captures(body)
        .and_then(|c| c.get(1))
        .and_then(|m| normalize(m.as_str()))?;
    if is_no_organizations(&name) {
        return None;
    }

    let confidence = CONFIDENCE_RE
        .captures(body)
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse::<f64>().ok())
        .map(normalize_confidence)
        .unwrap_or(0.0);

    let mut source_urls: Vec<String> = Vec::new();
    for m in url_re().find_iter(body) {
        let url = m.as_str().trim_end_matches('.').to_string();
        if !source_urls.contains(&url) {
            source_urls.push(url);
        }
    }

    Some(Candidate {
        name,
        contact: GeneralContact {
            phone: first_match(phone_re(), body),
            email: first_match(email_re(), body),
            website: source_urls.first().cloned(),
        },
        confidence,
        source_urls,
        raw_evidence: Some(body.to_string()),
        ..Default::default()
    })
}

/// JSON embedded in surrounding prose.
fn embedded_json(body: &str) -> Option<Interpreted> {
    static FENCED_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"(?s)```(?:json|JSON)?\s*(.*?)```").expect("valid regex"));

    let mut spans: Vec<&str> = FENCED_RE
        .captures_iter(body)
        .filter_map(|c| c.get(1))
        .map(|m| m.as_str())
        .collect();
    for (open, close) in [('{', '}'), ('[', ']')] {
        if let (Some(start), Some(end)) = (body.find(open), body.rfind(close)) {
            if start < end {
                spans.push(&body[start..=end]);
            }
        }
    }

    spans.into_iter().find_map(|span| {
        serde_json::from_str::<Value>(span)
            .ok()
            .and_then(|value| interpret(&value))
    })
}

fn email_re() -> &'static Regex {
    static RE: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(r"[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}").expect("valid regex")
    });
    &RE
}

fn phone_re() -> &'static Regex {
    static RE: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(r"\(?\b\d{3}\)?[\s.-]?\d{3}[.-]\d{4}\b").expect("valid regex")
    });
    &RE
}

fn url_re() -> &'static Regex {
    static RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r#"https?://[^\s)\]"'<>,]+"#).expect("valid regex"));
    &RE
}

fn first_match(re: &Regex, text: &str) -> Option<String> {
    re.find(text).map(|m| m.as_str().trim_end_matches('.').to_string())
}

/// First non-placeholder value among `keys`.
fn text_field(map: &Map<String, Value>, keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|key| match map.get(*key) {
        Some(Value::String(s)) => normalize(s),
        Some(Value::Number(n)) => Some(n.to_string()),
        _ => None,
    })
}

fn number_field(map: &Map<String, Value>, keys: &[&str]) -> Option<f64> {
    keys.iter().find_map(|key| match map.get(*key) {
        Some(Value::Number(n)) => n.as_f64(),
        Some(Value::String(s)) => s.trim().trim_end_matches('%').trim().parse().ok(),
        _ => None,
    })
}

fn url_list(value: Option<&Value>) -> Vec<String> {
    match value {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(Value::as_str)
            .filter_map(normalize)
            .collect(),
        Some(Value::String(s)) => normalize(s).into_iter().collect(),
        _ => Vec::new(),
    }
}

/// Trim `value`, mapping placeholder text to `None`.
pub fn normalize(value: &str) -> Option<String> {
    let trimmed = value.trim();
    let lower = trimmed.to_lowercase();
    if PLACEHOLDERS.contains(&lower.as_str()) {
        None
    } else {
        Some(trimmed.to_string())
    }
}

/// Scale percentages into `[0, 1]` and clamp everything else.
pub fn normalize_confidence(value: f64) -> f64 {
    if !value.is_finite() {
        return 0.0;
    }
    let scaled = if value > 1.0 && value <= 100.0 {
        value / 100.0
    } else {
        value
    };
    scaled.clamp(0.0, 1.0)
}

fn is_no_organizations(name: &str) -> bool {
    let lower = name.to_lowercase();
    lower.contains("no organizations found") || lower.contains("no organization found")
}
