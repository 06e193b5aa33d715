//! Parsers for cloud identification responses.
//!
//! Model output is JSON by request but arrives in degraded shapes often
//! enough that parsing is a cascade: strict array parse, then truncation
//! recovery, then a comma-separated plain-text fallback. Name guards and
//! a per-response repeat cap apply to every stage.

use std::collections::HashMap;

use serde::Deserialize;
use tracing::debug;

use ilens_models::{EnrichmentReply, NormalizedRect, RawDetection};

/// Names longer than this are treated as prose, not item names.
pub const MAX_NAME_LEN: usize = 80;

/// Box corners arrive scaled to a 0..=1000 axis.
const BOX_COORD_SCALE: f64 = 1000.0;

/// One item as the model reports it: a name plus an optional
/// `[y_min, x_min, y_max, x_max]` box on the 0-1000 axis.
#[derive(Debug, Deserialize)]
struct WireItem {
    name: String,
    #[serde(default)]
    box_2d: Option<[f64; 4]>,
}

#[derive(Debug, Deserialize)]
struct WireEnrichment {
    #[serde(default, alias = "item_name")]
    name: Option<String>,
    #[serde(default)]
    brand: Option<String>,
    #[serde(default)]
    color: Option<String>,
    #[serde(default)]
    size: Option<String>,
    #[serde(default)]
    category: Option<String>,
}

/// Strips a surrounding markdown code fence, with or without a language
/// tag.
pub fn strip_code_fence(text: &str) -> &str {
    let mut t = text.trim();
    if let Some(rest) = t.strip_prefix("```json") {
        t = rest;
    } else if let Some(rest) = t.strip_prefix("```") {
        t = rest;
    }
    if let Some(rest) = t.strip_suffix("```") {
        t = rest;
    }
    t.trim()
}

/// Parses a detection response through the full cascade. Never fails;
/// an unusable response yields an empty list.
pub fn parse_detection_response(text: &str, max_name_repeats: usize) -> Vec<RawDetection> {
    let body = strip_code_fence(text);

    let items = match parse_items_strict(body) {
        Some(items) => wire_to_raw(items),
        None => match recover_truncated(body) {
            Some(items) => {
                debug!(recovered = items.len(), "recovered items from truncated response");
                wire_to_raw(items)
            }
            None => comma_fallback(body),
        },
    };

    let filtered: Vec<RawDetection> = items
        .into_iter()
        .filter(|d| is_plausible_name(&d.name))
        .collect();
    cap_repeats(filtered, max_name_repeats)
}

/// Parses an enrichment reply: a single JSON object with optional
/// attribute fields. Placeholder values ("unknown", "n/a", ...) are
/// dropped here so callers only ever see usable data.
pub fn parse_enrichment(text: &str) -> Option<EnrichmentReply> {
    let body = strip_code_fence(text);
    let wire: WireEnrichment = serde_json::from_str(body).ok()?;
    Some(EnrichmentReply {
        name: clean_field(wire.name),
        brand: clean_field(wire.brand),
        color: clean_field(wire.color),
        size: clean_field(wire.size),
        category: clean_field(wire.category),
    })
}

/// Whether a string is usable as an item name. Rejects empty or
/// over-long strings, structural JSON characters, and refusal phrasing.
pub fn is_plausible_name(name: &str) -> bool {
    let name = name.trim();
    if name.is_empty() || name.len() > MAX_NAME_LEN {
        return false;
    }
    if name
        .chars()
        .any(|c| matches!(c, '{' | '}' | '[' | ']' | '"' | ':'))
    {
        return false;
    }
    let lower = name.to_lowercase();
    if lower.contains("cannot") || lower.contains("unable") {
        return false;
    }
    true
}

fn parse_items_strict(text: &str) -> Option<Vec<WireItem>> {
    serde_json::from_str::<Vec<WireItem>>(text).ok()
}

/// Recovers the complete leading objects of a truncated JSON array by
/// cutting at the last complete `}` and closing the array, walking left
/// until some prefix parses.
fn recover_truncated(text: &str) -> Option<Vec<WireItem>> {
    let text = text.trim_start();
    if !text.starts_with('[') {
        return None;
    }
    let mut end = text.len();
    while let Some(idx) = text[..end].rfind('}') {
        let candidate = format!("{}]", &text[..=idx]);
        if let Ok(items) = serde_json::from_str::<Vec<WireItem>>(&candidate) {
            return Some(items);
        }
        end = idx;
    }
    None
}

/// Plain-text fallback: split on commas and newlines, trim list
/// punctuation, keep tokens that look like item names. Produces box-less
/// detections.
fn comma_fallback(text: &str) -> Vec<RawDetection> {
    text.split(|c: char| c == ',' || c == '\n')
        .map(|tok| {
            tok.trim()
                .trim_matches(|c: char| matches!(c, '"' | '\'' | '[' | ']' | '.' | '*' | '-'))
                .trim()
        })
        .filter(|tok| is_plausible_name(tok))
        .map(RawDetection::bare)
        .collect()
}

fn wire_to_raw(items: Vec<WireItem>) -> Vec<RawDetection> {
    items
        .into_iter()
        .map(|item| {
            let rect = item.box_2d.and_then(|b| {
                NormalizedRect::from_corner_units(b[0], b[1], b[2], b[3], BOX_COORD_SCALE)
            });
            RawDetection::new(item.name.trim(), rect)
        })
        .collect()
}

/// Drops repeats of the same normalized name past `max` occurrences.
fn cap_repeats(items: Vec<RawDetection>, max: usize) -> Vec<RawDetection> {
    let mut counts: HashMap<String, usize> = HashMap::new();
    items
        .into_iter()
        .filter(|d| {
            let seen = counts.entry(d.name.trim().to_lowercase()).or_insert(0);
            *seen += 1;
            *seen <= max
        })
        .collect()
}

fn clean_field(value: Option<String>) -> Option<String> {
    let v = value?;
    let v = v.trim();
    if v.is_empty() || v.len() > MAX_NAME_LEN {
        return None;
    }
    let lower = v.to_lowercase();
    if matches!(lower.as_str(), "unknown" | "n/a" | "none" | "null") {
        return None;
    }
    Some(v.to_string())
}
