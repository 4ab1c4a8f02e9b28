//! Decoding of UMA ancillary data: hex bytes → text → flat key/value record.
//!
//! The text grammar is a comma-separated list of `key: value` pairs, optionally
//! prefixed with `q:`. `title` runs until `description:`; `description` runs
//! until the first of the trailing keys; every other value runs until the next
//! comma or the end of the text. Keys are matched case-insensitively. Nothing
//! in here can fail: malformed input degrades to a partial or empty record.

use serde::{Deserialize, Serialize};

/// Keys that terminate a `description` value.
const TRAILING_KEYS: [&str; 6] = ["market_id:", "res_data:", "p1:", "p2:", "p3:", "initializer:"];
const TITLE_KEY: &str = "title:";
const DESCRIPTION_KEY: &str = "description:";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AncillaryRecord {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub market_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub res_data: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub p1: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub p2: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub p3: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub initializer: Option<String>,
}

impl AncillaryRecord {
    fn set_trailing(&mut self, key: &str, value: String) {
        match key {
            "market_id:" => self.market_id = Some(value),
            "res_data:" => self.res_data = Some(value),
            "p1:" => self.p1 = Some(value),
            "p2:" => self.p2 = Some(value),
            "p3:" => self.p3 = Some(value),
            "initializer:" => self.initializer = Some(value),
            _ => {}
        }
    }
}

/// Hex-decode and parse in one step.
pub fn decode(hex: &str) -> AncillaryRecord {
    parse_fields(&decode_bytes(hex))
}

/// Decode a `0x`-prefixed (or bare) hex string into text.
///
/// Zero bytes are dropped rather than emitted. Pairs that are not valid hex
/// are skipped, as is a trailing odd digit. Invalid UTF-8 falls back to
/// mapping each byte to the char with the same code point.
pub fn decode_bytes(hex: &str) -> String {
    let digits = hex.trim();
    let digits = digits
        .strip_prefix("0x")
        .or_else(|| digits.strip_prefix("0X"))
        .unwrap_or(digits);

    let bytes: Vec<u8> = digits
        .as_bytes()
        .chunks_exact(2)
        .filter_map(|pair| Some(hex_val(pair[0])? << 4 | hex_val(pair[1])?))
        .filter(|&b| b != 0)
        .collect();

    match String::from_utf8(bytes) {
        Ok(s) => s,
        Err(e) => e.into_bytes().into_iter().map(char::from).collect(),
    }
}

fn hex_val(c: u8) -> Option<u8> {
    match c {
        b'0'..=b'9' => Some(c - b'0'),
        b'a'..=b'f' => Some(c - b'a' + 10),
        b'A'..=b'F' => Some(c - b'A' + 10),
        _ => None,
    }
}

/// Extract the known fields from decoded ancillary text.
pub fn parse_fields(text: &str) -> AncillaryRecord {
    let trimmed = text.trim();
    // ASCII lowercasing keeps byte offsets identical, so indices found in
    // `lower` are valid char boundaries in `body`.
    let lower_full = trimmed.to_ascii_lowercase();
    let skip = if lower_full.starts_with("q:") { 2 } else { 0 };
    let body = &trimmed[skip..];
    let lower = &lower_full[skip..];

    let mut record = AncillaryRecord::default();

    let title = find_key(lower, TITLE_KEY, 0);
    let description = find_key(lower, DESCRIPTION_KEY, title.map_or(0, |(_, v)| v));

    if let Some((_, value_at)) = title {
        let end = match description {
            Some((desc_at, _)) => desc_at,
            None => first_trailing_key(lower, value_at).unwrap_or(body.len()),
        };
        record.title = clean(&body[value_at..end]);
    }

    if let Some((_, value_at)) = description {
        let end = first_trailing_key(lower, value_at).unwrap_or(body.len());
        record.description = clean(&body[value_at..end]);
    }

    // Trailing keys are searched after the free-text fields so that a colon
    // phrase inside a title cannot shadow the real key.
    let scan_from = description
        .or(title)
        .map_or(0, |(_, value_at)| value_at);

    for key in TRAILING_KEYS {
        let Some((_, value_at)) = find_key(lower, key, scan_from) else {
            continue;
        };
        let end = lower[value_at..]
            .find(',')
            .map_or(body.len(), |i| value_at + i);
        record.set_trailing(key, clean(&body[value_at..end]));
    }

    record
}

/// Find `key` at or after `from`, requiring it not to be the tail of a longer
/// word. Returns `(key_start, value_start)`.
fn find_key(lower: &str, key: &str, from: usize) -> Option<(usize, usize)> {
    let mut at = from;
    while at <= lower.len() {
        let pos = at + lower.get(at..)?.find(key)?;
        let boundary = pos == 0
            || !lower.as_bytes()[pos - 1].is_ascii_alphanumeric()
                && lower.as_bytes()[pos - 1] != b'_';
        if boundary {
            return Some((pos, pos + key.len()));
        }
        at = pos + key.len();
    }
    None
}

/// Start offset of the earliest trailing key at or after `from`.
fn first_trailing_key(lower: &str, from: usize) -> Option<usize> {
    TRAILING_KEYS
        .iter()
        .filter_map(|k| find_key(lower, k, from).map(|(start, _)| start))
        .min()
}

fn clean(raw: &str) -> String {
    raw.trim().trim_end_matches(',').trim().to_string()
}
