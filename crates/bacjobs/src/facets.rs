//! Point formatting descriptors
//!
//! A facets string is a `;`-separated list of `key:value` pairs, e.g.
//! `unit:°C;precision:1` or `falseText:Off;trueText:On`. The `range` key
//! holds a braced map of integer states to labels: `range:{1:Low;2:High}`.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Decimal places used when a descriptor does not set a precision
pub const DEFAULT_PRECISION: u32 = 1;

// ─────────────────────────────────────────────────────────────────────────────
// Raw Value
// ─────────────────────────────────────────────────────────────────────────────

/// A point value as read from a device
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RawValue {
    Number(f64),
    Text(String),
}

impl RawValue {
    fn is_truthy(&self) -> bool {
        match self {
            Self::Number(n) => *n != 0.0 && !n.is_nan(),
            Self::Text(s) => !s.is_empty(),
        }
    }
}

impl fmt::Display for RawValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Number(n) => write!(f, "{n}"),
            Self::Text(s) => write!(f, "{s}"),
        }
    }
}

/// Round half away from zero to a number of decimal places
pub fn round_to(value: f64, places: u32) -> f64 {
    format!("{value:.*}", places as usize)
        .parse()
        .unwrap_or(value)
}

// ─────────────────────────────────────────────────────────────────────────────
// Facets
// ─────────────────────────────────────────────────────────────────────────────

/// Parsed facets descriptor
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Facets {
    pub unit: Option<String>,
    pub precision: Option<u32>,
    pub true_text: Option<String>,
    pub false_text: Option<String>,
    pub range: Option<BTreeMap<i64, String>>,
    /// Keys with no formatting meaning, kept as-is
    pub other: BTreeMap<String, String>,
}

impl Facets {
    /// Parse a descriptor. Malformed descriptors yield empty facets.
    pub fn parse(descriptor: &str) -> Self {
        Self::try_parse(descriptor).unwrap_or_default()
    }

    fn try_parse(descriptor: &str) -> Option<Self> {
        let mut facets = Self::default();

        for segment in split_top_level(descriptor)? {
            let segment = segment.trim();
            if segment.is_empty() {
                continue;
            }
            let (key, value) = segment.split_once(':')?;
            let value = value.trim();
            match key.trim() {
                "unit" => facets.unit = Some(value.to_string()),
                "precision" => facets.precision = Some(value.parse().ok()?),
                "trueText" => facets.true_text = Some(value.to_string()),
                "falseText" => facets.false_text = Some(value.to_string()),
                "range" => facets.range = Some(parse_range(value)?),
                other => {
                    facets.other.insert(other.to_string(), value.to_string());
                }
            }
        }

        Some(facets)
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Whether the descriptor renders values as true/false text
    pub fn is_boolean(&self) -> bool {
        self.true_text.is_some() || self.false_text.is_some()
    }

    /// Format a raw value for display
    ///
    /// Boolean text wins over a range, which wins over numeric formatting.
    pub fn format(&self, raw: &RawValue) -> String {
        if self.is_boolean() {
            return if raw.is_truthy() {
                self.true_text.clone().unwrap_or_else(|| "true".to_string())
            } else {
                self.false_text.clone().unwrap_or_else(|| "false".to_string())
            };
        }

        if let Some(range) = &self.range {
            return match raw {
                RawValue::Number(n) if n.fract() == 0.0 => range
                    .get(&(*n as i64))
                    .cloned()
                    .unwrap_or_else(|| raw.to_string()),
                _ => raw.to_string(),
            };
        }

        let text = match raw {
            RawValue::Number(n) => {
                round_to(*n, self.precision.unwrap_or(DEFAULT_PRECISION)).to_string()
            }
            RawValue::Text(s) => s.clone(),
        };
        match &self.unit {
            Some(unit) if !unit.is_empty() => format!("{text} {unit}"),
            _ => text,
        }
    }

    /// Value reported next to the formatted text
    ///
    /// Plain numeric points are rounded to their precision (default 1);
    /// boolean and range points keep the raw value unless a precision is set.
    pub fn normalize(&self, raw: &RawValue) -> RawValue {
        let RawValue::Number(n) = raw else {
            return raw.clone();
        };
        let places = if self.is_boolean() || self.range.is_some() {
            self.precision
        } else {
            Some(self.precision.unwrap_or(DEFAULT_PRECISION))
        };
        match places {
            Some(places) => RawValue::Number(round_to(*n, places)),
            None => raw.clone(),
        }
    }
}

impl fmt::Display for Facets {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut parts = Vec::new();
        if let Some(unit) = &self.unit {
            parts.push(format!("unit:{unit}"));
        }
        if let Some(precision) = self.precision {
            parts.push(format!("precision:{precision}"));
        }
        if let Some(text) = &self.false_text {
            parts.push(format!("falseText:{text}"));
        }
        if let Some(text) = &self.true_text {
            parts.push(format!("trueText:{text}"));
        }
        for (key, value) in &self.other {
            parts.push(format!("{key}:{value}"));
        }
        if let Some(range) = &self.range {
            parts.push(range_clause(range.iter().map(|(k, v)| (*k, v.as_str()))));
        }
        write!(f, "{}", parts.join(";"))
    }
}

/// Build a `range:{1:A;2:B}` clause
pub fn range_clause<'a>(states: impl IntoIterator<Item = (i64, &'a str)>) -> String {
    let entries: Vec<String> = states
        .into_iter()
        .map(|(state, label)| format!("{state}:{label}"))
        .collect();
    format!("range:{{{}}}", entries.join(";"))
}

/// Split on `;` outside braces; `None` on unbalanced braces
fn split_top_level(descriptor: &str) -> Option<Vec<&str>> {
    let mut segments = Vec::new();
    let mut depth = 0usize;
    let mut start = 0;

    for (i, c) in descriptor.char_indices() {
        match c {
            '{' => depth += 1,
            '}' => depth = depth.checked_sub(1)?,
            ';' if depth == 0 => {
                segments.push(&descriptor[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    if depth != 0 {
        return None;
    }
    segments.push(&descriptor[start..]);
    Some(segments)
}

fn parse_range(value: &str) -> Option<BTreeMap<i64, String>> {
    let inner = value.strip_prefix('{')?.strip_suffix('}')?;
    let mut range = BTreeMap::new();
    for entry in inner.split(';') {
        let entry = entry.trim();
        if entry.is_empty() {
            continue;
        }
        let (state, label) = entry.split_once(':')?;
        range.insert(state.trim().parse().ok()?, label.trim().to_string());
    }
    Some(range)
}
