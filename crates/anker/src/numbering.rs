//! Header numbering model.
//!
//! Parses printed numbering strings (`1`, `1.2.3`, `A.1`, `APPENDIX A`) into
//! ordered component lists, exposes parent/descendant relations and sortable
//! keys, and compiles the tolerant regexes used to decide whether a body line
//! *bears* a number. Components compare by integer value so `2` sorts before
//! `10`, and a prefix sorts before its extensions (`1` precedes `1.1`).

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

static COMPONENT_TOKENS: Lazy<Regex> = Lazy::new(|| Regex::new(r"[A-Za-z]+|\d+").expect("component pattern"));

/// Dot-like separators tolerated between numeric components.
const DOT_CLASS: &str = "[.\u{2024}\u{2027}\u{00B7}\u{22C4}]";

/// Kind of one numbering component.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComponentKind {
    Numeric,
    Alpha,
    /// Unrecognized token; participates in equality but not ordering.
    Token,
}

/// One component of a parsed numbering string.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NumberComponent {
    /// Token exactly as printed.
    pub raw: String,
    pub kind: ComponentKind,
    /// Integer value: the number itself, or base-26 letter value (`A` = 1).
    /// Zero for `Token` components.
    pub value: i64,
}

impl NumberComponent {
    fn numeric(raw: &str) -> Self {
        NumberComponent {
            raw: raw.to_owned(),
            kind: ComponentKind::Numeric,
            value: raw.parse::<i64>().unwrap_or(i64::MAX),
        }
    }

    fn alpha(raw: &str) -> Self {
        NumberComponent {
            raw: raw.to_owned(),
            kind: ComponentKind::Alpha,
            value: alpha_to_int(raw),
        }
    }

    /// Canonical rendering: numeric value without zero padding, upper-case
    /// letters for alpha, the raw token otherwise.
    pub fn normalized(&self) -> String {
        match self.kind {
            ComponentKind::Numeric => self.value.to_string(),
            ComponentKind::Alpha => int_to_alpha(self.value),
            ComponentKind::Token => self.raw.clone(),
        }
    }
}

impl PartialEq for NumberComponent {
    fn eq(&self, other: &Self) -> bool {
        match (self.kind, other.kind) {
            (ComponentKind::Token, ComponentKind::Token) => self.raw == other.raw,
            (a, b) => a == b && self.value == other.value,
        }
    }
}

impl Eq for NumberComponent {}

/// A parsed numbering string as an ordered component list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NumberSpec {
    components: Vec<NumberComponent>,
}

impl NumberSpec {
    /// Parse a printed numbering string.
    ///
    /// Tokens are maximal runs of digits or ASCII letters. An `APPENDIX <ID>`
    /// prefix (case-insensitive, also `ANNEX`/`APPENDICES`) is normalized
    /// away so the identifier becomes a plain alpha component. Returns `None`
    /// when no tokens remain.
    pub fn parse(value: &str) -> Option<NumberSpec> {
        let mut tokens: Vec<&str> = COMPONENT_TOKENS.find_iter(value).map(|m| m.as_str()).collect();
        if tokens.len() >= 2 {
            let head = tokens[0].to_ascii_lowercase();
            if matches!(head.as_str(), "appendix" | "appendices" | "annex") {
                tokens.remove(0);
            }
        }
        if tokens.is_empty() {
            return None;
        }
        let components = tokens
            .into_iter()
            .map(|token| {
                if token.bytes().all(|b| b.is_ascii_digit()) {
                    NumberComponent::numeric(token)
                } else if token.bytes().all(|b| b.is_ascii_alphabetic()) {
                    NumberComponent::alpha(token)
                } else {
                    NumberComponent {
                        raw: token.to_owned(),
                        kind: ComponentKind::Token,
                        value: 0,
                    }
                }
            })
            .collect();
        Some(NumberSpec { components })
    }

    pub fn components(&self) -> &[NumberComponent] {
        &self.components
    }

    pub fn len(&self) -> usize {
        self.components.len()
    }

    pub fn is_empty(&self) -> bool {
        self.components.is_empty()
    }

    /// Canonical dotted rendering (`1.2.3`, `A.1`).
    pub fn render(&self) -> String {
        self.components
            .iter()
            .map(NumberComponent::normalized)
            .collect::<Vec<_>>()
            .join(".")
    }

    /// All but the last component; `None` for single-component numbers.
    pub fn parent(&self) -> Option<NumberSpec> {
        if self.components.len() <= 1 {
            return None;
        }
        Some(NumberSpec {
            components: self.components[..self.components.len() - 1].to_vec(),
        })
    }

    /// Sortable key: per-component values in order.
    pub fn key(&self) -> Vec<i64> {
        self.components.iter().map(|c| c.value).collect()
    }

    /// True when `ancestor`'s components are a strict prefix of this spec's.
    pub fn is_descendant_of(&self, ancestor: &NumberSpec) -> bool {
        ancestor.components.len() < self.components.len()
            && self.components[..ancestor.components.len()] == ancestor.components[..]
    }

    /// Compile the tolerant matcher for lines bearing this number.
    pub fn matcher(&self) -> NumberMatcher {
        NumberMatcher::compile(&self.components)
    }
}

impl PartialOrd for NumberSpec {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for NumberSpec {
    fn cmp(&self, other: &Self) -> Ordering {
        // Lexicographic by value; a missing component sorts before any
        // present one, so `1` precedes `1.1`.
        self.key().cmp(&other.key())
    }
}

/// Tolerant single-number matcher.
///
/// Matches the component sequence with `\s*<dot>\s*` between numeric
/// neighbours and `[.\s]*` between mixed ones, anchored so the match cannot
/// start mid-token and must end at a separator, close punctuation, or end of
/// line.
#[derive(Debug, Clone)]
pub struct NumberMatcher {
    pattern: fancy_regex::Regex,
}

impl NumberMatcher {
    fn compile(components: &[NumberComponent]) -> NumberMatcher {
        let mut core = String::new();
        for (idx, component) in components.iter().enumerate() {
            let escaped = regex::escape(&component.raw);
            if idx == 0 {
                core.push_str(&escaped);
                continue;
            }
            let prev = &components[idx - 1];
            if prev.kind == ComponentKind::Numeric && component.kind == ComponentKind::Numeric {
                core.push_str(&format!(r"\s*{DOT_CLASS}\s*{escaped}"));
            } else {
                core.push_str(&format!(r"[.\s]*{escaped}"));
            }
        }
        let pattern = format!(r"(?i)(?<!\S){core}(?=$|\s|[).:-])");
        NumberMatcher {
            pattern: fancy_regex::Regex::new(&pattern).expect("number matcher pattern"),
        }
    }

    /// True when `text` bears the number.
    pub fn is_match(&self, text: &str) -> bool {
        self.pattern.is_match(text).unwrap_or(false)
    }
}

/// Anchored gap-fill pattern for a synthesized numbering.
///
/// Numeric components tolerate zero padding (`0*7`); separators accept any
/// mix of spaces, dots, dashes, and parentheses. Returns the pattern matched
/// at the start of a trimmed line, so callers can strip it and inspect the
/// remainder.
pub fn gap_regex(components: &[NumberComponent]) -> Regex {
    let parts: Vec<String> = components
        .iter()
        .map(|component| match component.kind {
            ComponentKind::Numeric => format!("0*{}", regex::escape(&component.normalized())),
            _ => {
                // Synthesized components may carry only the normalized form.
                let token = if component.raw.is_empty() {
                    component.normalized()
                } else {
                    component.raw.clone()
                };
                regex::escape(&token)
            }
        })
        .collect();
    let joined = parts.join(r"(?:[\s.\-)(]*?)");
    let pattern = format!(r"(?i)^\s*[(\[]?\s*{joined}(?:\b|[.)\-\s:])");
    Regex::new(&pattern).expect("gap pattern")
}

/// Base-26 letter value: `A` = 1, `Z` = 26, `AA` = 27.
pub fn alpha_to_int(value: &str) -> i64 {
    let mut total: i64 = 0;
    for ch in value.chars() {
        let upper = ch.to_ascii_uppercase();
        if upper.is_ascii_uppercase() {
            total = total.saturating_mul(26).saturating_add((upper as i64) - ('A' as i64) + 1);
        }
    }
    total
}

/// Inverse of [`alpha_to_int`]; non-positive values render as `A`.
pub fn int_to_alpha(value: i64) -> String {
    if value <= 0 {
        return "A".to_owned();
    }
    let mut chars: Vec<char> = Vec::new();
    let mut remaining = value;
    while remaining > 0 {
        remaining -= 1;
        let rem = (remaining % 26) as u8;
        chars.push((b'A' + rem) as char);
        remaining /= 26;
    }
    chars.into_iter().rev().collect()
}
