//! Line text normalization.
//!
//! PDF glyph streams routinely emit `1.2.3` as `1 . I .3`: spaced dot
//! leaders, one-dot-leader and hyphenation-point glyphs standing in for
//! periods, and `I`/`l` standing in for the digit `1`. Without folding these
//! the fuzzy matchers drop below their thresholds and anchor to the wrong
//! line. Normalization is deterministic and idempotent.

use once_cell::sync::Lazy;
use regex::Regex;

/// Dot-like glyphs that separate numbering components in the wild.
const DOT_CLASS: &str = "[.\u{2024}\u{2027}\u{00B7}\u{22C4}]";

/// Space glyphs replaced with a plain ASCII space.
const SPACE_GLYPHS: [char; 3] = ['\u{00A0}', '\u{2007}', '\u{2009}'];

static SPACED_DOTS: Lazy<fancy_regex::Regex> = Lazy::new(|| {
    fancy_regex::Regex::new(&format!(r"(?<=\d)\s*{DOT_CLASS}\s*(?=\d)")).expect("spaced-dot pattern")
});

static CONFUSABLE_AFTER_DIGIT: Lazy<fancy_regex::Regex> = Lazy::new(|| {
    fancy_regex::Regex::new(r"(?<=\d)\s*[Il]\s*(?=(?:\d|\b))").expect("digit confusable pattern")
});

static CONFUSABLE_AFTER_DOT: Lazy<fancy_regex::Regex> = Lazy::new(|| {
    fancy_regex::Regex::new(&format!(r"(?<={DOT_CLASS})\s*[Il]\b")).expect("dot confusable pattern")
});

static MULTISPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").expect("whitespace pattern"));

/// Collapse spaced dot runs between digits (`1 . 2` → `1.2`) until stable.
pub fn collapse_spaced_dots(value: &str) -> String {
    let mut current = value.to_owned();
    loop {
        let next = SPACED_DOTS.replace_all(&current, ".").into_owned();
        if next == current {
            return next;
        }
        current = next;
    }
}

/// Normalize a line for fuzzy comparison.
///
/// Applied in order: soft-hyphen removal, non-breaking/narrow space folding,
/// spaced-dot collapse to fixpoint, optional confusable folding (`I`/`l`
/// between a digit or dot and a word boundary become `1`), whitespace
/// collapse, trim, ASCII case fold.
pub fn normalize(value: &str, fold_confusables: bool) -> String {
    let mut cleaned: String = value.chars().filter(|&c| c != '\u{00AD}').collect();
    for glyph in SPACE_GLYPHS {
        if cleaned.contains(glyph) {
            cleaned = cleaned.replace(glyph, " ");
        }
    }
    cleaned = collapse_spaced_dots(&cleaned);
    if fold_confusables {
        cleaned = CONFUSABLE_AFTER_DIGIT.replace_all(&cleaned, "1").into_owned();
        cleaned = CONFUSABLE_AFTER_DOT.replace_all(&cleaned, "1").into_owned();
        cleaned = collapse_spaced_dots(&cleaned);
    }
    let collapsed = MULTISPACE.replace_all(&cleaned, " ");
    collapsed.trim().to_ascii_lowercase()
}
