//! Locator configuration.
//!
//! Every knob the engine reads is collected into one immutable value built at
//! the boundary; the engine never consults the environment at runtime.
//! Boolean options parse from the truthy set `{1, true, yes, on}`.

use serde::{Deserialize, Serialize};

/// Dedupe policy applied when one number anchors multiple lines in a window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum DedupePolicy {
    /// Keep the best-scoring occurrence (earliest index on ties).
    #[default]
    Best,
    /// Keep the earliest occurrence.
    Earliest,
}

/// Immutable configuration for a locator run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocateConfig {
    /// Classify TOC/index pages and exclude them from anchoring.
    pub suppress_toc: bool,
    /// Detect running headers/footers by cross-page repetition.
    pub suppress_running: bool,
    /// Top/bottom band size (in lines) for running detection and band penalties.
    pub band_lines: usize,
    /// Minimum dot-leader lines for a page to classify as TOC.
    pub toc_min_dot_leaders: usize,
    /// Minimum section-like lines for a page to classify as TOC.
    pub toc_min_section_tokens: usize,
    /// Minimum normalized length for a running-text candidate.
    pub running_min_len: usize,

    /// Fold `I`/`l` confusables into `1` during normalization.
    pub fold_confusables: bool,

    /// Fuzzy acceptance threshold when the line bears the header's number.
    pub fuzzy_threshold_numtitle: f64,
    /// Fuzzy acceptance threshold for title-only matches.
    pub fuzzy_threshold_title_only: f64,
    /// General alignment threshold used by the sequential window search.
    pub fuzzy_threshold: f64,

    /// Score weight of the lexical ratio.
    pub w_fuzzy: f64,
    /// Score weight of the typography bonus.
    pub w_typo: f64,
    /// Score weight of the page-position cue.
    pub w_pos: f64,
    /// Penalty applied to candidates inside the top/bottom band.
    pub penalty_band: f64,
    /// Penalty applied to candidates on TOC-classified pages.
    pub penalty_toc: f64,

    /// Pad (in lines) around a parent window when searching for descendants.
    pub window_pad: usize,
    /// Require numeric evidence for level-1 anchors before title-only passes.
    pub l1_require_numeric: bool,
    /// Lookahead (in lines) for the child-hint bonus on level-1 candidates.
    pub l1_child_hint_lookahead: usize,

    /// Forbid candidates at or before the committed cursor.
    pub after_anchor_only: bool,
    /// Permit the last eligible occurrence when no forward candidate exists.
    /// The engine still refuses picks at or before the cursor; when only
    /// those remain the header stays unresolved.
    pub last_occurrence_fallback: bool,
    /// Run the final parent-before-child repair after all passes.
    pub final_monotonic_guard: bool,

    /// Maximum repair iterations in the invariant enforcer.
    pub rescan_passes: usize,
    /// Dedupe policy for duplicate anchors inside a window.
    pub dedupe_policy: DedupePolicy,
    /// Allow title-only evidence when reanchoring a late parent.
    pub title_only_reanchor: bool,

    /// Use the strict full-document ladder instead of sequential alignment.
    pub strict_align: bool,

    /// Enable the embedding-ranked candidate path.
    pub use_embeddings: bool,
    /// Fusion weights `[lexical, cosine, font_rank, y_bonus]`; auto-normalized.
    pub fuse_weights: [f64; 4],
    /// Lexical gate for the vector path.
    pub min_lexical: f64,
    /// Cosine gate for the vector path.
    pub min_cosine: f64,

    /// Page-band radius for the exact matcher's hint-first scan.
    pub exact_page_band: usize,
    /// Minimum normalized title length for the exact matcher.
    pub exact_min_title_len: usize,
    /// Minimum successful hinted matches before offset calibration runs.
    pub exact_calibration_seed_min: usize,
}

impl Default for LocateConfig {
    fn default() -> Self {
        LocateConfig {
            suppress_toc: true,
            suppress_running: true,
            band_lines: 5,
            toc_min_dot_leaders: 4,
            toc_min_section_tokens: 6,
            running_min_len: 6,
            fold_confusables: true,
            fuzzy_threshold_numtitle: 82.0,
            fuzzy_threshold_title_only: 78.0,
            fuzzy_threshold: 80.0,
            w_fuzzy: 0.6,
            w_typo: 0.15,
            w_pos: 0.25,
            penalty_band: 0.25,
            penalty_toc: 0.45,
            window_pad: 40,
            l1_require_numeric: true,
            l1_child_hint_lookahead: 30,
            after_anchor_only: true,
            last_occurrence_fallback: true,
            final_monotonic_guard: true,
            rescan_passes: 2,
            dedupe_policy: DedupePolicy::Best,
            title_only_reanchor: true,
            strict_align: false,
            use_embeddings: false,
            fuse_weights: [0.55, 0.30, 0.10, 0.05],
            min_lexical: 0.3,
            min_cosine: 0.25,
            exact_page_band: 2,
            exact_min_title_len: 4,
            exact_calibration_seed_min: 3,
        }
    }
}

impl LocateConfig {
    /// Fusion weights rescaled to sum to 1.0. Zero or negative sums fall
    /// back to the default weights.
    pub fn normalized_fuse_weights(&self) -> [f64; 4] {
        let total: f64 = self.fuse_weights.iter().sum();
        if total <= f64::EPSILON {
            return LocateConfig::default().fuse_weights;
        }
        let mut out = self.fuse_weights;
        for w in &mut out {
            *w /= total;
        }
        out
    }
}

/// Parse a boolean option from its string form.
///
/// Accepts `1`, `true`, `yes`, and `on` (case-insensitive) as truthy;
/// everything else is falsy.
pub fn truthy(value: &str) -> bool {
    matches!(value.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on")
}

/// Parse a comma- or whitespace-separated 4-tuple of fusion weights.
///
/// Returns `None` when fewer than four finite values are present.
pub fn parse_fuse_weights(value: &str) -> Option<[f64; 4]> {
    let parts: Vec<f64> = value
        .split(|c: char| c == ',' || c.is_whitespace())
        .filter(|part| !part.is_empty())
        .map_while(|part| part.parse::<f64>().ok().filter(|v| v.is_finite()))
        .collect();
    if parts.len() < 4 {
        return None;
    }
    Some([parts[0], parts[1], parts[2], parts[3]])
}
