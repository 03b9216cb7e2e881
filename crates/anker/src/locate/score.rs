//! Lexical candidate scoring.
//!
//! One scoring vocabulary serves every aligner: a header query carries the
//! normalized "number + title" and title-only targets plus the compiled
//! number matcher; scoring a line (or window) fuses the token-set ratio with
//! typography and page-position cues and subtracts noise penalties. Running
//! header text is effectively unreachable (−500).

use once_cell::sync::Lazy;
use regex::Regex;

use crate::config::LocateConfig;
use crate::numbering::{NumberMatcher, NumberSpec};
use crate::text::{normalize, token_set_ratio};
use crate::types::{CandidateHeader, Line, Strategy};

use super::context::RunContext;
use super::windows::LineWindow;

static APPENDIX_LINE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)^\s*APPENDIX\s+[A-Z]\b").expect("appendix pattern"));

/// Baseline font size below which the size bonus never triggers.
const TYPO_MIN_FONT: f32 = 12.0;
/// Factor over the document median font that earns the size bonus.
const TYPO_MEDIAN_FACTOR: f32 = 1.1;
/// Penalty that takes running-header text out of contention.
const RUNNING_PENALTY: f64 = 500.0;
/// Scale of one typography bonus point in the fused score.
const TYPO_SCALE: f64 = 50.0;
/// Position cue granted to candidates outside the page band.
const POS_SCALE: f64 = 50.0;

/// Pre-computed matching targets for one oracle header.
#[derive(Debug, Clone)]
pub struct HeaderQuery {
    /// Numbering as printed by the oracle, when present.
    pub number_raw: Option<String>,
    pub spec: Option<NumberSpec>,
    pub matcher: Option<NumberMatcher>,
    /// Normalized `number + " " + title`.
    pub want_full: String,
    /// Normalized title alone.
    pub want_title: String,
}

impl HeaderQuery {
    pub fn new(header: &CandidateHeader, fold_confusables: bool) -> Self {
        let number_raw = header.number.clone().filter(|n| !n.trim().is_empty());
        let spec = number_raw.as_deref().and_then(NumberSpec::parse);
        let matcher = spec.as_ref().map(NumberSpec::matcher);
        let want_title = normalize(&header.text, fold_confusables);
        let want_full = match &number_raw {
            Some(number) => normalize(&format!("{number} {}", header.text), fold_confusables),
            None => want_title.clone(),
        };
        HeaderQuery {
            number_raw,
            spec,
            matcher,
            want_full,
            want_title,
        }
    }

    /// True when `normalized` bears this header's number.
    pub fn bears_number(&self, normalized: &str) -> bool {
        self.matcher.as_ref().is_some_and(|m| m.is_match(normalized))
    }
}

/// One scored anchoring candidate.
#[derive(Debug, Clone)]
pub struct ScoredCandidate {
    /// Arena position of the candidate line (window start for windows).
    pub pos: usize,
    /// Fused score.
    pub score: f64,
    /// Raw token-set ratio before fusion.
    pub ratio: f64,
    pub strategy: Strategy,
    pub band: bool,
    pub has_number: bool,
}

/// Score one line against a header query.
///
/// `basis` is the normalized matching text: usually the line's own
/// normalization, or the fused two-line text for appendix headings. Lines on
/// TOC pages and running lines are rejected outright unless `allow_noise`
/// (the last-occurrence override) is set. Returns `None` below threshold.
pub fn score_line(
    query: &HeaderQuery,
    line: &Line,
    basis: &str,
    ctx: &RunContext<'_>,
    allow_noise: bool,
) -> Option<ScoredCandidate> {
    let on_toc = ctx.noise.toc_pages.contains(&line.page) || line.is_toc || line.is_index;
    let running = line.is_running || ctx.is_running_text(basis);
    if (on_toc || running) && !allow_noise {
        return None;
    }

    let has_number = query.bears_number(basis);
    let want = if has_number { &query.want_full } else { &query.want_title };
    let ratio = token_set_ratio(basis, want);

    let threshold = if has_number {
        ctx.cfg.fuzzy_threshold_numtitle
    } else {
        ctx.cfg.fuzzy_threshold_title_only
    };
    if ratio < threshold {
        return None;
    }

    let band = ctx.pages.in_band(line, ctx.cfg.band_lines);
    let score = fused_score(ctx.cfg, ratio, typo_bonus(line, ctx), band, on_toc, running);

    Some(ScoredCandidate {
        pos: 0,
        score,
        ratio,
        strategy: if has_number { Strategy::NumTitle } else { Strategy::TitleOnly },
        band,
        has_number,
    })
}

/// Typography bonus points: bold, and notably-larger-than-median font.
pub fn typo_bonus(line: &Line, ctx: &RunContext<'_>) -> u32 {
    let mut bonus = u32::from(line.bold);
    if let Some(size) = line.font_size {
        let cutoff = ctx
            .pages
            .median_font
            .map_or(TYPO_MIN_FONT, |median| TYPO_MIN_FONT.max(TYPO_MEDIAN_FACTOR * median));
        if size >= cutoff {
            bonus += 1;
        }
    }
    bonus
}

/// The fused C5 score.
pub fn fused_score(cfg: &LocateConfig, ratio: f64, typo: u32, band: bool, on_toc: bool, running: bool) -> f64 {
    let mut score = cfg.w_fuzzy * ratio
        + cfg.w_typo * (TYPO_SCALE * f64::from(typo))
        + cfg.w_pos * if band { 0.0 } else { POS_SCALE };
    if band {
        score -= cfg.penalty_band;
    }
    if on_toc {
        score -= cfg.penalty_toc;
    }
    if running {
        score -= RUNNING_PENALTY;
    }
    score
}

/// Interchangeable producer of scored candidates over windows.
pub trait Scorer {
    fn score_window(&self, query: &HeaderQuery, window: &LineWindow, ctx: &RunContext<'_>) -> Option<ScoredCandidate>;
    fn threshold(&self) -> f64;
}

/// Window scorer over the fused lexical formula.
pub struct LexicalScorer {
    fold_confusables: bool,
    threshold: f64,
}

impl LexicalScorer {
    pub fn new(cfg: &LocateConfig) -> Self {
        LexicalScorer {
            fold_confusables: cfg.fold_confusables,
            threshold: cfg.fuzzy_threshold_title_only,
        }
    }
}

impl Scorer for LexicalScorer {
    fn score_window(&self, query: &HeaderQuery, window: &LineWindow, ctx: &RunContext<'_>) -> Option<ScoredCandidate> {
        if window.is_running {
            return None;
        }
        let basis = normalize(&window.text, self.fold_confusables);
        if ctx.noise.toc_pages.contains(&window.page) {
            return None;
        }
        let has_number = query.bears_number(&basis);
        let want = if has_number { &query.want_full } else { &query.want_title };
        let ratio = token_set_ratio(&basis, want);
        let threshold = if has_number {
            // Window thresholds follow the same num+title / title-only split.
            self.threshold.max(ctx.cfg.fuzzy_threshold_numtitle)
        } else {
            self.threshold
        };
        if ratio < threshold {
            return None;
        }
        Some(ScoredCandidate {
            pos: window.start_pos,
            score: ratio,
            ratio,
            strategy: if has_number { Strategy::NumTitle } else { Strategy::TitleOnly },
            band: false,
            has_number,
        })
    }

    fn threshold(&self) -> f64 {
        self.threshold
    }
}

/// Two-line appendix fusion (e.g. `"APPENDIX A"` / `"SUBMITTALS"`).
///
/// For each line opening an appendix heading, the normalized fusion of it
/// and its successor becomes the line's synthetic matching basis; the anchor
/// stays on the first line.
pub fn synthetic_texts(lines: &[Line], fold_confusables: bool) -> Vec<Option<String>> {
    let mut out = vec![None; lines.len()];
    for idx in 0..lines.len() {
        if !APPENDIX_LINE.is_match(&lines[idx].text) {
            continue;
        }
        if let Some(next) = lines.get(idx + 1) {
            let next_text = next.text.trim();
            if !next_text.is_empty() {
                let combined = format!("{} {}", lines[idx].text.trim_end(), next_text);
                out[idx] = Some(normalize(&combined, fold_confusables));
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::noise::NoiseReport;
    use crate::trace::Tracer;

    fn ctx_for<'a>(cfg: &'a LocateConfig, tracer: &'a mut Tracer, lines: &[Line]) -> RunContext<'a> {
        RunContext::new(cfg, tracer, lines, NoiseReport::default())
    }

    fn header(number: Option<&str>, text: &str) -> CandidateHeader {
        CandidateHeader::new(text, number, 1, 0)
    }

    #[test]
    fn test_number_and_title_beats_threshold() {
        let cfg = LocateConfig::default();
        let mut tracer = Tracer::disabled();
        let lines = vec![Line::new(0, 1, 0, "1.2 Scope of Work")];
        let ctx = ctx_for(&cfg, &mut tracer, &lines);
        let query = HeaderQuery::new(&header(Some("1.2"), "Scope of Work"), true);
        let candidate = score_line(&query, &lines[0], &normalize(&lines[0].text, true), &ctx, false).unwrap();
        assert!(candidate.has_number);
        assert_eq!(candidate.strategy, Strategy::NumTitle);
        assert!(candidate.ratio >= 99.0);
    }

    #[test]
    fn test_running_line_rejected_without_override() {
        let cfg = LocateConfig::default();
        let mut tracer = Tracer::disabled();
        let mut lines = vec![Line::new(0, 1, 0, "1.2 Scope of Work")];
        lines[0].is_running = true;
        let ctx = ctx_for(&cfg, &mut tracer, &lines);
        let query = HeaderQuery::new(&header(Some("1.2"), "Scope of Work"), true);
        let basis = normalize(&lines[0].text, true);
        assert!(score_line(&query, &lines[0], &basis, &ctx, false).is_none());
        let overridden = score_line(&query, &lines[0], &basis, &ctx, true).unwrap();
        assert!(overridden.score < 0.0, "running penalty must dominate");
    }

    #[test]
    fn test_title_only_uses_lower_threshold() {
        let cfg = LocateConfig::default();
        let mut tracer = Tracer::disabled();
        let lines = vec![Line::new(0, 1, 0, "Submittal Procedures")];
        let ctx = ctx_for(&cfg, &mut tracer, &lines);
        let query = HeaderQuery::new(&header(None, "Submittal Procedures"), true);
        let candidate = score_line(&query, &lines[0], &normalize(&lines[0].text, true), &ctx, false).unwrap();
        assert_eq!(candidate.strategy, Strategy::TitleOnly);
    }

    #[test]
    fn test_typography_raises_score() {
        let cfg = LocateConfig::default();
        let mut tracer = Tracer::disabled();
        let mut lines = vec![Line::new(0, 1, 0, "1 GENERAL"), Line::new(1, 1, 1, "1 GENERAL")];
        lines[0].bold = true;
        lines[0].font_size = Some(14.0);
        lines[1].font_size = Some(10.0);
        let ctx = ctx_for(&cfg, &mut tracer, &lines);
        let query = HeaderQuery::new(&header(Some("1"), "GENERAL"), true);
        let basis0 = normalize(&lines[0].text, true);
        let basis1 = normalize(&lines[1].text, true);
        let bold = score_line(&query, &lines[0], &basis0, &ctx, false).unwrap();
        let plain = score_line(&query, &lines[1], &basis1, &ctx, false).unwrap();
        assert!(bold.score > plain.score);
    }

    #[test]
    fn test_synthetic_appendix_fusion() {
        let lines = vec![
            Line::new(20, 9, 0, "APPENDIX A"),
            Line::new(21, 9, 1, "SUBMITTALS AND FORMS"),
            Line::new(22, 9, 2, "body text"),
        ];
        let synthetic = synthetic_texts(&lines, true);
        assert_eq!(synthetic[0].as_deref(), Some("appendix a submittals and forms"));
        assert!(synthetic[1].is_none());
    }

    #[test]
    fn test_fused_score_penalties() {
        let cfg = LocateConfig::default();
        let clean = fused_score(&cfg, 90.0, 0, false, false, false);
        let banded = fused_score(&cfg, 90.0, 0, true, false, false);
        let tocd = fused_score(&cfg, 90.0, 0, false, true, false);
        assert!(clean > banded);
        assert!(clean > tocd);
        assert!((clean - banded) >= cfg.w_pos * 50.0);
    }
}
