//! Strict full-document alignment ladder.
//!
//! Each oracle header, in source order, walks a fixed ladder: numeric
//! evidence with a strong title match, a last-occurrence rescue, weak
//! numeric evidence, title-only, and finally the first eligible forward
//! line. The committed cursor only ever moves forward; a header whose only
//! surviving candidates sit at or before it stays unresolved rather than
//! breaking the ordering.

use serde_json::json;

use crate::types::{CandidateHeader, Line, Strategy};

use super::context::RunContext;
use super::score::{HeaderQuery, fused_score, typo_bonus};
use crate::text::token_set_ratio;

/// One strict-ladder anchor.
#[derive(Debug, Clone)]
pub(crate) struct StrictAnchor {
    /// Index into the oracle candidate list.
    pub header_idx: usize,
    /// Arena position of the anchor line.
    pub pos: usize,
    pub score: f64,
    pub strategy: Strategy,
}

/// Align every oracle header against the full document.
pub(crate) fn align_strict(
    lines: &[Line],
    norms: &[String],
    bases: &[&str],
    headers: &[CandidateHeader],
    ctx: &mut RunContext<'_>,
) -> Vec<StrictAnchor> {
    let mut resolved: Vec<StrictAnchor> = Vec::new();
    let mut prev: Option<usize> = None;

    for (header_idx, header) in headers.iter().enumerate() {
        let query = HeaderQuery::new(header, ctx.cfg.fold_confusables);
        let chosen = resolve_header(lines, norms, bases, &query, prev, ctx);

        let Some((pos, score, strategy)) = chosen else {
            ctx.tracer.ev(
                "anchor_unresolved",
                json!({
                    "scope": "strict",
                    "number": &query.number_raw,
                    "title": &header.text,
                    "reason": "no_candidate",
                }),
            );
            continue;
        };

        prev = Some(pos);
        ctx.tracer.ev(
            "anchor_resolved",
            json!({
                "scope": "strict",
                "number": &query.number_raw,
                "title": &header.text,
                "page": lines[pos].page,
                "idx": lines[pos].global_idx,
                "score": score,
                "strategy": strategy,
                "text": truncate(&lines[pos].text, 200),
            }),
        );
        resolved.push(StrictAnchor {
            header_idx,
            pos,
            score,
            strategy,
        });
    }

    resolved.sort_by_key(|anchor| anchor.pos);
    resolved
}

fn resolve_header(
    lines: &[Line],
    norms: &[String],
    bases: &[&str],
    query: &HeaderQuery,
    prev: Option<usize>,
    ctx: &mut RunContext<'_>,
) -> Option<(usize, f64, Strategy)> {
    let after_only = ctx.cfg.after_anchor_only;
    let forward_of = |pos: usize| -> bool { prev.is_none_or(|p| pos > p) };

    // Rung 1: numeric evidence, ranked by the fused score; the acceptance
    // threshold applies to the raw ratio.
    let mut strong: Vec<(f64, usize)> = Vec::new();
    let mut weak: Vec<(f64, usize)> = Vec::new();
    if query.matcher.is_some() {
        for (pos, line) in lines.iter().enumerate() {
            if blocked(line, &norms[pos], ctx) {
                continue;
            }
            if !query.bears_number(bases[pos]) {
                continue;
            }
            let band = ctx.pages.in_band(line, ctx.cfg.band_lines);
            let ratio = token_set_ratio(bases[pos], &query.want_full);
            let fused = fused_score(ctx.cfg, ratio, typo_bonus(line, ctx), band, false, false);
            ctx.tracer.ev(
                "candidate_found",
                json!({
                    "scope": "strict",
                    "number": &query.number_raw,
                    "idx": line.global_idx,
                    "page": line.page,
                    "ratio": ratio,
                    "score": fused,
                    "band": band,
                }),
            );
            if ratio >= ctx.cfg.fuzzy_threshold_numtitle {
                strong.push((fused, pos));
            } else if ratio > 0.0 {
                weak.push((fused, pos));
            }
        }
    }

    let pick_best = |pool: &[(f64, usize)], strategy: Strategy| -> Option<(usize, f64, Strategy)> {
        pool.iter()
            .filter(|&&(_, pos)| !after_only || forward_of(pos))
            // Highest score wins; earliest position breaks ties.
            .max_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(std::cmp::Ordering::Equal).then(b.1.cmp(&a.1)))
            .map(|&(score, pos)| (pos, score, strategy))
    };

    if let Some(found) = pick_best(&strong, Strategy::NumTitle) {
        return Some(found);
    }

    // Rung 2: last-occurrence rescue. Noise-flagged lines become eligible,
    // but the cursor still wins over recall: only forward picks count.
    if ctx.cfg.last_occurrence_fallback && query.matcher.is_some() {
        let rescue = lines
            .iter()
            .enumerate()
            .filter(|(pos, _)| forward_of(*pos))
            .filter(|(pos, _)| query.bears_number(bases[*pos]))
            .filter(|(pos, _)| token_set_ratio(bases[*pos], &query.want_full) >= ctx.cfg.fuzzy_threshold_numtitle)
            .map(|(pos, _)| pos)
            .next_back();
        if let Some(pos) = rescue {
            let score = token_set_ratio(bases[pos], &query.want_full);
            return Some((pos, score, Strategy::LastOccurrence));
        }
        if !strong.is_empty() || !weak.is_empty() {
            ctx.tracer.ev(
                "fallback_triggered",
                json!({
                    "method": "last_occurrence",
                    "reason": "only_pre_cursor_candidates",
                    "number": &query.number_raw,
                }),
            );
        }
    }

    // Rung 3: weak numeric evidence.
    if let Some(found) = pick_best(&weak, Strategy::NumTitleWeak) {
        return Some(found);
    }

    // Rung 4: title-only scan.
    if !query.want_title.is_empty() {
        for (pos, line) in lines.iter().enumerate() {
            if blocked(line, &norms[pos], ctx) {
                continue;
            }
            if after_only && !forward_of(pos) {
                continue;
            }
            let score = token_set_ratio(bases[pos], &query.want_title);
            if score >= ctx.cfg.fuzzy_threshold_title_only {
                return Some((pos, score, Strategy::TitleOnly));
            }
        }
    }

    // Rung 5: first eligible forward line keeps the outline contiguous.
    lines
        .iter()
        .enumerate()
        .find(|(pos, line)| !blocked(line, &norms[*pos], ctx) && (!after_only || forward_of(*pos)))
        .map(|(pos, _)| (pos, 0.0, Strategy::SequentialFallback))
}

fn blocked(line: &Line, norm: &str, ctx: &RunContext<'_>) -> bool {
    line.is_noise() || ctx.noise.toc_pages.contains(&line.page) || ctx.is_running_text(norm)
}

fn truncate(text: &str, limit: usize) -> &str {
    match text.char_indices().nth(limit) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}
