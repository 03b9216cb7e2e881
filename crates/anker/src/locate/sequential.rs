//! Sequential anchor assignment.
//!
//! Level-1 headers anchor first because their anchors delimit the windows
//! every descendant must land in. A cursor tracks the last committed anchor;
//! candidates at or before it are rejected (and recovered through a
//! later-duplicate search when the best match sits behind the cursor).
//! Descendants then anchor inside their parent's padded window, each chain
//! carrying its own cursor.

use ahash::AHashMap;
use regex::Regex;
use serde_json::json;

use crate::numbering::{ComponentKind, NumberSpec};
use crate::text::token_set_ratio;
use crate::types::{Line, Strategy};

use super::context::RunContext;
use super::items::HeaderItem;

/// Score bonus for numeric evidence on a level-1 candidate.
const L1_NUMERIC_BONUS: f64 = 25.0;
/// Score penalty for level-1 candidates in the page band.
const L1_BAND_PENALTY: f64 = 20.0;
/// Score bonus when a child numbering appears shortly after the candidate.
const L1_CHILD_HINT_BONUS: f64 = 5.0;
/// Band penalty applied inside descendant windows.
const CHILD_BAND_PENALTY: f64 = 10.0;

/// Anchor assignment produced by the sequential pass.
#[derive(Debug, Default)]
pub(crate) struct SequentialOutcome {
    /// Canonical numbering key -> arena position of the anchor line.
    pub anchors: AHashMap<String, usize>,
    /// Canonical key -> (strategy, score) provenance.
    pub provenance: AHashMap<String, (Strategy, f64)>,
    /// Canonical key -> (anchor, window start, window end) arena positions.
    pub windows: AHashMap<String, (usize, usize, usize)>,
}

/// Align numbered headers to lines in source order.
pub(crate) fn align_sequential(
    lines: &[Line],
    norms: &[String],
    synthetic: &[Option<String>],
    items: &[HeaderItem],
    ctx: &mut RunContext<'_>,
) -> SequentialOutcome {
    let mut outcome = SequentialOutcome::default();
    if lines.is_empty() || items.is_empty() {
        return outcome;
    }

    // Matching basis per line: the fused appendix text when present,
    // otherwise the line's own normalization.
    let bases: Vec<&str> = synthetic
        .iter()
        .zip(norms)
        .map(|(syn, norm)| syn.as_deref().unwrap_or(norm.as_str()))
        .collect();

    let tops: Vec<&HeaderItem> = items.iter().filter(|item| item.level == 1).collect();
    anchor_top_level(lines, norms, &bases, &tops, ctx, &mut outcome);

    // Windows for the committed level-1 anchors, in numbering order.
    let mut ordered: Vec<(&str, usize)> = tops
        .iter()
        .filter_map(|item| outcome.anchors.get(&item.key).map(|&pos| (item.key.as_str(), pos)))
        .collect();
    ordered.sort_by_key(|&(_, pos)| pos);
    for (rank, &(key, pos)) in ordered.iter().enumerate() {
        let end = ordered.get(rank + 1).map_or(lines.len(), |&(_, next)| next);
        outcome.windows.insert(key.to_owned(), (pos, pos, end));
        ctx.tracer.ev(
            "window_top",
            json!({
                "num": key,
                "start": lines[pos].global_idx,
                "end": lines.get(end.saturating_sub(1)).map(|l| l.global_idx),
            }),
        );
    }

    anchor_descendants(lines, norms, &bases, items, ctx, &mut outcome);
    outcome
}

fn anchor_top_level(
    lines: &[Line],
    norms: &[String],
    bases: &[&str],
    tops: &[&HeaderItem],
    ctx: &mut RunContext<'_>,
    outcome: &mut SequentialOutcome,
) {
    let mut cursor: Option<usize> = None;

    for item in tops {
        let passes: &[u8] = if ctx.cfg.l1_require_numeric { &[1, 2] } else { &[2] };
        let mut best: Option<(f64, usize, bool, bool)> = None; // (score, pos, has_num, band)

        for &pass in passes {
            let scan_start = if ctx.cfg.after_anchor_only {
                cursor.map_or(0, |c| c + 1)
            } else {
                0
            };
            for idx in scan_start..lines.len() {
                let Some((score, has_num, band)) = score_l1_candidate(lines, norms, bases, idx, item, ctx) else {
                    continue;
                };
                if pass == 1 && !has_num {
                    continue;
                }
                // Strictly-greater keeps the earliest index on equal scores;
                // the numeric bonus and band penalty already fold the
                // remaining tie-break cues into the score itself.
                if best.is_none_or(|(best_score, _, _, _)| score > best_score) {
                    best = Some((score, idx, has_num, band));
                }
            }
            if best.is_some() {
                break;
            }
        }

        let Some((score, best_pos, has_num, _)) = best else {
            ctx.tracer.ev("anchor_unresolved", json!({"scope": "top", "num": &item.key}));
            continue;
        };

        let mut chosen = best_pos;
        if let Some(cursor_pos) = cursor {
            if chosen <= cursor_pos {
                ctx.tracer.ev(
                    "monotonic_violation",
                    json!({
                        "scope": "top",
                        "num": &item.key,
                        "idx": lines[chosen].global_idx,
                        "cursor": lines[cursor_pos].global_idx,
                    }),
                );
                match find_later_duplicate(lines, norms, chosen, ctx) {
                    Some(later) => chosen = later,
                    None => {
                        ctx.tracer.ev(
                            "anchor_unresolved",
                            json!({"scope": "top", "num": &item.key, "reason": "no_later_duplicate"}),
                        );
                        continue;
                    }
                }
            }
        }

        outcome.anchors.insert(item.key.clone(), chosen);
        outcome.provenance.insert(
            item.key.clone(),
            (if has_num { Strategy::NumTitle } else { Strategy::TitleOnly }, score),
        );
        cursor = Some(chosen);
        ctx.tracer.ev(
            "anchor_resolved",
            json!({
                "scope": "top",
                "num": &item.key,
                "idx": lines[chosen].global_idx,
                "score": score,
                "numeric": has_num,
            }),
        );
    }
}

fn score_l1_candidate(
    lines: &[Line],
    norms: &[String],
    bases: &[&str],
    idx: usize,
    item: &HeaderItem,
    ctx: &RunContext<'_>,
) -> Option<(f64, bool, bool)> {
    let line = &lines[idx];
    if ctx.noise.toc_pages.contains(&line.page) || line.is_toc || line.is_index {
        return None;
    }
    if line.is_running || ctx.is_running_text(&norms[idx]) {
        return None;
    }

    let text = bases[idx];
    let has_num = item.query.bears_number(text);
    let mut score = token_set_ratio(text, &item.query.want_full);
    if has_num {
        score += L1_NUMERIC_BONUS;
    }
    let band = ctx.pages.in_band(line, ctx.cfg.band_lines);
    if band {
        score -= L1_BAND_PENALTY;
    }
    if has_child_hint(lines, norms, idx, &item.spec, ctx) {
        score += L1_CHILD_HINT_BONUS;
    }
    Some((score, has_num, band))
}

/// True when a `<number>.<digit>` child heading appears within the lookahead
/// after `idx`, which strongly suggests `idx` is the section opening.
fn has_child_hint(lines: &[Line], norms: &[String], idx: usize, spec: &NumberSpec, ctx: &RunContext<'_>) -> bool {
    let lookahead = ctx.cfg.l1_child_hint_lookahead;
    if lookahead == 0 {
        return false;
    }
    let Some(pattern) = child_hint_pattern(spec) else {
        return false;
    };
    let end = lines.len().min(idx + 1 + lookahead);
    for offset in idx + 1..end {
        let line = &lines[offset];
        if ctx.noise.toc_pages.contains(&line.page) {
            continue;
        }
        if line.is_running || ctx.is_running_text(&norms[offset]) {
            continue;
        }
        if pattern.is_match(&line.text) {
            return true;
        }
    }
    false
}

fn child_hint_pattern(spec: &NumberSpec) -> Option<Regex> {
    let components = spec.components();
    if components.is_empty() {
        return None;
    }
    let mut core = String::new();
    for (idx, component) in components.iter().enumerate() {
        let escaped = regex::escape(&component.raw);
        if idx == 0 {
            core.push_str(&escaped);
            continue;
        }
        let prev = &components[idx - 1];
        if prev.kind == ComponentKind::Numeric && component.kind == ComponentKind::Numeric {
            core.push_str(&format!(r"\.{escaped}"));
        } else {
            core.push_str(&format!(r"[.\s]*{escaped}"));
        }
    }
    Regex::new(&format!(r"(?i)^\s*{core}[.\s]*\d+")).ok()
}

/// First eligible line after `start` whose normalization equals `start`'s.
fn find_later_duplicate(lines: &[Line], norms: &[String], start: usize, ctx: &RunContext<'_>) -> Option<usize> {
    let target = &norms[start];
    for idx in start + 1..lines.len() {
        let line = &lines[idx];
        if ctx.noise.toc_pages.contains(&line.page) || line.is_toc || line.is_index {
            continue;
        }
        if line.is_running || ctx.is_running_text(&norms[idx]) {
            continue;
        }
        if &norms[idx] == target {
            return Some(idx);
        }
    }
    None
}

fn anchor_descendants(
    lines: &[Line],
    norms: &[String],
    bases: &[&str],
    items: &[HeaderItem],
    ctx: &mut RunContext<'_>,
    outcome: &mut SequentialOutcome,
) {
    let mut chain_cursor: AHashMap<String, usize> =
        outcome.windows.iter().map(|(key, &(anchor, _, _))| (key.clone(), anchor)).collect();

    for item in items.iter().filter(|item| item.level >= 2) {
        let Some(parent_key) = item.parent_key() else {
            continue;
        };
        let Some(&(parent_anchor, _, parent_end)) = outcome.windows.get(&parent_key) else {
            ctx.tracer.ev(
                "anchor_unresolved",
                json!({"scope": "child", "num": &item.key, "reason": "missing_parent", "parent": parent_key}),
            );
            continue;
        };

        let pad = ctx.cfg.window_pad;
        let start = parent_anchor.saturating_sub(pad);
        let end = lines.len().min(parent_end + pad);
        let cursor = chain_cursor.get(&parent_key).copied();

        let Some((pos, score, strategy)) = find_in_window(lines, norms, bases, start, end, item, cursor, ctx) else {
            continue;
        };

        outcome.anchors.insert(item.key.clone(), pos);
        outcome.provenance.insert(item.key.clone(), (strategy, score));
        chain_cursor.insert(item.key.clone(), pos);
        outcome.windows.insert(item.key.clone(), (pos, pos, end.max(pos + 1)));
        ctx.tracer.ev(
            "anchor_resolved",
            json!({
                "scope": "child",
                "num": &item.key,
                "idx": lines[pos].global_idx,
                "page": lines[pos].page,
                "score": score,
            }),
        );
    }
}

/// Best in-window candidate bearing the item's number.
#[allow(clippy::too_many_arguments)]
fn find_in_window(
    lines: &[Line],
    norms: &[String],
    bases: &[&str],
    start: usize,
    end: usize,
    item: &HeaderItem,
    cursor: Option<usize>,
    ctx: &mut RunContext<'_>,
) -> Option<(usize, f64, Strategy)> {
    let scan_start = (start + 1).min(lines.len());
    let scan_end = end.min(lines.len());
    let mut best: Option<(f64, usize)> = None;

    for idx in scan_start..scan_end {
        let line = &lines[idx];
        if ctx.noise.toc_pages.contains(&line.page) || line.is_toc || line.is_index {
            continue;
        }
        if line.is_running || ctx.is_running_text(&norms[idx]) {
            continue;
        }
        let text = bases[idx];
        if !item.query.bears_number(text) {
            continue;
        }
        let mut score = token_set_ratio(text, &item.query.want_full);
        if ctx.pages.in_band(line, ctx.cfg.band_lines) {
            score -= CHILD_BAND_PENALTY;
        }
        ctx.tracer.ev(
            "candidate_found",
            json!({
                "num": &item.key,
                "idx": line.global_idx,
                "page": line.page,
                "score": score,
                "text": truncate(&line.text, 200),
            }),
        );
        if score >= ctx.cfg.fuzzy_threshold && best.is_none_or(|(best_score, _)| score > best_score) {
            best = Some((score, idx));
        }
    }

    if let Some((score, idx)) = best {
        match cursor {
            Some(cursor_pos) if ctx.cfg.after_anchor_only && idx <= cursor_pos => {
                ctx.tracer.ev(
                    "monotonic_violation",
                    json!({
                        "scope": "child",
                        "num": &item.key,
                        "idx": lines[idx].global_idx,
                        "cursor": lines[cursor_pos].global_idx,
                    }),
                );
            }
            _ => return Some((idx, score, Strategy::NumTitle)),
        }
    }

    // Number-only fallback: any in-window line bearing the number.
    for idx in scan_start..scan_end {
        let line = &lines[idx];
        if ctx.noise.toc_pages.contains(&line.page) || line.is_toc || line.is_index {
            continue;
        }
        if line.is_running || ctx.is_running_text(&norms[idx]) {
            continue;
        }
        if !item.query.bears_number(bases[idx]) {
            continue;
        }
        if let Some(cursor_pos) = cursor {
            if ctx.cfg.after_anchor_only && idx <= cursor_pos {
                continue;
            }
        }
        let score = token_set_ratio(bases[idx], &item.query.want_full);
        return Some((idx, score, Strategy::NumTitleWeak));
    }

    ctx.tracer.ev("anchor_unresolved", json!({"scope": "child", "num": &item.key}));
    None
}

fn truncate(text: &str, limit: usize) -> &str {
    match text.char_indices().nth(limit) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}
