//! Multi-pass invariant repair.
//!
//! The sequential pass optimizes locally; this pass makes the outline
//! globally consistent. Each iteration reanchors parents that landed after
//! their children, relocates descendants into their parent's window, and
//! dedupes repeated numbers, until a fixpoint or the configured pass limit.
//! A final guard repairs any remaining parent-before-child violation by
//! moving the child to a later occurrence of its number, or dropping it —
//! the monotonic ordering of the outline is never sacrificed.

use ahash::AHashMap;
use serde_json::json;

use crate::config::DedupePolicy;
use crate::numbering::NumberSpec;
use crate::text::token_set_ratio;
use crate::types::{AnchoredHeader, CandidateHeader, Line, Strategy};

use super::context::RunContext;
use super::items::{HeaderItem, make_header_items};

/// Lines scanned backwards from the earliest child when reanchoring a parent.
const PARENT_RESCAN_SPAN: usize = 800;
/// Score bonus for numeric evidence in repair scans.
const REPAIR_NUMERIC_BONUS: f64 = 20.0;
/// Band penalty in repair scans.
const REPAIR_BAND_PENALTY: f64 = 15.0;
/// Floor for accepting a reanchored parent.
const REANCHOR_MIN_SCORE: f64 = 70.0;

/// Run the repair passes to a fixpoint.
pub(crate) fn enforce_invariants(
    lines: &[Line],
    norms: &[String],
    bases: &[&str],
    items: &[HeaderItem],
    anchors: &mut AHashMap<String, usize>,
    provenance: &mut AHashMap<String, (Strategy, f64)>,
    ctx: &mut RunContext<'_>,
) {
    let items_by_key: AHashMap<&str, &HeaderItem> = items.iter().map(|item| (item.key.as_str(), item)).collect();

    for pass in 0..ctx.cfg.rescan_passes.max(1) {
        let mut changed = false;

        // Pass A: parents anchored after (or missing before) their children.
        // Parents are visited in outline order (the items are sorted by
        // numbering key), keeping the pass deterministic run to run.
        let mut parent_children: Vec<(String, Vec<String>)> = Vec::new();
        for item in items.iter().filter(|item| item.level >= 2) {
            if let Some(parent) = item.parent_key() {
                match parent_children.iter_mut().find(|(key, _)| *key == parent) {
                    Some((_, kids)) => kids.push(item.key.clone()),
                    None => parent_children.push((parent, vec![item.key.clone()])),
                }
            }
        }
        for (parent_key, kids) in &parent_children {
            let kid_positions: Vec<usize> = kids.iter().filter_map(|kid| anchors.get(kid).copied()).collect();
            let Some(&earliest_child) = kid_positions.iter().min() else {
                continue;
            };
            let needs_fix = anchors.get(parent_key).is_none_or(|&pos| pos > earliest_child);
            if !needs_fix {
                continue;
            }
            if reanchor_parent(
                lines,
                bases,
                &items_by_key,
                parent_key,
                earliest_child,
                anchors,
                provenance,
                ctx,
            ) {
                changed = true;
            }
        }

        // Windows recomputed from the evidence: anchors plus earliest children.
        let windows = compute_windows(lines, items, anchors);

        // Pass B: descendants outside their parent's window, visited in
        // numbering order for run-to-run determinism.
        let mut window_order: Vec<&String> = windows.keys().collect();
        window_order.sort_by_key(|key| items_by_key.get(key.as_str()).map(|item| item.spec.key()));
        for parent_key in window_order {
            let &(_, window_start, window_end) = &windows[parent_key];
            let Some(parent_item) = items_by_key.get(parent_key.as_str()) else {
                continue;
            };
            let mut moves: Vec<(String, usize)> = anchors
                .iter()
                .filter(|&(ref key, &pos)| {
                    key.as_str() != parent_key
                        && items_by_key
                            .get(key.as_str())
                            .is_some_and(|item| item.spec.is_descendant_of(&parent_item.spec))
                        && !(window_start <= pos && pos < window_end)
                })
                .map(|(key, &pos)| (key.clone(), pos))
                .collect();
            moves.sort();
            for (key, old_pos) in moves {
                let Some(item) = items_by_key.get(key.as_str()) else {
                    continue;
                };
                let mut best: Option<(f64, usize)> = None;
                for pos in window_start..window_end.min(lines.len()) {
                    let line = &lines[pos];
                    if ineligible_raw(line, &norms[pos], ctx) {
                        continue;
                    }
                    if !item.query.bears_number(bases[pos]) {
                        continue;
                    }
                    let band = ctx.pages.in_band(line, ctx.cfg.band_lines);
                    let score = repair_score(bases[pos], &item.query.want_full, true, band);
                    if score >= ctx.cfg.fuzzy_threshold && best.is_none_or(|(b, _)| score > b) {
                        best = Some((score, pos));
                    }
                }
                if let Some((score, pos)) = best {
                    ctx.tracer.ev(
                        "child_relocate_to_window",
                        json!({
                            "num": &key,
                            "from_idx": lines[old_pos].global_idx,
                            "to_idx": lines[pos].global_idx,
                            "parent": parent_key,
                        }),
                    );
                    anchors.insert(key.clone(), pos);
                    provenance.insert(key, (Strategy::NumTitle, score));
                    changed = true;
                }
            }
        }

        ctx.tracer.ev(
            "invariants_pass",
            json!({"pass": pass, "changed": changed, "anchors": anchors.len()}),
        );
        if !changed {
            break;
        }
    }
}

/// Run the repair passes over an assembled outline.
///
/// Every aligner variant feeds this: numbered anchors are lifted into the
/// keyed form the passes operate on, repaired, and written back. A parent
/// recovered by Pass A that was missing from the outline (the implied
/// reanchor) is inserted as a new entry; unnumbered headers pass through
/// untouched. Duplicate numbers are left for the dedupe pass.
pub(crate) fn enforce_invariants_outline(
    headers: &mut Vec<AnchoredHeader>,
    lines: &[Line],
    norms: &[String],
    bases: &[&str],
    candidates: &[CandidateHeader],
    ctx: &mut RunContext<'_>,
) {
    if headers.is_empty() {
        return;
    }
    let items = make_header_items(candidates, ctx.cfg.fold_confusables);
    if items.is_empty() {
        return;
    }
    let pos_by_gid: AHashMap<u32, usize> = lines.iter().enumerate().map(|(pos, l)| (l.global_idx, pos)).collect();

    let mut anchors: AHashMap<String, usize> = AHashMap::new();
    let mut provenance: AHashMap<String, (Strategy, f64)> = AHashMap::new();
    // Canonical key -> index of the outline entry it was lifted from.
    let mut entry_of: AHashMap<String, usize> = AHashMap::new();
    for (idx, header) in headers.iter().enumerate() {
        let Some(key) = header.number.as_deref().and_then(NumberSpec::parse).map(|spec| spec.render()) else {
            continue;
        };
        let Some(&pos) = pos_by_gid.get(&header.global_idx) else {
            continue;
        };
        if entry_of.contains_key(&key) {
            continue;
        }
        anchors.insert(key.clone(), pos);
        provenance.insert(key.clone(), (header.strategy, header.score));
        entry_of.insert(key, idx);
    }
    if anchors.is_empty() {
        return;
    }

    enforce_invariants(lines, norms, bases, &items, &mut anchors, &mut provenance, ctx);

    let items_by_key: AHashMap<&str, &HeaderItem> = items.iter().map(|item| (item.key.as_str(), item)).collect();
    let mut inserted: Vec<AnchoredHeader> = Vec::new();
    for (key, &pos) in &anchors {
        let line = &lines[pos];
        match entry_of.get(key) {
            Some(&idx) => {
                if headers[idx].global_idx != line.global_idx {
                    let (strategy, score) = provenance
                        .get(key)
                        .copied()
                        .unwrap_or((headers[idx].strategy, headers[idx].score));
                    headers[idx].global_idx = line.global_idx;
                    headers[idx].page = line.page;
                    headers[idx].line_idx = line.line_idx;
                    headers[idx].strategy = strategy;
                    headers[idx].score = score;
                }
            }
            None => {
                let Some(item) = items_by_key.get(key.as_str()) else {
                    continue;
                };
                let (strategy, score) = provenance
                    .get(key)
                    .copied()
                    .unwrap_or((Strategy::SequentialFallback, 0.0));
                inserted.push(AnchoredHeader {
                    text: item.title.clone(),
                    number: Some(item.number_raw.clone()),
                    level: item.level,
                    page: line.page,
                    line_idx: line.line_idx,
                    global_idx: line.global_idx,
                    source_idx: item.source_idx,
                    strategy,
                    score,
                });
            }
        }
    }
    headers.extend(inserted);
    headers.sort_by_key(|header| (header.global_idx, header.source_idx));
}

/// Scan backwards from the earliest child for a line bearing the parent's
/// number (or matching by title when configured); fall back to an implied
/// anchor at the child itself.
#[allow(clippy::too_many_arguments)]
fn reanchor_parent(
    lines: &[Line],
    bases: &[&str],
    items_by_key: &AHashMap<&str, &HeaderItem>,
    parent_key: &str,
    earliest_child: usize,
    anchors: &mut AHashMap<String, usize>,
    provenance: &mut AHashMap<String, (Strategy, f64)>,
    ctx: &mut RunContext<'_>,
) -> bool {
    let Some(parent_item) = items_by_key.get(parent_key) else {
        return false;
    };
    let scan_start = earliest_child.saturating_sub(PARENT_RESCAN_SPAN);
    let threshold = ctx.cfg.fuzzy_threshold.max(REANCHOR_MIN_SCORE);

    let mut best: Option<(f64, usize, bool)> = None;
    for pos in scan_start..earliest_child {
        let line = &lines[pos];
        if ineligible_raw(line, bases[pos], ctx) {
            continue;
        }
        let has_num = parent_item.query.bears_number(bases[pos]);
        if !has_num && !ctx.cfg.title_only_reanchor {
            continue;
        }
        let band = ctx.pages.in_band(line, ctx.cfg.band_lines);
        let score = repair_score(bases[pos], &parent_item.query.want_full, has_num, band);
        if score >= threshold {
            // Tuple order prefers higher score, then the latest position,
            // matching the closest-preceding-heading intuition.
            let candidate = (score, pos, has_num);
            if best.is_none_or(|b| candidate > b) {
                best = Some(candidate);
            }
        }
    }

    match best {
        Some((score, pos, has_num)) => {
            anchors.insert(parent_key.to_owned(), pos);
            provenance.insert(
                parent_key.to_owned(),
                (if has_num { Strategy::NumTitle } else { Strategy::TitleOnly }, score),
            );
            ctx.tracer.ev(
                "reanchor_parent",
                json!({
                    "num": parent_key,
                    "to_idx": lines[pos].global_idx,
                    "mode": if has_num { "numeric" } else { "title-only" },
                }),
            );
        }
        None => {
            anchors.insert(parent_key.to_owned(), earliest_child);
            provenance
                .entry(parent_key.to_owned())
                .or_insert((Strategy::SequentialFallback, 0.0));
            ctx.tracer.ev(
                "reanchor_parent_implied",
                json!({"num": parent_key, "to_idx": lines[earliest_child].global_idx}),
            );
        }
    }
    true
}

/// Evidence-based windows: each level-1 header owns the range from its
/// anchor (or earliest anchored child, whichever comes first) up to the next
/// level-1 start.
pub(crate) fn compute_windows(
    lines: &[Line],
    items: &[HeaderItem],
    anchors: &AHashMap<String, usize>,
) -> AHashMap<String, (usize, usize, usize)> {
    let mut windows = AHashMap::new();
    if lines.is_empty() || anchors.is_empty() {
        return windows;
    }

    let mut children_earliest: AHashMap<String, usize> = AHashMap::new();
    for item in items.iter().filter(|item| item.level >= 2) {
        let (Some(parent), Some(&pos)) = (item.parent_key(), anchors.get(&item.key)) else {
            continue;
        };
        children_earliest
            .entry(parent)
            .and_modify(|existing| *existing = (*existing).min(pos))
            .or_insert(pos);
    }

    let mut ordered: Vec<(&HeaderItem, usize)> = items
        .iter()
        .filter(|item| item.level == 1)
        .filter_map(|item| {
            let anchor = anchors.get(&item.key).copied();
            let earliest_child = children_earliest.get(&item.key).copied();
            let start = match (anchor, earliest_child) {
                (Some(a), Some(c)) => Some(a.min(c)),
                (Some(a), None) => Some(a),
                (None, Some(c)) => Some(c),
                (None, None) => None,
            };
            start.map(|s| (item, s))
        })
        .collect();
    ordered.sort_by_key(|&(_, start)| start);

    for (rank, &(item, start)) in ordered.iter().enumerate() {
        let end = ordered.get(rank + 1).map_or(lines.len(), |&(_, next)| next);
        let anchor = anchors.get(&item.key).copied().unwrap_or(start);
        windows.insert(item.key.clone(), (anchor, start, end));
    }
    windows
}

/// Final parent-before-child guard over the assembled outline.
///
/// Children anchored at or before their parent move to the last eligible
/// line after the parent bearing their number; with no such occurrence the
/// child is dropped. I2/I3 hold unconditionally afterwards.
pub(crate) fn final_monotonic_guard(
    headers: &mut Vec<AnchoredHeader>,
    lines: &[Line],
    bases: &[&str],
    ctx: &mut RunContext<'_>,
) {
    if !ctx.cfg.final_monotonic_guard {
        return;
    }

    let pos_by_gid: AHashMap<u32, usize> = lines.iter().enumerate().map(|(pos, l)| (l.global_idx, pos)).collect();
    let specs: Vec<Option<crate::numbering::NumberSpec>> = headers
        .iter()
        .map(|h| h.number.as_deref().and_then(crate::numbering::NumberSpec::parse))
        .collect();
    let mut gid_by_key: AHashMap<String, u32> = headers
        .iter()
        .zip(&specs)
        .filter_map(|(h, spec)| spec.as_ref().map(|s| (s.render(), h.global_idx)))
        .collect();

    let mut fixed = 0usize;
    let mut dropped: Vec<usize> = Vec::new();

    for idx in 0..headers.len() {
        let Some(spec) = &specs[idx] else {
            continue;
        };
        let Some(parent_key) = spec.parent().map(|p| p.render()) else {
            continue;
        };
        let Some(&parent_gid) = gid_by_key.get(&parent_key) else {
            continue;
        };
        if parent_gid < headers[idx].global_idx {
            continue;
        }
        let Some(&parent_pos) = pos_by_gid.get(&parent_gid) else {
            continue;
        };

        // Last eligible post-parent occurrence of the child's number.
        let matcher = spec.matcher();
        let repick = (parent_pos + 1..lines.len())
            .filter(|&pos| !ineligible_raw(&lines[pos], bases[pos], ctx))
            .filter(|&pos| matcher.is_match(bases[pos]))
            .next_back();

        match repick {
            Some(pos) => {
                let line = &lines[pos];
                ctx.tracer.ev(
                    "final_monotonic_fix",
                    json!({
                        "num": &headers[idx].number,
                        "new_idx": line.global_idx,
                        "parent": parent_key,
                        "parent_idx": parent_gid,
                    }),
                );
                gid_by_key.insert(spec.render(), line.global_idx);
                headers[idx].global_idx = line.global_idx;
                headers[idx].page = line.page;
                headers[idx].line_idx = line.line_idx;
                fixed += 1;
            }
            None => {
                // Both repairs failed; the child goes rather than the order.
                ctx.tracer.ev(
                    "fallback_triggered",
                    json!({
                        "method": "final_monotonic_guard",
                        "reason": "no_post_parent_occurrence",
                        "num": &headers[idx].number,
                    }),
                );
                dropped.push(idx);
            }
        }
    }

    for idx in dropped.into_iter().rev() {
        headers.remove(idx);
    }
    headers.sort_by_key(|header| (header.global_idx, header.source_idx));
    if fixed > 0 {
        tracing::debug!(fixed, "final monotonic guard moved anchors");
    }
}

/// Drop repeated numbers from an assembled outline (Pass C).
///
/// Policy `best` keeps the highest score (ties: earliest index, lowest
/// source order); `earliest` keeps the smallest index.
pub(crate) fn dedupe_headers(headers: &mut Vec<AnchoredHeader>, ctx: &mut RunContext<'_>) {
    let mut keep: AHashMap<String, usize> = AHashMap::new(); // number -> index into headers
    let mut drop: Vec<usize> = Vec::new();

    for (idx, header) in headers.iter().enumerate() {
        let Some(number) = header.number.as_deref().filter(|n| !n.is_empty()) else {
            continue;
        };
        match keep.get(number) {
            None => {
                keep.insert(number.to_owned(), idx);
            }
            Some(&held_idx) => {
                let held = &headers[held_idx];
                let replace = match ctx.cfg.dedupe_policy {
                    DedupePolicy::Earliest => header.global_idx < held.global_idx,
                    DedupePolicy::Best => {
                        header.score > held.score
                            || (header.score == held.score
                                && (header.global_idx, header.source_idx) < (held.global_idx, held.source_idx))
                    }
                };
                let (kept, dropped) = if replace { (idx, held_idx) } else { (held_idx, idx) };
                ctx.tracer.ev(
                    "dedupe_drop",
                    json!({
                        "num": number,
                        "drop_idx": headers[dropped].global_idx,
                        "keep_idx": headers[kept].global_idx,
                    }),
                );
                keep.insert(number.to_owned(), kept);
                drop.push(dropped);
            }
        }
    }

    drop.sort_unstable();
    for idx in drop.into_iter().rev() {
        headers.remove(idx);
    }
}

fn ineligible_raw(line: &Line, basis: &str, ctx: &RunContext<'_>) -> bool {
    if ctx.noise.toc_pages.contains(&line.page) || line.is_toc || line.is_index {
        return true;
    }
    line.is_running || ctx.is_running_text(basis)
}

fn repair_score(basis: &str, want: &str, has_number: bool, in_band: bool) -> f64 {
    let mut score = token_set_ratio(basis, want);
    if has_number {
        score += REPAIR_NUMERIC_BONUS;
    }
    if in_band {
        score -= REPAIR_BAND_PENALTY;
    }
    score
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LocateConfig;
    use crate::locate::items::make_header_items;
    use crate::noise::NoiseReport;
    use crate::text::normalize;
    use crate::trace::Tracer;
    use crate::types::CandidateHeader;

    fn lines_of(texts: &[&str]) -> Vec<Line> {
        texts
            .iter()
            .enumerate()
            .map(|(i, text)| Line::new(i as u32, 1, i as u32, *text))
            .collect()
    }

    fn setup(texts: &[&str], headers: Vec<CandidateHeader>) -> (Vec<Line>, Vec<String>, Vec<HeaderItem>) {
        let lines = lines_of(texts);
        let norms: Vec<String> = lines.iter().map(|l| normalize(&l.text, true)).collect();
        let items = make_header_items(&headers, true);
        (lines, norms, items)
    }

    #[test]
    fn test_parent_reanchored_before_child() {
        // Parent `1` was anchored after its child; the real heading sits
        // earlier in the body.
        let (lines, norms, items) = setup(
            &["intro", "1 GENERAL", "1.1 Scope", "body", "1 GENERAL (toc copy)"],
            vec![
                CandidateHeader::new("GENERAL", Some("1"), 1, 0),
                CandidateHeader::new("Scope", Some("1.1"), 2, 1),
            ],
        );
        let bases: Vec<&str> = norms.iter().map(String::as_str).collect();
        let cfg = LocateConfig::default();
        let mut tracer = Tracer::new("t");
        let mut ctx = RunContext::new(&cfg, &mut tracer, &lines, NoiseReport::default());

        let mut anchors = AHashMap::new();
        anchors.insert("1".to_owned(), 4usize);
        anchors.insert("1.1".to_owned(), 2usize);
        let mut provenance = AHashMap::new();

        enforce_invariants(&lines, &norms, &bases, &items, &mut anchors, &mut provenance, &mut ctx);
        assert_eq!(anchors["1"], 1, "parent must move before its child");
    }

    #[test]
    fn test_parent_implied_when_no_candidate() {
        // No line bears `2` before the child; the parent anchors at the
        // child's line and the trace records the implied reanchor.
        let (lines, norms, items) = setup(
            &["body text", "2.1 Materials", "more body"],
            vec![
                CandidateHeader::new("PRODUCTS", Some("2"), 1, 0),
                CandidateHeader::new("Materials", Some("2.1"), 2, 1),
            ],
        );
        let bases: Vec<&str> = norms.iter().map(String::as_str).collect();
        let cfg = LocateConfig::default();
        let mut tracer = Tracer::new("t");
        let mut ctx = RunContext::new(&cfg, &mut tracer, &lines, NoiseReport::default());

        let mut anchors = AHashMap::new();
        anchors.insert("2.1".to_owned(), 1usize);
        let mut provenance = AHashMap::new();

        enforce_invariants(&lines, &norms, &bases, &items, &mut anchors, &mut provenance, &mut ctx);
        assert_eq!(anchors["2"], 1);
        assert!(tracer.has_event("reanchor_parent_implied"));
    }

    fn anchored_at(number: &str, text: &str, level: u32, gid: u32, source: u32) -> AnchoredHeader {
        AnchoredHeader {
            text: text.to_owned(),
            number: Some(number.to_owned()),
            level,
            page: 1,
            line_idx: gid,
            global_idx: gid,
            source_idx: source,
            strategy: Strategy::NumTitle,
            score: 100.0,
        }
    }

    #[test]
    fn test_outline_repair_moves_parent_before_child() {
        // An assembled outline (as the strict or vector path can produce)
        // with the parent anchored after its child; Pass A pulls the parent
        // back to its real heading.
        let (lines, norms, _) = setup(
            &["intro", "1 GENERAL", "1.1 Scope", "body", "1 GENERAL"],
            vec![
                CandidateHeader::new("GENERAL", Some("1"), 1, 0),
                CandidateHeader::new("Scope", Some("1.1"), 2, 1),
            ],
        );
        let bases: Vec<&str> = norms.iter().map(String::as_str).collect();
        let candidates = vec![
            CandidateHeader::new("GENERAL", Some("1"), 1, 0),
            CandidateHeader::new("Scope", Some("1.1"), 2, 1),
        ];
        let cfg = LocateConfig::default();
        let mut tracer = Tracer::new("t");
        let mut ctx = RunContext::new(&cfg, &mut tracer, &lines, NoiseReport::default());

        let mut headers = vec![anchored_at("1.1", "Scope", 2, 2, 1), anchored_at("1", "GENERAL", 1, 4, 0)];
        enforce_invariants_outline(&mut headers, &lines, &norms, &bases, &candidates, &mut ctx);

        let parent = headers.iter().find(|h| h.number.as_deref() == Some("1")).unwrap();
        assert_eq!(parent.global_idx, 1, "parent must move back before its child");
        assert!(headers.windows(2).all(|w| w[0].global_idx < w[1].global_idx));
        assert!(tracer.has_event("reanchor_parent"));
    }

    #[test]
    fn test_outline_repair_inserts_implied_parent() {
        // The outline carries only the child; no line before it bears the
        // parent's number, so an implied parent entry lands at the child.
        let (lines, norms, _) = setup(
            &["body text", "2.1 Materials", "more body"],
            vec![CandidateHeader::new("Materials", Some("2.1"), 2, 1)],
        );
        let bases: Vec<&str> = norms.iter().map(String::as_str).collect();
        let candidates = vec![
            CandidateHeader::new("PRODUCTS", Some("2"), 1, 0),
            CandidateHeader::new("Materials", Some("2.1"), 2, 1),
        ];
        let cfg = LocateConfig::default();
        let mut tracer = Tracer::new("t");
        let mut ctx = RunContext::new(&cfg, &mut tracer, &lines, NoiseReport::default());

        let mut headers = vec![anchored_at("2.1", "Materials", 2, 1, 1)];
        enforce_invariants_outline(&mut headers, &lines, &norms, &bases, &candidates, &mut ctx);

        let parent = headers.iter().find(|h| h.number.as_deref() == Some("2")).unwrap();
        assert_eq!(parent.global_idx, 1);
        assert_eq!(parent.strategy, Strategy::SequentialFallback);
        assert!(tracer.has_event("reanchor_parent_implied"));
    }

    #[test]
    fn test_final_guard_moves_child_forward() {
        // Scenario S2 resolution: the child anchored before its parent; it
        // moves to the later occurrence of its number.
        let (lines, norms, _) = setup(
            &["1.1 Scope (toc-ish)", "1 GENERAL", "1.1 Scope", "body"],
            vec![
                CandidateHeader::new("GENERAL", Some("1"), 1, 0),
                CandidateHeader::new("Scope", Some("1.1"), 2, 1),
            ],
        );
        let bases: Vec<&str> = norms.iter().map(String::as_str).collect();
        let cfg = LocateConfig::default();
        let mut tracer = Tracer::new("t");
        let mut ctx = RunContext::new(&cfg, &mut tracer, &lines, NoiseReport::default());

        let mut headers = vec![anchored_at("1.1", "Scope", 2, 0, 1), anchored_at("1", "GENERAL", 1, 1, 0)];
        final_monotonic_guard(&mut headers, &lines, &bases, &mut ctx);
        let child = headers.iter().find(|h| h.number.as_deref() == Some("1.1")).unwrap();
        assert_eq!(child.global_idx, 2);
        assert!(tracer.has_event("final_monotonic_fix"));
        assert!(headers.windows(2).all(|w| w[0].global_idx < w[1].global_idx));
    }

    #[test]
    fn test_final_guard_drops_unrepairable_child() {
        let (lines, norms, _) = setup(
            &["1.1 Scope", "1 GENERAL", "body"],
            vec![
                CandidateHeader::new("GENERAL", Some("1"), 1, 0),
                CandidateHeader::new("Scope", Some("1.1"), 2, 1),
            ],
        );
        let bases: Vec<&str> = norms.iter().map(String::as_str).collect();
        let cfg = LocateConfig::default();
        let mut tracer = Tracer::new("t");
        let mut ctx = RunContext::new(&cfg, &mut tracer, &lines, NoiseReport::default());

        let mut headers = vec![anchored_at("1.1", "Scope", 2, 0, 1), anchored_at("1", "GENERAL", 1, 1, 0)];
        final_monotonic_guard(&mut headers, &lines, &bases, &mut ctx);
        assert!(
            !headers.iter().any(|h| h.number.as_deref() == Some("1.1")),
            "unrepairable child must drop"
        );
        assert!(tracer.has_event("fallback_triggered"));
    }

    #[test]
    fn test_dedupe_best_keeps_higher_score() {
        let cfg = LocateConfig::default();
        let mut tracer = Tracer::new("t");
        let lines = lines_of(&["a", "b"]);
        let mut ctx = RunContext::new(&cfg, &mut tracer, &lines, NoiseReport::default());

        let make = |gid: u32, score: f64, source: u32| AnchoredHeader {
            text: "Scope".to_owned(),
            number: Some("1.1".to_owned()),
            level: 2,
            page: 1,
            line_idx: gid,
            global_idx: gid,
            source_idx: source,
            strategy: Strategy::NumTitle,
            score,
        };
        let mut headers = vec![make(5, 80.0, 0), make(9, 95.0, 1)];
        dedupe_headers(&mut headers, &mut ctx);
        assert_eq!(headers.len(), 1);
        assert_eq!(headers[0].global_idx, 9);
        assert!(tracer.has_event("dedupe_drop"));
    }

    #[test]
    fn test_dedupe_earliest_policy() {
        let cfg = LocateConfig {
            dedupe_policy: DedupePolicy::Earliest,
            ..Default::default()
        };
        let mut tracer = Tracer::new("t");
        let lines = lines_of(&["a"]);
        let mut ctx = RunContext::new(&cfg, &mut tracer, &lines, NoiseReport::default());

        let make = |gid: u32, score: f64| AnchoredHeader {
            text: "Scope".to_owned(),
            number: Some("2".to_owned()),
            level: 1,
            page: 1,
            line_idx: gid,
            global_idx: gid,
            source_idx: 0,
            strategy: Strategy::NumTitle,
            score,
        };
        let mut headers = vec![make(9, 95.0), make(5, 40.0)];
        dedupe_headers(&mut headers, &mut ctx);
        assert_eq!(headers.len(), 1);
        assert_eq!(headers[0].global_idx, 5);
    }

    #[test]
    fn test_compute_windows_uses_earliest_child() {
        let (lines, _, items) = setup(
            &["1.1 Scope", "1 GENERAL", "2 PRODUCTS", "2.1 Materials"],
            vec![
                CandidateHeader::new("GENERAL", Some("1"), 1, 0),
                CandidateHeader::new("Scope", Some("1.1"), 2, 1),
                CandidateHeader::new("PRODUCTS", Some("2"), 1, 2),
                CandidateHeader::new("Materials", Some("2.1"), 2, 3),
            ],
        );
        let mut anchors = AHashMap::new();
        anchors.insert("1".to_owned(), 1usize);
        anchors.insert("1.1".to_owned(), 0usize);
        anchors.insert("2".to_owned(), 2usize);
        anchors.insert("2.1".to_owned(), 3usize);

        let windows = compute_windows(&lines, &items, &anchors);
        // Window `1` starts at the earliest child (position 0).
        assert_eq!(windows["1"], (1, 0, 2));
        assert_eq!(windows["2"], (2, 2, 4));
    }
}
