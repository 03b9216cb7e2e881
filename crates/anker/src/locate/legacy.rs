//! Loose candidate-search fallback.
//!
//! Headers the primary aligner could not place — unnumbered ones
//! especially — get one more chance with containment heuristics: a number
//! match on raw or normalized text, exact or substring equality of the
//! normalized title, all title tokens present, and finally plain similarity.
//! Candidates are taken at the earliest position at or after the previous
//! anchor.

use ahash::AHashSet;
use serde_json::json;

use crate::numbering::NumberSpec;
use crate::text::{normalize, similarity};
use crate::types::{AnchoredHeader, CandidateHeader, Line, Strategy};

use super::context::RunContext;

/// Similarity floor (0–100) for the last-resort fuzzy scan.
const LEGACY_SIMILARITY_THRESHOLD: f64 = 88.0;

/// Locate `headers` among the eligible lines, skipping `used_gids`.
pub(crate) fn locate_legacy(
    headers: &[CandidateHeader],
    lines: &[Line],
    norms: &[String],
    used_gids: &AHashSet<u32>,
    ctx: &mut RunContext<'_>,
) -> Vec<AnchoredHeader> {
    let usable: Vec<(usize, &Line)> = lines
        .iter()
        .enumerate()
        .filter(|(idx, line)| {
            !ctx.is_blocked(line) && !used_gids.contains(&line.global_idx) && !ctx.is_running_text(&norms[*idx])
        })
        .collect();

    let mut located: Vec<AnchoredHeader> = Vec::new();
    let mut previous_anchor: i64 = -1;

    for header in headers {
        let target = normalize(&header.text, ctx.cfg.fold_confusables);
        if target.is_empty() {
            continue;
        }
        let matcher = header
            .number
            .as_deref()
            .filter(|n| !n.trim().is_empty())
            .and_then(NumberSpec::parse)
            .map(|spec| spec.matcher());
        let target_tokens: Vec<&str> = target.split_whitespace().collect();

        // Containment sweep.
        let mut candidates: Vec<(usize, bool, f64)> = Vec::new(); // (idx, numbered, score)
        for &(idx, line) in &usable {
            let norm = &norms[idx];
            if let Some(matcher) = &matcher {
                if matcher.is_match(&line.text) || matcher.is_match(norm) {
                    candidates.push((idx, true, 100.0));
                    continue;
                }
            }
            if norm == &target || norm.contains(&target) {
                candidates.push((idx, false, 100.0));
                continue;
            }
            if !target_tokens.is_empty() && target_tokens.iter().all(|token| norm.contains(token)) {
                candidates.push((idx, false, 100.0));
            }
        }

        // Similarity sweep only when containment found nothing.
        if candidates.is_empty() {
            for &(idx, _) in &usable {
                let norm = &norms[idx];
                if norm.is_empty() {
                    continue;
                }
                let score = similarity(&target, norm);
                if score >= LEGACY_SIMILARITY_THRESHOLD {
                    candidates.push((idx, false, score));
                }
            }
        }

        if candidates.is_empty() {
            ctx.tracer.ev(
                "fallback_triggered",
                json!({"method": "candidate_search", "reason": "no_candidates", "target": &header.text}),
            );
            continue;
        }

        candidates.sort_by_key(|&(idx, _, _)| lines[idx].global_idx);
        let chosen = candidates
            .iter()
            .find(|&&(idx, _, _)| i64::from(lines[idx].global_idx) >= previous_anchor)
            .or_else(|| candidates.last())
            .copied();
        let Some((idx, numbered, score)) = chosen else {
            continue;
        };

        let line = &lines[idx];
        let monotonic_ok = i64::from(line.global_idx) >= previous_anchor;
        if !monotonic_ok {
            ctx.tracer.ev(
                "monotonic_violation",
                json!({
                    "target": &header.text,
                    "previous_anchor": previous_anchor,
                    "candidate_global": line.global_idx,
                }),
            );
        }

        located.push(AnchoredHeader {
            text: header.text.trim().to_owned(),
            number: header.number.clone().filter(|n| !n.trim().is_empty()),
            level: header.level.max(1),
            page: line.page,
            line_idx: line.line_idx,
            global_idx: line.global_idx,
            source_idx: header.source_idx,
            strategy: if numbered { Strategy::NumTitle } else { Strategy::TitleOnly },
            score,
        });
        previous_anchor = i64::from(line.global_idx);
        ctx.tracer.ev(
            "anchor_resolved",
            json!({
                "scope": "legacy",
                "target": &header.text,
                "page": line.page,
                "global_idx": line.global_idx,
                "monotonic_ok": monotonic_ok,
            }),
        );
    }

    located.sort_by_key(|header| (header.global_idx, header.source_idx));
    located
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LocateConfig;
    use crate::noise::detect_noise;
    use crate::trace::Tracer;

    fn run(lines: Vec<Line>, headers: Vec<CandidateHeader>, used: &[u32]) -> Vec<AnchoredHeader> {
        let cfg = LocateConfig::default();
        let mut tracer = Tracer::new("t");
        let noise = detect_noise(&lines, &cfg);
        let norms: Vec<String> = lines.iter().map(|l| normalize(&l.text, true)).collect();
        let used_gids: AHashSet<u32> = used.iter().copied().collect();
        let mut ctx = RunContext::new(&cfg, &mut tracer, &lines, noise);
        locate_legacy(&headers, &lines, &norms, &used_gids, &mut ctx)
    }

    fn body(texts: &[&str]) -> Vec<Line> {
        texts
            .iter()
            .enumerate()
            .map(|(i, text)| Line::new(i as u32, 1, i as u32, *text))
            .collect()
    }

    #[test]
    fn test_unnumbered_header_found_by_containment() {
        let lines = body(&["intro", "Warranty and Guarantees", "tail"]);
        let headers = vec![CandidateHeader::new("Warranty and Guarantees", None, 1, 0)];
        let located = run(lines, headers, &[]);
        assert_eq!(located.len(), 1);
        assert_eq!(located[0].global_idx, 1);
        assert_eq!(located[0].strategy, Strategy::TitleOnly);
    }

    #[test]
    fn test_all_tokens_containment() {
        let lines = body(&["1.4 Warranty and extended Guarantees apply"]);
        let headers = vec![CandidateHeader::new("Warranty Guarantees", None, 1, 0)];
        let located = run(lines, headers, &[]);
        assert_eq!(located.len(), 1);
    }

    #[test]
    fn test_similarity_last_resort() {
        let lines = body(&["Submital Procedurs"]);
        let headers = vec![CandidateHeader::new("Submittal Procedures", None, 1, 0)];
        let located = run(lines, headers, &[]);
        assert_eq!(located.len(), 1);
        assert!(located[0].score >= 88.0);
    }

    #[test]
    fn test_used_lines_excluded() {
        let lines = body(&["Scope", "Scope"]);
        let headers = vec![CandidateHeader::new("Scope", None, 1, 0)];
        let located = run(lines, headers, &[0]);
        assert_eq!(located.len(), 1);
        assert_eq!(located[0].global_idx, 1);
    }

    #[test]
    fn test_forward_candidate_preferred() {
        let lines = body(&["Overview", "first body", "Details", "Overview", "tail"]);
        let headers = vec![
            CandidateHeader::new("Details", None, 1, 0),
            CandidateHeader::new("Overview", None, 1, 1),
        ];
        let located = run(lines, headers, &[]);
        assert_eq!(located.len(), 2);
        assert_eq!(located[0].global_idx, 2);
        assert_eq!(located[1].global_idx, 3, "must take the occurrence after the cursor");
    }

    #[test]
    fn test_no_candidates_reports_fallback() {
        let lines = body(&["totally unrelated content"]);
        let headers = vec![CandidateHeader::new("Quality Assurance Provisions", None, 1, 0)];
        let located = run(lines, headers, &[]);
        assert!(located.is_empty());
    }
}
