//! Embedding-ranked candidate path.
//!
//! Windows and headers are embedded once per document; each header then
//! ranks windows by a fused score of lexical ratio, cosine similarity, font
//! prominence, and page-top position. Both gates must pass before a window
//! competes at all. Selection respects the same forward-cursor discipline
//! as every other aligner.

use ahash::AHashMap;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::json;

use crate::embed::{Embedder, EmbeddingCache, WindowEmbeddingCache, cosine, embed_batch_cached};
use crate::error::Result;
use crate::text::token_set_ratio;
use crate::types::{AnchoredHeader, CandidateHeader, Line, Strategy};

use super::context::RunContext;
use super::score::{HeaderQuery, ScoredCandidate, Scorer};
use super::windows::{LineWindow, build_windows};

static TOC_TAIL: Lazy<Regex> = Lazy::new(|| Regex::new(r"\.{2,}\s*\d{1,4}\s*$").expect("toc tail pattern"));

/// True when a window's text reads like a TOC or index entry.
pub(crate) fn is_probably_toc(text: &str) -> bool {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return false;
    }
    let lower = trimmed.to_lowercase();
    if lower.contains("table of contents") || lower.starts_with("contents") {
        return true;
    }
    if lower.starts_with("index ") || lower.starts_with("index\n") {
        return true;
    }
    TOC_TAIL.is_match(trimmed)
}

/// Window scorer fusing lexical, cosine, and layout signals.
pub(crate) struct VectorScorer<'a> {
    header_vector: &'a [f32],
    /// (start_gid, end_gid) -> row in the window embedding matrix.
    rows: &'a AHashMap<(u32, u32), usize>,
    matrix: &'a [Vec<f32>],
    weights: [f64; 4],
    min_lexical: f64,
    min_cosine: f64,
}

impl Scorer for VectorScorer<'_> {
    fn score_window(&self, query: &HeaderQuery, window: &LineWindow, ctx: &RunContext<'_>) -> Option<ScoredCandidate> {
        if window.is_running || is_probably_toc(&window.text) {
            return None;
        }
        let lexical = token_set_ratio(&window.text.to_lowercase(), &query.want_title) / 100.0;
        let cos = self
            .rows
            .get(&(window.start_gid, window.end_gid))
            .and_then(|&row| self.matrix.get(row))
            .map_or(0.0, |row| f64::from(cosine(self.header_vector, row)));
        if lexical < self.min_lexical || cos < self.min_cosine {
            return None;
        }
        let font_rank = ctx.pages.font_rank(window.page, window.font_max);
        let y_bonus = ctx.pages.y_bonus(window.page, window.y_top);
        let fused = self.weights[0] * lexical + self.weights[1] * cos + self.weights[2] * font_rank + self.weights[3] * y_bonus;
        Some(ScoredCandidate {
            pos: window.start_pos,
            score: fused,
            ratio: lexical * 100.0,
            strategy: Strategy::Vector,
            band: false,
            has_number: false,
        })
    }

    fn threshold(&self) -> f64 {
        self.min_lexical
    }
}

/// Locate headers through the embedding path.
///
/// Errors surface as [`crate::error::AnkerError::EmbedderUnavailable`]; the
/// orchestrator falls back to lexical alignment.
pub(crate) fn locate_with_vectors(
    lines: &[Line],
    headers: &[CandidateHeader],
    embedder: &dyn Embedder,
    embed_cache: Option<&EmbeddingCache>,
    window_cache: Option<&WindowEmbeddingCache>,
    doc_hash: &str,
    ctx: &mut RunContext<'_>,
) -> Result<Vec<AnchoredHeader>> {
    let excluded = ctx.noise.excluded_pages().into_iter().collect();
    let windows = build_windows(lines, &excluded);
    if windows.is_empty() || headers.is_empty() {
        return Ok(Vec::new());
    }

    let window_texts: Vec<String> = windows.iter().map(|w| w.text.clone()).collect();
    let cache_key = format!("{doc_hash}-windows");
    let matrix = match window_cache.and_then(|cache| cache.load(&cache_key, window_texts.len())) {
        Some(cached) => cached,
        None => {
            let fresh = embed_batch_cached(embedder, embed_cache, &window_texts)?;
            if let Some(cache) = window_cache {
                if let Err(err) = cache.store(&cache_key, &fresh) {
                    tracing::warn!(error = %err, "window embedding cache write failed");
                }
            }
            fresh
        }
    };

    let header_texts: Vec<String> = headers.iter().map(|h| h.text.clone()).collect();
    let header_matrix = embed_batch_cached(embedder, embed_cache, &header_texts)?;

    let rows: AHashMap<(u32, u32), usize> = windows
        .iter()
        .enumerate()
        .map(|(row, w)| ((w.start_gid, w.end_gid), row))
        .collect();
    let weights = ctx.cfg.normalized_fuse_weights();

    let mut resolved: Vec<AnchoredHeader> = Vec::new();
    let mut prev_gid: i64 = -1;

    for (index, header) in headers.iter().enumerate() {
        let query = HeaderQuery::new(header, ctx.cfg.fold_confusables);
        let empty: Vec<f32> = Vec::new();
        let scorer = VectorScorer {
            header_vector: header_matrix.get(index).map_or(empty.as_slice(), Vec::as_slice),
            rows: &rows,
            matrix: &matrix,
            weights,
            min_lexical: ctx.cfg.min_lexical,
            min_cosine: ctx.cfg.min_cosine,
        };

        let mut candidates: Vec<(&LineWindow, ScoredCandidate)> = windows
            .iter()
            .filter_map(|window| scorer.score_window(&query, window, ctx).map(|sc| (window, sc)))
            .collect();
        candidates.sort_by(|a, b| {
            b.1.score
                .partial_cmp(&a.1.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.0.start_gid.cmp(&b.0.start_gid))
        });

        ctx.tracer.ev(
            "candidate_found",
            json!({
                "scope": "vector",
                "header": &header.text,
                "level": header.level,
                "candidates": candidates
                    .iter()
                    .take(3)
                    .map(|(w, sc)| json!({"page": w.page, "start": w.start_gid, "fused": sc.score}))
                    .collect::<Vec<_>>(),
            }),
        );

        let anchor = candidates.iter().find(|(w, _)| i64::from(w.start_gid) > prev_gid);
        let Some((window, scored)) = anchor else {
            ctx.tracer.ev(
                "anchor_unresolved",
                json!({"scope": "vector", "header": &header.text, "level": header.level}),
            );
            continue;
        };

        prev_gid = i64::from(window.start_gid);
        resolved.push(AnchoredHeader {
            text: header.text.clone(),
            number: header.number.clone().filter(|n| !n.trim().is_empty()),
            level: header.level.max(1),
            page: window.page,
            line_idx: window.start_line_idx,
            global_idx: window.start_gid,
            source_idx: header.source_idx,
            strategy: Strategy::Vector,
            score: scored.score,
        });
        ctx.tracer.ev(
            "anchor_resolved",
            json!({
                "scope": "vector",
                "header": &header.text,
                "page": window.page,
                "global_idx": window.start_gid,
                "fused": scored.score,
            }),
        );
    }

    Ok(resolved)
}
