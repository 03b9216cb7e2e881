//! Header location pipeline.
//!
//! One `Locator::locate` call takes a document end-to-end: normalize the
//! lines, classify noise pages and running text, align the oracle outline
//! (strict ladder, embedding ranking, or sequential search with the legacy
//! fallback), repair ordering invariants, fill numbering gaps, and emit the
//! section spans. Every decision lands in the tracer; identical inputs
//! produce identical results.

mod context;
mod exact;
mod gaps;
mod items;
mod legacy;
mod repair;
mod score;
mod sections;
mod sequential;
mod strict;
mod vector;
mod windows;

pub use context::{PageIndex, RunContext};
pub use exact::{ExactMatch, find_exact_occurrences};
pub use score::{HeaderQuery, LexicalScorer, ScoredCandidate, Scorer, synthetic_texts};
pub use sections::{SectionChunk, chunk_section_texts, make_section_key};
pub use windows::{LineWindow, build_windows, tokenize};

use ahash::{AHashMap, AHashSet};
use serde_json::{Value, json};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use crate::cache::{ResultCache, inputs_digest};
use crate::config::LocateConfig;
use crate::embed::{Embedder, EmbeddingCache, WindowEmbeddingCache};
use crate::error::{AnkerError, Result};
use crate::noise::{apply_noise, detect_noise};
use crate::oracle::{HeaderOracle, parse_outline};
use crate::text::normalize;
use crate::trace::Tracer;
use crate::types::{AnchoredHeader, CandidateHeader, Line, LocateMode, LocateResult, Strategy};

/// Sequential coverage below which its result is discarded.
const MIN_SEQUENTIAL_COVERAGE: f64 = 0.6;

/// Cooperative cancellation flag checked between pipeline phases.
///
/// A cancelled run returns [`AnkerError::Cancelled`]; partial anchors are
/// discarded, never returned.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        CancelToken::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Relaxed)
    }
}

/// The header location engine.
///
/// Construction wires in the configuration and the optional collaborators:
/// an embedding provider, the vector caches, and the result cache. The
/// locator itself is stateless across runs.
pub struct Locator<'a> {
    cfg: LocateConfig,
    metadata: Value,
    embedder: Option<&'a dyn Embedder>,
    embed_cache: Option<&'a EmbeddingCache>,
    window_cache: Option<&'a WindowEmbeddingCache>,
    result_cache: Option<&'a ResultCache>,
    cancel: CancelToken,
}

impl<'a> Locator<'a> {
    pub fn new(cfg: LocateConfig) -> Self {
        Locator {
            cfg,
            metadata: Value::Null,
            embedder: None,
            embed_cache: None,
            window_cache: None,
            result_cache: None,
            cancel: CancelToken::new(),
        }
    }

    /// Caller metadata folded into the cache key.
    pub fn with_metadata(mut self, metadata: Value) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn with_embedder(mut self, embedder: &'a dyn Embedder) -> Self {
        self.embedder = Some(embedder);
        self
    }

    pub fn with_embedding_cache(mut self, cache: &'a EmbeddingCache) -> Self {
        self.embed_cache = Some(cache);
        self
    }

    pub fn with_window_cache(mut self, cache: &'a WindowEmbeddingCache) -> Self {
        self.window_cache = Some(cache);
        self
    }

    pub fn with_result_cache(mut self, cache: &'a ResultCache) -> Self {
        self.result_cache = Some(cache);
        self
    }

    pub fn with_cancel_token(mut self, token: CancelToken) -> Self {
        self.cancel = token;
        self
    }

    /// Full run: ask the oracle for an outline, then locate it.
    ///
    /// Oracle transport failures are recovered: the run completes with an
    /// empty outline and mode `llm_full_error`.
    pub fn locate(
        &self,
        lines: Vec<Line>,
        oracle: &dyn HeaderOracle,
        doc_hash: &str,
        tracer: &mut Tracer,
    ) -> Result<LocateResult> {
        let doc_text: String = lines.iter().map(|line| line.text.as_str()).collect::<Vec<_>>().join("\n");
        let (candidates, mode, message) = match oracle.fetch_outline(&doc_text) {
            Ok(raw) => {
                let parsed = parse_outline(&raw);
                if parsed.is_empty() {
                    tracer.ev(
                        "fallback_triggered",
                        json!({"method": "llm_full", "reason": "empty_or_invalid_outline"}),
                    );
                }
                (parsed, LocateMode::LlmFull, None)
            }
            Err(err) => {
                tracing::warn!(error = %err, "header oracle failed");
                tracer.ev(
                    "fallback_triggered",
                    json!({"method": "llm_full", "reason": "exception", "message": err.to_string()}),
                );
                (Vec::new(), LocateMode::LlmFullError, Some(err.to_string()))
            }
        };
        let mut result = self.run(lines, candidates, mode, doc_hash, tracer)?;
        if let Some(message) = message {
            result.messages.insert(0, message);
        }
        Ok(result)
    }

    /// Locate an already-parsed candidate outline.
    pub fn locate_outline(
        &self,
        lines: Vec<Line>,
        candidates: Vec<CandidateHeader>,
        doc_hash: &str,
        tracer: &mut Tracer,
    ) -> Result<LocateResult> {
        self.run(lines, candidates, LocateMode::LlmFull, doc_hash, tracer)
    }

    /// Run with the oracle disabled by configuration.
    pub fn locate_without_oracle(&self, lines: Vec<Line>, doc_hash: &str, tracer: &mut Tracer) -> Result<LocateResult> {
        tracer.ev(
            "fallback_triggered",
            json!({"method": "llm_disabled", "reason": "configuration"}),
        );
        let mut result = self.run(lines, Vec::new(), LocateMode::LlmDisabled, doc_hash, tracer)?;
        result.messages.push("header oracle is disabled by configuration".to_owned());
        Ok(result)
    }

    fn mode_key(&self) -> &'static str {
        if self.cfg.strict_align {
            "llm_strict"
        } else if self.cfg.use_embeddings {
            "llm_vector"
        } else {
            "llm_full"
        }
    }

    fn check_cancelled(&self) -> Result<()> {
        if self.cancel.is_cancelled() {
            return Err(AnkerError::Cancelled);
        }
        Ok(())
    }

    fn run(
        &self,
        mut lines: Vec<Line>,
        candidates: Vec<CandidateHeader>,
        initial_mode: LocateMode,
        doc_hash: &str,
        tracer: &mut Tracer,
    ) -> Result<LocateResult> {
        let started = Instant::now();
        tracer.ev(
            "start_run",
            json!({
                "mode": self.mode_key(),
                "cfg": {
                    "suppress_toc": self.cfg.suppress_toc,
                    "suppress_running": self.cfg.suppress_running,
                },
                "metadata": &self.metadata,
            }),
        );

        lines.retain(|line| !line.text.trim().is_empty());
        lines.sort_by_key(|line| line.global_idx);
        if lines.is_empty() {
            return Err(AnkerError::NoLines);
        }

        // Cache replay short-circuits the whole pipeline.
        let cache_key = inputs_digest(
            doc_hash,
            self.mode_key(),
            self.cfg.suppress_toc,
            self.cfg.suppress_running,
            &self.metadata,
        );
        if let Some(cached) = self.result_cache.as_ref().and_then(|cache| cache.get(&cache_key)) {
            return Ok(self.replay_cached(cached, started, tracer));
        }

        self.check_cancelled()?;

        for line in &mut lines {
            line.normalized_text = normalize(&line.text, self.cfg.fold_confusables);
        }
        let noise = detect_noise(&lines, &self.cfg);
        apply_noise(&mut lines, &noise);
        let excluded_pages: Vec<u32> = noise.excluded_pages();

        tracer.ev(
            "doc_stats",
            json!({
                "pages": lines.iter().map(|l| l.page).collect::<std::collections::BTreeSet<_>>().len(),
                "lines": lines.len(),
                "excluded_pages": &excluded_pages,
            }),
        );
        for &page in &noise.toc_pages {
            tracer.ev("toc_detected", json!({"page": page, "reason": "toc"}));
        }
        for &page in &noise.index_pages {
            tracer.ev("toc_detected", json!({"page": page, "reason": "index"}));
        }
        let mut running_sorted: Vec<&String> = noise.running_texts.iter().collect();
        running_sorted.sort();
        for text in running_sorted {
            tracer.ev("running_header_filtered", json!({"text": text}));
        }

        tracer.ev(
            "llm_outline_received",
            json!({"count": candidates.len(), "headers": &candidates}),
        );

        self.check_cancelled()?;

        let norms: Vec<String> = lines.iter().map(|line| line.normalized_text.clone()).collect();
        let synthetic = synthetic_texts(&lines, self.cfg.fold_confusables);
        let bases: Vec<&str> = synthetic
            .iter()
            .zip(&norms)
            .map(|(syn, norm)| syn.as_deref().unwrap_or(norm.as_str()))
            .collect();

        let mut messages: Vec<String> = Vec::new();
        let mut mode = initial_mode;
        let mut located: Vec<AnchoredHeader> = Vec::new();

        {
            let mut ctx = RunContext::new(&self.cfg, tracer, &lines, noise);

            // Page-hinted exact matching feeds the audit trail.
            if candidates.iter().any(|candidate| candidate.page.is_some()) {
                let matches = find_exact_occurrences(&candidates, &lines, &self.cfg);
                let found = matches.iter().filter(|m| m.found).count();
                ctx.tracer.ev(
                    "exact_match_report",
                    json!({"found": found, "total": matches.len()}),
                );
            }

            if !candidates.is_empty() && !matches!(mode, LocateMode::LlmFullError | LocateMode::LlmDisabled) {
                // Strict ladder.
                if self.cfg.strict_align {
                    let anchors = strict::align_strict(&lines, &norms, &bases, &candidates, &mut ctx);
                    if anchors.is_empty() {
                        ctx.tracer.ev(
                            "fallback_triggered",
                            json!({"method": "llm_strict", "reason": "no_candidates"}),
                        );
                    } else {
                        located = anchors
                            .into_iter()
                            .map(|anchor| {
                                let header = &candidates[anchor.header_idx];
                                let line = &lines[anchor.pos];
                                AnchoredHeader {
                                    text: header.text.trim().to_owned(),
                                    number: header.number.clone().filter(|n| !n.trim().is_empty()),
                                    level: header.level.max(1),
                                    page: line.page,
                                    line_idx: line.line_idx,
                                    global_idx: line.global_idx,
                                    source_idx: header.source_idx,
                                    strategy: anchor.strategy,
                                    score: anchor.score,
                                }
                            })
                            .collect();
                        mode = LocateMode::LlmStrict;
                    }
                }

                // Embedding-ranked path.
                if located.is_empty() && self.cfg.use_embeddings {
                    match self.embedder {
                        Some(embedder) => {
                            match vector::locate_with_vectors(
                                &lines,
                                &candidates,
                                embedder,
                                self.embed_cache,
                                self.window_cache,
                                doc_hash,
                                &mut ctx,
                            ) {
                                Ok(found) if !found.is_empty() => {
                                    located = found;
                                    mode = LocateMode::LlmVector;
                                }
                                Ok(_) => {
                                    ctx.tracer.ev(
                                        "fallback_triggered",
                                        json!({"method": "vector", "reason": "no_candidates"}),
                                    );
                                }
                                Err(err) => {
                                    tracing::warn!(error = %err, "vector locator failed");
                                    ctx.tracer.ev(
                                        "fallback_triggered",
                                        json!({"method": "vector", "reason": "exception", "message": err.to_string()}),
                                    );
                                    messages
                                        .push("vector header locator unavailable; using sequential alignment".to_owned());
                                }
                            }
                        }
                        None => {
                            ctx.tracer.ev(
                                "fallback_triggered",
                                json!({"method": "vector", "reason": "no_embedder"}),
                            );
                        }
                    }
                }

                // Sequential alignment with the legacy sweep behind it.
                if located.is_empty() {
                    located = self.sequential_with_legacy(&lines, &norms, &synthetic, &candidates, &mut ctx);
                }
            }

            // Invariant repair runs the same way for every aligner variant.
            repair::enforce_invariants_outline(&mut located, &lines, &norms, &bases, &candidates, &mut ctx);
            repair::dedupe_headers(&mut located, &mut ctx);
            repair::final_monotonic_guard(&mut located, &lines, &bases, &mut ctx);

            if gaps::fill_gaps(&mut located, &lines, &mut ctx) {
                // One more full invariant pass over the grown outline.
                repair::enforce_invariants_outline(&mut located, &lines, &norms, &bases, &candidates, &mut ctx);
                repair::dedupe_headers(&mut located, &mut ctx);
                repair::final_monotonic_guard(&mut located, &lines, &bases, &mut ctx);
            }
            located.sort_by_key(|header| (header.global_idx, header.source_idx));

            let sections = sections::build_section_spans(&mut located, &lines, &mut ctx);

            let elapsed = started.elapsed().as_secs_f64();
            ctx.tracer.ev(
                "final_outline",
                json!({
                    "headers": &located,
                    "sections": &sections,
                    "mode": mode,
                    "messages": &messages,
                    "elapsed_s": elapsed,
                }),
            );
            ctx.tracer.ev(
                "end_run",
                json!({
                    "elapsed_s": elapsed,
                    "total_headers": located.len(),
                    "mode": mode,
                    "doc_hash": doc_hash,
                }),
            );

            let result = LocateResult {
                headers: located,
                sections,
                mode,
                messages,
                excluded_pages,
                doc_hash: doc_hash.to_owned(),
                trace: ctx.tracer.is_enabled().then(|| ctx.tracer.events().to_vec()),
            };

            if let Some(cache) = self.result_cache {
                if let Err(err) = cache.put(&cache_key, &result) {
                    tracing::warn!(error = %err, "result cache write failed");
                }
            }

            Ok(result)
        }
    }

    /// Sequential alignment, discarded below the coverage floor, with the
    /// legacy candidate search covering whatever is left.
    ///
    /// Invariant repair is not run here; the orchestrator applies the full
    /// repair stage to whichever aligner's output survives.
    fn sequential_with_legacy(
        &self,
        lines: &[Line],
        norms: &[String],
        synthetic: &[Option<String>],
        candidates: &[CandidateHeader],
        ctx: &mut RunContext<'_>,
    ) -> Vec<AnchoredHeader> {
        let header_items = items::make_header_items(candidates, self.cfg.fold_confusables);
        let outcome = sequential::align_sequential(lines, norms, synthetic, &header_items, ctx);

        let items_by_key: AHashMap<&str, &items::HeaderItem> =
            header_items.iter().map(|item| (item.key.as_str(), item)).collect();
        let mut sequential_headers: Vec<AnchoredHeader> = outcome
            .anchors
            .iter()
            .filter_map(|(key, &pos)| {
                let item = items_by_key.get(key.as_str())?;
                let line = lines.get(pos)?;
                let (strategy, score) = outcome
                    .provenance
                    .get(key)
                    .copied()
                    .unwrap_or((Strategy::NumTitle, 0.0));
                Some(AnchoredHeader {
                    text: item.title.clone(),
                    number: Some(item.number_raw.clone()),
                    level: item.level,
                    page: line.page,
                    line_idx: line.line_idx,
                    global_idx: line.global_idx,
                    source_idx: item.source_idx,
                    strategy,
                    score,
                })
            })
            .collect();
        sequential_headers.sort_by_key(|header| (header.global_idx, header.source_idx));

        // Coverage gate: a badly-covered sequential pass misleads more than
        // it helps; the legacy sweep then sees the whole outline.
        let numbered_total = candidates
            .iter()
            .filter(|c| c.number.as_deref().is_some_and(|n| !n.trim().is_empty()))
            .count();
        if numbered_total > 0 {
            let coverage = sequential_headers.len() as f64 / numbered_total as f64;
            if coverage < MIN_SEQUENTIAL_COVERAGE {
                ctx.tracer.ev(
                    "fallback_triggered",
                    json!({"method": "sequential", "reason": "low_coverage", "coverage": coverage}),
                );
                sequential_headers.clear();
            }
        }

        let matched_keys: AHashSet<String> = if sequential_headers.is_empty() {
            AHashSet::new()
        } else {
            outcome.anchors.keys().cloned().collect()
        };
        let used_gids: AHashSet<u32> = sequential_headers.iter().map(|h| h.global_idx).collect();

        let remaining: Vec<CandidateHeader> = candidates
            .iter()
            .filter(|candidate| {
                let key = candidate
                    .number
                    .as_deref()
                    .and_then(crate::numbering::NumberSpec::parse)
                    .map(|spec| spec.render());
                match key {
                    Some(key) => !matched_keys.contains(&key),
                    None => true,
                }
            })
            .cloned()
            .collect();

        if !remaining.is_empty() {
            let found = legacy::locate_legacy(&remaining, lines, norms, &used_gids, ctx);
            sequential_headers.extend(found);
        }
        sequential_headers.sort_by_key(|header| (header.global_idx, header.source_idx));
        sequential_headers
    }

    fn replay_cached(&self, mut cached: LocateResult, started: Instant, tracer: &mut Tracer) -> LocateResult {
        let elapsed = started.elapsed().as_secs_f64();
        tracer.ev(
            "llm_outline_received",
            json!({"count": cached.headers.len(), "headers": &cached.headers}),
        );
        tracer.ev(
            "final_outline",
            json!({
                "headers": &cached.headers,
                "sections": &cached.sections,
                "mode": LocateMode::Cache,
                "messages": &cached.messages,
                "elapsed_s": elapsed,
            }),
        );
        tracer.ev(
            "end_run",
            json!({"elapsed_s": elapsed, "mode": LocateMode::Cache, "total_headers": cached.headers.len()}),
        );
        cached.mode = LocateMode::Cache;
        cached.trace = tracer.is_enabled().then(|| tracer.events().to_vec());
        cached
    }
}
