//! Section span construction.
//!
//! Ordered anchors become half-open `[start, next_start)` line ranges that
//! together cover everything from the first anchor to the end of the
//! document. Keys are deterministic so identical inputs always produce
//! identical section identities.

use ahash::AHashMap;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::json;

use crate::types::{AnchoredHeader, Line, SectionSpan};

use super::context::RunContext;

static NON_SLUG: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^a-z0-9]+").expect("slug pattern"));
static MULTI_DASH: Lazy<Regex> = Lazy::new(|| Regex::new(r"-+").expect("dash pattern"));
static SPACES: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").expect("space pattern"));

/// Deterministic section identifier: `<number>::<slug>::<anchor>` (the
/// number part is omitted when the header carries none).
pub fn make_section_key(number: Option<&str>, title: &str, anchor: u32) -> String {
    let number_part = SPACES.replace_all(number.unwrap_or("").trim(), "-").into_owned();
    let lowered = title.to_lowercase();
    let slug = NON_SLUG.replace_all(lowered.trim(), "-");
    let slug = MULTI_DASH.replace_all(&slug, "-");
    let slug = slug.trim_matches('-');
    let slug = if slug.is_empty() { "section" } else { slug };

    let mut parts: Vec<String> = Vec::with_capacity(3);
    if !number_part.is_empty() {
        parts.push(number_part);
    }
    parts.push(slug.to_owned());
    parts.push(anchor.to_string());
    parts.join("::")
}

/// Build the contiguous half-open spans for the final outline.
///
/// `headers` must already be the repaired outline; anchors colliding on the
/// same line are deduplicated here (lowest source order wins) as a final
/// defensive measure, with a trace record.
pub(crate) fn build_section_spans(
    headers: &mut Vec<AnchoredHeader>,
    lines: &[Line],
    ctx: &mut RunContext<'_>,
) -> Vec<SectionSpan> {
    if headers.is_empty() || lines.is_empty() {
        return Vec::new();
    }

    headers.sort_by_key(|header| (header.global_idx, header.source_idx));

    // Defensive collision dedupe: one anchor per line.
    let mut seen: AHashMap<u32, u32> = AHashMap::new();
    let before = headers.len();
    headers.retain(|header| match seen.get(&header.global_idx) {
        Some(_) => false,
        None => {
            seen.insert(header.global_idx, header.source_idx);
            true
        }
    });
    if headers.len() != before {
        ctx.tracer.ev(
            "dedupe_drop",
            json!({"scope": "section_collision", "dropped": before - headers.len()}),
        );
    }

    let line_by_gid: AHashMap<u32, &Line> = lines.iter().map(|line| (line.global_idx, line)).collect();
    let document_end = lines.last().map_or(0, |line| line.global_idx + 1);

    let mut spans = Vec::with_capacity(headers.len());
    for (idx, header) in headers.iter().enumerate() {
        let start = header.global_idx;
        let end = headers.get(idx + 1).map_or(document_end, |next| next.global_idx);
        let end = end.max(start);

        let start_page = line_by_gid.get(&start).map_or(header.page, |line| line.page);
        // Last line actually inside the span determines the end page.
        let end_page = (start..end)
            .rev()
            .find_map(|gid| line_by_gid.get(&gid).map(|line| line.page))
            .unwrap_or(start_page);

        spans.push(SectionSpan {
            section_key: make_section_key(header.number.as_deref(), &header.text, start),
            title: header.text.clone(),
            number: header.number.clone(),
            level: header.level,
            start_global_idx: start,
            end_global_idx: end,
            start_page,
            end_page,
        });
    }
    spans
}

/// Per-section text chunk for the retrieval layer.
#[derive(Debug, Clone, serde::Serialize)]
pub struct SectionChunk {
    pub section_key: String,
    pub start_global_idx: u32,
    pub end_global_idx: u32,
    pub text: String,
}

/// Join the non-blank line texts inside each span.
pub fn chunk_section_texts(spans: &[SectionSpan], lines: &[Line]) -> Vec<SectionChunk> {
    let line_by_gid: AHashMap<u32, &Line> = lines.iter().map(|line| (line.global_idx, line)).collect();
    spans
        .iter()
        .map(|span| {
            let text = (span.start_global_idx..span.end_global_idx)
                .filter_map(|gid| line_by_gid.get(&gid))
                .map(|line| line.text.as_str())
                .filter(|text| !text.trim().is_empty())
                .collect::<Vec<_>>()
                .join("\n");
            SectionChunk {
                section_key: span.section_key.clone(),
                start_global_idx: span.start_global_idx,
                end_global_idx: span.end_global_idx,
                text,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LocateConfig;
    use crate::noise::NoiseReport;
    use crate::trace::Tracer;
    use crate::types::Strategy;

    fn anchored(number: Option<&str>, text: &str, gid: u32, source: u32) -> AnchoredHeader {
        AnchoredHeader {
            text: text.to_owned(),
            number: number.map(str::to_owned),
            level: 1,
            page: 1,
            line_idx: gid,
            global_idx: gid,
            source_idx: source,
            strategy: Strategy::NumTitle,
            score: 100.0,
        }
    }

    fn lines_on_pages(spec: &[(u32, u32)]) -> Vec<Line> {
        // (gid, page) pairs.
        spec.iter()
            .map(|&(gid, page)| Line::new(gid, page, gid, format!("line {gid}")))
            .collect()
    }

    #[test]
    fn test_spans_are_contiguous_half_open() {
        let lines = lines_on_pages(&[(0, 1), (1, 1), (2, 2), (3, 2), (4, 3)]);
        let mut headers = vec![anchored(Some("1"), "GENERAL", 0, 0), anchored(Some("2"), "PRODUCTS", 2, 1)];
        let cfg = LocateConfig::default();
        let mut tracer = Tracer::disabled();
        let mut ctx = RunContext::new(&cfg, &mut tracer, &lines, NoiseReport::default());

        let spans = build_section_spans(&mut headers, &lines, &mut ctx);
        assert_eq!(spans.len(), 2);
        assert_eq!((spans[0].start_global_idx, spans[0].end_global_idx), (0, 2));
        assert_eq!((spans[1].start_global_idx, spans[1].end_global_idx), (2, 5));
        assert_eq!(spans[0].end_global_idx, spans[1].start_global_idx);
        assert_eq!(spans[0].end_page, 1);
        assert_eq!(spans[1].end_page, 3);
    }

    #[test]
    fn test_section_key_shape() {
        assert_eq!(make_section_key(Some("1.2"), "Scope of Work", 14), "1.2::scope-of-work::14");
        assert_eq!(make_section_key(None, "Foreword", 3), "foreword::3");
        assert_eq!(make_section_key(Some("APPENDIX A"), "Submittals & Forms", 20), "APPENDIX-A::submittals-forms::20");
        assert_eq!(make_section_key(Some("9"), "???", 7), "9::section::7");
    }

    #[test]
    fn test_collision_keeps_lowest_source_idx() {
        let lines = lines_on_pages(&[(0, 1), (1, 1)]);
        let mut headers = vec![anchored(Some("1"), "B", 0, 5), anchored(Some("2"), "A", 0, 2)];
        let cfg = LocateConfig::default();
        let mut tracer = Tracer::new("t");
        let mut ctx = RunContext::new(&cfg, &mut tracer, &lines, NoiseReport::default());

        let spans = build_section_spans(&mut headers, &lines, &mut ctx);
        assert_eq!(spans.len(), 1);
        assert_eq!(spans[0].title, "A");
        assert!(tracer.has_event("dedupe_drop"));
    }

    #[test]
    fn test_chunk_texts_skip_blank_lines() {
        let mut lines = lines_on_pages(&[(0, 1), (1, 1), (2, 1)]);
        lines[1].text = "   ".to_owned();
        let mut headers = vec![anchored(Some("1"), "GENERAL", 0, 0)];
        let cfg = LocateConfig::default();
        let mut tracer = Tracer::disabled();
        let mut ctx = RunContext::new(&cfg, &mut tracer, &lines, NoiseReport::default());

        let spans = build_section_spans(&mut headers, &lines, &mut ctx);
        let chunks = chunk_section_texts(&spans, &lines);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].text, "line 0\nline 2");
    }

    #[test]
    fn test_empty_inputs() {
        let cfg = LocateConfig::default();
        let mut tracer = Tracer::disabled();
        let lines = lines_on_pages(&[(0, 1)]);
        let mut ctx = RunContext::new(&cfg, &mut tracer, &lines, NoiseReport::default());
        let mut no_headers = Vec::new();
        assert!(build_section_spans(&mut no_headers, &lines, &mut ctx).is_empty());
    }
}
