//! Exact header matching with page hints and offset calibration.
//!
//! Some oracles report the page each heading was seen on. This matcher
//! scans hint-first (hint page, then ±1, ±2 out to the band, then the
//! rest), demanding exact normalized equality, and skipping dot-leader TOC
//! entries. When enough hinted matches succeed, the median page offset
//! between expectation and reality recalibrates the hints for the misses
//! and the scan repeats once — scanned PDFs routinely shift printed page
//! numbers by a constant.

use ahash::AHashMap;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;

use crate::config::LocateConfig;
use crate::types::{CandidateHeader, Line};

static DOT_LEADERS: Lazy<Regex> = Lazy::new(|| Regex::new(r"\.{2,}\s*\d+\s*$").expect("dot leader pattern"));
static MULTISPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").expect("space pattern"));

/// Outcome of one exact-match attempt.
#[derive(Debug, Clone, Serialize)]
pub struct ExactMatch {
    pub title: String,
    pub level: u32,
    pub expected_page: Option<u32>,
    pub found: bool,
    pub found_page: Option<u32>,
    pub line_in_page: Option<u32>,
    pub matched_text: Option<String>,
    pub reason: Option<&'static str>,
}

impl ExactMatch {
    fn miss(title: &str, level: u32, expected: Option<u32>, reason: &'static str) -> Self {
        ExactMatch {
            title: title.to_owned(),
            level,
            expected_page: expected,
            found: false,
            found_page: None,
            line_in_page: None,
            matched_text: None,
            reason: Some(reason),
        }
    }
}

/// Punctuation-folding normalization for exact equality.
///
/// Case is preserved: an exact matcher that ignored case would collide
/// with body prose repeating the heading words.
fn fold(value: &str) -> String {
    let folded = value
        .replace(['\u{2013}', '\u{2014}'], "-")
        .replace(['\u{2018}', '\u{2019}'], "'")
        .replace(['\u{201C}', '\u{201D}'], "\"");
    MULTISPACE.replace_all(folded.trim(), " ").into_owned()
}

/// Find exact occurrences for every candidate, calibrating page hints.
pub fn find_exact_occurrences(headers: &[CandidateHeader], lines: &[Line], cfg: &LocateConfig) -> Vec<ExactMatch> {
    let mut pages: AHashMap<u32, Vec<&Line>> = AHashMap::new();
    for line in lines {
        pages.entry(line.page).or_default().push(line);
    }
    for page_lines in pages.values_mut() {
        page_lines.sort_by_key(|line| line.line_idx);
    }
    let mut pages_sorted: Vec<u32> = pages.keys().copied().collect();
    pages_sorted.sort_unstable();

    let mut matches: Vec<ExactMatch> = Vec::with_capacity(headers.len());
    let mut seeds: Vec<i64> = Vec::new();

    for header in headers {
        let title = header.text.as_str();
        if fold(title).len() < cfg.exact_min_title_len {
            matches.push(ExactMatch::miss(title, header.level, header.page, "title_too_short"));
            continue;
        }
        let hint = header.page.filter(|page| pages.contains_key(page));
        let record = scan_for(title, header.level, header.page, hint, &pages, &pages_sorted, cfg);
        if record.found {
            if let (Some(found), Some(expected)) = (record.found_page, header.page) {
                seeds.push(i64::from(found) - i64::from(expected));
            }
        }
        matches.push(record);
    }

    // Offset calibration: retry the misses with shifted hints.
    if seeds.len() >= cfg.exact_calibration_seed_min {
        seeds.sort_unstable();
        let offset = seeds[seeds.len() / 2];
        for (record, header) in matches.iter_mut().zip(headers) {
            if record.found || record.reason == Some("title_too_short") {
                continue;
            }
            let adjusted = header
                .page
                .and_then(|page| u32::try_from(i64::from(page) + offset).ok())
                .filter(|page| pages.contains_key(page));
            let retry = scan_for(&header.text, header.level, header.page, adjusted, &pages, &pages_sorted, cfg);
            if retry.found {
                *record = retry;
                record.reason = Some("matched_after_offset");
            } else {
                record.reason = Some("no_match_after_offset");
            }
        }
    }

    matches
}

fn scan_for(
    title: &str,
    level: u32,
    expected_page: Option<u32>,
    hint: Option<u32>,
    pages: &AHashMap<u32, Vec<&Line>>,
    pages_sorted: &[u32],
    cfg: &LocateConfig,
) -> ExactMatch {
    for page in scan_order(hint, pages_sorted, cfg.exact_page_band) {
        if let Some((line, matched)) = match_on_page(title, pages.get(&page).map_or(&[][..], Vec::as_slice)) {
            return ExactMatch {
                title: title.to_owned(),
                level,
                expected_page,
                found: true,
                found_page: Some(line.page),
                line_in_page: Some(line.line_idx),
                matched_text: Some(matched),
                reason: None,
            };
        }
    }
    ExactMatch::miss(title, level, expected_page, "no_exact_match_on_scanned_pages")
}

/// Hint page first, then alternating neighbours out to `band`, then the rest.
fn scan_order(hint: Option<u32>, pages_sorted: &[u32], band: usize) -> Vec<u32> {
    let mut ordered: Vec<u32> = Vec::with_capacity(pages_sorted.len());
    let mut push = |page: u32, ordered: &mut Vec<u32>| {
        if pages_sorted.contains(&page) && !ordered.contains(&page) {
            ordered.push(page);
        }
    };
    if let Some(hint) = hint {
        push(hint, &mut ordered);
        for delta in 1..=band as u32 {
            if hint > delta {
                push(hint - delta, &mut ordered);
            }
            push(hint + delta, &mut ordered);
        }
    }
    for &page in pages_sorted {
        if !ordered.contains(&page) {
            ordered.push(page);
        }
    }
    ordered
}

/// Exact-equality match on one page; multi-line titles (embedded newlines)
/// compare against the same number of consecutive lines.
fn match_on_page<'a>(title: &str, page_lines: &[&'a Line]) -> Option<(&'a Line, String)> {
    if !title.contains('\n') {
        let target = fold(title);
        return page_lines
            .iter()
            .filter(|line| !DOT_LEADERS.is_match(&line.text))
            .find(|line| fold(&line.text) == target)
            .map(|line| (*line, line.text.clone()));
    }

    let segments: Vec<&str> = title.split('\n').collect();
    if segments.is_empty() || page_lines.len() < segments.len() {
        return None;
    }
    let target = fold(&segments.join("\n"));
    for start in 0..=page_lines.len() - segments.len() {
        if DOT_LEADERS.is_match(&page_lines[start].text) {
            continue;
        }
        let window: Vec<&str> = page_lines[start..start + segments.len()]
            .iter()
            .map(|line| line.text.as_str())
            .collect();
        let joined = window.join("\n");
        if fold(&joined) == target {
            return Some((page_lines[start], joined));
        }
    }
    None
}
