//! Noise-page and running-text detection.
//!
//! Classifies pages as table-of-contents or index/glossary material and
//! collects running header/footer strings that repeat across page bands.
//! The detector never fails: empty input yields empty sets.

use ahash::AHashMap;
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::BTreeSet;

use crate::config::LocateConfig;
use crate::text::normalize;
use crate::types::Line;

static DOT_LEADER: Lazy<Regex> = Lazy::new(|| Regex::new(r"\.{3,}\s*\d{1,4}\s*$").expect("dot leader pattern"));

static SECTIONISH: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\s*\d+(?:\s*[.\u{2024}\u{2027}\u{00B7}\u{22C4}]\s*\d+)*\b").expect("sectionish pattern")
});

static INDEX_ENTRY: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Z][A-Za-z0-9\s'’\-(),/]+\s+\.{2,}\s*\d+(?:\s*,\s*\d+)*$").expect("index pattern"));

/// What the detector found; feeds the per-line flags.
#[derive(Debug, Clone, Default)]
pub struct NoiseReport {
    pub toc_pages: BTreeSet<u32>,
    pub index_pages: BTreeSet<u32>,
    /// Case-folded normalized texts that repeat in page bands.
    pub running_texts: ahash::AHashSet<String>,
}

impl NoiseReport {
    /// Pages excluded from anchoring, sorted.
    pub fn excluded_pages(&self) -> Vec<u32> {
        self.toc_pages.union(&self.index_pages).copied().collect()
    }
}

/// Classify noise across the whole document.
pub fn detect_noise(lines: &[Line], cfg: &LocateConfig) -> NoiseReport {
    let mut report = NoiseReport::default();
    if lines.is_empty() {
        return report;
    }

    let mut by_page: AHashMap<u32, Vec<&Line>> = AHashMap::new();
    for line in lines {
        by_page.entry(line.page).or_default().push(line);
    }
    for page_lines in by_page.values_mut() {
        page_lines.sort_by_key(|line| line.global_idx);
    }

    if cfg.suppress_toc {
        for (&page, page_lines) in &by_page {
            if is_toc_page(page_lines, cfg) {
                report.toc_pages.insert(page);
            }
            if is_index_page(page_lines) {
                report.index_pages.insert(page);
            }
        }
    }

    if cfg.suppress_running {
        report.running_texts = detect_running_texts(&by_page, cfg);
    }

    report
}

/// Populate `is_toc` / `is_index` / `is_running` on every line.
pub fn apply_noise(lines: &mut [Line], report: &NoiseReport) {
    for line in lines.iter_mut() {
        line.is_toc = report.toc_pages.contains(&line.page);
        line.is_index = report.index_pages.contains(&line.page);
        if !report.running_texts.is_empty() {
            let norm = normalize(&line.text, false);
            line.is_running = report.running_texts.contains(&norm);
        }
    }
}

/// True when a single line looks like a dot-leader TOC entry.
pub fn is_dot_leader_line(text: &str) -> bool {
    DOT_LEADER.is_match(text)
}

fn is_toc_page(page_lines: &[&Line], cfg: &LocateConfig) -> bool {
    let mut dotted = 0usize;
    let mut section_like = 0usize;
    let mut prose_like = 0usize;

    for line in page_lines {
        let text = line.text.as_str();
        if DOT_LEADER.is_match(text) {
            dotted += 1;
        }
        let norm = normalize(text, false);
        if SECTIONISH.is_match(&norm) {
            section_like += 1;
        }
        if norm.len() >= 40 && text.contains('.') {
            prose_like += 1;
        }
        let trimmed = norm.trim();
        if trimmed.starts_with("table of contents") || trimmed == "contents" {
            return true;
        }
    }

    if dotted >= cfg.toc_min_dot_leaders {
        return true;
    }
    section_like >= cfg.toc_min_section_tokens && prose_like <= (section_like / 2).max(1)
}

fn is_index_page(page_lines: &[&Line]) -> bool {
    let cleaned: Vec<&str> = page_lines
        .iter()
        .map(|line| line.text.trim())
        .filter(|text| !text.is_empty())
        .collect();
    if cleaned.is_empty() {
        return false;
    }
    let first = cleaned[0].to_ascii_lowercase();
    if first == "index" || first == "glossary" {
        return true;
    }
    let hits = cleaned.iter().filter(|text| INDEX_ENTRY.is_match(text)).count();
    hits >= (cleaned.len() / 2).max(6)
}

fn detect_running_texts(by_page: &AHashMap<u32, Vec<&Line>>, cfg: &LocateConfig) -> ahash::AHashSet<String> {
    let band = cfg.band_lines;
    if band == 0 || by_page.is_empty() {
        return ahash::AHashSet::new();
    }

    let mut occurrences: AHashMap<String, usize> = AHashMap::new();
    for page_lines in by_page.values() {
        let mut page_candidates: ahash::AHashSet<String> = ahash::AHashSet::new();
        let take = band.min(page_lines.len());
        let tail_start = page_lines.len().saturating_sub(band);
        for line in page_lines[..take].iter().chain(page_lines[tail_start..].iter()) {
            let norm = normalize(&line.text, false);
            if norm.len() >= cfg.running_min_len {
                page_candidates.insert(norm);
            }
        }
        for text in page_candidates {
            *occurrences.entry(text).or_insert(0) += 1;
        }
    }

    let total_pages = by_page.len();
    let threshold = ((0.6 * total_pages as f64) as usize).max(2);
    occurrences
        .into_iter()
        .filter(|(_, count)| *count >= threshold)
        .map(|(text, _)| text)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn line(gid: u32, page: u32, idx: u32, text: &str) -> Line {
        Line::new(gid, page, idx, text)
    }

    fn page_of(texts: &[&str], page: u32, gid_base: u32) -> Vec<Line> {
        texts
            .iter()
            .enumerate()
            .map(|(i, t)| line(gid_base + i as u32, page, i as u32, t))
            .collect()
    }

    #[test]
    fn test_empty_input_yields_empty_report() {
        let report = detect_noise(&[], &LocateConfig::default());
        assert!(report.toc_pages.is_empty());
        assert!(report.index_pages.is_empty());
        assert!(report.running_texts.is_empty());
    }

    #[test]
    fn test_dot_leader_page_is_toc() {
        let lines = page_of(
            &[
                "1 GENERAL ............ 1",
                "1.1 Scope ............. 2",
                "1.2 References ........ 3",
                "2 PRODUCTS ............ 5",
            ],
            1,
            0,
        );
        let report = detect_noise(&lines, &LocateConfig::default());
        assert!(report.toc_pages.contains(&1));
    }

    #[test]
    fn test_contents_heading_marks_toc() {
        let lines = page_of(&["Table of Contents", "1 General", "2 Products"], 2, 0);
        let report = detect_noise(&lines, &LocateConfig::default());
        assert!(report.toc_pages.contains(&2));
    }

    #[test]
    fn test_sectionish_with_prose_is_not_toc() {
        // Plenty of numbered lines, but each is a long prose sentence.
        let texts: Vec<String> = (1..=8)
            .map(|i| format!("{i} This requirement describes the installation procedure in detail. More words."))
            .collect();
        let refs: Vec<&str> = texts.iter().map(String::as_str).collect();
        let lines = page_of(&refs, 3, 0);
        let report = detect_noise(&lines, &LocateConfig::default());
        assert!(!report.toc_pages.contains(&3));
    }

    #[test]
    fn test_index_page_by_first_line() {
        let lines = page_of(&["Index", "Anchors .... 12", "Bolts .... 14"], 9, 0);
        let report = detect_noise(&lines, &LocateConfig::default());
        assert!(report.index_pages.contains(&9));
    }

    #[test]
    fn test_running_header_across_pages() {
        let mut lines = Vec::new();
        let mut gid = 0;
        for page in 1..=6 {
            lines.push(line(gid, page, 0, "ACME CORP SPEC"));
            gid += 1;
            for i in 0..8 {
                lines.push(line(gid, page, i + 1, &format!("body text {page} {i} with content")));
                gid += 1;
            }
        }
        let report = detect_noise(&lines, &LocateConfig::default());
        assert!(report.running_texts.contains("acme corp spec"));

        let mut mutable = lines.clone();
        apply_noise(&mut mutable, &report);
        assert!(mutable.iter().filter(|l| l.is_running).count() >= 6);
    }

    #[test]
    fn test_short_running_text_ignored() {
        // Page numbers are short; the length floor keeps them out.
        let mut lines = Vec::new();
        let mut gid = 0;
        for page in 1..=6 {
            for i in 0..4 {
                lines.push(line(gid, page, i, &format!("content line {page} {i}")));
                gid += 1;
            }
            lines.push(line(gid, page, 4, "7"));
            gid += 1;
        }
        let report = detect_noise(&lines, &LocateConfig::default());
        assert!(!report.running_texts.contains("7"));
    }

    #[test]
    fn test_suppression_flags_disable_detection() {
        let cfg = LocateConfig {
            suppress_toc: false,
            suppress_running: false,
            ..Default::default()
        };
        let lines = page_of(
            &[
                "1 GENERAL ............ 1",
                "1.1 Scope ............. 2",
                "1.2 References ........ 3",
                "2 PRODUCTS ............ 5",
            ],
            1,
            0,
        );
        let report = detect_noise(&lines, &cfg);
        assert!(report.toc_pages.is_empty());
        assert!(report.running_texts.is_empty());
    }
}
