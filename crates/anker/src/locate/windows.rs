//! Sliding line windows for candidate scoring.
//!
//! Two families: every eligible line alone (W1), and every three consecutive
//! eligible lines on the same page (W3). Windows never cross page
//! boundaries; lines on excluded pages or flagged as TOC/index never join a
//! window.

use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::BTreeSet;

use crate::types::Line;

static TOKEN: Lazy<Regex> = Lazy::new(|| Regex::new(r"[\w\-']+").expect("token pattern"));

/// One scoring window over 1 or 3 consecutive lines.
#[derive(Debug, Clone)]
pub struct LineWindow {
    /// Member texts joined with newlines.
    pub text: String,
    /// Lowercased alphanumeric tokens of `text`.
    pub tokens: Vec<String>,
    pub page: u32,
    /// Arena position of the first member line.
    pub start_pos: usize,
    pub start_gid: u32,
    pub end_gid: u32,
    pub start_line_idx: u32,
    pub end_line_idx: u32,
    /// Smallest top coordinate among members.
    pub y_top: Option<f32>,
    /// Largest font size among members.
    pub font_max: Option<f32>,
    /// True when any member is a running header/footer.
    pub is_running: bool,
}

/// Tokenize a window text the way the lexical rankers expect.
pub fn tokenize(text: &str) -> Vec<String> {
    TOKEN.find_iter(text).map(|m| m.as_str().to_ascii_lowercase()).collect()
}

/// Build the W1 and W3 window families.
///
/// `positions` in the returned windows refer to indices in `lines`.
pub fn build_windows(lines: &[Line], excluded_pages: &BTreeSet<u32>) -> Vec<LineWindow> {
    let usable: Vec<(usize, &Line)> = lines
        .iter()
        .enumerate()
        .filter(|(_, line)| {
            !excluded_pages.contains(&line.page) && !line.text.trim().is_empty() && !line.is_toc && !line.is_index
        })
        .collect();

    let mut windows = Vec::new();
    for index in 0..usable.len() {
        if let Some(window) = make_window(&usable[index..index + 1]) {
            windows.push(window);
        }
        if index + 3 <= usable.len() {
            if let Some(window) = make_window(&usable[index..index + 3]) {
                windows.push(window);
            }
        }
    }
    windows
}

fn make_window(chunk: &[(usize, &Line)]) -> Option<LineWindow> {
    let (first_pos, first) = chunk.first()?;
    let (_, last) = chunk.last()?;
    if chunk.iter().any(|(_, line)| line.page != first.page) {
        return None;
    }

    let text = chunk.iter().map(|(_, line)| line.text.as_str()).collect::<Vec<_>>().join("\n");
    let tokens = tokenize(&text);
    if tokens.is_empty() {
        return None;
    }

    let y_top = chunk
        .iter()
        .filter_map(|(_, line)| line.bbox.map(|b| b.top()))
        .fold(None::<f32>, |acc, top| Some(acc.map_or(top, |v| v.min(top))));
    let font_max = chunk
        .iter()
        .filter_map(|(_, line)| line.font_size)
        .fold(None::<f32>, |acc, size| Some(acc.map_or(size, |v| v.max(size))));

    Some(LineWindow {
        text,
        tokens,
        page: first.page,
        start_pos: *first_pos,
        start_gid: first.global_idx,
        end_gid: last.global_idx,
        start_line_idx: first.line_idx,
        end_line_idx: last.line_idx,
        y_top,
        font_max,
        is_running: chunk.iter().any(|(_, line)| line.is_running),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn line(gid: u32, page: u32, idx: u32, text: &str) -> Line {
        Line::new(gid, page, idx, text)
    }

    #[test]
    fn test_w1_and_w3_families() {
        let lines = vec![
            line(0, 1, 0, "1 GENERAL"),
            line(1, 1, 1, "1.1 Scope"),
            line(2, 1, 2, "1.2 References"),
            line(3, 1, 3, "1.3 Definitions"),
        ];
        let windows = build_windows(&lines, &BTreeSet::new());
        let singles = windows.iter().filter(|w| w.start_gid == w.end_gid).count();
        let triples = windows.iter().filter(|w| w.start_gid != w.end_gid).count();
        assert_eq!(singles, 4);
        assert_eq!(triples, 2);
    }

    #[test]
    fn test_windows_never_cross_pages() {
        let lines = vec![
            line(0, 1, 0, "alpha beta"),
            line(1, 1, 1, "gamma delta"),
            line(2, 2, 0, "epsilon zeta"),
        ];
        let windows = build_windows(&lines, &BTreeSet::new());
        assert!(windows.iter().all(|w| w.start_gid == w.end_gid || w.page == 1));
        assert!(!windows.iter().any(|w| w.start_gid == 1 && w.end_gid == 2));
    }

    #[test]
    fn test_excluded_and_flagged_lines_skipped() {
        let mut toc = line(0, 1, 0, "1 GENERAL .... 4");
        toc.is_toc = true;
        let lines = vec![toc, line(1, 2, 0, "1 GENERAL"), line(2, 3, 0, "2 PRODUCTS")];
        let mut excluded = BTreeSet::new();
        excluded.insert(3);
        let windows = build_windows(&lines, &excluded);
        assert_eq!(windows.len(), 1);
        assert_eq!(windows[0].start_gid, 1);
    }

    #[test]
    fn test_tokens_lowercased() {
        let lines = vec![line(0, 1, 0, "1.2 Fire-Stopping O'Brien")];
        let windows = build_windows(&lines, &BTreeSet::new());
        assert_eq!(windows[0].tokens, vec!["1", "2", "fire-stopping", "o'brien"]);
    }

    #[test]
    fn test_window_aggregates_typography() {
        let mut a = line(0, 1, 0, "first");
        a.font_size = Some(10.0);
        a.bbox = Some(crate::types::BBox::new(0.0, 30.0, 10.0, 40.0));
        let mut b = line(1, 1, 1, "second");
        b.font_size = Some(14.0);
        b.bbox = Some(crate::types::BBox::new(0.0, 40.0, 10.0, 50.0));
        let mut c = line(2, 1, 2, "third");
        c.font_size = Some(12.0);
        c.bbox = Some(crate::types::BBox::new(0.0, 50.0, 10.0, 60.0));
        let windows = build_windows(&[a, b, c], &BTreeSet::new());
        let triple = windows.iter().find(|w| w.start_gid != w.end_gid).unwrap();
        assert_eq!(triple.font_max, Some(14.0));
        assert_eq!(triple.y_top, Some(30.0));
    }
}
