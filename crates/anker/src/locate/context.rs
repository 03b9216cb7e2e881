//! Per-run context shared across pipeline phases.
//!
//! Configuration, page geometry, the noise report, and the tracer travel
//! together through every phase; nothing in the pipeline reads process-wide
//! state.

use ahash::AHashMap;

use crate::config::LocateConfig;
use crate::noise::NoiseReport;
use crate::trace::Tracer;
use crate::types::Line;

/// Page-relative geometry derived once from the line arena.
#[derive(Debug, Default)]
pub struct PageIndex {
    /// page -> global_idx -> position on page.
    positions: AHashMap<u32, AHashMap<u32, usize>>,
    /// page -> number of lines on the page.
    counts: AHashMap<u32, usize>,
    /// page -> largest font size seen.
    font_max: AHashMap<u32, f32>,
    /// page -> (min top, max top) of line boxes.
    top_bounds: AHashMap<u32, (f32, f32)>,
    /// Median of the known font sizes across the document.
    pub median_font: Option<f32>,
}

impl PageIndex {
    pub fn build(lines: &[Line]) -> Self {
        let mut index = PageIndex::default();
        let mut by_page: AHashMap<u32, Vec<&Line>> = AHashMap::new();
        let mut fonts: Vec<f32> = Vec::new();

        for line in lines {
            by_page.entry(line.page).or_default().push(line);
            if let Some(size) = line.font_size {
                fonts.push(size);
                let entry = index.font_max.entry(line.page).or_insert(size);
                if size > *entry {
                    *entry = size;
                }
            }
            if let Some(bbox) = line.bbox {
                let bounds = index.top_bounds.entry(line.page).or_insert((bbox.top(), bbox.top()));
                bounds.0 = bounds.0.min(bbox.top());
                bounds.1 = bounds.1.max(bbox.top());
            }
        }

        for (page, mut page_lines) in by_page {
            page_lines.sort_by_key(|line| line.global_idx);
            index.counts.insert(page, page_lines.len());
            let positions: AHashMap<u32, usize> = page_lines
                .iter()
                .enumerate()
                .map(|(pos, line)| (line.global_idx, pos))
                .collect();
            index.positions.insert(page, positions);
        }

        if !fonts.is_empty() {
            fonts.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
            index.median_font = Some(fonts[fonts.len() / 2]);
        }

        index
    }

    /// True when the line sits within `band` lines of its page's top or bottom.
    pub fn in_band(&self, line: &Line, band: usize) -> bool {
        if band == 0 {
            return false;
        }
        let Some(positions) = self.positions.get(&line.page) else {
            return false;
        };
        let Some(&pos) = positions.get(&line.global_idx) else {
            return false;
        };
        let count = self.counts.get(&line.page).copied().unwrap_or(0);
        pos < band || pos >= count.saturating_sub(band)
    }

    /// Window font size relative to the page maximum, in `[0, 1]`.
    pub fn font_rank(&self, page: u32, font: Option<f32>) -> f64 {
        match (self.font_max.get(&page), font) {
            (Some(&page_max), Some(size)) if page_max > 0.0 => (f64::from(size) / f64::from(page_max)).min(1.0),
            _ => 0.0,
        }
    }

    /// Bonus for lines near the page top, in `[0, 1]`.
    pub fn y_bonus(&self, page: u32, y_top: Option<f32>) -> f64 {
        let (Some(&(top_min, top_max)), Some(y)) = (self.top_bounds.get(&page), y_top) else {
            return 0.0;
        };
        if (top_max - top_min).abs() < f32::EPSILON {
            return 0.0;
        }
        let norm = f64::from(y - top_min) / f64::from(top_max - top_min).max(1e-6);
        (1.0 - norm).clamp(0.0, 1.0)
    }
}

/// Everything a phase needs besides the line arena itself.
pub struct RunContext<'a> {
    pub cfg: &'a LocateConfig,
    pub tracer: &'a mut Tracer,
    pub pages: PageIndex,
    pub noise: NoiseReport,
}

impl<'a> RunContext<'a> {
    pub fn new(cfg: &'a LocateConfig, tracer: &'a mut Tracer, lines: &[Line], noise: NoiseReport) -> Self {
        RunContext {
            cfg,
            tracer,
            pages: PageIndex::build(lines),
            noise,
        }
    }

    /// True when the line may never carry an anchor (I5).
    pub fn is_blocked(&self, line: &Line) -> bool {
        line.is_noise() || self.noise.toc_pages.contains(&line.page) || self.noise.index_pages.contains(&line.page)
    }

    /// True when the line's normalized text repeats as a running header.
    pub fn is_running_text(&self, normalized: &str) -> bool {
        self.noise.running_texts.contains(normalized)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::BBox;

    fn line_with_font(gid: u32, page: u32, idx: u32, font: f32) -> Line {
        let mut line = Line::new(gid, page, idx, format!("line {gid}"));
        line.font_size = Some(font);
        line.bbox = Some(BBox::new(0.0, 10.0 * idx as f32, 100.0, 10.0 * idx as f32 + 9.0));
        line
    }

    #[test]
    fn test_band_detection() {
        let lines: Vec<Line> = (0..20).map(|i| line_with_font(i, 1, i, 10.0)).collect();
        let index = PageIndex::build(&lines);
        assert!(index.in_band(&lines[0], 5));
        assert!(index.in_band(&lines[19], 5));
        assert!(!index.in_band(&lines[10], 5));
        assert!(!index.in_band(&lines[10], 0));
    }

    #[test]
    fn test_median_font() {
        let mut lines: Vec<Line> = (0..9).map(|i| line_with_font(i, 1, i, 10.0)).collect();
        lines.push(line_with_font(9, 1, 9, 18.0));
        let index = PageIndex::build(&lines);
        assert_eq!(index.median_font, Some(10.0));
    }

    #[test]
    fn test_font_rank_and_y_bonus() {
        let lines: Vec<Line> = (0..10).map(|i| line_with_font(i, 1, i, if i == 0 { 16.0 } else { 10.0 })).collect();
        let index = PageIndex::build(&lines);
        assert!((index.font_rank(1, Some(16.0)) - 1.0).abs() < 1e-9);
        assert!(index.font_rank(1, Some(8.0)) < 0.6);
        assert!(index.y_bonus(1, Some(0.0)) > index.y_bonus(1, Some(90.0)));
    }
}
