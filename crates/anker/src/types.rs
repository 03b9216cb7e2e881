//! Core data model: input lines, oracle candidates, anchored output.
//!
//! Lines and headers live in flat arrays and reference each other through
//! `u32` indices; no back-pointers. `Line.global_idx` is the document-wide
//! ordinal assigned by the external parser and is unique and strictly
//! increasing across the stream.

use serde::{Deserialize, Serialize};

/// Index into the line arena (position, not `global_idx`).
pub type LineId = u32;

/// Index into the candidate header arena.
pub type HeaderId = u32;

/// Axis-aligned bounding box in page coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BBox {
    pub x0: f32,
    pub y0: f32,
    pub x1: f32,
    pub y1: f32,
}

impl BBox {
    pub fn new(x0: f32, y0: f32, x1: f32, y1: f32) -> Self {
        BBox { x0, y0, x1, y1 }
    }

    /// Top coordinate of the box.
    pub fn top(&self) -> f32 {
        self.y0
    }

    /// Bottom coordinate of the box.
    pub fn bottom(&self) -> f32 {
        self.y1
    }
}

/// One normalized line from the external parser.
///
/// Immutable once the noise detector has populated the three flags.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Line {
    /// Document-wide ordinal, unique and strictly increasing.
    pub global_idx: u32,
    /// 1-based page number.
    pub page: u32,
    /// 0-based position within the page.
    pub line_idx: u32,
    /// Original text as extracted.
    pub text: String,
    /// Text after normalization (filled by the pipeline).
    #[serde(default)]
    pub normalized_text: String,
    /// Optional bounding box.
    #[serde(default)]
    pub bbox: Option<BBox>,
    /// Optional dominant font size in points.
    #[serde(default)]
    pub font_size: Option<f32>,
    /// Whether the line is predominantly bold.
    #[serde(default)]
    pub bold: bool,
    /// Set when the line sits on a TOC-classified page.
    #[serde(default)]
    pub is_toc: bool,
    /// Set when the line sits on an index/glossary page.
    #[serde(default)]
    pub is_index: bool,
    /// Set when the line's text repeats as a running header/footer.
    #[serde(default)]
    pub is_running: bool,
}

impl Line {
    /// Minimal constructor used by callers that lack layout metadata.
    pub fn new(global_idx: u32, page: u32, line_idx: u32, text: impl Into<String>) -> Self {
        Line {
            global_idx,
            page,
            line_idx,
            text: text.into(),
            normalized_text: String::new(),
            bbox: None,
            font_size: None,
            bold: false,
            is_toc: false,
            is_index: false,
            is_running: false,
        }
    }

    /// True when any noise flag excludes this line from anchoring.
    pub fn is_noise(&self) -> bool {
        self.is_toc || self.is_index || self.is_running
    }
}

/// A header proposed by the oracle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CandidateHeader {
    /// Title text; may include or omit the printed numbering.
    pub text: String,
    /// Printed numbering string, when the source shows one.
    #[serde(default)]
    pub number: Option<String>,
    /// Outline depth, 1-based.
    pub level: u32,
    /// Position in the oracle output; stable tiebreaker.
    #[serde(default)]
    pub source_idx: u32,
    /// Page hint from the oracle, when provided.
    #[serde(default)]
    pub page: Option<u32>,
}

impl CandidateHeader {
    pub fn new(text: impl Into<String>, number: Option<&str>, level: u32, source_idx: u32) -> Self {
        CandidateHeader {
            text: text.into(),
            number: number.map(str::to_owned),
            level,
            source_idx,
            page: None,
        }
    }
}

/// How an anchor was chosen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Strategy {
    /// Numeric evidence plus title match above the num+title threshold.
    #[serde(rename = "num+title")]
    NumTitle,
    /// Title match without numeric evidence.
    #[serde(rename = "title_only")]
    TitleOnly,
    /// Numeric evidence with a sub-threshold title score.
    #[serde(rename = "num+title-weak")]
    NumTitleWeak,
    /// Out-of-order last-occurrence pick permitted by configuration.
    #[serde(rename = "last_occurrence")]
    LastOccurrence,
    /// No candidate matched; anchored to the first eligible forward line.
    #[serde(rename = "sequential_fallback")]
    SequentialFallback,
    /// Chosen by the embedding-ranked path.
    #[serde(rename = "vector")]
    Vector,
    /// Synthesized by the numbering gap filler.
    #[serde(rename = "gap_fill")]
    GapFill,
}

/// A header anchored to a unique body line.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnchoredHeader {
    pub text: String,
    #[serde(default)]
    pub number: Option<String>,
    pub level: u32,
    pub page: u32,
    pub line_idx: u32,
    pub global_idx: u32,
    /// Position in the oracle output.
    pub source_idx: u32,
    /// Provenance: how the anchor was chosen.
    pub strategy: Strategy,
    /// Provenance: the score the winning candidate carried.
    pub score: f64,
}

/// Half-open line range owned by one anchored header.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SectionSpan {
    /// Deterministic key, stable across runs for the same outline.
    pub section_key: String,
    pub title: String,
    #[serde(default)]
    pub number: Option<String>,
    pub level: u32,
    /// Inclusive start (the anchor's `global_idx`).
    pub start_global_idx: u32,
    /// Exclusive end.
    pub end_global_idx: u32,
    pub start_page: u32,
    pub end_page: u32,
}

/// Degradation signal for the run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LocateMode {
    /// Sequential alignment over the oracle outline.
    LlmFull,
    /// Strict full-document ladder.
    LlmStrict,
    /// Embedding-ranked path.
    LlmVector,
    /// Result replayed from the artifact cache.
    Cache,
    /// Oracle disabled by configuration; outline empty.
    LlmDisabled,
    /// Oracle transport failed; outline empty.
    LlmFullError,
}

/// Final output of a locator run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocateResult {
    /// Anchored headers in strictly increasing `global_idx` order.
    pub headers: Vec<AnchoredHeader>,
    /// Contiguous half-open section spans.
    pub sections: Vec<SectionSpan>,
    pub mode: LocateMode,
    /// Human-readable diagnostics accumulated during the run.
    pub messages: Vec<String>,
    /// Pages excluded as TOC/index, sorted.
    pub excluded_pages: Vec<u32>,
    /// SHA-256 of the source document bytes, passed through for cache keys.
    pub doc_hash: String,
    /// Structured event log, when tracing was enabled.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trace: Option<Vec<crate::trace::TraceEvent>>,
}
