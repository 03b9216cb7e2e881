//! Anker — header location and section spanning for technical documents.
//!
//! The engine takes a stream of normalized lines extracted from a PDF and a
//! candidate outline proposed by an external language-model oracle, and
//! produces the final anchored outline: every header pinned to the right
//! body line (not the table-of-contents duplicate, not a running header),
//! with parent/child numbering order preserved, plus the contiguous
//! half-open section spans bounded by those anchors.
//!
//! # Example
//!
//! ```
//! use anker::{CandidateHeader, Line, LocateConfig, Locator, Tracer};
//!
//! let lines = vec![
//!     Line::new(0, 1, 0, "1 GENERAL"),
//!     Line::new(1, 1, 1, "1.1 Scope"),
//!     Line::new(2, 1, 2, "This section covers the work."),
//! ];
//! let outline = vec![
//!     CandidateHeader::new("GENERAL", Some("1"), 1, 0),
//!     CandidateHeader::new("Scope", Some("1.1"), 2, 1),
//! ];
//!
//! let locator = Locator::new(LocateConfig::default());
//! let mut tracer = Tracer::disabled();
//! let result = locator.locate_outline(lines, outline, "doc-hash", &mut tracer).unwrap();
//! assert_eq!(result.headers.len(), 2);
//! assert_eq!(result.sections.len(), 2);
//! ```
//!
//! External collaborators stay outside: PDF parsing produces the [`Line`]
//! stream, the oracle transport implements [`HeaderOracle`], and an
//! embedding provider can plug in through [`Embedder`] to enable the
//! vector-ranked candidate path.

pub mod cache;
pub mod config;
pub mod embed;
pub mod error;
pub mod locate;
pub mod noise;
pub mod numbering;
pub mod oracle;
pub mod text;
pub mod trace;
pub mod types;

pub use cache::{ResultCache, inputs_digest};
pub use config::{DedupePolicy, LocateConfig};
pub use embed::{Embedder, EmbeddingCache, WindowEmbeddingCache};
pub use error::{AnkerError, Result};
pub use locate::{CancelToken, Locator, chunk_section_texts, find_exact_occurrences, make_section_key};
pub use noise::{NoiseReport, apply_noise, detect_noise};
pub use numbering::NumberSpec;
pub use oracle::{HeaderOracle, OutlineNode, build_outline_tree, flatten_outline, parse_outline, parse_outline_strict};
pub use text::{normalize, token_set_ratio};
pub use trace::{TraceEvent, Tracer};
pub use types::{
    AnchoredHeader, BBox, CandidateHeader, HeaderId, Line, LineId, LocateMode, LocateResult, SectionSpan, Strategy,
};
