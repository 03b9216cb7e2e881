//! Numbered header items used by the sequential aligner and repair passes.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::numbering::NumberSpec;
use crate::types::CandidateHeader;

use super::score::HeaderQuery;

static LEADING_NUMBER: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\s*(\d+(?:\.\d+)*)\b").expect("leading number pattern"));

/// One oracle header with a parsed numbering.
#[derive(Debug, Clone)]
pub(crate) struct HeaderItem {
    pub source_idx: u32,
    /// Numbering as printed.
    pub number_raw: String,
    /// Canonical key (`NumberSpec::render`), unique per outline entry.
    pub key: String,
    pub spec: NumberSpec,
    pub title: String,
    pub level: u32,
    pub query: HeaderQuery,
}

impl HeaderItem {
    /// Canonical key of the immediate parent numbering.
    pub fn parent_key(&self) -> Option<String> {
        self.spec.parent().map(|p| p.render())
    }
}

/// Build sorted header items from the oracle outline.
///
/// Headers without a numbering (explicit or extractable from the leading
/// text) are skipped here; the legacy fallback picks them up. Items sort by
/// numbering key, then level, so parents precede children.
pub(crate) fn make_header_items(headers: &[CandidateHeader], fold_confusables: bool) -> Vec<HeaderItem> {
    let mut items: Vec<HeaderItem> = Vec::new();
    for header in headers {
        let number_raw = header
            .number
            .as_deref()
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .map(str::to_owned)
            .or_else(|| {
                LEADING_NUMBER
                    .captures(&header.text)
                    .map(|caps| caps[1].to_owned())
            });
        let Some(number_raw) = number_raw else {
            continue;
        };
        let Some(spec) = NumberSpec::parse(&number_raw) else {
            continue;
        };
        let level = if header.level >= 1 { header.level } else { spec.len() as u32 };
        let with_number = CandidateHeader {
            number: Some(number_raw.clone()),
            ..header.clone()
        };
        items.push(HeaderItem {
            source_idx: header.source_idx,
            key: spec.render(),
            query: HeaderQuery::new(&with_number, fold_confusables),
            number_raw,
            spec,
            title: header.text.trim().to_owned(),
            level,
        });
    }
    items.sort_by(|a, b| a.spec.key().cmp(&b.spec.key()).then(a.level.cmp(&b.level)));
    items
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_items_sorted_by_number_key() {
        let headers = vec![
            CandidateHeader::new("PRODUCTS", Some("2"), 1, 0),
            CandidateHeader::new("Scope", Some("1.1"), 2, 1),
            CandidateHeader::new("GENERAL", Some("1"), 1, 2),
            CandidateHeader::new("Materials", Some("2.10"), 2, 3),
            CandidateHeader::new("Finish", Some("2.9"), 2, 4),
        ];
        let items = make_header_items(&headers, true);
        let keys: Vec<&str> = items.iter().map(|i| i.key.as_str()).collect();
        assert_eq!(keys, vec!["1", "1.1", "2", "2.9", "2.10"]);
    }

    #[test]
    fn test_number_extracted_from_text() {
        let headers = vec![CandidateHeader::new("3.2 Delivery and Storage", None, 2, 0)];
        let items = make_header_items(&headers, true);
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].key, "3.2");
    }

    #[test]
    fn test_unnumbered_headers_skipped() {
        let headers = vec![CandidateHeader::new("Foreword", None, 1, 0)];
        assert!(make_header_items(&headers, true).is_empty());
    }

    #[test]
    fn test_parent_key() {
        let headers = vec![CandidateHeader::new("Scope", Some("1.2.3"), 3, 0)];
        let items = make_header_items(&headers, true);
        assert_eq!(items[0].parent_key().as_deref(), Some("1.2"));
    }

    #[test]
    fn test_appendix_key_is_canonical() {
        let headers = vec![CandidateHeader::new("Submittals", Some("APPENDIX A"), 1, 0)];
        let items = make_header_items(&headers, true);
        assert_eq!(items[0].key, "A");
        assert_eq!(items[0].number_raw, "APPENDIX A");
    }
}
