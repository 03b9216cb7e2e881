//! Numbering-gap detection and recovery.
//!
//! The oracle sometimes skips a heading the body clearly contains (`1, 3`
//! with a printed `2. Requirements` between them). Anchored headers are
//! grouped by numbering prefix and last-component kind; when the observed
//! sequence jumps, the span between the surrounding anchors is scanned for a
//! line bearing the missing value, and a synthesized header is inserted.

use ahash::AHashSet;
use serde_json::json;

use crate::numbering::{ComponentKind, NumberComponent, NumberSpec, gap_regex, int_to_alpha};
use crate::types::{AnchoredHeader, Line, Strategy};

use super::context::RunContext;

/// One detected numbering gap.
#[derive(Debug, Clone)]
struct Gap {
    /// Components of the missing numbering (prefix + synthesized last).
    components: Vec<NumberComponent>,
    /// Index of the last same-group header before the gap.
    after_index: usize,
    /// Index of the header whose value revealed the gap; its anchor bounds
    /// the scan span.
    before_index: usize,
    level: u32,
}

impl Gap {
    fn key(&self) -> String {
        self.components.iter().map(NumberComponent::normalized).collect::<Vec<_>>().join(".")
    }
}

/// Detect gaps and insert recovered headers until none remain or none can
/// be filled. Returns true when anything was inserted.
pub(crate) fn fill_gaps(headers: &mut Vec<AnchoredHeader>, lines: &[Line], ctx: &mut RunContext<'_>) -> bool {
    if headers.is_empty() || lines.is_empty() {
        return false;
    }
    let mut tried: AHashSet<String> = AHashSet::new();
    let mut inserted_any = false;

    loop {
        let gaps = identify_gaps(headers);
        let pending: Vec<&Gap> = gaps.iter().filter(|gap| !tried.contains(&gap.key())).collect();
        if pending.is_empty() {
            break;
        }
        ctx.tracer.ev(
            "monotonic_violation",
            json!({
                "scope": "numbering_gaps",
                "gaps": pending.iter().map(|gap| gap.key()).collect::<Vec<_>>(),
            }),
        );

        let mut inserted = false;
        for gap in pending {
            tried.insert(gap.key());
            match recover_header(gap, headers, lines) {
                Some(candidate) => {
                    ctx.tracer.ev(
                        "anchor_resolved",
                        json!({
                            "method": "gap_fill",
                            "num": &candidate.number,
                            "idx": candidate.global_idx,
                            "page": candidate.page,
                        }),
                    );
                    headers.push(candidate);
                    headers.sort_by_key(|header| (header.global_idx, header.source_idx));
                    inserted = true;
                    inserted_any = true;
                    break;
                }
                None => {
                    ctx.tracer.ev(
                        "fallback_triggered",
                        json!({"method": "gap_fill", "reason": "unresolved", "num": gap.key()}),
                    );
                }
            }
        }
        if !inserted {
            break;
        }
    }
    inserted_any
}

/// Walk the anchored outline and report missing integer/alpha values.
fn identify_gaps(headers: &[AnchoredHeader]) -> Vec<Gap> {
    use ahash::AHashMap;

    let mut gaps = Vec::new();
    // Key: (prefix rendering, last-component kind discriminant).
    let mut expected: AHashMap<(String, u8), i64> = AHashMap::new();
    let mut last_index: AHashMap<(String, u8), usize> = AHashMap::new();
    let mut components_at: Vec<Option<Vec<NumberComponent>>> = Vec::with_capacity(headers.len());

    for (idx, header) in headers.iter().enumerate() {
        let components = header
            .number
            .as_deref()
            .and_then(NumberSpec::parse)
            .map(|spec| spec.components().to_vec());
        components_at.push(components.clone());
        let Some(components) = components else {
            continue;
        };
        let Some(last) = components.last() else {
            continue;
        };

        let prefix = &components[..components.len() - 1];
        let prefix_key = prefix.iter().map(NumberComponent::normalized).collect::<Vec<_>>().join(".");
        let kind_tag = match last.kind {
            ComponentKind::Numeric => 0u8,
            ComponentKind::Alpha => 1u8,
            ComponentKind::Token => 2u8,
        };
        let key = (prefix_key, kind_tag);

        if last.kind == ComponentKind::Token {
            last_index.insert(key, idx);
            continue;
        }

        if let (Some(&want), Some(&prev_idx)) = (expected.get(&key), last_index.get(&key)) {
            if last.value > want {
                let template = components_at[prev_idx]
                    .as_ref()
                    .and_then(|prev| prev.last().cloned())
                    .unwrap_or_else(|| last.clone());
                for missing in want..last.value {
                    gaps.push(Gap {
                        components: prefix
                            .iter()
                            .cloned()
                            .chain(std::iter::once(build_component(missing, last.kind, &template)))
                            .collect(),
                        after_index: prev_idx,
                        before_index: idx,
                        level: headers[prev_idx].level,
                    });
                }
            }
        }

        expected.insert(key.clone(), last.value + 1);
        last_index.insert(key, idx);
    }

    gaps
}

/// Synthesize a component following the template's printed style
/// (zero padding width, letter case).
fn build_component(value: i64, kind: ComponentKind, template: &NumberComponent) -> NumberComponent {
    match kind {
        ComponentKind::Numeric => {
            let width = if template.raw.bytes().all(|b| b.is_ascii_digit()) {
                template.raw.len()
            } else {
                0
            };
            NumberComponent {
                raw: format!("{value:0width$}"),
                kind,
                value,
            }
        }
        ComponentKind::Alpha => {
            let upper = int_to_alpha(value);
            let raw = if template.raw.chars().all(|c| c.is_ascii_lowercase()) {
                upper.to_ascii_lowercase()
            } else {
                upper
            };
            NumberComponent { raw, kind, value }
        }
        ComponentKind::Token => NumberComponent {
            raw: value.to_string(),
            kind,
            value,
        },
    }
}

/// Scan the span between the surrounding same-group anchors for the
/// missing heading.
fn recover_header(gap: &Gap, headers: &[AnchoredHeader], lines: &[Line]) -> Option<AnchoredHeader> {
    let after = headers.get(gap.after_index)?;
    let start_gid = after.global_idx;
    let end_gid = headers
        .get(gap.before_index)
        .map_or_else(|| lines.last().map_or(start_gid, |l| l.global_idx + 1), |next| next.global_idx);

    let pattern = gap_regex(&gap.components);
    let number = gap.key();

    for line in lines {
        if line.global_idx < start_gid || line.global_idx >= end_gid {
            continue;
        }
        if line.is_toc || line.is_index || line.is_running {
            continue;
        }
        let stripped = line.text.trim_start();
        let Some(hit) = pattern.find(stripped) else {
            continue;
        };
        let remainder = stripped[hit.end()..].trim_start_matches([' ', '-', '.', ')', ':', '\t']);
        if remainder.trim().is_empty() {
            continue;
        }
        if headers.iter().any(|existing| existing.global_idx == line.global_idx) {
            continue;
        }
        return Some(AnchoredHeader {
            text: remainder.trim().to_owned(),
            number: Some(number),
            level: gap.level.max(1),
            page: line.page,
            line_idx: line.line_idx,
            global_idx: line.global_idx,
            source_idx: after.source_idx,
            strategy: Strategy::GapFill,
            score: 0.0,
        });
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LocateConfig;
    use crate::noise::NoiseReport;
    use crate::trace::Tracer;

    fn anchored(number: &str, text: &str, level: u32, gid: u32, source: u32) -> AnchoredHeader {
        AnchoredHeader {
            text: text.to_owned(),
            number: Some(number.to_owned()),
            level,
            page: 1,
            line_idx: gid,
            global_idx: gid,
            source_idx: source,
            strategy: Strategy::NumTitle,
            score: 100.0,
        }
    }

    fn lines_of(texts: &[&str]) -> Vec<Line> {
        texts
            .iter()
            .enumerate()
            .map(|(i, text)| Line::new(i as u32, 1, i as u32, *text))
            .collect()
    }

    #[test]
    fn test_integer_gap_filled() {
        // Scenario S3: oracle produced 1 and 3, the body prints 2.
        let lines = lines_of(&[
            "1 GENERAL",
            "general body",
            "1.1 Scope",
            "scope body",
            "2. Requirements",
            "requirement body",
            "3 EXECUTION",
        ]);
        let mut headers = vec![
            anchored("1", "GENERAL", 1, 0, 0),
            anchored("1.1", "Scope", 2, 2, 1),
            anchored("3", "EXECUTION", 1, 6, 2),
        ];
        let cfg = LocateConfig::default();
        let mut tracer = Tracer::new("t");
        let mut ctx = RunContext::new(&cfg, &mut tracer, &lines, NoiseReport::default());

        assert!(fill_gaps(&mut headers, &lines, &mut ctx));
        let numbers: Vec<&str> = headers.iter().filter_map(|h| h.number.as_deref()).collect();
        assert_eq!(numbers, vec!["1", "1.1", "2", "3"]);
        let filled = headers.iter().find(|h| h.number.as_deref() == Some("2")).unwrap();
        assert_eq!(filled.global_idx, 4);
        assert_eq!(filled.text, "Requirements");
        assert_eq!(filled.strategy, Strategy::GapFill);
    }

    #[test]
    fn test_alpha_gap_filled() {
        let lines = lines_of(&["A SUBMITTALS", "body", "B Forms and Schedules", "body", "C WARRANTY"]);
        let mut headers = vec![anchored("A", "SUBMITTALS", 1, 0, 0), anchored("C", "WARRANTY", 1, 4, 1)];
        let cfg = LocateConfig::default();
        let mut tracer = Tracer::new("t");
        let mut ctx = RunContext::new(&cfg, &mut tracer, &lines, NoiseReport::default());

        assert!(fill_gaps(&mut headers, &lines, &mut ctx));
        let filled = headers.iter().find(|h| h.number.as_deref() == Some("B")).unwrap();
        assert_eq!(filled.global_idx, 2);
        assert_eq!(filled.text, "Forms and Schedules");
    }

    #[test]
    fn test_unresolvable_gap_reports_fallback() {
        // The body never prints a `2`; the gap stays open.
        let lines = lines_of(&["1 GENERAL", "body", "3 EXECUTION"]);
        let mut headers = vec![anchored("1", "GENERAL", 1, 0, 0), anchored("3", "EXECUTION", 1, 2, 1)];
        let cfg = LocateConfig::default();
        let mut tracer = Tracer::new("t");
        let mut ctx = RunContext::new(&cfg, &mut tracer, &lines, NoiseReport::default());

        assert!(!fill_gaps(&mut headers, &lines, &mut ctx));
        assert_eq!(headers.len(), 2);
        assert!(tracer.has_event("fallback_triggered"));
    }

    #[test]
    fn test_nested_gap_uses_prefix() {
        let lines = lines_of(&["1.1 Scope", "body", "1.2 References", "body", "1.3 Definitions", "1.4 Quality"]);
        let mut headers = vec![anchored("1.1", "Scope", 2, 0, 0), anchored("1.4", "Quality", 2, 5, 1)];
        let cfg = LocateConfig::default();
        let mut tracer = Tracer::new("t");
        let mut ctx = RunContext::new(&cfg, &mut tracer, &lines, NoiseReport::default());

        assert!(fill_gaps(&mut headers, &lines, &mut ctx));
        let numbers: Vec<&str> = headers.iter().filter_map(|h| h.number.as_deref()).collect();
        assert_eq!(numbers, vec!["1.1", "1.2", "1.3", "1.4"]);
    }

    #[test]
    fn test_zero_padded_template_matches() {
        let lines = lines_of(&["01 GENERAL", "body", "02 PRODUCTS", "body", "03 EXECUTION"]);
        let mut headers = vec![anchored("01", "GENERAL", 1, 0, 0), anchored("03", "EXECUTION", 1, 4, 1)];
        let cfg = LocateConfig::default();
        let mut tracer = Tracer::new("t");
        let mut ctx = RunContext::new(&cfg, &mut tracer, &lines, NoiseReport::default());

        assert!(fill_gaps(&mut headers, &lines, &mut ctx));
        let filled = headers.iter().find(|h| h.text == "PRODUCTS").unwrap();
        assert_eq!(filled.global_idx, 2);
    }

    #[test]
    fn test_no_gap_no_change() {
        let lines = lines_of(&["1 A", "2 B"]);
        let mut headers = vec![anchored("1", "A", 1, 0, 0), anchored("2", "B", 1, 1, 1)];
        let cfg = LocateConfig::default();
        let mut tracer = Tracer::new("t");
        let mut ctx = RunContext::new(&cfg, &mut tracer, &lines, NoiseReport::default());
        assert!(!fill_gaps(&mut headers, &lines, &mut ctx));
        assert_eq!(headers.len(), 2);
    }
}
