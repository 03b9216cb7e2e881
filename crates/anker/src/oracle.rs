//! Oracle outline intake.
//!
//! The language-model oracle returns free text; the engine only trusts the
//! fenced JSON object inside it. Parsing is lenient by default (invalid
//! payloads yield an empty candidate list) and strict on demand. The flat
//! candidate list and the level-driven outline tree convert in both
//! directions.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{AnkerError, Result};
use crate::types::CandidateHeader;

/// Fence token used by the strict prompt contract.
pub const FENCE: &str = "#headers#";
const FENCE_END: &str = "#/headers#";

static BRACE_SNIFF: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)\{.*\}").expect("brace sniff pattern"));

/// Transport to the external header oracle.
///
/// The engine awaits the full response text; the host owns scheduling and
/// timeouts. Failures map to [`AnkerError::OracleUnavailable`], which the
/// orchestrator recovers from with an empty outline.
pub trait HeaderOracle {
    fn fetch_outline(&self, doc_text: &str) -> Result<String>;
}

/// Hierarchical outline node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutlineNode {
    pub title: String,
    #[serde(default)]
    pub numbering: String,
    #[serde(default)]
    pub page: Option<u32>,
    #[serde(default)]
    pub children: Vec<OutlineNode>,
}

/// Parse an oracle response leniently.
///
/// Everything outside the fenced JSON block is ignored. A missing fence
/// falls back to brace sniffing; invalid JSON or a malformed `headers`
/// field yields the empty list.
pub fn parse_outline(raw: &str) -> Vec<CandidateHeader> {
    let Some(payload) = extract_payload(raw) else {
        return Vec::new();
    };
    headers_from_payload(&payload)
}

/// Parse an oracle response strictly.
///
/// Surfaces [`AnkerError::OutlineParse`] with code `empty_outline` when no
/// valid, non-empty header list can be extracted.
pub fn parse_outline_strict(raw: &str) -> Result<Vec<CandidateHeader>> {
    let payload = extract_payload(raw).ok_or_else(AnkerError::empty_outline)?;
    let headers = headers_from_payload(&payload);
    if headers.is_empty() {
        return Err(AnkerError::empty_outline());
    }
    Ok(headers)
}

fn extract_payload(raw: &str) -> Option<Value> {
    let candidate = fenced_block(raw).or_else(|| BRACE_SNIFF.find(raw).map(|m| m.as_str().to_owned()))?;
    let value: Value = serde_json::from_str(candidate.trim()).ok()?;
    // A bare list is accepted as the headers array itself.
    let value = match value {
        Value::Array(items) => {
            let mut object = serde_json::Map::new();
            object.insert("headers".to_owned(), Value::Array(items));
            Value::Object(object)
        }
        other => other,
    };
    value.is_object().then_some(value)
}

fn fenced_block(raw: &str) -> Option<String> {
    if let Some(start) = raw.find(FENCE) {
        let rest = &raw[start + FENCE.len()..];
        if let Some(end) = rest.rfind(FENCE_END) {
            return Some(rest[..end].trim().to_owned());
        }
    }
    // Markdown-style code fence, optionally tagged `json`.
    let start = raw.find("```")?;
    let after = &raw[start + 3..];
    let body_start = after.find('\n')? + 1;
    let body = &after[body_start..];
    let end = body.find("```")?;
    Some(body[..end].trim().to_owned())
}

fn headers_from_payload(payload: &Value) -> Vec<CandidateHeader> {
    let Some(entries) = payload.get("headers").and_then(Value::as_array) else {
        return Vec::new();
    };
    let mut out = Vec::new();
    for entry in entries {
        collect_entry(entry, None, &mut out);
    }
    for (idx, header) in out.iter_mut().enumerate() {
        header.source_idx = idx as u32;
    }
    out
}

/// Normalize one payload entry, recursing into `children`.
fn collect_entry(entry: &Value, depth: Option<u32>, out: &mut Vec<CandidateHeader>) {
    let Some(map) = entry.as_object() else {
        return;
    };
    let title = map
        .get("title")
        .or_else(|| map.get("text"))
        .and_then(Value::as_str)
        .map(str::trim)
        .unwrap_or_default();
    if title.is_empty() {
        return;
    }

    let number = map
        .get("number")
        .or_else(|| map.get("label"))
        .or_else(|| map.get("heading_number"))
        .and_then(|value| match value {
            Value::String(s) => Some(s.trim().to_owned()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        })
        .filter(|s| !s.is_empty());

    let level = depth.unwrap_or_else(|| {
        map.get("level")
            .and_then(Value::as_i64)
            .map(|v| v.max(1) as u32)
            .unwrap_or(1)
    });

    let page = map.get("page").and_then(Value::as_u64).map(|v| v as u32);

    out.push(CandidateHeader {
        text: title.to_owned(),
        number,
        level,
        source_idx: 0,
        page,
    });

    if let Some(children) = map.get("children").and_then(Value::as_array) {
        for child in children {
            collect_entry(child, Some(level + 1), out);
        }
    }
}

/// Build the level-driven tree from a flat candidate list.
pub fn build_outline_tree(flat: &[CandidateHeader]) -> Vec<OutlineNode> {
    let mut roots: Vec<OutlineNode> = Vec::new();
    // Stack of (level, path-of-child-indices) locating the open node.
    let mut stack: Vec<(u32, Vec<usize>)> = Vec::new();

    for header in flat {
        let node = OutlineNode {
            title: header.text.clone(),
            numbering: header.number.clone().unwrap_or_default(),
            page: header.page,
            children: Vec::new(),
        };
        while stack.last().is_some_and(|(level, _)| *level >= header.level) {
            stack.pop();
        }
        let path = match stack.last() {
            None => {
                roots.push(node);
                vec![roots.len() - 1]
            }
            Some((_, parent_path)) => {
                let parent = node_at_mut(&mut roots, parent_path);
                parent.children.push(node);
                let mut path = parent_path.clone();
                path.push(parent.children.len() - 1);
                path
            }
        };
        stack.push((header.level, path));
    }

    roots
}

fn node_at_mut<'a>(roots: &'a mut [OutlineNode], path: &[usize]) -> &'a mut OutlineNode {
    let mut node = &mut roots[path[0]];
    for &idx in &path[1..] {
        node = &mut node.children[idx];
    }
    node
}

/// Flatten an outline tree back into the candidate list.
pub fn flatten_outline(nodes: &[OutlineNode]) -> Vec<CandidateHeader> {
    fn walk(node: &OutlineNode, depth: u32, out: &mut Vec<CandidateHeader>) {
        out.push(CandidateHeader {
            text: node.title.clone(),
            number: (!node.numbering.is_empty()).then(|| node.numbering.clone()),
            level: depth.max(1),
            source_idx: out.len() as u32,
            page: node.page,
        });
        for child in &node.children {
            walk(child, depth + 1, out);
        }
    }

    let mut out = Vec::new();
    for root in nodes {
        walk(root, 1, &mut out);
    }
    out
}
