//! Structured decision tracing.
//!
//! Every decision point in the pipeline emits an event; the collected log is
//! the audit trail regression tests diff against. The tracer is a pure sink:
//! disabling it changes no engine semantics. Events serialize as
//! newline-delimited JSON (`{"t": <epoch s>, "type": ..., ...}`), and a
//! run summary aggregates metadata, the received outline, key decisions, and
//! the final outline.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::error::Result;

/// Event types counted as decisions in the run summary.
const DECISION_TYPES: [&str; 4] = [
    "candidate_found",
    "anchor_resolved",
    "fallback_triggered",
    "monotonic_violation",
];

/// One trace event. The payload flattens into the JSON object next to the
/// timestamp and type tag.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TraceEvent {
    /// Epoch seconds.
    pub t: f64,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(flatten)]
    pub data: Map<String, Value>,
}

/// Collects structured events for one locator run.
#[derive(Debug)]
pub struct Tracer {
    enabled: bool,
    run_id: String,
    events: Vec<TraceEvent>,
}

impl Tracer {
    /// Tracer that records events under the given run id.
    pub fn new(run_id: impl Into<String>) -> Self {
        Tracer {
            enabled: true,
            run_id: run_id.into(),
            events: Vec::new(),
        }
    }

    /// Tracer that drops everything.
    pub fn disabled() -> Self {
        Tracer {
            enabled: false,
            run_id: String::new(),
            events: Vec::new(),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    /// Record an event. `data` must be a JSON object.
    pub fn ev(&mut self, kind: &str, data: Value) {
        if !self.enabled {
            return;
        }
        let data = match data {
            Value::Object(map) => map,
            Value::Null => Map::new(),
            other => {
                let mut map = Map::new();
                map.insert("value".to_owned(), other);
                map
            }
        };
        self.events.push(TraceEvent {
            t: epoch_seconds(),
            kind: kind.to_owned(),
            data,
        });
    }

    pub fn events(&self) -> &[TraceEvent] {
        &self.events
    }

    pub fn into_events(self) -> Vec<TraceEvent> {
        self.events
    }

    /// True when any recorded event has this type.
    pub fn has_event(&self, kind: &str) -> bool {
        self.events.iter().any(|event| event.kind == kind)
    }

    /// Write the JSONL log and the summary file under `out_dir`.
    ///
    /// Returns the JSONL path. A disabled tracer writes nothing and returns
    /// the would-be path.
    pub fn flush_jsonl(&self, out_dir: &Path) -> Result<PathBuf> {
        let jsonl_path = out_dir.join(format!("{}.jsonl", self.run_id));
        if !self.enabled {
            return Ok(jsonl_path);
        }
        std::fs::create_dir_all(out_dir)?;

        let mut body = String::new();
        for event in &self.events {
            body.push_str(&serde_json::to_string(event).unwrap_or_else(|_| "{}".to_owned()));
            body.push('\n');
        }
        std::fs::write(&jsonl_path, body)?;

        let summary_path = out_dir.join(format!("{}.summary.json", self.run_id));
        let summary = serde_json::to_string_pretty(&self.summary()).unwrap_or_else(|_| "{}".to_owned());
        std::fs::write(&summary_path, summary)?;

        tracing::info!(path = %jsonl_path.display(), "trace written");
        Ok(jsonl_path)
    }

    /// Aggregate the event log into the per-run summary payload.
    pub fn summary(&self) -> Value {
        let mut metadata = Value::Null;
        let mut llm_headers = Value::Array(Vec::new());
        let mut final_outline = Map::new();
        let mut decisions: Vec<Value> = Vec::new();
        let mut elapsed: Option<f64> = None;

        for event in &self.events {
            match event.kind.as_str() {
                "start_run" => {
                    metadata = Value::Object(event.data.clone());
                }
                "llm_outline_received" => {
                    if let Some(headers) = event.data.get("headers") {
                        llm_headers = headers.clone();
                    }
                }
                "final_outline" => {
                    for key in ["headers", "sections", "mode", "messages"] {
                        if let Some(value) = event.data.get(key) {
                            final_outline.insert(key.to_owned(), value.clone());
                        }
                    }
                    if let Some(value) = event.data.get("elapsed_s").and_then(Value::as_f64) {
                        elapsed = Some(value);
                    }
                }
                "end_run" => {
                    if elapsed.is_none() {
                        elapsed = event.data.get("elapsed_s").and_then(Value::as_f64);
                    }
                }
                _ => {}
            }
            if DECISION_TYPES.contains(&event.kind.as_str()) {
                decisions.push(serde_json::to_value(event).unwrap_or(Value::Null));
            }
        }

        json!({
            "run_id": self.run_id,
            "metadata": metadata,
            "llm_headers": llm_headers,
            "decisions": decisions,
            "final_outline": Value::Object(final_outline),
            "elapsed_s": elapsed,
        })
    }
}

fn epoch_seconds() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_disabled_tracer_records_nothing() {
        let mut tracer = Tracer::disabled();
        tracer.ev("anchor_resolved", json!({"num": "1"}));
        assert!(tracer.events().is_empty());
    }

    #[test]
    fn test_event_payload_flattens() {
        let mut tracer = Tracer::new("t1");
        tracer.ev("candidate_found", json!({"num": "1.2", "idx": 14}));
        let line = serde_json::to_string(&tracer.events()[0]).unwrap();
        let value: Value = serde_json::from_str(&line).unwrap();
        assert_eq!(value["type"], "candidate_found");
        assert_eq!(value["num"], "1.2");
        assert_eq!(value["idx"], 14);
        assert!(value["t"].as_f64().unwrap() > 0.0);
    }

    #[test]
    fn test_summary_filters_decisions() {
        let mut tracer = Tracer::new("t2");
        tracer.ev("start_run", json!({"mode": "llm_full"}));
        tracer.ev("toc_detected", json!({"page": 1}));
        tracer.ev("candidate_found", json!({"num": "1"}));
        tracer.ev("anchor_resolved", json!({"num": "1", "global_idx": 3}));
        tracer.ev(
            "final_outline",
            json!({"headers": [], "sections": [], "mode": "llm_full", "messages": [], "elapsed_s": 0.5}),
        );
        tracer.ev("end_run", json!({"elapsed_s": 0.5}));

        let summary = tracer.summary();
        assert_eq!(summary["metadata"]["mode"], "llm_full");
        assert_eq!(summary["decisions"].as_array().unwrap().len(), 2);
        assert_eq!(summary["elapsed_s"], 0.5);
        assert_eq!(summary["final_outline"]["mode"], "llm_full");
    }

    #[test]
    fn test_flush_writes_jsonl_and_summary() {
        let dir = tempfile::tempdir().unwrap();
        let mut tracer = Tracer::new("run42");
        tracer.ev("doc_stats", json!({"pages": 3, "lines": 40}));
        tracer.ev("end_run", json!({"elapsed_s": 0.01}));

        let path = tracer.flush_jsonl(dir.path()).unwrap();
        assert!(path.exists());
        let body = std::fs::read_to_string(&path).unwrap();
        assert_eq!(body.lines().count(), 2);
        let first: Value = serde_json::from_str(body.lines().next().unwrap()).unwrap();
        assert_eq!(first["type"], "doc_stats");
        assert!(dir.path().join("run42.summary.json").exists());
    }
}
