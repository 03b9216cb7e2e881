//! Locate-result artifact cache.
//!
//! Cache keys digest every input that can change the outline: the document
//! hash, the parser and locator revisions, the alignment mode, the noise
//! suppression switches, and caller metadata. A hit replays the previously
//! computed result verbatim. Writes are best-effort: a failed write is
//! reported but never blocks the result.

use ahash::AHashMap;
use serde_json::{Value, json};
use sha2::{Digest, Sha256};
use std::cell::RefCell;
use std::path::PathBuf;

use crate::error::{AnkerError, Result};
use crate::types::LocateResult;

/// Revision of the line-metrics contract expected from the parser.
pub const PARSER_VERSION: &str = "lines-v3";
/// Revision of the locator pipeline; bump on semantic changes.
pub const LOCATOR_REV: &str = "seq-source-order-2";

/// Digest of all cache-relevant inputs.
///
/// The payload serializes with sorted keys, so the digest is canonical for
/// equal inputs regardless of construction order.
pub fn inputs_digest(
    doc_hash: &str,
    mode_key: &str,
    suppress_toc: bool,
    suppress_running: bool,
    metadata: &Value,
) -> String {
    let payload = json!({
        "doc_hash": doc_hash,
        "parser_version": PARSER_VERSION,
        "mode": mode_key,
        "suppress_toc": suppress_toc,
        "suppress_running": suppress_running,
        "metadata": metadata,
        "locator_rev": LOCATOR_REV,
    });
    let canonical = serde_json::to_string(&payload).unwrap_or_default();
    hex::encode(Sha256::digest(canonical.as_bytes()))
}

/// In-process result cache with an optional on-disk mirror.
#[derive(Debug, Default)]
pub struct ResultCache {
    entries: RefCell<AHashMap<String, LocateResult>>,
    dir: Option<PathBuf>,
}

impl ResultCache {
    pub fn new() -> Self {
        ResultCache::default()
    }

    /// Cache that also mirrors entries to `dir` as JSON artifacts.
    pub fn with_dir(dir: impl Into<PathBuf>) -> Self {
        ResultCache {
            entries: RefCell::new(AHashMap::new()),
            dir: Some(dir.into()),
        }
    }

    /// Replay a previously computed result.
    pub fn get(&self, key: &str) -> Option<LocateResult> {
        if let Some(result) = self.entries.borrow().get(key) {
            return Some(result.clone());
        }
        let dir = self.dir.as_ref()?;
        let body = std::fs::read_to_string(dir.join(format!("{key}.json"))).ok()?;
        let result: LocateResult = serde_json::from_str(&body).ok()?;
        self.entries.borrow_mut().insert(key.to_owned(), result.clone());
        Some(result)
    }

    /// Store a result. The in-memory entry always lands; the disk mirror
    /// reports [`AnkerError::CacheWrite`] on failure.
    pub fn put(&self, key: &str, result: &LocateResult) -> Result<()> {
        self.entries.borrow_mut().insert(key.to_owned(), result.clone());
        let Some(dir) = self.dir.as_ref() else {
            return Ok(());
        };
        std::fs::create_dir_all(dir).map_err(|e| AnkerError::cache_write(e.to_string()))?;
        let path = dir.join(format!("{key}.json"));
        let tmp = path.with_extension("tmp");
        let body = serde_json::to_string(result).map_err(|e| AnkerError::cache_write(e.to_string()))?;
        std::fs::write(&tmp, body).map_err(|e| AnkerError::cache_write(e.to_string()))?;
        std::fs::rename(&tmp, &path).map_err(|e| AnkerError::cache_write(e.to_string()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::LocateMode;

    fn sample_result() -> LocateResult {
        LocateResult {
            headers: Vec::new(),
            sections: Vec::new(),
            mode: LocateMode::LlmFull,
            messages: vec!["ok".to_owned()],
            excluded_pages: vec![1],
            doc_hash: "abc".to_owned(),
            trace: None,
        }
    }

    #[test]
    fn test_digest_deterministic_and_sensitive() {
        let a = inputs_digest("doc", "llm_full", true, true, &Value::Null);
        let b = inputs_digest("doc", "llm_full", true, true, &Value::Null);
        assert_eq!(a, b);
        assert_ne!(a, inputs_digest("doc", "llm_full", false, true, &Value::Null));
        assert_ne!(a, inputs_digest("other", "llm_full", true, true, &Value::Null));
        assert_ne!(a, inputs_digest("doc", "llm_strict", true, true, &Value::Null));
    }

    #[test]
    fn test_memory_round_trip() {
        let cache = ResultCache::new();
        let key = inputs_digest("doc", "llm_full", true, true, &Value::Null);
        assert!(cache.get(&key).is_none());
        cache.put(&key, &sample_result()).unwrap();
        let replayed = cache.get(&key).unwrap();
        assert_eq!(replayed.messages, vec!["ok".to_owned()]);
        assert_eq!(replayed.excluded_pages, vec![1]);
    }

    #[test]
    fn test_disk_mirror_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let key = inputs_digest("doc", "llm_full", true, true, &Value::Null);
        {
            let cache = ResultCache::with_dir(dir.path());
            cache.put(&key, &sample_result()).unwrap();
        }
        // A fresh cache instance reads the artifact back from disk.
        let cache = ResultCache::with_dir(dir.path());
        assert!(cache.get(&key).is_some());
    }
}
