//! Embedding interface and append-only vector caches.
//!
//! The engine never talks to an embedding provider directly; it consumes the
//! [`Embedder`] trait, which must return L2-normalized vectors so cosine
//! similarity reduces to a dot product. Two caches exist: a cross-document
//! content-addressed cache (one file per text, keyed by digest) and a
//! per-document window matrix cache (keyed by the caller's cache key). Both
//! are append-only; writes go to a temp file and land via atomic rename.

use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};

use crate::error::{AnkerError, Result};

/// External embedding provider.
///
/// `embed_batch` returns one L2-normalized vector per input, all the same
/// dimension. Transport failures surface as
/// [`AnkerError::EmbedderUnavailable`]; the orchestrator responds by
/// disabling the vector path for the run.
pub trait Embedder {
    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;
}

/// Prepare a text for embedding requests.
///
/// Very short strings lose too much context as bare queries; they get a
/// `heading:` prefix so the provider embeds them as titles.
pub fn prepare_query(text: &str) -> String {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return "heading: (empty)".to_owned();
    }
    if trimmed.split_whitespace().count() < 4 {
        return format!("heading: {trimmed}");
    }
    trimmed.to_owned()
}

/// Dot product of two unit vectors, clamped to the cosine range.
pub fn cosine(a: &[f32], b: &[f32]) -> f32 {
    if a.is_empty() || a.len() != b.len() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    dot.clamp(-1.0, 1.0)
}

/// Content-addressed on-disk vector cache shared across documents.
#[derive(Debug, Clone)]
pub struct EmbeddingCache {
    dir: PathBuf,
}

impl EmbeddingCache {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        EmbeddingCache { dir: dir.into() }
    }

    fn entry_path(&self, prepared: &str) -> PathBuf {
        let digest = hex::encode(Sha256::digest(prepared.as_bytes()));
        self.dir.join(format!("{digest}.json"))
    }

    /// Cached vector for a prepared text, if present and readable.
    pub fn get(&self, prepared: &str) -> Option<Vec<f32>> {
        let path = self.entry_path(prepared);
        let body = std::fs::read_to_string(path).ok()?;
        serde_json::from_str(&body).ok()
    }

    /// Store a vector; the write lands atomically or reports `CacheWrite`.
    pub fn put(&self, prepared: &str, vector: &[f32]) -> Result<()> {
        let path = self.entry_path(prepared);
        write_atomic(&self.dir, &path, &serde_json::to_string(vector).unwrap_or_default())
    }
}

/// Per-document cache of the full window embedding matrix.
#[derive(Debug, Clone)]
pub struct WindowEmbeddingCache {
    dir: PathBuf,
}

impl WindowEmbeddingCache {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        WindowEmbeddingCache { dir: dir.into() }
    }

    fn entry_path(&self, cache_key: &str) -> PathBuf {
        let safe: String = cache_key
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || "_.-".contains(c) { c } else { '-' })
            .collect();
        self.dir.join(format!("{safe}.windows.json"))
    }

    /// Cached matrix for the key, validated against the expected row count.
    pub fn load(&self, cache_key: &str, expected_rows: usize) -> Option<Vec<Vec<f32>>> {
        let path = self.entry_path(cache_key);
        let body = std::fs::read_to_string(&path).ok()?;
        let matrix: Vec<Vec<f32>> = serde_json::from_str(&body).ok()?;
        if matrix.len() != expected_rows {
            // Stale cache from a different windowing; drop it.
            let _ = std::fs::remove_file(&path);
            return None;
        }
        Some(matrix)
    }

    pub fn store(&self, cache_key: &str, matrix: &[Vec<f32>]) -> Result<()> {
        let path = self.entry_path(cache_key);
        write_atomic(&self.dir, &path, &serde_json::to_string(matrix).unwrap_or_default())
    }
}

/// Embed a batch, resolving from the content cache first.
///
/// Only cache misses reach the provider; fresh vectors are written back.
/// A provider row-count mismatch is an embedder failure.
pub fn embed_batch_cached(
    embedder: &dyn Embedder,
    cache: Option<&EmbeddingCache>,
    texts: &[String],
) -> Result<Vec<Vec<f32>>> {
    if texts.is_empty() {
        return Ok(Vec::new());
    }
    let prepared: Vec<String> = texts.iter().map(|t| prepare_query(t)).collect();

    let mut resolved: Vec<Option<Vec<f32>>> = vec![None; prepared.len()];
    let mut pending: Vec<String> = Vec::new();
    let mut pending_indices: Vec<usize> = Vec::new();

    for (idx, text) in prepared.iter().enumerate() {
        if let Some(cache) = cache {
            if let Some(vector) = cache.get(text) {
                resolved[idx] = Some(vector);
                continue;
            }
        }
        pending.push(text.clone());
        pending_indices.push(idx);
    }

    if !pending.is_empty() {
        let fresh = embedder.embed_batch(&pending)?;
        if fresh.len() != pending_indices.len() {
            return Err(AnkerError::embedder(format!(
                "provider returned {} vectors for {} inputs",
                fresh.len(),
                pending_indices.len()
            )));
        }
        for (offset, idx) in pending_indices.into_iter().enumerate() {
            if let Some(cache) = cache {
                if let Err(err) = cache.put(&prepared[idx], &fresh[offset]) {
                    tracing::warn!(error = %err, "embedding cache write failed");
                }
            }
            resolved[idx] = Some(fresh[offset].clone());
        }
    }

    Ok(resolved.into_iter().map(|v| v.unwrap_or_default()).collect())
}

fn write_atomic(dir: &Path, path: &Path, body: &str) -> Result<()> {
    std::fs::create_dir_all(dir).map_err(|e| AnkerError::cache_write(e.to_string()))?;
    let tmp = path.with_extension("tmp");
    std::fs::write(&tmp, body).map_err(|e| AnkerError::cache_write(e.to_string()))?;
    std::fs::rename(&tmp, path).map_err(|e| AnkerError::cache_write(e.to_string()))?;
    Ok(())
}
