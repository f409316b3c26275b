//! Flat vector index persisted per session, and the retriever over it.
//!
//! An index is a list of chunks with one embedding each. Search is a
//! brute-force cosine scan; session indexes are small enough that nothing
//! smarter pays off.
//!
//! # On-disk format
//!
//! ```text
//! <dir>/<name>.vectors   rows of little-endian f32, `dims` values per chunk
//! <dir>/<name>.json      {"model": ..., "dims": ..., "chunks": [...]}
//! ```
//!
//! Both files are written to a temporary name and renamed into place, so a
//! save replaces the previous index with the same name.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;

use crate::embedding::{blob_to_vec, cosine_similarity, vec_to_blob, EmbeddingProvider};
use crate::error::{PortalError, Result};
use crate::models::Chunk;

/// How a [`Retriever`] selects chunks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SearchType {
    /// Top-k by cosine similarity.
    #[default]
    Similarity,
    /// Top-k among chunks scoring at least `score_threshold`.
    SimilarityScoreThreshold,
    /// Maximal marginal relevance over the `fetch_k` most similar chunks.
    Mmr,
}

impl SearchType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SearchType::Similarity => "similarity",
            SearchType::SimilarityScoreThreshold => "similarity_score_threshold",
            SearchType::Mmr => "mmr",
        }
    }
}

impl FromStr for SearchType {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "similarity" => Ok(SearchType::Similarity),
            "similarity_score_threshold" => Ok(SearchType::SimilarityScoreThreshold),
            "mmr" => Ok(SearchType::Mmr),
            other => Err(format!(
                "unknown search_type '{}' (expected similarity, similarity_score_threshold or mmr)",
                other
            )),
        }
    }
}

impl std::fmt::Display for SearchType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Tuning parameters for a search.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchKwargs {
    pub k: usize,
    /// Minimum cosine similarity for `similarity_score_threshold`.
    pub score_threshold: Option<f32>,
    /// Candidate pool size for `mmr`.
    pub fetch_k: usize,
    /// `mmr` trade-off: 1.0 is pure relevance, 0.0 pure diversity.
    pub lambda_mult: f32,
}

impl SearchKwargs {
    pub fn with_k(k: usize) -> Self {
        Self {
            k,
            ..Self::default()
        }
    }
}

impl Default for SearchKwargs {
    fn default() -> Self {
        Self {
            k: 5,
            score_threshold: None,
            fetch_k: 20,
            lambda_mult: 0.5,
        }
    }
}

/// A chunk returned by a search with its cosine similarity to the query.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredChunk {
    pub chunk: Chunk,
    pub score: f32,
}

#[derive(Serialize, Deserialize)]
struct IndexManifest {
    model: String,
    dims: usize,
    chunks: Vec<Chunk>,
}

/// An in-memory flat index of chunk embeddings.
#[derive(Debug, Clone)]
pub struct VectorIndex {
    model: String,
    dims: usize,
    chunks: Vec<Chunk>,
    vectors: Vec<Vec<f32>>,
}

impl VectorIndex {
    /// Embeds every chunk with `embedder` and builds an index.
    pub async fn from_chunks(chunks: Vec<Chunk>, embedder: &dyn EmbeddingProvider) -> Result<Self> {
        if chunks.is_empty() {
            return Err(PortalError::Ingestion("no chunks to index".to_string()));
        }
        let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
        let vectors = embedder.embed_documents(&texts).await?;
        tracing::debug!(
            chunks = chunks.len(),
            model = %embedder.model_name(),
            "Embedded chunks"
        );
        Self::from_parts(embedder.model_name(), chunks, vectors)
    }

    /// Builds an index from precomputed vectors, checking that every chunk
    /// has one vector and all vectors share a dimension.
    pub fn from_parts(
        model: impl Into<String>,
        chunks: Vec<Chunk>,
        vectors: Vec<Vec<f32>>,
    ) -> Result<Self> {
        if chunks.len() != vectors.len() {
            return Err(PortalError::Model(format!(
                "embedding count mismatch: {} chunks, {} vectors",
                chunks.len(),
                vectors.len()
            )));
        }
        let dims = vectors.first().map(|v| v.len()).unwrap_or(0);
        if vectors.iter().any(|v| v.len() != dims) {
            return Err(PortalError::Model(
                "embeddings have inconsistent dimensions".to_string(),
            ));
        }
        Ok(Self {
            model: model.into(),
            dims,
            chunks,
            vectors,
        })
    }

    pub fn model_name(&self) -> &str {
        &self.model
    }

    pub fn dims(&self) -> usize {
        self.dims
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    pub fn chunks(&self) -> &[Chunk] {
        &self.chunks
    }

    /// Whether an index named `name` has been saved in `dir`.
    pub fn exists(dir: &Path, name: &str) -> bool {
        let (vectors, manifest) = index_files(dir, name);
        vectors.is_file() && manifest.is_file()
    }

    /// Writes the index to `dir`, replacing any index with the same name.
    pub fn save_local(&self, dir: &Path, name: &str) -> Result<()> {
        std::fs::create_dir_all(dir)?;
        let (vectors_path, manifest_path) = index_files(dir, name);

        let mut blob = Vec::with_capacity(self.vectors.len() * self.dims * 4);
        for v in &self.vectors {
            blob.extend_from_slice(&vec_to_blob(v));
        }
        let manifest = IndexManifest {
            model: self.model.clone(),
            dims: self.dims,
            chunks: self.chunks.clone(),
        };

        write_replacing(&vectors_path, &blob)?;
        write_replacing(&manifest_path, &serde_json::to_vec(&manifest)?)?;

        tracing::info!(
            path = %dir.display(),
            index = %name,
            chunks = self.chunks.len(),
            dims = self.dims,
            "Vector index saved"
        );
        Ok(())
    }

    /// Reads an index previously written by [`save_local`](Self::save_local).
    pub fn load_local(dir: &Path, name: &str) -> Result<Self> {
        let (vectors_path, manifest_path) = index_files(dir, name);
        if !vectors_path.is_file() || !manifest_path.is_file() {
            return Err(PortalError::NotFound(format!(
                "vector index '{}' not found in {}",
                name,
                dir.display()
            )));
        }

        let manifest: IndexManifest = serde_json::from_slice(&std::fs::read(&manifest_path)?)?;
        let flat = blob_to_vec(&std::fs::read(&vectors_path)?);

        let expected = manifest.chunks.len() * manifest.dims;
        if flat.len() != expected {
            return Err(PortalError::Parse(format!(
                "vector file holds {} values, expected {} ({} chunks x {} dims)",
                flat.len(),
                expected,
                manifest.chunks.len(),
                manifest.dims
            )));
        }
        let vectors: Vec<Vec<f32>> = if manifest.dims == 0 {
            vec![Vec::new(); manifest.chunks.len()]
        } else {
            flat.chunks_exact(manifest.dims).map(|row| row.to_vec()).collect()
        };

        tracing::debug!(path = %dir.display(), index = %name, chunks = vectors.len(), "Vector index loaded");
        Self::from_parts(manifest.model, manifest.chunks, vectors)
    }

    /// Every chunk scored against `query`, best first.
    fn scored(&self, query: &[f32]) -> Vec<(usize, f32)> {
        let mut scored: Vec<(usize, f32)> = self
            .vectors
            .iter()
            .enumerate()
            .map(|(i, v)| (i, cosine_similarity(query, v)))
            .collect();
        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(Ordering::Equal));
        scored
    }

    pub fn similarity_search(&self, query: &[f32], k: usize) -> Vec<ScoredChunk> {
        self.scored(query)
            .into_iter()
            .take(k)
            .map(|(i, score)| self.hit(i, score))
            .collect()
    }

    pub fn similarity_search_with_threshold(
        &self,
        query: &[f32],
        k: usize,
        threshold: f32,
    ) -> Vec<ScoredChunk> {
        self.scored(query)
            .into_iter()
            .take_while(|(_, score)| *score >= threshold)
            .take(k)
            .map(|(i, score)| self.hit(i, score))
            .collect()
    }

    /// Picks `k` chunks from the `fetch_k` most similar, greedily trading
    /// similarity to the query against similarity to chunks already picked.
    pub fn max_marginal_relevance_search(
        &self,
        query: &[f32],
        k: usize,
        fetch_k: usize,
        lambda_mult: f32,
    ) -> Vec<ScoredChunk> {
        let mut pool: Vec<(usize, f32)> = self.scored(query).into_iter().take(fetch_k.max(k)).collect();
        let mut picked: Vec<(usize, f32)> = Vec::with_capacity(k);

        while picked.len() < k && !pool.is_empty() {
            let mut best = 0;
            let mut best_value = f32::NEG_INFINITY;
            for (pos, &(i, relevance)) in pool.iter().enumerate() {
                let redundancy = picked
                    .iter()
                    .map(|&(j, _)| cosine_similarity(&self.vectors[i], &self.vectors[j]))
                    .fold(f32::NEG_INFINITY, f32::max);
                let redundancy = if picked.is_empty() { 0.0 } else { redundancy };
                let value = lambda_mult * relevance - (1.0 - lambda_mult) * redundancy;
                if value > best_value {
                    best_value = value;
                    best = pos;
                }
            }
            picked.push(pool.remove(best));
        }

        picked.into_iter().map(|(i, score)| self.hit(i, score)).collect()
    }

    /// Dispatches on `search_type`.
    pub fn search(&self, query: &[f32], search_type: SearchType, kwargs: &SearchKwargs) -> Vec<ScoredChunk> {
        match search_type {
            SearchType::Similarity => self.similarity_search(query, kwargs.k),
            SearchType::SimilarityScoreThreshold => self.similarity_search_with_threshold(
                query,
                kwargs.k,
                kwargs.score_threshold.unwrap_or(0.0),
            ),
            SearchType::Mmr => {
                self.max_marginal_relevance_search(query, kwargs.k, kwargs.fetch_k, kwargs.lambda_mult)
            }
        }
    }

    fn hit(&self, i: usize, score: f32) -> ScoredChunk {
        ScoredChunk {
            chunk: self.chunks[i].clone(),
            score,
        }
    }
}

fn index_files(dir: &Path, name: &str) -> (PathBuf, PathBuf) {
    (
        dir.join(format!("{}.vectors", name)),
        dir.join(format!("{}.json", name)),
    )
}

fn write_replacing(path: &Path, bytes: &[u8]) -> Result<()> {
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);
    std::fs::write(&tmp, bytes)?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}

/// Query interface over a [`VectorIndex`]: embeds the query and runs the
/// configured search.
#[derive(Clone)]
pub struct Retriever {
    index: Arc<VectorIndex>,
    embedder: Arc<dyn EmbeddingProvider>,
    search_type: SearchType,
    kwargs: SearchKwargs,
}

impl std::fmt::Debug for Retriever {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Retriever")
            .field("index", &self.index)
            .field("search_type", &self.search_type)
            .field("kwargs", &self.kwargs)
            .finish_non_exhaustive()
    }
}

impl Retriever {
    pub fn new(
        index: Arc<VectorIndex>,
        embedder: Arc<dyn EmbeddingProvider>,
        search_type: SearchType,
        kwargs: SearchKwargs,
    ) -> Result<Self> {
        if kwargs.k == 0 {
            return Err(PortalError::InvalidInput("k must be at least 1".to_string()));
        }
        if search_type == SearchType::SimilarityScoreThreshold && kwargs.score_threshold.is_none() {
            return Err(PortalError::InvalidInput(
                "similarity_score_threshold search requires score_threshold".to_string(),
            ));
        }
        Ok(Self {
            index,
            embedder,
            search_type,
            kwargs,
        })
    }

    /// A plain top-`k` similarity retriever.
    pub fn similarity(index: Arc<VectorIndex>, embedder: Arc<dyn EmbeddingProvider>, k: usize) -> Result<Self> {
        Self::new(index, embedder, SearchType::Similarity, SearchKwargs::with_k(k))
    }

    pub fn index(&self) -> &VectorIndex {
        &self.index
    }

    pub fn search_type(&self) -> SearchType {
        self.search_type
    }

    pub fn k(&self) -> usize {
        self.kwargs.k
    }

    pub async fn retrieve_with_scores(&self, query: &str) -> Result<Vec<ScoredChunk>> {
        let query_vec = self.embedder.embed_query(query).await?;
        let hits = self.index.search(&query_vec, self.search_type, &self.kwargs);
        tracing::debug!(
            search_type = %self.search_type,
            k = self.kwargs.k,
            hits = hits.len(),
            "Retrieved chunks"
        );
        Ok(hits)
    }

    pub async fn retrieve(&self, query: &str) -> Result<Vec<Chunk>> {
        Ok(self
            .retrieve_with_scores(query)
            .await?
            .into_iter()
            .map(|hit| hit.chunk)
            .collect())
    }
}
