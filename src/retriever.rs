//! Query-time vector index over one persisted artifact triple.

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use serde::Serialize;

use crate::chunker::Chunk;
use crate::embedder::TextEmbedder;
use crate::index::{FlatIpIndex, IndexError};
use crate::store::load_index;

/// A chunk record paired with its cosine similarity to a query.
#[derive(Debug, Clone, Serialize)]
pub struct ScoredChunk {
    /// The retrieved chunk.
    #[serde(flatten)]
    pub chunk: Chunk,
    /// Cosine similarity of the chunk to the query, in [-1, 1].
    pub score: f32,
}

/// One queryable corpus: the flat index, its aligned chunk records, and the
/// embedder matching the recorded build-time model.
///
/// Loading is expensive and intended to happen once per process lifetime;
/// retrieval afterwards is read-only and safe for concurrent callers.
pub struct VectorIndex {
    name: String,
    index: FlatIpIndex,
    chunks: Vec<Chunk>,
    embedder: Arc<dyn TextEmbedder>,
}

impl std::fmt::Debug for VectorIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VectorIndex")
            .field("name", &self.name)
            .field("chunks", &self.chunks.len())
            .finish_non_exhaustive()
    }
}

impl VectorIndex {
    /// Loads the artifact triple for `name` and binds it to an embedder.
    ///
    /// Fails when any artifact is missing or unparsable, when the chunk
    /// array does not align with the vector count, or when the embedder's
    /// model differs from the one recorded at build time (a silent mismatch
    /// would produce meaningless similarity scores).
    pub fn open(dir: &Path, name: &str, embedder: Arc<dyn TextEmbedder>) -> Result<Self> {
        let (index, chunks, meta) =
            load_index(dir, name).with_context(|| format!("failed to load index {name:?}"))?;
        if meta.embedding_model != embedder.model() {
            return Err(IndexError::ModelMismatch {
                recorded: meta.embedding_model,
                configured: embedder.model().to_string(),
            }
            .into());
        }
        crate::debug_log!("index {name} loaded with {} chunks", chunks.len());
        Ok(Self {
            name: name.to_string(),
            index,
            chunks,
            embedder,
        })
    }

    /// Logical name of this corpus.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Number of indexed chunks.
    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    /// True when the corpus holds no chunks.
    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    /// All chunk records, in index position order.
    pub fn chunks(&self) -> &[Chunk] {
        &self.chunks
    }

    /// Identifier of the embedding model bound to this index.
    pub fn model(&self) -> &str {
        self.embedder.model()
    }

    /// Embeds a query string with the bound embedder.
    pub fn embed_query(&self, query: &str) -> Result<Vec<f32>> {
        self.embedder
            .embed_one(query)
            .with_context(|| format!("failed to embed query for index {:?}", self.name))
    }

    /// Searches with a pre-computed query embedding.
    pub fn search_embedded(&self, embedding: &[f32], k: usize) -> Result<Vec<ScoredChunk>> {
        if k == 0 || self.index.is_empty() {
            return Ok(Vec::new());
        }
        let hits = self
            .index
            .search(embedding, k)
            .with_context(|| format!("search failed for index {:?}", self.name))?;
        Ok(hits
            .into_iter()
            .map(|(position, score)| ScoredChunk {
                chunk: self.chunks[position].clone(),
                score,
            })
            .collect())
    }

    /// Retrieves the top-k chunks for a query, highest similarity first.
    ///
    /// Returns at most `k` results; fewer when the corpus is smaller, and
    /// none at all for `k == 0`.
    pub fn retrieve(&self, query: &str, k: usize) -> Result<Vec<ScoredChunk>> {
        if k == 0 || self.index.is_empty() {
            return Ok(Vec::new());
        }
        let embedding = self.embed_query(query)?;
        self.search_embedded(&embedding, k)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunker::ChunkKind;
    use crate::index::FlatIpIndex;
    use crate::store::{save_index, IndexMeta};

    /// Deterministic word-count embedder for tests.
    struct StubEmbedder {
        model: String,
        vocabulary: Vec<&'static str>,
    }

    impl StubEmbedder {
        fn new(model: &str) -> Self {
            Self {
                model: model.to_string(),
                vocabulary: vec!["goal", "rebate", "report"],
            }
        }

        fn encode(&self, input: &str) -> Vec<f32> {
            let lowered = input.to_lowercase();
            self.vocabulary
                .iter()
                .map(|word| lowered.matches(word).count() as f32)
                .collect()
        }
    }

    impl TextEmbedder for StubEmbedder {
        fn model(&self) -> &str {
            &self.model
        }

        fn embed_batch(&self, inputs: &[&str]) -> Result<Vec<Vec<f32>>> {
            Ok(inputs.iter().map(|input| self.encode(input)).collect())
        }
    }

    fn context_chunk(chunk_id: &str, text: &str) -> Chunk {
        Chunk {
            chunk_id: chunk_id.to_string(),
            doc_id: "cp_res_ee".to_string(),
            title: "Residential Programs".to_string(),
            source_url: "https://example.com/residential".to_string(),
            text: text.to_string(),
            kind: ChunkKind::Context,
        }
    }

    fn build_corpus(dir: &Path, name: &str, embedder: &StubEmbedder, texts: &[&str]) {
        let chunks: Vec<Chunk> = texts
            .iter()
            .enumerate()
            .map(|(i, text)| context_chunk(&format!("{i:016x}"), text))
            .collect();
        let vectors: Vec<Vec<f32>> = texts.iter().map(|text| embedder.encode(text)).collect();
        let index = FlatIpIndex::from_vectors(&vectors).unwrap();
        let meta = IndexMeta {
            embedding_model: embedder.model.clone(),
        };
        save_index(dir, name, &index, &chunks, &meta).unwrap();
    }

    #[test]
    fn retrieves_in_descending_score_order() {
        let dir = tempfile::tempdir().unwrap();
        let embedder = StubEmbedder::new("stub-embedding-v1");
        build_corpus(
            dir.path(),
            "centerpoint_context",
            &embedder,
            &[
                "rebate rebate rebate for attic insulation",
                "annual report of verified savings",
                "rebate and goal details",
            ],
        );
        let index = VectorIndex::open(
            dir.path(),
            "centerpoint_context",
            Arc::new(StubEmbedder::new("stub-embedding-v1")),
        )
        .unwrap();

        let hits = index.retrieve("how do I get a rebate", 2).unwrap();
        assert_eq!(hits.len(), 2);
        assert!(hits[0].score >= hits[1].score);
        assert!(hits[0].chunk.text.starts_with("rebate rebate"));

        assert!(index.retrieve("anything", 0).unwrap().is_empty());
        assert_eq!(index.retrieve("rebate", 10).unwrap().len(), 3);
    }

    #[test]
    fn open_rejects_model_mismatch() {
        let dir = tempfile::tempdir().unwrap();
        let embedder = StubEmbedder::new("stub-embedding-v1");
        build_corpus(dir.path(), "puct_rules", &embedder, &["goal text"]);

        let err = VectorIndex::open(
            dir.path(),
            "puct_rules",
            Arc::new(StubEmbedder::new("stub-embedding-v2")),
        )
        .unwrap_err();
        assert!(err.to_string().contains("embedding model"));
    }

    #[test]
    fn empty_corpus_retrieves_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let embedder = StubEmbedder::new("stub-embedding-v1");
        build_corpus(dir.path(), "puct_rules", &embedder, &[]);
        let index = VectorIndex::open(
            dir.path(),
            "puct_rules",
            Arc::new(StubEmbedder::new("stub-embedding-v1")),
        )
        .unwrap();
        assert!(index.retrieve("any question at all", 6).unwrap().is_empty());
    }
}
