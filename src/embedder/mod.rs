//! Batch sentence-embedding clients.

use anyhow::{anyhow, Result};

pub mod openai;

pub use openai::OpenAiEmbedder;

/// Batch text-to-vector encoder backed by one named pretrained model.
///
/// The same implementation must be used at index-build time and query time;
/// the model identifier is recorded in the index artifact metadata and
/// checked when the index is opened.
pub trait TextEmbedder: Send + Sync {
    /// Identifier of the underlying embedding model.
    fn model(&self) -> &str;

    /// Encodes an ordered batch of strings into ordered fixed-dimension
    /// vectors, one per input.
    fn embed_batch(&self, inputs: &[&str]) -> Result<Vec<Vec<f32>>>;

    /// Encodes a single string (used for queries).
    fn embed_one(&self, input: &str) -> Result<Vec<f32>> {
        let mut vectors = self.embed_batch(&[input])?;
        vectors
            .pop()
            .ok_or_else(|| anyhow!("embedder returned no vector for a single input"))
    }
}
