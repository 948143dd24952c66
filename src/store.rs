//! Persistence for the index artifact triple shared under one logical name.

use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::chunker::Chunk;
use crate::index::{FlatIpIndex, IndexError};

/// Build metadata persisted alongside the vectors.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexMeta {
    /// Identifier of the embedding model that produced the vectors.
    pub embedding_model: String,
}

/// The three co-located files that constitute one queryable corpus.
#[derive(Debug, Clone)]
pub struct ArtifactPaths {
    /// Binary flat index.
    pub index: PathBuf,
    /// Positionally aligned chunk records.
    pub chunks: PathBuf,
    /// Build metadata.
    pub meta: PathBuf,
}

/// Resolves the artifact triple for a named index inside a directory.
pub fn artifact_paths(dir: &Path, name: &str) -> ArtifactPaths {
    ArtifactPaths {
        index: dir.join(format!("{name}.faiss")),
        chunks: dir.join(format!("{name}_chunks.json")),
        meta: dir.join(format!("{name}_meta.json")),
    }
}

/// Persists an index artifact triple.
///
/// Each file is written to a temporary sibling and renamed into place, so a
/// crashed build never leaves a partially written artifact under the final
/// name. The chunk array must align with the index positions.
pub fn save_index(
    dir: &Path,
    name: &str,
    index: &FlatIpIndex,
    chunks: &[Chunk],
    meta: &IndexMeta,
) -> Result<()> {
    if index.len() != chunks.len() {
        return Err(IndexError::Misaligned {
            vectors: index.len(),
            chunks: chunks.len(),
        }
        .into());
    }
    fs::create_dir_all(dir)
        .with_context(|| format!("failed to create index directory {dir:?}"))?;
    let paths = artifact_paths(dir, name);

    write_via_temp(&paths.index, |file| {
        let mut writer = BufWriter::new(file);
        index
            .write_to(&mut writer)
            .context("failed to serialize flat index")?;
        writer.flush().context("failed to flush flat index")
    })?;
    write_via_temp(&paths.chunks, |file| {
        let mut writer = BufWriter::new(file);
        serde_json::to_writer_pretty(&mut writer, chunks)
            .context("failed to serialize chunk records")?;
        writer.flush().context("failed to flush chunk records")
    })?;
    write_via_temp(&paths.meta, |file| {
        let mut writer = BufWriter::new(file);
        serde_json::to_writer_pretty(&mut writer, meta)
            .context("failed to serialize index metadata")?;
        writer.flush().context("failed to flush index metadata")
    })?;
    Ok(())
}

/// Loads an index artifact triple, validating positional alignment.
pub fn load_index(dir: &Path, name: &str) -> Result<(FlatIpIndex, Vec<Chunk>, IndexMeta)> {
    let paths = artifact_paths(dir, name);

    let file =
        File::open(&paths.index).with_context(|| format!("failed to open {:?}", paths.index))?;
    let index = FlatIpIndex::read_from(BufReader::new(file))
        .with_context(|| format!("failed to read flat index {:?}", paths.index))?;

    let file =
        File::open(&paths.chunks).with_context(|| format!("failed to open {:?}", paths.chunks))?;
    let chunks: Vec<Chunk> = serde_json::from_reader(BufReader::new(file))
        .with_context(|| format!("failed to parse chunk records {:?}", paths.chunks))?;

    let file =
        File::open(&paths.meta).with_context(|| format!("failed to open {:?}", paths.meta))?;
    let meta: IndexMeta = serde_json::from_reader(BufReader::new(file))
        .with_context(|| format!("failed to parse index metadata {:?}", paths.meta))?;

    if index.len() != chunks.len() {
        return Err(IndexError::Misaligned {
            vectors: index.len(),
            chunks: chunks.len(),
        }
        .into());
    }
    Ok((index, chunks, meta))
}

fn write_via_temp<F>(path: &Path, write: F) -> Result<()>
where
    F: FnOnce(File) -> Result<()>,
{
    let tmp = path.with_extension("tmp");
    let file = File::create(&tmp).with_context(|| format!("failed to create {tmp:?}"))?;
    write(file)?;
    fs::rename(&tmp, path)
        .with_context(|| format!("failed to move {tmp:?} into place at {path:?}"))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunker::{ChunkKind, PageSpan};

    fn rule_chunk(chunk_id: &str, text: &str) -> Chunk {
        Chunk {
            chunk_id: chunk_id.to_string(),
            doc_id: "puct_25_181".to_string(),
            title: "Energy Efficiency Goal".to_string(),
            source_url: "https://example.com/25.181.pdf".to_string(),
            text: text.to_string(),
            kind: ChunkKind::Regulatory {
                rule_id: "25.181".to_string(),
                pages: Some(PageSpan { start: 1, end: 2 }),
            },
        }
    }

    #[test]
    fn triple_round_trips_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let index = FlatIpIndex::from_vectors(&[vec![1.0, 0.0], vec![0.0, 1.0]]).unwrap();
        let chunks = vec![
            rule_chunk("aaaaaaaaaaaaaaaa", "first chunk"),
            rule_chunk("bbbbbbbbbbbbbbbb", "second chunk"),
        ];
        let meta = IndexMeta {
            embedding_model: "text-embedding-3-small".to_string(),
        };
        save_index(dir.path(), "puct_rules", &index, &chunks, &meta).unwrap();

        let (back_index, back_chunks, back_meta) = load_index(dir.path(), "puct_rules").unwrap();
        assert_eq!(back_index.len(), 2);
        assert_eq!(back_chunks, chunks);
        assert_eq!(back_meta, meta);

        // No temp leftovers once the rename completed.
        let leftovers: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.path().extension().is_some_and(|ext| ext == "tmp"))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[test]
    fn save_rejects_misaligned_chunks() {
        let dir = tempfile::tempdir().unwrap();
        let index = FlatIpIndex::from_vectors(&[vec![1.0, 0.0]]).unwrap();
        let meta = IndexMeta {
            embedding_model: "text-embedding-3-small".to_string(),
        };
        let err = save_index(dir.path(), "puct_rules", &index, &[], &meta).unwrap_err();
        assert!(err.to_string().contains("1 vectors"));
    }

    #[test]
    fn empty_corpus_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let meta = IndexMeta {
            embedding_model: "text-embedding-3-small".to_string(),
        };
        save_index(dir.path(), "centerpoint_context", &FlatIpIndex::empty(), &[], &meta).unwrap();
        let (index, chunks, _) = load_index(dir.path(), "centerpoint_context").unwrap();
        assert!(index.is_empty());
        assert!(chunks.is_empty());
    }
}
