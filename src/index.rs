//! Flat exhaustive inner-product index over L2-normalized vectors.

use std::fmt;
use std::io::{self, Read, Write};

/// On-disk magic tag for the binary index format.
const MAGIC: [u8; 4] = *b"EEFI";
/// Current binary format version.
const FORMAT_VERSION: u32 = 1;

/// Errors surfaced by index construction, search, and (de)serialization.
#[derive(Debug)]
pub enum IndexError {
    /// Vectors must have at least one dimension.
    ZeroDimension,
    /// A vector's dimension disagreed with the index dimension.
    DimensionMismatch {
        /// Dimension the index was built with.
        expected: usize,
        /// Dimension of the offending vector.
        actual: usize,
    },
    /// The artifact did not start with the expected magic tag.
    BadMagic,
    /// The artifact was written by an unknown format version.
    UnsupportedVersion(u32),
    /// The artifact's header and payload disagree.
    Corrupt(String),
    /// The chunk array and the vector count disagree.
    Misaligned {
        /// Number of vectors in the index.
        vectors: usize,
        /// Number of chunk records alongside it.
        chunks: usize,
    },
    /// The recorded embedding model differs from the configured one.
    ModelMismatch {
        /// Model identifier recorded at build time.
        recorded: String,
        /// Model identifier configured at query time.
        configured: String,
    },
    /// Underlying IO failure.
    Io(io::Error),
}

impl fmt::Display for IndexError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ZeroDimension => write!(f, "vector dimension must be at least 1"),
            Self::DimensionMismatch { expected, actual } => {
                write!(f, "expected {expected}-dimensional vector, got {actual}")
            }
            Self::BadMagic => write!(f, "not a flat index artifact (bad magic)"),
            Self::UnsupportedVersion(version) => {
                write!(f, "unsupported index format version {version}")
            }
            Self::Corrupt(detail) => write!(f, "corrupt index artifact: {detail}"),
            Self::Misaligned { vectors, chunks } => write!(
                f,
                "index holds {vectors} vectors but {chunks} chunk records"
            ),
            Self::ModelMismatch {
                recorded,
                configured,
            } => write!(
                f,
                "index was built with embedding model {recorded:?} but {configured:?} is configured"
            ),
            Self::Io(err) => write!(f, "index io error: {err}"),
        }
    }
}

impl std::error::Error for IndexError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl From<io::Error> for IndexError {
    fn from(err: io::Error) -> Self {
        Self::Io(err)
    }
}

/// Exhaustive inner-product nearest-neighbor structure.
///
/// Every stored vector is L2-normalized on insertion, so inner product
/// equals cosine similarity. No approximation, no update or delete path.
#[derive(Debug, Clone)]
pub struct FlatIpIndex {
    dim: usize,
    data: Vec<f32>,
}

impl FlatIpIndex {
    /// Creates an index for vectors of the given dimension.
    pub fn new(dim: usize) -> Result<Self, IndexError> {
        if dim == 0 {
            return Err(IndexError::ZeroDimension);
        }
        Ok(Self {
            dim,
            data: Vec::new(),
        })
    }

    /// Creates an index over an empty corpus.
    pub fn empty() -> Self {
        Self {
            dim: 0,
            data: Vec::new(),
        }
    }

    /// Builds an index over the given vectors, normalizing each.
    pub fn from_vectors(vectors: &[Vec<f32>]) -> Result<Self, IndexError> {
        let Some(first) = vectors.first() else {
            return Ok(Self::empty());
        };
        let mut index = Self::new(first.len())?;
        for vector in vectors {
            index.add(vector)?;
        }
        Ok(index)
    }

    /// Vector dimension (0 for an empty-corpus index).
    pub fn dim(&self) -> usize {
        self.dim
    }

    /// Number of indexed vectors.
    pub fn len(&self) -> usize {
        if self.dim == 0 {
            0
        } else {
            self.data.len() / self.dim
        }
    }

    /// True when no vectors are indexed.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Appends one vector, L2-normalized.
    pub fn add(&mut self, vector: &[f32]) -> Result<(), IndexError> {
        if self.dim == 0 {
            return Err(IndexError::ZeroDimension);
        }
        if vector.len() != self.dim {
            return Err(IndexError::DimensionMismatch {
                expected: self.dim,
                actual: vector.len(),
            });
        }
        let start = self.data.len();
        self.data.extend_from_slice(vector);
        l2_normalize(&mut self.data[start..]);
        Ok(())
    }

    /// Borrows the stored (normalized) vector at the given position.
    pub fn vector(&self, position: usize) -> &[f32] {
        let start = position * self.dim;
        &self.data[start..start + self.dim]
    }

    /// Exact top-k search by inner product against all indexed vectors.
    ///
    /// The query is L2-normalized before scoring, matching build time.
    /// Results are (position, score) pairs in non-increasing score order,
    /// at most `k` of them.
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<(usize, f32)>, IndexError> {
        if k == 0 || self.is_empty() {
            return Ok(Vec::new());
        }
        if query.len() != self.dim {
            return Err(IndexError::DimensionMismatch {
                expected: self.dim,
                actual: query.len(),
            });
        }
        let mut normalized = query.to_vec();
        l2_normalize(&mut normalized);

        let mut scored: Vec<(usize, f32)> = (0..self.len())
            .map(|position| {
                let stored = self.vector(position);
                let score = stored
                    .iter()
                    .zip(normalized.iter())
                    .map(|(a, b)| a * b)
                    .sum();
                (position, score)
            })
            .collect();
        scored.sort_unstable_by(|a, b| {
            b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal)
        });
        scored.truncate(k);
        Ok(scored)
    }

    /// Serializes the index into the binary artifact format.
    pub fn write_to<W: Write>(&self, mut writer: W) -> Result<(), IndexError> {
        writer.write_all(&MAGIC)?;
        writer.write_all(&FORMAT_VERSION.to_le_bytes())?;
        writer.write_all(&(self.dim as u32).to_le_bytes())?;
        writer.write_all(&(self.len() as u32).to_le_bytes())?;
        for value in &self.data {
            writer.write_all(&value.to_le_bytes())?;
        }
        Ok(())
    }

    /// Deserializes an index from the binary artifact format.
    pub fn read_from<R: Read>(mut reader: R) -> Result<Self, IndexError> {
        let mut magic = [0u8; 4];
        reader.read_exact(&mut magic)?;
        if magic != MAGIC {
            return Err(IndexError::BadMagic);
        }
        let version = read_u32(&mut reader)?;
        if version != FORMAT_VERSION {
            return Err(IndexError::UnsupportedVersion(version));
        }
        let dim = read_u32(&mut reader)? as usize;
        let count = read_u32(&mut reader)? as usize;
        if dim == 0 && count > 0 {
            return Err(IndexError::Corrupt(format!(
                "{count} vectors recorded with zero dimension"
            )));
        }
        let values = count
            .checked_mul(dim)
            .ok_or_else(|| IndexError::Corrupt("vector payload overflows".to_string()))?;
        let mut payload = vec![0u8; values * 4];
        reader.read_exact(&mut payload)?;
        let data = payload
            .chunks_exact(4)
            .map(|bytes| f32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
            .collect();
        Ok(Self { dim, data })
    }
}

/// Scales a vector to unit L2 norm in place; zero vectors are left as-is.
pub fn l2_normalize(vector: &mut [f32]) {
    let norm = vector.iter().map(|value| value * value).sum::<f32>().sqrt();
    if norm > 0.0 {
        for value in vector.iter_mut() {
            *value /= norm;
        }
    }
}

fn read_u32<R: Read>(reader: &mut R) -> Result<u32, IndexError> {
    let mut bytes = [0u8; 4];
    reader.read_exact(&mut bytes)?;
    Ok(u32::from_le_bytes(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_index() -> FlatIpIndex {
        FlatIpIndex::from_vectors(&[
            vec![1.0, 0.0, 0.0],
            vec![0.0, 2.0, 0.0],
            vec![3.0, 3.0, 0.0],
        ])
        .unwrap()
    }

    #[test]
    fn stored_vectors_are_unit_norm() {
        let index = sample_index();
        for position in 0..index.len() {
            let norm: f32 = index
                .vector(position)
                .iter()
                .map(|value| value * value)
                .sum::<f32>()
                .sqrt();
            assert!((norm - 1.0).abs() < 1e-6);
        }
    }

    #[test]
    fn search_orders_by_descending_score() {
        let index = sample_index();
        let hits = index.search(&[1.0, 0.2, 0.0], 3).unwrap();
        assert_eq!(hits.len(), 3);
        for pair in hits.windows(2) {
            assert!(pair[0].1 >= pair[1].1);
        }
        assert_eq!(hits[0].0, 0);
    }

    #[test]
    fn search_respects_k_bound() {
        let index = sample_index();
        assert_eq!(index.search(&[1.0, 0.0, 0.0], 0).unwrap().len(), 0);
        assert_eq!(index.search(&[1.0, 0.0, 0.0], 2).unwrap().len(), 2);
        // Fewer vectors than requested is not an error.
        assert_eq!(index.search(&[1.0, 0.0, 0.0], 10).unwrap().len(), 3);
    }

    #[test]
    fn empty_index_returns_no_hits() {
        let index = FlatIpIndex::empty();
        assert_eq!(index.len(), 0);
        assert!(index.search(&[0.5, 0.5], 5).unwrap().is_empty());
    }

    #[test]
    fn add_rejects_mismatched_dimension() {
        let mut index = FlatIpIndex::new(3).unwrap();
        let err = index.add(&[1.0, 0.0]).unwrap_err();
        assert!(matches!(
            err,
            IndexError::DimensionMismatch {
                expected: 3,
                actual: 2
            }
        ));
    }

    #[test]
    fn binary_round_trip_preserves_contents() {
        let index = sample_index();
        let mut bytes = Vec::new();
        index.write_to(&mut bytes).unwrap();
        let back = FlatIpIndex::read_from(bytes.as_slice()).unwrap();
        assert_eq!(back.dim(), index.dim());
        assert_eq!(back.len(), index.len());
        for position in 0..index.len() {
            assert_eq!(back.vector(position), index.vector(position));
        }

        let empty = FlatIpIndex::empty();
        let mut bytes = Vec::new();
        empty.write_to(&mut bytes).unwrap();
        let back = FlatIpIndex::read_from(bytes.as_slice()).unwrap();
        assert!(back.is_empty());
    }

    #[test]
    fn read_rejects_foreign_bytes() {
        let err = FlatIpIndex::read_from(&b"NOPE\x00\x00\x00\x00"[..]).unwrap_err();
        assert!(matches!(err, IndexError::BadMagic));
    }
}
