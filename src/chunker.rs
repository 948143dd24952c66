//! Budgeted text chunking over extracted rule PDFs and program pages.

use regex::Regex;
use serde::ser::{SerializeStruct, Serializer};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::extract::PageText;
use crate::sources::{ContextSource, RuleSource};

/// Wire value for regulatory chunks.
const SOURCE_TYPE_RULE: &str = "regulatory_rule";
/// Wire value for program-context chunks.
const SOURCE_TYPE_CONTEXT: &str = "program_context";

/// Number of leading characters folded into the chunk identifier digest.
const ID_PREFIX_CHARS: usize = 200;

/// Inclusive page range covered by a PDF-derived chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageSpan {
    /// First contributing page.
    pub start: u32,
    /// Last contributing page.
    pub end: u32,
}

/// Variant-specific provenance carried by a chunk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChunkKind {
    /// Authoritative rule text, cited by section number.
    Regulatory {
        /// Rule section number (e.g. `25.181`).
        rule_id: String,
        /// Page range in the source PDF, when known.
        pages: Option<PageSpan>,
    },
    /// Non-regulatory program context.
    Context,
}

/// The unit of indexing and retrieval.
#[derive(Debug, Clone, PartialEq)]
pub struct Chunk {
    /// Digest-derived identifier, stable across rebuilds of unchanged content.
    pub chunk_id: String,
    /// Source document identifier.
    pub doc_id: String,
    /// Human-facing document title.
    pub title: String,
    /// Where the source document is published.
    pub source_url: String,
    /// Contiguous chunk text; never empty.
    pub text: String,
    /// Regulatory or program-context provenance.
    pub kind: ChunkKind,
}

impl Chunk {
    /// Wire discriminant for this chunk's variant.
    pub fn source_type(&self) -> &'static str {
        match self.kind {
            ChunkKind::Regulatory { .. } => SOURCE_TYPE_RULE,
            ChunkKind::Context => SOURCE_TYPE_CONTEXT,
        }
    }

    /// Rule section number for regulatory chunks.
    pub fn rule_id(&self) -> Option<&str> {
        match &self.kind {
            ChunkKind::Regulatory { rule_id, .. } => Some(rule_id),
            ChunkKind::Context => None,
        }
    }

    /// Source page range for PDF-derived chunks.
    pub fn pages(&self) -> Option<PageSpan> {
        match &self.kind {
            ChunkKind::Regulatory { pages, .. } => *pages,
            ChunkKind::Context => None,
        }
    }

    /// True for chunks carrying regulatory authority.
    pub fn is_regulatory(&self) -> bool {
        matches!(self.kind, ChunkKind::Regulatory { .. })
    }
}

impl Serialize for Chunk {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut state = serializer.serialize_struct("Chunk", 9)?;
        state.serialize_field("chunk_id", &self.chunk_id)?;
        state.serialize_field("doc_id", &self.doc_id)?;
        state.serialize_field("source_type", self.source_type())?;
        state.serialize_field("rule_id", &self.rule_id())?;
        state.serialize_field("title", &self.title)?;
        state.serialize_field("source_url", &self.source_url)?;
        let (page_start, page_end) = match self.pages() {
            Some(span) => (Some(span.start), Some(span.end)),
            None => (None, None),
        };
        state.serialize_field("page_start", &page_start)?;
        state.serialize_field("page_end", &page_end)?;
        state.serialize_field("text", &self.text)?;
        state.end()
    }
}

/// Flat wire shape; validated into [`Chunk`] on deserialization.
#[derive(Deserialize)]
struct RawChunk {
    chunk_id: String,
    doc_id: String,
    source_type: String,
    #[serde(default)]
    rule_id: Option<String>,
    title: String,
    source_url: String,
    #[serde(default)]
    page_start: Option<u32>,
    #[serde(default)]
    page_end: Option<u32>,
    text: String,
}

impl<'de> Deserialize<'de> for Chunk {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let raw = RawChunk::deserialize(deserializer)?;
        Chunk::from_raw(raw).map_err(serde::de::Error::custom)
    }
}

impl Chunk {
    fn from_raw(raw: RawChunk) -> Result<Self, String> {
        if raw.text.trim().is_empty() {
            return Err(format!("chunk {} has empty text", raw.chunk_id));
        }
        let pages = match (raw.page_start, raw.page_end) {
            (Some(start), Some(end)) => {
                if start > end {
                    return Err(format!(
                        "chunk {} has inverted page span {}-{}",
                        raw.chunk_id, start, end
                    ));
                }
                Some(PageSpan { start, end })
            }
            (None, None) => None,
            _ => {
                return Err(format!(
                    "chunk {} has a partial page span",
                    raw.chunk_id
                ))
            }
        };
        let kind = match (raw.source_type.as_str(), raw.rule_id) {
            (SOURCE_TYPE_RULE, Some(rule_id)) => ChunkKind::Regulatory { rule_id, pages },
            (SOURCE_TYPE_RULE, None) => {
                return Err(format!(
                    "regulatory chunk {} is missing a rule_id",
                    raw.chunk_id
                ))
            }
            (SOURCE_TYPE_CONTEXT, None) => {
                if pages.is_some() {
                    return Err(format!(
                        "program-context chunk {} carries a page span",
                        raw.chunk_id
                    ));
                }
                ChunkKind::Context
            }
            (SOURCE_TYPE_CONTEXT, Some(_)) => {
                return Err(format!(
                    "program-context chunk {} carries a rule_id",
                    raw.chunk_id
                ))
            }
            (other, _) => {
                return Err(format!(
                    "chunk {} has unknown source_type {:?}",
                    raw.chunk_id, other
                ))
            }
        };
        Ok(Self {
            chunk_id: raw.chunk_id,
            doc_id: raw.doc_id,
            title: raw.title,
            source_url: raw.source_url,
            text: raw.text,
            kind,
        })
    }
}

/// Chunking tuning knobs.
#[derive(Debug, Clone, Copy)]
pub struct ChunkerConfig {
    /// Character budget per chunk.
    pub max_chars: usize,
    /// Shared tail/head region between slices of an over-budget segment.
    pub overlap_chars: usize,
}

impl Default for ChunkerConfig {
    fn default() -> Self {
        Self {
            max_chars: 2400,
            overlap_chars: 250,
        }
    }
}

/// Stateless chunking service with precompiled segmentation patterns.
#[derive(Clone)]
pub struct Chunker {
    config: ChunkerConfig,
    section_re: Regex,
    paragraph_re: Regex,
}

impl Chunker {
    /// Builds a new chunker instance.
    pub fn new(config: ChunkerConfig) -> Self {
        Self {
            config,
            // Lettered-paragraph openings like "(a) " at line starts.
            section_re: Regex::new(r"(?m)^\(\w+\)\s+").expect("section pattern"),
            paragraph_re: Regex::new(r"\n\s*\n").expect("paragraph pattern"),
        }
    }

    /// Returns the underlying config reference.
    pub fn config(&self) -> &ChunkerConfig {
        &self.config
    }

    /// Chunks a rule PDF's page texts, pre-split on lettered-paragraph openings.
    pub fn chunk_rule_pages(&self, source: &RuleSource, pages: &[PageText]) -> Vec<Chunk> {
        let mut acc = Accumulator::new(
            Provenance {
                doc_id: source.doc_id,
                title: source.title,
                source_url: source.url,
                rule_id: Some(source.rule_id),
            },
            &self.config,
        );
        for page in pages {
            for segment in self.split_sections(&page.text) {
                acc.push_segment(segment, Some(page.number));
            }
        }
        acc.finish()
    }

    /// Chunks a program page's extracted text, split on blank lines.
    pub fn chunk_context_page(&self, source: &ContextSource, text: &str) -> Vec<Chunk> {
        let mut acc = Accumulator::new(
            Provenance {
                doc_id: source.doc_id,
                title: source.title,
                source_url: source.url,
                rule_id: None,
            },
            &self.config,
        );
        for part in self.paragraph_re.split(text) {
            let part = part.trim();
            if part.is_empty() {
                continue;
            }
            acc.push_segment(part, None);
        }
        acc.finish()
    }

    fn split_sections<'t>(&self, text: &'t str) -> Vec<&'t str> {
        let starts: Vec<usize> = self.section_re.find_iter(text).map(|m| m.start()).collect();
        if starts.is_empty() {
            let trimmed = text.trim();
            return if trimmed.is_empty() {
                Vec::new()
            } else {
                vec![trimmed]
            };
        }
        let mut bounds = starts;
        bounds.push(text.len());
        bounds
            .windows(2)
            .map(|pair| text[pair[0]..pair[1]].trim())
            .filter(|segment| !segment.is_empty())
            .collect()
    }
}

struct Provenance<'a> {
    doc_id: &'a str,
    title: &'a str,
    source_url: &'a str,
    rule_id: Option<&'a str>,
}

/// Greedy segment accumulator flushing budget-bounded chunks.
struct Accumulator<'a> {
    provenance: Provenance<'a>,
    max_chars: usize,
    overlap_chars: usize,
    buf: String,
    buf_chars: usize,
    buf_pages: Vec<u32>,
    chunks: Vec<Chunk>,
}

impl<'a> Accumulator<'a> {
    fn new(provenance: Provenance<'a>, config: &ChunkerConfig) -> Self {
        let max_chars = config.max_chars.max(1);
        Self {
            provenance,
            max_chars,
            // The window must advance by at least one character per slice.
            overlap_chars: config.overlap_chars.min(max_chars.saturating_sub(1)),
            buf: String::new(),
            buf_chars: 0,
            buf_pages: Vec::new(),
            chunks: Vec::new(),
        }
    }

    fn push_segment(&mut self, segment: &str, page: Option<u32>) {
        let segment_chars = segment.chars().count();
        if self.buf_chars + segment_chars + 2 <= self.max_chars {
            self.append(segment, segment_chars, page);
            return;
        }
        self.flush();
        if segment_chars > self.max_chars {
            self.slice_oversize(segment, segment_chars, page);
        } else {
            self.append(segment, segment_chars, page);
        }
    }

    fn append(&mut self, segment: &str, segment_chars: usize, page: Option<u32>) {
        if !self.buf.is_empty() {
            self.buf.push_str("\n\n");
            self.buf_chars += 2;
        }
        self.buf.push_str(segment);
        self.buf_chars += segment_chars;
        if let Some(number) = page {
            self.buf_pages.push(number);
        }
    }

    /// Splits a segment that alone exceeds the budget into overlapping
    /// budget-sized windows, each emitted as its own chunk.
    fn slice_oversize(&mut self, segment: &str, segment_chars: usize, page: Option<u32>) {
        let offsets: Vec<usize> = segment
            .char_indices()
            .map(|(offset, _)| offset)
            .chain(std::iter::once(segment.len()))
            .collect();
        let mut start = 0usize;
        loop {
            let end = (start + self.max_chars).min(segment_chars);
            let piece = segment[offsets[start]..offsets[end]].trim();
            if !piece.is_empty() {
                self.emit(piece.to_string(), page.map(|number| (number, number)));
            }
            if end == segment_chars {
                break;
            }
            start = end - self.overlap_chars;
        }
    }

    fn flush(&mut self) {
        let text = self.buf.trim().to_string();
        let pages = page_span(&self.buf_pages);
        self.buf.clear();
        self.buf_chars = 0;
        self.buf_pages.clear();
        if text.is_empty() {
            return;
        }
        self.emit(text, pages);
    }

    fn emit(&mut self, text: String, pages: Option<(u32, u32)>) {
        let prefix: String = text.chars().take(ID_PREFIX_CHARS).collect();
        let chunk_id = match pages {
            Some((start, _)) => chunk_digest(&[self.provenance.doc_id, &start.to_string(), &prefix]),
            None => chunk_digest(&[self.provenance.doc_id, &prefix]),
        };
        let kind = match self.provenance.rule_id {
            Some(rule_id) => ChunkKind::Regulatory {
                rule_id: rule_id.to_string(),
                pages: pages.map(|(start, end)| PageSpan { start, end }),
            },
            None => ChunkKind::Context,
        };
        self.chunks.push(Chunk {
            chunk_id,
            doc_id: self.provenance.doc_id.to_string(),
            title: self.provenance.title.to_string(),
            source_url: self.provenance.source_url.to_string(),
            text,
            kind,
        });
    }

    fn finish(mut self) -> Vec<Chunk> {
        self.flush();
        self.chunks
    }
}

fn page_span(pages: &[u32]) -> Option<(u32, u32)> {
    let start = pages.iter().copied().min()?;
    let end = pages.iter().copied().max()?;
    Some((start, end))
}

/// Order-sensitive digest over identity parts, truncated to 16 hex characters.
fn chunk_digest(parts: &[&str]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(parts.join("|").as_bytes());
    let digest = hasher.finalize();
    digest[..8].iter().map(|byte| format!("{byte:02x}")).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rule_source() -> RuleSource {
        RuleSource {
            doc_id: "puct_25_181",
            rule_id: "25.181",
            title: "Energy Efficiency Goal",
            url: "https://example.com/25.181.pdf",
        }
    }

    fn context_source() -> ContextSource {
        ContextSource {
            doc_id: "cp_res_ee",
            title: "Residential Programs",
            url: "https://example.com/residential",
        }
    }

    fn page(number: u32, text: &str) -> PageText {
        PageText {
            number,
            text: text.to_string(),
        }
    }

    #[test]
    fn empty_input_yields_no_chunks() {
        let chunker = Chunker::new(ChunkerConfig::default());
        assert!(chunker.chunk_rule_pages(&rule_source(), &[]).is_empty());
        assert!(chunker
            .chunk_rule_pages(&rule_source(), &[page(1, "   \n  ")])
            .is_empty());
        assert!(chunker.chunk_context_page(&context_source(), "").is_empty());
    }

    #[test]
    fn respects_chunk_budget() {
        let chunker = Chunker::new(ChunkerConfig {
            max_chars: 80,
            overlap_chars: 10,
        });
        let paragraphs: Vec<String> = (0..12)
            .map(|i| format!("Paragraph number {i} with a little bit of body text."))
            .collect();
        let text = paragraphs.join("\n\n");
        let chunks = chunker.chunk_context_page(&context_source(), &text);
        assert!(chunks.len() > 1);
        for chunk in &chunks {
            assert!(chunk.text.chars().count() <= 80);
            assert!(!chunk.text.trim().is_empty());
        }
    }

    #[test]
    fn separator_counts_against_budget() {
        let chunker = Chunker::new(ChunkerConfig {
            max_chars: 2400,
            overlap_chars: 250,
        });
        let first = "a".repeat(1199);
        let second = "b".repeat(1199);
        let text = format!("{first}\n\n{second}");
        let chunks = chunker.chunk_context_page(&context_source(), &text);
        // 1199 + 1199 + 2 lands exactly on the budget, so both paragraphs
        // share one chunk.
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].text.chars().count(), 2400);
    }

    #[test]
    fn oversize_segment_slices_with_overlap() {
        let chunker = Chunker::new(ChunkerConfig::default());
        let segment: String = "abcdefghij".repeat(500);
        assert_eq!(segment.chars().count(), 5000);
        let chunks = chunker.chunk_context_page(&context_source(), &segment);

        assert_eq!(chunks.len(), 3);
        let lengths: Vec<usize> = chunks.iter().map(|c| c.text.chars().count()).collect();
        assert_eq!(lengths, vec![2400, 2400, 700]);

        for pair in chunks.windows(2) {
            let tail: String = pair[0]
                .text
                .chars()
                .skip(pair[0].text.chars().count() - 250)
                .collect();
            let head: String = pair[1].text.chars().take(250).collect();
            assert_eq!(tail, head);
        }
    }

    #[test]
    fn rule_pages_presplit_on_lettered_sections() {
        let chunker = Chunker::new(ChunkerConfig {
            max_chars: 200,
            overlap_chars: 20,
        });
        let body = "(a) Utilities shall administer portfolios of programs.\n\
                    (b) Savings are verified annually by an independent evaluator.";
        let chunks = chunker.chunk_rule_pages(&rule_source(), &[page(4, body)]);
        assert!(!chunks.is_empty());
        assert!(chunks[0].text.starts_with("(a)"));
        assert_eq!(chunks[0].rule_id(), Some("25.181"));
        assert_eq!(
            chunks[0].pages(),
            Some(PageSpan { start: 4, end: 4 })
        );
    }

    #[test]
    fn page_span_covers_contributing_pages() {
        let chunker = Chunker::new(ChunkerConfig::default());
        let pages = [
            page(2, "Short opening text without any markers."),
            page(3, "Continuation text on the following page."),
        ];
        let chunks = chunker.chunk_rule_pages(&rule_source(), &pages);
        assert_eq!(chunks.len(), 1);
        assert_eq!(
            chunks[0].pages(),
            Some(PageSpan { start: 2, end: 3 })
        );
    }

    #[test]
    fn chunk_ids_are_deterministic_and_distinct() {
        let chunker = Chunker::new(ChunkerConfig::default());
        let text = "First paragraph of program detail.\n\nSecond paragraph, different words.";
        let first = chunker.chunk_context_page(&context_source(), text);
        let second = chunker.chunk_context_page(&context_source(), text);
        assert_eq!(first[0].chunk_id, second[0].chunk_id);
        assert_eq!(first[0].chunk_id.len(), 16);

        let other = chunker.chunk_context_page(&context_source(), "Entirely different body text.");
        assert_ne!(first[0].chunk_id, other[0].chunk_id);
    }

    #[test]
    fn wire_shape_round_trips() {
        let chunker = Chunker::new(ChunkerConfig::default());
        let chunks = chunker.chunk_rule_pages(
            &rule_source(),
            &[page(4, "(a) The goal applies to each utility.")],
        );
        let json = serde_json::to_string(&chunks[0]).unwrap();
        assert!(json.contains("\"source_type\":\"regulatory_rule\""));
        assert!(json.contains("\"rule_id\":\"25.181\""));
        let back: Chunk = serde_json::from_str(&json).unwrap();
        assert_eq!(back, chunks[0]);
    }

    #[test]
    fn deserialization_rejects_mismatched_discriminants() {
        let mismatched = r#"{
            "chunk_id": "deadbeefdeadbeef", "doc_id": "cp_res_ee",
            "source_type": "program_context", "rule_id": "25.181",
            "title": "t", "source_url": "u",
            "page_start": null, "page_end": null, "text": "body"
        }"#;
        assert!(serde_json::from_str::<Chunk>(mismatched).is_err());

        let empty_text = r#"{
            "chunk_id": "deadbeefdeadbeef", "doc_id": "cp_res_ee",
            "source_type": "program_context", "rule_id": null,
            "title": "t", "source_url": "u",
            "page_start": null, "page_end": null, "text": "   "
        }"#;
        assert!(serde_json::from_str::<Chunk>(empty_text).is_err());

        let partial_span = r#"{
            "chunk_id": "deadbeefdeadbeef", "doc_id": "puct_25_181",
            "source_type": "regulatory_rule", "rule_id": "25.181",
            "title": "t", "source_url": "u",
            "page_start": 2, "page_end": null, "text": "body"
        }"#;
        assert!(serde_json::from_str::<Chunk>(partial_span).is_err());
    }
}
