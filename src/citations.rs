//! Human-readable citation rendering for retrieved chunks.

use std::collections::HashSet;

use crate::chunker::Chunk;
use crate::retriever::ScoredChunk;

/// Renders one citation line per retrieved chunk under the given label,
/// dropping later duplicates while preserving first-occurrence order.
///
/// Rule-backed chunks cite the section number and page range; context
/// chunks cite the page title only. Empty input yields an empty string.
pub fn format_citations(chunks: &[ScoredChunk], label: &str) -> String {
    let mut seen = HashSet::new();
    let mut lines = Vec::new();
    for scored in chunks {
        let line = citation_line(&scored.chunk, label);
        if seen.insert(line.clone()) {
            lines.push(line);
        }
    }
    lines.join("\n")
}

fn citation_line(chunk: &Chunk, label: &str) -> String {
    match chunk.rule_id() {
        Some(rule_id) => {
            let page_phrase = match chunk.pages() {
                Some(span) if span.start == span.end => format!("p. {}", span.start),
                Some(span) => format!("pp. {}-{}", span.start, span.end),
                None => "page n/a".to_string(),
            };
            format!("- {label}: §{rule_id} ({}), {page_phrase}", chunk.title)
        }
        None => format!("- {label}: {}", chunk.title),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunker::{ChunkKind, PageSpan};

    fn scored_rule(pages: Option<PageSpan>) -> ScoredChunk {
        ScoredChunk {
            chunk: Chunk {
                chunk_id: "aaaaaaaaaaaaaaaa".to_string(),
                doc_id: "puct_25_181".to_string(),
                title: "Energy Efficiency Goal".to_string(),
                source_url: "https://example.com/25.181.pdf".to_string(),
                text: "body".to_string(),
                kind: ChunkKind::Regulatory {
                    rule_id: "25.181".to_string(),
                    pages,
                },
            },
            score: 0.9,
        }
    }

    fn scored_context(title: &str) -> ScoredChunk {
        ScoredChunk {
            chunk: Chunk {
                chunk_id: "bbbbbbbbbbbbbbbb".to_string(),
                doc_id: "cp_res_ee".to_string(),
                title: title.to_string(),
                source_url: "https://example.com/residential".to_string(),
                text: "body".to_string(),
                kind: ChunkKind::Context,
            },
            score: 0.5,
        }
    }

    #[test]
    fn formats_single_page_rule_citation() {
        let line = format_citations(&[scored_rule(Some(PageSpan { start: 4, end: 4 }))], "PUCT");
        assert_eq!(line, "- PUCT: §25.181 (Energy Efficiency Goal), p. 4");
    }

    #[test]
    fn formats_page_range_and_missing_pages() {
        let line = format_citations(&[scored_rule(Some(PageSpan { start: 4, end: 6 }))], "PUCT");
        assert_eq!(line, "- PUCT: §25.181 (Energy Efficiency Goal), pp. 4-6");

        let line = format_citations(&[scored_rule(None)], "PUCT");
        assert_eq!(line, "- PUCT: §25.181 (Energy Efficiency Goal), page n/a");
    }

    #[test]
    fn formats_context_citation_by_title() {
        let line = format_citations(&[scored_context("Residential Programs")], "CenterPoint");
        assert_eq!(line, "- CenterPoint: Residential Programs");
    }

    #[test]
    fn deduplicates_preserving_first_occurrence() {
        let rendered = format_citations(
            &[
                scored_context("Residential Programs"),
                scored_rule(Some(PageSpan { start: 4, end: 4 })),
                scored_context("Residential Programs"),
            ],
            "CP",
        );
        let lines: Vec<&str> = rendered.lines().collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0], "- CP: Residential Programs");
    }

    #[test]
    fn empty_input_renders_empty_string() {
        assert_eq!(format_citations(&[], "PUCT"), "");
    }
}
