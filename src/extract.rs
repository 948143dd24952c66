//! Text extraction from the two raw source formats (PDF pages, HTML bodies).

use anyhow::{Context, Result};
use lopdf::Document;
use scraper::{Html, Selector};

/// One page's cleaned text, 1-based page number attached.
#[derive(Debug, Clone)]
pub struct PageText {
    /// Page number within the source PDF.
    pub number: u32,
    /// Cleaned page text.
    pub text: String,
}

/// Extracts per-page text from PDF bytes, skipping pages that yield nothing.
pub fn extract_pdf_pages(bytes: &[u8]) -> Result<Vec<PageText>> {
    let document = Document::load_mem(bytes).context("failed to parse PDF document")?;
    let mut pages = Vec::new();
    for (number, _object) in document.get_pages() {
        let Ok(raw) = document.extract_text(&[number]) else {
            continue;
        };
        let text = clean_page_text(&raw);
        if text.is_empty() {
            continue;
        }
        pages.push(PageText { number, text });
    }
    Ok(pages)
}

/// Extracts readable body text from an HTML page as blank-line-separated blocks.
pub fn extract_html_text(body: &str) -> String {
    HtmlExtractor::new().extract(body)
}

/// HTML main-text extraction with precompiled selectors.
pub struct HtmlExtractor {
    article: Selector,
    main: Selector,
    body: Selector,
    blocks: Selector,
}

impl HtmlExtractor {
    /// Builds a new extractor instance.
    pub fn new() -> Self {
        Self {
            article: Selector::parse("article").expect("article selector"),
            main: Selector::parse("main").expect("main selector"),
            body: Selector::parse("body").expect("body selector"),
            blocks: Selector::parse("p, h1, h2, h3, h4, h5, h6, li, blockquote")
                .expect("block selector"),
        }
    }

    /// Pulls block-level text out of the document's main content root.
    pub fn extract(&self, body: &str) -> String {
        let document = Html::parse_document(body);
        let root = document
            .select(&self.article)
            .next()
            .or_else(|| document.select(&self.main).next())
            .or_else(|| document.select(&self.body).next())
            .unwrap_or_else(|| document.root_element());

        let mut blocks = Vec::new();
        for element in root.select(&self.blocks) {
            let mut raw = String::new();
            for piece in element.text() {
                raw.push_str(piece);
            }
            let text = collapse_whitespace(&raw);
            if !text.is_empty() {
                blocks.push(text);
            }
        }
        blocks.join("\n\n")
    }
}

impl Default for HtmlExtractor {
    fn default() -> Self {
        Self::new()
    }
}

/// Collapses runs of space/tab to a single space and blank-line runs to one
/// blank line, trimming the result.
pub fn clean_page_text(input: &str) -> String {
    let inline = squash_inline_whitespace(input);
    squash_blank_lines(&inline).trim().to_string()
}

fn squash_inline_whitespace(input: &str) -> String {
    let mut buf = String::with_capacity(input.len());
    let mut last_space = false;
    for ch in input.chars() {
        if ch == ' ' || ch == '\t' {
            if !last_space {
                buf.push(' ');
            }
            last_space = true;
        } else {
            buf.push(ch);
            last_space = false;
        }
    }
    buf
}

fn squash_blank_lines(input: &str) -> String {
    let mut buf = String::with_capacity(input.len());
    let mut newlines = 0usize;
    for ch in input.chars() {
        if ch == '\n' {
            newlines += 1;
            if newlines <= 2 {
                buf.push('\n');
            }
        } else {
            newlines = 0;
            buf.push(ch);
        }
    }
    buf
}

fn collapse_whitespace(input: &str) -> String {
    let mut buf = String::with_capacity(input.len());
    let mut last_space = false;
    for ch in input.chars() {
        if ch.is_whitespace() {
            if !last_space && !buf.is_empty() {
                buf.push(' ');
            }
            last_space = true;
        } else {
            buf.push(ch);
            last_space = false;
        }
    }
    buf.trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cleans_extracted_page_text() {
        let raw = "Energy   efficiency \t goal.\n\n\n\n(a)  Each utility\nshall comply.  ";
        let cleaned = clean_page_text(raw);
        assert_eq!(
            cleaned,
            "Energy efficiency goal.\n\n(a) Each utility\nshall comply."
        );
    }

    #[test]
    fn extracts_article_blocks() {
        let body = r#"
            <html><body>
              <nav><li>Menu entry</li></nav>
              <article>
                <h1>Residential Programs</h1>
                <p>Rebates are available for <b>qualifying</b> upgrades.</p>
                <li>Attic insulation</li>
              </article>
            </body></html>
        "#;
        let text = extract_html_text(body);
        assert_eq!(
            text,
            "Residential Programs\n\nRebates are available for qualifying upgrades.\n\nAttic insulation"
        );
    }

    #[test]
    fn falls_back_to_body_without_article() {
        let body = "<html><body><p>Plain page.</p></body></html>";
        assert_eq!(extract_html_text(body), "Plain page.");
    }
}
