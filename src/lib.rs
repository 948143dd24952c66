#![warn(missing_docs)]
//! Core library entry points for the eeportal regulatory-QA pipeline.

pub mod answer;
pub mod chunker;
pub mod citations;
pub mod embedder;
pub mod extract;
pub mod feedback;
pub mod fetch;
pub mod glossary;
pub mod heuristics;
pub mod index;
pub mod prompt;
pub mod providers;
pub mod retriever;
pub mod sources;
pub mod store;

pub use answer::{AskOptions, AskOutcome, Portal};
pub use chunker::{Chunk, ChunkKind, Chunker, ChunkerConfig, PageSpan};
pub use citations::format_citations;
pub use embedder::TextEmbedder;
pub use extract::{extract_html_text, extract_pdf_pages, PageText};
pub use feedback::{FeedbackLog, FeedbackRecord, Helpful};
pub use glossary::{Glossary, GlossaryEntry};
pub use heuristics::{ProgramLogisticsMatcher, RegulatoryAnswerPolicy};
pub use index::{FlatIpIndex, IndexError};
pub use prompt::{build_prompt, Language, PromptBundle};
pub use retriever::{ScoredChunk, VectorIndex};
pub use store::{artifact_paths, load_index, save_index, ArtifactPaths, IndexMeta};

#[cfg(feature = "debug_logs")]
#[macro_export]
// This allows use of the `eprintln!` macro via `debug_log!` macro.
macro_rules! debug_log {
        ($($arg:tt)*) => {
            eprintln!($($arg)*);
        };
    }
#[cfg(not(feature = "debug_logs"))]
#[macro_export]
// This effectively disables the `eprintln!` macro, effectively removing it from the code during
// compilation.
macro_rules! debug_log {
    ($($arg:tt)*) => {};
}
