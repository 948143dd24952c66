//! Glossary of program and regulatory terms.

use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::prompt::Language;

/// One glossary term with its plain-language definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GlossaryEntry {
    /// The term as shown to users.
    pub term: String,
    /// Plain-language definition.
    pub definition: String,
}

/// Read-only glossary loaded wholesale from a JSON array.
#[derive(Debug, Clone, Default)]
pub struct Glossary {
    entries: Vec<GlossaryEntry>,
}

impl Glossary {
    /// Loads the glossary from a JSON file.
    pub fn load(path: &Path) -> Result<Self> {
        let file = File::open(path).with_context(|| format!("failed to open glossary {path:?}"))?;
        let entries = serde_json::from_reader(BufReader::new(file))
            .with_context(|| format!("failed to parse glossary {path:?}"))?;
        Ok(Self { entries })
    }

    /// An empty glossary (used when no glossary file is configured).
    pub fn empty() -> Self {
        Self::default()
    }

    /// All entries in file order.
    pub fn entries(&self) -> &[GlossaryEntry] {
        &self.entries
    }

    /// Entries whose term appears in the question, case-insensitively.
    pub fn hits_in(&self, question: &str) -> Vec<&GlossaryEntry> {
        let lowered = question.to_lowercase();
        self.entries
            .iter()
            .filter(|entry| lowered.contains(&entry.term.to_lowercase()))
            .collect()
    }

    /// Entries whose term or definition contains the needle,
    /// case-insensitively.
    pub fn search(&self, needle: &str) -> Vec<&GlossaryEntry> {
        let lowered = needle.to_lowercase();
        self.entries
            .iter()
            .filter(|entry| {
                entry.term.to_lowercase().contains(&lowered)
                    || entry.definition.to_lowercase().contains(&lowered)
            })
            .collect()
    }
}

/// Renders glossary hits as a quick-reference block, or `None` without hits.
pub fn render_quick_reference(hits: &[&GlossaryEntry], lang: Language) -> Option<String> {
    if hits.is_empty() {
        return None;
    }
    let heading = match lang {
        Language::English => "Glossary (quick reference):",
        Language::Spanish => "Glosario (referencia rápida):",
    };
    let mut block = heading.to_string();
    for entry in hits {
        block.push_str(&format!("\n- **{}**: {}", entry.term, entry.definition));
    }
    Some(block)
}
