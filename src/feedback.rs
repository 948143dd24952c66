//! Append-only line-delimited feedback log.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Whether the user found an answer helpful.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Helpful {
    /// The answer helped.
    #[serde(rename = "Yes")]
    Yes,
    /// The answer did not help.
    #[serde(rename = "No")]
    No,
    /// No rating given.
    #[serde(rename = "")]
    Unspecified,
}

/// One logged feedback entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedbackRecord {
    /// Thumbs rating, possibly unspecified.
    pub helpful: Helpful,
    /// Free-text comment, possibly empty.
    pub comment: String,
}

/// Appender for the JSONL feedback file.
#[derive(Debug, Clone)]
pub struct FeedbackLog {
    path: PathBuf,
}

impl FeedbackLog {
    /// Binds the log to a file path; the file is created on first append.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Path of the underlying log file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Appends one record as a JSON line.
    pub fn append(&self, record: &FeedbackRecord) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create feedback directory {parent:?}"))?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .with_context(|| format!("failed to open feedback log {:?}", self.path))?;
        serde_json::to_writer(&mut file, record)?;
        file.write_all(b"\n")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn appends_json_lines() {
        let dir = tempfile::tempdir().unwrap();
        let log = FeedbackLog::new(dir.path().join("feedback.jsonl"));
        log.append(&FeedbackRecord {
            helpful: Helpful::Yes,
            comment: "clear answer".to_string(),
        })
        .unwrap();
        log.append(&FeedbackRecord {
            helpful: Helpful::Unspecified,
            comment: String::new(),
        })
        .unwrap();

        let contents = std::fs::read_to_string(log.path()).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0], r#"{"helpful":"Yes","comment":"clear answer"}"#);
        let back: FeedbackRecord = serde_json::from_str(lines[1]).unwrap();
        assert_eq!(back.helpful, Helpful::Unspecified);
    }
}
