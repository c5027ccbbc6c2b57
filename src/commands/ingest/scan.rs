use anyhow::{Context, Result};
use regex::Regex;
use tracing::warn;

use crate::model::{DocumentMetadata, StudentGroup};

/// Single-pass group-context state machine. A header line naming an academic
/// group is consumed and flips the current context; every later student line
/// inherits that context until the next header. Starts at Unknown per
/// document.
#[derive(Debug)]
pub(crate) struct GroupScanner {
    current: StudentGroup,
}

impl GroupScanner {
    pub(crate) fn new() -> Self {
        Self {
            current: StudentGroup::Unknown,
        }
    }

    pub(crate) fn current(&self) -> StudentGroup {
        self.current
    }

    /// Returns true when the line is a group header, in which case it has
    /// been consumed and must not reach the record extractor.
    pub(crate) fn observe(&mut self, line: &str) -> bool {
        let Some(group) = detect_group(line) else {
            return false;
        };

        self.current = group;
        true
    }
}

// "BUSINESS STUDIES" is checked before "SCIENCE" so the longer keyword
// cannot be shadowed by a shorter one on the same line.
fn detect_group(line: &str) -> Option<StudentGroup> {
    let upper = line.to_uppercase();

    if upper.contains("BUSINESS STUDIES") {
        Some(StudentGroup::BusinessStudies)
    } else if upper.contains("SCIENCE") {
        Some(StudentGroup::Science)
    } else if upper.contains("HUMANITIES") {
        Some(StudentGroup::Humanities)
    } else {
        None
    }
}

/// Detects document-level metadata once per document. Each field keeps the
/// first match; a document with none of the expected header lines degrades
/// to empty fields rather than failing the extraction.
#[derive(Debug)]
pub(crate) struct MetadataScanner {
    school_with_code: Regex,
    school_after_label: Regex,
    zilla: Regex,
    thana: Regex,
}

impl MetadataScanner {
    pub(crate) fn new() -> Result<Self> {
        let school_with_code = Regex::new(r"(?i)INSTITUTE\s+NAME\s*:\s*(.+?)\s*\(\s*\d+\s*\)\s*$")
            .context("failed to compile institute-name-with-code regex")?;
        let school_after_label = Regex::new(r"(?i)INSTITUTE\s+NAME\s*:\s*(.+)$")
            .context("failed to compile institute-name regex")?;
        let zilla = Regex::new(r"(?i)^ZILLA\s*:?\s*([A-Za-z][A-Za-z ]*)")
            .context("failed to compile zilla regex")?;
        let thana = Regex::new(r"(?i)^THANA\s*:?\s*([A-Za-z][A-Za-z ]*)")
            .context("failed to compile thana regex")?;

        Ok(Self {
            school_with_code,
            school_after_label,
            zilla,
            thana,
        })
    }

    pub(crate) fn scan(&self, lines: &[&str]) -> DocumentMetadata {
        let mut metadata = DocumentMetadata::default();

        for line in lines.iter().map(|line| line.trim()) {
            if line.is_empty() {
                continue;
            }

            let upper = line.to_uppercase();

            if metadata.school_name.is_empty() && upper.contains("INSTITUTE NAME") {
                if let Some(name) = self.extract_school_name(line) {
                    metadata.school_name = name;
                }
            }

            if metadata.zilla.is_empty() && upper.starts_with("ZILLA") {
                if let Some(captures) = self.zilla.captures(line) {
                    metadata.zilla = captures[1].trim().to_string();
                }
            }

            if metadata.thana.is_empty() && upper.starts_with("THANA") {
                if let Some(captures) = self.thana.captures(line) {
                    metadata.thana = captures[1].trim().to_string();
                }
            }
        }

        // The board banner sits at the top of the document; lines past the
        // first ten non-blank ones are never it.
        for line in lines
            .iter()
            .map(|line| line.trim())
            .filter(|line| !line.is_empty())
            .take(10)
        {
            if line.to_uppercase().contains("BOARD OF") {
                metadata.board = line.to_string();
                break;
            }
        }

        if metadata.school_name.is_empty() {
            warn!("no institute name detected in document header");
        }
        if metadata.board.is_empty() {
            warn!("no examining board detected in document header");
        }

        metadata
    }

    // Ordered fallbacks: labelled capture stopping before a trailing
    // parenthesized EIIN code, then labelled capture to end of line, then a
    // raw split on the first colon.
    fn extract_school_name(&self, line: &str) -> Option<String> {
        let raw = if let Some(captures) = self.school_with_code.captures(line) {
            captures[1].to_string()
        } else if let Some(captures) = self.school_after_label.captures(line) {
            captures[1].to_string()
        } else {
            line.split_once(':')?.1.to_string()
        };

        let cleaned = raw
            .trim_end_matches(|c: char| c.is_ascii_digit() || c == '(' || c == ')' || c == ' ')
            .trim()
            .to_string();

        if cleaned.is_empty() { None } else { Some(cleaned) }
    }
}
