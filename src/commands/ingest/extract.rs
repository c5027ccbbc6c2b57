use std::collections::BTreeMap;

use anyhow::{Context, Result};
use regex::Regex;

use crate::model::{DocumentMetadata, StudentGroup, StudentRecord};

// Aggregate/summary lines can resemble the student grammar closely enough
// to need explicit exclusion before the structural match is attempted.
const SUMMARY_KEYWORDS: [&str; 3] = ["PERCENT", "PASS", "TOTAL"];

/// Per-line student grammar: `<roll:6 digits>[<gpa:d.dd>]:<subject list>`
/// where the subject list is comma-separated `<code>:T:<marks>` entries.
#[derive(Debug)]
pub(crate) struct StudentLineParser {
    student_line: Regex,
    subject_entry: Regex,
}

impl StudentLineParser {
    pub(crate) fn new() -> Result<Self> {
        let student_line = Regex::new(r"^(\d{6})\[(\d\.\d{2})\]:(.+)$")
            .context("failed to compile student line regex")?;
        let subject_entry = Regex::new(r"^(\d+):T:(\d+)$")
            .context("failed to compile subject entry regex")?;

        Ok(Self {
            student_line,
            subject_entry,
        })
    }

    /// Roll and GPA gate the record: a line that fails the anchored match
    /// yields nothing, while individual malformed subject entries are
    /// dropped without rejecting the line. Marks stay raw text.
    pub(crate) fn parse_line(
        &self,
        line: &str,
        group: StudentGroup,
        metadata: &DocumentMetadata,
    ) -> Option<StudentRecord> {
        let line = line.trim();

        let upper = line.to_uppercase();
        if SUMMARY_KEYWORDS
            .iter()
            .any(|keyword| upper.contains(keyword))
        {
            return None;
        }

        let captures = self.student_line.captures(line)?;
        let roll = captures[1].to_string();
        let gpa: f64 = captures[2].parse().ok()?;

        let mut subject_marks = BTreeMap::new();
        for part in captures[3].split(',') {
            if let Some(entry) = self.subject_entry.captures(part.trim()) {
                subject_marks.insert(entry[1].to_string(), entry[2].to_string());
            }
        }

        Some(StudentRecord {
            roll,
            gpa,
            group,
            school_name: metadata.school_name.clone(),
            board: metadata.board.clone(),
            zilla: metadata.zilla.clone(),
            thana: metadata.thana.clone(),
            subject_marks,
        })
    }
}
