use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StudentGroup {
    Science,
    BusinessStudies,
    Humanities,
    Unknown,
}

impl StudentGroup {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Science => "Science",
            Self::BusinessStudies => "Business Studies",
            Self::Humanities => "Humanities",
            Self::Unknown => "Unknown",
        }
    }
}

/// Document-level metadata attached to every record extracted from one PDF.
/// Fields left empty when the document never yields a match.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DocumentMetadata {
    pub school_name: String,
    pub board: String,
    pub zilla: String,
    pub thana: String,
}

#[derive(Debug, Clone)]
pub struct StudentRecord {
    pub roll: String,
    pub gpa: f64,
    pub group: StudentGroup,
    pub school_name: String,
    pub board: String,
    pub zilla: String,
    pub thana: String,
    /// Subject code to raw mark text. Marks keep their source spelling
    /// (leading zeros included), so the value type stays TEXT end to end.
    pub subject_marks: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PdfEntry {
    pub filename: String,
    pub sha256: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PdfInventoryManifest {
    pub manifest_version: u32,
    pub generated_at: String,
    pub source_directory: String,
    pub pdf_count: usize,
    pub pdfs: Vec<PdfEntry>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ToolVersions {
    pub rustc: String,
    pub cargo: String,
    pub pdftotext: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct IngestPaths {
    pub data_root: String,
    pub manifest_dir: String,
    pub inventory_manifest_path: String,
    pub pdf_dir: String,
    pub db_path: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct IngestCounts {
    pub pdf_count: usize,
    pub processed_pdf_count: usize,
    pub skipped_pdf_count: usize,
    pub empty_pdf_count: usize,
    pub records_extracted: usize,
    pub records_upserted: usize,
    pub subject_columns_added: usize,
    pub subject_columns_total: usize,
    pub students_total: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct IngestRunManifest {
    pub manifest_version: u32,
    pub run_id: String,
    pub db_schema_version: String,
    pub status: String,
    pub started_at: String,
    pub updated_at: String,
    pub command: String,
    pub tool_versions: ToolVersions,
    pub paths: IngestPaths,
    pub counts: IngestCounts,
    pub source_hashes: Vec<PdfEntry>,
    pub warnings: Vec<String>,
    pub notes: Vec<String>,
}
