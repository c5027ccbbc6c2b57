use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::Utc;
use rusqlite::Connection;
use tracing::{info, warn};

use crate::cli::IngestArgs;
use crate::commands::inventory;
use crate::model::{
    DocumentMetadata, IngestCounts, IngestPaths, IngestRunManifest, PdfInventoryManifest,
    StudentRecord,
};
use crate::util::{ensure_directory, now_utc_string, utc_compact_string, write_json_pretty};

use super::db::{self, SubjectColumnRegistry};
use super::extract::StudentLineParser;
use super::scan::{GroupScanner, MetadataScanner};
use super::text;

pub fn run(args: IngestArgs) -> Result<()> {
    let started_ts = Utc::now();
    let started_at = now_utc_string();
    let run_id = format!("run-{}", utc_compact_string(started_ts));

    let data_root = args.data_root.clone();
    let manifest_dir = data_root.join("manifests");
    ensure_directory(&manifest_dir)?;

    let pdf_dir = args
        .pdf_dir
        .clone()
        .unwrap_or_else(|| data_root.join("pdfs"));
    let inventory_manifest_path = args
        .inventory_manifest_path
        .clone()
        .unwrap_or_else(|| manifest_dir.join("pdf_inventory.json"));
    let ingest_manifest_path = args.ingest_manifest_path.clone().unwrap_or_else(|| {
        manifest_dir.join(format!("ingest_run_{}.json", utc_compact_string(started_ts)))
    });
    let db_path = args
        .db_path
        .clone()
        .unwrap_or_else(|| data_root.join("results.sqlite"));

    info!(data_root = %data_root.display(), run_id = %run_id, "starting ingest");

    let inventory =
        load_or_refresh_inventory(&pdf_dir, &inventory_manifest_path, args.refresh_inventory)?;

    let tool_versions = text::collect_tool_versions()?;

    let mut connection = Connection::open(&db_path)
        .with_context(|| format!("failed to open {}", db_path.display()))?;
    db::configure_connection(&connection)?;
    db::ensure_schema(&connection)?;

    let mut registry = SubjectColumnRegistry::load(&connection)?;
    let metadata_scanner = MetadataScanner::new()?;
    let parser = StudentLineParser::new()?;

    let mut counts = IngestCounts {
        pdf_count: inventory.pdf_count,
        ..IngestCounts::default()
    };
    let mut warnings = Vec::new();

    let document_limit = args.max_documents.unwrap_or(usize::MAX);
    for entry in inventory.pdfs.iter().take(document_limit) {
        let pdf_path = pdf_dir.join(&entry.filename);

        match process_document(
            &mut connection,
            &mut registry,
            &metadata_scanner,
            &parser,
            &pdf_path,
        ) {
            Ok(DocumentOutcome::Processed {
                records,
                columns_added,
            }) => {
                counts.processed_pdf_count += 1;
                counts.records_extracted += records;
                counts.records_upserted += records;
                counts.subject_columns_added += columns_added;
            }
            Ok(DocumentOutcome::Empty) => {
                counts.empty_pdf_count += 1;
                warnings.push(format!(
                    "no student records extracted from {}",
                    entry.filename
                ));
            }
            Err(error) => {
                warn!(
                    document = %entry.filename,
                    error = %error,
                    "skipping document after failure"
                );
                counts.skipped_pdf_count += 1;
                warnings.push(format!("skipped {}: {error:#}", entry.filename));
            }
        }
    }

    counts.subject_columns_total = registry.known_count();
    counts.students_total = connection
        .query_row("SELECT COUNT(*) FROM students", [], |row| row.get(0))
        .context("failed to count student rows")?;
    let updated_at = now_utc_string();

    let manifest = IngestRunManifest {
        manifest_version: 1,
        run_id: run_id.clone(),
        db_schema_version: db::DB_SCHEMA_VERSION.to_string(),
        status: "completed".to_string(),
        started_at,
        updated_at,
        command: render_ingest_command(&args),
        tool_versions,
        paths: IngestPaths {
            data_root: data_root.display().to_string(),
            manifest_dir: manifest_dir.display().to_string(),
            inventory_manifest_path: inventory_manifest_path.display().to_string(),
            pdf_dir: pdf_dir.display().to_string(),
            db_path: db_path.display().to_string(),
        },
        counts: counts.clone(),
        source_hashes: inventory.pdfs,
        warnings,
        notes: vec![
            "Ingest command completed against the local PDF folder and sqlite store.".to_string(),
            "Subject-mark columns grow additively as new codes appear in documents.".to_string(),
        ],
    };

    write_json_pretty(&ingest_manifest_path, &manifest)?;

    info!(path = %ingest_manifest_path.display(), "wrote ingest run manifest");
    info!(
        documents = counts.processed_pdf_count,
        students = counts.students_total,
        subject_columns = counts.subject_columns_total,
        "ingest completed"
    );

    Ok(())
}

enum DocumentOutcome {
    Processed {
        records: usize,
        columns_added: usize,
    },
    Empty,
}

/// One document, fully scanned and reconciled before any write, then loaded
/// inside a single transaction. The caller decides what a failure means for
/// the rest of the batch.
fn process_document(
    connection: &mut Connection,
    registry: &mut SubjectColumnRegistry,
    metadata_scanner: &MetadataScanner,
    parser: &StudentLineParser,
    pdf_path: &Path,
) -> Result<DocumentOutcome> {
    let text = text::extract_text(pdf_path)?;
    let (metadata, batch) = extract_batch(&text, metadata_scanner, parser);

    if batch.is_empty() {
        warn!(document = %pdf_path.display(), "document yielded no student records");
        return Ok(DocumentOutcome::Empty);
    }

    let observed: BTreeSet<String> = batch
        .iter()
        .flat_map(|record| record.subject_marks.keys().cloned())
        .collect();

    let columns_added = registry.reconcile(connection, &observed)?;

    let tx = connection.transaction()?;
    for record in &batch {
        db::upsert_student(&tx, record)?;
    }
    tx.commit()
        .with_context(|| format!("failed to commit batch for {}", pdf_path.display()))?;

    info!(
        document = %pdf_path.display(),
        school = %metadata.school_name,
        records = batch.len(),
        columns_added,
        "document loaded"
    );

    Ok(DocumentOutcome::Processed {
        records: batch.len(),
        columns_added,
    })
}

/// Metadata scan first, then a sequential line scan that threads the group
/// context left to right: header lines are consumed by the group scanner,
/// everything else is offered to the record grammar.
pub(crate) fn extract_batch(
    text: &str,
    metadata_scanner: &MetadataScanner,
    parser: &StudentLineParser,
) -> (DocumentMetadata, Vec<StudentRecord>) {
    let lines: Vec<&str> = text.lines().collect();
    let metadata = metadata_scanner.scan(&lines);

    let mut groups = GroupScanner::new();
    let mut batch = Vec::new();

    for line in &lines {
        if groups.observe(line) {
            continue;
        }

        if let Some(record) = parser.parse_line(line, groups.current(), &metadata) {
            batch.push(record);
        }
    }

    (metadata, batch)
}

fn load_or_refresh_inventory(
    pdf_dir: &Path,
    inventory_manifest_path: &Path,
    refresh_inventory: bool,
) -> Result<PdfInventoryManifest> {
    if refresh_inventory || !inventory_manifest_path.exists() {
        let manifest = inventory::build_manifest(pdf_dir)?;
        write_json_pretty(inventory_manifest_path, &manifest)?;
        info!(
            path = %inventory_manifest_path.display(),
            pdf_count = manifest.pdf_count,
            "refreshed inventory manifest"
        );
        return Ok(manifest);
    }

    let raw = fs::read(inventory_manifest_path)
        .with_context(|| format!("failed to read {}", inventory_manifest_path.display()))?;
    let manifest: PdfInventoryManifest = serde_json::from_slice(&raw)
        .with_context(|| format!("failed to parse {}", inventory_manifest_path.display()))?;

    info!(
        path = %inventory_manifest_path.display(),
        pdf_count = manifest.pdf_count,
        "loaded existing inventory manifest"
    );

    Ok(manifest)
}

fn render_ingest_command(args: &IngestArgs) -> String {
    let mut command = vec![
        "examresults".to_string(),
        "ingest".to_string(),
        "--data-root".to_string(),
        args.data_root.display().to_string(),
    ];

    let mut push_path = |flag: &str, path: &Option<PathBuf>| {
        if let Some(path) = path {
            command.push(flag.to_string());
            command.push(path.display().to_string());
        }
    };

    push_path("--pdf-dir", &args.pdf_dir);
    push_path("--inventory-manifest-path", &args.inventory_manifest_path);
    push_path("--ingest-manifest-path", &args.ingest_manifest_path);
    push_path("--db-path", &args.db_path);

    if args.refresh_inventory {
        command.push("--refresh-inventory".to_string());
    }
    if let Some(max_documents) = args.max_documents {
        command.push("--max-documents".to_string());
        command.push(max_documents.to_string());
    }

    command.join(" ")
}
