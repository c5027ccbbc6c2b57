use std::fs;

use anyhow::{Context, Result};
use rusqlite::{Connection, OpenFlags};
use tracing::{info, warn};

use crate::cli::StatusArgs;
use crate::commands::ingest::subject_columns;
use crate::model::PdfInventoryManifest;

pub fn run(args: StatusArgs) -> Result<()> {
    let manifest_dir = args.data_root.join("manifests");
    let inventory_path = manifest_dir.join("pdf_inventory.json");
    let db_path = args
        .db_path
        .unwrap_or_else(|| args.data_root.join("results.sqlite"));

    info!(data_root = %args.data_root.display(), "status requested");

    if inventory_path.exists() {
        let raw = fs::read(&inventory_path)
            .with_context(|| format!("failed to read {}", inventory_path.display()))?;
        let inventory: PdfInventoryManifest = serde_json::from_slice(&raw)
            .with_context(|| format!("failed to parse {}", inventory_path.display()))?;

        info!(
            generated_at = %inventory.generated_at,
            pdf_count = inventory.pdf_count,
            source = %inventory.source_directory,
            "loaded inventory manifest"
        );
    } else {
        warn!(path = %inventory_path.display(), "inventory manifest missing");
    }

    if !db_path.exists() {
        warn!(path = %db_path.display(), "database file missing");
        return Ok(());
    }

    let conn = Connection::open_with_flags(
        &db_path,
        OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
    )
    .with_context(|| format!("failed to open {}", db_path.display()))?;

    let schema_version = metadata_value(&conn, "db_schema_version").unwrap_or_default();
    let students_total = query_count(&conn, "SELECT COUNT(*) FROM students").unwrap_or(0);
    let subjects = subject_columns(&conn)?;

    info!(
        path = %db_path.display(),
        schema_version = %schema_version,
        students = students_total,
        subject_columns = subjects.len(),
        "database status"
    );

    if let Ok(mut statement) = conn.prepare(
        "SELECT group_name, COUNT(*) FROM students GROUP BY group_name ORDER BY group_name",
    ) {
        let mut rows = statement.query([])?;
        while let Some(row) = rows.next()? {
            let group: String = row.get(0)?;
            let count: i64 = row.get(1)?;
            info!(group = %group, students = count, "group totals");
        }
    }

    Ok(())
}

fn metadata_value(conn: &Connection, key: &str) -> Option<String> {
    conn.query_row(
        "SELECT value FROM metadata WHERE key = ?1",
        [key],
        |row| row.get(0),
    )
    .ok()
}

fn query_count(conn: &Connection, sql: &str) -> Result<i64> {
    let count = conn.query_row(sql, [], |row| row.get(0))?;
    Ok(count)
}
