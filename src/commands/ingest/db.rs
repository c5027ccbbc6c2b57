use std::collections::BTreeSet;

use anyhow::{Context, Result, bail};
use rusqlite::types::Value;
use rusqlite::{Connection, params_from_iter};

use crate::model::StudentRecord;
use crate::util::now_utc_string;

pub(crate) const DB_SCHEMA_VERSION: &str = "0.2.0";

/// Columns every student row carries regardless of which subjects a
/// document mentions. Anything else in the table is a subject-mark column.
pub(crate) const FIXED_COLUMNS: [&str; 7] = [
    "roll",
    "gpa",
    "group_name",
    "school_name",
    "board",
    "zilla",
    "thana",
];

const SUBJECT_COLUMN_SUFFIX: &str = "_marks";

pub(crate) fn configure_connection(connection: &Connection) -> Result<()> {
    connection
        .pragma_update(None, "journal_mode", "WAL")
        .context("failed to set journal_mode=WAL")?;
    connection
        .pragma_update(None, "synchronous", "NORMAL")
        .context("failed to set synchronous=NORMAL")?;
    Ok(())
}

pub(crate) fn ensure_schema(connection: &Connection) -> Result<()> {
    connection.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS metadata (
          key TEXT PRIMARY KEY,
          value TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS students (
          roll TEXT PRIMARY KEY,
          gpa REAL,
          group_name TEXT,
          school_name TEXT,
          board TEXT,
          zilla TEXT,
          thana TEXT
        );

        CREATE INDEX IF NOT EXISTS idx_students_group ON students(group_name);
        ",
    )?;

    let now = now_utc_string();
    connection.execute(
        "INSERT INTO metadata(key, value) VALUES('db_schema_version', ?1)
         ON CONFLICT(key) DO UPDATE SET value=excluded.value",
        [DB_SCHEMA_VERSION],
    )?;
    connection.execute(
        "INSERT INTO metadata(key, value) VALUES('db_updated_at', ?1)
         ON CONFLICT(key) DO UPDATE SET value=excluded.value",
        [now],
    )?;

    Ok(())
}

/// Registered subject-code columns. Additive-only: codes enter the set the
/// first time any document mentions them and are never dropped or renamed,
/// so the column set only ever grows across ingestion runs.
#[derive(Debug)]
pub(crate) struct SubjectColumnRegistry {
    known: BTreeSet<String>,
}

impl SubjectColumnRegistry {
    pub(crate) fn load(connection: &Connection) -> Result<Self> {
        let known = subject_columns(connection)?
            .into_iter()
            .map(|column| column.trim_end_matches(SUBJECT_COLUMN_SUFFIX).to_string())
            .collect();

        Ok(Self { known })
    }

    pub(crate) fn known_count(&self) -> usize {
        self.known.len()
    }

    /// Adds a column for every observed code not yet registered, inside one
    /// transaction committed before any record write. A failure here leaves
    /// the registry untouched and the document's batch unwritten.
    pub(crate) fn reconcile(
        &mut self,
        connection: &mut Connection,
        observed: &BTreeSet<String>,
    ) -> Result<usize> {
        let additions: Vec<String> = observed.difference(&self.known).cloned().collect();
        if additions.is_empty() {
            return Ok(0);
        }

        let tx = connection.transaction()?;
        for code in &additions {
            if code.is_empty() || !code.chars().all(|c| c.is_ascii_digit()) {
                bail!("invalid subject code for column registration: {code:?}");
            }

            let alter_sql = format!(
                "ALTER TABLE students ADD COLUMN \"{code}{SUBJECT_COLUMN_SUFFIX}\" TEXT"
            );
            tx.execute(&alter_sql, [])
                .with_context(|| format!("failed to add subject column for code {code}"))?;
        }
        tx.commit()
            .context("failed to commit subject column additions")?;

        let added = additions.len();
        self.known.extend(additions);
        Ok(added)
    }
}

/// Subject-mark columns currently present on the students table, in table
/// order. The display layer uses the same rule to tell subjects apart from
/// the fixed metadata columns.
pub fn subject_columns(connection: &Connection) -> Result<Vec<String>> {
    let mut statement = connection
        .prepare("PRAGMA table_info(students)")
        .context("failed to inspect students schema")?;

    let mut columns = Vec::new();
    let mut rows = statement.query([])?;
    while let Some(row) = rows.next()? {
        let name: String = row.get(1)?;
        if !FIXED_COLUMNS.contains(&name.as_str()) {
            columns.push(name);
        }
    }

    Ok(columns)
}

/// Replace-by-roll write. INSERT OR REPLACE drops the previous row wholesale,
/// so subject columns absent from this record become NULL even if an earlier
/// ingestion had filled them. Re-running the same document is a no-op.
pub(crate) fn upsert_student(connection: &Connection, record: &StudentRecord) -> Result<()> {
    let mut columns: Vec<String> = FIXED_COLUMNS.iter().map(|c| (*c).to_string()).collect();
    let mut values: Vec<Value> = vec![
        Value::from(record.roll.clone()),
        Value::from(record.gpa),
        Value::from(record.group.as_str().to_string()),
        Value::from(record.school_name.clone()),
        Value::from(record.board.clone()),
        Value::from(record.zilla.clone()),
        Value::from(record.thana.clone()),
    ];

    for (code, marks) in &record.subject_marks {
        columns.push(format!("\"{code}{SUBJECT_COLUMN_SUFFIX}\""));
        values.push(Value::from(marks.clone()));
    }

    let placeholders = (1..=columns.len())
        .map(|index| format!("?{index}"))
        .collect::<Vec<String>>()
        .join(", ");
    let sql = format!(
        "INSERT OR REPLACE INTO students ({}) VALUES ({})",
        columns.join(", "),
        placeholders
    );

    connection
        .execute(&sql, params_from_iter(values))
        .with_context(|| format!("failed to upsert student {}", record.roll))?;

    Ok(())
}
