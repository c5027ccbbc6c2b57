use std::collections::{BTreeMap, BTreeSet};

use rusqlite::Connection;

use crate::model::{DocumentMetadata, StudentGroup, StudentRecord};

use super::db::{self, SubjectColumnRegistry};
use super::extract::StudentLineParser;
use super::run::extract_batch;
use super::scan::{GroupScanner, MetadataScanner};

fn parser() -> StudentLineParser {
    StudentLineParser::new().unwrap()
}

fn metadata_scanner() -> MetadataScanner {
    MetadataScanner::new().unwrap()
}

fn test_metadata() -> DocumentMetadata {
    DocumentMetadata {
        school_name: "Central School".to_string(),
        board: "BOARD OF INTERMEDIATE AND SECONDARY EDUCATION, DHAKA".to_string(),
        zilla: "DHAKA".to_string(),
        thana: "DHANMONDI".to_string(),
    }
}

fn test_record(roll: &str, gpa: f64, subjects: &[(&str, &str)]) -> StudentRecord {
    StudentRecord {
        roll: roll.to_string(),
        gpa,
        group: StudentGroup::Science,
        school_name: "Central School".to_string(),
        board: String::new(),
        zilla: String::new(),
        thana: String::new(),
        subject_marks: subjects
            .iter()
            .map(|(code, marks)| (code.to_string(), marks.to_string()))
            .collect(),
    }
}

fn test_connection() -> Connection {
    let conn = Connection::open_in_memory().unwrap();
    db::ensure_schema(&conn).unwrap();
    conn
}

#[test]
fn student_line_yields_roll_gpa_group_and_subjects() {
    let record = parser()
        .parse_line(
            "123456[5.00]:101:T:88,109:T:92",
            StudentGroup::Science,
            &test_metadata(),
        )
        .unwrap();

    assert_eq!(record.roll, "123456");
    assert_eq!(record.gpa, 5.00);
    assert_eq!(record.group, StudentGroup::Science);
    assert_eq!(record.school_name, "Central School");
    assert_eq!(record.zilla, "DHAKA");

    let expected: BTreeMap<String, String> = [("101", "88"), ("109", "92")]
        .iter()
        .map(|(code, marks)| (code.to_string(), marks.to_string()))
        .collect();
    assert_eq!(record.subject_marks, expected);
}

#[test]
fn summary_lines_are_excluded_before_the_structural_match() {
    let parser = parser();
    let metadata = DocumentMetadata::default();

    assert!(
        parser
            .parse_line("GPA5 PERCENT: 97.5", StudentGroup::Unknown, &metadata)
            .is_none()
    );
    assert!(
        parser
            .parse_line("TOTAL PASSED: 1204", StudentGroup::Unknown, &metadata)
            .is_none()
    );
}

#[test]
fn malformed_subject_entries_are_dropped_individually() {
    let record = parser()
        .parse_line(
            "123456[4.50]:101:T:80, 9:T:x, banana,109:T:07",
            StudentGroup::Humanities,
            &DocumentMetadata::default(),
        )
        .unwrap();

    assert_eq!(record.subject_marks.len(), 2);
    assert_eq!(record.subject_marks["101"], "80");
    assert_eq!(record.subject_marks["109"], "07");
}

#[test]
fn line_with_no_valid_subject_entries_still_yields_a_record() {
    let record = parser()
        .parse_line(
            "123456[3.25]:junk",
            StudentGroup::Unknown,
            &DocumentMetadata::default(),
        )
        .unwrap();

    assert_eq!(record.roll, "123456");
    assert_eq!(record.gpa, 3.25);
    assert!(record.subject_marks.is_empty());
}

#[test]
fn lines_outside_the_grammar_yield_nothing() {
    let parser = parser();
    let metadata = DocumentMetadata::default();

    for line in [
        "",
        "12345[5.00]:101:T:88",
        "123456(5.00):101:T:88",
        "123456[10.00]:101:T:88",
        "123456[5.0]:101:T:88",
        "ROLL GPA SUBJECTS",
    ] {
        assert!(
            parser
                .parse_line(line, StudentGroup::Science, &metadata)
                .is_none(),
            "expected no record for {line:?}"
        );
    }
}

#[test]
fn group_headers_are_consumed_and_update_the_context() {
    let mut scanner = GroupScanner::new();
    assert_eq!(scanner.current(), StudentGroup::Unknown);

    assert!(scanner.observe("science group"));
    assert_eq!(scanner.current(), StudentGroup::Science);

    assert!(scanner.observe("GROUP: BUSINESS STUDIES"));
    assert_eq!(scanner.current(), StudentGroup::BusinessStudies);

    assert!(scanner.observe("Humanities"));
    assert_eq!(scanner.current(), StudentGroup::Humanities);

    assert!(!scanner.observe("123456[5.00]:101:T:88"));
    assert_eq!(scanner.current(), StudentGroup::Humanities);
}

#[test]
fn group_context_propagates_across_student_lines() {
    let text = "INSTITUTE NAME: Central School (1234)\n\
                SCIENCE GROUP\n\
                111111[5.00]:101:T:88\n\
                222222[4.75]:101:T:80\n\
                HUMANITIES GROUP\n\
                333333[4.00]:107:T:70\n";

    let (metadata, batch) = extract_batch(text, &metadata_scanner(), &parser());

    assert_eq!(metadata.school_name, "Central School");
    assert_eq!(batch.len(), 3);
    assert_eq!(batch[0].roll, "111111");
    assert_eq!(batch[0].group, StudentGroup::Science);
    assert_eq!(batch[1].group, StudentGroup::Science);
    assert_eq!(batch[2].roll, "333333");
    assert_eq!(batch[2].group, StudentGroup::Humanities);
}

#[test]
fn students_before_the_first_header_stay_unknown() {
    let text = "111111[5.00]:101:T:88\nSCIENCE\n222222[4.75]:101:T:80\n";

    let (_, batch) = extract_batch(text, &metadata_scanner(), &parser());

    assert_eq!(batch[0].group, StudentGroup::Unknown);
    assert_eq!(batch[1].group, StudentGroup::Science);
}

#[test]
fn institute_name_with_trailing_code_is_stripped() {
    let lines = vec!["INSTITUTE NAME: Green Valley College (1234)"];
    let metadata = metadata_scanner().scan(&lines);
    assert_eq!(metadata.school_name, "Green Valley College");
}

#[test]
fn institute_name_without_code_uses_the_label_fallback() {
    let lines = vec!["INSTITUTE NAME: RIVERSIDE HIGH SCHOOL 1053"];
    let metadata = metadata_scanner().scan(&lines);
    assert_eq!(metadata.school_name, "RIVERSIDE HIGH SCHOOL");
}

#[test]
fn institute_name_falls_back_to_a_raw_colon_split() {
    let lines = vec!["INSTITUTE NAME (1234): Green Valley College"];
    let metadata = metadata_scanner().scan(&lines);
    assert_eq!(metadata.school_name, "Green Valley College");
}

#[test]
fn first_institute_name_detection_wins() {
    let lines = vec![
        "INSTITUTE NAME: First College (1111)",
        "INSTITUTE NAME: Second College (2222)",
    ];
    let metadata = metadata_scanner().scan(&lines);
    assert_eq!(metadata.school_name, "First College");
}

#[test]
fn board_line_is_taken_verbatim_from_the_document_head() {
    let lines = vec![
        "RESULTS 2024",
        "BOARD OF INTERMEDIATE AND SECONDARY EDUCATION, DHAKA",
        "INSTITUTE NAME: Central School (1234)",
    ];
    let metadata = metadata_scanner().scan(&lines);
    assert_eq!(
        metadata.board,
        "BOARD OF INTERMEDIATE AND SECONDARY EDUCATION, DHAKA"
    );
}

#[test]
fn board_lines_past_the_first_ten_are_ignored() {
    let mut lines = vec!["filler"; 10];
    lines.push("BOARD OF INTERMEDIATE AND SECONDARY EDUCATION, DHAKA");
    let metadata = metadata_scanner().scan(&lines);
    assert!(metadata.board.is_empty());
}

#[test]
fn zilla_and_thana_values_follow_their_labels() {
    let lines = vec!["Zilla : DHAKA", "Thana: DHANMONDI"];
    let metadata = metadata_scanner().scan(&lines);
    assert_eq!(metadata.zilla, "DHAKA");
    assert_eq!(metadata.thana, "DHANMONDI");
}

#[test]
fn missing_metadata_degrades_to_empty_fields() {
    let lines = vec!["111111[5.00]:101:T:88"];
    let metadata = metadata_scanner().scan(&lines);
    assert_eq!(metadata, DocumentMetadata::default());
}

#[test]
fn reconcile_registers_each_new_code_once() {
    let mut conn = test_connection();
    let mut registry = SubjectColumnRegistry::load(&conn).unwrap();
    assert_eq!(registry.known_count(), 0);

    let first: BTreeSet<String> = ["101", "109"].iter().map(ToString::to_string).collect();
    assert_eq!(registry.reconcile(&mut conn, &first).unwrap(), 2);
    assert_eq!(
        db::subject_columns(&conn).unwrap(),
        vec!["101_marks".to_string(), "109_marks".to_string()]
    );

    let second: BTreeSet<String> = ["101", "107"].iter().map(ToString::to_string).collect();
    assert_eq!(registry.reconcile(&mut conn, &second).unwrap(), 1);
    assert_eq!(registry.known_count(), 3);
}

#[test]
fn column_set_grows_monotonically_across_reconciles() {
    let mut conn = test_connection();
    let mut registry = SubjectColumnRegistry::load(&conn).unwrap();

    let first: BTreeSet<String> = ["101", "109"].iter().map(ToString::to_string).collect();
    registry.reconcile(&mut conn, &first).unwrap();
    let after_first: BTreeSet<String> = db::subject_columns(&conn).unwrap().into_iter().collect();

    let second: BTreeSet<String> = ["205"].iter().map(ToString::to_string).collect();
    registry.reconcile(&mut conn, &second).unwrap();
    let after_second: BTreeSet<String> = db::subject_columns(&conn).unwrap().into_iter().collect();

    assert!(after_first.is_subset(&after_second));
    assert!(after_second.contains("205_marks"));
}

#[test]
fn registry_reload_sees_previously_registered_codes() {
    let mut conn = test_connection();
    let mut registry = SubjectColumnRegistry::load(&conn).unwrap();

    let observed: BTreeSet<String> = ["101", "109"].iter().map(ToString::to_string).collect();
    registry.reconcile(&mut conn, &observed).unwrap();

    let reloaded = SubjectColumnRegistry::load(&conn).unwrap();
    assert_eq!(reloaded.known_count(), 2);
}

#[test]
fn non_numeric_subject_codes_are_rejected() {
    let mut conn = test_connection();
    let mut registry = SubjectColumnRegistry::load(&conn).unwrap();

    let observed: BTreeSet<String> = ["101; DROP TABLE students"]
        .iter()
        .map(ToString::to_string)
        .collect();
    assert!(registry.reconcile(&mut conn, &observed).is_err());
    assert_eq!(registry.known_count(), 0);
}

#[test]
fn subject_columns_exclude_the_fixed_metadata_set() {
    let mut conn = test_connection();
    let mut registry = SubjectColumnRegistry::load(&conn).unwrap();

    let observed: BTreeSet<String> = ["101"].iter().map(ToString::to_string).collect();
    registry.reconcile(&mut conn, &observed).unwrap();

    let columns = db::subject_columns(&conn).unwrap();
    assert_eq!(columns, vec!["101_marks".to_string()]);
    for fixed in db::FIXED_COLUMNS {
        assert!(!columns.contains(&fixed.to_string()));
    }
}

#[test]
fn repeated_identical_upserts_are_idempotent() {
    let mut conn = test_connection();
    let mut registry = SubjectColumnRegistry::load(&conn).unwrap();

    let record = test_record("123456", 5.00, &[("101", "88"), ("109", "92")]);
    let observed: BTreeSet<String> = record.subject_marks.keys().cloned().collect();
    registry.reconcile(&mut conn, &observed).unwrap();

    db::upsert_student(&conn, &record).unwrap();
    db::upsert_student(&conn, &record).unwrap();

    let rows: i64 = conn
        .query_row("SELECT COUNT(*) FROM students", [], |row| row.get(0))
        .unwrap();
    assert_eq!(rows, 1);

    let (gpa, marks): (f64, Option<String>) = conn
        .query_row(
            "SELECT gpa, \"101_marks\" FROM students WHERE roll = '123456'",
            [],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .unwrap();
    assert_eq!(gpa, 5.00);
    assert_eq!(marks.as_deref(), Some("88"));
}

#[test]
fn replace_by_roll_nulls_subjects_absent_from_the_new_record() {
    let mut conn = test_connection();
    let mut registry = SubjectColumnRegistry::load(&conn).unwrap();

    let first = test_record("123456", 5.00, &[("101", "80"), ("109", "90")]);
    let observed: BTreeSet<String> = first.subject_marks.keys().cloned().collect();
    registry.reconcile(&mut conn, &observed).unwrap();
    db::upsert_student(&conn, &first).unwrap();

    let second = test_record("123456", 4.50, &[("101", "85")]);
    db::upsert_student(&conn, &second).unwrap();

    let (gpa, kept, erased): (f64, Option<String>, Option<String>) = conn
        .query_row(
            "SELECT gpa, \"101_marks\", \"109_marks\" FROM students WHERE roll = '123456'",
            [],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
        )
        .unwrap();

    assert_eq!(gpa, 4.50);
    assert_eq!(kept.as_deref(), Some("85"));
    assert_eq!(erased, None);
}

#[test]
fn group_and_metadata_round_trip_through_the_store() {
    let mut conn = test_connection();
    let mut registry = SubjectColumnRegistry::load(&conn).unwrap();

    let text = "BOARD OF INTERMEDIATE AND SECONDARY EDUCATION, DHAKA\n\
                INSTITUTE NAME: Central School (1234)\n\
                Zilla : DHAKA\n\
                Thana : DHANMONDI\n\
                BUSINESS STUDIES GROUP\n\
                654321[4.25]:201:T:75,203:T:68\n";
    let (_, batch) = extract_batch(text, &metadata_scanner(), &parser());
    assert_eq!(batch.len(), 1);

    let observed: BTreeSet<String> = batch[0].subject_marks.keys().cloned().collect();
    registry.reconcile(&mut conn, &observed).unwrap();
    db::upsert_student(&conn, &batch[0]).unwrap();

    let (group, school, zilla, thana): (String, String, String, String) = conn
        .query_row(
            "SELECT group_name, school_name, zilla, thana FROM students WHERE roll = '654321'",
            [],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
        )
        .unwrap();

    assert_eq!(group, "Business Studies");
    assert_eq!(school, "Central School");
    assert_eq!(zilla, "DHAKA");
    assert_eq!(thana, "DHANMONDI");
}
