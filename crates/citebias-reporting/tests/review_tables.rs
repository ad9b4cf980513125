//! Review exports to CSV and back, with and without merged decisions.

use citebias_core::merge::merge_with_rules;
use citebias_core::{FieldValue, MergeOptions, NoteV2, ReviewNote, load_notes};
use citebias_reporting::{ColumnLayout, Table};

const REVIEWS: &str = r#"[
  {"id": "rv1", "invitations": ["NeurIPS.cc/2024/Conference/Submission10/-/Official_Review"],
   "cdate": 1720000000000, "signatures": ["NeurIPS.cc/2024/Conference/Submission10/Reviewer_x"],
   "content": {"summary": {"value": "A, \"quoted\"\nmulti-line summary."},
               "rating": {"value": 6}, "soundness": {"value": 3}, "novelty_note": {"value": "new"}}},
  {"id": "rv2", "invitations": ["NeurIPS.cc/2024/Conference/Submission11/-/Official_Review"],
   "cdate": 1720000000001, "signatures": [],
   "content": {"summary": {"value": "Short."}, "rating": {"value": 4}}}
]"#;

const DECISIONS: &str = r#"[
  {"id": "d10", "invitations": ["NeurIPS.cc/2024/Conference/Submission10/-/Decision"],
   "content": {"decision": {"value": "Accept (poster)"}, "comment": {"value": ""}}}
]"#;

#[test]
fn csv_round_trip_keeps_values_and_order() {
    let notes = load_notes::<NoteV2>(REVIEWS).unwrap().notes;
    let table = ColumnLayout::neurips_api2().tabulate(&notes);

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("reviews.csv");
    table.write_csv(&path).unwrap();
    let back = Table::read_csv(&path).unwrap();

    assert_eq!(back.columns(), table.columns());
    assert_eq!(back.columns()[0], "id");
    assert_eq!(back.columns()[1], "summary");
    assert_eq!(back.columns()[14], "novelty_note");

    for (original, read) in table.rows().iter().zip(back.rows()) {
        for column in table.columns() {
            let expected = original
                .get(column)
                .map(|v| v.render().into_owned())
                .unwrap_or_default();
            let actual = read.get(column).map(|v| v.render().into_owned()).unwrap_or_default();
            assert_eq!(expected, actual, "column {column}");
        }
    }
    assert_eq!(back.rows()[0].text("rating"), Some("6"));
    assert_eq!(back.rows()[1].get("novelty_note"), Some(&FieldValue::Null));
}

#[test]
fn merged_table_distinguishes_absent_from_empty() {
    let loaded = load_notes::<NoteV2>(REVIEWS).unwrap();
    let decisions = load_notes::<NoteV2>(DECISIONS).unwrap().records();
    let rule = NoteV2::key_rule();
    let outcome = merge_with_rules(
        &loaded.records(),
        &decisions,
        &rule,
        &rule,
        &MergeOptions::with_right_fields(["decision", "comment"]),
    );
    let table = ColumnLayout::neurips_api2().tabulate_merged(&loaded.notes, outcome);

    let decision_at = table.columns().iter().position(|c| c == "decision").unwrap();
    assert_eq!(decision_at, 15);
    assert_eq!(table.columns()[16], "comment");

    let mut buf = Vec::new();
    table.to_writer(&mut buf).unwrap();
    let back = Table::from_reader(buf.as_slice()).unwrap();
    assert_eq!(back.rows()[0].text("decision"), Some("Accept (poster)"));
    assert_eq!(back.rows()[0].get("comment"), Some(&FieldValue::Null));
    assert_eq!(back.rows()[1].text("decision"), Some("None"));
    assert_eq!(back.rows()[1].text("comment"), Some("None"));
}

#[test]
fn json_export_writes_sentinel_strings() {
    let loaded = load_notes::<NoteV2>(REVIEWS).unwrap();
    let decisions = load_notes::<NoteV2>(DECISIONS).unwrap().records();
    let rule = NoteV2::key_rule();
    let outcome = merge_with_rules(
        &loaded.records(),
        &decisions,
        &rule,
        &rule,
        &MergeOptions::with_right_fields(["decision"]),
    );
    let table = ColumnLayout::neurips_api2().tabulate_merged(&loaded.notes, outcome);

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("merged.json");
    table.write_json(&path).unwrap();
    let value: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
    assert_eq!(value[0]["decision"], "Accept (poster)");
    assert_eq!(value[1]["decision"], "None");
    assert_eq!(value[0]["rating"], 6);
}
