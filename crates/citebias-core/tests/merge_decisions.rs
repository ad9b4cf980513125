//! Review/decision merging over real-shaped OpenReview exports.

use citebias_core::merge::merge_with_rules;
use citebias_core::{FieldValue, MergeDiagnostic, MergeOptions, NoteV1, NoteV2, ReviewNote, load_notes};

const ICLR_REVIEWS: &str = r#"[
  {"id": "rA", "invitation": "ICLR.cc/2023/Conference/Paper12/-/Official_Review",
   "forum": "f12", "content": {"summary_of_the_review": "Solid.", "recommendation": "8"}},
  {"id": "rB", "invitation": "ICLR.cc/2023/Conference/Paper7/-/Official_Review",
   "forum": "f7", "content": {"summary_of_the_review": "Weak.", "recommendation": "3"}},
  {"id": "rC", "invitation": "ICLR.cc/2023/Conference/Paper12/-/Official_Review",
   "forum": "f12", "content": {"summary_of_the_review": "Fine.", "recommendation": "6"}}
]"#;

const ICLR_DECISIONS: &str = r#"[
  {"id": "d12", "invitation": "ICLR.cc/2023/Conference/Paper12/-/Decision",
   "content": {"decision": "Accept: poster", "metareview:_summary,_strengths_and_weaknesses": "Good paper."}},
  {"id": "d12b", "invitation": "ICLR.cc/2023/Conference/Paper12/-/Decision",
   "content": {"decision": "Reject"}}
]"#;

const NEURIPS_REVIEWS: &str = r#"[
  {"id": "n1", "invitations": ["NeurIPS.cc/2023/Conference/Submission44/-/Official_Review"],
   "content": {"summary": {"value": "Interesting."}, "rating": {"value": 7}}},
  {"id": "n2", "invitations": ["NeurIPS.cc/2023/Conference/-/Edit"],
   "content": {"summary": {"value": "No submission link."}}}
]"#;

const NEURIPS_DECISIONS: &str = r#"[
  {"id": "nd44", "invitations": ["NeurIPS.cc/2023/Conference/Submission44/-/Decision"],
   "content": {"decision": {"value": "Accept (spotlight)"}, "comment": {"value": "Nice."}}}
]"#;

#[test]
fn iclr_reviews_get_first_decision_or_absent() {
    let reviews = load_notes::<NoteV1>(ICLR_REVIEWS).unwrap().records();
    let decisions = load_notes::<NoteV1>(ICLR_DECISIONS).unwrap().records();
    let rule = NoteV1::key_rule();
    let options = MergeOptions::with_right_fields([
        "decision",
        "metareview:_summary,_strengths_and_weaknesses",
    ]);

    let out = merge_with_rules(&reviews, &decisions, &rule, &rule, &options);

    assert_eq!(out.records.len(), 3);
    let ids: Vec<_> = out.records.iter().map(|m| m.fields.text("id").unwrap()).collect();
    assert_eq!(ids, ["rA", "rB", "rC"]);

    assert_eq!(out.records[0].fields.text("decision"), Some("Accept: poster"));
    assert_eq!(out.records[2].fields.text("decision"), Some("Accept: poster"));
    assert_eq!(out.records[1].fields.get("decision"), Some(&FieldValue::Absent));
    assert_eq!(
        out.records[1]
            .fields
            .get("metareview:_summary,_strengths_and_weaknesses"),
        Some(&FieldValue::Absent)
    );

    assert_eq!(
        out.diagnostics
            .iter()
            .filter(|d| matches!(d, MergeDiagnostic::DuplicateKey { .. }))
            .count(),
        1
    );
}

#[test]
fn neurips_reviews_keep_keyless_rows() {
    let reviews = load_notes::<NoteV2>(NEURIPS_REVIEWS).unwrap().records();
    let decisions = load_notes::<NoteV2>(NEURIPS_DECISIONS).unwrap().records();
    let rule = NoteV2::key_rule();
    let options = MergeOptions::with_right_fields(["decision", "comment"]);

    let out = merge_with_rules(&reviews, &decisions, &rule, &rule, &options);

    assert_eq!(out.records.len(), 2);
    assert!(out.records[0].matched);
    assert_eq!(out.records[0].fields.text("decision"), Some("Accept (spotlight)"));
    assert_eq!(out.records[0].fields.text("comment"), Some("Nice."));
    assert_eq!(out.records[0].fields.get("rating"), Some(&FieldValue::Integer(7)));

    assert!(!out.records[1].matched);
    assert_eq!(out.records[1].fields.get("comment"), Some(&FieldValue::Absent));
    assert_eq!(out.unmatched_count(), 1);
}

#[test]
fn submission_key_matches_record_rule() {
    let loaded = load_notes::<NoteV2>(NEURIPS_REVIEWS).unwrap();
    let note = &loaded.notes[0];
    let record = note.to_record();
    assert_eq!(
        NoteV2::key_rule().derive(&record).unwrap(),
        note.submission_key().unwrap()
    );
}
