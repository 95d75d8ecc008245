
use serde_json::json;
use test_support::{request_ok, spawn_sidecar, temp_dir};

const SUBJECTS: [(&str, &str); 7] = [
    ("CIV", "Civics"),
    ("HIS", "History"),
    ("GEO", "Geography"),
    ("KIS", "Kiswahili"),
    ("ENG", "English"),
    ("MAT", "Mathematics"),
    ("BIO", "Biology"),
];

#[test]
fn o_level_exam_summary_computes_grades_divisions_and_ranks() {
    let workspace = temp_dir("shuled-exam-summary");
    let (_child, mut stdin, mut reader) = spawn_sidecar();

    request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let class = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "classes.create",
        json!({ "name": "Form 4A", "form": 4, "level": "o_level" }),
    );
    let class_id = class
        .get("classId")
        .and_then(|v| v.as_str())
        .expect("classId")
        .to_string();

    let mut student_ids = Vec::new();
    for (i, adm) in ["A001", "A002"].iter().enumerate() {
        let created = request_ok(
            &mut stdin,
            &mut reader,
            &format!("3-{}", i),
            "students.create",
            json!({
                "classId": class_id,
                "admissionNo": adm,
                "lastName": "Student",
                "firstName": adm
            }),
        );
        student_ids.push(
            created
                .get("studentId")
                .and_then(|v| v.as_str())
                .expect("studentId")
                .to_string(),
        );
    }

    let mut subject_ids = Vec::new();
    for (i, (code, name)) in SUBJECTS.iter().enumerate() {
        let created = request_ok(
            &mut stdin,
            &mut reader,
            &format!("4-{}", i),
            "subjects.create",
            json!({ "code": code, "name": name }),
        );
        let subject_id = created
            .get("subjectId")
            .and_then(|v| v.as_str())
            .expect("subjectId")
            .to_string();
        for (j, student_id) in student_ids.iter().enumerate() {
            request_ok(
                &mut stdin,
                &mut reader,
                &format!("5-{}-{}", i, j),
                "subjects.register",
                json!({
                    "classId": class_id,
                    "studentId": student_id,
                    "subjectId": subject_id,
                    "isCompulsory": true
                }),
            );
        }
        subject_ids.push(subject_id);
    }

    let exam = request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "exams.create",
        json!({ "classId": class_id, "name": "Terminal", "term": 2, "year": 2026 }),
    );
    let exam_id = exam
        .get("examId")
        .and_then(|v| v.as_str())
        .expect("examId")
        .to_string();

    // A001 scores 80 across the board, A002 scores 25 across the board.
    let mut edits = Vec::new();
    for subject_id in &subject_ids {
        edits.push(json!({
            "studentId": student_ids[0],
            "subjectId": subject_id,
            "value": 80.0
        }));
        edits.push(json!({
            "studentId": student_ids[1],
            "subjectId": subject_id,
            "value": 25.0
        }));
    }
    let bulk = request_ok(
        &mut stdin,
        &mut reader,
        "7",
        "marks.bulkUpdate",
        json!({ "examId": exam_id, "edits": edits }),
    );
    assert_eq!(bulk.get("updated").and_then(|v| v.as_u64()), Some(14));

    let model = request_ok(
        &mut stdin,
        &mut reader,
        "8",
        "reports.examSummary",
        json!({ "classId": class_id, "examId": exam_id }),
    );

    let per_student = model
        .get("perStudent")
        .and_then(|v| v.as_array())
        .cloned()
        .unwrap_or_default();
    assert_eq!(per_student.len(), 2);

    let top = &per_student[0];
    assert_eq!(
        top.get("summary")
            .and_then(|s| s.get("averageMarks"))
            .and_then(|v| v.as_f64()),
        Some(80.0)
    );
    assert_eq!(
        top.get("summary")
            .and_then(|s| s.get("rank"))
            .and_then(|v| v.as_u64()),
        Some(1)
    );
    let top_division = top
        .get("summary")
        .and_then(|s| s.get("division"))
        .cloned()
        .expect("division");
    assert_eq!(
        top_division.get("status").and_then(|v| v.as_str()),
        Some("classified")
    );
    // Seven straight As at one point each.
    assert_eq!(
        top_division.get("bestPoints").and_then(|v| v.as_f64()),
        Some(7.0)
    );
    assert_eq!(
        top_division.get("division").and_then(|v| v.as_str()),
        Some("I")
    );
    let top_grades: Vec<&str> = top
        .get("subjects")
        .and_then(|v| v.as_array())
        .map(|rows| {
            rows.iter()
                .filter_map(|r| r.get("grade").and_then(|v| v.as_str()))
                .collect()
        })
        .unwrap_or_default();
    assert_eq!(top_grades, vec!["A"; 7]);

    let bottom = &per_student[1];
    let bottom_division = bottom
        .get("summary")
        .and_then(|s| s.get("division"))
        .cloned()
        .expect("division");
    // Straight Fs: 35 points, outside every CSEE band.
    assert_eq!(
        bottom_division.get("division").and_then(|v| v.as_str()),
        Some("0")
    );
    assert_eq!(
        bottom
            .get("summary")
            .and_then(|s| s.get("rank"))
            .and_then(|v| v.as_u64()),
        Some(2)
    );

    let class_summary = model.get("classSummary").cloned().expect("classSummary");
    assert_eq!(
        class_summary
            .get("divisionCounts")
            .and_then(|d| d.get("I"))
            .and_then(|v| v.as_u64()),
        Some(1)
    );
    assert_eq!(
        class_summary
            .get("divisionCounts")
            .and_then(|d| d.get("0"))
            .and_then(|v| v.as_u64()),
        Some(1)
    );
    assert_eq!(
        class_summary
            .get("incompleteCount")
            .and_then(|v| v.as_u64()),
        Some(0)
    );
    assert_eq!(
        class_summary.get("passRate").and_then(|v| v.as_f64()),
        Some(0.5)
    );
    assert_eq!(
        class_summary.get("classAverage").and_then(|v| v.as_f64()),
        Some(52.5)
    );

    let subjects = class_summary
        .get("subjects")
        .and_then(|v| v.as_array())
        .cloned()
        .unwrap_or_default();
    assert_eq!(subjects.len(), 7);
    let civics = subjects
        .iter()
        .find(|s| s.get("subjectName").and_then(|v| v.as_str()) == Some("Civics"))
        .expect("civics distribution");
    assert_eq!(civics.get("registered").and_then(|v| v.as_u64()), Some(2));
    assert_eq!(civics.get("sat").and_then(|v| v.as_u64()), Some(2));
    assert_eq!(civics.get("passCount").and_then(|v| v.as_u64()), Some(1));
    assert_eq!(
        civics
            .get("gradeCounts")
            .and_then(|g| g.get("A"))
            .and_then(|v| v.as_u64()),
        Some(1)
    );
    assert_eq!(
        civics
            .get("gradeCounts")
            .and_then(|g| g.get("F"))
            .and_then(|v| v.as_u64()),
        Some(1)
    );
    // O-Level points: one A (1) and one F (5) average to 3.
    assert_eq!(
        civics.get("meanPoints").and_then(|v| v.as_f64()),
        Some(3.0)
    );
}
