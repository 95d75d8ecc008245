
use serde_json::json;
use test_support::{request_ok, spawn_sidecar, temp_dir};

#[test]
fn a_level_best_three_principals_and_incomplete_status() {
    let workspace = temp_dir("shuled-alevel");
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
        json!({ "name": "Form 5 PCM", "form": 5, "level": "a_level" }),
    );
    let class_id = class
        .get("classId")
        .and_then(|v| v.as_str())
        .expect("classId")
        .to_string();

    let mut student_ids = Vec::new();
    for (i, adm) in ["P001", "P002"].iter().enumerate() {
        let created = request_ok(
            &mut stdin,
            &mut reader,
            &format!("3-{}", i),
            "students.create",
            json!({
                "classId": class_id,
                "admissionNo": adm,
                "lastName": "Candidate",
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

    // Principal combination plus a subsidiary General Studies.
    let subject_defs = [
        ("PHY", "Physics", true),
        ("CHE", "Chemistry", true),
        ("MAT", "Mathematics", true),
        ("KIS", "Kiswahili", true),
        ("GS", "General Studies", false),
    ];
    let mut subject_ids = std::collections::HashMap::new();
    for (i, (code, name, principal)) in subject_defs.iter().enumerate() {
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
                    "isPrincipal": principal
                }),
            );
        }
        subject_ids.insert(*code, subject_id);
    }

    let exam = request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "exams.create",
        json!({ "classId": class_id, "name": "Mock", "term": 1, "year": 2026 }),
    );
    let exam_id = exam
        .get("examId")
        .and_then(|v| v.as_str())
        .expect("examId")
        .to_string();

    // P001: Physics 70 (B,4), Chemistry 55 (D,2), Mathematics 82 (A,5),
    // Kiswahili 60 (C,3). Best three lowest-point principals: 2+3+4 = 9.
    // P002 has marks in only two principals and stays incomplete.
    let edits = json!([
        { "studentId": student_ids[0], "subjectId": subject_ids["PHY"], "value": 70.0 },
        { "studentId": student_ids[0], "subjectId": subject_ids["CHE"], "value": 55.0 },
        { "studentId": student_ids[0], "subjectId": subject_ids["MAT"], "value": 82.0 },
        { "studentId": student_ids[0], "subjectId": subject_ids["KIS"], "value": 60.0 },
        { "studentId": student_ids[0], "subjectId": subject_ids["GS"], "value": 50.0 },
        { "studentId": student_ids[1], "subjectId": subject_ids["PHY"], "value": 70.0 },
        { "studentId": student_ids[1], "subjectId": subject_ids["CHE"], "value": 55.0 }
    ]);
    let bulk = request_ok(
        &mut stdin,
        &mut reader,
        "7",
        "marks.bulkUpdate",
        json!({ "examId": exam_id, "edits": edits }),
    );
    assert_eq!(bulk.get("updated").and_then(|v| v.as_u64()), Some(7));

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

    let p1 = &per_student[0];
    let division = p1
        .get("summary")
        .and_then(|s| s.get("division"))
        .cloned()
        .expect("division");
    assert_eq!(
        division.get("status").and_then(|v| v.as_str()),
        Some("classified")
    );
    assert_eq!(division.get("bestPoints").and_then(|v| v.as_f64()), Some(9.0));
    assert_eq!(division.get("division").and_then(|v| v.as_str()), Some("I"));

    let p2 = &per_student[1];
    let division = p2
        .get("summary")
        .and_then(|s| s.get("division"))
        .cloned()
        .expect("division");
    assert_eq!(
        division.get("status").and_then(|v| v.as_str()),
        Some("incomplete")
    );
    assert_eq!(division.get("have").and_then(|v| v.as_u64()), Some(2));
    assert_eq!(division.get("need").and_then(|v| v.as_u64()), Some(3));

    let class_summary = model.get("classSummary").cloned().expect("classSummary");
    assert_eq!(
        class_summary
            .get("incompleteCount")
            .and_then(|v| v.as_u64()),
        Some(1)
    );
    assert_eq!(
        class_summary
            .get("divisionCounts")
            .and_then(|d| d.get("I"))
            .and_then(|v| v.as_u64()),
        Some(1)
    );
    // The one classified candidate made Division I.
    assert_eq!(
        class_summary.get("passRate").and_then(|v| v.as_f64()),
        Some(1.0)
    );

    // The single-student report matches the cohort row.
    let single = request_ok(
        &mut stdin,
        &mut reader,
        "9",
        "reports.studentSummary",
        json!({
            "classId": class_id,
            "examId": exam_id,
            "studentId": student_ids[0]
        }),
    );
    assert_eq!(
        single
            .get("summary")
            .and_then(|s| s.get("rank"))
            .and_then(|v| v.as_u64()),
        Some(1)
    );
    assert_eq!(
        single
            .get("summary")
            .and_then(|s| s.get("totalPoints"))
            .and_then(|v| v.as_f64()),
        // 4 + 2 + 5 + 3 principals plus General Studies 50 -> D (2).
        Some(16.0)
    );
}
