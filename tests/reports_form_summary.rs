
use serde_json::json;
use std::io::BufReader;
use std::process::{ChildStdin, ChildStdout};
use test_support::{error_code, request_err, request_ok, spawn_sidecar, temp_dir};

const SUBJECTS: [(&str, &str); 7] = [
    ("CIV", "Civics"),
    ("HIS", "History"),
    ("GEO", "Geography"),
    ("KIS", "Kiswahili"),
    ("ENG", "English"),
    ("MAT", "Mathematics"),
    ("BIO", "Biology"),
];

fn seed_class_with_student(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    tag: &str,
    class_name: &str,
    adm: &str,
    subject_ids: &[String],
    marks: f64,
) -> String {
    let class = request_ok(
        stdin,
        reader,
        &format!("{}-class", tag),
        "classes.create",
        json!({ "name": class_name, "form": 4, "level": "o_level" }),
    );
    let class_id = class
        .get("classId")
        .and_then(|v| v.as_str())
        .expect("classId")
        .to_string();
    let student = request_ok(
        stdin,
        reader,
        &format!("{}-student", tag),
        "students.create",
        json!({
            "classId": class_id,
            "admissionNo": adm,
            "lastName": "Student",
            "firstName": adm
        }),
    );
    let student_id = student
        .get("studentId")
        .and_then(|v| v.as_str())
        .expect("studentId")
        .to_string();
    for (i, subject_id) in subject_ids.iter().enumerate() {
        request_ok(
            stdin,
            reader,
            &format!("{}-reg-{}", tag, i),
            "subjects.register",
            json!({
                "classId": class_id,
                "studentId": student_id,
                "subjectId": subject_id
            }),
        );
    }
    let exam = request_ok(
        stdin,
        reader,
        &format!("{}-exam", tag),
        "exams.create",
        json!({ "classId": class_id, "name": "Annual", "term": 3, "year": 2026 }),
    );
    let exam_id = exam
        .get("examId")
        .and_then(|v| v.as_str())
        .expect("examId")
        .to_string();
    let edits: Vec<serde_json::Value> = subject_ids
        .iter()
        .map(|subject_id| {
            json!({
                "studentId": student_id,
                "subjectId": subject_id,
                "value": marks
            })
        })
        .collect();
    request_ok(
        stdin,
        reader,
        &format!("{}-marks", tag),
        "marks.bulkUpdate",
        json!({ "examId": exam_id, "edits": edits }),
    );
    class_id
}

#[test]
fn form_summary_merges_classes_sitting_the_same_exam() {
    let workspace = temp_dir("shuled-form");
    let (_child, mut stdin, mut reader) = spawn_sidecar();

    request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );

    let mut subject_ids = Vec::new();
    for (i, (code, name)) in SUBJECTS.iter().enumerate() {
        let created = request_ok(
            &mut stdin,
            &mut reader,
            &format!("2-{}", i),
            "subjects.create",
            json!({ "code": code, "name": name }),
        );
        subject_ids.push(
            created
                .get("subjectId")
                .and_then(|v| v.as_str())
                .expect("subjectId")
                .to_string(),
        );
    }

    // 4A's candidate sweeps As (7 points, Division I); 4B's sits on straight
    // Ds (28 points, Division IV).
    seed_class_with_student(
        &mut stdin,
        &mut reader,
        "a",
        "Form 4A",
        "A001",
        &subject_ids,
        80.0,
    );
    seed_class_with_student(
        &mut stdin,
        &mut reader,
        "b",
        "Form 4B",
        "B001",
        &subject_ids,
        40.0,
    );

    let merged = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "reports.formSummary",
        json!({ "form": 4, "examName": "Annual", "year": 2026 }),
    );
    assert_eq!(merged.get("studentCount").and_then(|v| v.as_u64()), Some(2));
    assert_eq!(
        merged
            .get("classes")
            .and_then(|v| v.as_array())
            .map(|v| v.len()),
        Some(2)
    );
    assert_eq!(
        merged
            .get("divisionCounts")
            .and_then(|d| d.get("I"))
            .and_then(|v| v.as_u64()),
        Some(1)
    );
    assert_eq!(
        merged
            .get("divisionCounts")
            .and_then(|d| d.get("IV"))
            .and_then(|v| v.as_u64()),
        Some(1)
    );
    assert_eq!(
        merged.get("passRate").and_then(|v| v.as_f64()),
        Some(0.5)
    );
    // Form average of the two candidates' 80.0 and 40.0 averages.
    assert_eq!(
        merged.get("formAverage").and_then(|v| v.as_f64()),
        Some(60.0)
    );

    let error = request_err(
        &mut stdin,
        &mut reader,
        "4",
        "reports.formSummary",
        json!({ "form": 4, "examName": "Annual", "year": 2031 }),
    );
    assert_eq!(error_code(&error), "not_found");
}
