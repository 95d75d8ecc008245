use crate::import;
use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use rusqlite::OptionalExtension;
use serde_json::json;
use std::collections::HashMap;
use std::path::PathBuf;
use uuid::Uuid;

fn handle_marks_import_csv(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let class_id = match req.params.get("classId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing classId", None),
    };
    let exam_id = match req.params.get("examId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing examId", None),
    };
    let path = match req.params.get("path").and_then(|v| v.as_str()) {
        Some(v) => PathBuf::from(v),
        None => return err(&req.id, "bad_params", "missing path", None),
    };

    let exam_owner: Option<String> = match conn
        .query_row("SELECT class_id FROM exams WHERE id = ?", [&exam_id], |r| {
            r.get(0)
        })
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    match exam_owner {
        Some(owner) if owner == class_id => {}
        Some(_) => return err(&req.id, "bad_params", "exam does not belong to class", None),
        None => return err(&req.id, "not_found", "exam not found", None),
    }

    let parsed = match import::read_marks_csv(&path) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "io_failed", format!("{e:?}"), None),
    };

    // Resolve admission numbers and subject codes once per file.
    let mut students_by_adm: HashMap<String, String> = HashMap::new();
    {
        let mut stmt = match conn
            .prepare("SELECT admission_no, id FROM students WHERE class_id = ?")
        {
            Ok(s) => s,
            Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
        };
        let rows = stmt
            .query_map([&class_id], |r| {
                Ok((r.get::<_, String>(0)?, r.get::<_, String>(1)?))
            })
            .and_then(|it| it.collect::<Result<Vec<_>, _>>());
        match rows {
            Ok(v) => students_by_adm.extend(v),
            Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
        }
    }
    let mut subjects_by_code: HashMap<String, String> = HashMap::new();
    {
        let mut stmt = match conn.prepare("SELECT code, id FROM subjects") {
            Ok(s) => s,
            Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
        };
        let rows = stmt
            .query_map([], |r| Ok((r.get::<_, String>(0)?, r.get::<_, String>(1)?)))
            .and_then(|it| it.collect::<Result<Vec<_>, _>>());
        match rows {
            Ok(v) => subjects_by_code.extend(v),
            Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
        }
    }

    let mut applied = 0_usize;
    let mut errors: Vec<serde_json::Value> = parsed
        .errors
        .iter()
        .map(|e| json!({ "line": e.line, "message": e.message }))
        .collect();

    let now = chrono::Utc::now().to_rfc3339();
    for row in &parsed.rows {
        let Some(student_id) = students_by_adm.get(&row.admission_no) else {
            errors.push(json!({
                "line": row.line,
                "message": format!("unknown admission number: {}", row.admission_no),
            }));
            continue;
        };
        let Some(subject_id) = subjects_by_code.get(&row.subject_code) else {
            errors.push(json!({
                "line": row.line,
                "message": format!("unknown subject code: {}", row.subject_code),
            }));
            continue;
        };

        let registered: Option<i64> = match conn
            .query_row(
                "SELECT 1 FROM registrations WHERE student_id = ? AND subject_id = ?",
                (student_id, subject_id),
                |r| r.get(0),
            )
            .optional()
        {
            Ok(v) => v,
            Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
        };
        if registered.is_none() {
            errors.push(json!({
                "line": row.line,
                "message": format!(
                    "{} is not registered for {}",
                    row.admission_no, row.subject_code
                ),
            }));
            continue;
        }

        let status = if row.marks.is_some() { "scored" } else { "absent" };
        let mark_id = Uuid::new_v4().to_string();
        let res = conn.execute(
            "INSERT INTO marks(id, exam_id, student_id, subject_id, marks, status, updated_at)
             VALUES(?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(exam_id, student_id, subject_id) DO UPDATE SET
               marks = excluded.marks,
               status = excluded.status,
               updated_at = excluded.updated_at",
            (
                &mark_id,
                &exam_id,
                student_id,
                subject_id,
                row.marks,
                status,
                &now,
            ),
        );
        match res {
            Ok(_) => applied += 1,
            Err(e) => errors.push(json!({
                "line": row.line,
                "message": e.to_string(),
            })),
        }
    }

    ok(
        &req.id,
        json!({
            "applied": applied,
            "rejected": errors.len(),
            "errors": errors
        }),
    )
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "marks.importCsv" => Some(handle_marks_import_csv(state, req)),
        _ => None,
    }
}
