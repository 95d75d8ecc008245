use crate::grading::{self, Level};
use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use std::collections::HashMap;
use uuid::Uuid;

const BULK_UPDATE_MAX_EDITS: usize = 5000;

struct HandlerErr {
    code: &'static str,
    message: String,
    details: Option<serde_json::Value>,
}

impl HandlerErr {
    fn response(self, id: &str) -> serde_json::Value {
        err(id, self.code, self.message, self.details)
    }
}

/// Resolves an edit to (stored value, status). Marks live on a 0-100 scale;
/// an explicit `absent` state or a null value clears the cell. Out-of-range
/// values are rejected here so nothing invalid ever reaches the grade tables.
fn resolve_mark_state(
    explicit_state: Option<&str>,
    value: Option<f64>,
) -> Result<(Option<f64>, &'static str), HandlerErr> {
    if let Some(v) = value {
        if !(0.0..=100.0).contains(&v) {
            return Err(HandlerErr {
                code: "bad_params",
                message: "marks must lie in 0..=100".to_string(),
                details: Some(json!({ "value": v })),
            });
        }
    }

    match explicit_state.map(|s| s.to_ascii_lowercase()) {
        Some(s) if s == "absent" => Ok((None, "absent")),
        Some(s) if s == "scored" => {
            let Some(v) = value else {
                return Err(HandlerErr {
                    code: "bad_params",
                    message: "scored state requires a numeric value".to_string(),
                    details: None,
                });
            };
            Ok((Some(v), "scored"))
        }
        Some(other) => Err(HandlerErr {
            code: "bad_params",
            message: "state must be one of: scored, absent".to_string(),
            details: Some(json!({ "state": other })),
        }),
        None => match value {
            Some(v) => Ok((Some(v), "scored")),
            None => Ok((None, "absent")),
        },
    }
}

fn exam_class(conn: &Connection, exam_id: &str) -> Result<String, HandlerErr> {
    let class_id: Option<String> = conn
        .query_row("SELECT class_id FROM exams WHERE id = ?", [exam_id], |r| {
            r.get(0)
        })
        .optional()
        .map_err(|e| HandlerErr {
            code: "db_query_failed",
            message: e.to_string(),
            details: None,
        })?;
    class_id.ok_or_else(|| HandlerErr {
        code: "not_found",
        message: "exam not found".to_string(),
        details: None,
    })
}

fn require_registration(
    conn: &Connection,
    class_id: &str,
    student_id: &str,
    subject_id: &str,
) -> Result<(), HandlerErr> {
    let found: Option<i64> = conn
        .query_row(
            "SELECT 1 FROM registrations
             WHERE class_id = ? AND student_id = ? AND subject_id = ?",
            (class_id, student_id, subject_id),
            |r| r.get(0),
        )
        .optional()
        .map_err(|e| HandlerErr {
            code: "db_query_failed",
            message: e.to_string(),
            details: None,
        })?;
    if found.is_none() {
        return Err(HandlerErr {
            code: "not_found",
            message: "student is not registered for subject".to_string(),
            details: Some(json!({ "studentId": student_id, "subjectId": subject_id })),
        });
    }
    Ok(())
}

fn upsert_mark(
    conn: &Connection,
    exam_id: &str,
    student_id: &str,
    subject_id: &str,
    value: Option<f64>,
    status: &str,
) -> Result<(), HandlerErr> {
    let mark_id = Uuid::new_v4().to_string();
    let now = chrono::Utc::now().to_rfc3339();
    conn.execute(
        "INSERT INTO marks(id, exam_id, student_id, subject_id, marks, status, updated_at)
         VALUES(?, ?, ?, ?, ?, ?, ?)
         ON CONFLICT(exam_id, student_id, subject_id) DO UPDATE SET
           marks = excluded.marks,
           status = excluded.status,
           updated_at = excluded.updated_at",
        (&mark_id, exam_id, student_id, subject_id, value, status, &now),
    )
    .map_err(|e| HandlerErr {
        code: "db_insert_failed",
        message: e.to_string(),
        details: Some(json!({ "table": "marks" })),
    })?;
    Ok(())
}

fn handle_marks_grid(state: &mut AppState, req: &Request) -> serde_json::Value {
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
    match exam_class(conn, &exam_id) {
        Ok(owner) if owner == class_id => {}
        Ok(_) => return err(&req.id, "bad_params", "exam does not belong to class", None),
        Err(e) => return e.response(&req.id),
    }

    let level_raw: Option<String> = match conn
        .query_row("SELECT level FROM classes WHERE id = ?", [&class_id], |r| {
            r.get(0)
        })
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let Some(level) = level_raw.as_deref().and_then(Level::parse) else {
        return err(&req.id, "bad_state", "class has unknown level", None);
    };

    let mut student_stmt = match conn.prepare(
        "SELECT id, admission_no, last_name, first_name
         FROM students WHERE class_id = ? ORDER BY sort_order",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let students = match student_stmt
        .query_map([&class_id], |row| {
            let id: String = row.get(0)?;
            let admission_no: String = row.get(1)?;
            let last: String = row.get(2)?;
            let first: String = row.get(3)?;
            Ok((id, admission_no, format!("{}, {}", last, first)))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    // Columns are the union of subjects registered anywhere in the class.
    let mut subject_stmt = match conn.prepare(
        "SELECT DISTINCT s.id, s.code, s.name
         FROM registrations r JOIN subjects s ON s.id = r.subject_id
         WHERE r.class_id = ?
         ORDER BY s.name, s.id",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let subjects = match subject_stmt
        .query_map([&class_id], |row| {
            let id: String = row.get(0)?;
            let code: String = row.get(1)?;
            let name: String = row.get(2)?;
            Ok((id, code, name))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let mut registered: HashMap<(String, String), ()> = HashMap::new();
    {
        let mut reg_stmt = match conn
            .prepare("SELECT student_id, subject_id FROM registrations WHERE class_id = ?")
        {
            Ok(s) => s,
            Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
        };
        let regs = reg_stmt
            .query_map([&class_id], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
            })
            .and_then(|it| it.collect::<Result<Vec<_>, _>>());
        match regs {
            Ok(pairs) => {
                for pair in pairs {
                    registered.insert(pair, ());
                }
            }
            Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
        }
    }

    let mut mark_by_pair: HashMap<(String, String), (Option<f64>, String)> = HashMap::new();
    {
        let mut mark_stmt = match conn
            .prepare("SELECT student_id, subject_id, marks, status FROM marks WHERE exam_id = ?")
        {
            Ok(s) => s,
            Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
        };
        let rows = mark_stmt
            .query_map([&exam_id], |row| {
                let student_id: String = row.get(0)?;
                let subject_id: String = row.get(1)?;
                let value: Option<f64> = row.get(2)?;
                let status: String = row.get(3)?;
                Ok((student_id, subject_id, value, status))
            })
            .and_then(|it| it.collect::<Result<Vec<_>, _>>());
        match rows {
            Ok(v) => {
                for (student_id, subject_id, value, status) in v {
                    mark_by_pair.insert((student_id, subject_id), (value, status));
                }
            }
            Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
        }
    }

    let mut rows_out = Vec::with_capacity(students.len());
    for (student_id, admission_no, display_name) in &students {
        let mut cells = Vec::with_capacity(subjects.len());
        for (subject_id, _, _) in &subjects {
            let key = (student_id.clone(), subject_id.clone());
            if !registered.contains_key(&key) {
                cells.push(json!(null));
                continue;
            }
            match mark_by_pair.get(&key) {
                Some((value, status)) => {
                    // Live grade preview, the same lookup the reports use.
                    let grade = if status.as_str() == "scored" {
                        grading::grade_for(*value, level).map(|g| g.code())
                    } else {
                        None
                    };
                    cells.push(json!({
                        "value": value,
                        "status": status,
                        "grade": grade
                    }));
                }
                None => cells.push(json!({ "value": null, "status": "absent", "grade": null })),
            }
        }
        rows_out.push(json!({
            "studentId": student_id,
            "admissionNo": admission_no,
            "displayName": display_name,
            "cells": cells
        }));
    }

    ok(
        &req.id,
        json!({
            "subjects": subjects
                .iter()
                .map(|(id, code, name)| json!({ "id": id, "code": code, "name": name }))
                .collect::<Vec<_>>(),
            "rows": rows_out
        }),
    )
}

fn handle_marks_update_cell(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let exam_id = match req.params.get("examId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing examId", None),
    };
    let student_id = match req.params.get("studentId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing studentId", None),
    };
    let subject_id = match req.params.get("subjectId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing subjectId", None),
    };

    let state_value = req.params.get("state").and_then(|v| v.as_str());
    let value = req.params.get("value").and_then(|v| v.as_f64());
    let (stored, status) = match resolve_mark_state(state_value, value) {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };

    let class_id = match exam_class(conn, &exam_id) {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };
    if let Err(e) = require_registration(conn, &class_id, &student_id, &subject_id) {
        return e.response(&req.id);
    }
    if let Err(e) = upsert_mark(conn, &exam_id, &student_id, &subject_id, stored, status) {
        return e.response(&req.id);
    }

    ok(&req.id, json!({ "ok": true }))
}

fn handle_marks_bulk_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let exam_id = match req.params.get("examId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing examId", None),
    };
    let Some(edits_arr) = req.params.get("edits").and_then(|v| v.as_array()) else {
        return err(&req.id, "bad_params", "missing edits[]", None);
    };

    if edits_arr.len() > BULK_UPDATE_MAX_EDITS {
        let rejected = edits_arr.len();
        return ok(
            &req.id,
            json!({
                "ok": true,
                "updated": 0,
                "rejected": rejected,
                "limitExceeded": true,
                "errors": [{
                    "index": -1,
                    "code": "too_many_edits",
                    "message": format!(
                        "bulk payload exceeds max edits: {} > {}",
                        rejected, BULK_UPDATE_MAX_EDITS
                    )
                }]
            }),
        );
    }

    let class_id = match exam_class(conn, &exam_id) {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };

    let mut updated: usize = 0;
    let mut errors: Vec<serde_json::Value> = Vec::new();

    for (i, edit) in edits_arr.iter().enumerate() {
        let Some(obj) = edit.as_object() else {
            errors.push(json!({
                "index": i,
                "code": "bad_params",
                "message": format!("edit at index {} must be an object", i),
            }));
            continue;
        };

        let Some(student_id) = obj.get("studentId").and_then(|v| v.as_str()) else {
            errors.push(json!({
                "index": i,
                "code": "bad_params",
                "message": format!("edit at index {} missing studentId", i),
            }));
            continue;
        };
        let Some(subject_id) = obj.get("subjectId").and_then(|v| v.as_str()) else {
            errors.push(json!({
                "index": i,
                "code": "bad_params",
                "message": format!("edit at index {} missing subjectId", i),
            }));
            continue;
        };

        let state_value = obj.get("state").and_then(|v| v.as_str());
        let value = obj.get("value").and_then(|v| v.as_f64());

        let (stored, status) = match resolve_mark_state(state_value, value) {
            Ok(v) => v,
            Err(e) => {
                errors.push(json!({
                    "index": i,
                    "code": e.code,
                    "message": e.message,
                }));
                continue;
            }
        };

        if let Err(e) = require_registration(conn, &class_id, student_id, subject_id) {
            errors.push(json!({
                "index": i,
                "code": e.code,
                "message": e.message,
            }));
            continue;
        }

        match upsert_mark(conn, &exam_id, student_id, subject_id, stored, status) {
            Ok(()) => updated += 1,
            Err(e) => errors.push(json!({
                "index": i,
                "code": e.code,
                "message": e.message,
            })),
        }
    }

    let rejected = errors.len();
    let mut result = json!({ "ok": true, "updated": updated });
    if rejected > 0 {
        if let Some(map) = result.as_object_mut() {
            map.insert("rejected".into(), json!(rejected));
            map.insert("errors".into(), json!(errors));
        }
    }

    ok(&req.id, result)
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "marks.grid" => Some(handle_marks_grid(state, req)),
        "marks.updateCell" => Some(handle_marks_update_cell(state, req)),
        "marks.bulkUpdate" => Some(handle_marks_bulk_update(state, req)),
        _ => None,
    }
}
