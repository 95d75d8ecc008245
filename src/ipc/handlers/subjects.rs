use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use rusqlite::OptionalExtension;
use serde_json::json;
use uuid::Uuid;

fn handle_subjects_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return ok(&req.id, json!({ "subjects": [] }));
    };

    let mut stmt = match conn.prepare("SELECT id, code, name FROM subjects ORDER BY name, code") {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let rows = stmt
        .query_map([], |row| {
            let id: String = row.get(0)?;
            let code: String = row.get(1)?;
            let name: String = row.get(2)?;
            Ok(json!({ "id": id, "code": code, "name": name }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(subjects) => ok(&req.id, json!({ "subjects": subjects })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_subjects_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let code = match req.params.get("code").and_then(|v| v.as_str()) {
        Some(v) => v.trim().to_ascii_uppercase(),
        None => return err(&req.id, "bad_params", "missing code", None),
    };
    let name = match req.params.get("name").and_then(|v| v.as_str()) {
        Some(v) => v.trim().to_string(),
        None => return err(&req.id, "bad_params", "missing name", None),
    };
    if code.is_empty() || name.is_empty() {
        return err(&req.id, "bad_params", "code and name must not be empty", None);
    }

    let subject_id = Uuid::new_v4().to_string();
    if let Err(e) = conn.execute(
        "INSERT INTO subjects(id, code, name) VALUES(?, ?, ?)",
        (&subject_id, &code, &name),
    ) {
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "subjects", "code": code })),
        );
    }

    ok(&req.id, json!({ "subjectId": subject_id, "code": code }))
}

fn handle_subjects_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let subject_id = match req.params.get("subjectId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing subjectId", None),
    };

    // Refuse while marks reference the subject; the caller must clear them.
    let mark_count: i64 = match conn.query_row(
        "SELECT COUNT(*) FROM marks WHERE subject_id = ?",
        [&subject_id],
        |r| r.get(0),
    ) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if mark_count > 0 {
        return err(
            &req.id,
            "bad_params",
            "subject still has marks recorded",
            Some(json!({ "markCount": mark_count })),
        );
    }

    let tx = match conn.unchecked_transaction() {
        Ok(t) => t,
        Err(e) => return err(&req.id, "db_tx_failed", e.to_string(), None),
    };
    for (sql, table) in [
        (
            "DELETE FROM registrations WHERE subject_id = ?",
            "registrations",
        ),
        ("DELETE FROM subjects WHERE id = ?", "subjects"),
    ] {
        if let Err(e) = tx.execute(sql, [&subject_id]) {
            let _ = tx.rollback();
            return err(
                &req.id,
                "db_delete_failed",
                e.to_string(),
                Some(json!({ "table": table })),
            );
        }
    }
    if let Err(e) = tx.commit() {
        return err(&req.id, "db_tx_failed", e.to_string(), None);
    }

    ok(&req.id, json!({ "ok": true }))
}

fn handle_subjects_register(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let class_id = match req.params.get("classId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing classId", None),
    };
    let student_id = match req.params.get("studentId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing studentId", None),
    };
    let subject_id = match req.params.get("subjectId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing subjectId", None),
    };
    let is_principal = req
        .params
        .get("isPrincipal")
        .and_then(|v| v.as_bool())
        .unwrap_or(false);
    let is_compulsory = req
        .params
        .get("isCompulsory")
        .and_then(|v| v.as_bool())
        .unwrap_or(false);

    let student_in_class: Option<i64> = match conn
        .query_row(
            "SELECT 1 FROM students WHERE id = ? AND class_id = ?",
            (&student_id, &class_id),
            |r| r.get(0),
        )
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if student_in_class.is_none() {
        return err(&req.id, "not_found", "student not found in class", None);
    }
    let subject_exists: Option<i64> = match conn
        .query_row("SELECT 1 FROM subjects WHERE id = ?", [&subject_id], |r| {
            r.get(0)
        })
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if subject_exists.is_none() {
        return err(&req.id, "not_found", "subject not found", None);
    }

    // Re-registering the same pair updates the combination flags in place.
    let registration_id = Uuid::new_v4().to_string();
    if let Err(e) = conn.execute(
        "INSERT INTO registrations(id, class_id, student_id, subject_id, is_principal, is_compulsory)
         VALUES(?, ?, ?, ?, ?, ?)
         ON CONFLICT(student_id, subject_id) DO UPDATE SET
           is_principal = excluded.is_principal,
           is_compulsory = excluded.is_compulsory",
        (
            &registration_id,
            &class_id,
            &student_id,
            &subject_id,
            is_principal as i64,
            is_compulsory as i64,
        ),
    ) {
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "registrations" })),
        );
    }

    ok(&req.id, json!({ "ok": true }))
}

fn handle_subjects_unregister(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let student_id = match req.params.get("studentId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing studentId", None),
    };
    let subject_id = match req.params.get("subjectId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing subjectId", None),
    };

    match conn.execute(
        "DELETE FROM registrations WHERE student_id = ? AND subject_id = ?",
        (&student_id, &subject_id),
    ) {
        Ok(0) => err(&req.id, "not_found", "registration not found", None),
        Ok(_) => ok(&req.id, json!({ "ok": true })),
        Err(e) => err(
            &req.id,
            "db_delete_failed",
            e.to_string(),
            Some(json!({ "table": "registrations" })),
        ),
    }
}

fn handle_subjects_registrations(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let class_id = match req.params.get("classId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing classId", None),
    };
    let student_id = req
        .params
        .get("studentId")
        .and_then(|v| v.as_str())
        .map(|v| v.to_string());

    let sql = "SELECT r.student_id, r.subject_id, s.code, s.name, r.is_principal, r.is_compulsory
               FROM registrations r
               JOIN subjects s ON s.id = r.subject_id
               WHERE r.class_id = ?
               ORDER BY r.student_id, s.name";
    let mut stmt = match conn.prepare(sql) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let rows = stmt
        .query_map([&class_id], |row| {
            let student_id: String = row.get(0)?;
            let subject_id: String = row.get(1)?;
            let code: String = row.get(2)?;
            let name: String = row.get(3)?;
            let is_principal: i64 = row.get(4)?;
            let is_compulsory: i64 = row.get(5)?;
            Ok(json!({
                "studentId": student_id,
                "subjectId": subject_id,
                "subjectCode": code,
                "subjectName": name,
                "isPrincipal": is_principal != 0,
                "isCompulsory": is_compulsory != 0
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    let mut registrations = match rows {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if let Some(sid) = student_id {
        registrations.retain(|r| r.get("studentId").and_then(|v| v.as_str()) == Some(sid.as_str()));
    }

    ok(&req.id, json!({ "registrations": registrations }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "subjects.list" => Some(handle_subjects_list(state, req)),
        "subjects.create" => Some(handle_subjects_create(state, req)),
        "subjects.delete" => Some(handle_subjects_delete(state, req)),
        "subjects.register" => Some(handle_subjects_register(state, req)),
        "subjects.unregister" => Some(handle_subjects_unregister(state, req)),
        "subjects.registrations" => Some(handle_subjects_registrations(state, req)),
        _ => None,
    }
}
