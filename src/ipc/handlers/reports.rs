use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use crate::summary;
use rusqlite::Connection;
use serde_json::json;

fn required_str(req: &Request, key: &str) -> Result<String, serde_json::Value> {
    req.params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|v| v.to_string())
        .ok_or_else(|| err(&req.id, "bad_params", format!("missing {}", key), None))
}

fn db_conn<'a>(state: &'a AppState, req: &Request) -> Result<&'a Connection, serde_json::Value> {
    state
        .db
        .as_ref()
        .ok_or_else(|| err(&req.id, "no_workspace", "select a workspace first", None))
}

fn calc_err(req: &Request, e: summary::CalcError) -> serde_json::Value {
    err(
        &req.id,
        &e.code,
        e.message,
        e.details.map(|d| json!(d)).or(None),
    )
}

fn calc_context<'a>(
    conn: &'a Connection,
    class_id: &'a str,
    exam_id: &'a str,
) -> summary::CalcContext<'a> {
    summary::CalcContext {
        conn,
        class_id,
        exam_id,
    }
}

fn handle_reports_exam_summary(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let class_id = match required_str(req, "classId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let exam_id = match required_str(req, "examId") {
        Ok(v) => v,
        Err(e) => return e,
    };

    match summary::compute_exam_summary(&calc_context(conn, &class_id, &exam_id)) {
        Ok(model) => ok(&req.id, json!(model)),
        Err(e) => calc_err(req, e),
    }
}

fn handle_reports_student_summary(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let class_id = match required_str(req, "classId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let exam_id = match required_str(req, "examId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let student_id = match required_str(req, "studentId") {
        Ok(v) => v,
        Err(e) => return e,
    };

    match summary::compute_student_report(&calc_context(conn, &class_id, &exam_id), &student_id) {
        Ok(row) => ok(&req.id, json!(row)),
        Err(e) => calc_err(req, e),
    }
}

fn handle_reports_form_summary(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let form = match req.params.get("form").and_then(|v| v.as_i64()) {
        Some(v) if (1..=6).contains(&v) => v,
        _ => {
            return err(
                &req.id,
                "bad_params",
                "form must be an integer in 1..=6",
                None,
            )
        }
    };
    let exam_name = match required_str(req, "examName") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let year = match req.params.get("year").and_then(|v| v.as_i64()) {
        Some(v) if v > 0 => v,
        _ => return err(&req.id, "bad_params", "missing/invalid year", None),
    };

    // Every class in the form sitting an exam with this name and year.
    let mut stmt = match conn.prepare(
        "SELECT e.class_id, e.id
         FROM exams e
         JOIN classes c ON c.id = e.class_id
         WHERE c.form = ? AND e.name = ? AND e.year = ?
         ORDER BY e.class_id",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let pairs = match stmt
        .query_map((form, &exam_name, year), |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    if pairs.is_empty() {
        return err(
            &req.id,
            "not_found",
            "no classes in this form sat that exam",
            Some(json!({ "form": form, "examName": exam_name, "year": year })),
        );
    }

    let mut models = Vec::with_capacity(pairs.len());
    for (class_id, exam_id) in &pairs {
        match summary::compute_exam_summary(&calc_context(conn, class_id, exam_id)) {
            Ok(model) => models.push(model),
            Err(e) => return calc_err(req, e),
        }
    }

    let merged = summary::merge_form_summary(form, &exam_name, year, models);
    ok(&req.id, json!(merged))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "reports.examSummary" => Some(handle_reports_exam_summary(state, req)),
        "reports.studentSummary" => Some(handle_reports_student_summary(state, req)),
        "reports.formSummary" => Some(handle_reports_form_summary(state, req)),
        _ => None,
    }
}
