use rusqlite::{Connection, OptionalExtension};
use serde::Serialize;
use std::collections::HashMap;

use crate::grading::{self, GradedSubject, Level, StudentSummary, SubjectResult};

#[derive(Debug, Clone, Serialize)]
pub struct CalcError {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl CalcError {
    pub fn new(code: &str, message: impl Into<String>) -> Self {
        Self {
            code: code.to_string(),
            message: message.into(),
            details: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct CalcContext<'a> {
    pub conn: &'a Connection,
    pub class_id: &'a str,
    pub exam_id: &'a str,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassHeader {
    pub id: String,
    pub name: String,
    pub form: i64,
    pub stream: Option<String>,
    pub level: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExamHeader {
    pub id: String,
    pub name: String,
    pub term: i64,
    pub year: i64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentReportRow {
    pub student_id: String,
    pub admission_no: String,
    pub display_name: String,
    pub sort_order: i64,
    pub active: bool,
    pub subjects: Vec<GradedSubject>,
    pub summary: StudentSummary,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExamSummaryModel {
    pub class: ClassHeader,
    pub exam: ExamHeader,
    #[serde(rename = "perStudent")]
    pub per_student: Vec<StudentReportRow>,
    #[serde(rename = "classSummary")]
    pub class_summary: grading::ClassSummary,
}

struct RosterStudent {
    id: String,
    admission_no: String,
    display_name: String,
    sort_order: i64,
    active: bool,
}

struct Registration {
    student_id: String,
    subject_id: String,
    subject_name: String,
    is_principal: bool,
    is_compulsory: bool,
}

fn load_class(conn: &Connection, class_id: &str) -> Result<(ClassHeader, Level), CalcError> {
    let row: Option<(String, i64, Option<String>, String)> = conn
        .query_row(
            "SELECT name, form, stream, level FROM classes WHERE id = ?",
            [class_id],
            |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?)),
        )
        .optional()
        .map_err(|e| CalcError::new("db_query_failed", e.to_string()))?;
    let Some((name, form, stream, level_raw)) = row else {
        return Err(CalcError::new("not_found", "class not found"));
    };
    let Some(level) = Level::parse(&level_raw) else {
        return Err(CalcError::new(
            "bad_state",
            format!("class has unknown level: {}", level_raw),
        ));
    };
    Ok((
        ClassHeader {
            id: class_id.to_string(),
            name,
            form,
            stream,
            level: level.as_str().to_string(),
        },
        level,
    ))
}

fn load_exam(conn: &Connection, class_id: &str, exam_id: &str) -> Result<ExamHeader, CalcError> {
    let row: Option<(String, i64, i64)> = conn
        .query_row(
            "SELECT name, term, year FROM exams WHERE id = ? AND class_id = ?",
            (exam_id, class_id),
            |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)),
        )
        .optional()
        .map_err(|e| CalcError::new("db_query_failed", e.to_string()))?;
    let Some((name, term, year)) = row else {
        return Err(CalcError::new("not_found", "exam not found"));
    };
    Ok(ExamHeader {
        id: exam_id.to_string(),
        name,
        term,
        year,
    })
}

fn load_roster(conn: &Connection, class_id: &str) -> Result<Vec<RosterStudent>, CalcError> {
    let mut stmt = conn
        .prepare(
            "SELECT id, admission_no, last_name, first_name, sort_order, active
             FROM students
             WHERE class_id = ?
             ORDER BY sort_order",
        )
        .map_err(|e| CalcError::new("db_query_failed", e.to_string()))?;
    stmt.query_map([class_id], |r| {
        let last: String = r.get(2)?;
        let first: String = r.get(3)?;
        Ok(RosterStudent {
            id: r.get(0)?,
            admission_no: r.get(1)?,
            display_name: format!("{}, {}", last, first),
            sort_order: r.get(4)?,
            active: r.get::<_, i64>(5)? != 0,
        })
    })
    .and_then(|it| it.collect::<Result<Vec<_>, _>>())
    .map_err(|e| CalcError::new("db_query_failed", e.to_string()))
}

fn load_registrations(conn: &Connection, class_id: &str) -> Result<Vec<Registration>, CalcError> {
    let mut stmt = conn
        .prepare(
            "SELECT r.student_id, r.subject_id, s.name, r.is_principal, r.is_compulsory
             FROM registrations r
             JOIN subjects s ON s.id = r.subject_id
             WHERE r.class_id = ?
             ORDER BY s.name, s.id",
        )
        .map_err(|e| CalcError::new("db_query_failed", e.to_string()))?;
    stmt.query_map([class_id], |r| {
        Ok(Registration {
            student_id: r.get(0)?,
            subject_id: r.get(1)?,
            subject_name: r.get(2)?,
            is_principal: r.get::<_, i64>(3)? != 0,
            is_compulsory: r.get::<_, i64>(4)? != 0,
        })
    })
    .and_then(|it| it.collect::<Result<Vec<_>, _>>())
    .map_err(|e| CalcError::new("db_query_failed", e.to_string()))
}

fn load_marks(
    conn: &Connection,
    exam_id: &str,
) -> Result<HashMap<(String, String), Option<f64>>, CalcError> {
    let mut stmt = conn
        .prepare("SELECT student_id, subject_id, marks, status FROM marks WHERE exam_id = ?")
        .map_err(|e| CalcError::new("db_query_failed", e.to_string()))?;
    let rows = stmt
        .query_map([exam_id], |r| {
            let student_id: String = r.get(0)?;
            let subject_id: String = r.get(1)?;
            let marks: Option<f64> = r.get(2)?;
            let status: String = r.get(3)?;
            Ok((student_id, subject_id, marks, status))
        })
        .map_err(|e| CalcError::new("db_query_failed", e.to_string()))?;

    let mut by_pair = HashMap::new();
    for row in rows {
        let (student_id, subject_id, marks, status) =
            row.map_err(|e| CalcError::new("db_query_failed", e.to_string()))?;
        let value = match status.as_str() {
            "absent" => None,
            _ => marks,
        };
        by_pair.insert((student_id, subject_id), value);
    }
    Ok(by_pair)
}

pub fn compute_exam_summary(ctx: &CalcContext<'_>) -> Result<ExamSummaryModel, CalcError> {
    let conn = ctx.conn;
    let (class, level) = load_class(conn, ctx.class_id)?;
    let exam = load_exam(conn, ctx.class_id, ctx.exam_id)?;
    let roster = load_roster(conn, ctx.class_id)?;
    let registrations = load_registrations(conn, ctx.class_id)?;
    let marks = load_marks(conn, ctx.exam_id)?;

    let mut subjects_by_student: HashMap<&str, Vec<SubjectResult>> = HashMap::new();
    for reg in &registrations {
        let mark = marks
            .get(&(reg.student_id.clone(), reg.subject_id.clone()))
            .copied()
            .flatten();
        subjects_by_student
            .entry(reg.student_id.as_str())
            .or_default()
            .push(SubjectResult {
                subject_id: reg.subject_id.clone(),
                subject_name: reg.subject_name.clone(),
                marks: mark,
                is_principal: reg.is_principal,
                is_compulsory: reg.is_compulsory,
            });
    }

    let mut per_student: Vec<StudentReportRow> = Vec::with_capacity(roster.len());
    for s in &roster {
        let graded: Vec<GradedSubject> = subjects_by_student
            .get(s.id.as_str())
            .map(|results| {
                results
                    .iter()
                    .map(|r| grading::grade_subject(r, level))
                    .collect()
            })
            .unwrap_or_default();
        let summary = grading::compute_student_summary(&s.id, &graded, level);
        per_student.push(StudentReportRow {
            student_id: s.id.clone(),
            admission_no: s.admission_no.clone(),
            display_name: s.display_name.clone(),
            sort_order: s.sort_order,
            active: s.active,
            subjects: graded,
            summary,
        });
    }

    // Ranks and class aggregates cover active students only; inactive rows
    // stay in the model unranked.
    let active_idx: Vec<usize> = per_student
        .iter()
        .enumerate()
        .filter(|(_, r)| r.active)
        .map(|(i, _)| i)
        .collect();
    let mut active_summaries: Vec<StudentSummary> = active_idx
        .iter()
        .map(|&i| per_student[i].summary.clone())
        .collect();
    grading::assign_ranks(&mut active_summaries);
    for (pos, &i) in active_idx.iter().enumerate() {
        per_student[i].summary.rank = active_summaries[pos].rank;
    }

    let cohort: Vec<grading::CohortStudent> = active_idx
        .iter()
        .map(|&i| grading::CohortStudent {
            summary: per_student[i].summary.clone(),
            subjects: per_student[i].subjects.clone(),
        })
        .collect();
    let mut class_summary = grading::aggregate_class_summary(&cohort);

    // Presentation rounding, after ranking and aggregation.
    for row in &mut per_student {
        row.summary.average_marks = row.summary.average_marks.map(grading::round1);
    }
    class_summary.class_average = class_summary.class_average.map(grading::round1);
    for subject in &mut class_summary.subjects {
        subject.mean_points = subject.mean_points.map(grading::round1);
    }

    Ok(ExamSummaryModel {
        class,
        exam,
        per_student,
        class_summary,
    })
}

pub fn compute_student_report(
    ctx: &CalcContext<'_>,
    student_id: &str,
) -> Result<StudentReportRow, CalcError> {
    let model = compute_exam_summary(ctx)?;
    model
        .per_student
        .into_iter()
        .find(|r| r.student_id == student_id)
        .ok_or_else(|| CalcError::new("not_found", "student not found in class"))
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FormClassRow {
    pub class: ClassHeader,
    pub exam: ExamHeader,
    pub student_count: usize,
    pub class_average: Option<f64>,
    pub pass_rate: Option<f64>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FormSummaryModel {
    pub form: i64,
    pub exam_name: String,
    pub year: i64,
    pub classes: Vec<FormClassRow>,
    pub student_count: usize,
    pub division_counts: std::collections::BTreeMap<grading::Division, usize>,
    pub incomplete_count: usize,
    pub form_average: Option<f64>,
    pub pass_rate: Option<f64>,
}

/// Merges per-class exam summaries into a form-level roll-up. Classes are
/// folded in class-id order so the merge is independent of query order.
pub fn merge_form_summary(
    form: i64,
    exam_name: &str,
    year: i64,
    mut models: Vec<ExamSummaryModel>,
) -> FormSummaryModel {
    models.sort_by(|a, b| a.class.id.cmp(&b.class.id));

    let mut division_counts: std::collections::BTreeMap<grading::Division, usize> =
        std::collections::BTreeMap::new();
    for d in [
        grading::Division::I,
        grading::Division::II,
        grading::Division::III,
        grading::Division::IV,
        grading::Division::V,
        grading::Division::Zero,
    ] {
        division_counts.insert(d, 0);
    }

    let mut incomplete_count = 0_usize;
    let mut classified_count = 0_usize;
    let mut upper_count = 0_usize;
    let mut average_sum = 0.0_f64;
    let mut average_count = 0_usize;
    let mut student_count = 0_usize;
    let mut classes = Vec::with_capacity(models.len());

    for model in &models {
        student_count += model.class_summary.student_count;
        incomplete_count += model.class_summary.incomplete_count;
        for (d, n) in &model.class_summary.division_counts {
            *division_counts.entry(*d).or_insert(0) += n;
            classified_count += n;
            if matches!(
                d,
                grading::Division::I | grading::Division::II | grading::Division::III
            ) {
                upper_count += n;
            }
        }

        for row in &model.per_student {
            if !row.active {
                continue;
            }
            if let Some(avg) = row.summary.average_marks {
                average_sum += avg;
                average_count += 1;
            }
        }

        classes.push(FormClassRow {
            class: model.class.clone(),
            exam: model.exam.clone(),
            student_count: model.class_summary.student_count,
            class_average: model.class_summary.class_average,
            pass_rate: model.class_summary.pass_rate,
        });
    }

    FormSummaryModel {
        form,
        exam_name: exam_name.to_string(),
        year,
        classes,
        student_count,
        division_counts,
        incomplete_count,
        form_average: if average_count > 0 {
            Some(grading::round1(average_sum / average_count as f64))
        } else {
            None
        },
        pass_rate: if classified_count > 0 {
            Some(upper_count as f64 / classified_count as f64)
        } else {
            None
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;
    use uuid::Uuid;

    fn temp_workspace(tag: &str) -> std::path::PathBuf {
        let dir = std::env::temp_dir().join(format!("shuled-{}-{}", tag, Uuid::new_v4()));
        std::fs::create_dir_all(&dir).expect("create temp workspace");
        dir
    }

    fn seed_class(conn: &Connection, level: &str) -> (String, String) {
        let class_id = Uuid::new_v4().to_string();
        conn.execute(
            "INSERT INTO classes(id, name, form, stream, level) VALUES(?, ?, ?, ?, ?)",
            (&class_id, "Form 4A", 4_i64, Some("A"), level),
        )
        .expect("insert class");
        let exam_id = Uuid::new_v4().to_string();
        conn.execute(
            "INSERT INTO exams(id, class_id, name, term, year) VALUES(?, ?, ?, ?, ?)",
            (&exam_id, &class_id, "Mid Term", 1_i64, 2026_i64),
        )
        .expect("insert exam");
        (class_id, exam_id)
    }

    fn seed_student(conn: &Connection, class_id: &str, adm: &str, sort: i64) -> String {
        let id = Uuid::new_v4().to_string();
        conn.execute(
            "INSERT INTO students(id, class_id, admission_no, last_name, first_name, sex, active, sort_order)
             VALUES(?, ?, ?, ?, ?, ?, 1, ?)",
            (&id, class_id, adm, "Mushi", adm, Some("F"), sort),
        )
        .expect("insert student");
        id
    }

    fn seed_subject(conn: &Connection, code: &str) -> String {
        let id = Uuid::new_v4().to_string();
        conn.execute(
            "INSERT INTO subjects(id, code, name) VALUES(?, ?, ?)",
            (&id, code, code),
        )
        .expect("insert subject");
        id
    }

    fn register(conn: &Connection, class_id: &str, student_id: &str, subject_id: &str) {
        conn.execute(
            "INSERT INTO registrations(id, class_id, student_id, subject_id, is_principal, is_compulsory)
             VALUES(?, ?, ?, ?, 0, 1)",
            (Uuid::new_v4().to_string(), class_id, student_id, subject_id),
        )
        .expect("insert registration");
    }

    fn enter_mark(
        conn: &Connection,
        exam_id: &str,
        student_id: &str,
        subject_id: &str,
        marks: Option<f64>,
    ) {
        let status = if marks.is_some() { "scored" } else { "absent" };
        conn.execute(
            "INSERT INTO marks(id, exam_id, student_id, subject_id, marks, status)
             VALUES(?, ?, ?, ?, ?, ?)",
            (
                Uuid::new_v4().to_string(),
                exam_id,
                student_id,
                subject_id,
                marks,
                status,
            ),
        )
        .expect("insert mark");
    }

    #[test]
    fn exam_summary_grades_and_ranks_a_seeded_class() {
        let ws = temp_workspace("summary");
        let conn = db::open_db(&ws).expect("open db");
        let (class_id, exam_id) = seed_class(&conn, "o_level");

        let s1 = seed_student(&conn, &class_id, "A001", 0);
        let s2 = seed_student(&conn, &class_id, "A002", 1);
        let civics = seed_subject(&conn, "CIV");
        let maths = seed_subject(&conn, "MAT");
        for s in [&s1, &s2] {
            register(&conn, &class_id, s, &civics);
            register(&conn, &class_id, s, &maths);
        }

        enter_mark(&conn, &exam_id, &s1, &civics, Some(68.0));
        enter_mark(&conn, &exam_id, &s1, &maths, Some(80.0));
        enter_mark(&conn, &exam_id, &s2, &civics, Some(40.0));
        enter_mark(&conn, &exam_id, &s2, &maths, None);

        let ctx = CalcContext {
            conn: &conn,
            class_id: &class_id,
            exam_id: &exam_id,
        };
        let model = compute_exam_summary(&ctx).expect("summary");
        assert_eq!(model.per_student.len(), 2);

        let r1 = &model.per_student[0];
        assert_eq!(r1.student_id, s1);
        let civics_row = r1
            .subjects
            .iter()
            .find(|s| s.subject_name == "CIV")
            .expect("civics graded");
        assert_eq!(civics_row.grade.map(|g| g.code()), Some("B"));
        assert_eq!(civics_row.points, Some(2.0));
        assert_eq!(r1.summary.average_marks, Some(74.0));
        assert_eq!(r1.summary.rank, Some(1));

        let r2 = &model.per_student[1];
        // Absent maths stays out of the average; 40 / 1 subject sat.
        assert_eq!(r2.summary.average_marks, Some(40.0));
        assert_eq!(r2.summary.sat_count, 1);
        assert_eq!(r2.summary.absent_count, 1);
        assert_eq!(r2.summary.rank, Some(2));

        // Two subjects each, fewer than the CSEE best-seven: incomplete.
        assert_eq!(model.class_summary.incomplete_count, 2);
        assert_eq!(model.class_summary.pass_rate, None);

        let _ = std::fs::remove_dir_all(&ws);
    }

    #[test]
    fn missing_exam_is_not_found() {
        let ws = temp_workspace("missing-exam");
        let conn = db::open_db(&ws).expect("open db");
        let (class_id, _) = seed_class(&conn, "o_level");
        let ctx = CalcContext {
            conn: &conn,
            class_id: &class_id,
            exam_id: "nope",
        };
        let err = compute_exam_summary(&ctx).expect_err("should fail");
        assert_eq!(err.code, "not_found");
        let _ = std::fs::remove_dir_all(&ws);
    }
}
