use anyhow::Context;
use std::path::Path;

#[derive(Debug, Clone, PartialEq)]
pub struct CsvMarkRow {
    pub line: usize,
    pub admission_no: String,
    pub subject_code: String,
    pub marks: Option<f64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CsvRowError {
    pub line: usize,
    pub message: String,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParsedMarksCsv {
    pub rows: Vec<CsvMarkRow>,
    pub errors: Vec<CsvRowError>,
}

/// Parses a bulk marks file: `admission_no,subject_code,marks` per line.
/// The marks field may be empty or `ABS` for an absent student. Bad rows are
/// collected, not fatal, so one typo does not sink a whole upload.
pub fn parse_marks_csv(text: &str) -> ParsedMarksCsv {
    let mut out = ParsedMarksCsv::default();

    for (idx, raw) in text.lines().enumerate() {
        let line_no = idx + 1;
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        if idx == 0 && line.to_ascii_lowercase().starts_with("admission_no") {
            continue;
        }

        let fields: Vec<&str> = line.split(',').map(|f| f.trim()).collect();
        if fields.len() != 3 {
            out.errors.push(CsvRowError {
                line: line_no,
                message: format!("expected 3 fields, got {}", fields.len()),
            });
            continue;
        }

        let admission_no = fields[0];
        let subject_code = fields[1];
        if admission_no.is_empty() || subject_code.is_empty() {
            out.errors.push(CsvRowError {
                line: line_no,
                message: "admission_no and subject_code must not be empty".to_string(),
            });
            continue;
        }

        let marks_field = fields[2];
        let marks = if marks_field.is_empty() || marks_field.eq_ignore_ascii_case("ABS") {
            None
        } else {
            match marks_field.parse::<f64>() {
                Ok(v) if (0.0..=100.0).contains(&v) => Some(v),
                Ok(v) => {
                    out.errors.push(CsvRowError {
                        line: line_no,
                        message: format!("marks out of range 0..=100: {}", v),
                    });
                    continue;
                }
                Err(_) => {
                    out.errors.push(CsvRowError {
                        line: line_no,
                        message: format!("marks must be a number or ABS: {}", marks_field),
                    });
                    continue;
                }
            }
        };

        out.rows.push(CsvMarkRow {
            line: line_no,
            admission_no: admission_no.to_string(),
            subject_code: subject_code.to_ascii_uppercase(),
            marks,
        });
    }

    out
}

pub fn read_marks_csv(path: &Path) -> anyhow::Result<ParsedMarksCsv> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read marks file {}", path.to_string_lossy()))?;
    Ok(parse_marks_csv(&text))
}
