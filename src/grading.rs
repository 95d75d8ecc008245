use serde::Serialize;
use std::cmp::Ordering;
use std::collections::BTreeMap;

/// 1-decimal presentation rounding used across report models.
pub fn round1(x: f64) -> f64 {
    ((10.0 * x) + 0.5).floor() / 10.0
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Level {
    OLevel,
    ALevel,
}

impl Level {
    pub fn parse(s: &str) -> Option<Level> {
        match s {
            "o_level" => Some(Level::OLevel),
            "a_level" => Some(Level::ALevel),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Level::OLevel => "o_level",
            Level::ALevel => "a_level",
        }
    }

    pub fn bands(self) -> &'static [GradeBand] {
        match self {
            Level::OLevel => O_LEVEL_BANDS,
            Level::ALevel => A_LEVEL_BANDS,
        }
    }

    /// Number of subjects entering the division aggregate: CSEE counts the
    /// best seven subjects, ACSEE the best three principal subjects.
    pub fn best_n(self) -> usize {
        match self {
            Level::OLevel => 7,
            Level::ALevel => 3,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum Grade {
    A,
    B,
    C,
    D,
    E,
    S,
    F,
}

impl Grade {
    pub fn code(self) -> &'static str {
        match self {
            Grade::A => "A",
            Grade::B => "B",
            Grade::C => "C",
            Grade::D => "D",
            Grade::E => "E",
            Grade::S => "S",
            Grade::F => "F",
        }
    }

    pub fn is_pass(self) -> bool {
        self != Grade::F
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GradeBand {
    pub min_mark: f64,
    pub grade: Grade,
    pub points: f64,
}

/// NECTA CSEE table. Bands are inclusive on the lower bound and contiguous
/// over [0,100]; lower points are better.
pub const O_LEVEL_BANDS: &[GradeBand] = &[
    GradeBand {
        min_mark: 75.0,
        grade: Grade::A,
        points: 1.0,
    },
    GradeBand {
        min_mark: 65.0,
        grade: Grade::B,
        points: 2.0,
    },
    GradeBand {
        min_mark: 45.0,
        grade: Grade::C,
        points: 3.0,
    },
    GradeBand {
        min_mark: 30.0,
        grade: Grade::D,
        points: 4.0,
    },
    GradeBand {
        min_mark: 0.0,
        grade: Grade::F,
        points: 5.0,
    },
];

/// NECTA ACSEE table. Point polarity is inverted relative to O-Level
/// (A=5 down to F=0, with the subsidiary S worth 0.5).
pub const A_LEVEL_BANDS: &[GradeBand] = &[
    GradeBand {
        min_mark: 80.0,
        grade: Grade::A,
        points: 5.0,
    },
    GradeBand {
        min_mark: 70.0,
        grade: Grade::B,
        points: 4.0,
    },
    GradeBand {
        min_mark: 60.0,
        grade: Grade::C,
        points: 3.0,
    },
    GradeBand {
        min_mark: 50.0,
        grade: Grade::D,
        points: 2.0,
    },
    GradeBand {
        min_mark: 40.0,
        grade: Grade::E,
        points: 1.0,
    },
    GradeBand {
        min_mark: 35.0,
        grade: Grade::S,
        points: 0.5,
    },
    GradeBand {
        min_mark: 0.0,
        grade: Grade::F,
        points: 0.0,
    },
];

/// Maps a mark to a grade. `None` marks (absent) stay `None`. Marks are
/// assumed already validated to [0,100] by the caller; this function does not
/// range-check.
pub fn grade_for(marks: Option<f64>, level: Level) -> Option<Grade> {
    let m = marks?;
    level
        .bands()
        .iter()
        .find(|b| m >= b.min_mark)
        .map(|b| b.grade)
}

/// Point value of a grade under a scheme. `None` when the grade is outside
/// the scheme's alphabet (e.g. S under O-Level).
pub fn points_for(grade: Grade, level: Level) -> Option<f64> {
    level
        .bands()
        .iter()
        .find(|b| b.grade == grade)
        .map(|b| b.points)
}

#[derive(Debug, Clone)]
pub struct SubjectResult {
    pub subject_id: String,
    pub subject_name: String,
    pub marks: Option<f64>,
    pub is_principal: bool,
    pub is_compulsory: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GradedSubject {
    pub subject_id: String,
    pub subject_name: String,
    pub marks: Option<f64>,
    pub is_principal: bool,
    pub is_compulsory: bool,
    pub grade: Option<Grade>,
    pub points: Option<f64>,
}

pub fn grade_subject(result: &SubjectResult, level: Level) -> GradedSubject {
    let grade = grade_for(result.marks, level);
    let points = grade.and_then(|g| points_for(g, level));
    GradedSubject {
        subject_id: result.subject_id.clone(),
        subject_name: result.subject_name.clone(),
        marks: result.marks,
        is_principal: result.is_principal,
        is_compulsory: result.is_compulsory,
        grade,
        points,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Insufficient {
    pub have: usize,
    pub need: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BestN {
    pub points: f64,
    pub subject_ids: Vec<String>,
}

fn best_n_over<'a, I>(subjects: I, n: usize) -> Result<BestN, Insufficient>
where
    I: Iterator<Item = &'a GradedSubject>,
{
    let mut pointed: Vec<(&'a GradedSubject, f64)> = subjects
        .filter_map(|s| s.points.map(|p| (s, p)))
        .collect();
    if pointed.len() < n {
        return Err(Insufficient {
            have: pointed.len(),
            need: n,
        });
    }
    // Stable sort: subjects tying on points keep input order, first seen wins.
    pointed.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(Ordering::Equal));
    let selected = &pointed[..n];
    Ok(BestN {
        points: selected.iter().map(|(_, p)| p).sum(),
        subject_ids: selected
            .iter()
            .map(|(s, _)| s.subject_id.clone())
            .collect(),
    })
}

/// Best-n selection over every gradable subject (CSEE aggregate).
pub fn best_n_points(subjects: &[GradedSubject], n: usize) -> Result<BestN, Insufficient> {
    best_n_over(subjects.iter(), n)
}

/// Best-n selection restricted to principal subjects (ACSEE aggregate).
/// Picks the n lowest point values.
pub fn best_n_principal_points(
    subjects: &[GradedSubject],
    n: usize,
) -> Result<BestN, Insufficient> {
    best_n_over(subjects.iter().filter(|s| s.is_principal), n)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum Division {
    I,
    II,
    III,
    IV,
    V,
    #[serde(rename = "0")]
    Zero,
}

/// Division bands over best-n points. ACSEE: I 3-9, II 10-12, III 13-17,
/// IV 18-19, V 20-21. CSEE: I 7-17, II 18-21, III 22-25, IV 26-33. Anything
/// outside the closed range is Division 0.
pub fn classify_division(points: f64, level: Level) -> Division {
    let bands: &[(f64, f64, Division)] = match level {
        Level::ALevel => &[
            (3.0, 9.0, Division::I),
            (10.0, 12.0, Division::II),
            (13.0, 17.0, Division::III),
            (18.0, 19.0, Division::IV),
            (20.0, 21.0, Division::V),
        ],
        Level::OLevel => &[
            (7.0, 17.0, Division::I),
            (18.0, 21.0, Division::II),
            (22.0, 25.0, Division::III),
            (26.0, 33.0, Division::IV),
        ],
    };
    for (lo, hi, div) in bands {
        if points >= *lo && points <= *hi {
            return *div;
        }
    }
    Division::Zero
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "camelCase")]
pub enum DivisionStatus {
    #[serde(rename_all = "camelCase")]
    Classified { division: Division, best_points: f64 },
    /// Fewer gradable subjects than the scheme's best-n requires. Distinct
    /// from Division 0: the remediation is entering more marks, not a fail.
    #[serde(rename_all = "camelCase")]
    Incomplete { have: usize, need: usize },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentSummary {
    pub student_id: String,
    pub total_marks: f64,
    pub average_marks: Option<f64>,
    pub total_points: f64,
    pub sat_count: usize,
    pub absent_count: usize,
    pub division: DivisionStatus,
    pub rank: Option<usize>,
}

pub fn compute_student_summary(
    student_id: &str,
    subjects: &[GradedSubject],
    level: Level,
) -> StudentSummary {
    let mut total_marks = 0.0_f64;
    let mut sat_count = 0_usize;
    let mut absent_count = 0_usize;
    let mut total_points = 0.0_f64;

    for s in subjects {
        match s.marks {
            Some(m) => {
                total_marks += m;
                sat_count += 1;
            }
            None => absent_count += 1,
        }
        if let Some(p) = s.points {
            total_points += p;
        }
    }

    let average_marks = if sat_count > 0 {
        Some(total_marks / sat_count as f64)
    } else {
        None
    };

    let best = match level {
        Level::ALevel => best_n_principal_points(subjects, level.best_n()),
        Level::OLevel => best_n_points(subjects, level.best_n()),
    };
    let division = match best {
        Ok(b) => DivisionStatus::Classified {
            division: classify_division(b.points, level),
            best_points: b.points,
        },
        Err(i) => DivisionStatus::Incomplete {
            have: i.have,
            need: i.need,
        },
    };

    StudentSummary {
        student_id: student_id.to_string(),
        total_marks,
        average_marks,
        total_points,
        sat_count,
        absent_count,
        division,
        rank: None,
    }
}

/// Competition ranking ("1224") over average marks, descending. Only
/// meaningful once every summary in the cohort is present. Students without
/// an average are left unranked.
pub fn assign_ranks(summaries: &mut [StudentSummary]) {
    let mut order: Vec<usize> = (0..summaries.len())
        .filter(|&i| summaries[i].average_marks.is_some())
        .collect();
    order.sort_by(|&a, &b| {
        summaries[b]
            .average_marks
            .partial_cmp(&summaries[a].average_marks)
            .unwrap_or(Ordering::Equal)
    });

    let mut prev_avg: Option<f64> = None;
    let mut prev_rank = 0_usize;
    for (pos, &i) in order.iter().enumerate() {
        let Some(avg) = summaries[i].average_marks else {
            continue;
        };
        let rank = if prev_avg == Some(avg) {
            prev_rank
        } else {
            pos + 1
        };
        summaries[i].rank = Some(rank);
        prev_avg = Some(avg);
        prev_rank = rank;
    }
}

#[derive(Debug, Clone)]
pub struct CohortStudent {
    pub summary: StudentSummary,
    pub subjects: Vec<GradedSubject>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubjectDistribution {
    pub subject_id: String,
    pub subject_name: String,
    pub registered: usize,
    pub sat: usize,
    pub pass_count: usize,
    pub grade_counts: BTreeMap<Grade, usize>,
    pub mean_points: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassSummary {
    pub student_count: usize,
    pub division_counts: BTreeMap<Division, usize>,
    pub incomplete_count: usize,
    pub subjects: Vec<SubjectDistribution>,
    pub class_average: Option<f64>,
    pub pass_rate: Option<f64>,
}

/// Aggregates a full cohort. Accumulation runs in student-id order so the
/// result never depends on input order.
pub fn aggregate_class_summary(cohort: &[CohortStudent]) -> ClassSummary {
    let mut ordered: Vec<&CohortStudent> = cohort.iter().collect();
    ordered.sort_by(|a, b| a.summary.student_id.cmp(&b.summary.student_id));

    let mut division_counts: BTreeMap<Division, usize> = BTreeMap::new();
    for d in [
        Division::I,
        Division::II,
        Division::III,
        Division::IV,
        Division::V,
        Division::Zero,
    ] {
        division_counts.insert(d, 0);
    }

    let mut incomplete_count = 0_usize;
    let mut classified_count = 0_usize;
    let mut upper_division_count = 0_usize;
    let mut average_sum = 0.0_f64;
    let mut average_count = 0_usize;

    struct SubjectAcc {
        subject_name: String,
        registered: usize,
        sat: usize,
        pass_count: usize,
        grade_counts: BTreeMap<Grade, usize>,
        points_sum: f64,
        graded_count: usize,
    }
    let mut per_subject: BTreeMap<String, SubjectAcc> = BTreeMap::new();

    for student in &ordered {
        match student.summary.division {
            DivisionStatus::Classified { division, .. } => {
                classified_count += 1;
                *division_counts.entry(division).or_insert(0) += 1;
                if matches!(division, Division::I | Division::II | Division::III) {
                    upper_division_count += 1;
                }
            }
            DivisionStatus::Incomplete { .. } => incomplete_count += 1,
        }
        if let Some(avg) = student.summary.average_marks {
            average_sum += avg;
            average_count += 1;
        }

        for s in &student.subjects {
            let acc = per_subject
                .entry(s.subject_id.clone())
                .or_insert_with(|| SubjectAcc {
                    subject_name: s.subject_name.clone(),
                    registered: 0,
                    sat: 0,
                    pass_count: 0,
                    grade_counts: BTreeMap::new(),
                    points_sum: 0.0,
                    graded_count: 0,
                });
            acc.registered += 1;
            if s.marks.is_some() {
                acc.sat += 1;
            }
            if let Some(g) = s.grade {
                *acc.grade_counts.entry(g).or_insert(0) += 1;
                if g.is_pass() {
                    acc.pass_count += 1;
                }
            }
            if let Some(p) = s.points {
                acc.points_sum += p;
                acc.graded_count += 1;
            }
        }
    }

    let mut subjects: Vec<SubjectDistribution> = per_subject
        .into_iter()
        .map(|(subject_id, acc)| SubjectDistribution {
            subject_id,
            subject_name: acc.subject_name,
            registered: acc.registered,
            sat: acc.sat,
            pass_count: acc.pass_count,
            grade_counts: acc.grade_counts,
            mean_points: if acc.graded_count > 0 {
                Some(acc.points_sum / acc.graded_count as f64)
            } else {
                None
            },
        })
        .collect();
    subjects.sort_by(|a, b| {
        (a.subject_name.as_str(), a.subject_id.as_str())
            .cmp(&(b.subject_name.as_str(), b.subject_id.as_str()))
    });

    ClassSummary {
        student_count: cohort.len(),
        division_counts,
        incomplete_count,
        subjects,
        class_average: if average_count > 0 {
            Some(average_sum / average_count as f64)
        } else {
            None
        },
        pass_rate: if classified_count > 0 {
            Some(upper_division_count as f64 / classified_count as f64)
        } else {
            None
        },
    }
}
