use chrono::NaiveDate;
use serde::Serialize;
use serde_json::{Map, Value};
use thiserror::Error;

pub const MIN_DIFFICULTY: i64 = 1;
pub const MAX_DIFFICULTY: i64 = 10;
pub const FALLBACK_DIFFICULTY: i64 = 5;

/// How out-of-range difficulty weights are treated when a plan request is built.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DifficultyPolicy {
    #[default]
    Reject,
    /// Substitute `FALLBACK_DIFFICULTY` for anything outside 1..=10.
    Fallback,
}

impl DifficultyPolicy {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "reject" => Some(Self::Reject),
            "fallback" => Some(Self::Fallback),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Reject => "reject",
            Self::Fallback => "fallback",
        }
    }

    fn apply(self, field: &str, value: i64) -> Result<i64, AllocError> {
        if (MIN_DIFFICULTY..=MAX_DIFFICULTY).contains(&value) {
            return Ok(value);
        }
        match self {
            Self::Reject => Err(AllocError::DifficultyOutOfRange {
                field: field.to_string(),
                value,
            }),
            Self::Fallback => Ok(FALLBACK_DIFFICULTY),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum AllocError {
    #[error("at least one named subject is required")]
    NoSubjects,
    #[error("total subject difficulty must be greater than zero")]
    ZeroSubjectDifficulty,
    #[error("subject {subject:?} has no named subtopics to distribute hours to")]
    NoSubtopics { subject: String },
    #[error("total hours must be a positive number")]
    NonPositiveHours,
    #[error("{field} must be between 1 and 10 (got {value})")]
    DifficultyOutOfRange { field: String, value: i64 },
    #[error("{field} {reason}")]
    Malformed { field: String, reason: String },
}

impl AllocError {
    /// Which level of the plan tree the rejection belongs to.
    pub fn level(&self) -> &'static str {
        match self {
            Self::NoSubjects | Self::ZeroSubjectDifficulty => "subject",
            Self::NoSubtopics { .. } => "subtopic",
            Self::NonPositiveHours => "hours",
            Self::DifficultyOutOfRange { field, .. } | Self::Malformed { field, .. } => {
                level_of_field(field)
            }
        }
    }

    pub fn field(&self) -> Option<&str> {
        match self {
            Self::DifficultyOutOfRange { field, .. } | Self::Malformed { field, .. } => {
                Some(field.as_str())
            }
            _ => None,
        }
    }
}

fn level_of_field(field: &str) -> &'static str {
    if field.contains(".subtopics") {
        "subtopic"
    } else if field.starts_with("subjects") {
        "subject"
    } else {
        "hours"
    }
}

fn malformed(field: &str, reason: &str) -> AllocError {
    AllocError::Malformed {
        field: field.to_string(),
        reason: reason.to_string(),
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TopicInput {
    pub name: String,
    pub difficulty: i64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SubjectInput {
    pub name: String,
    pub exam_date: NaiveDate,
    pub difficulty: i64,
    pub subtopics: Vec<TopicInput>,
}

/// A validated plan tree: blank names dropped, difficulties normalised by the
/// policy, hours known to be positive.
#[derive(Debug, Clone, PartialEq)]
pub struct PlanRequest {
    total_hours: f64,
    subjects: Vec<SubjectInput>,
}

impl PlanRequest {
    pub fn new(
        total_hours: f64,
        subjects: Vec<SubjectInput>,
        policy: DifficultyPolicy,
    ) -> Result<Self, AllocError> {
        let indexed = subjects
            .into_iter()
            .enumerate()
            .map(|(si, s)| {
                let topic_indices = (0..s.subtopics.len()).collect();
                (si, s, topic_indices)
            })
            .collect();
        Self::from_indexed(total_hours, indexed, policy)
    }

    /// Each subject carries its submitted position and those of its topics so
    /// error paths name the field the caller sent.
    fn from_indexed(
        total_hours: f64,
        subjects: Vec<(usize, SubjectInput, Vec<usize>)>,
        policy: DifficultyPolicy,
    ) -> Result<Self, AllocError> {
        if !total_hours.is_finite() || total_hours <= 0.0 {
            return Err(AllocError::NonPositiveHours);
        }

        let mut kept = Vec::with_capacity(subjects.len());
        for (si, subject, topic_indices) in subjects {
            let name = subject.name.trim().to_string();
            if name.is_empty() {
                continue;
            }
            let difficulty = policy.apply(&format!("subjects[{si}].difficulty"), subject.difficulty)?;
            let mut subtopics = Vec::with_capacity(subject.subtopics.len());
            for (ti, topic) in topic_indices.into_iter().zip(subject.subtopics) {
                let topic_name = topic.name.trim().to_string();
                if topic_name.is_empty() {
                    continue;
                }
                let topic_difficulty = policy.apply(
                    &format!("subjects[{si}].subtopics[{ti}].difficulty"),
                    topic.difficulty,
                )?;
                subtopics.push(TopicInput {
                    name: topic_name,
                    difficulty: topic_difficulty,
                });
            }
            kept.push(SubjectInput {
                name,
                exam_date: subject.exam_date,
                difficulty,
                subtopics,
            });
        }

        Ok(Self {
            total_hours,
            subjects: kept,
        })
    }

    /// Builds a request from a submitted form payload. Numbers may arrive as
    /// JSON numbers or numeric strings; both camelCase and snake_case keys are
    /// accepted.
    pub fn from_json(params: &Value, policy: DifficultyPolicy) -> Result<Self, AllocError> {
        let obj = params
            .as_object()
            .ok_or_else(|| malformed("params", "must be an object"))?;
        let total_hours = parse_number(field(obj, "totalHours", "total_hours"), "totalHours")?;

        let raw_subjects = match obj.get("subjects") {
            Some(Value::Array(items)) => items.as_slice(),
            None | Some(Value::Null) => &[][..],
            Some(_) => return Err(malformed("subjects", "must be an array")),
        };

        let mut subjects = Vec::with_capacity(raw_subjects.len());
        for (si, raw) in raw_subjects.iter().enumerate() {
            let path = format!("subjects[{si}]");
            let s = raw
                .as_object()
                .ok_or_else(|| malformed(&path, "must be an object"))?;
            let name = parse_name(s.get("name"));
            if name.is_empty() {
                continue;
            }
            let exam_date = parse_date(
                field(s, "examDate", "exam_date"),
                &format!("{path}.examDate"),
            )?;
            let difficulty = parse_difficulty(s.get("difficulty"), &format!("{path}.difficulty"))?;

            let raw_topics = match s.get("subtopics") {
                Some(Value::Array(items)) => items.as_slice(),
                None | Some(Value::Null) => &[][..],
                Some(_) => return Err(malformed(&format!("{path}.subtopics"), "must be an array")),
            };
            let mut subtopics = Vec::with_capacity(raw_topics.len());
            let mut topic_indices = Vec::with_capacity(raw_topics.len());
            for (ti, raw_topic) in raw_topics.iter().enumerate() {
                let topic_path = format!("{path}.subtopics[{ti}]");
                let t = raw_topic
                    .as_object()
                    .ok_or_else(|| malformed(&topic_path, "must be an object"))?;
                let topic_name = parse_name(t.get("name"));
                if topic_name.is_empty() {
                    continue;
                }
                let topic_difficulty =
                    parse_difficulty(t.get("difficulty"), &format!("{topic_path}.difficulty"))?;
                subtopics.push(TopicInput {
                    name: topic_name,
                    difficulty: topic_difficulty,
                });
                topic_indices.push(ti);
            }

            subjects.push((
                si,
                SubjectInput {
                    name,
                    exam_date,
                    difficulty,
                    subtopics,
                },
                topic_indices,
            ));
        }

        Self::from_indexed(total_hours, subjects, policy)
    }

    pub fn total_hours(&self) -> f64 {
        self.total_hours
    }

    pub fn subjects(&self) -> &[SubjectInput] {
        &self.subjects
    }
}

fn field<'a>(obj: &'a Map<String, Value>, camel: &str, snake: &str) -> Option<&'a Value> {
    obj.get(camel).or_else(|| obj.get(snake))
}

fn parse_name(v: Option<&Value>) -> String {
    v.and_then(|v| v.as_str())
        .map(|s| s.trim().to_string())
        .unwrap_or_default()
}

fn parse_number(v: Option<&Value>, field: &str) -> Result<f64, AllocError> {
    let n = match v {
        None | Some(Value::Null) => return Err(malformed(field, "is required")),
        Some(Value::Number(n)) => n.as_f64().ok_or_else(|| malformed(field, "must be numeric"))?,
        Some(Value::String(s)) => s
            .trim()
            .parse::<f64>()
            .map_err(|_| malformed(field, "must be numeric"))?,
        Some(_) => return Err(malformed(field, "must be numeric")),
    };
    if !n.is_finite() {
        return Err(malformed(field, "must be a finite number"));
    }
    Ok(n)
}

fn parse_difficulty(v: Option<&Value>, field: &str) -> Result<i64, AllocError> {
    let n = parse_number(v, field)?;
    if n.fract() != 0.0 {
        return Err(malformed(field, "must be a whole number"));
    }
    Ok(n as i64)
}

fn parse_date(v: Option<&Value>, field: &str) -> Result<NaiveDate, AllocError> {
    let s = v
        .and_then(|v| v.as_str())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| malformed(field, "is required"))?;
    NaiveDate::parse_from_str(s, "%Y-%m-%d").map_err(|_| malformed(field, "must be YYYY-MM-DD"))
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubjectAllocation {
    pub name: String,
    pub exam_date: NaiveDate,
    pub difficulty: i64,
    pub hours: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AllocationRow {
    /// Position of the owning entry in `Allocation::subjects`.
    pub subject_index: usize,
    pub subject: String,
    pub topic: String,
    pub exam_date: NaiveDate,
    pub days_left: i64,
    pub difficulty: i64,
    pub allocated_hours: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Allocation {
    pub total_hours: f64,
    pub subjects: Vec<SubjectAllocation>,
    pub rows: Vec<AllocationRow>,
}

/// Two-level proportional split: the budget is divided across subjects by
/// difficulty, then each subject's share across its subtopics by difficulty.
///
/// Subject shares are computed before topic shares, left to right in input
/// order, so the floating-point result is reproducible for a given request.
pub fn allocate(request: &PlanRequest, today: NaiveDate) -> Result<Allocation, AllocError> {
    if request.subjects.is_empty() {
        return Err(AllocError::NoSubjects);
    }
    let subject_total: i64 = request.subjects.iter().map(|s| s.difficulty).sum();
    if subject_total <= 0 {
        return Err(AllocError::ZeroSubjectDifficulty);
    }
    // Reject before any arithmetic so no subject's share can go undistributed.
    for s in &request.subjects {
        let topic_total: i64 = s.subtopics.iter().map(|t| t.difficulty).sum();
        if topic_total <= 0 {
            return Err(AllocError::NoSubtopics {
                subject: s.name.clone(),
            });
        }
    }

    let subject_hours: Vec<f64> = request
        .subjects
        .iter()
        .map(|s| (s.difficulty as f64 / subject_total as f64) * request.total_hours)
        .collect();

    let mut subjects = Vec::with_capacity(request.subjects.len());
    let mut rows = Vec::new();
    for (subject_index, (s, hours)) in request.subjects.iter().zip(subject_hours).enumerate() {
        let topic_total: i64 = s.subtopics.iter().map(|t| t.difficulty).sum();
        let days_left = (s.exam_date - today).num_days();
        for t in &s.subtopics {
            rows.push(AllocationRow {
                subject_index,
                subject: s.name.clone(),
                topic: t.name.clone(),
                exam_date: s.exam_date,
                days_left,
                difficulty: t.difficulty,
                allocated_hours: (t.difficulty as f64 / topic_total as f64) * hours,
            });
        }
        subjects.push(SubjectAllocation {
            name: s.name.clone(),
            exam_date: s.exam_date,
            difficulty: s.difficulty,
            hours,
        });
    }

    Ok(Allocation {
        total_hours: request.total_hours,
        subjects,
        rows,
    })
}

/// Persistence precision for allocated hours.
pub fn round_hours(hours: f64) -> f64 {
    (hours * 100.0).round() / 100.0
}

/// Renders fractional hours as "H hrs M mins". Minutes that round up to 60
/// carry into the hour and keep an explicit "0 mins".
pub fn format_study_time(hours: f64) -> String {
    let h = hours.floor();
    let m = ((hours - h) * 60.0).round();
    let (h, m) = (h as i64, m as i64);
    if m >= 60 {
        return format!("{} hrs 0 mins", h + 1);
    }
    if m == 0 {
        format!("{} hrs", h)
    } else if h == 0 {
        format!("{} mins", m)
    } else {
        format!("{} hrs {} mins", h, m)
    }
}
