use anyhow::Context;
use serde::Serialize;
use std::path::Path;

use crate::alloc::format_study_time;

/// One exported topic line, in the column order of the plan preview table.
#[derive(Debug, Clone, Serialize)]
pub struct PlanCsvRow {
    #[serde(rename = "Subject")]
    pub subject: String,
    #[serde(rename = "Subtopic")]
    pub subtopic: String,
    #[serde(rename = "Exam Date")]
    pub exam_date: String,
    #[serde(rename = "Days Left")]
    pub days_left: i64,
    #[serde(rename = "Difficulty")]
    pub difficulty: i64,
    #[serde(rename = "Hours Allocated")]
    pub hours_allocated: f64,
    #[serde(rename = "Study Time")]
    pub study_time: String,
    #[serde(rename = "Completed")]
    pub completed: bool,
}

impl PlanCsvRow {
    pub fn new(
        subject: String,
        subtopic: String,
        exam_date: String,
        days_left: i64,
        difficulty: i64,
        hours_allocated: f64,
        completed: bool,
    ) -> Self {
        Self {
            study_time: format_study_time(hours_allocated),
            subject,
            subtopic,
            exam_date,
            days_left,
            difficulty,
            hours_allocated,
            completed,
        }
    }
}

pub fn write_plan_csv(out_path: &Path, rows: &[PlanCsvRow]) -> anyhow::Result<usize> {
    if let Some(parent) = out_path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create directory {}", parent.to_string_lossy()))?;
    }
    let mut wtr = csv::Writer::from_path(out_path)
        .with_context(|| format!("failed to create {}", out_path.to_string_lossy()))?;
    for row in rows {
        wtr.serialize(row).context("failed to write csv row")?;
    }
    wtr.flush().context("failed to flush csv")?;
    Ok(rows.len())
}
