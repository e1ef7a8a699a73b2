use crate::export::{self, PlanCsvRow};
use crate::ipc::helpers::{db_conn, require_user, required_str, respond, today_param, HandlerErr};
use crate::ipc::types::{AppState, Request};
use chrono::NaiveDate;
use rusqlite::{Connection, OptionalExtension};
use serde_json::{json, Value};
use std::path::PathBuf;

struct PlanHeader {
    name: String,
    total_hours: f64,
    created_at: String,
}

/// Looks a plan up through its owner; someone else's plan reads as missing.
fn owned_plan(conn: &Connection, user_id: &str, plan_id: &str) -> Result<PlanHeader, HandlerErr> {
    conn.query_row(
        "SELECT plan_name, total_hours, created_at FROM study_plans WHERE id = ? AND user_id = ?",
        [plan_id, user_id],
        |r| {
            Ok(PlanHeader {
                name: r.get(0)?,
                total_hours: r.get(1)?,
                created_at: r.get(2)?,
            })
        },
    )
    .optional()
    .map_err(|e| HandlerErr::db("db_query_failed", e))?
    .ok_or_else(|| HandlerErr::new("not_found", "plan not found"))
}

fn days_until(exam_date: &str, today: NaiveDate) -> Option<i64> {
    NaiveDate::parse_from_str(exam_date, "%Y-%m-%d")
        .ok()
        .map(|d| (d - today).num_days())
}

/// Newest first. `limit` of `None` returns every plan.
pub(crate) fn plan_summaries(
    conn: &Connection,
    user_id: &str,
    limit: Option<i64>,
) -> Result<Vec<Value>, HandlerErr> {
    let mut stmt = conn
        .prepare(
            "SELECT p.id, p.plan_name, p.total_hours, p.created_at,
                    COALESCE(pr.total_subtopics, 0),
                    COALESCE(pr.completed_subtopics, 0),
                    (SELECT MAX(d.completed_at) FROM plan_details d
                      WHERE d.plan_id = p.id AND d.is_completed = 1)
             FROM study_plans p
             LEFT JOIN progress pr ON pr.plan_id = p.id
             WHERE p.user_id = ?
             ORDER BY p.created_at DESC, p.rowid DESC
             LIMIT ?",
        )
        .map_err(|e| HandlerErr::db("db_query_failed", e))?;
    let rows = stmt
        .query_map(rusqlite::params![user_id, limit.unwrap_or(-1)], |r| {
            let total: i64 = r.get(4)?;
            let completed: i64 = r.get(5)?;
            Ok(json!({
                "planId": r.get::<_, String>(0)?,
                "planName": r.get::<_, String>(1)?,
                "totalHours": r.get::<_, f64>(2)?,
                "createdAt": r.get::<_, String>(3)?,
                "totalTopics": total,
                "completedTopics": completed,
                "lastStudied": r.get::<_, Option<String>>(6)?
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(|e| HandlerErr::db("db_query_failed", e))?;
    Ok(rows)
}

fn plans_list(state: &mut AppState, req: &Request) -> Result<Value, HandlerErr> {
    let conn = db_conn(state)?;
    let user = require_user(conn, req)?;
    let plans = plan_summaries(conn, &user.user_id, None)?;
    Ok(json!({ "plans": plans }))
}

struct TopicRow {
    id: String,
    subject_id: String,
    subject: String,
    subtopic: String,
    exam_date: String,
    difficulty: i64,
    hours_allocated: f64,
    is_completed: bool,
    completed_at: Option<String>,
    subject_difficulty: i64,
}

fn plans_open(state: &mut AppState, req: &Request) -> Result<Value, HandlerErr> {
    let conn = db_conn(state)?;
    let user = require_user(conn, req)?;
    let plan_id = required_str(&req.params, "planId")?;
    let today = today_param(&req.params)?;
    let header = owned_plan(conn, &user.user_id, &plan_id)?;

    let mut stmt = conn
        .prepare(
            "SELECT d.id, d.subject_id, d.subject, d.subtopic, d.exam_date, d.difficulty,
                    d.hours_allocated, d.is_completed, d.completed_at, s.difficulty
             FROM plan_details d JOIN plan_subjects s ON s.id = d.subject_id
             WHERE d.plan_id = ?
             ORDER BY d.subject, d.subject_id, d.subtopic, d.sort_order",
        )
        .map_err(|e| HandlerErr::db("db_query_failed", e))?;
    let topics = stmt
        .query_map([&plan_id], |r| {
            Ok(TopicRow {
                id: r.get(0)?,
                subject_id: r.get(1)?,
                subject: r.get(2)?,
                subtopic: r.get(3)?,
                exam_date: r.get(4)?,
                difficulty: r.get(5)?,
                hours_allocated: r.get(6)?,
                is_completed: r.get::<_, i64>(7)? != 0,
                completed_at: r.get(8)?,
                subject_difficulty: r.get(9)?,
            })
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(|e| HandlerErr::db("db_query_failed", e))?;

    let mut subjects: Vec<Value> = Vec::new();
    let mut total_topics = 0i64;
    let mut completed_topics = 0i64;
    let mut i = 0usize;
    while i < topics.len() {
        let first = &topics[i];
        let mut j = i;
        let mut items = Vec::new();
        let mut hours = 0.0;
        let mut done = 0i64;
        while j < topics.len() && topics[j].subject_id == first.subject_id {
            let t = &topics[j];
            hours += t.hours_allocated;
            if t.is_completed {
                done += 1;
            }
            items.push(json!({
                "topicId": t.id,
                "subtopic": t.subtopic,
                "difficulty": t.difficulty,
                "hoursAllocated": t.hours_allocated,
                "isCompleted": t.is_completed,
                "completedAt": t.completed_at
            }));
            j += 1;
        }
        total_topics += items.len() as i64;
        completed_topics += done;
        subjects.push(json!({
            "subjectId": first.subject_id,
            "subject": first.subject,
            "examDate": first.exam_date,
            "daysLeft": days_until(&first.exam_date, today),
            "difficulty": first.subject_difficulty,
            "hoursAllocated": crate::alloc::round_hours(hours),
            "totalTopics": items.len(),
            "completedTopics": done,
            "topics": items
        }));
        i = j;
    }

    Ok(json!({
        "plan": {
            "planId": plan_id,
            "planName": header.name,
            "totalHours": header.total_hours,
            "createdAt": header.created_at,
            "totalTopics": total_topics,
            "completedTopics": completed_topics
        },
        "subjects": subjects
    }))
}

fn plans_delete(state: &mut AppState, req: &Request) -> Result<Value, HandlerErr> {
    let conn = db_conn(state)?;
    let user = require_user(conn, req)?;
    let plan_id = required_str(&req.params, "planId")?;
    owned_plan(conn, &user.user_id, &plan_id)?;

    let tx = conn
        .unchecked_transaction()
        .map_err(|e| HandlerErr::db("db_tx_failed", e))?;
    tx.execute("DELETE FROM study_plans WHERE id = ?", [&plan_id])
        .map_err(|e| HandlerErr::db("db_delete_failed", e))?;
    tx.commit().map_err(|e| HandlerErr::db("db_tx_failed", e))?;
    tracing::info!(plan = %plan_id, user = %user.user_id, "plan deleted");

    Ok(json!({ "ok": true }))
}

fn plans_chart_data(state: &mut AppState, req: &Request) -> Result<Value, HandlerErr> {
    let conn = db_conn(state)?;
    let user = require_user(conn, req)?;
    let plan_id = required_str(&req.params, "planId")?;
    let header = owned_plan(conn, &user.user_id, &plan_id)?;

    let mut stmt = conn
        .prepare(
            "SELECT subject,
                    SUM(hours_allocated),
                    AVG(difficulty),
                    COUNT(*),
                    SUM(CASE WHEN is_completed = 1 THEN 1 ELSE 0 END)
             FROM plan_details
             WHERE plan_id = ?
             GROUP BY subject_id
             ORDER BY MIN(sort_order)",
        )
        .map_err(|e| HandlerErr::db("db_query_failed", e))?;
    let subjects = stmt
        .query_map([&plan_id], |r| {
            Ok((
                r.get::<_, String>(0)?,
                r.get::<_, f64>(1)?,
                r.get::<_, f64>(2)?,
                r.get::<_, i64>(3)?,
                r.get::<_, i64>(4)?,
            ))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(|e| HandlerErr::db("db_query_failed", e))?;

    let total_topics: i64 = subjects.iter().map(|s| s.3).sum();
    let completed_topics: i64 = subjects.iter().map(|s| s.4).sum();
    let subjects: Vec<Value> = subjects
        .into_iter()
        .map(|(subject, hours, avg_difficulty, count, done)| {
            json!({
                "subject": subject,
                "hoursAllocated": crate::alloc::round_hours(hours),
                "avgDifficulty": (avg_difficulty * 100.0).round() / 100.0,
                "topicCount": count,
                "completedTopics": done
            })
        })
        .collect();

    Ok(json!({
        "planName": header.name,
        "totalHours": header.total_hours,
        "totalTopics": total_topics,
        "completedTopics": completed_topics,
        "subjects": subjects
    }))
}

fn plans_export_csv(state: &mut AppState, req: &Request) -> Result<Value, HandlerErr> {
    let conn = db_conn(state)?;
    let user = require_user(conn, req)?;
    let plan_id = required_str(&req.params, "planId")?;
    let out_path = required_str(&req.params, "outPath")?;
    let today = today_param(&req.params)?;
    owned_plan(conn, &user.user_id, &plan_id)?;

    let mut stmt = conn
        .prepare(
            "SELECT subject, subtopic, exam_date, difficulty, hours_allocated, is_completed
             FROM plan_details WHERE plan_id = ? ORDER BY sort_order",
        )
        .map_err(|e| HandlerErr::db("db_query_failed", e))?;
    let rows = stmt
        .query_map([&plan_id], |r| {
            let exam_date: String = r.get(2)?;
            let days_left = days_until(&exam_date, today).unwrap_or(0);
            Ok(PlanCsvRow::new(
                r.get(0)?,
                r.get(1)?,
                exam_date,
                days_left,
                r.get(3)?,
                r.get(4)?,
                r.get::<_, i64>(5)? != 0,
            ))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(|e| HandlerErr::db("db_query_failed", e))?;

    let row_count = export::write_plan_csv(&PathBuf::from(&out_path), &rows).map_err(|e| {
        HandlerErr::new("io_failed", format!("{e:#}")).with_details(json!({ "path": out_path }))
    })?;
    tracing::info!(plan = %plan_id, path = %out_path, rows = row_count, "plan exported");

    Ok(json!({ "path": out_path, "rowCount": row_count }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "plans.list" => plans_list(state, req),
        "plans.open" => plans_open(state, req),
        "plans.delete" => plans_delete(state, req),
        "plans.chartData" => plans_chart_data(state, req),
        "plans.exportCsv" => plans_export_csv(state, req),
        _ => return None,
    };
    Some(respond(req, result))
}
